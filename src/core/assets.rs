//! Embedded workspace templates.
//!
//! Everything `ratchet init` materializes is baked into the binary at compile
//! time, so a fresh workspace never depends on files shipped next to the
//! executable.

macro_rules! embedded_templates {
    ($($name:expr => $const_name:ident @ $file:expr),* $(,)?) => {
        $(
            pub const $const_name: &str =
                include_str!(concat!("../../templates/", $file));
        )*

        /// Template content by its workspace-relative destination path.
        pub fn get_template(name: &str) -> Option<&'static str> {
            match name {
                $( $name => Some($const_name), )*
                _ => None,
            }
        }

        /// Destination paths in scaffold order.
        pub fn list_templates() -> Vec<&'static str> {
            vec![ $( $name, )* ]
        }
    };
}

embedded_templates! {
    "ratchet.toml" => TEMPLATE_CONFIG @ "ratchet.toml",
    "input/task.json" => TEMPLATE_TASK @ "task.json",
    "state/arch_decision_schema.json" => TEMPLATE_SCHEMA @ "arch_decision_schema.json",
    "prompts/pass_1_decide.md" => TEMPLATE_PROMPT_DECIDE @ "pass_1_decide.md",
    "prompts/pass_2_execute_core.md" => TEMPLATE_PROMPT_CORE @ "pass_2_execute_core.md",
    "prompts/pass_2_execute_anchors.md" => TEMPLATE_PROMPT_ANCHORS @ "pass_2_execute_anchors.md",
}
