//! Workspace configuration, read from `ratchet.toml` at the workspace root.
//!
//! Every knob has a default matching the persisted-layout contract; a missing
//! config file means "all defaults". Unknown keys are rejected so a typo in
//! the file cannot silently fall back to a default.

use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::core::error::RatchetError;

pub const CONFIG_FILE: &str = "ratchet.toml";

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields, default)]
pub struct WorkspaceConfig {
    pub paths: PathsConfig,
    pub snapshot: SnapshotConfig,
    pub bridge: BridgeConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PathsConfig {
    pub state_dir: String,
    pub outputs_dir: String,
    pub prompts_dir: String,
    pub task_file: String,
    pub schema_file: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        PathsConfig {
            state_dir: "state".to_string(),
            outputs_dir: "outputs".to_string(),
            prompts_dir: "prompts".to_string(),
            task_file: "input/task.json".to_string(),
            schema_file: "state/arch_decision_schema.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SnapshotConfig {
    /// Hex chars of the payload digest carried in snapshot/run/merge ids.
    pub digest_prefix_len: usize,
    /// Prompt files (relative to the prompts dir) whose fingerprints are
    /// frozen into the snapshot and re-verified by the pre-flight gate.
    pub pinned_prompts: Vec<String>,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        SnapshotConfig {
            digest_prefix_len: 12,
            pinned_prompts: vec![
                "pass_2_execute_core.md".to_string(),
                "pass_2_execute_anchors.md".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields, default)]
pub struct BridgeConfig {
    /// External command invoked as `<command...> --in <request> --out <response>`.
    /// Empty means no bridge is configured and LLM-calling commands refuse.
    pub command: Vec<String>,
}

pub fn load(root: &Path) -> Result<WorkspaceConfig, RatchetError> {
    let path = root.join(CONFIG_FILE);
    if !path.exists() {
        return Ok(WorkspaceConfig::default());
    }
    let raw = fs::read_to_string(&path)?;
    toml::from_str(&raw).map_err(|e| {
        RatchetError::InputError(format!("could not parse {}: {}", path.display(), e))
    })
}
