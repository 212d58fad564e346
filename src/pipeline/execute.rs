//! Phase two: gated stage execution.
//!
//! Nothing here runs until the pre-flight gate clears the snapshot; the
//! provider call is the expensive, unrepeatable part, so every lifecycle and
//! immutability defect must be caught before it. After the call the response
//! is validated against the stage's deliverable contract and frozen as an
//! envelope plus one file per deliverable. The envelope's
//! `immutable_fingerprint` is stamped from the cleared snapshot; the provider
//! has no say in it.

use clap::Parser;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::fs;
use std::path::PathBuf;

use crate::core::audit;
use crate::core::error::RatchetError;
use crate::core::preflight;
use crate::core::report::{self, Level};
use crate::core::store::{EXECUTION_RAW_FILE, Stage, StateStore};
use crate::core::time;
use crate::pipeline::bridge::{Bridge, BridgeRequest, CommandBridge, parse_object_response};
use crate::pipeline::{read_json, read_text};

#[derive(Parser, Debug)]
pub struct ExecuteCli {
    /// Snapshot id to execute, as printed by decide
    #[clap(long)]
    pub snapshot: String,
    /// Stage to run: core or anchors
    #[clap(long)]
    pub stage: String,
    /// Discard this stage's previous output directory and re-run
    #[clap(long, default_value_t = false)]
    pub force: bool,
}

/// What one stage execution freezes on disk as `execution_result.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionEnvelope {
    pub pass: String,
    pub stage: String,
    pub snapshot_id: String,
    pub created_utc: String,
    /// Stamped from the cleared snapshot, never taken from the response.
    pub immutable_fingerprint: String,
    pub deliverables: JsonValue,
    /// File name of the preserved raw response, next to the envelope.
    pub raw_response: String,
}

#[derive(Debug, Clone)]
pub struct StageOutcome {
    pub stage: Stage,
    pub stage_dir: PathBuf,
    pub envelope_path: PathBuf,
    pub raw_path: PathBuf,
    pub deliverable_paths: Vec<PathBuf>,
}

fn build_execute_request(prompt: &str, task: &JsonValue, decision: &JsonValue) -> String {
    format!(
        "{}\n\nTASK_JSON:\n{}\n\nARCH_DECISION_JSON:\n{}\n",
        prompt.trim(),
        serde_json::to_string_pretty(task).unwrap(),
        serde_json::to_string_pretty(decision).unwrap()
    )
}

/// Checks the response against the stage contract and hands back the
/// deliverables mapping. Nothing is padded in: a missing or misshapen
/// deliverable fails the stage instead of becoming an empty placeholder file.
fn validate_deliverables(
    result: &JsonValue,
    stage: Stage,
) -> Result<Map<String, JsonValue>, RatchetError> {
    let deliverables = result
        .get("deliverables")
        .and_then(|v| v.as_object())
        .ok_or_else(|| {
            RatchetError::DeliverablesError(
                "execution result carries no deliverables mapping".to_string(),
            )
        })?;

    if deliverables.contains_key("immutable_architecture") {
        return Err(RatchetError::LifecycleViolation(
            "deliverables must not carry immutable_architecture".to_string(),
        ));
    }

    let mut problems: Vec<String> = Vec::new();
    for name in stage.deliverables() {
        match deliverables.get(*name) {
            None => problems.push(format!("missing '{}'", name)),
            Some(v) => {
                let ok = match stage {
                    Stage::Core => v.is_object(),
                    Stage::Anchors => v.is_array(),
                };
                if !ok {
                    let want = match stage {
                        Stage::Core => "a mapping",
                        Stage::Anchors => "a list",
                    };
                    problems.push(format!("'{}' must be {}", name, want));
                }
            }
        }
    }
    if !problems.is_empty() {
        return Err(RatchetError::DeliverablesError(format!(
            "stage {} response rejected: {}",
            stage,
            problems.join("; ")
        )));
    }
    Ok(deliverables.clone())
}

/// Runs one stage against the given bridge.
///
/// Order matters: the gate and all input reads come before any write, the
/// stage directory is claimed before the provider call, and the raw response
/// lands on disk before parsing so a rejected response stays diagnosable.
pub fn execute_with(
    store: &StateStore,
    bridge: &dyn Bridge,
    snapshot_id: &str,
    stage: Stage,
    force: bool,
) -> Result<StageOutcome, RatchetError> {
    let cleared = preflight::preflight(store, snapshot_id)?;

    let task = read_json(&store.task_file())?;
    let prompt = read_text(&store.prompt_path(stage.prompt_file()))?;

    let stage_dir = store.stage_dir(snapshot_id, stage);
    if stage_dir.exists() {
        if !force {
            return Err(RatchetError::LifecycleViolation(format!(
                "stage '{}' output already exists for {} (pass --force to discard it): {}",
                stage,
                snapshot_id,
                stage_dir.display()
            )));
        }
        // narrow override: only this stage's directory is discarded
        fs::remove_dir_all(&stage_dir)?;
    }
    fs::create_dir_all(&stage_dir)?;

    let request = BridgeRequest {
        text: build_execute_request(&prompt, &task, &cleared.value),
    };
    let response = bridge.generate(&request)?;

    let raw_path = store.execution_raw_path(snapshot_id, stage);
    fs::write(&raw_path, &response.text)?;

    let result = parse_object_response(&response, "deliverables")?;
    let deliverables = validate_deliverables(&result, stage)?;

    let envelope = ExecutionEnvelope {
        pass: "EXECUTE".to_string(),
        stage: stage.to_string(),
        snapshot_id: snapshot_id.to_string(),
        created_utc: time::now_epoch_z(),
        immutable_fingerprint: cleared.immutable_fingerprint.clone(),
        deliverables: JsonValue::Object(deliverables.clone()),
        raw_response: EXECUTION_RAW_FILE.to_string(),
    };
    let envelope_path = store.execution_result_path(snapshot_id, stage);
    let mut pretty = serde_json::to_string_pretty(&serde_json::to_value(&envelope).unwrap()).unwrap();
    pretty.push('\n');
    fs::write(&envelope_path, pretty)?;

    let mut deliverable_paths = Vec::new();
    for name in stage.deliverables() {
        let path = store.deliverable_path(snapshot_id, stage, name);
        let mut body = serde_json::to_string_pretty(&deliverables[*name]).unwrap();
        body.push('\n');
        fs::write(&path, body)?;
        deliverable_paths.push(path);
    }

    audit::log_event(
        store,
        "execute",
        snapshot_id,
        "ok",
        Some(format!("stage {}", stage)),
    )?;

    Ok(StageOutcome {
        stage,
        stage_dir,
        envelope_path,
        raw_path,
        deliverable_paths,
    })
}

pub fn run_execute_cli(store: &StateStore, cli: ExecuteCli) -> Result<i32, RatchetError> {
    let stage: Stage = cli.stage.parse()?;
    let bridge = CommandBridge::new(store);
    let outcome = execute_with(store, &bridge, &cli.snapshot, stage, cli.force)?;

    println!(
        "{}",
        report::status_line(
            Level::Pass,
            "OK",
            &format!("stage {} executed for {}", outcome.stage, cli.snapshot),
        )
    );
    println!("  envelope: {}", outcome.envelope_path.display());
    println!("  raw:      {}", outcome.raw_path.display());
    for path in &outcome.deliverable_paths {
        println!("  wrote:    {}", path.display());
    }

    let other = match stage {
        Stage::Core => Stage::Anchors,
        Stage::Anchors => Stage::Core,
    };
    if store.stage_dir(&cli.snapshot, other).exists() {
        println!(
            "  next: ratchet merge --core-run {} --anchors-run {}",
            cli.snapshot, cli.snapshot
        );
    } else {
        println!(
            "  next: ratchet execute --snapshot {} --stage {}",
            cli.snapshot, other
        );
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_carries_prompt_then_task_then_decision() {
        let text = build_execute_request(
            "# PASS_2 / EXECUTE (stage: core)\n",
            &json!({"task_id": "t1"}),
            &json!({"pass": "DECIDE"}),
        );
        let task_at = text.find("TASK_JSON:\n").expect("task block");
        let decision_at = text.find("ARCH_DECISION_JSON:\n").expect("decision block");
        assert!(text.starts_with("# PASS_2 / EXECUTE"));
        assert!(task_at < decision_at);
    }

    #[test]
    fn core_deliverables_must_all_be_mappings() {
        let ok = json!({"deliverables": {
            "semantic_enrichment": {"n1": {}},
            "keywords": {"n1": []},
            "patient_questions": {"n1": []}
        }});
        assert!(validate_deliverables(&ok, Stage::Core).is_ok());

        let missing = json!({"deliverables": {"keywords": {}}});
        let err = validate_deliverables(&missing, Stage::Core).unwrap_err();
        assert!(matches!(err, RatchetError::DeliverablesError(_)));
        assert!(err.to_string().contains("semantic_enrichment"));
        assert!(err.to_string().contains("patient_questions"));

        let misshapen = json!({"deliverables": {
            "semantic_enrichment": [],
            "keywords": {},
            "patient_questions": {}
        }});
        let err = validate_deliverables(&misshapen, Stage::Core).unwrap_err();
        assert!(err.to_string().contains("must be a mapping"));
    }

    #[test]
    fn anchors_deliverable_must_be_a_list() {
        let ok = json!({"deliverables": {"anchors": [{"from_node_id": "a", "to_node_id": "b"}]}});
        assert!(validate_deliverables(&ok, Stage::Anchors).is_ok());

        let misshapen = json!({"deliverables": {"anchors": {"a": "b"}}});
        let err = validate_deliverables(&misshapen, Stage::Anchors).unwrap_err();
        assert!(err.to_string().contains("must be a list"));
    }

    #[test]
    fn architecture_inside_deliverables_is_a_violation() {
        let smuggled = json!({"deliverables": {
            "anchors": [],
            "immutable_architecture": {"node_registry": {}}
        }});
        let err = validate_deliverables(&smuggled, Stage::Anchors).unwrap_err();
        assert!(matches!(err, RatchetError::LifecycleViolation(_)));
    }
}
