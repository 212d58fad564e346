//! Phase one: run DECIDE and freeze the outcome.
//!
//! The provider is given the decide prompt plus the task and the decision
//! schema as pinned JSON blocks, and must answer with a single decision
//! object. The orchestrator stamps the fields the provider never controls
//! (`immutable_fingerprint`, pinned prompt fingerprints), then freezes the
//! payload as a content-addressed snapshot. From that point on the decision
//! can only be approved or abandoned, never edited.

use serde_json::Value as JsonValue;
use std::fs;
use std::path::Path;

use crate::core::audit;
use crate::core::canonical;
use crate::core::error::RatchetError;
use crate::core::report::{self, Level};
use crate::core::snapshot::{self, DecisionPayload, SavedSnapshot};
use crate::core::store::StateStore;
use crate::pipeline::bridge::{Bridge, BridgeRequest, CommandBridge, parse_object_response};
use crate::pipeline::{read_json, read_text};

pub const DECIDE_PROMPT_FILE: &str = "pass_1_decide.md";

fn build_decide_request(prompt: &str, task: &JsonValue, schema_doc: &JsonValue) -> String {
    format!(
        "{}\n\nTASK_JSON:\n{}\n\nARCH_SCHEMA_JSON:\n{}\n",
        prompt.trim(),
        serde_json::to_string_pretty(task).unwrap(),
        serde_json::to_string_pretty(schema_doc).unwrap()
    )
}

/// Runs phase one against the given bridge and freezes the result.
///
/// The raw provider text is preserved on disk before any parsing, so a
/// malformed response can still be diagnosed after the command fails.
pub fn decide_with(store: &StateStore, bridge: &dyn Bridge) -> Result<SavedSnapshot, RatchetError> {
    let task = read_json(&store.task_file())?;
    let schema_doc = read_json(&store.schema_file())?;
    let prompt = read_text(&store.prompt_path(DECIDE_PROMPT_FILE))?;

    let task_id = task
        .get("task_id")
        .and_then(|v| v.as_str())
        .unwrap_or("task")
        .to_string();

    let request = BridgeRequest {
        text: build_decide_request(&prompt, &task, &schema_doc),
    };
    let response = bridge.generate(&request)?;

    fs::create_dir_all(store.outputs_dir())?;
    fs::write(store.pass1_raw_path(), &response.text)?;

    let value = parse_object_response(&response, "immutable_architecture")?;
    if value.get("pass").and_then(|v| v.as_str()) != Some("DECIDE") {
        return Err(RatchetError::InputError(
            "decision payload must carry pass=\"DECIDE\"".to_string(),
        ));
    }

    let mut payload: DecisionPayload = serde_json::from_value(value).map_err(|e| {
        RatchetError::InputError(format!("decision payload does not deserialize: {}", e))
    })?;

    // Provider-supplied values for these are discarded: the orchestrator is
    // the only writer of fingerprint fields.
    payload.immutable_fingerprint = Some(payload.architecture_digest());
    for name in &store.config.snapshot.pinned_prompts {
        let path = store.prompt_path(name);
        if !path.exists() {
            return Err(RatchetError::InputError(format!(
                "pinned prompt file not found: {}",
                path.display()
            )));
        }
        // Recorded under the file stem, the same key the pre-flight gate
        // looks up.
        let stem = Path::new(name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(name.as_str())
            .to_string();
        payload
            .prompt_fingerprints
            .insert(stem, canonical::fingerprint_file(&path)?);
    }

    let saved = snapshot::save_snapshot(store, &task_id, payload)?;
    audit::log_event(
        store,
        "decide",
        &saved.snapshot_id,
        "ok",
        Some(format!("digest {}", saved.digest)),
    )?;
    Ok(saved)
}

pub fn run_decide_cli(store: &StateStore) -> Result<i32, RatchetError> {
    store.ensure_layout()?;
    let bridge = CommandBridge::new(store);
    let saved = decide_with(store, &bridge)?;

    println!(
        "{}",
        report::status_line(
            Level::Pass,
            "OK",
            &format!("decision snapshot frozen: {}", saved.snapshot_id),
        )
    );
    if !saved.created {
        println!("  identical snapshot already existed, nothing rewritten");
    }
    println!("  snapshot:  {}", saved.snapshot_path.display());
    println!("  canonical: {}", saved.canonical_path.display());
    println!("  digest:    {}", saved.digest_path.display());
    println!("  next: ratchet verify --snapshot {}", saved.snapshot_id);
    Ok(0)
}
