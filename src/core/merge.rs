//! Merge validation: the terminal step of a run.
//!
//! A merge consumes the two stage outputs of one run and emits a merge record
//! plus a by-run pointer. It never touches the deliverables themselves; the
//! record carries resolved absolute paths and downstream validation reads
//! those. There is exactly one merge per run, ever: a pre-existing record or
//! pointer is a contract violation, not an idempotent success.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fs;
use std::path::PathBuf;

use crate::core::error::RatchetError;
use crate::core::snapshot::RunId;
use crate::core::store::{Stage, StateStore};
use crate::core::time;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeRecord {
    pub merge_id: String,
    pub task_id: String,
    pub created_utc: String,
    pub immutable_fingerprint: String,
    pub source_runs: SourceRuns,
    pub snapshot_canonical: SnapshotRef,
    pub artifacts: MergeArtifacts,
    pub merge_contract: MergeContract,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRuns {
    pub core_run_id: String,
    pub anchors_run_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRef {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeArtifacts {
    pub core: CoreArtifacts,
    pub anchors: AnchorsArtifacts,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreArtifacts {
    pub semantic_enrichment_path: String,
    pub keywords_path: String,
    pub patient_questions_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnchorsArtifacts {
    pub anchors_path: String,
}

/// States on the record that no generation happened here: a merge is pure
/// structure over already-validated inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeContract {
    pub llm_involvement: bool,
    pub operation: String,
}

#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub record: MergeRecord,
    pub record_path: PathBuf,
    pub pointer_path: PathBuf,
}

/// Validates and performs the merge of one run's two stages.
pub fn merge_runs(
    store: &StateStore,
    core_run: &str,
    anchors_run: &str,
) -> Result<MergeOutcome, RatchetError> {
    let prefix_len = store.config.snapshot.digest_prefix_len;
    let core_id = RunId::parse(core_run, prefix_len)?;
    let anchors_id = RunId::parse(anchors_run, prefix_len)?;
    if core_id != anchors_id {
        return Err(RatchetError::InputError(format!(
            "run ids disagree: core={} anchors={} (cross-run merge is never valid)",
            core_id, anchors_id
        )));
    }
    let merge_id = core_id.to_string();

    let record_path = store.merge_record_path(&merge_id);
    let pointer_path = store.merge_pointer_path(&merge_id);
    if record_path.exists() {
        return Err(RatchetError::MergeStateInvalid(format!(
            "merge record already exists: {}",
            record_path.display()
        )));
    }
    if pointer_path.exists() {
        return Err(RatchetError::MergeStateInvalid(format!(
            "merge pointer already exists: {}",
            pointer_path.display()
        )));
    }

    let canonical_path = store.canonical_path(&merge_id);
    let mut missing: Vec<PathBuf> = Vec::new();
    if !canonical_path.exists() {
        missing.push(canonical_path.clone());
    }
    for stage in Stage::ALL {
        let dir = store.stage_dir(&merge_id, stage);
        if !dir.is_dir() {
            missing.push(dir);
            continue;
        }
        let envelope = store.execution_result_path(&merge_id, stage);
        if !envelope.exists() {
            missing.push(envelope);
        }
        for name in stage.deliverables() {
            let path = store.deliverable_path(&merge_id, stage, name);
            if !path.exists() {
                missing.push(path);
            }
        }
    }
    if !missing.is_empty() {
        return Err(RatchetError::MissingDeliverables(missing));
    }

    let core_fp = stage_fingerprint(store, &merge_id, Stage::Core)?;
    let anchors_fp = stage_fingerprint(store, &merge_id, Stage::Anchors)?;
    if core_fp != anchors_fp {
        return Err(RatchetError::FingerprintMismatch(format!(
            "stage fingerprints disagree: core={} anchors={}",
            core_fp, anchors_fp
        )));
    }

    let record = MergeRecord {
        merge_id: merge_id.clone(),
        task_id: core_id.task_id.clone(),
        created_utc: time::now_epoch_z(),
        immutable_fingerprint: core_fp,
        source_runs: SourceRuns {
            core_run_id: merge_id.clone(),
            anchors_run_id: merge_id.clone(),
        },
        snapshot_canonical: SnapshotRef {
            path: abs_string(store, &canonical_path),
        },
        artifacts: MergeArtifacts {
            core: CoreArtifacts {
                semantic_enrichment_path: abs_string(
                    store,
                    &store.deliverable_path(&merge_id, Stage::Core, "semantic_enrichment"),
                ),
                keywords_path: abs_string(
                    store,
                    &store.deliverable_path(&merge_id, Stage::Core, "keywords"),
                ),
                patient_questions_path: abs_string(
                    store,
                    &store.deliverable_path(&merge_id, Stage::Core, "patient_questions"),
                ),
            },
            anchors: AnchorsArtifacts {
                anchors_path: abs_string(
                    store,
                    &store.deliverable_path(&merge_id, Stage::Anchors, "anchors"),
                ),
            },
        },
        merge_contract: MergeContract {
            llm_involvement: false,
            operation: "structural_wrap".to_string(),
        },
    };

    fs::create_dir_all(store.merge_pointers_dir())?;
    let value = serde_json::to_value(&record).unwrap();
    let mut pretty = serde_json::to_string_pretty(&value).unwrap();
    pretty.push('\n');
    fs::write(&record_path, pretty)?;
    // pointer last: once it exists the classifier reports MERGED, so the
    // record it points at must already be complete
    fs::write(&pointer_path, format!("{}\n", merge_id))?;

    Ok(MergeOutcome {
        record,
        record_path,
        pointer_path,
    })
}

/// The stage's own recorded whole-architecture digest, read back value-level
/// from its envelope. Absence and inequality are different defects; this
/// surfaces absence, the caller compares.
fn stage_fingerprint(
    store: &StateStore,
    run_id: &str,
    stage: Stage,
) -> Result<String, RatchetError> {
    let path = store.execution_result_path(run_id, stage);
    let raw = fs::read_to_string(&path)?;
    let value: JsonValue = serde_json::from_str(&raw).map_err(|e| {
        RatchetError::InputError(format!("malformed JSON in {}: {}", path.display(), e))
    })?;
    match value.get("immutable_fingerprint").and_then(|v| v.as_str()) {
        Some(fp) if !fp.is_empty() => Ok(fp.to_string()),
        _ => Err(RatchetError::FingerprintMissing(format!(
            "{} execution_result records no immutable_fingerprint",
            stage
        ))),
    }
}

fn abs_string(store: &StateStore, path: &std::path::Path) -> String {
    store.absolutize(path).display().to_string()
}
