//! Post-merge deliverables validation.
//!
//! Runs only against a merge id; the merge record is the sole authority for
//! every path it reads. Findings aggregate through the Reporter so a single
//! run surfaces every coverage defect at once, while record-level and
//! snapshot-level breakage still aborts early.

use serde_json::{Value as JsonValue, json};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::core::error::RatchetError;
use crate::core::report::Reporter;
use crate::core::snapshot::registry_node_ids;
use crate::core::store::StateStore;

const SAMPLE_LIMIT: usize = 10;

pub fn run_postcheck(store: &StateStore, merge_id: &str) -> Reporter {
    let mut r = Reporter::new();
    check(store, merge_id, &mut r);
    if !r.has_fail() && !r.has_blocker() {
        r.pass(
            "OK",
            format!("deliverables consistent for merge {}", merge_id),
        );
    }
    r
}

fn check(store: &StateStore, merge_id: &str, r: &mut Reporter) {
    let record_path = store.merge_record_path(merge_id);
    if !record_path.exists() {
        r.blocker(
            "MERGE_STATE_INVALID",
            format!("merge record not found: {}", record_path.display()),
            None,
        );
        r.blocker(
            "LIFECYCLE_VIOLATION",
            "POST-CHECK requires MERGE to have completed",
            None,
        );
        return;
    }
    let record = match read_json(&record_path) {
        Ok(v) => v,
        Err(RatchetError::IoError(e)) => {
            r.fail(
                "IO_ERROR",
                format!("cannot read {}: {}", record_path.display(), e),
                None,
            );
            return;
        }
        Err(e) => {
            r.blocker(
                "MERGE_STATE_INVALID",
                format!("merge record unreadable: {}", e),
                None,
            );
            return;
        }
    };

    let Some(canonical_path) = record
        .pointer("/snapshot_canonical/path")
        .and_then(|v| v.as_str())
    else {
        r.blocker(
            "MERGE_STATE_INVALID",
            "merge record missing snapshot_canonical.path",
            None,
        );
        return;
    };
    let canonical = match read_json(Path::new(canonical_path)) {
        Ok(v) => v,
        Err(RatchetError::IoError(e)) => {
            r.fail(
                "IO_ERROR",
                format!("cannot read {}: {}", canonical_path, e),
                None,
            );
            return;
        }
        Err(e) => {
            r.blocker(
                "SNAPSHOT_INVALID",
                format!("canonical snapshot unreadable: {}", e),
                None,
            );
            return;
        }
    };

    let registry = canonical
        .pointer("/immutable_architecture/node_registry")
        .cloned()
        .unwrap_or(JsonValue::Null);
    let expected = match registry_node_ids(&registry) {
        Some(ids) if !ids.is_empty() => ids,
        _ => {
            r.blocker(
                "SNAPSHOT_INVALID",
                "immutable_architecture.node_registry missing or empty",
                None,
            );
            return;
        }
    };

    let core_paths = [
        ("semantic_enrichment", "/artifacts/core/semantic_enrichment_path"),
        ("keywords", "/artifacts/core/keywords_path"),
        ("patient_questions", "/artifacts/core/patient_questions_path"),
    ];
    let mut semantic_path: Option<PathBuf> = None;
    for (name, pointer) in core_paths {
        let Some(path) = record.pointer(pointer).and_then(|v| v.as_str()) else {
            r.blocker(
                "MERGE_STATE_INVALID",
                format!("merge record missing artifacts.core.{}_path", name),
                None,
            );
            continue;
        };
        if name == "semantic_enrichment" {
            semantic_path = Some(PathBuf::from(path));
        }
        check_node_coverage(Path::new(path), name, &expected, r);
    }

    match record
        .pointer("/artifacts/anchors/anchors_path")
        .and_then(|v| v.as_str())
    {
        Some(path) => check_anchors(Path::new(path), &expected, r),
        None => r.blocker(
            "MERGE_STATE_INVALID",
            "merge record missing artifacts.anchors.anchors_path",
            None,
        ),
    }

    if let Some(sem) = semantic_path {
        // run root is two levels above outputs/<run_id>/core/<file>
        if let Some(run_root) = sem.parent().and_then(|p| p.parent()) {
            check_final_artifacts(run_root, r);
        }
    }
}

/// A core deliverable is a mapping keyed by node id; its key set must equal
/// the registry exactly, no gaps and no inventions.
fn check_node_coverage(path: &Path, name: &str, expected: &BTreeSet<String>, r: &mut Reporter) {
    let value = match read_json(path) {
        Ok(v) => v,
        Err(RatchetError::IoError(e)) => {
            r.fail(
                "IO_ERROR",
                format!("cannot read {}: {}", path.display(), e),
                None,
            );
            return;
        }
        Err(e) => {
            r.fail("DELIVERABLES_CHECK_FAILED", e.to_string(), None);
            return;
        }
    };
    let Some(map) = value.as_object() else {
        r.fail(
            "DELIVERABLES_CHECK_FAILED",
            format!("{} must be a mapping keyed by node id", name),
            None,
        );
        return;
    };
    let got: BTreeSet<String> = map.keys().cloned().collect();
    let missing: Vec<&String> = expected.difference(&got).collect();
    let extra: Vec<&String> = got.difference(expected).collect();
    if !missing.is_empty() || !extra.is_empty() {
        r.fail(
            "NODE_COVERAGE_INCOMPLETE",
            format!(
                "{}: node coverage incomplete (missing {}, extra {})",
                name,
                missing.len(),
                extra.len()
            ),
            Some(json!({
                "deliverable": name,
                "missing": missing.len(),
                "missing_sample": missing.iter().take(SAMPLE_LIMIT).collect::<Vec<_>>(),
                "extra": extra.len(),
                "extra_sample": extra.iter().take(SAMPLE_LIMIT).collect::<Vec<_>>(),
            })),
        );
    }
}

fn check_anchors(path: &Path, expected: &BTreeSet<String>, r: &mut Reporter) {
    let value = match read_json(path) {
        Ok(v) => v,
        Err(RatchetError::IoError(e)) => {
            r.fail(
                "IO_ERROR",
                format!("cannot read {}: {}", path.display(), e),
                None,
            );
            return;
        }
        Err(e) => {
            r.fail("ANCHORS_INVALID", e.to_string(), None);
            return;
        }
    };
    let Some(rows) = value.as_array() else {
        r.fail(
            "ANCHORS_INVALID",
            "anchors must be a list of {from_node_id, to_node_id} rows",
            None,
        );
        return;
    };
    let mut bad_rows = 0usize;
    let mut sample: Vec<JsonValue> = Vec::new();
    for row in rows {
        let from_ok = row
            .get("from_node_id")
            .and_then(|v| v.as_str())
            .is_some_and(|id| expected.contains(id));
        let to_ok = row
            .get("to_node_id")
            .and_then(|v| v.as_str())
            .is_some_and(|id| expected.contains(id));
        if !(from_ok && to_ok) {
            bad_rows += 1;
            if sample.len() < SAMPLE_LIMIT {
                sample.push(row.clone());
            }
        }
    }
    if bad_rows > 0 {
        r.fail(
            "ANCHORS_INVALID",
            format!("{} invalid anchor row(s) of {}", bad_rows, rows.len()),
            Some(json!({
                "bad_rows": bad_rows,
                "total_rows": rows.len(),
                "sample": sample,
            })),
        );
    }
}

/// Optional summary document at the run root. Absence is fine; a present but
/// hollow one is not.
fn check_final_artifacts(run_root: &Path, r: &mut Reporter) {
    let path = run_root.join(crate::core::store::FINAL_ARTIFACTS_FILE);
    if !path.exists() {
        return;
    }
    let value = match read_json(&path) {
        Ok(v) => v,
        Err(e) => {
            r.fail(
                "DELIVERABLES_CHECK_FAILED",
                format!("final_artifacts unreadable: {}", e),
                None,
            );
            return;
        }
    };
    let ok = value
        .get("main_summary_table")
        .and_then(|v| v.as_str())
        .is_some_and(|s| !s.trim().is_empty());
    if !ok {
        r.fail(
            "DELIVERABLES_CHECK_FAILED",
            "final_artifacts.main_summary_table must be a non-empty string",
            None,
        );
    }
}

fn read_json(path: &Path) -> Result<JsonValue, RatchetError> {
    let raw = fs::read_to_string(path)?;
    serde_json::from_str(&raw).map_err(|e| {
        RatchetError::InputError(format!("malformed JSON in {}: {}", path.display(), e))
    })
}
