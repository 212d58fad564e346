//! The snapshot store: freezing, verifying and loading decision snapshots.
//!
//! A snapshot is persisted as a triplet: the raw payload (pretty JSON), the
//! canonical bytes the digest is computed over, and the digest file. The
//! digest file is written last so a partial write is always detectable. Once
//! the triplet exists it is never modified; a same-id save is either a benign
//! identical-content no-op or a refused collision.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::core::canonical;
use crate::core::error::RatchetError;
use crate::core::store::StateStore;
use crate::core::time;

/// Run identity: `<task_id>__<digest_prefix>`. The same string names the
/// snapshot, the phase-two run, and the merge; the classifier and the merge
/// validator parse it instead of consulting any side channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunId {
    pub task_id: String,
    pub digest_prefix: String,
}

impl RunId {
    /// Splits on the last `__` so task ids may themselves contain `__`.
    pub fn parse(raw: &str, prefix_len: usize) -> Result<RunId, RatchetError> {
        let (task_id, digest_prefix) = raw.rsplit_once("__").ok_or_else(|| {
            RatchetError::InputError(format!(
                "malformed run id '{}': expected <task_id>__<digest_prefix>",
                raw
            ))
        })?;
        let task_re = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]*$").unwrap();
        if !task_re.is_match(task_id) {
            return Err(RatchetError::InputError(format!(
                "malformed run id '{}': bad task id part '{}'",
                raw, task_id
            )));
        }
        if digest_prefix.len() != prefix_len
            || !digest_prefix
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
        {
            return Err(RatchetError::InputError(format!(
                "malformed run id '{}': digest prefix must be {} lowercase hex chars",
                raw, prefix_len
            )));
        }
        Ok(RunId {
            task_id: task_id.to_string(),
            digest_prefix: digest_prefix.to_string(),
        })
    }

    pub fn from_digest(task_id: &str, digest: &str, prefix_len: usize) -> RunId {
        RunId {
            task_id: task_id.to_string(),
            digest_prefix: digest[..prefix_len].to_string(),
        }
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}__{}", self.task_id, self.digest_prefix)
    }
}

/// Phase-one output as frozen on disk. Unknown fields ride along in the
/// flattened buckets so an evolved producer round-trips losslessly.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DecisionPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pass: Option<String>,
    #[serde(default, skip_serializing_if = "PayloadMeta::is_empty")]
    pub meta: PayloadMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub immutable_architecture: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub prompt_fingerprints: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub immutable_fingerprint: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PayloadMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_utc: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl PayloadMeta {
    fn is_empty(&self) -> bool {
        self.created_utc.is_none() && self.extra.is_empty()
    }
}

impl DecisionPayload {
    /// Digest of the frozen sub-tree (an absent sub-tree digests as `{}`).
    pub fn architecture_digest(&self) -> String {
        let empty = JsonValue::Object(Map::new());
        canonical::digest_json(self.immutable_architecture.as_ref().unwrap_or(&empty))
    }
}

#[derive(Debug, Clone)]
pub struct SavedSnapshot {
    pub snapshot_id: String,
    pub digest: String,
    pub snapshot_path: PathBuf,
    pub canonical_path: PathBuf,
    pub digest_path: PathBuf,
    /// False when the identical triplet already existed.
    pub created: bool,
}

/// Freezes a decision payload. Stamps `meta.created_utc` and
/// `immutable_fingerprint` when absent (the orchestrator owns both; the
/// payload producer never does), then writes the triplet.
pub fn save_snapshot(
    store: &StateStore,
    task_id: &str,
    mut payload: DecisionPayload,
) -> Result<SavedSnapshot, RatchetError> {
    if payload.meta.created_utc.is_none() {
        payload.meta.created_utc = Some(time::now_epoch_z());
    }
    if payload.immutable_fingerprint.is_none() {
        payload.immutable_fingerprint = Some(payload.architecture_digest());
    }

    let value = serde_json::to_value(&payload).unwrap();
    let canonical_text = canonical::canonical_json(&value);
    let digest = canonical::sha256_hex(canonical_text.as_bytes());
    let prefix_len = store.config.snapshot.digest_prefix_len;
    let snapshot_id = RunId::from_digest(task_id, &digest, prefix_len).to_string();

    let snapshot_path = store.snapshot_path(&snapshot_id);
    let canonical_path = store.canonical_path(&snapshot_id);
    let digest_path = store.digest_path(&snapshot_id);

    if digest_path.exists() {
        let existing = canonical::read_digest_file(&digest_path)?;
        if existing == digest {
            // identical bytes by construction, nothing to do
            return Ok(SavedSnapshot {
                snapshot_id,
                digest,
                snapshot_path,
                canonical_path,
                digest_path,
                created: false,
            });
        }
        return Err(RatchetError::SnapshotInvalid(format!(
            "snapshot id {} already exists with different content (stored {}, computed {})",
            snapshot_id, existing, digest
        )));
    }

    fs::create_dir_all(store.snapshots_dir())?;
    let mut pretty = serde_json::to_string_pretty(&value).unwrap();
    pretty.push('\n');
    fs::write(&snapshot_path, pretty)?;
    fs::write(&canonical_path, &canonical_text)?;
    // digest file last: its presence certifies the other two are complete
    fs::write(&digest_path, format!("{}\n", digest))?;

    Ok(SavedSnapshot {
        snapshot_id,
        digest,
        snapshot_path,
        canonical_path,
        digest_path,
        created: true,
    })
}

#[derive(Debug, Clone)]
pub struct VerifiedSnapshot {
    pub payload: DecisionPayload,
    /// The raw payload as parsed; digests are always recomputed over this,
    /// never over a typed round-trip.
    pub value: JsonValue,
    pub digest: String,
}

/// Recomputes the digest over the raw snapshot file and compares it with the
/// stored digest. Failures carry the concrete reason; a missing file is an
/// input error, a mismatch or empty digest file is a snapshot violation.
pub fn verify_snapshot(
    snapshot_path: &Path,
    digest_path: &Path,
) -> Result<VerifiedSnapshot, RatchetError> {
    if !snapshot_path.exists() {
        return Err(RatchetError::InputError(format!(
            "snapshot file not found: {}",
            snapshot_path.display()
        )));
    }
    if !digest_path.exists() {
        return Err(RatchetError::InputError(format!(
            "digest file not found: {}",
            digest_path.display()
        )));
    }
    let raw = fs::read_to_string(snapshot_path)?;
    let value: JsonValue = serde_json::from_str(&raw).map_err(|e| {
        RatchetError::InputError(format!(
            "malformed JSON in {}: {}",
            snapshot_path.display(),
            e
        ))
    })?;
    let actual = canonical::digest_json(&value);
    let expected = canonical::read_digest_file(digest_path)?;
    if actual != expected {
        return Err(RatchetError::SnapshotInvalid(format!(
            "HASH_MISMATCH: expected={} actual={}",
            expected, actual
        )));
    }
    let payload: DecisionPayload = serde_json::from_value(value.clone()).map_err(|_| {
        RatchetError::InputError(format!(
            "snapshot payload must be a JSON object: {}",
            snapshot_path.display()
        ))
    })?;
    Ok(VerifiedSnapshot {
        payload,
        value,
        digest: actual,
    })
}

pub fn load_verified(
    store: &StateStore,
    snapshot_id: &str,
) -> Result<VerifiedSnapshot, RatchetError> {
    verify_snapshot(
        &store.snapshot_path(snapshot_id),
        &store.digest_path(snapshot_id),
    )
}

/// Node-id set from a registry in either of its two accepted shapes: a
/// mapping keyed by node id, or a list of records carrying `node_id`.
/// `None` means the value has neither shape.
pub fn registry_node_ids(registry: &JsonValue) -> Option<BTreeSet<String>> {
    match registry {
        JsonValue::Object(map) => Some(map.keys().cloned().collect()),
        JsonValue::Array(items) => {
            let mut ids = BTreeSet::new();
            for item in items {
                let id = item.get("node_id")?.as_str()?;
                ids.insert(id.to_string());
            }
            Some(ids)
        }
        _ => None,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StructureSummary {
    pub node_count: usize,
    pub owners_covered: usize,
    pub hub_chain_len: usize,
    pub linking_matrix_rows: usize,
}

/// Structural approvability: a snapshot a human is asked to approve must at
/// least carry a populated architecture. Checks shape only, never content
/// quality.
pub fn check_structure(value: &JsonValue) -> Result<StructureSummary, RatchetError> {
    let arch = value
        .get("immutable_architecture")
        .and_then(|v| v.as_object())
        .filter(|m| !m.is_empty())
        .ok_or_else(|| {
            RatchetError::InputError(
                "immutable_architecture must be a non-empty mapping".to_string(),
            )
        })?;

    let registry = arch.get("node_registry").ok_or_else(|| {
        RatchetError::InputError("immutable_architecture.node_registry is required".to_string())
    })?;
    let node_ids = registry_node_ids(registry).ok_or_else(|| {
        RatchetError::InputError(
            "node_registry must be a mapping or a list of node records".to_string(),
        )
    })?;
    if node_ids.is_empty() {
        return Err(RatchetError::InputError(
            "node_registry must not be empty".to_string(),
        ));
    }

    let owners = arch
        .get("owner_map")
        .and_then(|v| v.as_array())
        .ok_or_else(|| {
            RatchetError::InputError("owner_map must be a list of owner records".to_string())
        })?;
    let mut owned: BTreeSet<String> = BTreeSet::new();
    for entry in owners {
        if let Some(id) = entry.get("node_id").and_then(|v| v.as_str()) {
            owned.insert(id.to_string());
        }
    }
    let unowned: Vec<&String> = node_ids.iter().filter(|id| !owned.contains(*id)).collect();
    if !unowned.is_empty() {
        return Err(RatchetError::InputError(format!(
            "owner_map does not cover {} node id(s), e.g. {}",
            unowned.len(),
            unowned[0]
        )));
    }

    let hub_chain = arch
        .get("hub_chain")
        .and_then(|v| v.as_array())
        .filter(|a| !a.is_empty())
        .ok_or_else(|| {
            RatchetError::InputError("hub_chain must be a non-empty list".to_string())
        })?;

    let matrix = arch
        .get("linking_matrix_skeleton")
        .and_then(|v| v.as_array())
        .filter(|a| !a.is_empty())
        .ok_or_else(|| {
            RatchetError::InputError(
                "linking_matrix_skeleton must be a non-empty list".to_string(),
            )
        })?;

    Ok(StructureSummary {
        node_count: node_ids.len(),
        owners_covered: owned.len(),
        hub_chain_len: hub_chain.len(),
        linking_matrix_rows: matrix.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn run_id_parses_and_round_trips() {
        let id = RunId::parse("task-01__0123456789ab", 12).expect("parse");
        assert_eq!(id.task_id, "task-01");
        assert_eq!(id.digest_prefix, "0123456789ab");
        assert_eq!(id.to_string(), "task-01__0123456789ab");
    }

    #[test]
    fn run_id_splits_on_last_separator() {
        let id = RunId::parse("a__b__cafe01234567", 12).expect("parse");
        assert_eq!(id.task_id, "a__b");
        assert_eq!(id.digest_prefix, "cafe01234567");
    }

    #[test]
    fn run_id_rejects_bad_shapes() {
        assert!(RunId::parse("no-separator", 12).is_err());
        assert!(RunId::parse("task__SHORT", 12).is_err());
        assert!(RunId::parse("task__0123456789AB", 12).is_err());
        assert!(RunId::parse("task__0123456789abcd", 12).is_err());
        assert!(RunId::parse("__0123456789ab", 12).is_err());
    }

    #[test]
    fn architecture_digest_matches_value_level_fingerprint() {
        let payload: DecisionPayload = serde_json::from_value(json!({
            "pass": "DECIDE",
            "immutable_architecture": {"node_registry": {"n1": {}}}
        }))
        .expect("payload");
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            payload.architecture_digest(),
            crate::core::canonical::immutable_fingerprint(&value)
        );
    }

    #[test]
    fn unknown_fields_survive_the_typed_round_trip() {
        let input = json!({
            "pass": "DECIDE",
            "meta": {"created_utc": "1700000000Z", "author": "reviewer"},
            "immutable_architecture": {"node_registry": {"n1": {}}},
            "future_field": {"nested": [1, 2, 3]}
        });
        let payload: DecisionPayload = serde_json::from_value(input.clone()).expect("payload");
        assert_eq!(serde_json::to_value(&payload).unwrap(), input);
    }

    #[test]
    fn registry_ids_accept_both_shapes() {
        let map_form = json!({"n1": {}, "n2": {}});
        let list_form = json!([{"node_id": "n1"}, {"node_id": "n2"}]);
        let expected: BTreeSet<String> = ["n1", "n2"].iter().map(|s| s.to_string()).collect();
        assert_eq!(registry_node_ids(&map_form), Some(expected.clone()));
        assert_eq!(registry_node_ids(&list_form), Some(expected));
        assert_eq!(registry_node_ids(&json!("nope")), None);
        assert_eq!(registry_node_ids(&json!([{"name": "no-id"}])), None);
    }

    #[test]
    fn structure_check_requires_owner_coverage() {
        let value = json!({
            "immutable_architecture": {
                "node_registry": {"n1": {}, "n2": {}},
                "owner_map": [{"node_id": "n1", "owner": "team-a"}],
                "hub_chain": ["n1"],
                "linking_matrix_skeleton": [["n1", "n2"]]
            }
        });
        let err = check_structure(&value).expect_err("must flag unowned node");
        assert!(err.to_string().contains("owner_map"));
    }

    #[test]
    fn structure_check_passes_a_complete_architecture() {
        let value = json!({
            "immutable_architecture": {
                "node_registry": {"n1": {}, "n2": {}},
                "owner_map": [
                    {"node_id": "n1", "owner": "team-a"},
                    {"node_id": "n2", "owner": "team-b"}
                ],
                "hub_chain": ["n1", "n2"],
                "linking_matrix_skeleton": [["n1", "n2"]]
            }
        });
        let summary = check_structure(&value).expect("approvable");
        assert_eq!(summary.node_count, 2);
        assert_eq!(summary.owners_covered, 2);
    }
}
