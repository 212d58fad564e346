use ratchet::core::approval;
use ratchet::core::assets;
use ratchet::core::canonical;
use ratchet::core::config::{self, WorkspaceConfig};
use ratchet::core::error::RatchetError;
use ratchet::core::scaffold::{ScaffoldOptions, scaffold_workspace};
use ratchet::core::snapshot::{self, DecisionPayload, RunId, check_structure};
use ratchet::core::store::StateStore;
use serde_json::{Value as JsonValue, json};
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn architecture() -> JsonValue {
    json!({
        "node_registry": {
            "n1": {"title": "Overview"},
            "n2": {"title": "Risks and side effects"}
        },
        "owner_map": [
            {"node_id": "n1", "owner": "core"},
            {"node_id": "n2", "owner": "core"}
        ],
        "hub_chain": ["n1"],
        "linking_matrix_skeleton": [
            {"from_node_id": "n1", "to_node_id": "n2"}
        ]
    })
}

/// Fixed timestamp so repeated saves are byte-identical.
fn decision_payload() -> DecisionPayload {
    serde_json::from_value(json!({
        "pass": "DECIDE",
        "meta": {"created_utc": "1755945600Z"},
        "immutable_architecture": architecture(),
    }))
    .expect("payload")
}

fn store_at(dir: &Path) -> StateStore {
    StateStore::new(dir, WorkspaceConfig::default())
}

#[test]
fn scaffold_materializes_a_loadable_workspace() {
    let tmp = tempdir().expect("tempdir");
    let dir = tmp.path().to_path_buf();
    scaffold_workspace(&ScaffoldOptions {
        target_dir: dir.clone(),
        force: false,
        dry_run: false,
    })
    .expect("scaffold");

    for name in assets::list_templates() {
        assert!(dir.join(name).exists(), "missing scaffold file: {}", name);
    }
    assert!(dir.join("state").is_dir());
    assert!(dir.join("outputs").is_dir());

    let cfg = config::load(&dir).expect("template config must load");
    assert_eq!(cfg.snapshot.digest_prefix_len, 12);
    assert_eq!(
        cfg.snapshot.pinned_prompts,
        vec!["pass_2_execute_core.md", "pass_2_execute_anchors.md"]
    );
    assert!(cfg.bridge.command.is_empty());

    let before = fs::read(dir.join("ratchet.toml")).expect("read config");
    let err = scaffold_workspace(&ScaffoldOptions {
        target_dir: dir.clone(),
        force: false,
        dry_run: false,
    })
    .expect_err("must refuse to overwrite");
    assert!(matches!(err, RatchetError::InputError(_)));
    assert_eq!(fs::read(dir.join("ratchet.toml")).expect("read config"), before);
}

#[test]
fn freezing_a_decision_yields_a_verifiable_triplet() {
    let tmp = tempdir().expect("tempdir");
    let store = store_at(tmp.path());
    let bare: DecisionPayload = serde_json::from_value(json!({
        "pass": "DECIDE",
        "immutable_architecture": architecture(),
    }))
    .expect("payload");
    let saved = snapshot::save_snapshot(&store, "demo-article-01", bare).expect("freeze");

    assert!(saved.created);
    assert_eq!(
        saved.snapshot_id,
        format!("demo-article-01__{}", &saved.digest[..12])
    );
    assert!(saved.snapshot_path.exists());
    assert!(saved.canonical_path.exists());
    assert!(saved.digest_path.exists());

    let canonical_bytes = fs::read_to_string(&saved.canonical_path).expect("read canonical");
    assert_eq!(canonical::sha256_hex(canonical_bytes.as_bytes()), saved.digest);
    assert_eq!(
        fs::read_to_string(&saved.digest_path).expect("read digest"),
        format!("{}\n", saved.digest)
    );

    let verified = snapshot::load_verified(&store, &saved.snapshot_id).expect("verify");
    assert_eq!(verified.digest, saved.digest);
    assert_eq!(verified.payload.pass.as_deref(), Some("DECIDE"));
    let stamped = verified
        .payload
        .immutable_fingerprint
        .as_deref()
        .expect("fingerprint stamped at save");
    assert_eq!(stamped, canonical::immutable_fingerprint(&verified.value));
    assert!(
        verified
            .payload
            .meta
            .created_utc
            .as_deref()
            .expect("timestamp stamped at save")
            .ends_with('Z')
    );
}

#[test]
fn identical_resave_is_a_noop_and_content_drift_is_refused() {
    let tmp = tempdir().expect("tempdir");
    let store = store_at(tmp.path());
    let first = snapshot::save_snapshot(&store, "demo-article-01", decision_payload())
        .expect("first freeze");
    assert!(first.created);

    let again = snapshot::save_snapshot(&store, "demo-article-01", decision_payload())
        .expect("identical resave");
    assert!(!again.created);
    assert_eq!(again.snapshot_id, first.snapshot_id);
    assert_eq!(again.digest, first.digest);

    // a stored digest that disagrees with the recomputed one is a collision
    fs::write(&first.digest_path, format!("{}\n", "c0ffee".repeat(10) + "abcd"))
        .expect("corrupt digest");
    let err = snapshot::save_snapshot(&store, "demo-article-01", decision_payload())
        .expect_err("must refuse");
    match err {
        RatchetError::SnapshotInvalid(m) => {
            assert!(m.contains("already exists with different content"), "{}", m)
        }
        other => panic!("expected SnapshotInvalid, got {:?}", other),
    }
}

#[test]
fn tampering_with_frozen_bytes_is_detected() {
    let tmp = tempdir().expect("tempdir");
    let store = store_at(tmp.path());
    let saved =
        snapshot::save_snapshot(&store, "demo-article-01", decision_payload()).expect("freeze");

    let raw = fs::read_to_string(&saved.snapshot_path).expect("read snapshot");
    let mut value: JsonValue = serde_json::from_str(&raw).expect("snapshot JSON");
    value["immutable_architecture"]["node_registry"]["n1"]["title"] =
        json!("Edited after freeze");
    fs::write(
        &saved.snapshot_path,
        serde_json::to_string_pretty(&value).expect("serialize"),
    )
    .expect("write tampered");

    let err = snapshot::load_verified(&store, &saved.snapshot_id).expect_err("must detect");
    match err {
        RatchetError::SnapshotInvalid(m) => assert!(m.contains("HASH_MISMATCH"), "{}", m),
        other => panic!("expected SnapshotInvalid, got {:?}", other),
    }
}

#[test]
fn approval_markers_are_digest_keyed_and_idempotent() {
    let tmp = tempdir().expect("tempdir");
    let store = store_at(tmp.path());
    let saved =
        snapshot::save_snapshot(&store, "demo-article-01", decision_payload()).expect("freeze");

    assert!(!approval::is_approved(&store, &saved.digest));
    let outcome = approval::approve_snapshot(&store, &saved.snapshot_id).expect("approve");
    assert!(!outcome.already_approved);
    assert_eq!(outcome.digest, saved.digest);
    assert_eq!(outcome.marker_path, store.approval_path(&saved.digest));
    assert!(outcome.marker_path.exists());
    assert!(approval::is_approved(&store, &saved.digest));

    let again = approval::approve_snapshot(&store, &saved.snapshot_id).expect("re-approve");
    assert!(again.already_approved);
    assert_eq!(again.marker_path, outcome.marker_path);

    assert!(!approval::is_approved(&store, &"f".repeat(64)));
}

#[test]
fn run_ids_split_on_the_last_separator() {
    let id = RunId::parse("multi__part__0123456789ab", 12).expect("parse");
    assert_eq!(id.task_id, "multi__part");
    assert_eq!(id.digest_prefix, "0123456789ab");
    assert_eq!(id.to_string(), "multi__part__0123456789ab");

    assert!(RunId::parse("nodigestpart", 12).is_err());
    assert!(RunId::parse("task__0123", 12).is_err());
    assert!(RunId::parse("task__0123456789AB", 12).is_err());
    assert!(RunId::parse("__0123456789ab", 12).is_err());
}

#[test]
fn approvability_requires_complete_owner_coverage() {
    let full = json!({"immutable_architecture": architecture()});
    let summary = check_structure(&full).expect("approvable");
    assert_eq!(summary.node_count, 2);
    assert_eq!(summary.owners_covered, 2);
    assert_eq!(summary.hub_chain_len, 1);
    assert_eq!(summary.linking_matrix_rows, 1);

    let mut gap = full.clone();
    gap["immutable_architecture"]["owner_map"]
        .as_array_mut()
        .expect("owners")
        .pop();
    let err = check_structure(&gap).expect_err("must refuse uncovered node");
    match err {
        RatchetError::InputError(m) => assert!(m.contains("owner_map does not cover"), "{}", m),
        other => panic!("expected InputError, got {:?}", other),
    }

    let mut empty_registry = full.clone();
    empty_registry["immutable_architecture"]["node_registry"] = json!({});
    assert!(check_structure(&empty_registry).is_err());

    let mut no_hub = full.clone();
    no_hub["immutable_architecture"]
        .as_object_mut()
        .expect("arch")
        .remove("hub_chain");
    assert!(check_structure(&no_hub).is_err());
}

#[test]
fn node_registry_accepts_both_mapping_and_list_shapes() {
    let as_list = json!({"immutable_architecture": {
        "node_registry": [
            {"node_id": "n1", "title": "Overview"},
            {"node_id": "n2", "title": "Risks"}
        ],
        "owner_map": [
            {"node_id": "n1", "owner": "core"},
            {"node_id": "n2", "owner": "core"}
        ],
        "hub_chain": ["n1"],
        "linking_matrix_skeleton": [
            {"from_node_id": "n1", "to_node_id": "n2"}
        ]
    }});
    let summary = check_structure(&as_list).expect("list-shaped registry");
    assert_eq!(summary.node_count, 2);
}
