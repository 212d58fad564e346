use ratchet::core::config::WorkspaceConfig;
use ratchet::core::merge::merge_runs;
use ratchet::core::postcheck::run_postcheck;
use ratchet::core::report::Reporter;
use ratchet::core::snapshot::{self, DecisionPayload};
use ratchet::core::store::{Stage, StateStore};
use serde_json::{Value as JsonValue, json};
use std::fs;
use tempfile::tempdir;

fn architecture() -> JsonValue {
    json!({
        "node_registry": {"n1": {"title": "Overview"}, "n2": {"title": "Risks"}},
        "owner_map": [
            {"node_id": "n1", "owner": "core"},
            {"node_id": "n2", "owner": "core"}
        ],
        "hub_chain": ["n1"],
        "linking_matrix_skeleton": [{"from_node_id": "n1", "to_node_id": "n2"}]
    })
}

fn pretty_json(value: JsonValue) -> String {
    serde_json::to_string_pretty(&value).expect("serialize")
}

/// A fully merged run: snapshot, both stage outputs, merge record and pointer.
fn merged_run(store: &StateStore) -> String {
    let payload: DecisionPayload = serde_json::from_value(json!({
        "pass": "DECIDE",
        "immutable_architecture": architecture(),
    }))
    .expect("payload");
    let saved = snapshot::save_snapshot(store, "demo-article-01", payload).expect("freeze");
    let id = saved.snapshot_id;
    let fingerprint = snapshot::load_verified(store, &id)
        .expect("verify")
        .payload
        .immutable_fingerprint
        .expect("stamped");

    for stage in Stage::ALL {
        fs::create_dir_all(store.stage_dir(&id, stage)).expect("stage dir");
        fs::write(
            store.execution_result_path(&id, stage),
            pretty_json(json!({"immutable_fingerprint": fingerprint})),
        )
        .expect("envelope");
        for name in stage.deliverables() {
            let body = if *name == "anchors" {
                json!([{"from_node_id": "n1", "to_node_id": "n2"}])
            } else {
                json!({"n1": {}, "n2": {}})
            };
            fs::write(store.deliverable_path(&id, stage, name), pretty_json(body))
                .expect("deliverable");
        }
    }
    merge_runs(store, &id, &id).expect("merge");
    id
}

fn codes(r: &Reporter) -> Vec<&str> {
    r.findings.iter().map(|f| f.code.as_str()).collect()
}

#[test]
fn clean_merge_passes_with_a_single_ok_finding() {
    let tmp = tempdir().expect("tempdir");
    let store = StateStore::new(tmp.path(), WorkspaceConfig::default());
    let id = merged_run(&store);

    let r = run_postcheck(&store, &id);
    assert_eq!(r.exit_code(), 0);
    assert_eq!(codes(&r), vec!["OK"]);
    assert!(r.findings[0].message.contains(&id));
}

#[test]
fn premerge_check_is_a_lifecycle_blocker() {
    let tmp = tempdir().expect("tempdir");
    let store = StateStore::new(tmp.path(), WorkspaceConfig::default());

    let r = run_postcheck(&store, "demo-article-01__bbbbbbbbbbbb");
    assert_eq!(r.exit_code(), 2);
    let c = codes(&r);
    assert!(c.contains(&"MERGE_STATE_INVALID"), "codes: {:?}", c);
    assert!(c.contains(&"LIFECYCLE_VIOLATION"), "codes: {:?}", c);
    assert!(
        r.findings
            .iter()
            .any(|f| f.message.contains("POST-CHECK requires MERGE"))
    );
}

#[test]
fn coverage_gaps_and_inventions_are_reported_per_deliverable() {
    let tmp = tempdir().expect("tempdir");
    let store = StateStore::new(tmp.path(), WorkspaceConfig::default());
    let id = merged_run(&store);

    // n2 dropped from keywords, n9 invented in semantic_enrichment
    fs::write(
        store.deliverable_path(&id, Stage::Core, "keywords"),
        pretty_json(json!({"n1": {}})),
    )
    .expect("rewrite keywords");
    fs::write(
        store.deliverable_path(&id, Stage::Core, "semantic_enrichment"),
        pretty_json(json!({"n1": {}, "n2": {}, "n9": {}})),
    )
    .expect("rewrite semantic_enrichment");

    let r = run_postcheck(&store, &id);
    assert_eq!(r.exit_code(), 1);

    let coverage: Vec<_> = r
        .findings
        .iter()
        .filter(|f| f.code == "NODE_COVERAGE_INCOMPLETE")
        .collect();
    assert_eq!(coverage.len(), 2, "findings: {:?}", r.findings);

    let keywords = coverage
        .iter()
        .find(|f| f.message.starts_with("keywords"))
        .expect("keywords finding");
    let evidence = keywords.evidence.as_ref().expect("evidence");
    assert_eq!(evidence["missing"], 1);
    assert_eq!(evidence["extra"], 0);
    assert_eq!(evidence["missing_sample"], json!(["n2"]));

    let semantic = coverage
        .iter()
        .find(|f| f.message.starts_with("semantic_enrichment"))
        .expect("semantic finding");
    let evidence = semantic.evidence.as_ref().expect("evidence");
    assert_eq!(evidence["missing"], 0);
    assert_eq!(evidence["extra"], 1);
    assert_eq!(evidence["extra_sample"], json!(["n9"]));
}

#[test]
fn anchor_rows_must_reference_registered_nodes() {
    let tmp = tempdir().expect("tempdir");
    let store = StateStore::new(tmp.path(), WorkspaceConfig::default());
    let id = merged_run(&store);

    fs::write(
        store.deliverable_path(&id, Stage::Anchors, "anchors"),
        pretty_json(json!([
            {"from_node_id": "n1", "to_node_id": "n2"},
            {"from_node_id": "n1", "to_node_id": "ghost"}
        ])),
    )
    .expect("rewrite anchors");

    let r = run_postcheck(&store, &id);
    assert_eq!(r.exit_code(), 1);
    let finding = r
        .findings
        .iter()
        .find(|f| f.code == "ANCHORS_INVALID")
        .expect("anchors finding");
    let evidence = finding.evidence.as_ref().expect("evidence");
    assert_eq!(evidence["bad_rows"], 1);
    assert_eq!(evidence["total_rows"], 2);
}

#[test]
fn core_deliverables_must_be_mappings() {
    let tmp = tempdir().expect("tempdir");
    let store = StateStore::new(tmp.path(), WorkspaceConfig::default());
    let id = merged_run(&store);

    fs::write(
        store.deliverable_path(&id, Stage::Core, "keywords"),
        pretty_json(json!(["n1", "n2"])),
    )
    .expect("rewrite keywords");

    let r = run_postcheck(&store, &id);
    assert_eq!(r.exit_code(), 1);
    assert!(
        r.findings
            .iter()
            .any(|f| f.code == "DELIVERABLES_CHECK_FAILED"
                && f.message.contains("must be a mapping keyed by node id"))
    );
}

#[test]
fn final_artifacts_is_optional_but_must_not_be_hollow() {
    let tmp = tempdir().expect("tempdir");
    let store = StateStore::new(tmp.path(), WorkspaceConfig::default());
    let id = merged_run(&store);

    // absent: fine
    assert_eq!(run_postcheck(&store, &id).exit_code(), 0);

    let path = store.final_artifacts_path(&id);
    fs::write(&path, pretty_json(json!({"main_summary_table": "   "}))).expect("hollow");
    let r = run_postcheck(&store, &id);
    assert_eq!(r.exit_code(), 1);
    assert!(
        r.findings
            .iter()
            .any(|f| f.message.contains("main_summary_table"))
    );

    fs::write(
        &path,
        pretty_json(json!({"main_summary_table": "| node | title |\n|---|---|\n| n1 | Overview |"})),
    )
    .expect("filled");
    assert_eq!(run_postcheck(&store, &id).exit_code(), 0);
}

#[test]
fn all_defects_surface_in_one_run() {
    let tmp = tempdir().expect("tempdir");
    let store = StateStore::new(tmp.path(), WorkspaceConfig::default());
    let id = merged_run(&store);

    fs::write(
        store.deliverable_path(&id, Stage::Core, "keywords"),
        pretty_json(json!({"n1": {}})),
    )
    .expect("break keywords");
    fs::write(
        store.deliverable_path(&id, Stage::Anchors, "anchors"),
        pretty_json(json!([{"from_node_id": "ghost", "to_node_id": "n1"}])),
    )
    .expect("break anchors");

    let r = run_postcheck(&store, &id);
    assert_eq!(r.exit_code(), 1);
    let c = codes(&r);
    assert!(c.contains(&"NODE_COVERAGE_INCOMPLETE"), "codes: {:?}", c);
    assert!(c.contains(&"ANCHORS_INVALID"), "codes: {:?}", c);
}

#[test]
fn record_pointing_at_a_vanished_snapshot_is_a_blocker() {
    let tmp = tempdir().expect("tempdir");
    let store = StateStore::new(tmp.path(), WorkspaceConfig::default());
    let id = merged_run(&store);

    let canonical = store.canonical_path(&id);
    fs::write(&canonical, "not json {").expect("corrupt canonical");
    let r = run_postcheck(&store, &id);
    assert_eq!(r.exit_code(), 2);
    assert!(codes(&r).contains(&"SNAPSHOT_INVALID"));

    fs::remove_file(&canonical).expect("remove canonical");
    let r = run_postcheck(&store, &id);
    assert_eq!(r.exit_code(), 1);
    assert!(codes(&r).contains(&"IO_ERROR"));
}
