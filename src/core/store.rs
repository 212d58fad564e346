//! Typed layout of the persisted workflow state.
//!
//! The filesystem is the database. Three append-only collections (snapshots,
//! approvals, merges) plus per-run outputs make up the whole contract, and
//! this module is the single authority for their paths: nothing else in the
//! crate joins state path segments by hand.

use serde_json::{Value as JsonValue, json};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::core::config::WorkspaceConfig;
use crate::core::error::RatchetError;
use crate::core::report;

pub const SNAPSHOT_SUFFIX: &str = ".snapshot.json";
pub const CANONICAL_SUFFIX: &str = ".canonical.json";
pub const DIGEST_SUFFIX: &str = ".sha256";
pub const APPROVED_SUFFIX: &str = ".approved";
pub const POINTER_SUFFIX: &str = ".merge_id";
pub const EXECUTION_RESULT_FILE: &str = "execution_result.json";
pub const EXECUTION_RAW_FILE: &str = "execution_result.raw.txt";
pub const FINAL_ARTIFACTS_FILE: &str = "final_artifacts.json";
pub const EVENTS_FILE: &str = "workflow.events.jsonl";

/// Stage of the second pass. Each stage owns one output directory per run and
/// a fixed set of deliverable documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Core,
    Anchors,
}

impl Stage {
    pub const ALL: [Stage; 2] = [Stage::Core, Stage::Anchors];

    pub fn dir_name(&self) -> &'static str {
        match self {
            Stage::Core => "core",
            Stage::Anchors => "anchors",
        }
    }

    /// Deliverable document names (each persisted as `<name>.json`).
    pub fn deliverables(&self) -> &'static [&'static str] {
        match self {
            Stage::Core => &["semantic_enrichment", "keywords", "patient_questions"],
            Stage::Anchors => &["anchors"],
        }
    }

    /// Pinned prompt file driving this stage, relative to the prompts dir.
    pub fn prompt_file(&self) -> &'static str {
        match self {
            Stage::Core => "pass_2_execute_core.md",
            Stage::Anchors => "pass_2_execute_anchors.md",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.dir_name())
    }
}

impl FromStr for Stage {
    type Err = RatchetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "core" => Ok(Stage::Core),
            "anchors" => Ok(Stage::Anchors),
            other => Err(RatchetError::InputError(format!(
                "unknown stage '{}' (valid: core, anchors)",
                other
            ))),
        }
    }
}

/// Handle to one workspace's persisted state.
#[derive(Debug, Clone)]
pub struct StateStore {
    /// Absolute path to the workspace root (where `ratchet.toml` lives).
    pub root: PathBuf,
    pub config: WorkspaceConfig,
}

impl StateStore {
    pub fn new(root: impl Into<PathBuf>, config: WorkspaceConfig) -> Self {
        StateStore {
            root: root.into(),
            config,
        }
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.join(&self.config.paths.state_dir)
    }

    pub fn snapshots_dir(&self) -> PathBuf {
        self.state_dir().join("snapshots")
    }

    pub fn approvals_dir(&self) -> PathBuf {
        self.state_dir().join("approvals")
    }

    pub fn merges_dir(&self) -> PathBuf {
        self.state_dir().join("merges")
    }

    pub fn merge_pointers_dir(&self) -> PathBuf {
        self.merges_dir().join("by_run")
    }

    pub fn runtime_dir(&self) -> PathBuf {
        self.state_dir().join("runtime")
    }

    pub fn outputs_dir(&self) -> PathBuf {
        self.root.join(&self.config.paths.outputs_dir)
    }

    pub fn prompts_dir(&self) -> PathBuf {
        self.root.join(&self.config.paths.prompts_dir)
    }

    pub fn task_file(&self) -> PathBuf {
        self.root.join(&self.config.paths.task_file)
    }

    pub fn schema_file(&self) -> PathBuf {
        self.root.join(&self.config.paths.schema_file)
    }

    pub fn events_file(&self) -> PathBuf {
        self.state_dir().join(EVENTS_FILE)
    }

    pub fn snapshot_path(&self, snapshot_id: &str) -> PathBuf {
        self.snapshots_dir()
            .join(format!("{}{}", snapshot_id, SNAPSHOT_SUFFIX))
    }

    pub fn canonical_path(&self, snapshot_id: &str) -> PathBuf {
        self.snapshots_dir()
            .join(format!("{}{}", snapshot_id, CANONICAL_SUFFIX))
    }

    pub fn digest_path(&self, snapshot_id: &str) -> PathBuf {
        self.snapshots_dir()
            .join(format!("{}{}", snapshot_id, DIGEST_SUFFIX))
    }

    pub fn approval_path(&self, digest: &str) -> PathBuf {
        self.approvals_dir()
            .join(format!("{}{}", digest, APPROVED_SUFFIX))
    }

    pub fn merge_record_path(&self, merge_id: &str) -> PathBuf {
        self.merges_dir().join(format!("{}.json", merge_id))
    }

    pub fn merge_pointer_path(&self, run_id: &str) -> PathBuf {
        self.merge_pointers_dir()
            .join(format!("{}{}", run_id, POINTER_SUFFIX))
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.outputs_dir().join(run_id)
    }

    pub fn stage_dir(&self, run_id: &str, stage: Stage) -> PathBuf {
        self.run_dir(run_id).join(stage.dir_name())
    }

    pub fn execution_result_path(&self, run_id: &str, stage: Stage) -> PathBuf {
        self.stage_dir(run_id, stage).join(EXECUTION_RESULT_FILE)
    }

    pub fn execution_raw_path(&self, run_id: &str, stage: Stage) -> PathBuf {
        self.stage_dir(run_id, stage).join(EXECUTION_RAW_FILE)
    }

    pub fn deliverable_path(&self, run_id: &str, stage: Stage, name: &str) -> PathBuf {
        self.stage_dir(run_id, stage).join(format!("{}.json", name))
    }

    pub fn final_artifacts_path(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join(FINAL_ARTIFACTS_FILE)
    }

    pub fn pass1_raw_path(&self) -> PathBuf {
        self.outputs_dir().join("pass_1_raw.txt")
    }

    pub fn request_path(&self) -> PathBuf {
        self.runtime_dir().join("last_request.txt")
    }

    pub fn response_path(&self) -> PathBuf {
        self.runtime_dir().join("last_response.txt")
    }

    pub fn prompt_path(&self, name: &str) -> PathBuf {
        self.prompts_dir().join(name)
    }

    /// Creates the state directory skeleton. Safe to call repeatedly.
    pub fn ensure_layout(&self) -> Result<(), RatchetError> {
        for dir in [
            self.snapshots_dir(),
            self.approvals_dir(),
            self.merge_pointers_dir(),
            self.runtime_dir(),
            self.outputs_dir(),
        ] {
            fs::create_dir_all(&dir)?;
        }
        Ok(())
    }

    /// Resolves a path to absolute form against the workspace root without
    /// touching the filesystem.
    pub fn absolutize(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

/// Machine-readable description of the persisted contract, in the same shape
/// other subsystems expose via `schema()`.
pub fn schema() -> JsonValue {
    json!({
        "subsystem": "state",
        "version": "1",
        "collections": {
            "snapshots": {
                "path": "state/snapshots/",
                "files": ["<id>.snapshot.json", "<id>.canonical.json", "<id>.sha256"],
                "write_discipline": "content-addressed triplet, digest file written last"
            },
            "approvals": {
                "path": "state/approvals/",
                "files": ["<digest>.approved"],
                "write_discipline": "existence-only marker, idempotent create"
            },
            "merges": {
                "path": "state/merges/",
                "files": ["<merge_id>.json", "by_run/<run_id>.merge_id"],
                "write_discipline": "terminal, record before pointer, never overwritten"
            }
        },
        "outputs": {
            "path": "outputs/<run_id>/<stage>/",
            "stages": {
                "core": Stage::Core.deliverables(),
                "anchors": Stage::Anchors.deliverables()
            },
            "envelope": EXECUTION_RESULT_FILE,
            "raw": EXECUTION_RAW_FILE
        },
        "audit": {"path": format!("state/{}", EVENTS_FILE)},
        "error_codes": report::ERROR_CODES,
        "exit_codes": {"PASS": 0, "FAIL": 1, "BLOCKER": 2}
    })
}
