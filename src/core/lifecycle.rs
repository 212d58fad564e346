//! Lifecycle classification.
//!
//! The phase of a snapshot is derived purely from which contract files exist
//! at the moment of asking. Nothing is stored, so the classifier can never
//! disagree with the state on disk, and because the system only ever adds
//! files, classification is monotonic: a phase never moves backwards.

use serde::Serialize;
use std::fmt;

use crate::core::canonical;
use crate::core::error::RatchetError;
use crate::core::snapshot::RunId;
use crate::core::store::{Stage, StateStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecyclePhase {
    NoSnapshot,
    SnapshotPresent,
    Approved,
    ExecutedCore,
    ExecutedAnchors,
    ExecutedBoth,
    Merged,
}

impl LifecyclePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecyclePhase::NoSnapshot => "NO_SNAPSHOT",
            LifecyclePhase::SnapshotPresent => "SNAPSHOT_PRESENT",
            LifecyclePhase::Approved => "APPROVED",
            LifecyclePhase::ExecutedCore => "EXECUTED_CORE",
            LifecyclePhase::ExecutedAnchors => "EXECUTED_ANCHORS",
            LifecyclePhase::ExecutedBoth => "EXECUTED_BOTH",
            LifecyclePhase::Merged => "MERGED",
        }
    }
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The file facts a phase was derived from, kept alongside the phase so
/// `status` can show its work.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseReport {
    pub snapshot_id: String,
    pub phase: LifecyclePhase,
    pub snapshot_file: bool,
    pub digest_file: bool,
    pub approved: bool,
    pub core_executed: bool,
    pub anchors_executed: bool,
    pub merged: bool,
}

/// Derives the phase for a snapshot id. Precedence: a missing snapshot beats
/// everything, then the merge pointer dominates, then stage output, then
/// approval. The merge id is parsed out of the snapshot id itself; the
/// classifier consults no input files.
pub fn inspect(store: &StateStore, snapshot_id: &str) -> Result<PhaseReport, RatchetError> {
    let snapshot_file = store.snapshot_path(snapshot_id).exists();
    let digest_path = store.digest_path(snapshot_id);
    let digest_file = digest_path.exists();

    let approved = if digest_file {
        match canonical::read_digest_file(&digest_path) {
            Ok(digest) => store.approval_path(&digest).exists(),
            // unreadable digest cannot resolve to a marker
            Err(_) => false,
        }
    } else {
        false
    };

    let merged = store.merge_pointer_path(snapshot_id).exists();
    let core_executed = store.stage_dir(snapshot_id, Stage::Core).exists();
    let anchors_executed = store.stage_dir(snapshot_id, Stage::Anchors).exists();

    let phase = if !snapshot_file {
        LifecyclePhase::NoSnapshot
    } else if merged {
        LifecyclePhase::Merged
    } else if core_executed && anchors_executed {
        LifecyclePhase::ExecutedBoth
    } else if anchors_executed {
        LifecyclePhase::ExecutedAnchors
    } else if core_executed {
        LifecyclePhase::ExecutedCore
    } else if approved {
        LifecyclePhase::Approved
    } else {
        LifecyclePhase::SnapshotPresent
    };

    Ok(PhaseReport {
        snapshot_id: snapshot_id.to_string(),
        phase,
        snapshot_file,
        digest_file,
        approved,
        core_executed,
        anchors_executed,
        merged,
    })
}

pub fn classify(store: &StateStore, snapshot_id: &str) -> Result<LifecyclePhase, RatchetError> {
    Ok(inspect(store, snapshot_id)?.phase)
}

/// Hard stop used by every mutating phase-two path: once the merge pointer
/// exists the run is terminal.
pub fn require_not_merged(store: &StateStore, snapshot_id: &str) -> Result<(), RatchetError> {
    let run = RunId::parse(snapshot_id, store.config.snapshot.digest_prefix_len)?;
    if store.merge_pointer_path(snapshot_id).exists() {
        return Err(RatchetError::LifecycleViolation(format!(
            "EXECUTE forbidden after MERGE (merge_id={})",
            run
        )));
    }
    Ok(())
}
