//! Approval gate: existence-only marker files keyed by snapshot digest.
//!
//! The marker's content is provenance trivia; the contract is its existence.
//! Approving an already-approved digest is an idempotent success, which keeps
//! the human step safe to repeat.

use std::fs;
use std::path::PathBuf;

use crate::core::audit;
use crate::core::error::RatchetError;
use crate::core::snapshot;
use crate::core::store::StateStore;
use crate::core::time;

#[derive(Debug, Clone)]
pub struct ApprovalOutcome {
    pub snapshot_id: String,
    pub digest: String,
    pub marker_path: PathBuf,
    pub already_approved: bool,
}

pub fn is_approved(store: &StateStore, digest: &str) -> bool {
    store.approval_path(digest).exists()
}

pub fn approve_digest(store: &StateStore, digest: &str) -> Result<(PathBuf, bool), RatchetError> {
    let path = store.approval_path(digest);
    if path.exists() {
        return Ok((path, false));
    }
    fs::create_dir_all(store.approvals_dir())?;
    fs::write(
        &path,
        format!("approved {} actor={}\n", time::now_epoch_z(), audit::actor()),
    )?;
    Ok((path, true))
}

/// The surface behind `ratchet approve`: a snapshot is verified before its
/// digest can be marked, so a tampered snapshot can never become approved.
pub fn approve_snapshot(
    store: &StateStore,
    snapshot_id: &str,
) -> Result<ApprovalOutcome, RatchetError> {
    let verified = snapshot::load_verified(store, snapshot_id)?;
    let (marker_path, created) = approve_digest(store, &verified.digest)?;
    Ok(ApprovalOutcome {
        snapshot_id: snapshot_id.to_string(),
        digest: verified.digest,
        marker_path,
        already_approved: !created,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::WorkspaceConfig;

    #[test]
    fn approving_twice_is_a_noop_success() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = StateStore::new(dir.path(), WorkspaceConfig::default());
        let digest = "ab".repeat(32);
        assert!(!is_approved(&store, &digest));

        let (path, created) = approve_digest(&store, &digest).expect("approve");
        assert!(created);
        assert!(path.exists());
        assert!(is_approved(&store, &digest));

        let first_bytes = fs::read(&path).expect("read");
        let (_, created_again) = approve_digest(&store, &digest).expect("re-approve");
        assert!(!created_again);
        assert_eq!(fs::read(&path).expect("read"), first_bytes);
    }
}
