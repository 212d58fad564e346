use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::core::report::Level;

/// Every failure in the workflow maps to exactly one severity level and one
/// canonical error code. FAIL means the operator can fix the inputs and retry;
/// BLOCKER means a lifecycle or immutability invariant was violated and
/// retrying without intervention is meaningless.
#[derive(Error, Debug)]
pub enum RatchetError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("Invalid input: {0}")]
    InputError(String),
    #[error("Bridge failed: {0}")]
    BridgeError(String),
    #[error("Output is not a pure JSON object: {0}")]
    OutputNotJson(String),
    #[error("Output truncated by provider: {0}")]
    OutputTruncated(String),
    #[error("Deliverables check failed: {0}")]
    DeliverablesError(String),
    #[error("{} deliverable path(s) missing", .0.len())]
    MissingDeliverables(Vec<PathBuf>),
    #[error("Snapshot invalid: {0}")]
    SnapshotInvalid(String),
    #[error("Approval missing: {0}")]
    ApprovalMissing(String),
    #[error("Fingerprint missing: {0}")]
    FingerprintMissing(String),
    #[error("Fingerprint mismatch: {0}")]
    FingerprintMismatch(String),
    #[error("Lifecycle violation: {0}")]
    LifecycleViolation(String),
    #[error("Merge state invalid: {0}")]
    MergeStateInvalid(String),
}

impl RatchetError {
    pub fn severity(&self) -> Level {
        match self {
            RatchetError::IoError(_)
            | RatchetError::InputError(_)
            | RatchetError::BridgeError(_)
            | RatchetError::OutputNotJson(_)
            | RatchetError::OutputTruncated(_)
            | RatchetError::DeliverablesError(_)
            | RatchetError::MissingDeliverables(_) => Level::Fail,
            RatchetError::SnapshotInvalid(_)
            | RatchetError::ApprovalMissing(_)
            | RatchetError::FingerprintMissing(_)
            | RatchetError::FingerprintMismatch(_)
            | RatchetError::LifecycleViolation(_)
            | RatchetError::MergeStateInvalid(_) => Level::Blocker,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            RatchetError::IoError(_) => "IO_ERROR",
            RatchetError::InputError(_) => "INPUT_INVALID",
            RatchetError::BridgeError(_) => "BRIDGE_FAILED",
            RatchetError::OutputNotJson(_) => "OUTPUT_NOT_JSON",
            RatchetError::OutputTruncated(_) => "OUTPUT_TRUNCATED",
            RatchetError::DeliverablesError(_) | RatchetError::MissingDeliverables(_) => {
                "DELIVERABLES_CHECK_FAILED"
            }
            RatchetError::SnapshotInvalid(_) => "SNAPSHOT_INVALID",
            RatchetError::ApprovalMissing(_) => "APPROVAL_MISSING",
            RatchetError::FingerprintMissing(_) => "FINGERPRINT_MISSING",
            RatchetError::FingerprintMismatch(_) => "FINGERPRINT_MISMATCH",
            RatchetError::LifecycleViolation(_) => "LIFECYCLE_VIOLATION",
            RatchetError::MergeStateInvalid(_) => "MERGE_STATE_INVALID",
        }
    }
}
