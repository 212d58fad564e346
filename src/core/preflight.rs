//! The execution pre-flight gate.
//!
//! Five checks, in a fixed order, each a function returning ok or a specific
//! typed failure. The first failure aborts the gate; no LLM call is issued
//! unless all five pass. None of these failures are transient: each one means
//! the lifecycle or the frozen contract was violated, so the gate reports and
//! stops rather than retries.

use serde_json::Value as JsonValue;
use std::path::Path;

use crate::core::canonical;
use crate::core::error::RatchetError;
use crate::core::lifecycle;
use crate::core::snapshot::{self, DecisionPayload, VerifiedSnapshot};
use crate::core::store::StateStore;

/// Everything a stage execution is allowed to know about its snapshot once
/// the gate has passed.
#[derive(Debug, Clone)]
pub struct ClearedRun {
    pub snapshot_id: String,
    pub payload: DecisionPayload,
    pub value: JsonValue,
    pub digest: String,
    pub immutable_fingerprint: String,
}

/// Runs the gate. Check order is part of the contract:
/// 1. snapshot triplet exists and the digest verifies
/// 2. the run has not been merged
/// 3. the digest carries an approval marker
/// 4. the recorded immutable-architecture digest matches recomputation
/// 5. every pinned prompt fingerprint is recorded and matches disk
pub fn preflight(store: &StateStore, snapshot_id: &str) -> Result<ClearedRun, RatchetError> {
    let verified = check_snapshot_integrity(store, snapshot_id)?;
    check_not_merged(store, snapshot_id)?;
    check_approved(store, &verified.digest)?;
    let immutable_fingerprint = check_immutable_fingerprint(&verified)?;
    check_prompt_pins(store, &verified)?;
    Ok(ClearedRun {
        snapshot_id: snapshot_id.to_string(),
        payload: verified.payload,
        value: verified.value,
        digest: verified.digest,
        immutable_fingerprint,
    })
}

/// Check 1. At the gate a missing or unreadable snapshot is not an input
/// problem, it is a broken contract, so every verification failure surfaces
/// as SNAPSHOT_INVALID.
fn check_snapshot_integrity(
    store: &StateStore,
    snapshot_id: &str,
) -> Result<VerifiedSnapshot, RatchetError> {
    snapshot::load_verified(store, snapshot_id).map_err(|e| match e {
        RatchetError::SnapshotInvalid(m) => RatchetError::SnapshotInvalid(m),
        other => RatchetError::SnapshotInvalid(other.to_string()),
    })
}

/// Check 2.
fn check_not_merged(store: &StateStore, snapshot_id: &str) -> Result<(), RatchetError> {
    lifecycle::require_not_merged(store, snapshot_id)
}

/// Check 3.
fn check_approved(store: &StateStore, digest: &str) -> Result<(), RatchetError> {
    let marker = store.approval_path(digest);
    if !marker.exists() {
        return Err(RatchetError::ApprovalMissing(format!(
            "approval marker not found: {}",
            marker.display()
        )));
    }
    Ok(())
}

/// Check 4. A recorded-but-wrong digest and a missing record are different
/// defects with different codes.
fn check_immutable_fingerprint(verified: &VerifiedSnapshot) -> Result<String, RatchetError> {
    let recorded = verified
        .payload
        .immutable_fingerprint
        .as_deref()
        .ok_or_else(|| {
            RatchetError::FingerprintMissing(
                "snapshot records no immutable_fingerprint".to_string(),
            )
        })?;
    let actual = canonical::immutable_fingerprint(&verified.value);
    if recorded != actual {
        return Err(RatchetError::FingerprintMismatch(format!(
            "immutable_architecture drifted: recorded={} actual={}",
            recorded, actual
        )));
    }
    Ok(actual)
}

/// Check 5. Iterates the configured pins in order; a missing recorded key is
/// FINGERPRINT_MISSING, while a pin that cannot be satisfied on disk (file
/// gone or content drifted) is FINGERPRINT_MISMATCH.
fn check_prompt_pins(store: &StateStore, verified: &VerifiedSnapshot) -> Result<(), RatchetError> {
    for name in &store.config.snapshot.pinned_prompts {
        let stem = Path::new(name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(name.as_str());
        let recorded = verified.payload.prompt_fingerprints.get(stem).ok_or_else(|| {
            RatchetError::FingerprintMissing(format!(
                "snapshot records no fingerprint for prompt '{}'",
                stem
            ))
        })?;
        let path = store.prompt_path(name);
        if !path.exists() {
            return Err(RatchetError::FingerprintMismatch(format!(
                "pinned prompt file not found: {}",
                path.display()
            )));
        }
        let actual = canonical::fingerprint_file(&path)?;
        if *recorded != actual {
            return Err(RatchetError::FingerprintMismatch(format!(
                "prompt '{}' drifted: recorded={} actual={}",
                stem, recorded, actual
            )));
        }
    }
    Ok(())
}
