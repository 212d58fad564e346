//! Orchestrated operations over the core state machine.
//!
//! Everything here composes core primitives into the user-facing workflow:
//! phase one (decide), the gated phase two (execute), and the read-only views.
//! The generative provider is reached only through the [`bridge::Bridge`]
//! seam, never directly.

pub mod bridge;
pub mod decide;
pub mod execute;
pub mod status;

use serde_json::Value as JsonValue;
use std::fs;
use std::path::Path;

use crate::core::error::RatchetError;

pub(crate) fn read_text(path: &Path) -> Result<String, RatchetError> {
    if !path.exists() {
        return Err(RatchetError::InputError(format!(
            "file not found: {}",
            path.display()
        )));
    }
    Ok(fs::read_to_string(path)?)
}

pub(crate) fn read_json(path: &Path) -> Result<JsonValue, RatchetError> {
    let raw = read_text(path)?;
    serde_json::from_str(&raw).map_err(|e| {
        RatchetError::InputError(format!("malformed JSON in {}: {}", path.display(), e))
    })
}
