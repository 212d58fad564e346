//! Seam to the generative provider.
//!
//! The workflow never talks to an LLM directly; it hands a request transcript
//! to a [`Bridge`] and gets free text back. The production implementation
//! shells out to whatever command `ratchet.toml` configures, using request and
//! response files so every exchange stays reproducible on disk. Tests swap in
//! deterministic stubs through the trait.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde_json::Value as JsonValue;

use crate::core::error::RatchetError;
use crate::core::store::StateStore;

/// Full prompt transcript handed to the provider.
#[derive(Debug, Clone)]
pub struct BridgeRequest {
    pub text: String,
}

/// What came back: the raw text plus whether the provider signalled that the
/// response was cut short.
#[derive(Debug, Clone)]
pub struct BridgeResponse {
    pub text: String,
    pub truncated: bool,
}

pub trait Bridge {
    fn generate(&self, request: &BridgeRequest) -> Result<BridgeResponse, RatchetError>;
}

/// Subprocess bridge: writes the request to `state/runtime/last_request.txt`,
/// runs the configured command with `--in`/`--out` file arguments, reads the
/// response back from `state/runtime/last_response.txt`. A
/// `last_response.truncated` sidecar next to the response file is the
/// truncation signal.
pub struct CommandBridge<'a> {
    store: &'a StateStore,
}

impl<'a> CommandBridge<'a> {
    pub fn new(store: &'a StateStore) -> Self {
        CommandBridge { store }
    }
}

fn truncation_sidecar(response_path: &Path) -> PathBuf {
    response_path.with_extension("truncated")
}

impl Bridge for CommandBridge<'_> {
    fn generate(&self, request: &BridgeRequest) -> Result<BridgeResponse, RatchetError> {
        let command = &self.store.config.bridge.command;
        let Some((program, args)) = command.split_first() else {
            return Err(RatchetError::BridgeError(
                "no bridge command configured (set [bridge] command in ratchet.toml)".to_string(),
            ));
        };

        fs::create_dir_all(self.store.runtime_dir())?;
        let request_path = self.store.request_path();
        let response_path = self.store.response_path();
        fs::write(&request_path, &request.text)?;

        // A stale response or sidecar from an earlier call must not be
        // mistaken for this call's output.
        let sidecar = truncation_sidecar(&response_path);
        for stale in [&response_path, &sidecar] {
            if stale.exists() {
                fs::remove_file(stale)?;
            }
        }

        let output = Command::new(program)
            .args(args)
            .arg("--in")
            .arg(&request_path)
            .arg("--out")
            .arg(&response_path)
            .current_dir(&self.store.root)
            .output()
            .map_err(|e| {
                RatchetError::BridgeError(format!("could not spawn '{}': {}", program, e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            let detail = if stderr.trim().is_empty() {
                stdout.trim().to_string()
            } else {
                stderr.trim().to_string()
            };
            return Err(RatchetError::BridgeError(format!(
                "'{}' exited with {}: {}",
                program,
                output
                    .status
                    .code()
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".to_string()),
                detail
            )));
        }

        if !response_path.exists() {
            return Err(RatchetError::BridgeError(format!(
                "bridge wrote no response file: {}",
                response_path.display()
            )));
        }

        Ok(BridgeResponse {
            text: fs::read_to_string(&response_path)?,
            truncated: sidecar.exists(),
        })
    }
}

/// Strict parse of a provider response: the trimmed text must be exactly one
/// JSON object, no surrounding prose, no code fences.
pub fn extract_json_object(text: &str) -> Result<JsonValue, RatchetError> {
    let trimmed = text.trim();
    if !(trimmed.starts_with('{') && trimmed.ends_with('}')) {
        return Err(RatchetError::OutputNotJson(
            "response is not a bare JSON object".to_string(),
        ));
    }
    serde_json::from_str(trimmed)
        .map_err(|e| RatchetError::OutputNotJson(format!("invalid JSON: {}", e)))
}

/// Parse a response, honoring the truncation signal. A truncated response is
/// fatal unless the text independently proves itself complete: well-formed
/// JSON carrying `expected_key` at the top level.
pub fn parse_object_response(
    response: &BridgeResponse,
    expected_key: &str,
) -> Result<JsonValue, RatchetError> {
    if !response.truncated {
        return extract_json_object(&response.text);
    }
    match extract_json_object(&response.text) {
        Ok(value) if value.get(expected_key).is_some() => Ok(value),
        Ok(_) => Err(RatchetError::OutputTruncated(format!(
            "provider signalled truncation and top-level key '{}' is absent",
            expected_key
        ))),
        Err(_) => Err(RatchetError::OutputTruncated(
            "provider signalled truncation and the text does not parse as a complete JSON object"
                .to_string(),
        )),
    }
}
