//! Canonical JSON and content fingerprinting.
//!
//! Everything content-addressed in the workflow (snapshot ids, approval
//! markers, prompt pins) hangs off the byte stability of this module: one
//! logical payload must always produce one byte sequence and one digest.

use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

use crate::core::error::RatchetError;

/// Serializes a JSON value to its canonical form: object keys sorted,
/// compact `,`/`:` separators, non-ASCII left as UTF-8. Independent of the
/// map implementation backing `serde_json::Value`.
pub fn canonical_json(value: &JsonValue) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &JsonValue, out: &mut String) {
    match value {
        JsonValue::Object(map) => {
            out.push('{');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key).unwrap());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
        JsonValue::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        leaf => out.push_str(&serde_json::to_string(leaf).unwrap()),
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Digest of the canonical form of a JSON value.
pub fn digest_json(value: &JsonValue) -> String {
    sha256_hex(canonical_json(value).as_bytes())
}

/// Normalizes text before fingerprinting: strips a UTF-8 BOM and folds CRLF
/// and bare CR line endings to LF. Keeps prompt fingerprints stable across
/// checkouts with different line-ending conventions.
pub fn canonical_text(text: &str) -> String {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    text.replace("\r\n", "\n").replace('\r', "\n")
}

pub fn fingerprint_file(path: &Path) -> Result<String, RatchetError> {
    let raw = fs::read_to_string(path)?;
    Ok(sha256_hex(canonical_text(&raw).as_bytes()))
}

/// Reads a stored digest: the first non-blank line of the file. An empty or
/// whitespace-only digest file is refused outright rather than treated as a
/// mismatched digest.
pub fn read_digest_file(path: &Path) -> Result<String, RatchetError> {
    let raw = fs::read_to_string(path)?;
    for line in raw.lines() {
        let line = line.trim();
        if !line.is_empty() {
            return Ok(line.to_string());
        }
    }
    Err(RatchetError::SnapshotInvalid(format!(
        "empty digest file: {}",
        path.display()
    )))
}

/// Digest of the frozen `immutable_architecture` sub-tree only. Distinct from
/// the whole-payload digest: the approval marker is keyed by the latter, this
/// one proves the frozen section specifically has not drifted.
pub fn immutable_fingerprint(payload: &JsonValue) -> String {
    let empty = JsonValue::Object(serde_json::Map::new());
    let sub = payload.get("immutable_architecture").unwrap_or(&empty);
    digest_json(sub)
}
