//! Append-only audit trail for state-changing commands.
//!
//! One JSONL line per event, ULID event ids, epoch-Z timestamps. The trail is
//! observability only: nothing in the lifecycle reads it back to make a
//! decision, so the classifier stays a pure function of the contract files.

use serde::{Deserialize, Serialize};
use std::env;
use std::fs::{self, OpenOptions};
use std::io::Write;

use crate::core::error::RatchetError;
use crate::core::store::StateStore;
use crate::core::time;

pub fn actor() -> String {
    env::var("RATCHET_ACTOR").unwrap_or_else(|_| "cli".to_string())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEvent {
    pub event_id: String,
    pub ts: String,
    pub actor: String,
    pub op: String,
    pub subject: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

pub fn log_event(
    store: &StateStore,
    op: &str,
    subject: &str,
    status: &str,
    detail: Option<String>,
) -> Result<(), RatchetError> {
    let event = WorkflowEvent {
        event_id: time::new_event_id(),
        ts: time::now_epoch_z(),
        actor: actor(),
        op: op.to_string(),
        subject: subject.to_string(),
        status: status.to_string(),
        detail,
    };
    fs::create_dir_all(store.state_dir())?;
    let mut f = OpenOptions::new()
        .create(true)
        .append(true)
        .open(store.events_file())?;
    writeln!(f, "{}", serde_json::to_string(&event).unwrap())?;
    Ok(())
}

/// Last `limit` events (all of them when `limit` is 0). Malformed lines are
/// skipped rather than fatal; the trail must never block a read-only view.
pub fn read_events(store: &StateStore, limit: usize) -> Result<Vec<WorkflowEvent>, RatchetError> {
    let path = store.events_file();
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = fs::read_to_string(&path)?;
    let mut events: Vec<WorkflowEvent> = raw
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| serde_json::from_str(l).ok())
        .collect();
    if limit > 0 && events.len() > limit {
        events = events.split_off(events.len() - limit);
    }
    Ok(events)
}
