//! Core modules for ratchet's workflow control plane.
//!
//! Everything that defines the lifecycle lives here: content addressing,
//! snapshot persistence, the approval gate, the pre-flight checks, merge,
//! and the post-merge consistency checks.

pub mod approval;
pub mod assets;
pub mod audit;
pub mod canonical;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod merge;
pub mod postcheck;
pub mod preflight;
pub mod report;
pub mod scaffold;
pub mod snapshot;
pub mod store;
pub mod time;
