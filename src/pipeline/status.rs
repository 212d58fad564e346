//! Read-only views: lifecycle status and the audit trail.
//!
//! Both render existing state without mutating anything, so they always exit
//! zero when the state is readable; a surprising phase is a fact to report,
//! not an error to raise.

use clap::Parser;

use crate::core::audit;
use crate::core::error::RatchetError;
use crate::core::lifecycle::{self, LifecyclePhase};
use crate::core::report::{self, Level};
use crate::core::store::StateStore;

#[derive(Parser, Debug)]
pub struct StatusCli {
    /// Snapshot id to classify
    #[clap(long)]
    pub snapshot: String,
    /// Output format: 'text' or 'json'
    #[clap(long, default_value = "text")]
    pub format: String,
}

#[derive(Parser, Debug)]
pub struct LogCli {
    /// Show only the last N events (0 = all)
    #[clap(long, default_value_t = 20)]
    pub limit: usize,
    /// Output format: 'text' or 'json'
    #[clap(long, default_value = "text")]
    pub format: String,
}

fn yes_no(v: bool) -> &'static str {
    if v { "yes" } else { "no" }
}

fn next_step(phase: LifecyclePhase, snapshot_id: &str) -> String {
    match phase {
        LifecyclePhase::NoSnapshot => "ratchet decide".to_string(),
        LifecyclePhase::SnapshotPresent => {
            format!("ratchet verify --snapshot {}", snapshot_id)
        }
        LifecyclePhase::Approved => {
            format!("ratchet execute --snapshot {} --stage core", snapshot_id)
        }
        LifecyclePhase::ExecutedCore => {
            format!("ratchet execute --snapshot {} --stage anchors", snapshot_id)
        }
        LifecyclePhase::ExecutedAnchors => {
            format!("ratchet execute --snapshot {} --stage core", snapshot_id)
        }
        LifecyclePhase::ExecutedBoth => format!(
            "ratchet merge --core-run {} --anchors-run {}",
            snapshot_id, snapshot_id
        ),
        LifecyclePhase::Merged => format!("ratchet check --merge {}", snapshot_id),
    }
}

pub fn run_status_cli(store: &StateStore, cli: StatusCli) -> Result<i32, RatchetError> {
    let phase_report = lifecycle::inspect(store, &cli.snapshot)?;

    if cli.format == "json" {
        println!("{}", serde_json::to_string_pretty(&phase_report).unwrap());
        return Ok(0);
    }

    println!(
        "{}",
        report::status_line(
            Level::Pass,
            "OK",
            &format!("{} is {}", cli.snapshot, phase_report.phase),
        )
    );
    println!("  snapshot file:    {}", yes_no(phase_report.snapshot_file));
    println!("  digest file:      {}", yes_no(phase_report.digest_file));
    println!("  approved:         {}", yes_no(phase_report.approved));
    println!("  core executed:    {}", yes_no(phase_report.core_executed));
    println!("  anchors executed: {}", yes_no(phase_report.anchors_executed));
    println!("  merged:           {}", yes_no(phase_report.merged));
    println!("  next: {}", next_step(phase_report.phase, &cli.snapshot));
    Ok(0)
}

pub fn run_log_cli(store: &StateStore, cli: LogCli) -> Result<i32, RatchetError> {
    let events = audit::read_events(store, cli.limit)?;

    if cli.format == "json" {
        println!("{}", serde_json::to_string_pretty(&events).unwrap());
        return Ok(0);
    }

    println!(
        "{}",
        report::status_line(Level::Pass, "OK", &format!("{} event(s)", events.len())),
    );
    if events.is_empty() {
        return Ok(0);
    }
    println!(
        "  {:<14} {:<9} {:<8} {:<30} {}",
        "TIME", "OP", "ACTOR", "SUBJECT", "STATUS"
    );
    for ev in &events {
        println!(
            "  {:<14} {:<9} {:<8} {:<30} {}",
            ev.ts, ev.op, ev.actor, ev.subject, ev.status
        );
        if let Some(detail) = &ev.detail {
            println!("      {}", detail);
        }
    }
    Ok(0)
}
