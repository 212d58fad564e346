//! Ratchet: a control plane for two-pass LLM workflows
//!
//! **Ratchet freezes an architectural decision once, then only lets work flow
//! forward.**
//!
//! An external generative process produces a decision; ratchet content-hashes
//! it, a human approves that exact hash, and derived stages may then execute
//! against it. Merging the stage outputs is terminal. Nothing is ever edited
//! in place and no step can be silently re-run: the state only ratchets
//! forward.
//!
//! # Core Principles
//!
//! - **Filesystem as database**: three append-only collections (snapshots,
//!   approvals, merges) are the whole persisted contract
//! - **Content-addressed**: ids are derived from canonical-JSON digests, so
//!   "the same decision" is a provable statement, not a convention
//! - **Human-gated**: no phase-two execution without an approval marker for
//!   the exact frozen bytes
//! - **Fail closed**: five ordered pre-flight checks run before any provider
//!   call; the first failure stops everything
//! - **Terminal merge**: one merge per run, ever; re-merging is a contract
//!   violation, not an idempotent retry
//!
//! # Lifecycle
//!
//! ```text
//! decide -> verify -> approve -> execute core -> execute anchors -> merge -> check
//! ```
//!
//! ```bash
//! # Scaffold a workspace
//! ratchet init
//!
//! # Phase one: freeze a decision snapshot
//! ratchet decide
//!
//! # Human gate
//! ratchet verify --snapshot demo-article-01__4f1c2ab9e0d3
//! ratchet approve --snapshot demo-article-01__4f1c2ab9e0d3
//!
//! # Phase two, then the terminal merge
//! ratchet execute --snapshot demo-article-01__4f1c2ab9e0d3 --stage core
//! ratchet execute --snapshot demo-article-01__4f1c2ab9e0d3 --stage anchors
//! ratchet merge --core-run demo-article-01__4f1c2ab9e0d3 \
//!               --anchors-run demo-article-01__4f1c2ab9e0d3
//! ratchet check --merge demo-article-01__4f1c2ab9e0d3
//! ```
//!
//! # Crate Structure
//!
//! - [`core`]: the state machine (canonical digests, snapshot store, approval
//!   gate, lifecycle classifier, pre-flight, merge, post-check)
//! - [`pipeline`]: orchestrated operations over it (decide, execute, views)
//!   and the provider bridge seam

pub mod core;
pub mod pipeline;

use crate::core::error::RatchetError;
use crate::core::report::{self, Level};
use crate::core::store::{self, StateStore};
use crate::core::{approval, audit, config, merge, postcheck, scaffold, snapshot};
use crate::pipeline::{decide, execute, status};

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[clap(
    name = "ratchet",
    version = env!("CARGO_PKG_VERSION"),
    about = "Two-pass LLM workflow control plane: decide once, approve, execute, merge exactly once"
)]
struct Cli {
    #[clap(subcommand)]
    command: Command,
}

#[derive(clap::Args, Debug)]
struct InitCli {
    /// Directory to initialize (defaults to current working directory)
    #[clap(short, long)]
    dir: Option<PathBuf>,
    /// Overwrite existing scaffold files
    #[clap(long)]
    force: bool,
    /// Show what would change without writing files
    #[clap(long)]
    dry_run: bool,
}

#[derive(clap::Args, Debug)]
struct VerifyCli {
    /// Snapshot id to verify
    #[clap(long)]
    snapshot: String,
}

#[derive(clap::Args, Debug)]
struct ApproveCli {
    /// Snapshot id to approve
    #[clap(long)]
    snapshot: String,
}

#[derive(clap::Args, Debug)]
struct MergeCli {
    /// Run id whose core stage feeds the merge
    #[clap(long)]
    core_run: String,
    /// Run id whose anchors stage feeds the merge
    #[clap(long)]
    anchors_run: String,
}

#[derive(clap::Args, Debug)]
struct CheckCli {
    /// Merge id to validate
    #[clap(long)]
    merge: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scaffold a ratchet workspace
    Init(InitCli),

    /// Phase one: run DECIDE and freeze the decision snapshot
    Decide,

    /// Verify a snapshot's digest and structural approvability
    Verify(VerifyCli),

    /// Record human approval for a verified snapshot
    Approve(ApproveCli),

    /// Show the lifecycle phase derived from the files on disk
    Status(status::StatusCli),

    /// Phase two: run one gated stage against an approved snapshot
    Execute(execute::ExecuteCli),

    /// Merge the two stage outputs of one run, exactly once
    Merge(MergeCli),

    /// Post-merge deliverables consistency check
    Check(CheckCli),

    /// Show the audit trail
    Log(status::LogCli),

    /// Print the persisted-layout and error-code contract as JSON
    Schema,
}

fn find_workspace_root(start_dir: &Path) -> Result<PathBuf, RatchetError> {
    let mut current = start_dir.to_path_buf();
    loop {
        if current.join(config::CONFIG_FILE).exists() {
            return Ok(current);
        }
        if !current.pop() {
            return Err(RatchetError::InputError(format!(
                "no {} found in current or parent directories; run `ratchet init` first",
                config::CONFIG_FILE
            )));
        }
    }
}

/// Parses the command line and dispatches. Returns the process exit code;
/// errors bubble to `main`, which renders them on the severity contract.
pub fn run() -> Result<i32, RatchetError> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init(init_cli) => run_init(init_cli),
        command => {
            let root = find_workspace_root(&std::env::current_dir()?)?;
            let workspace_config = config::load(&root)?;
            let store = StateStore::new(root, workspace_config);
            match command {
                Command::Init(_) => unreachable!(),
                Command::Decide => decide::run_decide_cli(&store),
                Command::Verify(verify_cli) => run_verify(&store, verify_cli),
                Command::Approve(approve_cli) => run_approve(&store, approve_cli),
                Command::Status(status_cli) => status::run_status_cli(&store, status_cli),
                Command::Execute(execute_cli) => execute::run_execute_cli(&store, execute_cli),
                Command::Merge(merge_cli) => run_merge(&store, merge_cli),
                Command::Check(check_cli) => run_check(&store, check_cli),
                Command::Log(log_cli) => status::run_log_cli(&store, log_cli),
                Command::Schema => {
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&store::schema()).unwrap()
                    );
                    Ok(0)
                }
            }
        }
    }
}

fn run_init(cli: InitCli) -> Result<i32, RatchetError> {
    let target_dir = match cli.dir {
        Some(d) => d,
        None => std::env::current_dir()?,
    };
    scaffold::scaffold_workspace(&scaffold::ScaffoldOptions {
        target_dir: target_dir.clone(),
        force: cli.force,
        dry_run: cli.dry_run,
    })?;
    if cli.dry_run {
        println!(
            "{}",
            report::status_line(Level::Pass, "OK", "dry run, nothing written")
        );
    } else {
        println!(
            "{}",
            report::status_line(
                Level::Pass,
                "OK",
                &format!("workspace ready in {}", target_dir.display()),
            )
        );
        println!("  next: edit input/task.json, then run: ratchet decide");
    }
    Ok(0)
}

fn run_verify(store: &StateStore, cli: VerifyCli) -> Result<i32, RatchetError> {
    let verified = snapshot::load_verified(store, &cli.snapshot)?;
    let summary = snapshot::check_structure(&verified.value)?;
    println!(
        "{}",
        report::status_line(
            Level::Pass,
            "OK",
            &format!("snapshot {} verifies and is structurally approvable", cli.snapshot),
        )
    );
    println!("  digest:       {}", verified.digest);
    println!("  nodes:        {}", summary.node_count);
    println!("  owners:       {}", summary.owners_covered);
    println!("  hub chain:    {}", summary.hub_chain_len);
    println!("  linking rows: {}", summary.linking_matrix_rows);
    println!("  next: ratchet approve --snapshot {}", cli.snapshot);
    Ok(0)
}

fn run_approve(store: &StateStore, cli: ApproveCli) -> Result<i32, RatchetError> {
    let outcome = approval::approve_snapshot(store, &cli.snapshot)?;
    audit::log_event(
        store,
        "approve",
        &cli.snapshot,
        "ok",
        Some(format!("digest {}", outcome.digest)),
    )?;
    let message = if outcome.already_approved {
        format!("snapshot {} was already approved", cli.snapshot)
    } else {
        format!("snapshot {} approved", cli.snapshot)
    };
    println!("{}", report::status_line(Level::Pass, "OK", &message));
    println!("  marker: {}", outcome.marker_path.display());
    println!(
        "  next: ratchet execute --snapshot {} --stage core",
        cli.snapshot
    );
    Ok(0)
}

fn run_merge(store: &StateStore, cli: MergeCli) -> Result<i32, RatchetError> {
    match merge::merge_runs(store, &cli.core_run, &cli.anchors_run) {
        Ok(outcome) => {
            audit::log_event(
                store,
                "merge",
                &outcome.record.merge_id,
                "ok",
                Some(format!("fingerprint {}", outcome.record.immutable_fingerprint)),
            )?;
            println!(
                "{}",
                report::status_line(
                    Level::Pass,
                    "OK",
                    &format!("merged {}", outcome.record.merge_id),
                )
            );
            println!("  record:  {}", outcome.record_path.display());
            println!("  pointer: {}", outcome.pointer_path.display());
            println!("  next: ratchet check --merge {}", outcome.record.merge_id);
            Ok(0)
        }
        // rendered here so every missing path gets its own line
        Err(RatchetError::MissingDeliverables(paths)) => {
            println!(
                "{}",
                report::status_line(
                    Level::Fail,
                    "DELIVERABLES_CHECK_FAILED",
                    &format!("{} deliverable path(s) missing", paths.len()),
                )
            );
            for path in &paths {
                println!("  missing: {}", path.display());
            }
            Ok(Level::Fail.exit_code())
        }
        Err(e) => Err(e),
    }
}

fn run_check(store: &StateStore, cli: CheckCli) -> Result<i32, RatchetError> {
    let reporter = postcheck::run_postcheck(store, &cli.merge);
    reporter.emit();
    Ok(reporter.exit_code())
}
