//! Workspace scaffolding for `ratchet init`.
//!
//! Materializes the embedded templates into a target directory and creates
//! the state/output directories the workflow writes into. Existing files are
//! never overwritten without `--force`; `--dry-run` previews every action.

use crate::core::assets;
use crate::core::error::RatchetError;
use std::fs;
use std::path::{Path, PathBuf};

/// Scaffolding operation configuration.
pub struct ScaffoldOptions {
    /// Target directory for scaffold output (usually the workspace root)
    pub target_dir: PathBuf,
    /// Force overwrite of existing files
    pub force: bool,
    /// Preview mode, log actions without writing files
    pub dry_run: bool,
}

fn ensure_parent(path: &Path) -> Result<(), RatchetError> {
    if let Some(p) = path.parent() {
        fs::create_dir_all(p).map_err(RatchetError::IoError)?;
    }
    Ok(())
}

fn write_file(opts: &ScaffoldOptions, rel_path: &str, content: &str) -> Result<(), RatchetError> {
    let dest = opts.target_dir.join(rel_path);

    if dest.exists() && !opts.force {
        if opts.dry_run {
            println!(
                "  would-skip: {} (exists; pass --force to overwrite)",
                dest.display()
            );
            return Ok(());
        }
        return Err(RatchetError::InputError(format!(
            "refusing to overwrite existing path without --force: {}",
            dest.display()
        )));
    }

    if opts.dry_run {
        println!("  would-write: {}", dest.display());
        return Ok(());
    }

    ensure_parent(&dest)?;
    fs::write(&dest, content).map_err(RatchetError::IoError)?;
    println!("  wrote: {}", dest.display());
    Ok(())
}

/// Scaffold a ratchet workspace into `opts.target_dir`.
///
/// Writes every embedded template to its workspace-relative path and creates
/// the `state/` and `outputs/` directories the lifecycle persists into.
pub fn scaffold_workspace(opts: &ScaffoldOptions) -> Result<(), RatchetError> {
    println!("Scaffolding ratchet workspace in {}", opts.target_dir.display());

    for rel_path in assets::list_templates() {
        let content =
            assets::get_template(rel_path).ok_or_else(|| RatchetError::InputError(format!(
                "missing embedded template: {}",
                rel_path
            )))?;
        write_file(opts, rel_path, content)?;
    }

    if !opts.dry_run {
        for dir in ["state", "outputs"] {
            fs::create_dir_all(opts.target_dir.join(dir)).map_err(RatchetError::IoError)?;
        }
    }

    Ok(())
}
