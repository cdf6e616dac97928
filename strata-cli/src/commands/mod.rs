//! CLI command implementations

pub mod migrate;
pub mod status;
pub mod version;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use dialoguer::Confirm;
use strata_core::StrataContext;
use tracing::debug;

/// Resolve the project directory: `--dir` / `STRATA_DIR`, else the working directory
pub fn project_dir(dir: Option<PathBuf>) -> Result<PathBuf> {
    match dir {
        Some(dir) => Ok(dir),
        None => std::env::current_dir().context("Failed to read current directory"),
    }
}

/// Open the project in `dir`
pub fn get_context(dir: &Path) -> Result<StrataContext> {
    debug!(dir = %dir.display(), "opening project");
    StrataContext::open(dir)
        .with_context(|| format!("Failed to open strata project in {:?}", dir))
}

/// Ask before a destructive operation
///
/// Only prompts on an interactive stdin; scripted runs proceed as if `--yes`
/// had been given.
pub fn confirm(prompt: &str, yes: bool) -> Result<bool> {
    if yes || atty::isnt(atty::Stream::Stdin) {
        return Ok(true);
    }
    let confirmed = Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()?;
    Ok(confirmed)
}
