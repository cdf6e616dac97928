//! Migrate commands - move the database forward and backward

use std::path::Path;

use anyhow::Result;
use colored::Colorize;
use serde::Serialize;
use strata_core::services::{LockOutcome, MigrationReport, RefreshReport};

use super::{confirm, get_context};
use crate::output::{self, SkipReason};

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn finish(report: &MigrationReport, done: &str, json: bool) -> Result<()> {
    if json {
        return print_json(report);
    }
    output::report(report, done, SkipReason::Irreversible);
    Ok(())
}

fn finish_refresh(report: &RefreshReport, json: bool) -> Result<()> {
    if json {
        return print_json(report);
    }
    println!("{}", "Rolled back".bold());
    output::report(&report.rolled_back, "Rolled back", SkipReason::Irreversible);
    println!("{}", "Applied".bold());
    output::report(&report.applied, "Applied", SkipReason::Irreversible);
    Ok(())
}

pub fn up(dir: &Path, steps: Option<usize>, no_wait: bool, json: bool) -> Result<()> {
    let ctx = get_context(dir)?;

    if !no_wait {
        let report = ctx.executor.up(steps)?;
        return finish(&report, "Applied", json);
    }

    match ctx.executor.up_if_not_locked(steps)? {
        LockOutcome::Completed(report) => finish(&report, "Applied", json),
        LockOutcome::Skipped => {
            if json {
                print_json(&serde_json::json!({ "skipped": true }))
            } else {
                output::warning("Another deployer holds the migration lock, nothing applied");
                Ok(())
            }
        }
    }
}

pub fn down(dir: &Path, steps: usize, force: bool, json: bool) -> Result<()> {
    let ctx = get_context(dir)?;
    let report = ctx.executor.down(steps, force)?;
    finish(&report, "Rolled back", json)
}

pub fn up_to(dir: &Path, target: &str, json: bool) -> Result<()> {
    let ctx = get_context(dir)?;
    let report = ctx.executor.up_to(target)?;
    finish(&report, "Applied", json)
}

pub fn down_to(dir: &Path, target: &str, force: bool, yes: bool, json: bool) -> Result<()> {
    let ctx = get_context(dir)?;
    if !confirm(&format!("Roll back every change down to {}?", target), yes)? {
        output::info("Cancelled");
        return Ok(());
    }
    let report = ctx.executor.down_to(target, force)?;
    finish(&report, "Rolled back", json)
}

pub fn reset(dir: &Path, force: bool, yes: bool, json: bool) -> Result<()> {
    let ctx = get_context(dir)?;
    if !confirm("Roll back every applied change?", yes)? {
        output::info("Cancelled");
        return Ok(());
    }
    let report = ctx.executor.reset(force)?;
    finish(&report, "Rolled back", json)
}

pub fn fresh(dir: &Path, yes: bool, json: bool) -> Result<()> {
    let ctx = get_context(dir)?;
    if !confirm("Roll back and re-apply every change?", yes)? {
        output::info("Cancelled");
        return Ok(());
    }
    let report = ctx.executor.fresh()?;
    finish(&report, "Applied", json)
}

pub fn refresh(dir: &Path, yes: bool, json: bool) -> Result<()> {
    let ctx = get_context(dir)?;
    if !confirm("Roll back and re-apply every change?", yes)? {
        output::info("Cancelled");
        return Ok(());
    }
    let report = ctx.executor.refresh()?;
    finish_refresh(&report, json)
}

pub fn verify(dir: &Path, json: bool) -> Result<()> {
    let ctx = get_context(dir)?;
    let checked = ctx.executor.verify()?;

    if json {
        return print_json(&serde_json::json!({ "verified": checked }));
    }
    output::success(&format!("{} applied change(s) match their definitions", checked));
    Ok(())
}

pub fn unlock(dir: &Path, yes: bool) -> Result<()> {
    let ctx = get_context(dir)?;
    if !ctx.executor.is_locked()? {
        output::info("Migration lock is not held");
        return Ok(());
    }

    output::warning("Clearing the lock while a deployer is running can corrupt the schema");
    if !confirm("Force-release the migration lock?", yes)? {
        output::info("Cancelled");
        return Ok(());
    }
    ctx.executor.force_unlock()?;
    output::success("Migration lock released");
    Ok(())
}
