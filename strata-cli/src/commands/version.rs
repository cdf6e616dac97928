//! Version commands - register releases and plan deployments between them

use std::path::Path;

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;
use strata_core::domain::PlanActionKind;
use strata_core::VersionRef;

use super::{confirm, get_context};
use crate::output::{self, SkipReason};

#[derive(Subcommand)]
pub enum VersionCommands {
    /// Record which changes make up a version
    Register {
        /// Semantic version label, e.g. 1.2.0
        version: String,
        /// Comma-separated change ids
        #[arg(long, value_delimiter = ',')]
        migrations: Vec<String>,
        #[arg(long)]
        description: Option<String>,
        /// Commit the version was cut from
        #[arg(long)]
        commit: Option<String>,
    },
    /// List registered versions
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show or set the current version
    Current {
        /// Move the current-version marker
        #[arg(long)]
        set: Option<String>,
    },
    /// Show the steps between two versions, optionally running them
    Plan {
        /// Version or commit to start from (default: current version)
        #[arg(long)]
        from: Option<String>,
        /// Version or commit to arrive at
        to: String,
        /// Run the plan and move the current-version marker
        #[arg(long)]
        execute: bool,
        /// Skip irreversible rollbacks instead of failing
        #[arg(long)]
        force: bool,
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Check every version for unknown change ids
    Validate,
}

pub fn run(dir: &Path, command: VersionCommands) -> Result<()> {
    match command {
        VersionCommands::Register { version, migrations, description, commit } => {
            register(dir, &version, migrations, description, commit)
        }
        VersionCommands::List { json } => list(dir, json),
        VersionCommands::Current { set } => current(dir, set),
        VersionCommands::Plan { from, to, execute, force, yes, json } => {
            plan(dir, from.as_deref(), &to, execute, force, yes, json)
        }
        VersionCommands::Validate => validate(dir),
    }
}

fn register(
    dir: &Path,
    version: &str,
    migrations: Vec<String>,
    description: Option<String>,
    commit: Option<String>,
) -> Result<()> {
    let ctx = get_context(dir)?;
    let mapping = ctx.planner.register(version, migrations, description, commit)?;
    output::success(&format!(
        "Registered {} with {} change(s)",
        mapping.version,
        mapping.migrations.len()
    ));
    Ok(())
}

fn list(dir: &Path, json: bool) -> Result<()> {
    let ctx = get_context(dir)?;
    let versions = ctx.planner.list()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&versions)?);
        return Ok(());
    }

    if versions.is_empty() {
        output::info("No versions registered");
        return Ok(());
    }

    let current = ctx.planner.current()?.map(|m| m.version);
    let mut table = output::create_table();
    table.set_header(vec!["Version", "Changes", "Commit", "Created", "Description"]);
    for mapping in &versions {
        let label = if current.as_deref() == Some(mapping.version.as_str()) {
            format!("{} *", mapping.version).green().to_string()
        } else {
            mapping.version.clone()
        };
        table.add_row(vec![
            label,
            mapping.migrations.len().to_string(),
            mapping.commit.clone().unwrap_or_default(),
            mapping.created_at.format("%Y-%m-%d %H:%M").to_string(),
            mapping.description.clone().unwrap_or_default(),
        ]);
    }
    println!("{}", table);
    Ok(())
}

fn current(dir: &Path, set: Option<String>) -> Result<()> {
    let ctx = get_context(dir)?;

    if let Some(version) = set {
        ctx.planner.set_current(&version)?;
        output::success(&format!("Current version set to {}", version));
        return Ok(());
    }

    match ctx.planner.current()? {
        Some(mapping) => println!("{}", mapping.version),
        None => output::info("No current version set"),
    }
    Ok(())
}

fn plan(
    dir: &Path,
    from: Option<&str>,
    to: &str,
    execute: bool,
    force: bool,
    yes: bool,
    json: bool,
) -> Result<()> {
    let ctx = get_context(dir)?;
    let from = from.map(VersionRef::parse);
    let to = VersionRef::parse(to);
    let plan = ctx.planner.plan(from.as_ref(), &to)?;

    if !execute {
        if json {
            println!("{}", serde_json::to_string_pretty(&plan)?);
            return Ok(());
        }
        println!("{}", plan.summary.bold());
        if !plan.is_empty() {
            let mut table = output::create_table();
            table.set_header(vec!["#", "Action", "Change"]);
            for action in &plan.actions {
                let kind = match action.action {
                    PlanActionKind::Rollback => "rollback".yellow().to_string(),
                    PlanActionKind::Run => "run".green().to_string(),
                };
                table.add_row(vec![action.order.to_string(), kind, action.change_id.clone()]);
            }
            println!("{}", table);
        }
        return Ok(());
    }

    if plan.rollbacks().next().is_some()
        && !confirm(&format!("{}. Proceed?", plan.summary), yes)?
    {
        output::info("Cancelled");
        return Ok(());
    }

    let report = ctx.executor.execute_plan(&plan, force)?;
    ctx.planner.set_current(&plan.to)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    output::report(&report.rolled_back, "Rolled back", SkipReason::PlanRollback);
    output::report(&report.applied, "Applied", SkipReason::Satisfied);
    output::success(&format!("Now at {}", plan.to));
    Ok(())
}

fn validate(dir: &Path) -> Result<()> {
    let ctx = get_context(dir)?;
    let problems = ctx.planner.validate(ctx.executor.repository())?;

    if problems.is_empty() {
        output::success("Every version references known changes");
        return Ok(());
    }
    for problem in &problems {
        output::warning(problem);
    }
    anyhow::bail!("{} problem(s) found", problems.len())
}
