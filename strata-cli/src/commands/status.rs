//! Status command - show every change and where it stands

use std::path::Path;

use anyhow::Result;
use colored::Colorize;
use strata_core::{ChangeState, ChangeStatus};

use super::get_context;
use crate::output;

pub fn run(dir: &Path, json: bool) -> Result<()> {
    let ctx = get_context(dir)?;
    let rows = ctx.executor.status()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    println!("{}", "Migration Status".bold());
    println!();

    if rows.is_empty() {
        output::info(&format!("No changes found in {:?}", ctx.config.migrations_dir));
        return Ok(());
    }

    let mut table = output::create_table();
    table.set_header(vec!["ID", "Name", "State", "Applied At", "Reversible"]);
    for row in &rows {
        table.add_row(vec![
            row.id.clone(),
            row.name.clone(),
            state_label(row),
            row.applied_at.as_deref().map(output::format_timestamp).unwrap_or_default(),
            if row.reversible { "yes" } else { "no" }.to_string(),
        ]);
    }
    println!("{}", table);
    println!();

    let pending = rows.iter().filter(|r| r.state == ChangeState::Pending).count();
    let drifted = rows.iter().filter(|r| r.drifted).count();
    println!("{} applied, {} pending", rows.len() - pending, pending);
    if drifted > 0 {
        output::warning(&format!(
            "{} applied change(s) no longer match their stored fingerprint",
            drifted
        ));
    }

    Ok(())
}

fn state_label(row: &ChangeStatus) -> String {
    match row.state {
        ChangeState::Pending => "pending".yellow().to_string(),
        ChangeState::Applied if row.drifted => "applied (modified)".red().to_string(),
        ChangeState::Applied => "applied".green().to_string(),
        ChangeState::Missing => "missing".red().to_string(),
    }
}
