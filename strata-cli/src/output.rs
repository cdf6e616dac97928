//! Output formatting utilities

use chrono::{DateTime, Local};
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL_CONDENSED, ContentArrangement, Table};
use strata_core::services::MigrationReport;

/// Print a success message
pub fn success(msg: &str) {
    println!("{}", msg.green());
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{}", msg.red());
}

/// Print a warning message
pub fn warning(msg: &str) {
    println!("{}", msg.yellow());
}

/// Print an info message
pub fn info(msg: &str) {
    println!("{}", msg.cyan());
}

/// Create a styled table
pub fn create_table() -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Render an RFC 3339 timestamp in local time, passing other text through
pub fn format_timestamp(raw: &str) -> String {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(ts) => ts.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string(),
        Err(_) => raw.to_string(),
    }
}

/// Why keys in a report's `skipped` list were not run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Rollbacks passed over under force
    Irreversible,
    /// Plan runs whose change was already applied
    Satisfied,
    /// Plan rollbacks: either not applied or irreversible under force
    PlanRollback,
}

impl SkipReason {
    fn label(self) -> &'static str {
        match self {
            SkipReason::Irreversible => "irreversible, skipped",
            SkipReason::Satisfied => "already applied, skipped",
            SkipReason::PlanRollback => "already rolled back or irreversible, skipped",
        }
    }
}

fn skipped_line(key: &str, reason: SkipReason) -> String {
    format!("{} ({})", key, reason.label())
}

/// Print what an executor call did, one change per line
///
/// `done` is the past-tense verb, e.g. "Applied".
pub fn report(report: &MigrationReport, done: &str, reason: SkipReason) {
    if report.is_empty() {
        info("Nothing to do");
        return;
    }
    for key in &report.changes {
        println!("  {} {}", "•".green(), key);
    }
    for key in &report.skipped {
        println!("  {} {}", "•".yellow(), skipped_line(key, reason));
    }
    success(&format!("{} {} change(s)", done, report.count()));
}
