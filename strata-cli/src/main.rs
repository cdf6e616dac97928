//! Strata CLI - schema migrations from your terminal

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

use commands::{migrate, status, version};

/// Strata - versioned schema migrations
#[derive(Parser)]
#[command(name = "strata", version, about, long_about = None)]
struct Cli {
    /// Project directory holding strata.json and the migrations
    #[arg(long, global = true, env = "STRATA_DIR")]
    dir: Option<PathBuf>,

    /// Log progress to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show every change with its applied state
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Apply pending changes
    Up {
        /// Apply at most this many changes
        #[arg(long)]
        steps: Option<usize>,
        /// Exit quietly if another deployer holds the lock
        #[arg(long)]
        no_wait: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Roll back the most recently applied changes
    Down {
        /// Number of changes to roll back
        #[arg(long, default_value_t = 1)]
        steps: usize,
        /// Skip irreversible changes instead of failing
        #[arg(long)]
        force: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Apply pending changes up to and including a target
    UpTo {
        /// Change id or `<id>_<name>` key
        target: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Roll back applied changes down to and including a target
    DownTo {
        /// Change id or `<id>_<name>` key
        target: String,
        /// Skip irreversible changes instead of failing
        #[arg(long)]
        force: bool,
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Roll back every applied change
    Reset {
        /// Skip irreversible changes instead of failing
        #[arg(long)]
        force: bool,
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Roll back everything, then apply everything
    Fresh {
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Like fresh, but report both halves
    Refresh {
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check applied changes against their stored fingerprints
    Verify {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Clear a stuck migration lock
    Unlock {
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Manage released versions and deployment plans
    Version {
        #[command(subcommand)]
        command: version::VersionCommands,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = run(cli);

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            output::error(&format!("{:#}", e));
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_env("STRATA_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let dir = commands::project_dir(cli.dir)?;
    match cli.command {
        Commands::Status { json } => status::run(&dir, json),
        Commands::Up { steps, no_wait, json } => migrate::up(&dir, steps, no_wait, json),
        Commands::Down { steps, force, json } => migrate::down(&dir, steps, force, json),
        Commands::UpTo { target, json } => migrate::up_to(&dir, &target, json),
        Commands::DownTo { target, force, yes, json } => {
            migrate::down_to(&dir, &target, force, yes, json)
        }
        Commands::Reset { force, yes, json } => migrate::reset(&dir, force, yes, json),
        Commands::Fresh { yes, json } => migrate::fresh(&dir, yes, json),
        Commands::Refresh { yes, json } => migrate::refresh(&dir, yes, json),
        Commands::Verify { json } => migrate::verify(&dir, json),
        Commands::Unlock { yes } => migrate::unlock(&dir, yes),
        Commands::Version { command } => version::run(&dir, command),
    }
}
