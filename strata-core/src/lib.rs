//! Strata Core - schema migration engine
//!
//! This crate implements the migration core following hexagonal architecture:
//!
//! - **domain**: Core entities (ChangeDefinition, LedgerEntry, VersionMapping, etc.)
//! - **ports**: Trait definitions for external collaborators (Database, CommitResolver)
//! - **services**: Repository, ledger, lock manager, executor and planner
//! - **adapters**: Concrete implementations (DuckDB, git)

pub mod adapters;
pub mod config;
pub mod domain;
pub mod ports;
pub mod services;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use adapters::duckdb::DuckDbDatabase;
use adapters::git::GitCommitResolver;
use config::Config;
use ports::Database;
use services::*;

// Re-export commonly used types at crate root
pub use domain::result::{Error, OperationResult, Result};
pub use domain::{
    ChangeDefinition, ChangeProcedure, ChangeState, ChangeStatus, DeploymentPlan, LedgerEntry,
    VersionMapping, VersionRef,
};

/// Main context for strata operations
///
/// Holds the configuration, the executor bound to the project's database and
/// the version planner over the project's manifest.
pub struct StrataContext {
    pub project_dir: PathBuf,
    pub config: Config,
    pub executor: MigrationExecutor,
    pub planner: VersionPlanner,
}

impl StrataContext {
    /// Open the project in `project_dir` against its DuckDB database file
    pub fn open(project_dir: &Path) -> Result<Self> {
        let config = Config::load(project_dir)?;
        let db = DuckDbDatabase::open(&config.database)?;
        Self::with_database(project_dir, config, Box::new(db))
    }

    /// Build a context around an externally supplied database handle
    pub fn with_database(
        project_dir: &Path,
        config: Config,
        db: Box<dyn Database + Send>,
    ) -> Result<Self> {
        db.connect()?;

        let repository = ChangeRepository::from_dir(&config.migrations_dir);
        let executor = MigrationExecutor::new(db, repository)
            .with_ledger(LedgerAdapter::new(config.ledger_table.clone()))
            .with_lock_manager(LockManager::new(config.lock_settings()))
            .with_options(config.executor_options());

        let planner = VersionPlanner::new(&config.manifest)
            .with_resolver(Box::new(GitCommitResolver::new(project_dir)));

        Ok(Self {
            project_dir: project_dir.to_path_buf(),
            config,
            executor,
            planner,
        })
    }

    /// Register a callable body for the change `<id>_<name>`
    pub fn register_procedure(
        &mut self,
        key: &str,
        procedure: Arc<dyn ChangeProcedure>,
    ) -> &mut Self {
        self.executor
            .repository_mut()
            .register_procedure(key, procedure);
        self
    }
}
