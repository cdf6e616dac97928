//! Service layer - migration orchestration
//!
//! Services coordinate domain logic and port interactions. Each service
//! covers one part of the migration core.

pub mod executor;
pub mod ledger;
pub mod lock;
pub mod planner;
pub mod repository;
pub mod sql;

pub use executor::{
    Direction, ExecutorOptions, HookContext, MigrationExecutor, MigrationHook, MigrationReport,
    RefreshReport,
};
pub use ledger::{LedgerAdapter, LedgerLayout};
pub use lock::{LockManager, LockOutcome, LockSettings, LockStrategy, LockStrategyKind};
pub use planner::VersionPlanner;
pub use repository::{ChangeRepository, ChangeSource};
pub use sql::validate_sql_syntax;
