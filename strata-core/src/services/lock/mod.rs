//! Lock manager - cross-process mutual exclusion for ledger mutations
//!
//! Each engine family gets its own strategy:
//! - Postgres: session advisory lock on a fixed numeric key
//! - MySQL/MariaDB: named lock (`GET_LOCK`)
//! - anything else: a sentinel row in a lock table
//! - embedded single-file engines may opt into an OS file lock instead
//!
//! The strategy is chosen once per manager, on first use, by probing the
//! connected engine.

mod advisory;
mod file;
mod named;
mod table;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::OnceLock;
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::domain::result::{Error, Result};
use crate::ports::{Database, Engine};

pub use advisory::AdvisoryLock;
pub use file::FileLock;
pub use named::NamedLock;
pub use table::TableLock;

/// Default numeric key for session advisory locks
pub const DEFAULT_ADVISORY_KEY: i64 = 7_263_512_649;

/// Default name for named locks
pub const DEFAULT_LOCK_NAME: &str = "strata_migrations";

/// Default sentinel table
pub const DEFAULT_LOCK_TABLE: &str = "schema_migrations_lock";

/// Default pause between acquisition attempts
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// One engine-specific locking mechanism
pub trait LockStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Attempt once; `true` when this holder now owns the lock
    fn try_acquire(&self, db: &dyn Database) -> Result<bool>;

    /// Release; `false` when nothing was held by this holder
    fn release(&self, db: &dyn Database) -> Result<bool>;

    /// Whether anyone currently holds the lock
    fn is_locked(&self, db: &dyn Database) -> Result<bool>;

    /// Clear the lock regardless of holder
    fn force_release(&self, db: &dyn Database) -> Result<()>;
}

/// Which strategy to use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockStrategyKind {
    /// Pick from the connected engine
    #[default]
    Auto,
    Advisory,
    Named,
    Table,
    File,
}

impl FromStr for LockStrategyKind {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "advisory" => Ok(Self::Advisory),
            "named" => Ok(Self::Named),
            "table" => Ok(Self::Table),
            "file" => Ok(Self::File),
            other => Err(Error::Config(format!("unknown lock strategy '{}'", other))),
        }
    }
}

impl fmt::Display for LockStrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Auto => "auto",
            Self::Advisory => "advisory",
            Self::Named => "named",
            Self::Table => "table",
            Self::File => "file",
        };
        f.write_str(name)
    }
}

/// Lock manager settings
#[derive(Debug, Clone)]
pub struct LockSettings {
    pub strategy: LockStrategyKind,
    pub advisory_key: i64,
    pub lock_name: String,
    pub lock_table: String,
    /// Explicit lock file; defaults to `<database file>.lock`
    pub lock_file: Option<PathBuf>,
    pub retry_interval: Duration,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            strategy: LockStrategyKind::Auto,
            advisory_key: DEFAULT_ADVISORY_KEY,
            lock_name: DEFAULT_LOCK_NAME.to_string(),
            lock_table: DEFAULT_LOCK_TABLE.to_string(),
            lock_file: None,
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }
}

/// Result of a non-blocking, lock-guarded operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "result", rename_all = "lowercase")]
pub enum LockOutcome<T> {
    Completed(T),
    /// Another holder had the lock; nothing was done
    Skipped,
}

impl<T> LockOutcome<T> {
    pub fn is_skipped(&self) -> bool {
        matches!(self, LockOutcome::Skipped)
    }

    pub fn completed(self) -> Option<T> {
        match self {
            LockOutcome::Completed(value) => Some(value),
            LockOutcome::Skipped => None,
        }
    }
}

/// Acquires and releases the migration lock
pub struct LockManager {
    settings: LockSettings,
    strategy: OnceLock<Box<dyn LockStrategy>>,
}

impl LockManager {
    pub fn new(settings: LockSettings) -> Self {
        Self {
            settings,
            strategy: OnceLock::new(),
        }
    }

    /// Manager with a fixed strategy, skipping engine detection
    pub fn with_strategy(settings: LockSettings, strategy: Box<dyn LockStrategy>) -> Self {
        let cell = OnceLock::new();
        let _ = cell.set(strategy);
        Self {
            settings,
            strategy: cell,
        }
    }

    pub fn settings(&self) -> &LockSettings {
        &self.settings
    }

    /// The strategy in use, detecting it on first call
    pub fn strategy(&self, db: &dyn Database) -> Result<&dyn LockStrategy> {
        if let Some(strategy) = self.strategy.get() {
            return Ok(strategy.as_ref());
        }

        let strategy = self.build_strategy(db)?;
        info!(strategy = strategy.name(), "selected migration lock strategy");
        // A concurrent initializer may win; either instance is equivalent
        let _ = self.strategy.set(strategy);
        self.strategy
            .get()
            .map(|s| s.as_ref())
            .ok_or_else(|| Error::database("lock strategy not initialized"))
    }

    fn build_strategy(&self, db: &dyn Database) -> Result<Box<dyn LockStrategy>> {
        let s = &self.settings;
        let kind = match s.strategy {
            LockStrategyKind::Auto => match db.engine()? {
                Engine::Postgres => LockStrategyKind::Advisory,
                Engine::MySql => LockStrategyKind::Named,
                _ => LockStrategyKind::Table,
            },
            kind => kind,
        };

        Ok(match kind {
            LockStrategyKind::Advisory => Box::new(AdvisoryLock::new(s.advisory_key)),
            LockStrategyKind::Named => Box::new(NamedLock::new(&s.lock_name)),
            LockStrategyKind::File => {
                let path = s
                    .lock_file
                    .clone()
                    .or_else(|| db.location().map(|p| FileLock::default_path(&p)))
                    .ok_or_else(|| {
                        Error::Config(
                            "file lock needs a lock file or a file-backed database".to_string(),
                        )
                    })?;
                Box::new(FileLock::new(path))
            }
            LockStrategyKind::Table | LockStrategyKind::Auto => {
                Box::new(TableLock::new(&s.lock_table, db.engine()?))
            }
        })
    }

    /// Block until the lock is acquired or `timeout` elapses
    pub fn acquire(&self, db: &dyn Database, timeout: Duration) -> Result<()> {
        let strategy = self.strategy(db)?;
        let start = Instant::now();

        loop {
            if strategy.try_acquire(db)? {
                debug!(strategy = strategy.name(), "acquired migration lock");
                return Ok(());
            }

            let waited = start.elapsed();
            if waited >= timeout {
                warn!(waited_ms = waited.as_millis() as u64, "gave up waiting for migration lock");
                return Err(Error::LockTimeout { waited });
            }

            let pause = self.settings.retry_interval.min(timeout - waited);
            debug!(pause_ms = pause.as_millis() as u64, "migration lock busy, retrying");
            thread::sleep(pause);
        }
    }

    /// Attempt once without blocking
    pub fn try_acquire(&self, db: &dyn Database) -> Result<bool> {
        self.strategy(db)?.try_acquire(db)
    }

    /// Release the lock; warns instead of failing when nothing was held
    pub fn release(&self, db: &dyn Database) -> Result<()> {
        let strategy = self.strategy(db)?;
        if strategy.release(db)? {
            debug!(strategy = strategy.name(), "released migration lock");
        } else {
            warn!(strategy = strategy.name(), "release called but the migration lock was not held");
        }
        Ok(())
    }

    pub fn is_locked(&self, db: &dyn Database) -> Result<bool> {
        self.strategy(db)?.is_locked(db)
    }

    /// Administrative override: clear the lock whoever holds it
    pub fn force_release(&self, db: &dyn Database) -> Result<()> {
        let strategy = self.strategy(db)?;
        strategy.force_release(db)?;
        warn!(strategy = strategy.name(), "migration lock force-released");
        Ok(())
    }

    /// Acquire (blocking), then hand back a guard that releases on drop
    pub fn guard<'a>(&'a self, db: &'a dyn Database, timeout: Duration) -> Result<LockGuard<'a>> {
        self.acquire(db, timeout)?;
        Ok(LockGuard { manager: self, db })
    }

    /// Run `f` while holding the lock, releasing on every exit path
    pub fn with_lock<T>(
        &self,
        db: &dyn Database,
        timeout: Duration,
        f: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        let _guard = self.guard(db, timeout)?;
        f()
    }

    /// Acquire without waiting, failing with `LockUnavailable` when held
    pub fn require<'a>(&'a self, db: &'a dyn Database) -> Result<LockGuard<'a>> {
        if !self.try_acquire(db)? {
            return Err(Error::LockUnavailable);
        }
        Ok(LockGuard { manager: self, db })
    }

    /// Run `f` only if the lock is free right now
    pub fn try_lock<T>(&self, db: &dyn Database, f: impl FnOnce() -> Result<T>) -> Result<LockOutcome<T>> {
        let _guard = match self.require(db) {
            Ok(guard) => guard,
            Err(Error::LockUnavailable) => {
                info!("migration lock held elsewhere, skipping");
                return Ok(LockOutcome::Skipped);
            }
            Err(e) => return Err(e),
        };
        f().map(LockOutcome::Completed)
    }
}

/// Scoped lock ownership; releases when dropped
pub struct LockGuard<'a> {
    manager: &'a LockManager,
    db: &'a dyn Database,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.manager.release(self.db) {
            warn!(error = %e, "failed to release migration lock");
        }
    }
}
