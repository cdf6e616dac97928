//! Sentinel-row lock for engines without native lock primitives

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::result::Result;
use crate::ports::{Database, Engine, Value};

/// Fixed key of the single sentinel row
const LOCK_KEY: &str = "migrations";

/// Insert-as-acquire, delete-as-release on a one-row table
pub struct TableLock {
    table: String,
    engine: Engine,
    /// Identifies this holder's row
    holder: String,
    /// Set once the sentinel table is known to exist
    ready: AtomicBool,
}

impl TableLock {
    pub fn new(table: &str, engine: Engine) -> Self {
        Self {
            table: table.to_string(),
            engine,
            holder: Uuid::new_v4().to_string(),
            ready: AtomicBool::new(false),
        }
    }

    pub fn holder_token(&self) -> &str {
        &self.holder
    }

    fn p(&self, index: usize) -> String {
        self.engine.placeholder(index)
    }

    /// Create the sentinel table on first use
    ///
    /// Sessions racing on a fresh database can all issue the create; engines
    /// with optimistic catalogs fail every one but the winner. A failed create
    /// followed by a readable table means another session won, which is fine.
    fn ensure_table(&self, db: &dyn Database) -> Result<()> {
        if self.ready.load(Ordering::Acquire) {
            return Ok(());
        }

        let created = db.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                lock_key VARCHAR(64) PRIMARY KEY,
                holder VARCHAR(64) NOT NULL,
                acquired_at VARCHAR(64) NOT NULL
            )",
            self.table
        ));
        if let Err(e) = created {
            if self.current_holder(db).is_err() {
                return Err(e);
            }
            debug!(error = %e, table = %self.table, "sentinel table created concurrently");
        }

        self.ready.store(true, Ordering::Release);
        Ok(())
    }

    fn current_holder(&self, db: &dyn Database) -> Result<Option<String>> {
        let rows = db.query(
            &format!("SELECT holder FROM {} WHERE lock_key = {}", self.table, self.p(1)),
            &[Value::from(LOCK_KEY)],
        )?;
        Ok(rows
            .into_iter()
            .next()
            .and_then(|row| row.into_iter().next())
            .and_then(|v| v.to_text()))
    }
}

impl super::LockStrategy for TableLock {
    fn name(&self) -> &'static str {
        "table"
    }

    fn try_acquire(&self, db: &dyn Database) -> Result<bool> {
        self.ensure_table(db)?;

        if let Some(holder) = self.current_holder(db)? {
            return Ok(holder == self.holder);
        }

        let inserted = db.execute(
            &format!(
                "INSERT INTO {} (lock_key, holder, acquired_at) VALUES ({}, {}, {})",
                self.table,
                self.p(1),
                self.p(2),
                self.p(3)
            ),
            &[
                Value::from(LOCK_KEY),
                Value::from(self.holder.as_str()),
                Value::from(Utc::now().to_rfc3339()),
            ],
        );

        match inserted {
            Ok(_) => Ok(true),
            // Lost the race: someone inserted between our read and write.
            // With optimistic engines the winner may not be visible yet, so
            // an empty re-read is still contention.
            Err(e) => match self.current_holder(db)? {
                Some(holder) => {
                    debug!(error = %e, "sentinel insert lost the race");
                    Ok(holder == self.holder)
                }
                None => {
                    warn!(error = %e, "sentinel insert failed with no visible holder");
                    Ok(false)
                }
            },
        }
    }

    fn release(&self, db: &dyn Database) -> Result<bool> {
        self.ensure_table(db)?;
        let deleted = db.execute(
            &format!(
                "DELETE FROM {} WHERE lock_key = {} AND holder = {}",
                self.table,
                self.p(1),
                self.p(2)
            ),
            &[Value::from(LOCK_KEY), Value::from(self.holder.as_str())],
        )?;
        Ok(deleted > 0)
    }

    fn is_locked(&self, db: &dyn Database) -> Result<bool> {
        self.ensure_table(db)?;
        Ok(self.current_holder(db)?.is_some())
    }

    fn force_release(&self, db: &dyn Database) -> Result<()> {
        self.ensure_table(db)?;
        db.execute(
            &format!("DELETE FROM {} WHERE lock_key = {}", self.table, self.p(1)),
            &[Value::from(LOCK_KEY)],
        )?;
        Ok(())
    }
}
