//! Session advisory lock (Postgres)

use tracing::warn;

use crate::domain::result::{Error, Result};
use crate::ports::{Database, Value};

/// Upper bound on unlock calls when draining re-entrant holds
const MAX_UNLOCK_DEPTH: usize = 64;

/// `pg_try_advisory_lock` on a fixed 64-bit key
pub struct AdvisoryLock {
    key: i64,
}

impl AdvisoryLock {
    pub fn new(key: i64) -> Self {
        Self { key }
    }

    /// pg_locks splits a bigint key into classid (high half) and objid (low half)
    fn lock_row_filter(&self) -> String {
        let classid = (self.key >> 32) as u32;
        let objid = self.key as u32;
        format!(
            "locktype = 'advisory' AND classid = {} AND objid = {} AND objsubid = 1",
            classid, objid
        )
    }

    fn scalar_bool(db: &dyn Database, sql: &str) -> Result<bool> {
        db.query(sql, &[])?
            .first()
            .and_then(|row| row.first())
            .and_then(Value::as_bool)
            .ok_or_else(|| Error::database(format!("unexpected reply to: {}", sql)))
    }
}

impl super::LockStrategy for AdvisoryLock {
    fn name(&self) -> &'static str {
        "advisory"
    }

    fn try_acquire(&self, db: &dyn Database) -> Result<bool> {
        Self::scalar_bool(db, &format!("SELECT pg_try_advisory_lock({})", self.key))
    }

    fn release(&self, db: &dyn Database) -> Result<bool> {
        Self::scalar_bool(db, &format!("SELECT pg_advisory_unlock({})", self.key))
    }

    fn is_locked(&self, db: &dyn Database) -> Result<bool> {
        let rows = db.query(
            &format!(
                "SELECT COUNT(*) FROM pg_locks WHERE {} AND granted",
                self.lock_row_filter()
            ),
            &[],
        )?;
        let count = rows
            .first()
            .and_then(|row| row.first())
            .and_then(Value::as_i64)
            .unwrap_or(0);
        Ok(count > 0)
    }

    fn force_release(&self, db: &dyn Database) -> Result<()> {
        let terminated = db.query(
            &format!(
                "SELECT pg_terminate_backend(pid) FROM pg_locks WHERE {} AND pid <> pg_backend_pid()",
                self.lock_row_filter()
            ),
            &[],
        )?;
        if !terminated.is_empty() {
            warn!(sessions = terminated.len(), "terminated sessions holding the advisory lock");
        }

        // Session locks stack; drain any holds on our own session
        for _ in 0..MAX_UNLOCK_DEPTH {
            if !self.release(db)? {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::Engine;
    use crate::services::lock::testing::ScriptedDatabase;
    use crate::services::lock::LockStrategy;

    #[test]
    fn test_try_acquire_and_release() {
        let db = ScriptedDatabase::new(Engine::Postgres);
        db.reply(Value::Bool(true)).reply(Value::from("f"));
        let lock = AdvisoryLock::new(42);

        assert!(lock.try_acquire(&db).unwrap());
        assert!(!lock.release(&db).unwrap());
        assert_eq!(
            db.statements(),
            vec!["SELECT pg_try_advisory_lock(42)", "SELECT pg_advisory_unlock(42)"]
        );
    }

    #[test]
    fn test_is_locked_splits_key() {
        let db = ScriptedDatabase::new(Engine::Postgres);
        db.reply(Value::Int(1));
        let lock = AdvisoryLock::new((3_i64 << 32) | 7);

        assert!(lock.is_locked(&db).unwrap());
        let sql = &db.statements()[0];
        assert!(sql.contains("classid = 3 AND objid = 7"), "{}", sql);
    }

    #[test]
    fn test_force_release_terminates_and_drains() {
        let db = ScriptedDatabase::new(Engine::Postgres);
        db.reply_rows(vec![vec![Value::Bool(true)]])
            .reply(Value::Bool(true))
            .reply(Value::Bool(false));
        let lock = AdvisoryLock::new(42);

        lock.force_release(&db).unwrap();
        let statements = db.statements();
        assert!(statements[0].starts_with("SELECT pg_terminate_backend(pid)"));
        assert_eq!(statements.len(), 3);
    }
}
