//! Named lock (MySQL / MariaDB `GET_LOCK`)

use tracing::warn;

use crate::domain::result::{Error, Result};
use crate::ports::{Database, Value};

const MAX_UNLOCK_DEPTH: usize = 64;

/// Server-wide named mutex
pub struct NamedLock {
    /// Already quoted as an SQL string literal
    literal: String,
}

impl NamedLock {
    pub fn new(name: &str) -> Self {
        Self {
            literal: format!("'{}'", name.replace('\'', "''")),
        }
    }

    fn scalar(db: &dyn Database, sql: &str) -> Result<Value> {
        Ok(db
            .query(sql, &[])?
            .into_iter()
            .next()
            .and_then(|row| row.into_iter().next())
            .unwrap_or(Value::Null))
    }
}

impl super::LockStrategy for NamedLock {
    fn name(&self) -> &'static str {
        "named"
    }

    fn try_acquire(&self, db: &dyn Database) -> Result<bool> {
        let reply = Self::scalar(db, &format!("SELECT GET_LOCK({}, 0)", self.literal))?;
        // NULL means the server hit an error (out of memory, killed thread)
        reply
            .as_bool()
            .ok_or_else(|| Error::database(format!("GET_LOCK({}) returned NULL", self.literal)))
    }

    fn release(&self, db: &dyn Database) -> Result<bool> {
        // 0 = held by someone else, NULL = nobody holds it
        let reply = Self::scalar(db, &format!("SELECT RELEASE_LOCK({})", self.literal))?;
        Ok(reply.as_bool().unwrap_or(false))
    }

    fn is_locked(&self, db: &dyn Database) -> Result<bool> {
        let holder = Self::scalar(db, &format!("SELECT IS_USED_LOCK({})", self.literal))?;
        Ok(!holder.is_null())
    }

    fn force_release(&self, db: &dyn Database) -> Result<()> {
        let holder = Self::scalar(db, &format!("SELECT IS_USED_LOCK({})", self.literal))?;
        let Some(holder_id) = holder.as_i64() else {
            return Ok(());
        };

        let own_id = Self::scalar(db, "SELECT CONNECTION_ID()")?.as_i64();
        if own_id == Some(holder_id) {
            for _ in 0..MAX_UNLOCK_DEPTH {
                if !self.release(db)? {
                    break;
                }
            }
        } else {
            warn!(connection = holder_id, "killing connection holding the named lock");
            db.execute_batch(&format!("KILL {}", holder_id))?;
        }
        Ok(())
    }
}
