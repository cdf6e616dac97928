//! DuckDB implementation of the database port

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use duckdb::types::Value as DuckValue;
use duckdb::{params_from_iter, Connection};
use tracing::{debug, warn};

use crate::domain::result::{Error, Result};
use crate::ports::{Database, Engine, Row, Value};

/// Maximum number of retries when database file is locked
const MAX_RETRIES: u32 = 5;

/// Initial retry delay in milliseconds (doubles each retry: 50, 100, 200, 400, 800ms)
const INITIAL_RETRY_DELAY_MS: u64 = 50;

/// Check if an error message indicates a file locking issue that should be retried
fn is_retryable_error(err_msg: &str) -> bool {
    let lower = err_msg.to_lowercase();
    // Windows error messages
    lower.contains("being used by another process")
        || lower.contains("cannot access the file")
        // Unix/macOS error messages
        || lower.contains("resource temporarily unavailable")
        || lower.contains("database is locked")
        || lower.contains("could not set lock on file")
        || lower.contains("file is already open")
}

fn to_duck(value: &Value) -> DuckValue {
    match value {
        Value::Null => DuckValue::Null,
        Value::Bool(b) => DuckValue::Boolean(*b),
        Value::Int(i) => DuckValue::BigInt(*i),
        Value::Text(s) => DuckValue::Text(s.clone()),
    }
}

fn from_duck(value: DuckValue) -> Value {
    match value {
        DuckValue::Null => Value::Null,
        DuckValue::Boolean(b) => Value::Bool(b),
        DuckValue::TinyInt(i) => Value::Int(i64::from(i)),
        DuckValue::SmallInt(i) => Value::Int(i64::from(i)),
        DuckValue::Int(i) => Value::Int(i64::from(i)),
        DuckValue::BigInt(i) => Value::Int(i),
        DuckValue::UTinyInt(i) => Value::Int(i64::from(i)),
        DuckValue::USmallInt(i) => Value::Int(i64::from(i)),
        DuckValue::UInt(i) => Value::Int(i64::from(i)),
        DuckValue::HugeInt(i) => i64::try_from(i)
            .map(Value::Int)
            .unwrap_or_else(|_| Value::Text(i.to_string())),
        DuckValue::UBigInt(i) => i64::try_from(i)
            .map(Value::Int)
            .unwrap_or_else(|_| Value::Text(i.to_string())),
        DuckValue::Text(s) => Value::Text(s),
        other => Value::Text(format!("{:?}", other)),
    }
}

/// One DuckDB session
///
/// Shared by the top-level handle and by transaction bodies, which must run
/// on the connection that opened the transaction.
struct DuckDbSession<'a> {
    conn: &'a Connection,
    path: Option<&'a Path>,
    in_transaction: bool,
}

impl Database for DuckDbSession<'_> {
    fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<usize> {
        let affected = self
            .conn
            .execute(sql, params_from_iter(params.iter().map(to_duck)))?;
        Ok(affected)
    }

    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(params_from_iter(params.iter().map(to_duck)))?;

        let mut result = Vec::new();
        while let Some(row) = rows.next()? {
            let columns = row.as_ref().column_count();
            let mut values = Vec::with_capacity(columns);
            for i in 0..columns {
                values.push(from_duck(row.get_ref(i)?.to_owned()));
            }
            result.push(values);
        }
        Ok(result)
    }

    fn transaction(&self, body: &mut dyn FnMut(&dyn Database) -> Result<()>) -> Result<()> {
        if self.in_transaction {
            // DuckDB has no savepoints; nested bodies join the open transaction
            return body(self);
        }

        self.conn.execute_batch("BEGIN TRANSACTION")?;
        let session = DuckDbSession {
            conn: self.conn,
            path: self.path,
            in_transaction: true,
        };

        match body(&session) {
            Ok(()) => {
                self.conn.execute_batch("COMMIT")?;
                Ok(())
            }
            Err(e) => {
                if let Err(rollback_err) = self.conn.execute_batch("ROLLBACK") {
                    warn!(error = %rollback_err, "rollback after failed transaction body failed");
                }
                Err(e)
            }
        }
    }

    fn engine(&self) -> Result<Engine> {
        Ok(Engine::DuckDb)
    }

    fn location(&self) -> Option<PathBuf> {
        self.path.map(Path::to_path_buf)
    }
}

/// DuckDB database handle
///
/// Owns a single connection; every call goes through the same session so
/// transactions and the lock table see a consistent view.
pub struct DuckDbDatabase {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

impl DuckDbDatabase {
    /// Open (or create) a database file
    ///
    /// Includes retry logic with exponential backoff for file locking errors,
    /// which occur when another process has the file open for writing.
    pub fn open(db_path: &Path) -> Result<Self> {
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            match Self::try_open_connection(db_path) {
                Ok(conn) => {
                    return Ok(Self {
                        conn: Mutex::new(conn),
                        db_path: Some(db_path.to_path_buf()),
                    });
                }
                Err(e) => {
                    let err_msg = e.to_string();
                    if is_retryable_error(&err_msg) && attempt < MAX_RETRIES - 1 {
                        let delay =
                            Duration::from_millis(INITIAL_RETRY_DELAY_MS * 2u64.pow(attempt));
                        warn!(
                            delay_ms = delay.as_millis() as u64,
                            attempt = attempt + 1,
                            max = MAX_RETRIES,
                            error = %err_msg,
                            "database busy, retrying"
                        );
                        thread::sleep(delay);
                        last_error = Some(e);
                        continue;
                    }
                    return Err(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            Error::database(format!("Failed to open database after {} retries", MAX_RETRIES))
        }))
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let config = duckdb::Config::default().enable_autoload_extension(false)?;
        let conn = Connection::open_in_memory_with_flags(config)?;
        Ok(Self {
            conn: Mutex::new(conn),
            db_path: None,
        })
    }

    fn try_open_connection(db_path: &Path) -> Result<Connection> {
        // Disable extension autoloading to avoid picking up cached extensions
        let config = duckdb::Config::default().enable_autoload_extension(false)?;
        let conn = Connection::open_with_flags(db_path, config)?;
        debug!(path = %db_path.display(), "opened duckdb database");
        Ok(conn)
    }

    /// Open a second session on the same database instance
    ///
    /// Sessions are independent lock holders, which is how concurrent
    /// deployers are modelled inside one process.
    pub fn try_clone(&self) -> Result<Self> {
        let conn = self.lock_conn()?.try_clone()?;
        Ok(Self {
            conn: Mutex::new(conn),
            db_path: self.db_path.clone(),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| Error::database(format!("Connection lock poisoned: {}", e)))
    }

    fn with_session<T>(&self, f: impl FnOnce(&DuckDbSession<'_>) -> Result<T>) -> Result<T> {
        let conn = self.lock_conn()?;
        let session = DuckDbSession {
            conn: &conn,
            path: self.db_path.as_deref(),
            in_transaction: false,
        };
        f(&session)
    }
}

impl Database for DuckDbDatabase {
    fn execute_batch(&self, sql: &str) -> Result<()> {
        self.with_session(|s| s.execute_batch(sql))
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<usize> {
        self.with_session(|s| s.execute(sql, params))
    }

    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.with_session(|s| s.query(sql, params))
    }

    fn transaction(&self, body: &mut dyn FnMut(&dyn Database) -> Result<()>) -> Result<()> {
        self.with_session(|s| s.transaction(body))
    }

    fn engine(&self) -> Result<Engine> {
        Ok(Engine::DuckDb)
    }

    fn location(&self) -> Option<PathBuf> {
        self.db_path.clone()
    }
}
