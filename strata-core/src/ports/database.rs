//! Database port - the handle every migration runs against
//!
//! The engine itself (connections, drivers, pooling) lives outside this
//! crate. The core only needs to execute statements, read rows back and run
//! a body inside a transaction.

use std::fmt;
use std::path::PathBuf;

use crate::domain::result::Result;

/// A single scalar value passed to or read from the database
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(i64::from(*b)),
            Value::Text(s) => s.trim().parse().ok(),
            Value::Null => None,
        }
    }

    /// Interpret the value as a boolean the way SQL engines report them
    /// (`t`/`f` text from Postgres, `0`/`1` integers from MySQL).
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(i) => Some(*i != 0),
            Value::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "t" | "true" | "1" => Some(true),
                "f" | "false" | "0" => Some(false),
                _ => None,
            },
            Value::Null => None,
        }
    }

    /// Render the value as text, for columns that are stored as VARCHAR
    pub fn to_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Bool(b) => Some(b.to_string()),
            Value::Int(i) => Some(i.to_string()),
            Value::Text(s) => Some(s.clone()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<Option<String>> for Value {
    fn from(s: Option<String>) -> Self {
        s.map(Value::Text).unwrap_or(Value::Null)
    }
}

/// One result row, columns in SELECT order
pub type Row = Vec<Value>;

/// Database engine family, used to pick SQL dialect details and lock strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Engine {
    Postgres,
    MySql,
    DuckDb,
    Sqlite,
    Other,
}

impl Engine {
    /// Classify the string returned by `SELECT version()`
    pub fn from_version_string(version: &str) -> Self {
        let lower = version.to_lowercase();
        if lower.contains("postgres") || lower.contains("cockroach") {
            Engine::Postgres
        } else if lower.contains("mysql") || lower.contains("mariadb") {
            Engine::MySql
        } else if lower.contains("duckdb") || lower.starts_with('v') {
            // DuckDB reports a bare "v1.x.y"
            Engine::DuckDb
        } else if lower.contains("sqlite") {
            Engine::Sqlite
        } else {
            Engine::Other
        }
    }

    /// Bind placeholder for the 1-based parameter `index`
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            Engine::Postgres => format!("${}", index),
            _ => "?".to_string(),
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Engine::Postgres => "postgres",
            Engine::MySql => "mysql",
            Engine::DuckDb => "duckdb",
            Engine::Sqlite => "sqlite",
            Engine::Other => "other",
        };
        f.write_str(name)
    }
}

/// Database handle capability
///
/// Implementations own a single session. Advisory and named locks are
/// session scoped, so every call made through one handle must reach the
/// same underlying connection. Handles that move between threads are held
/// as `Box<dyn Database + Send>`.
pub trait Database {
    /// Execute one or more statements, discarding any results
    fn execute_batch(&self, sql: &str) -> Result<()>;

    /// Execute a single parameterized statement, returning rows affected
    fn execute(&self, sql: &str, params: &[Value]) -> Result<usize>;

    /// Run a query and collect all rows
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Run `body` inside a transaction
    ///
    /// Commits when the body returns `Ok`. When it returns `Err` the
    /// transaction is rolled back and the body's error is returned.
    fn transaction(&self, body: &mut dyn FnMut(&dyn Database) -> Result<()>) -> Result<()>;

    /// Detect the engine family behind this handle
    fn engine(&self) -> Result<Engine> {
        let first_text = |rows: Vec<Row>| {
            rows.into_iter()
                .next()
                .and_then(|row| row.into_iter().next())
                .and_then(|v| v.to_text())
                .unwrap_or_default()
        };

        if let Ok(rows) = self.query("SELECT version()", &[]) {
            let engine = Engine::from_version_string(&first_text(rows));
            if engine != Engine::Other {
                return Ok(engine);
            }
        }
        // MySQL's version() is a bare number; the product name lives here
        if let Ok(rows) = self.query("SELECT @@version_comment", &[]) {
            let engine = Engine::from_version_string(&first_text(rows));
            if engine != Engine::Other {
                return Ok(engine);
            }
        }
        if self.query("SELECT sqlite_version()", &[]).is_ok() {
            return Ok(Engine::Sqlite);
        }
        Ok(Engine::Other)
    }

    /// Open the underlying connection, for handles with an explicit lifecycle
    fn connect(&self) -> Result<()> {
        Ok(())
    }

    /// Close the underlying connection
    fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    /// Backing file for embedded engines
    fn location(&self) -> Option<PathBuf> {
        None
    }
}

impl<D: Database + ?Sized> Database for Box<D> {
    fn execute_batch(&self, sql: &str) -> Result<()> {
        (**self).execute_batch(sql)
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<usize> {
        (**self).execute(sql, params)
    }

    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        (**self).query(sql, params)
    }

    fn transaction(&self, body: &mut dyn FnMut(&dyn Database) -> Result<()>) -> Result<()> {
        (**self).transaction(body)
    }

    fn engine(&self) -> Result<Engine> {
        (**self).engine()
    }

    fn connect(&self) -> Result<()> {
        (**self).connect()
    }

    fn disconnect(&self) -> Result<()> {
        (**self).disconnect()
    }

    fn location(&self) -> Option<PathBuf> {
        (**self).location()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_from_version_string() {
        assert_eq!(
            Engine::from_version_string("PostgreSQL 16.2 on x86_64-pc-linux-gnu"),
            Engine::Postgres
        );
        assert_eq!(Engine::from_version_string("8.0.36"), Engine::Other);
        assert_eq!(
            Engine::from_version_string("10.11.6-MariaDB-0+deb12u1"),
            Engine::MySql
        );
        assert_eq!(Engine::from_version_string("v1.4.1"), Engine::DuckDb);
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(Engine::Postgres.placeholder(2), "$2");
        assert_eq!(Engine::DuckDb.placeholder(2), "?");
    }

    #[test]
    fn test_value_as_bool() {
        assert_eq!(Value::from("t").as_bool(), Some(true));
        assert_eq!(Value::Int(0).as_bool(), Some(false));
        assert_eq!(Value::Null.as_bool(), None);
    }
}
