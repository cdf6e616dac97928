//! Ledger adapter - the table of applied changes
//!
//! The standard layout is `(id, name, fingerprint, applied_at)`. A ledger
//! table that already exists with different columns and no fingerprint
//! column is treated as a legacy layout: it can be read and appended to,
//! but fingerprints are not tracked and entries cannot be removed, so
//! rollbacks against it are refused.

use std::sync::OnceLock;

use chrono::Utc;
use tracing::{debug, info};

use crate::domain::change::parse_change_key;
use crate::domain::result::{Error, Result};
use crate::domain::{ChangeDefinition, LedgerEntry};
use crate::ports::{Database, Engine, Value};

/// Default ledger table name
pub const DEFAULT_LEDGER_TABLE: &str = "schema_migrations";

/// Key columns recognised in a legacy ledger, in order of preference
const LEGACY_KEY_COLUMNS: &[&str] = &["migration_name", "name", "migration", "version", "id"];

/// Physical layout of the ledger table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerLayout {
    /// Table does not exist yet
    Absent,
    Standard,
    /// Pre-existing table; entries are keyed by `key_column`
    Legacy { key_column: String },
}

impl LedgerLayout {
    pub fn tracks_fingerprints(&self) -> bool {
        matches!(self, LedgerLayout::Standard)
    }
}

/// Persistence boundary over the ledger table
#[derive(Debug, Clone)]
pub struct LedgerAdapter {
    table: String,
    engine: OnceLock<Engine>,
}

impl Default for LedgerAdapter {
    fn default() -> Self {
        Self::new(DEFAULT_LEDGER_TABLE)
    }
}

impl LedgerAdapter {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            engine: OnceLock::new(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn engine(&self, db: &dyn Database) -> Result<Engine> {
        if let Some(engine) = self.engine.get() {
            return Ok(*engine);
        }
        let engine = db.engine()?;
        let _ = self.engine.set(engine);
        Ok(engine)
    }

    /// Inspect the table's columns to work out its layout
    pub fn detect(&self, db: &dyn Database) -> Result<LedgerLayout> {
        let engine = self.engine(db)?;
        let rows = db.query(
            &format!(
                "SELECT column_name FROM information_schema.columns WHERE table_name = {}",
                engine.placeholder(1)
            ),
            &[Value::from(self.table.as_str())],
        )?;

        let columns: Vec<String> = rows
            .into_iter()
            .filter_map(|row| row.into_iter().next().and_then(|v| v.to_text()))
            .map(|c| c.to_lowercase())
            .collect();

        if columns.is_empty() {
            return Ok(LedgerLayout::Absent);
        }
        if columns.iter().any(|c| c == "fingerprint") {
            return Ok(LedgerLayout::Standard);
        }

        LEGACY_KEY_COLUMNS
            .iter()
            .find(|candidate| columns.iter().any(|c| c == *candidate))
            .map(|c| LedgerLayout::Legacy {
                key_column: c.to_string(),
            })
            .ok_or_else(|| {
                Error::database(format!(
                    "table {} exists but has no recognizable ledger columns ({})",
                    self.table,
                    columns.join(", ")
                ))
            })
    }

    /// Make sure the table exists, creating it in the standard layout
    pub fn ensure(&self, db: &dyn Database) -> Result<LedgerLayout> {
        match self.detect(db)? {
            LedgerLayout::Absent => {
                db.execute_batch(&format!(
                    "CREATE TABLE IF NOT EXISTS {} (
                        id VARCHAR PRIMARY KEY,
                        name VARCHAR NOT NULL,
                        fingerprint VARCHAR NOT NULL,
                        applied_at VARCHAR NOT NULL
                    )",
                    self.table
                ))?;
                info!(table = %self.table, "created ledger table");
                Ok(LedgerLayout::Standard)
            }
            LedgerLayout::Legacy { key_column } => {
                debug!(table = %self.table, key_column = %key_column, "using legacy ledger layout");
                Ok(LedgerLayout::Legacy { key_column })
            }
            layout => Ok(layout),
        }
    }

    /// All applied entries, ascending by identifier
    ///
    /// Reading never creates the table; an absent table means nothing has
    /// been applied.
    pub fn entries(&self, db: &dyn Database) -> Result<Vec<LedgerEntry>> {
        let layout = self.detect(db)?;
        self.entries_for(db, &layout)
    }

    pub(crate) fn entries_for(&self, db: &dyn Database, layout: &LedgerLayout) -> Result<Vec<LedgerEntry>> {
        let mut entries = match layout {
            LedgerLayout::Absent => Vec::new(),
            LedgerLayout::Standard => db
                .query(
                    &format!(
                        "SELECT id, name, fingerprint, applied_at FROM {} ORDER BY id",
                        self.table
                    ),
                    &[],
                )?
                .into_iter()
                .map(|row| {
                    let text = |i: usize| row.get(i).and_then(Value::to_text);
                    LedgerEntry {
                        id: text(0).unwrap_or_default(),
                        name: text(1).unwrap_or_default(),
                        fingerprint: text(2),
                        applied_at: text(3).unwrap_or_default(),
                    }
                })
                .collect(),
            LedgerLayout::Legacy { key_column } => db
                .query(&format!("SELECT {} FROM {}", key_column, self.table), &[])?
                .into_iter()
                .filter_map(|row| row.into_iter().next().and_then(|v| v.to_text()))
                .map(|raw| Self::parse_legacy_key(&raw))
                .collect(),
        };
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(entries)
    }

    fn parse_legacy_key(raw: &str) -> LedgerEntry {
        let trimmed = raw.trim();
        let key = trimmed.strip_suffix(".sql").unwrap_or(trimmed);
        let (id, name) = parse_change_key(key).unwrap_or_else(|| (key.to_string(), String::new()));
        LedgerEntry {
            id,
            name,
            fingerprint: None,
            applied_at: String::new(),
        }
    }

    /// Record `change` as applied
    pub fn record(&self, db: &dyn Database, layout: &LedgerLayout, change: &ChangeDefinition) -> Result<()> {
        let engine = self.engine(db)?;
        match layout {
            LedgerLayout::Standard => {
                db.execute(
                    &format!(
                        "INSERT INTO {} (id, name, fingerprint, applied_at) VALUES ({})",
                        self.table,
                        placeholders(engine, 4)
                    ),
                    &[
                        Value::from(change.id.as_str()),
                        Value::from(change.name.as_str()),
                        Value::from(change.fingerprint.as_str()),
                        Value::from(Utc::now().to_rfc3339()),
                    ],
                )?;
            }
            LedgerLayout::Legacy { key_column } => {
                db.execute(
                    &format!(
                        "INSERT INTO {} ({}) VALUES ({})",
                        self.table,
                        key_column,
                        engine.placeholder(1)
                    ),
                    &[Value::from(change.key())],
                )?;
            }
            LedgerLayout::Absent => {
                return Err(Error::database(format!(
                    "ledger table {} does not exist",
                    self.table
                )))
            }
        }
        Ok(())
    }

    /// Remove `change`'s entry after a rollback
    pub fn remove(&self, db: &dyn Database, layout: &LedgerLayout, change: &ChangeDefinition) -> Result<()> {
        match layout {
            LedgerLayout::Standard => {
                let engine = self.engine(db)?;
                db.execute(
                    &format!("DELETE FROM {} WHERE id = {}", self.table, engine.placeholder(1)),
                    &[Value::from(change.id.as_str())],
                )?;
            }
            LedgerLayout::Legacy { .. } => {
                return Err(Error::LegacyLedger(self.table.clone()));
            }
            LedgerLayout::Absent => {}
        }
        Ok(())
    }
}

fn placeholders(engine: Engine, count: usize) -> String {
    (1..=count)
        .map(|i| engine.placeholder(i))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::duckdb::DuckDbDatabase;
    use crate::domain::change::fingerprint;
    use crate::domain::{ChangeBody, TextBody};
    use std::path::PathBuf;

    fn change(id: &str, name: &str) -> ChangeDefinition {
        ChangeDefinition {
            id: id.to_string(),
            name: name.to_string(),
            body: ChangeBody::Text(TextBody {
                forward: "SELECT 1".to_string(),
                backward: None,
            }),
            fingerprint: fingerprint(id.as_bytes()),
            origin: PathBuf::from(format!("{}_{}", id, name)),
        }
    }

    #[test]
    fn test_absent_table_reads_empty_and_is_not_created() {
        let db = DuckDbDatabase::open_in_memory().unwrap();
        let ledger = LedgerAdapter::default();

        assert!(ledger.entries(&db).unwrap().is_empty());
        assert_eq!(ledger.detect(&db).unwrap(), LedgerLayout::Absent);
    }

    #[test]
    fn test_record_and_remove_standard() {
        let db = DuckDbDatabase::open_in_memory().unwrap();
        let ledger = LedgerAdapter::default();
        let layout = ledger.ensure(&db).unwrap();
        assert_eq!(layout, LedgerLayout::Standard);

        ledger.record(&db, &layout, &change("002", "b")).unwrap();
        ledger.record(&db, &layout, &change("001", "a")).unwrap();

        let entries = ledger.entries(&db).unwrap();
        let keys: Vec<_> = entries.iter().map(|e| e.key()).collect();
        assert_eq!(keys, vec!["001_a", "002_b"]);
        assert_eq!(entries[0].fingerprint.as_deref(), Some(fingerprint(b"001").as_str()));
        assert!(!entries[0].applied_at.is_empty());

        ledger.remove(&db, &layout, &change("001", "a")).unwrap();
        let keys: Vec<_> = ledger.entries(&db).unwrap().iter().map(|e| e.key()).collect();
        assert_eq!(keys, vec!["002_b"]);
    }

    #[test]
    fn test_legacy_layout_is_append_only() {
        let db = DuckDbDatabase::open_in_memory().unwrap();
        db.execute_batch(
            "CREATE TABLE sys_migrations (migration_name VARCHAR PRIMARY KEY, applied_at TIMESTAMP DEFAULT current_timestamp);
             INSERT INTO sys_migrations (migration_name) VALUES ('001_a.sql');",
        )
        .unwrap();

        let ledger = LedgerAdapter::new("sys_migrations");
        let layout = ledger.ensure(&db).unwrap();
        assert_eq!(
            layout,
            LedgerLayout::Legacy {
                key_column: "migration_name".to_string()
            }
        );
        assert!(!layout.tracks_fingerprints());

        ledger.record(&db, &layout, &change("002", "b")).unwrap();
        let entries = ledger.entries(&db).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, "001");
        assert_eq!(entries[0].name, "a");
        assert!(entries[0].fingerprint.is_none());

        let err = ledger.remove(&db, &layout, &change("002", "b")).unwrap_err();
        assert!(matches!(err, Error::LegacyLedger(ref table) if table == "sys_migrations"));
        assert_eq!(ledger.entries(&db).unwrap().len(), 2);
    }
}
