//! Configuration management
//!
//! Project settings live in `strata.json` at the project root:
//! ```json
//! {
//!   "database": "strata.duckdb",
//!   "migrationsDir": "migrations",
//!   "manifest": "migrations/versions.json",
//!   "lockStrategy": "auto",
//!   "lockTimeoutSecs": 60,
//!   "verifyFingerprints": true
//! }
//! ```
//! Every key is optional. Keys this crate doesn't know about are kept when
//! the file is saved.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::result::{Error, Result};
use crate::services::executor::{ExecutorOptions, DEFAULT_LOCK_TIMEOUT};
use crate::services::ledger::DEFAULT_LEDGER_TABLE;
use crate::services::lock::{
    LockSettings, LockStrategyKind, DEFAULT_ADVISORY_KEY, DEFAULT_LOCK_NAME, DEFAULT_LOCK_TABLE,
    DEFAULT_RETRY_INTERVAL,
};
use crate::services::planner::DEFAULT_MANIFEST_FILE;

/// Settings file name inside a project directory
pub const CONFIG_FILE: &str = "strata.json";

const DEFAULT_DATABASE: &str = "strata.duckdb";
const DEFAULT_MIGRATIONS_DIR: &str = "migrations";

/// Raw strata.json structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    database: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    migrations_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    manifest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ledger_table: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    lock_table: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    lock_strategy: Option<LockStrategyKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    advisory_lock_key: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    lock_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    lock_timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    lock_retry_millis: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    use_lock: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    verify_fingerprints: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    validate_sql: Option<bool>,
    #[serde(flatten)]
    other: HashMap<String, serde_json::Value>,
}

impl ConfigFile {
    fn read(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }
}

/// Resolved project configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database file, resolved against the project directory
    pub database: PathBuf,
    pub migrations_dir: PathBuf,
    pub manifest: PathBuf,
    pub ledger_table: String,
    pub lock_table: String,
    pub lock_strategy: LockStrategyKind,
    pub advisory_lock_key: i64,
    pub lock_name: String,
    pub lock_timeout: Duration,
    pub lock_retry: Duration,
    pub use_lock: bool,
    pub verify_fingerprints: bool,
    pub validate_sql: bool,
}

impl Config {
    /// Defaults for a project rooted at `project_dir`
    pub fn defaults_for(project_dir: &Path) -> Self {
        let migrations_dir = project_dir.join(DEFAULT_MIGRATIONS_DIR);
        Self {
            database: project_dir.join(DEFAULT_DATABASE),
            manifest: migrations_dir.join(DEFAULT_MANIFEST_FILE),
            migrations_dir,
            ledger_table: DEFAULT_LEDGER_TABLE.to_string(),
            lock_table: DEFAULT_LOCK_TABLE.to_string(),
            lock_strategy: LockStrategyKind::Auto,
            advisory_lock_key: DEFAULT_ADVISORY_KEY,
            lock_name: DEFAULT_LOCK_NAME.to_string(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            lock_retry: DEFAULT_RETRY_INTERVAL,
            use_lock: true,
            verify_fingerprints: true,
            validate_sql: false,
        }
    }

    /// Load config from a project directory
    ///
    /// Locking and verification can also be switched via environment
    /// variables (for CI and emergency runs):
    /// - `STRATA_NO_LOCK` disables the migration lock
    /// - `STRATA_SKIP_VERIFY` disables fingerprint verification
    /// - `STRATA_LOCK_TIMEOUT` overrides the lock timeout in seconds
    pub fn load(project_dir: &Path) -> Result<Self> {
        let raw = ConfigFile::read(&project_dir.join(CONFIG_FILE))?;
        let defaults = Self::defaults_for(project_dir);
        let resolve = |value: &Option<String>, fallback: PathBuf| {
            value
                .as_deref()
                .map(|p| project_dir.join(p))
                .unwrap_or(fallback)
        };

        let migrations_dir = resolve(&raw.migrations_dir, defaults.migrations_dir.clone());
        let manifest = resolve(&raw.manifest, migrations_dir.join(DEFAULT_MANIFEST_FILE));

        let use_lock = match env_flag("STRATA_NO_LOCK") {
            Some(no_lock) => !no_lock,
            None => raw.use_lock.unwrap_or(defaults.use_lock),
        };
        let verify_fingerprints = match env_flag("STRATA_SKIP_VERIFY") {
            Some(skip) => !skip,
            None => raw.verify_fingerprints.unwrap_or(defaults.verify_fingerprints),
        };
        let lock_timeout = match std::env::var("STRATA_LOCK_TIMEOUT").ok() {
            Some(secs) => Duration::from_secs(secs.trim().parse().map_err(|_| {
                Error::Config(format!("STRATA_LOCK_TIMEOUT must be whole seconds, got '{}'", secs))
            })?),
            None => raw
                .lock_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.lock_timeout),
        };

        Ok(Self {
            database: resolve(&raw.database, defaults.database),
            migrations_dir,
            manifest,
            ledger_table: raw.ledger_table.unwrap_or(defaults.ledger_table),
            lock_table: raw.lock_table.unwrap_or(defaults.lock_table),
            lock_strategy: raw.lock_strategy.unwrap_or(defaults.lock_strategy),
            advisory_lock_key: raw.advisory_lock_key.unwrap_or(defaults.advisory_lock_key),
            lock_name: raw.lock_name.unwrap_or(defaults.lock_name),
            lock_timeout,
            lock_retry: raw
                .lock_retry_millis
                .map(Duration::from_millis)
                .unwrap_or(defaults.lock_retry),
            use_lock,
            verify_fingerprints,
            validate_sql: raw.validate_sql.unwrap_or(defaults.validate_sql),
        })
    }

    /// Save config to a project directory
    /// Preserves other settings that strata doesn't manage
    pub fn save(&self, project_dir: &Path) -> Result<()> {
        let path = project_dir.join(CONFIG_FILE);
        let mut settings = ConfigFile::read(&path)?;
        let relative = |p: &Path| {
            p.strip_prefix(project_dir)
                .unwrap_or(p)
                .to_string_lossy()
                .to_string()
        };

        settings.database = Some(relative(&self.database));
        settings.migrations_dir = Some(relative(&self.migrations_dir));
        settings.manifest = Some(relative(&self.manifest));
        settings.ledger_table = Some(self.ledger_table.clone());
        settings.lock_table = Some(self.lock_table.clone());
        settings.lock_strategy = Some(self.lock_strategy);
        settings.advisory_lock_key = Some(self.advisory_lock_key);
        settings.lock_name = Some(self.lock_name.clone());
        settings.lock_timeout_secs = Some(self.lock_timeout.as_secs());
        settings.lock_retry_millis = Some(self.lock_retry.as_millis() as u64);
        settings.use_lock = Some(self.use_lock);
        settings.verify_fingerprints = Some(self.verify_fingerprints);
        settings.validate_sql = Some(self.validate_sql);

        let content = serde_json::to_string_pretty(&settings)?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    pub fn lock_settings(&self) -> LockSettings {
        LockSettings {
            strategy: self.lock_strategy,
            advisory_key: self.advisory_lock_key,
            lock_name: self.lock_name.clone(),
            lock_table: self.lock_table.clone(),
            lock_file: None,
            retry_interval: self.lock_retry,
        }
    }

    pub fn executor_options(&self) -> ExecutorOptions {
        ExecutorOptions {
            use_lock: self.use_lock,
            verify_fingerprints: self.verify_fingerprints,
            lock_timeout: self.lock_timeout,
            validate_sql: self.validate_sql,
        }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    match std::env::var(name).ok().as_deref() {
        Some("true" | "1" | "yes" | "TRUE" | "YES") => Some(true),
        Some("false" | "0" | "no" | "FALSE" | "NO") => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_without_file() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::load(temp_dir.path()).unwrap();

        assert_eq!(config.database, temp_dir.path().join("strata.duckdb"));
        assert_eq!(
            config.manifest,
            temp_dir.path().join("migrations").join("versions.json")
        );
        assert_eq!(config.ledger_table, "schema_migrations");
        assert_eq!(config.lock_strategy, LockStrategyKind::Auto);
        assert_eq!(config.lock_retry, Duration::from_secs(1));
    }

    #[test]
    fn test_file_values_are_resolved() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(
            temp_dir.path().join(CONFIG_FILE),
            r#"{
                "migrationsDir": "db/changes",
                "lockStrategy": "file",
                "lockTimeoutSecs": 5,
                "lockRetryMillis": 250,
                "validateSql": true
            }"#,
        )
        .unwrap();

        let config = Config::load(temp_dir.path()).unwrap();
        assert_eq!(config.migrations_dir, temp_dir.path().join("db/changes"));
        assert_eq!(config.manifest, temp_dir.path().join("db/changes/versions.json"));
        assert_eq!(config.lock_strategy, LockStrategyKind::File);
        assert_eq!(config.lock_settings().retry_interval, Duration::from_millis(250));
        assert!(config.executor_options().validate_sql);
    }

    #[test]
    fn test_invalid_file_is_a_config_error() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join(CONFIG_FILE), r#"{"lockStrategy": "mutex"}"#).unwrap();
        assert!(matches!(Config::load(temp_dir.path()), Err(Error::Config(_))));
    }

    #[test]
    fn test_save_preserves_unknown_keys() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(
            temp_dir.path().join(CONFIG_FILE),
            r#"{"team": "platform", "ledgerTable": "applied_changes"}"#,
        )
        .unwrap();

        let mut config = Config::load(temp_dir.path()).unwrap();
        assert_eq!(config.ledger_table, "applied_changes");
        config.validate_sql = true;
        config.save(temp_dir.path()).unwrap();

        let raw: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(temp_dir.path().join(CONFIG_FILE)).unwrap(),
        )
        .unwrap();
        assert_eq!(raw["team"], "platform");
        assert_eq!(raw["validateSql"], true);
        assert_eq!(raw["migrationsDir"], "migrations");
    }
}
