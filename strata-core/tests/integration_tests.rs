//! Integration tests for the migration lifecycle
//!
//! These tests drive the executor and planner against real DuckDB files and
//! change directories on disk.

use std::fs;
use std::path::Path;
use tempfile::TempDir;

use strata_core::adapters::duckdb::DuckDbDatabase;
use strata_core::config::{Config, CONFIG_FILE};
use strata_core::domain::{ChangeState, VersionRef};
use strata_core::ports::Database;
use strata_core::services::{
    ChangeRepository, ExecutorOptions, LedgerAdapter, MigrationExecutor,
};
use strata_core::{Error, StrataContext};

/// Write `<dir>/migration.sql` under `root`
fn write_change(root: &Path, dir: &str, up: &str, down: Option<&str>) {
    let path = root.join(dir);
    fs::create_dir_all(&path).unwrap();
    let mut content = format!("-- migrate:up\n{}\n", up);
    if let Some(down) = down {
        content.push_str(&format!("\n-- migrate:down\n{}\n", down));
    }
    fs::write(path.join("migration.sql"), content).unwrap();
}

/// The three-change fixture: 001_a, 002_b, 003_c, all reversible
fn write_abc(root: &Path) {
    write_change(root, "001_a", "CREATE TABLE a (id INTEGER);", Some("DROP TABLE a;"));
    write_change(root, "002_b", "CREATE TABLE b (id INTEGER);", Some("DROP TABLE b;"));
    write_change(root, "003_c", "CREATE TABLE c (id INTEGER);", Some("DROP TABLE c;"));
}

fn create_executor(temp_dir: &TempDir) -> MigrationExecutor {
    let migrations = temp_dir.path().join("migrations");
    write_abc(&migrations);
    let db = DuckDbDatabase::open(&temp_dir.path().join("test.duckdb")).unwrap();
    MigrationExecutor::new(Box::new(db), ChangeRepository::from_dir(migrations))
}

fn applied(executor: &MigrationExecutor) -> Vec<String> {
    executor.applied().unwrap().iter().map(|e| e.key()).collect()
}

fn table_exists(db: &dyn Database, table: &str) -> bool {
    let rows = db
        .query(
            "SELECT COUNT(*) FROM information_schema.tables WHERE table_name = ?",
            &[table.into()],
        )
        .unwrap();
    rows[0][0].as_i64() == Some(1)
}

// ============================================================================
// Executor Tests
// ============================================================================

#[test]
fn test_up_to_on_fresh_database() {
    let temp_dir = TempDir::new().unwrap();
    let executor = create_executor(&temp_dir);

    let report = executor.up_to("002_b").unwrap();

    assert_eq!(report.count(), 2);
    assert_eq!(report.changes, vec!["001_a", "002_b"]);
    assert!(!table_exists(executor.database(), "c"));
    let pending: Vec<_> = executor.pending().unwrap().iter().map(|c| c.key()).collect();
    assert_eq!(pending, vec!["003_c"]);
}

#[test]
fn test_pending_and_applied_partition_the_change_set() {
    let temp_dir = TempDir::new().unwrap();
    let executor = create_executor(&temp_dir);
    let all: Vec<_> = executor.repository().all().unwrap().iter().map(|c| c.key()).collect();

    for step in 0..=3 {
        if step > 0 {
            executor.up(Some(1)).unwrap();
        }
        let mut seen = applied(&executor);
        let pending: Vec<_> = executor.pending().unwrap().iter().map(|c| c.key()).collect();
        assert_eq!(seen.len(), step);
        assert!(pending.iter().all(|p| !seen.contains(p)));
        seen.extend(pending);
        seen.sort();
        assert_eq!(seen, all);
    }
}

#[test]
fn test_up_then_down_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let executor = create_executor(&temp_dir);
    executor.up(Some(1)).unwrap();
    let before = applied(&executor);

    let report = executor.up(None).unwrap();
    executor.down(report.count(), false).unwrap();

    assert_eq!(applied(&executor), before);
    assert!(table_exists(executor.database(), "a"));
    assert!(!table_exists(executor.database(), "b"));
}

#[test]
fn test_fresh_is_idempotent() {
    let temp_dir = TempDir::new().unwrap();
    let executor = create_executor(&temp_dir);
    executor.up(Some(2)).unwrap();

    executor.fresh().unwrap();
    let first = applied(&executor);
    executor.fresh().unwrap();

    assert_eq!(applied(&executor), first);
    assert_eq!(first, vec!["001_a", "002_b", "003_c"]);
}

#[test]
fn test_tampered_change_blocks_further_progress() {
    let temp_dir = TempDir::new().unwrap();
    let executor = create_executor(&temp_dir);
    executor.up(Some(1)).unwrap();

    // Edit an already-applied change on disk
    write_change(
        &temp_dir.path().join("migrations"),
        "001_a",
        "CREATE TABLE a (id BIGINT);",
        Some("DROP TABLE a;"),
    );

    let err = executor.up(None).unwrap_err();
    assert!(matches!(err, Error::Integrity { ref change, .. } if change == "001_a"));
    assert_eq!(applied(&executor), vec!["001_a"]);
    assert!(!table_exists(executor.database(), "b"));

    let status = executor.status().unwrap();
    assert!(status[0].drifted);
    assert_eq!(status[1].state, ChangeState::Pending);
}

#[test]
fn test_deleted_change_is_reported_missing() {
    let temp_dir = TempDir::new().unwrap();
    let executor = create_executor(&temp_dir);
    executor.up(None).unwrap();

    fs::remove_dir_all(temp_dir.path().join("migrations").join("003_c")).unwrap();

    let status = executor.status().unwrap();
    assert_eq!(status[2].state, ChangeState::Missing);
    assert!(matches!(executor.verify(), Err(Error::Integrity { .. })));
    assert!(matches!(executor.reset(false), Err(Error::Integrity { .. })));
    assert_eq!(applied(&executor).len(), 3);
}

#[test]
fn test_ledger_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();
    {
        let executor = create_executor(&temp_dir);
        executor.up(Some(2)).unwrap();
        executor.close().unwrap();
    }

    let db = DuckDbDatabase::open(&temp_dir.path().join("test.duckdb")).unwrap();
    let executor = MigrationExecutor::new(
        Box::new(db),
        ChangeRepository::from_dir(temp_dir.path().join("migrations")),
    );
    assert_eq!(applied(&executor), vec!["001_a", "002_b"]);
    assert_eq!(executor.verify().unwrap(), 2);
}

#[test]
fn test_legacy_ledger_is_adopted() {
    let temp_dir = TempDir::new().unwrap();
    let migrations = temp_dir.path().join("migrations");
    write_abc(&migrations);

    let db = DuckDbDatabase::open(&temp_dir.path().join("legacy.duckdb")).unwrap();
    db.execute_batch(
        "CREATE TABLE sys_migrations (migration_name VARCHAR PRIMARY KEY, applied_at TIMESTAMP DEFAULT current_timestamp);
         INSERT INTO sys_migrations (migration_name) VALUES ('001_a.sql');
         CREATE TABLE a (id INTEGER);",
    )
    .unwrap();

    let executor = MigrationExecutor::new(Box::new(db), ChangeRepository::from_dir(migrations))
        .with_ledger(LedgerAdapter::new("sys_migrations"));

    let report = executor.up(None).unwrap();
    assert_eq!(report.changes, vec!["002_b", "003_c"]);
    assert_eq!(applied(&executor), vec!["001_a", "002_b", "003_c"]);
    assert!(executor.applied().unwrap().iter().all(|e| e.fingerprint.is_none()));
}

#[test]
fn test_legacy_ledger_rollback_is_refused_without_side_effects() {
    let temp_dir = TempDir::new().unwrap();
    let migrations = temp_dir.path().join("migrations");
    write_abc(&migrations);

    let db = DuckDbDatabase::open(&temp_dir.path().join("legacy.duckdb")).unwrap();
    db.execute_batch(
        "CREATE TABLE sys_migrations (migration_name VARCHAR PRIMARY KEY, applied_at TIMESTAMP DEFAULT current_timestamp);",
    )
    .unwrap();

    let executor = MigrationExecutor::new(Box::new(db), ChangeRepository::from_dir(migrations))
        .with_ledger(LedgerAdapter::new("sys_migrations"));
    executor.up(None).unwrap();

    // Repeating the rollback must fail the same way, not re-run backward bodies
    for _ in 0..2 {
        let err = executor.down(1, false).unwrap_err();
        assert!(matches!(err, Error::LegacyLedger(ref table) if table == "sys_migrations"));
    }
    assert_eq!(applied(&executor), vec!["001_a", "002_b", "003_c"]);
    assert!(executor.pending().unwrap().is_empty());
    assert!(table_exists(executor.database(), "c"));
    assert!(!executor.is_locked().unwrap());
}

#[test]
fn test_unlocked_executor_runs_while_lock_is_held() {
    let temp_dir = TempDir::new().unwrap();
    let executor = create_executor(&temp_dir).with_options(ExecutorOptions {
        use_lock: false,
        ..ExecutorOptions::default()
    });

    executor.up(None).unwrap();
    assert!(!executor.is_locked().unwrap());
}

// ============================================================================
// Context + Planner Tests
// ============================================================================

#[test]
fn test_context_plan_and_execute() {
    let temp_dir = TempDir::new().unwrap();
    let project = temp_dir.path();
    write_abc(&project.join("migrations"));
    fs::write(project.join(CONFIG_FILE), r#"{"lockRetryMillis": 20}"#).unwrap();

    let context = StrataContext::open(project).unwrap();
    assert_eq!(context.config.database, project.join("strata.duckdb"));

    let ids = |list: &[&str]| list.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    context
        .planner
        .register("1.0.0", ids(&["001_a", "002_b"]), None, None)
        .unwrap();
    context
        .planner
        .register("1.1.0", ids(&["001_a", "002_b", "003_c"]), None, None)
        .unwrap();
    assert!(context
        .planner
        .validate(context.executor.repository())
        .unwrap()
        .is_empty());

    let v100 = VersionRef::Version("1.0.0".into());
    let v110 = VersionRef::Version("1.1.0".into());

    let install = context.planner.plan(None, &v100).unwrap();
    context.executor.execute_plan(&install, false).unwrap();
    context.planner.set_current("1.0.0").unwrap();
    assert_eq!(applied(&context.executor), vec!["001_a", "002_b"]);

    let upgrade = context.planner.plan(None, &v110).unwrap();
    assert_eq!(upgrade.summary, "1.0.0 -> 1.1.0: 0 to roll back, 1 to run");
    let report = context.executor.execute_plan(&upgrade, false).unwrap();
    assert_eq!(report.applied.changes, vec!["003_c"]);

    let downgrade = context.planner.plan(Some(&v110), &v100).unwrap();
    let report = context.executor.execute_plan(&downgrade, false).unwrap();
    assert_eq!(report.rolled_back.changes, vec!["003_c"]);
    assert_eq!(applied(&context.executor), vec!["001_a", "002_b"]);
}

#[test]
fn test_context_respects_config() {
    let temp_dir = TempDir::new().unwrap();
    let project = temp_dir.path();
    write_change(
        &project.join("db"),
        "001_bad",
        "CREATE TABLE (;",
        None,
    );
    fs::write(
        project.join(CONFIG_FILE),
        r#"{"migrationsDir": "db", "database": "app.duckdb", "validateSql": true, "ledgerTable": "applied_changes"}"#,
    )
    .unwrap();

    let config = Config::load(project).unwrap();
    assert_eq!(config.migrations_dir, project.join("db"));

    let context = StrataContext::open(project).unwrap();
    let err = context.executor.up(None).unwrap_err();
    assert!(matches!(err, Error::InvalidDefinition { .. }));
    assert!(project.join("app.duckdb").exists());
    assert!(table_exists(context.executor.database(), "applied_changes"));
}
