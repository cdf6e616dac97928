//! Migration executor - moves the database between change-set states
//!
//! Every mutating operation follows the same shape:
//! 1. Take the migration lock (unless locking is disabled)
//! 2. Load the change set and the ledger
//! 3. Verify fingerprints of applied changes before any forward work
//! 4. Run each change in its own transaction, recording or removing its
//!    ledger entry inside that same transaction
//!
//! A failure stops the batch. Changes that already committed stay applied.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::domain::result::{Error, Result};
use crate::domain::{
    ChangeBody, ChangeDefinition, ChangeState, ChangeStatus, DeploymentPlan, LedgerEntry,
    PlanActionKind,
};
use crate::ports::Database;
use crate::services::ledger::{LedgerAdapter, LedgerLayout};
use crate::services::lock::{LockManager, LockOutcome};
use crate::services::repository::ChangeRepository;
use crate::services::sql::validate_sql_syntax;

/// Default time to wait for the migration lock
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(60);

/// Behaviour switches for an executor
#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    /// Guard mutating operations with the migration lock
    pub use_lock: bool,
    /// Check applied fingerprints before forward work
    pub verify_fingerprints: bool,
    pub lock_timeout: Duration,
    /// Parse text bodies before running any of them
    pub validate_sql: bool,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            use_lock: true,
            verify_fingerprints: true,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            validate_sql: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => f.write_str("up"),
            Direction::Down => f.write_str("down"),
        }
    }
}

/// Identity of the change a hook is called for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookContext {
    pub id: String,
    pub name: String,
    pub direction: Direction,
}

impl HookContext {
    fn new(change: &ChangeDefinition, direction: Direction) -> Self {
        Self {
            id: change.id.clone(),
            name: change.name.clone(),
            direction,
        }
    }
}

/// Extension point around each change
///
/// An error from `before` aborts the batch before the change's transaction
/// starts. An error from `after` aborts the batch after the change committed.
pub trait MigrationHook: Send + Sync {
    fn before(&self, _ctx: &HookContext) -> Result<()> {
        Ok(())
    }

    fn after(&self, _ctx: &HookContext) -> Result<()> {
        Ok(())
    }
}

/// What one executor call did
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationReport {
    pub direction: Direction,
    /// `<id>_<name>` keys, in execution order
    pub changes: Vec<String>,
    /// Irreversible changes passed over under `force`
    pub skipped: Vec<String>,
}

impl MigrationReport {
    fn new(direction: Direction) -> Self {
        Self {
            direction,
            changes: Vec::new(),
            skipped: Vec::new(),
        }
    }

    pub fn count(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.skipped.is_empty()
    }
}

/// Both halves of a reset-then-apply cycle, or of an executed plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshReport {
    pub rolled_back: MigrationReport,
    pub applied: MigrationReport,
}

impl Default for RefreshReport {
    fn default() -> Self {
        Self {
            rolled_back: MigrationReport::new(Direction::Down),
            applied: MigrationReport::new(Direction::Up),
        }
    }
}

/// The executor state machine
pub struct MigrationExecutor {
    db: Box<dyn Database + Send>,
    repository: ChangeRepository,
    ledger: LedgerAdapter,
    lock: LockManager,
    options: ExecutorOptions,
    hooks: Vec<Arc<dyn MigrationHook>>,
}

/// Change set and ledger as read at the start of an operation
struct Snapshot {
    layout: LedgerLayout,
    changes: Vec<ChangeDefinition>,
    entries: Vec<LedgerEntry>,
}

impl Snapshot {
    fn applied_ids(&self) -> HashSet<&str> {
        self.entries.iter().map(|e| e.id.as_str()).collect()
    }

    fn pending(&self) -> Vec<ChangeDefinition> {
        let applied = self.applied_ids();
        self.changes
            .iter()
            .filter(|c| !applied.contains(c.id.as_str()))
            .cloned()
            .collect()
    }

    /// Resolve applied entries to definitions, in the order given
    fn resolve<'a>(&self, entries: impl IntoIterator<Item = &'a LedgerEntry>) -> Result<Vec<ChangeDefinition>> {
        let by_id: HashMap<&str, &ChangeDefinition> =
            self.changes.iter().map(|c| (c.id.as_str(), c)).collect();
        entries
            .into_iter()
            .map(|entry| {
                by_id.get(entry.id.as_str()).map(|c| (*c).clone()).ok_or_else(|| {
                    Error::integrity(
                        entry.key(),
                        "recorded in the ledger but no longer present in the repository",
                    )
                })
            })
            .collect()
    }
}

impl MigrationExecutor {
    pub fn new(db: Box<dyn Database + Send>, repository: ChangeRepository) -> Self {
        Self {
            db,
            repository,
            ledger: LedgerAdapter::default(),
            lock: LockManager::new(Default::default()),
            options: ExecutorOptions::default(),
            hooks: Vec::new(),
        }
    }

    pub fn with_ledger(mut self, ledger: LedgerAdapter) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn with_lock_manager(mut self, lock: LockManager) -> Self {
        self.lock = lock;
        self
    }

    pub fn with_options(mut self, options: ExecutorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_hook(mut self, hook: Arc<dyn MigrationHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn add_hook(&mut self, hook: Arc<dyn MigrationHook>) -> &mut Self {
        self.hooks.push(hook);
        self
    }

    pub fn repository(&self) -> &ChangeRepository {
        &self.repository
    }

    pub fn repository_mut(&mut self) -> &mut ChangeRepository {
        &mut self.repository
    }

    pub fn ledger(&self) -> &LedgerAdapter {
        &self.ledger
    }

    pub fn options(&self) -> &ExecutorOptions {
        &self.options
    }

    pub fn database(&self) -> &dyn Database {
        &*self.db
    }

    /// Close the underlying handle
    pub fn close(self) -> Result<()> {
        self.db.disconnect()
    }

    // ----- read views -------------------------------------------------------

    /// Changes not yet applied, ascending
    pub fn pending(&self) -> Result<Vec<ChangeDefinition>> {
        let applied: HashSet<String> = self
            .ledger
            .entries(self.database())?
            .into_iter()
            .map(|e| e.id)
            .collect();
        self.repository.pending(&applied)
    }

    /// Ledger entries, ascending
    pub fn applied(&self) -> Result<Vec<LedgerEntry>> {
        self.ledger.entries(self.database())
    }

    /// Per-change view combining the repository and the ledger
    pub fn status(&self) -> Result<Vec<ChangeStatus>> {
        let snapshot = self.snapshot(false)?;
        let entries: HashMap<&str, &LedgerEntry> =
            snapshot.entries.iter().map(|e| (e.id.as_str(), e)).collect();

        let mut rows: Vec<ChangeStatus> = snapshot
            .changes
            .iter()
            .map(|change| match entries.get(change.id.as_str()) {
                Some(entry) => ChangeStatus {
                    id: change.id.clone(),
                    name: change.name.clone(),
                    state: ChangeState::Applied,
                    applied_at: Some(entry.applied_at.clone()).filter(|s| !s.is_empty()),
                    drifted: entry
                        .fingerprint
                        .as_deref()
                        .is_some_and(|stored| stored != change.fingerprint),
                    reversible: change.body.is_reversible(),
                },
                None => ChangeStatus {
                    id: change.id.clone(),
                    name: change.name.clone(),
                    state: ChangeState::Pending,
                    applied_at: None,
                    drifted: false,
                    reversible: change.body.is_reversible(),
                },
            })
            .collect();

        let known: HashSet<&str> = snapshot.changes.iter().map(|c| c.id.as_str()).collect();
        rows.extend(
            snapshot
                .entries
                .iter()
                .filter(|e| !known.contains(e.id.as_str()))
                .map(|entry| ChangeStatus {
                    id: entry.id.clone(),
                    name: entry.name.clone(),
                    state: ChangeState::Missing,
                    applied_at: Some(entry.applied_at.clone()).filter(|s| !s.is_empty()),
                    drifted: false,
                    reversible: false,
                }),
        );
        rows.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(rows)
    }

    /// Run the integrity check without changing anything
    ///
    /// Returns the number of ledger entries checked.
    pub fn verify(&self) -> Result<usize> {
        let snapshot = self.snapshot(false)?;
        Self::check_integrity(&snapshot)?;
        Ok(snapshot.entries.len())
    }

    pub fn is_locked(&self) -> Result<bool> {
        self.lock.is_locked(self.database())
    }

    /// Clear the migration lock whoever holds it
    pub fn force_unlock(&self) -> Result<()> {
        self.lock.force_release(self.database())
    }

    // ----- forward ----------------------------------------------------------

    /// Apply the first `steps` pending changes, or all of them
    pub fn up(&self, steps: Option<usize>) -> Result<MigrationReport> {
        self.locked(|| self.up_unlocked(steps))
    }

    /// Apply pending changes up to and including `target`
    pub fn up_to(&self, target: &str) -> Result<MigrationReport> {
        self.locked(|| {
            let snapshot = self.snapshot(true)?;
            self.verify_before_forward(&snapshot)?;

            let pending = snapshot.pending();
            let boundary = pending
                .iter()
                .find(|c| c.matches(target))
                .map(|c| c.id.clone())
                .ok_or_else(|| Error::not_found(format!("pending change {}", target)))?;

            let batch: Vec<_> = pending.into_iter().filter(|c| c.id <= boundary).collect();
            self.apply_batch(&snapshot.layout, &batch)
        })
    }

    /// Like `up`, but reports `Skipped` instead of waiting when the lock is
    /// held elsewhere
    pub fn up_if_not_locked(&self, steps: Option<usize>) -> Result<LockOutcome<MigrationReport>> {
        if !self.options.use_lock {
            return self.up_unlocked(steps).map(LockOutcome::Completed);
        }
        self.lock.try_lock(self.database(), || self.up_unlocked(steps))
    }

    /// Apply exactly one pending change
    pub fn apply_change(&self, target: &str) -> Result<MigrationReport> {
        self.locked(|| {
            let snapshot = self.snapshot(true)?;
            self.verify_before_forward(&snapshot)?;
            let change = Self::find_pending(&snapshot, target)?;
            self.apply_batch(&snapshot.layout, &[change])
        })
    }

    fn up_unlocked(&self, steps: Option<usize>) -> Result<MigrationReport> {
        let snapshot = self.snapshot(true)?;
        self.verify_before_forward(&snapshot)?;

        let mut batch = snapshot.pending();
        if let Some(steps) = steps {
            batch.truncate(steps);
        }
        self.apply_batch(&snapshot.layout, &batch)
    }

    // ----- backward ---------------------------------------------------------

    /// Roll back the `steps` most recently applied changes
    pub fn down(&self, steps: usize, force: bool) -> Result<MigrationReport> {
        self.locked(|| {
            let snapshot = self.snapshot(false)?;
            let batch = snapshot.resolve(snapshot.entries.iter().rev().take(steps))?;
            self.rollback_batch(&snapshot.layout, &batch, force)
        })
    }

    /// Roll back applied changes down to and including `target`
    pub fn down_to(&self, target: &str, force: bool) -> Result<MigrationReport> {
        self.locked(|| self.down_to_unlocked(target, force))
    }

    /// Roll back every applied change, most recent first
    pub fn reset(&self, force: bool) -> Result<MigrationReport> {
        self.locked(|| self.reset_unlocked(force))
    }

    /// Roll back exactly one applied change
    pub fn rollback_change(&self, target: &str, force: bool) -> Result<MigrationReport> {
        self.locked(|| {
            let snapshot = self.snapshot(false)?;
            let entry = snapshot
                .entries
                .iter()
                .find(|e| e.id == target || e.key() == target)
                .ok_or_else(|| Error::not_found(format!("applied change {}", target)))?;
            let batch = snapshot.resolve([entry])?;
            self.rollback_batch(&snapshot.layout, &batch, force)
        })
    }

    fn down_to_unlocked(&self, target: &str, force: bool) -> Result<MigrationReport> {
        let snapshot = self.snapshot(false)?;
        let boundary = snapshot
            .entries
            .iter()
            .find(|e| e.id == target || e.key() == target)
            .map(|e| e.id.clone())
            .ok_or_else(|| Error::not_found(format!("applied change {}", target)))?;

        let batch = snapshot.resolve(snapshot.entries.iter().rev().filter(|e| e.id >= boundary))?;
        self.rollback_batch(&snapshot.layout, &batch, force)
    }

    fn reset_unlocked(&self, force: bool) -> Result<MigrationReport> {
        let snapshot = self.snapshot(false)?;
        let batch = snapshot.resolve(snapshot.entries.iter().rev())?;
        self.rollback_batch(&snapshot.layout, &batch, force)
    }

    // ----- composite --------------------------------------------------------

    /// Reset, then apply everything
    pub fn fresh(&self) -> Result<MigrationReport> {
        self.refresh().map(|report| report.applied)
    }

    /// Reset, then apply everything, reporting both halves
    pub fn refresh(&self) -> Result<RefreshReport> {
        self.locked(|| {
            let rolled_back = self.reset_unlocked(false)?;
            let applied = self.up_unlocked(None)?;
            Ok(RefreshReport {
                rolled_back,
                applied,
            })
        })
    }

    /// Run a deployment plan under a single lock hold
    ///
    /// Steps that are already satisfied (rolling back a change that is not
    /// applied, running one that is) are recorded as skipped.
    pub fn execute_plan(&self, plan: &DeploymentPlan, force: bool) -> Result<RefreshReport> {
        self.locked(|| {
            let mut report = RefreshReport::default();
            if plan.is_empty() {
                return Ok(report);
            }

            let snapshot = self.snapshot(true)?;
            if plan.runs().next().is_some() {
                self.verify_before_forward(&snapshot)?;
            }
            for action in &plan.actions {
                let known = snapshot.changes.iter().any(|c| c.matches(&action.change_id))
                    || snapshot
                        .entries
                        .iter()
                        .any(|e| e.id == action.change_id || e.key() == action.change_id);
                if !known {
                    return Err(Error::not_found(format!("change {}", action.change_id)));
                }
            }

            info!(summary = %plan.summary, "executing deployment plan");
            for action in &plan.actions {
                // Re-read per step: earlier steps changed the ledger
                let step = self.snapshot(false)?;
                match action.action {
                    PlanActionKind::Rollback => {
                        let Some(entry) = step
                            .entries
                            .iter()
                            .find(|e| e.id == action.change_id || e.key() == action.change_id)
                        else {
                            report.rolled_back.skipped.push(action.change_id.clone());
                            continue;
                        };
                        let batch = step.resolve([entry])?;
                        let done = self.rollback_batch(&step.layout, &batch, force)?;
                        report.rolled_back.changes.extend(done.changes);
                        report.rolled_back.skipped.extend(done.skipped);
                    }
                    PlanActionKind::Run => match Self::find_pending(&step, &action.change_id) {
                        Ok(change) => {
                            let done = self.apply_batch(&step.layout, &[change])?;
                            report.applied.changes.extend(done.changes);
                        }
                        Err(_) => report.applied.skipped.push(action.change_id.clone()),
                    },
                }
            }
            Ok(report)
        })
    }

    // ----- internals --------------------------------------------------------

    fn locked<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        if !self.options.use_lock {
            return f();
        }
        self.lock
            .with_lock(self.database(), self.options.lock_timeout, f)
    }

    /// Load the change set and ledger; `create` makes sure the ledger exists
    fn snapshot(&self, create: bool) -> Result<Snapshot> {
        let db = self.database();
        let layout = if create {
            self.ledger.ensure(db)?
        } else {
            self.ledger.detect(db)?
        };
        let changes = self.repository.all()?;
        let entries = self.ledger.entries_for(db, &layout)?;
        Ok(Snapshot {
            layout,
            changes,
            entries,
        })
    }

    fn find_pending(snapshot: &Snapshot, target: &str) -> Result<ChangeDefinition> {
        snapshot
            .pending()
            .into_iter()
            .find(|c| c.matches(target))
            .ok_or_else(|| Error::not_found(format!("pending change {}", target)))
    }

    fn verify_before_forward(&self, snapshot: &Snapshot) -> Result<()> {
        if self.options.verify_fingerprints {
            Self::check_integrity(snapshot)
        } else {
            debug!("fingerprint verification disabled");
            Ok(())
        }
    }

    /// Every ledger entry must resolve, and every tracked fingerprint must
    /// match the stored content. Any drift is fatal, whether or not the
    /// drifted change is part of the requested work.
    fn check_integrity(snapshot: &Snapshot) -> Result<()> {
        let resolved = snapshot.resolve(&snapshot.entries)?;
        for (entry, change) in snapshot.entries.iter().zip(&resolved) {
            let Some(stored) = entry.fingerprint.as_deref() else {
                continue;
            };
            if stored != change.fingerprint {
                warn!(change = %change.key(), "fingerprint drift detected");
                return Err(Error::integrity(
                    change.key(),
                    format!(
                        "content changed after it was applied (recorded {}, now {})",
                        short(stored),
                        short(&change.fingerprint)
                    ),
                ));
            }
        }
        Ok(())
    }

    fn validate_batch(&self, batch: &[ChangeDefinition], direction: Direction) -> Result<()> {
        if !self.options.validate_sql || batch.is_empty() {
            return Ok(());
        }
        let engine = self.database().engine()?;
        for change in batch {
            let ChangeBody::Text(text) = &change.body else {
                continue;
            };
            let sql = match direction {
                Direction::Up => Some(text.forward.as_str()),
                Direction::Down => text.backward.as_deref(),
            };
            if let Some(sql) = sql {
                validate_sql_syntax(sql, engine).map_err(|reason| {
                    Error::invalid_definition(change.origin.display().to_string(), reason)
                })?;
            }
        }
        Ok(())
    }

    fn apply_batch(&self, layout: &LedgerLayout, batch: &[ChangeDefinition]) -> Result<MigrationReport> {
        let mut report = MigrationReport::new(Direction::Up);
        if batch.is_empty() {
            debug!("nothing to apply");
            return Ok(report);
        }
        self.validate_batch(batch, Direction::Up)?;

        for change in batch {
            let ctx = HookContext::new(change, Direction::Up);
            self.run_before_hooks(&ctx)?;

            info!(change = %change.key(), "applying change");
            let started = Instant::now();
            self.db
                .transaction(&mut |tx| {
                    change.body.run_forward(tx)?;
                    self.ledger.record(tx, layout, change)
                })
                .map_err(|e| transaction_error(change, e))?;
            debug!(
                change = %change.key(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "change applied"
            );

            self.run_after_hooks(&ctx)?;
            report.changes.push(change.key());
        }
        Ok(report)
    }

    fn rollback_batch(
        &self,
        layout: &LedgerLayout,
        batch: &[ChangeDefinition],
        force: bool,
    ) -> Result<MigrationReport> {
        let mut report = MigrationReport::new(Direction::Down);
        if batch.is_empty() {
            debug!("nothing to roll back");
            return Ok(report);
        }
        // Legacy ledgers only know how to append; removing entries would
        // leave reverted changes listed as applied
        if let LedgerLayout::Legacy { .. } = layout {
            return Err(Error::LegacyLedger(self.ledger.table().to_string()));
        }

        if !force {
            if let Some(change) = batch.iter().find(|c| !c.body.is_reversible()) {
                return Err(Error::Irreversible(change.key()));
            }
        }
        self.validate_batch(batch, Direction::Down)?;

        for change in batch {
            if !change.body.is_reversible() {
                info!(change = %change.key(), "no backward body, skipping under force");
                report.skipped.push(change.key());
                continue;
            }

            let ctx = HookContext::new(change, Direction::Down);
            self.run_before_hooks(&ctx)?;

            info!(change = %change.key(), "rolling back change");
            self.db
                .transaction(&mut |tx| {
                    change.body.run_backward(tx)?;
                    self.ledger.remove(tx, layout, change)
                })
                .map_err(|e| transaction_error(change, e))?;

            self.run_after_hooks(&ctx)?;
            report.changes.push(change.key());
        }
        Ok(report)
    }

    fn run_before_hooks(&self, ctx: &HookContext) -> Result<()> {
        self.hooks.iter().try_for_each(|hook| hook.before(ctx))
    }

    fn run_after_hooks(&self, ctx: &HookContext) -> Result<()> {
        self.hooks.iter().try_for_each(|hook| hook.after(ctx))
    }
}

fn transaction_error(change: &ChangeDefinition, err: Error) -> Error {
    warn!(change = %change.key(), error = %err, "change failed, transaction rolled back");
    Error::Transaction {
        change: change.key(),
        message: err.to_string(),
    }
}

fn short(fingerprint: &str) -> &str {
    fingerprint.get(..12).unwrap_or(fingerprint)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::duckdb::DuckDbDatabase;
    use crate::domain::{ChangeProcedure, MigrationDelta};
    use std::sync::Mutex;

    fn repo() -> ChangeRepository {
        ChangeRepository::embedded(&[
            ("001_a.sql", "-- migrate:up\nCREATE TABLE a (id INTEGER);\n-- migrate:down\nDROP TABLE a;"),
            ("002_b.sql", "-- migrate:up\nCREATE TABLE b (id INTEGER);\n-- migrate:down\nDROP TABLE b;"),
            ("003_c.sql", "-- migrate:up\nCREATE TABLE c (id INTEGER);\n-- migrate:down\nDROP TABLE c;"),
        ])
    }

    fn executor(repository: ChangeRepository) -> MigrationExecutor {
        let db = DuckDbDatabase::open_in_memory().unwrap();
        MigrationExecutor::new(Box::new(db), repository)
    }

    fn applied_keys(executor: &MigrationExecutor) -> Vec<String> {
        executor.applied().unwrap().iter().map(|e| e.key()).collect()
    }

    fn table_exists(executor: &MigrationExecutor, table: &str) -> bool {
        let rows = executor
            .database()
            .query(
                "SELECT COUNT(*) FROM information_schema.tables WHERE table_name = ?",
                &[table.into()],
            )
            .unwrap();
        rows[0][0].as_i64() == Some(1)
    }

    #[derive(Default)]
    struct RecordingHook {
        calls: Mutex<Vec<String>>,
    }

    impl MigrationHook for RecordingHook {
        fn before(&self, ctx: &HookContext) -> Result<()> {
            self.calls.lock().unwrap().push(format!("before {} {}", ctx.direction, ctx.id));
            Ok(())
        }

        fn after(&self, ctx: &HookContext) -> Result<()> {
            self.calls.lock().unwrap().push(format!("after {} {}", ctx.direction, ctx.id));
            Ok(())
        }
    }

    #[test]
    fn test_up_applies_in_order_and_is_idempotent() {
        let executor = executor(repo());

        let report = executor.up(None).unwrap();
        assert_eq!(report.changes, vec!["001_a", "002_b", "003_c"]);
        assert_eq!(applied_keys(&executor), vec!["001_a", "002_b", "003_c"]);
        assert!(table_exists(&executor, "c"));

        assert!(executor.up(None).unwrap().is_empty());
        assert!(executor.pending().unwrap().is_empty());
    }

    #[test]
    fn test_up_with_steps() {
        let executor = executor(repo());
        assert_eq!(executor.up(Some(2)).unwrap().count(), 2);
        let pending: Vec<_> = executor.pending().unwrap().iter().map(|c| c.key()).collect();
        assert_eq!(pending, vec!["003_c"]);
    }

    #[test]
    fn test_up_to_stops_at_target() {
        let executor = executor(repo());
        let report = executor.up_to("002_b").unwrap();
        assert_eq!(report.count(), 2);
        assert!(!table_exists(&executor, "c"));

        let err = executor.up_to("002").unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_down_to_is_inclusive() {
        let executor = executor(repo());
        executor.up(None).unwrap();

        let report = executor.down_to("002", false).unwrap();
        assert_eq!(report.changes, vec!["003_c", "002_b"]);
        assert_eq!(applied_keys(&executor), vec!["001_a"]);
        assert!(matches!(executor.down_to("003_c", false), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_failed_change_rolls_back_and_keeps_prior_progress() {
        let executor = executor(ChangeRepository::embedded(&[
            ("001_a.sql", "-- migrate:up\nCREATE TABLE a (id INTEGER);"),
            ("002_b.sql", "-- migrate:up\nCREATE TABLE b (id INTEGER);\nINSERT INTO missing VALUES (1);"),
            ("003_c.sql", "-- migrate:up\nCREATE TABLE c (id INTEGER);"),
        ]));

        let err = executor.up(None).unwrap_err();
        assert!(matches!(err, Error::Transaction { ref change, .. } if change == "002_b"));
        assert_eq!(applied_keys(&executor), vec!["001_a"]);
        assert!(!table_exists(&executor, "b"));
        assert!(!table_exists(&executor, "c"));
    }

    #[test]
    fn test_irreversible_change_needs_force() {
        let executor = executor(ChangeRepository::embedded(&[
            ("001_a.sql", "-- migrate:up\nCREATE TABLE a (id INTEGER);\n-- migrate:down\nDROP TABLE a;"),
            ("002_b.sql", "-- migrate:up\nCREATE TABLE b (id INTEGER);"),
        ]));
        executor.up(None).unwrap();

        let err = executor.reset(false).unwrap_err();
        assert!(matches!(err, Error::Irreversible(ref key) if key == "002_b"));
        assert_eq!(applied_keys(&executor).len(), 2);

        let report = executor.reset(true).unwrap();
        assert_eq!(report.changes, vec!["001_a"]);
        assert_eq!(report.skipped, vec!["002_b"]);
        assert_eq!(applied_keys(&executor), vec!["002_b"]);
    }

    #[test]
    fn test_legacy_ledger_refuses_rollbacks() {
        let hook = Arc::new(RecordingHook::default());
        let executor = executor(repo())
            .with_ledger(LedgerAdapter::new("sys_migrations"))
            .with_hook(hook.clone());
        executor
            .database()
            .execute_batch("CREATE TABLE sys_migrations (migration_name VARCHAR PRIMARY KEY)")
            .unwrap();
        executor.up(None).unwrap();
        hook.calls.lock().unwrap().clear();

        for result in [
            executor.down(1, false),
            executor.reset(true),
            executor.rollback_change("003_c", false),
        ] {
            assert!(matches!(result, Err(Error::LegacyLedger(ref table)) if table == "sys_migrations"));
        }
        assert_eq!(applied_keys(&executor), vec!["001_a", "002_b", "003_c"]);
        assert!(table_exists(&executor, "c"));
        assert!(hook.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_hooks_fire_in_both_directions() {
        let hook = Arc::new(RecordingHook::default());
        let executor = executor(repo()).with_hook(hook.clone());

        executor.up(Some(1)).unwrap();
        executor.down(1, false).unwrap();

        assert_eq!(
            *hook.calls.lock().unwrap(),
            vec!["before up 001", "after up 001", "before down 001", "after down 001"]
        );
    }

    #[test]
    fn test_failing_before_hook_aborts_before_transaction() {
        struct Veto;
        impl MigrationHook for Veto {
            fn before(&self, ctx: &HookContext) -> Result<()> {
                if ctx.id == "002" {
                    return Err(Error::database("vetoed"));
                }
                Ok(())
            }
        }

        let executor = executor(repo()).with_hook(Arc::new(Veto));
        assert!(executor.up(None).is_err());
        assert_eq!(applied_keys(&executor), vec!["001_a"]);
        assert!(!table_exists(&executor, "b"));
    }

    #[test]
    fn test_callable_body_runs_against_transaction() {
        struct Seed;
        impl ChangeProcedure for Seed {
            fn up(&self, db: &dyn Database) -> Result<()> {
                db.execute_batch("CREATE TABLE seeded (id INTEGER); INSERT INTO seeded VALUES (1)")
            }
            fn down(&self, db: &dyn Database) -> Result<()> {
                db.execute_batch("DROP TABLE seeded")
            }
            fn source(&self) -> &str {
                "seed v1"
            }
        }

        let mut repository = repo();
        repository.register_procedure("004_seed", Arc::new(Seed));
        let executor = executor(repository);

        executor.up(None).unwrap();
        assert!(table_exists(&executor, "seeded"));
        executor.rollback_change("004", false).unwrap();
        assert!(!table_exists(&executor, "seeded"));
        assert!(table_exists(&executor, "c"));
    }

    #[test]
    fn test_refresh_reports_both_halves() {
        let executor = executor(repo());
        executor.up(Some(2)).unwrap();

        let report = executor.refresh().unwrap();
        assert_eq!(report.rolled_back.changes, vec!["002_b", "001_a"]);
        assert_eq!(report.applied.changes, vec!["001_a", "002_b", "003_c"]);
    }

    #[test]
    fn test_status_flags_drift_and_missing() {
        let executor = executor(repo());
        executor.up(Some(2)).unwrap();
        executor
            .database()
            .execute_batch(
                "UPDATE schema_migrations SET fingerprint = 'stale' WHERE id = '001';
                 INSERT INTO schema_migrations VALUES ('000', 'gone', 'x', '2024-01-01T00:00:00Z');",
            )
            .unwrap();

        let status = executor.status().unwrap();
        let states: Vec<_> = status.iter().map(|s| (s.id.as_str(), s.state, s.drifted)).collect();
        assert_eq!(
            states,
            vec![
                ("000", ChangeState::Missing, false),
                ("001", ChangeState::Applied, true),
                ("002", ChangeState::Applied, false),
                ("003", ChangeState::Pending, false),
            ]
        );
        assert!(matches!(executor.verify(), Err(Error::Integrity { .. })));
    }

    #[test]
    fn test_drift_blocks_forward_work_unless_disabled() {
        let executor = executor(repo());
        executor.up(Some(1)).unwrap();
        executor
            .database()
            .execute_batch("UPDATE schema_migrations SET fingerprint = 'stale'")
            .unwrap();

        let err = executor.up(None).unwrap_err();
        assert!(matches!(err, Error::Integrity { ref change, .. } if change == "001_a"));
        assert_eq!(applied_keys(&executor), vec!["001_a"]);

        let executor = executor.with_options(ExecutorOptions {
            verify_fingerprints: false,
            ..ExecutorOptions::default()
        });
        assert_eq!(executor.up(None).unwrap().count(), 2);
    }

    #[test]
    fn test_validate_sql_rejects_before_any_mutation() {
        let executor = executor(ChangeRepository::embedded(&[
            ("001_a.sql", "-- migrate:up\nCREATE TABLE a (id INTEGER);"),
            ("002_b.sql", "-- migrate:up\nCREATE TABLE (;"),
        ]))
        .with_options(ExecutorOptions {
            validate_sql: true,
            ..ExecutorOptions::default()
        });

        let err = executor.up(None).unwrap_err();
        assert!(matches!(err, Error::InvalidDefinition { .. }));
        assert!(applied_keys(&executor).is_empty());
    }

    #[test]
    fn test_execute_plan_skips_satisfied_steps() {
        let executor = executor(repo());
        executor.up_to("002_b").unwrap();

        let delta = MigrationDelta {
            apply: vec!["002_b".into(), "003_c".into()],
            rollback: vec!["001_a".into()],
        };
        let plan = DeploymentPlan::from_delta(Some("1.0.0".into()), "2.0.0".into(), &delta);
        let report = executor.execute_plan(&plan, false).unwrap();

        assert_eq!(report.rolled_back.changes, vec!["001_a"]);
        assert_eq!(report.applied.changes, vec!["003_c"]);
        assert_eq!(report.applied.skipped, vec!["002_b"]);
        assert_eq!(applied_keys(&executor), vec!["002_b", "003_c"]);
    }

    #[test]
    fn test_unknown_plan_step_fails_before_mutation() {
        let executor = executor(repo());
        let delta = MigrationDelta {
            apply: vec!["001_a".into(), "999_nope".into()],
            rollback: vec![],
        };
        let plan = DeploymentPlan::from_delta(None, "1.0.0".into(), &delta);

        assert!(matches!(executor.execute_plan(&plan, false), Err(Error::NotFound(_))));
        assert!(applied_keys(&executor).is_empty());
    }

    #[test]
    fn test_up_if_not_locked_skips_when_held() {
        let executor = executor(repo());
        let admin = LockManager::new(Default::default());
        assert!(admin.try_acquire(executor.database()).unwrap());

        let outcome = executor.up_if_not_locked(None).unwrap();
        assert!(outcome.is_skipped());
        assert!(executor.is_locked().unwrap());

        executor.force_unlock().unwrap();
        let outcome = executor.up_if_not_locked(None).unwrap();
        assert_eq!(outcome.completed().map(|r| r.count()), Some(3));
        assert!(!executor.is_locked().unwrap());
    }
}
