//! Ledger entries and per-change status

use serde::{Deserialize, Serialize};

/// One applied change as recorded in the ledger table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: String,
    pub name: String,
    /// Absent for ledgers written in the legacy layout
    pub fingerprint: Option<String>,
    /// RFC 3339 timestamp, empty when the ledger layout doesn't track it
    pub applied_at: String,
}

impl LedgerEntry {
    /// The `<id>_<name>` key, or the bare id when the name is unknown
    pub fn key(&self) -> String {
        if self.name.is_empty() {
            self.id.clone()
        } else {
            format!("{}_{}", self.id, self.name)
        }
    }
}

/// Where a change currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeState {
    Pending,
    Applied,
    /// Recorded in the ledger but no longer resolvable on storage
    Missing,
}

/// A row of the status view combining repository and ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeStatus {
    pub id: String,
    pub name: String,
    pub state: ChangeState,
    pub applied_at: Option<String>,
    /// Stored fingerprint differs from the current content
    pub drifted: bool,
    pub reversible: bool,
}
