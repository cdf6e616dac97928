//! Core domain entities
//!
//! Pure data structures with validation logic. The only I/O seam here is
//! `ChangeBody`, which dispatches to a `Database` handle it is given.

pub mod change;
pub mod ledger;
pub mod plan;
pub mod result;
pub mod version;

pub use change::{ChangeBody, ChangeDefinition, ChangeProcedure, TextBody};
pub use ledger::{ChangeState, ChangeStatus, LedgerEntry};
pub use plan::{DeploymentPlan, MigrationDelta, PlanAction, PlanActionKind};
pub use version::{SemVer, VersionManifest, VersionMapping, VersionRef};
