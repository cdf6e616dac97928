//! Port definitions (hexagonal architecture)
//!
//! Ports define the interfaces for external dependencies. The migration core
//! depends only on these traits, not on concrete implementations.

mod commit;
mod database;

pub use commit::CommitResolver;
pub use database::{Database, Engine, Row, Value};
