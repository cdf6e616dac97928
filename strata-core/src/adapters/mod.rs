//! Adapter implementations
//!
//! Adapters implement the port traits with concrete technologies:
//! - DuckDB for the Database port
//! - The git CLI for the CommitResolver port

pub mod duckdb;
pub mod git;
