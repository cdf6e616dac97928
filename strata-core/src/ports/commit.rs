//! Commit resolver port - maps a source-control reference to a version tag

use crate::domain::result::Result;

/// Source-control lookup used by the version planner
pub trait CommitResolver: Send + Sync {
    /// Nearest version tag reachable from `commit`, or `None` when the
    /// commit has no tagged ancestor
    fn nearest_version_tag(&self, commit: &str) -> Result<Option<String>>;
}
