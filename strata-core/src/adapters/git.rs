//! Git implementation of the commit resolver port

use std::path::PathBuf;
use std::process::Command;

use tracing::debug;

use crate::domain::result::{Error, Result};
use crate::ports::CommitResolver;

/// Resolves commits by shelling out to the `git` binary
pub struct GitCommitResolver {
    repo_dir: PathBuf,
}

impl GitCommitResolver {
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
        }
    }
}

impl CommitResolver for GitCommitResolver {
    fn nearest_version_tag(&self, commit: &str) -> Result<Option<String>> {
        let output = Command::new("git")
            .args(["describe", "--tags", "--abbrev=0", commit])
            .current_dir(&self.repo_dir)
            .output()
            .map_err(|e| Error::version(format!("git command not available: {}", e)))?;

        if output.status.success() {
            let tag = String::from_utf8_lossy(&output.stdout).trim().to_string();
            debug!(commit, tag = %tag, "resolved commit to tag");
            return Ok(if tag.is_empty() { None } else { Some(tag) });
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("No names found") || stderr.contains("No tags can describe") {
            return Ok(None);
        }
        Err(Error::version(format!(
            "git describe failed for {}: {}",
            commit,
            stderr.trim()
        )))
    }
}
