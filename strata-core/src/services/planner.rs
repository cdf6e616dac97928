//! Version deployment planner
//!
//! Keeps the version manifest (`versions.json`) and turns a pair of
//! versions into the rollback-then-apply steps that move a database from one
//! to the other. Plans are advisory; the executor runs them.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info};

use crate::domain::result::{Error, Result};
use crate::domain::{
    DeploymentPlan, MigrationDelta, SemVer, VersionManifest, VersionMapping, VersionRef,
};
use crate::ports::CommitResolver;
use crate::services::repository::ChangeRepository;

/// Default manifest file name, kept next to the change directory
pub const DEFAULT_MANIFEST_FILE: &str = "versions.json";

/// Reads and writes the version manifest and computes deployment plans
pub struct VersionPlanner {
    manifest_path: PathBuf,
    resolver: Option<Box<dyn CommitResolver>>,
}

impl VersionPlanner {
    pub fn new(manifest_path: impl Into<PathBuf>) -> Self {
        Self {
            manifest_path: manifest_path.into(),
            resolver: None,
        }
    }

    /// Enable commit-based references
    pub fn with_resolver(mut self, resolver: Box<dyn CommitResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn manifest_path(&self) -> &Path {
        &self.manifest_path
    }

    /// Load the manifest; a missing file is an empty manifest
    pub fn load(&self) -> Result<VersionManifest> {
        if !self.manifest_path.exists() {
            return Ok(VersionManifest::default());
        }
        let content = fs::read_to_string(&self.manifest_path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn save(&self, manifest: &VersionManifest) -> Result<()> {
        if let Some(parent) = self.manifest_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut content = serde_json::to_string_pretty(manifest)?;
        content.push('\n');
        fs::write(&self.manifest_path, content)?;
        Ok(())
    }

    /// Insert or replace the mapping for `version`
    ///
    /// Replacing keeps the original creation time. The manifest is re-sorted
    /// in semantic-version order before it is written.
    pub fn register(
        &self,
        version: &str,
        migrations: Vec<String>,
        description: Option<String>,
        commit: Option<String>,
    ) -> Result<VersionMapping> {
        version.parse::<SemVer>()?;

        let mut manifest = self.load()?;
        let created_at = manifest
            .get(version)
            .map(|existing| existing.created_at)
            .unwrap_or_else(Utc::now);

        let mapping = VersionMapping {
            version: version.to_string(),
            commit,
            migrations,
            description,
            created_at,
        };

        manifest.versions.retain(|m| m.version != version);
        manifest.versions.push(mapping.clone());
        manifest.sort();
        self.save(&manifest)?;

        info!(
            version,
            changes = mapping.migrations.len(),
            "registered version"
        );
        Ok(mapping)
    }

    /// Point the current-version marker at an existing version
    pub fn set_current(&self, version: &str) -> Result<()> {
        let mut manifest = self.load()?;
        if manifest.get(version).is_none() {
            return Err(Error::not_found(format!("version {}", version)));
        }
        manifest.current = Some(version.to_string());
        self.save(&manifest)?;
        info!(version, "current version updated");
        Ok(())
    }

    /// The mapping the current-version marker points at
    pub fn current(&self) -> Result<Option<VersionMapping>> {
        let manifest = self.load()?;
        Self::current_of(&manifest)
    }

    fn current_of(manifest: &VersionManifest) -> Result<Option<VersionMapping>> {
        match manifest.current.as_deref() {
            None => Ok(None),
            Some(label) => manifest.get(label).cloned().map(Some).ok_or_else(|| {
                Error::version(format!("current version {} is not registered", label))
            }),
        }
    }

    pub fn get(&self, version: &str) -> Result<Option<VersionMapping>> {
        Ok(self.load()?.get(version).cloned())
    }

    /// All mappings in semantic-version order
    pub fn list(&self) -> Result<Vec<VersionMapping>> {
        let mut manifest = self.load()?;
        manifest.sort();
        Ok(manifest.versions)
    }

    /// Resolve a version label or commit to its mapping
    pub fn resolve(&self, reference: &VersionRef) -> Result<VersionMapping> {
        let manifest = self.load()?;
        self.resolve_in(&manifest, reference)
    }

    fn resolve_in(&self, manifest: &VersionManifest, reference: &VersionRef) -> Result<VersionMapping> {
        match reference {
            VersionRef::Version(label) => Self::by_label(manifest, label)
                .ok_or_else(|| Error::not_found(format!("version {}", label))),
            VersionRef::Commit(commit) => {
                if let Some(mapping) = manifest.by_commit(commit)? {
                    debug!(commit = %commit, version = %mapping.version, "commit recorded in manifest");
                    return Ok(mapping.clone());
                }

                let resolver = self.resolver.as_ref().ok_or_else(|| {
                    Error::version(format!(
                        "cannot resolve commit {} without a commit resolver",
                        commit
                    ))
                })?;
                let tag = resolver.nearest_version_tag(commit)?.ok_or_else(|| {
                    Error::version(format!("commit {} has no reachable version tag", commit))
                })?;

                Self::by_label(manifest, &tag).ok_or_else(|| {
                    Error::not_found(format!(
                        "version {} (nearest tag of commit {})",
                        tag, commit
                    ))
                })
            }
        }
    }

    /// Exact label first, then with a leading `v` stripped
    fn by_label(manifest: &VersionManifest, label: &str) -> Option<VersionMapping> {
        manifest
            .get(label)
            .or_else(|| label.strip_prefix('v').and_then(|bare| manifest.get(bare)))
            .cloned()
    }

    /// Changes to apply and roll back to move from `from` to `to`
    ///
    /// Without `from`, the current-version marker is used. Without either,
    /// everything in `to` is applied.
    pub fn migrations_between(
        &self,
        from: Option<&VersionRef>,
        to: &VersionRef,
    ) -> Result<MigrationDelta> {
        let (from, to) = self.endpoints(from, to)?;
        Ok(Self::delta(from.as_ref(), &to))
    }

    /// Ordered deployment plan between two versions
    pub fn plan(&self, from: Option<&VersionRef>, to: &VersionRef) -> Result<DeploymentPlan> {
        let (from, to) = self.endpoints(from, to)?;
        let delta = Self::delta(from.as_ref(), &to);
        let plan = DeploymentPlan::from_delta(from.map(|m| m.version), to.version, &delta);
        debug!(summary = %plan.summary, "computed deployment plan");
        Ok(plan)
    }

    fn endpoints(
        &self,
        from: Option<&VersionRef>,
        to: &VersionRef,
    ) -> Result<(Option<VersionMapping>, VersionMapping)> {
        let manifest = self.load()?;
        let to = self.resolve_in(&manifest, to)?;
        let from = match from {
            Some(reference) => Some(self.resolve_in(&manifest, reference)?),
            None => Self::current_of(&manifest)?,
        };
        Ok((from, to))
    }

    fn delta(from: Option<&VersionMapping>, to: &VersionMapping) -> MigrationDelta {
        let source: HashSet<&str> = from
            .map(|m| m.migrations.iter().map(String::as_str).collect())
            .unwrap_or_default();
        let target: HashSet<&str> = to.migrations.iter().map(String::as_str).collect();

        let mut apply: Vec<String> = to
            .migrations
            .iter()
            .filter(|id| !source.contains(id.as_str()))
            .cloned()
            .collect();
        apply.sort();
        apply.dedup();

        let mut rollback: Vec<String> = from
            .map(|m| {
                m.migrations
                    .iter()
                    .filter(|id| !target.contains(id.as_str()))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        rollback.sort();
        rollback.dedup();
        rollback.reverse();

        MigrationDelta { apply, rollback }
    }

    /// Change identifiers referenced by a version but unknown to `repository`
    ///
    /// Returns one message per problem; an empty list means the manifest is
    /// consistent.
    pub fn validate(&self, repository: &ChangeRepository) -> Result<Vec<String>> {
        let manifest = self.load()?;
        let changes = repository.all()?;
        let mut problems = Vec::new();

        if let Some(label) = manifest.current.as_deref() {
            if manifest.get(label).is_none() {
                problems.push(format!("current version {} is not registered", label));
            }
        }

        for mapping in &manifest.versions {
            for id in &mapping.migrations {
                if !changes.iter().any(|c| c.matches(id)) {
                    problems.push(format!("{}: unknown change {}", mapping.version, id));
                }
            }
        }
        Ok(problems)
    }
}
