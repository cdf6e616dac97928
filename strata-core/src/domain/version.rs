//! Version mappings - which changes make up a released version

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::result::Error;

/// Semantic version, ordered on (major, minor, patch)
///
/// Pre-release and build suffixes are accepted but don't take part in
/// ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SemVer {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl FromStr for SemVer {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let core = trimmed.strip_prefix('v').unwrap_or(trimmed);
        let core = core.split(['-', '+']).next().unwrap_or(core);

        let parts: Vec<&str> = core.split('.').collect();
        if parts.len() != 3 {
            return Err(Error::version(format!(
                "'{}' is not a MAJOR.MINOR.PATCH version",
                s
            )));
        }

        let number = |part: &str| {
            part.parse::<u64>()
                .map_err(|_| Error::version(format!("'{}' is not a MAJOR.MINOR.PATCH version", s)))
        };

        Ok(Self {
            major: number(parts[0])?,
            minor: number(parts[1])?,
            patch: number(parts[2])?,
        })
    }
}

impl Ord for SemVer {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch).cmp(&(other.major, other.minor, other.patch))
    }
}

impl PartialOrd for SemVer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for SemVer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Compare two version labels, falling back to string order for labels
/// that don't parse
pub fn compare_labels(a: &str, b: &str) -> Ordering {
    match (a.parse::<SemVer>(), b.parse::<SemVer>()) {
        (Ok(x), Ok(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        _ => a.cmp(b),
    }
}

/// The set of changes that make up one version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionMapping {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    #[serde(default)]
    pub migrations: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// The persisted manifest: every known version plus the current pointer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionManifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<String>,
    #[serde(default)]
    pub versions: Vec<VersionMapping>,
}

impl VersionManifest {
    pub fn get(&self, version: &str) -> Option<&VersionMapping> {
        self.versions.iter().find(|m| m.version == version)
    }

    /// Mapping whose recorded commit matches `commit`
    ///
    /// Either side may be an abbreviated hash. An exact match wins; otherwise
    /// the prefix match must be unique. Empty recorded commits never match.
    pub fn by_commit(&self, commit: &str) -> Result<Option<&VersionMapping>, Error> {
        if commit.is_empty() {
            return Ok(None);
        }
        let recorded = || {
            self.versions
                .iter()
                .filter_map(|m| m.commit.as_deref().filter(|c| !c.is_empty()).map(|c| (m, c)))
        };

        if let Some((mapping, _)) = recorded().find(|(_, c)| *c == commit) {
            return Ok(Some(mapping));
        }

        let candidates: Vec<&VersionMapping> = recorded()
            .filter(|(_, c)| c.starts_with(commit) || commit.starts_with(c))
            .map(|(m, _)| m)
            .collect();
        match candidates.as_slice() {
            [] => Ok(None),
            [only] => Ok(Some(*only)),
            many => Err(Error::version(format!(
                "commit {} is ambiguous between versions {}",
                commit,
                many.iter().map(|m| m.version.as_str()).collect::<Vec<_>>().join(", ")
            ))),
        }
    }

    /// Re-sort versions in semantic-version order
    pub fn sort(&mut self) {
        self.versions
            .sort_by(|a, b| compare_labels(&a.version, &b.version));
    }
}

/// How a caller names one end of a deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionRef {
    Version(String),
    Commit(String),
}

impl VersionRef {
    /// Guess from the text: anything that parses as a version is a version,
    /// everything else is treated as a commit reference
    pub fn parse(s: &str) -> Self {
        if s.parse::<SemVer>().is_ok() {
            VersionRef::Version(s.to_string())
        } else {
            VersionRef::Commit(s.to_string())
        }
    }
}

impl fmt::Display for VersionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionRef::Version(v) => write!(f, "version {}", v),
            VersionRef::Commit(c) => write!(f, "commit {}", c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_semver_parse() {
        let v: SemVer = "v1.12.3-rc.1+build5".parse().unwrap();
        assert_eq!(v, SemVer { major: 1, minor: 12, patch: 3 });
        assert!("1.2".parse::<SemVer>().is_err());
        assert!("1.x.0".parse::<SemVer>().is_err());
    }

    #[test]
    fn test_semver_orders_numerically() {
        let a: SemVer = "1.9.0".parse().unwrap();
        let b: SemVer = "1.10.0".parse().unwrap();
        assert!(a < b);
        assert_eq!(compare_labels("2.0.0", "10.0.0"), Ordering::Less);
    }

    #[test]
    fn test_manifest_sort_and_lookup() {
        let mapping = |version: &str, commit: Option<&str>| VersionMapping {
            version: version.to_string(),
            commit: commit.map(str::to_string),
            migrations: vec![],
            description: None,
            created_at: Utc::now(),
        };
        let mut manifest = VersionManifest {
            current: None,
            versions: vec![
                mapping("1.10.0", None),
                mapping("1.2.0", Some("abc123def")),
                mapping("1.9.1", None),
            ],
        };
        manifest.sort();
        let order: Vec<_> = manifest.versions.iter().map(|m| m.version.as_str()).collect();
        assert_eq!(order, vec!["1.2.0", "1.9.1", "1.10.0"]);
        assert_eq!(manifest.by_commit("abc123").unwrap().unwrap().version, "1.2.0");
        assert!(manifest.by_commit("fff").unwrap().is_none());
    }

    #[test]
    fn test_by_commit_ignores_empty_and_rejects_ambiguous() {
        let mapping = |version: &str, commit: &str| VersionMapping {
            version: version.to_string(),
            commit: Some(commit.to_string()),
            migrations: vec![],
            description: None,
            created_at: Utc::now(),
        };
        let manifest = VersionManifest {
            current: None,
            versions: vec![
                mapping("1.0.0", ""),
                mapping("1.1.0", "abc111"),
                mapping("1.2.0", "abc222"),
                mapping("1.3.0", "abc"),
            ],
        };

        assert!(manifest.by_commit("fff999").unwrap().is_none());
        // Exact beats prefix
        assert_eq!(manifest.by_commit("abc").unwrap().unwrap().version, "1.3.0");
        assert_eq!(manifest.by_commit("abc111").unwrap().unwrap().version, "1.1.0");
        let err = manifest.by_commit("abc1").unwrap_err();
        assert!(matches!(err, Error::Version(ref msg) if msg.contains("1.1.0") && msg.contains("1.3.0")));
    }

    #[test]
    fn test_version_ref_parse() {
        assert_eq!(VersionRef::parse("1.0.0"), VersionRef::Version("1.0.0".into()));
        assert_eq!(VersionRef::parse("9f3c2a1"), VersionRef::Commit("9f3c2a1".into()));
    }
}
