//! Change repository - discovers the ordered set of change definitions
//!
//! Changes live either in a directory (one sub-directory per change, named
//! `<id>_<name>`) or are compiled into the binary with `include_str!`.
//! Discovery runs fresh on every call so edits on disk are always seen.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::domain::change::{fingerprint, parse_change_key};
use crate::domain::result::{Error, Result};
use crate::domain::{ChangeBody, ChangeDefinition, ChangeProcedure, TextBody};

/// Text body file inside a change directory
pub const SQL_BODY_FILE: &str = "migration.sql";

/// Source file of a registered procedure inside a change directory
pub const PROCEDURE_BODY_FILE: &str = "procedure.rs";

/// Where change definitions are stored
#[derive(Debug, Clone)]
pub enum ChangeSource {
    /// One sub-directory per change
    Directory(PathBuf),
    /// `(key, sql)` pairs compiled into the binary; key may end in `.sql`
    Embedded(Vec<(String, String)>),
}

/// Read access to the ordered change set
pub struct ChangeRepository {
    source: ChangeSource,
    procedures: HashMap<String, Arc<dyn ChangeProcedure>>,
}

impl ChangeRepository {
    pub fn new(source: ChangeSource) -> Self {
        Self {
            source,
            procedures: HashMap::new(),
        }
    }

    /// Repository backed by a change directory
    pub fn from_dir(dir: impl Into<PathBuf>) -> Self {
        Self::new(ChangeSource::Directory(dir.into()))
    }

    /// Repository backed by compiled-in SQL bodies
    pub fn embedded(changes: &[(&str, &str)]) -> Self {
        Self::new(ChangeSource::Embedded(
            changes
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        ))
    }

    /// Bind a callable body to the change with key `<id>_<name>`
    pub fn register_procedure(
        &mut self,
        key: impl Into<String>,
        procedure: Arc<dyn ChangeProcedure>,
    ) -> &mut Self {
        self.procedures.insert(key.into(), procedure);
        self
    }

    pub fn source(&self) -> &ChangeSource {
        &self.source
    }

    /// All changes, ascending by identifier
    pub fn all(&self) -> Result<Vec<ChangeDefinition>> {
        let mut changes = match &self.source {
            ChangeSource::Directory(dir) => self.load_dir(dir)?,
            ChangeSource::Embedded(list) => self.load_embedded(list)?,
        };

        changes.sort_by(|a, b| a.id.cmp(&b.id));

        for pair in changes.windows(2) {
            if pair[0].id == pair[1].id {
                return Err(Error::invalid_definition(
                    pair[1].origin.display().to_string(),
                    format!("identifier {} is also used by {}", pair[1].id, pair[0].key()),
                ));
            }
        }

        Ok(changes)
    }

    /// Look up by bare identifier or full `<id>_<name>` key
    pub fn by_id(&self, id: &str) -> Result<Option<ChangeDefinition>> {
        Ok(self.all()?.into_iter().find(|c| c.matches(id)))
    }

    pub fn by_name(&self, name: &str) -> Result<Option<ChangeDefinition>> {
        Ok(self.all()?.into_iter().find(|c| c.name == name))
    }

    /// Changes whose identifier is not in `applied`, in order
    pub fn pending(&self, applied: &HashSet<String>) -> Result<Vec<ChangeDefinition>> {
        Ok(self
            .all()?
            .into_iter()
            .filter(|c| !applied.contains(&c.id))
            .collect())
    }

    /// Changes strictly after `id`
    pub fn after(&self, id: &str) -> Result<Vec<ChangeDefinition>> {
        let all = self.all()?;
        let boundary = Self::boundary(&all, id)?;
        Ok(all.into_iter().filter(|c| c.id > boundary).collect())
    }

    /// Changes up to and including `id`
    pub fn up_to(&self, id: &str) -> Result<Vec<ChangeDefinition>> {
        let all = self.all()?;
        let boundary = Self::boundary(&all, id)?;
        Ok(all.into_iter().filter(|c| c.id <= boundary).collect())
    }

    fn boundary(all: &[ChangeDefinition], target: &str) -> Result<String> {
        all.iter()
            .find(|c| c.matches(target))
            .map(|c| c.id.clone())
            .ok_or_else(|| Error::not_found(format!("change {}", target)))
    }

    fn load_dir(&self, dir: &Path) -> Result<Vec<ChangeDefinition>> {
        if !dir.exists() {
            debug!(dir = %dir.display(), "change directory does not exist");
            return Ok(Vec::new());
        }

        let mut changes = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }

            let dir_name = entry.file_name().to_string_lossy().to_string();
            let Some((id, name)) = parse_change_key(&dir_name) else {
                debug!(dir = %dir_name, "ignoring directory that is not a change");
                continue;
            };

            changes.push(self.load_change_dir(&entry.path(), id, name)?);
        }
        Ok(changes)
    }

    fn load_change_dir(&self, path: &Path, id: String, name: String) -> Result<ChangeDefinition> {
        let key = format!("{}_{}", id, name);
        let location = path.display().to_string();
        let sql_path = path.join(SQL_BODY_FILE);
        let procedure_path = path.join(PROCEDURE_BODY_FILE);

        match (sql_path.is_file(), procedure_path.is_file()) {
            (true, true) => Err(Error::invalid_definition(
                location,
                format!(
                    "contains both {} and {}; exactly one body is allowed",
                    SQL_BODY_FILE, PROCEDURE_BODY_FILE
                ),
            )),
            (true, false) => {
                let raw = fs::read(&sql_path)?;
                let content = String::from_utf8(raw.clone()).map_err(|_| {
                    Error::invalid_definition(location.clone(), "body is not valid UTF-8")
                })?;
                let body =
                    TextBody::parse(&content).map_err(|reason| Error::invalid_definition(&location, reason))?;
                Ok(ChangeDefinition {
                    id,
                    name,
                    body: ChangeBody::Text(body),
                    fingerprint: fingerprint(&raw),
                    origin: path.to_path_buf(),
                })
            }
            (false, true) => {
                let procedure = self.procedures.get(&key).cloned().ok_or_else(|| {
                    Error::invalid_definition(
                        &location,
                        format!("{} has no registered procedure", PROCEDURE_BODY_FILE),
                    )
                })?;
                let raw = fs::read(&procedure_path)?;
                Ok(ChangeDefinition {
                    id,
                    name,
                    body: ChangeBody::Callable(procedure),
                    fingerprint: fingerprint(&raw),
                    origin: path.to_path_buf(),
                })
            }
            (false, false) => Err(Error::invalid_definition(
                location,
                format!(
                    "no recognized body (expected {} or {})",
                    SQL_BODY_FILE, PROCEDURE_BODY_FILE
                ),
            )),
        }
    }

    fn load_embedded(&self, list: &[(String, String)]) -> Result<Vec<ChangeDefinition>> {
        let mut changes = Vec::with_capacity(list.len() + self.procedures.len());
        let mut seen = HashSet::new();

        for (raw_key, sql) in list {
            let key = raw_key.strip_suffix(".sql").unwrap_or(raw_key);
            let (id, name) = parse_change_key(key).ok_or_else(|| {
                Error::invalid_definition(raw_key, "embedded key must be <id>_<name>")
            })?;
            if self.procedures.contains_key(key) {
                return Err(Error::invalid_definition(
                    raw_key,
                    "has both an SQL body and a registered procedure",
                ));
            }
            let body = TextBody::parse(sql).map_err(|reason| Error::invalid_definition(raw_key, reason))?;
            seen.insert(key.to_string());
            changes.push(ChangeDefinition {
                id,
                name,
                body: ChangeBody::Text(body),
                fingerprint: fingerprint(sql.as_bytes()),
                origin: PathBuf::from(raw_key),
            });
        }

        for (key, procedure) in &self.procedures {
            if seen.contains(key) {
                continue;
            }
            let (id, name) = parse_change_key(key).ok_or_else(|| {
                Error::invalid_definition(key, "procedure key must be <id>_<name>")
            })?;
            changes.push(ChangeDefinition {
                id,
                name,
                body: ChangeBody::Callable(Arc::clone(procedure)),
                fingerprint: fingerprint(procedure.source().as_bytes()),
                origin: PathBuf::from(key),
            });
        }

        Ok(changes)
    }
}
