//! Change definitions - one forward (and optional backward) schema change

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use sha2::{Digest, Sha256};

use crate::domain::result::{Error, Result};
use crate::ports::Database;

/// Marker opening the forward section of a text body
pub const UP_MARKER: &str = "-- migrate:up";

/// Marker opening the backward section of a text body
pub const DOWN_MARKER: &str = "-- migrate:down";

fn key_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(\d+)_([A-Za-z0-9][A-Za-z0-9_-]*)$").expect("valid change key pattern")
    })
}

fn marker_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?im)^[ \t]*--[ \t]*migrate:(up|down)[ \t]*\r?$").expect("valid marker pattern")
    })
}

/// Split a `<id>_<name>` key into its identifier and name
///
/// Returns `None` for anything that doesn't follow the convention.
pub fn parse_change_key(key: &str) -> Option<(String, String)> {
    let caps = key_pattern().captures(key)?;
    Some((caps[1].to_string(), caps[2].to_string()))
}

/// Lowercase hex SHA-256 of the raw stored content
pub fn fingerprint(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// A forward/backward procedure pair bound to a database handle
pub trait ChangeProcedure: Send + Sync {
    /// Apply the change
    fn up(&self, db: &dyn Database) -> Result<()>;

    /// Revert the change
    fn down(&self, db: &dyn Database) -> Result<()>;

    /// Whether `down` actually reverts anything
    fn reversible(&self) -> bool {
        true
    }

    /// Source text hashed into the fingerprint when there is no stored file
    fn source(&self) -> &str;
}

/// SQL text split into its forward and backward sections
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextBody {
    pub forward: String,
    /// `None` means no automatic rollback. `Some("")` is an explicit no-op.
    pub backward: Option<String>,
}

impl TextBody {
    /// Parse a marker-delimited SQL file
    pub fn parse(content: &str) -> std::result::Result<Self, String> {
        let mut forward: Option<String> = None;
        let mut backward: Option<String> = None;

        let markers: Vec<_> = marker_pattern().captures_iter(content).collect();
        if markers.is_empty() {
            return Err(format!("missing '{}' marker", UP_MARKER));
        }

        for (i, caps) in markers.iter().enumerate() {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            let end = markers
                .get(i + 1)
                .and_then(|next| next.get(0))
                .map(|m| m.start())
                .unwrap_or(content.len());
            let section = content[whole.end()..end].trim().to_string();

            let slot = if caps[1].eq_ignore_ascii_case("up") {
                &mut forward
            } else {
                &mut backward
            };
            if slot.is_some() {
                return Err(format!("duplicate 'migrate:{}' marker", caps[1].to_lowercase()));
            }
            *slot = Some(section);
        }

        match forward {
            Some(up) if !up.is_empty() => Ok(Self {
                forward: up,
                backward,
            }),
            Some(_) => Err("forward section is empty".to_string()),
            None => Err(format!("missing '{}' marker", UP_MARKER)),
        }
    }
}

/// How a change's forward/backward work is expressed
#[derive(Clone)]
pub enum ChangeBody {
    Text(TextBody),
    Callable(Arc<dyn ChangeProcedure>),
}

impl ChangeBody {
    /// Whether a backward body exists
    pub fn is_reversible(&self) -> bool {
        match self {
            ChangeBody::Text(text) => text.backward.is_some(),
            ChangeBody::Callable(procedure) => procedure.reversible(),
        }
    }

    /// Run the forward body
    pub fn run_forward(&self, db: &dyn Database) -> Result<()> {
        match self {
            ChangeBody::Text(text) => db.execute_batch(&text.forward),
            ChangeBody::Callable(procedure) => procedure.up(db),
        }
    }

    /// Run the backward body. Callers check `is_reversible` first.
    pub fn run_backward(&self, db: &dyn Database) -> Result<()> {
        match self {
            ChangeBody::Text(TextBody {
                backward: Some(sql), ..
            }) if sql.is_empty() => Ok(()),
            ChangeBody::Text(TextBody {
                backward: Some(sql), ..
            }) => db.execute_batch(sql),
            ChangeBody::Text(TextBody { backward: None, .. }) => {
                Err(Error::database("no backward section"))
            }
            ChangeBody::Callable(procedure) => procedure.down(db),
        }
    }
}

impl fmt::Debug for ChangeBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeBody::Text(text) => f.debug_tuple("Text").field(text).finish(),
            ChangeBody::Callable(_) => f.write_str("Callable(..)"),
        }
    }
}

/// One uniquely identified, immutable schema change
#[derive(Debug, Clone)]
pub struct ChangeDefinition {
    /// Sortable identifier, compared lexicographically
    pub id: String,
    pub name: String,
    pub body: ChangeBody,
    pub fingerprint: String,
    /// Directory or embedded key the change was loaded from
    pub origin: PathBuf,
}

impl ChangeDefinition {
    /// The `<id>_<name>` key
    pub fn key(&self) -> String {
        format!("{}_{}", self.id, self.name)
    }

    /// True when `target` names this change by bare id or by full key
    pub fn matches(&self, target: &str) -> bool {
        self.id == target || self.key() == target
    }
}
