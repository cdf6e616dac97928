//! OS file lock for embedded single-file engines

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use fs2::FileExt;
use tracing::warn;

use crate::domain::result::{Error, Result};
use crate::ports::Database;

fn is_contended(err: &std::io::Error) -> bool {
    err.kind() == ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// Exclusive lock on a file next to the database
///
/// The lock belongs to the open file handle, so two managers in the same
/// process exclude each other just like two processes do.
pub struct FileLock {
    path: PathBuf,
    handle: Mutex<Option<File>>,
}

impl FileLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            handle: Mutex::new(None),
        }
    }

    /// `<database file>.lock`
    pub fn default_path(db_path: &Path) -> PathBuf {
        let mut name = db_path.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn handle(&self) -> Result<std::sync::MutexGuard<'_, Option<File>>> {
        self.handle
            .lock()
            .map_err(|e| Error::database(format!("file lock state poisoned: {}", e)))
    }

    fn open(&self) -> Result<File> {
        Ok(OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&self.path)?)
    }
}

impl super::LockStrategy for FileLock {
    fn name(&self) -> &'static str {
        "file"
    }

    fn try_acquire(&self, _db: &dyn Database) -> Result<bool> {
        let mut handle = self.handle()?;
        if handle.is_some() {
            return Ok(true);
        }

        let mut file = self.open()?;
        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => {
                file.set_len(0)?;
                writeln!(file, "pid={} acquired_at={}", std::process::id(), Utc::now().to_rfc3339())?;
                *handle = Some(file);
                Ok(true)
            }
            Err(e) if is_contended(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn release(&self, _db: &dyn Database) -> Result<bool> {
        match self.handle()?.take() {
            Some(file) => {
                FileExt::unlock(&file)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn is_locked(&self, _db: &dyn Database) -> Result<bool> {
        if self.handle()?.is_some() {
            return Ok(true);
        }
        if !self.path.exists() {
            return Ok(false);
        }

        let probe = File::open(&self.path)?;
        match FileExt::try_lock_shared(&probe) {
            Ok(()) => {
                FileExt::unlock(&probe)?;
                Ok(false)
            }
            Err(e) if is_contended(&e) => Ok(true),
            Err(e) => Err(e.into()),
        }
    }

    fn force_release(&self, db: &dyn Database) -> Result<()> {
        self.release(db)?;
        // A foreign holder keeps its lock on the old inode; removing the
        // file lets the next acquirer start on a fresh one.
        match fs::remove_file(&self.path) {
            Ok(()) => {
                warn!(path = %self.path.display(), "removed migration lock file");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
