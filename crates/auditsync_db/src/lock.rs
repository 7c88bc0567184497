//! Single-writer guard for database files.
//!
//! DuckDB allows one writing process per file. A `sync --loop` left running
//! and a manual `sync` against the same config would both try to open the
//! database, so the first opener takes an exclusive `fs2` lock on
//! `<db>.lock` and later openers fail immediately with [`LockError::Locked`].
//! The lock file records the owning pid for whoever is locked out.

use chrono::Utc;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{self, Seek, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum LockError {
    #[error("Database {0} is in use by another auditsync process")]
    Locked(PathBuf),

    #[error("Cannot open lock file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Cannot lock {path}: {source}")]
    Acquire {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Exclusive lock, released when dropped.
#[derive(Debug)]
pub struct DbLockGuard {
    file: File,
    path: PathBuf,
}

impl DbLockGuard {
    pub fn lock_path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DbLockGuard {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            debug!("Unlocking {} failed: {}", self.path.display(), err);
        }
    }
}

/// `sync.duckdb` → `sync.duckdb.lock`, `sync` → `sync.lock`.
pub fn lock_path_for(db_path: &Path) -> PathBuf {
    let mut name = db_path.as_os_str().to_os_string();
    name.push(".lock");
    PathBuf::from(name)
}

/// Take the lock for `db_path` or fail without waiting.
pub fn try_lock_exclusive(db_path: &Path) -> Result<DbLockGuard, LockError> {
    let path = lock_path_for(db_path);
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&path)
        .map_err(|source| LockError::Open {
            path: path.clone(),
            source,
        })?;

    // Qualified: recent std has an inherent `File::try_lock_exclusive`.
    if let Err(source) = FileExt::try_lock_exclusive(&file) {
        return Err(if source.kind() == io::ErrorKind::WouldBlock {
            LockError::Locked(db_path.to_path_buf())
        } else {
            LockError::Acquire { path, source }
        });
    }

    if let Err(err) = record_owner(&mut file) {
        warn!("Could not record lock owner in {}: {}", path.display(), err);
    }
    debug!("Locked {}", path.display());
    Ok(DbLockGuard { file, path })
}

fn record_owner(file: &mut File) -> io::Result<()> {
    file.set_len(0)?;
    file.rewind()?;
    writeln!(
        file,
        "pid={} since={}",
        std::process::id(),
        Utc::now().to_rfc3339()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn lock_path_appends_suffix() {
        assert_eq!(
            lock_path_for(Path::new("/data/sync.duckdb")),
            PathBuf::from("/data/sync.duckdb.lock")
        );
        assert_eq!(lock_path_for(Path::new("/data/sync")), PathBuf::from("/data/sync.lock"));
    }

    #[test]
    fn lock_records_owner_and_is_released_on_drop() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("sync.duckdb");

        let guard = try_lock_exclusive(&db).unwrap();
        let owner = fs::read_to_string(guard.lock_path()).unwrap();
        assert!(owner.starts_with(&format!("pid={}", std::process::id())));
        drop(guard);

        assert!(try_lock_exclusive(&db).is_ok());
    }

    #[test]
    fn second_lock_is_refused() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("sync.duckdb");

        let _held = try_lock_exclusive(&db).unwrap();
        assert!(matches!(try_lock_exclusive(&db), Err(LockError::Locked(_))));
    }
}
