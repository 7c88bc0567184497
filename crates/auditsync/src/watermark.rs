//! Durable per-stream sync checkpoints.
//!
//! Each stream keeps a single trimmed ISO-8601 timestamp in its own file
//! under `<home>/last_successful`. Writes go to a temp file that is renamed
//! over the marker, so a crash leaves either the old or the new value.

use auditsync_model::BEGINNING_OF_TIME;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stream {
    Audits,
    Actions,
}

impl Stream {
    fn file_stem(self) -> &'static str {
        match self {
            Stream::Audits => "last_successful",
            Stream::Actions => "last_successful_actions_export",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stream::Audits => "audits",
            Stream::Actions => "actions",
        }
    }
}

#[derive(Debug, Error)]
pub enum WatermarkError {
    #[error("Failed to read watermark {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to write watermark {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct WatermarkStore {
    dir: PathBuf,
    suffix: Option<String>,
}

impl WatermarkStore {
    /// `suffix` namespaces the markers so several configurations can share
    /// one directory.
    pub fn new(dir: impl Into<PathBuf>, suffix: Option<&str>) -> Self {
        Self {
            dir: dir.into(),
            suffix: suffix.filter(|s| !s.is_empty()).map(str::to_string),
        }
    }

    pub fn path(&self, stream: Stream) -> PathBuf {
        let name = match &self.suffix {
            Some(suffix) => format!("{}-{}.txt", stream.file_stem(), suffix),
            None => format!("{}.txt", stream.file_stem()),
        };
        self.dir.join(name)
    }

    /// Current checkpoint. A missing or empty marker is initialised to the
    /// epoch sentinel.
    pub fn read(&self, stream: Stream) -> Result<String, WatermarkError> {
        let path = self.path(stream);
        match fs::read_to_string(&path) {
            Ok(content) => {
                let value = content.lines().next().unwrap_or("").trim().to_string();
                if value.is_empty() {
                    self.write(stream, BEGINNING_OF_TIME)?;
                    return Ok(BEGINNING_OF_TIME.to_string());
                }
                debug!(stream = stream.as_str(), watermark = %value, "Read watermark");
                Ok(value)
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                self.write(stream, BEGINNING_OF_TIME)?;
                info!(
                    "Searching for {} since the beginning of time: {}",
                    stream.as_str(),
                    BEGINNING_OF_TIME
                );
                Ok(BEGINNING_OF_TIME.to_string())
            }
            Err(source) => Err(WatermarkError::Read { path, source }),
        }
    }

    /// Replace the checkpoint. Earlier values are not guarded against.
    pub fn write(&self, stream: Stream, timestamp: &str) -> Result<(), WatermarkError> {
        let path = self.path(stream);
        let write_err = |source| WatermarkError::Write {
            path: path.clone(),
            source,
        };
        fs::create_dir_all(&self.dir).map_err(write_err)?;
        let temp = temp_path(&path);
        fs::write(&temp, timestamp.trim()).map_err(write_err)?;
        fs::rename(&temp, &path).map_err(write_err)?;
        debug!(stream = stream.as_str(), watermark = timestamp, "Advanced watermark");
        Ok(())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.tmp", name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn first_read_seeds_sentinel() {
        let dir = tempdir().unwrap();
        let store = WatermarkStore::new(dir.path().join("last_successful"), None);
        assert_eq!(store.read(Stream::Audits).unwrap(), BEGINNING_OF_TIME);
        let persisted = fs::read_to_string(store.path(Stream::Audits)).unwrap();
        assert_eq!(persisted, BEGINNING_OF_TIME);
    }

    #[test]
    fn values_are_trimmed() {
        let dir = tempdir().unwrap();
        let store = WatermarkStore::new(dir.path(), None);
        fs::write(store.path(Stream::Audits), "2024-03-01T10:00:00.000Z\n").unwrap();
        assert_eq!(store.read(Stream::Audits).unwrap(), "2024-03-01T10:00:00.000Z");
    }

    #[test]
    fn streams_and_configs_do_not_clobber() {
        let dir = tempdir().unwrap();
        let a = WatermarkStore::new(dir.path(), Some("site_a"));
        let b = WatermarkStore::new(dir.path(), Some("site_b"));
        a.write(Stream::Audits, "2024-01-01T00:00:00.000Z").unwrap();
        a.write(Stream::Actions, "2024-02-01T00:00:00.000Z").unwrap();

        assert_eq!(a.read(Stream::Audits).unwrap(), "2024-01-01T00:00:00.000Z");
        assert_eq!(a.read(Stream::Actions).unwrap(), "2024-02-01T00:00:00.000Z");
        assert_eq!(b.read(Stream::Audits).unwrap(), BEGINNING_OF_TIME);
        assert!(a
            .path(Stream::Actions)
            .ends_with("last_successful_actions_export-site_a.txt"));
    }

    #[test]
    fn watermark_may_move_backward() {
        let dir = tempdir().unwrap();
        let store = WatermarkStore::new(dir.path(), None);
        store.write(Stream::Audits, "2024-05-01T00:00:00.000Z").unwrap();
        store.write(Stream::Audits, "2024-04-01T00:00:00.000Z").unwrap();
        assert_eq!(store.read(Stream::Audits).unwrap(), "2024-04-01T00:00:00.000Z");
    }

    #[test]
    fn unwritable_location_is_an_error() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, "x").unwrap();
        let store = WatermarkStore::new(blocker.join("nested"), None);
        assert!(matches!(
            store.write(Stream::Audits, BEGINNING_OF_TIME),
            Err(WatermarkError::Write { .. })
        ));
    }
}
