//! Logging setup for the auditsync binary.
//!
//! Events go to `<log_dir>/<app>.log` and to stderr. The file is rotated by
//! size into `<app>.log.1 .. <app>.log.N`. `RUST_LOG` overrides the default
//! filter for both outputs.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const CRATES: [&str; 5] = [
    "auditsync",
    "auditsync_client",
    "auditsync_db",
    "auditsync_model",
    "auditsync_sinks",
];
const KEPT_LOG_FILES: usize = 5;
const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;

pub struct LogConfig<'a> {
    /// Log file stem.
    pub app_name: &'a str,
    pub log_dir: PathBuf,
    /// Show debug events on the console.
    pub verbose: bool,
}

fn crate_filter(level: &str) -> EnvFilter {
    let directives: Vec<String> = CRATES.iter().map(|c| format!("{}={}", c, level)).collect();
    EnvFilter::new(directives.join(","))
}

fn env_or(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| crate_filter(level))
}

/// Install the global subscriber. Call once, before any other work.
pub fn init_logging(config: LogConfig<'_>) -> Result<()> {
    let log_file = SizeRotatedFile::open(
        &config.log_dir,
        config.app_name,
        KEPT_LOG_FILES,
        MAX_LOG_BYTES,
    )
    .with_context(|| format!("Failed to open log file in {}", config.log_dir.display()))?;

    let console_filter = if config.verbose {
        crate_filter("debug")
    } else {
        env_or("info")
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(Mutex::new(log_file))
                .with_ansi(false)
                .with_filter(env_or("info")),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_target(false)
                .with_filter(console_filter),
        )
        .try_init()
        .context("Logging already initialized")?;
    Ok(())
}

/// Active log file for `app_name` in `log_dir`.
pub fn log_file_path(log_dir: &Path, app_name: &str) -> PathBuf {
    log_dir.join(format!("{}.log", file_stem(app_name)))
}

fn file_stem(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => c,
            _ => '_',
        })
        .collect()
}

/// Append-only log file that starts over once it would exceed `max_bytes`.
struct SizeRotatedFile {
    active: PathBuf,
    kept: usize,
    max_bytes: u64,
    file: File,
    written: u64,
}

impl SizeRotatedFile {
    fn open(dir: &Path, app_name: &str, kept: usize, max_bytes: u64) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let active = log_file_path(dir, app_name);
        let file = append_to(&active)?;
        let written = file.metadata()?.len();
        let mut log = Self {
            active,
            kept: kept.max(1),
            max_bytes,
            file,
            written,
        };
        if log.written > log.max_bytes {
            log.rotate()?;
        }
        Ok(log)
    }

    fn numbered(&self, n: usize) -> PathBuf {
        let mut name = self.active.clone().into_os_string();
        name.push(format!(".{}", n));
        PathBuf::from(name)
    }

    /// `.log` becomes `.log.1`, `.log.1` becomes `.log.2`, and so on. The
    /// file past `kept - 1` is overwritten.
    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;
        for n in (1..self.kept).rev() {
            let from = if n == 1 { self.active.clone() } else { self.numbered(n - 1) };
            if from.exists() {
                fs::rename(&from, self.numbered(n))?;
            }
        }
        if self.kept == 1 {
            fs::remove_file(&self.active)?;
        }
        self.file = append_to(&self.active)?;
        self.written = 0;
        Ok(())
    }
}

fn append_to(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

impl Write for SizeRotatedFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.max_bytes {
            self.rotate()?;
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn rotation_keeps_bounded_history() {
        let dir = TempDir::new().unwrap();
        let mut log = SizeRotatedFile::open(dir.path(), "auditsync", 3, 16).unwrap();

        for _ in 0..10 {
            log.write_all(b"0123456789abcdef").unwrap();
        }
        log.flush().unwrap();

        assert!(dir.path().join("auditsync.log").exists());
        assert!(dir.path().join("auditsync.log.1").exists());
        assert!(dir.path().join("auditsync.log.2").exists());
        assert!(!dir.path().join("auditsync.log.3").exists());
    }

    #[test]
    fn reopening_appends() {
        let dir = TempDir::new().unwrap();
        {
            let mut log = SizeRotatedFile::open(dir.path(), "auditsync", 2, 1024).unwrap();
            log.write_all(b"first\n").unwrap();
        }
        let mut log = SizeRotatedFile::open(dir.path(), "auditsync", 2, 1024).unwrap();
        log.write_all(b"second\n").unwrap();
        log.flush().unwrap();

        let text = fs::read_to_string(dir.path().join("auditsync.log")).unwrap();
        assert_eq!(text, "first\nsecond\n");
    }

    #[test]
    fn log_file_name_is_sanitized() {
        let path = log_file_path(Path::new("/tmp/logs"), "audit sync");
        assert_eq!(path, PathBuf::from("/tmp/logs/audit_sync.log"));
    }
}
