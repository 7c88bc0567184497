//! Resolved locations and settings passed to every pipeline step.

use crate::config::ExportConfig;
use crate::format::ExportFormat;
use crate::watermark::WatermarkStore;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

pub const HOME_ENV: &str = "AUDITSYNC_HOME";
pub const DEFAULT_CONFIG_FILENAME: &str = "config.yaml";

/// Working directory holding configs, logs and watermarks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Home {
    root: PathBuf,
}

impl Home {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `$AUDITSYNC_HOME`, or the current directory.
    pub fn resolve() -> Result<Self> {
        match std::env::var_os(HOME_ENV) {
            Some(root) if !root.is_empty() => Ok(Self::new(root)),
            _ => {
                let cwd = std::env::current_dir().context("Failed to resolve current directory")?;
                Ok(Self::new(cwd))
            }
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn log_dir(&self) -> PathBuf {
        self.root.join("log")
    }

    pub fn watermark_dir(&self) -> PathBuf {
        self.root.join("last_successful")
    }

    pub fn configs_dir(&self) -> PathBuf {
        self.root.join("configs")
    }

    /// `configs/<name>`, or the default config file.
    pub fn config_path(&self, name: Option<&str>) -> PathBuf {
        self.configs_dir()
            .join(name.unwrap_or(DEFAULT_CONFIG_FILENAME))
    }
}

/// Everything one sync run needs to know, built once at startup.
#[derive(Debug, Clone)]
pub struct SyncContext {
    pub config: ExportConfig,
    pub formats: Vec<ExportFormat>,
    pub watermarks: WatermarkStore,
}

impl SyncContext {
    pub fn new(home: &Home, config: ExportConfig, formats: Vec<ExportFormat>) -> Self {
        let watermarks = WatermarkStore::new(home.watermark_dir(), Some(&config.config_name));
        Self {
            config,
            formats,
            watermarks,
        }
    }

    pub fn wants(&self, format: ExportFormat) -> bool {
        self.formats.contains(&format)
    }

    pub fn audit_formats(&self) -> impl Iterator<Item = ExportFormat> + '_ {
        self.formats.iter().copied().filter(|f| f.is_audit_format())
    }

    pub fn export_dir(&self) -> &Path {
        &self.config.export_path
    }

    pub fn media_dir(&self, export_filename: &str) -> PathBuf {
        self.config.export_path.join("media").join(export_filename)
    }

    pub fn parquet_dir(&self) -> PathBuf {
        self.config
            .export_path
            .join("parquet")
            .join(&self.config.sql_table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn home_layout() {
        let home = Home::new("/srv/auditsync");
        assert_eq!(home.log_dir(), PathBuf::from("/srv/auditsync/log"));
        assert_eq!(
            home.config_path(None),
            PathBuf::from("/srv/auditsync/configs/config.yaml")
        );
        assert_eq!(
            home.config_path(Some("north.yaml")),
            PathBuf::from("/srv/auditsync/configs/north.yaml")
        );
    }
}
