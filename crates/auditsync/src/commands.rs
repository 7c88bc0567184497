//! Subcommand handlers.

use crate::config::{ConfigError, ExportConfig, RawConfig, DEFAULT_CONFIG_NAME, DEFAULT_CONFIG_YAML};
use crate::context::{Home, SyncContext};
use crate::format::parse_formats;
use crate::runner::SyncRunner;
use crate::shutdown::Shutdown;
use crate::watermark::{Stream, WatermarkStore};
use anyhow::{Context, Result};
use auditsync_client::{ClientConfig, HttpInspectionApi, InspectionApi, Preference};
use auditsync_model::BEGINNING_OF_TIME;
use chrono::Utc;
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

const PREFERENCE_LABEL_WIDTH: usize = 35;

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    pub config: Option<String>,
    pub formats: Vec<String>,
    pub repeat: bool,
    pub use_env: bool,
}

fn load_config(home: &Home, name: Option<&str>, use_env: bool) -> Result<ExportConfig> {
    let path = home.config_path(name);
    if !use_env && !path.is_file() {
        anyhow::bail!("{} is either missing or corrupt", path.display());
    }
    let config = if path.is_file() {
        ExportConfig::load(&path, home.root(), use_env)?
    } else {
        let mut raw = RawConfig::default();
        raw.apply_env(|name| std::env::var(name).ok());
        ExportConfig::from_raw(raw, home.root())?
    };
    Ok(config)
}

fn client(config: &ExportConfig) -> Result<HttpInspectionApi> {
    HttpInspectionApi::new(ClientConfig::new(config.token.clone()))
        .context("Failed to create API client")
}

/// `auditsync sync`
pub fn run_sync(home: &Home, options: SyncOptions) -> Result<()> {
    let config = load_config(home, options.config.as_deref(), options.use_env)?;
    fs::create_dir_all(&config.export_path).with_context(|| {
        format!(
            "Failed to create export directory: {}",
            config.export_path.display()
        )
    })?;
    let formats = parse_formats(&options.formats);
    let api = client(&config)?;
    let ctx = SyncContext::new(home, config, formats);
    info!(
        config = %ctx.config.config_name,
        export_path = %ctx.export_dir().display(),
        formats = ?ctx.formats,
        "Starting sync"
    );

    let shutdown = Shutdown::new();
    shutdown
        .install_handlers()
        .context("Failed to install signal handlers")?;

    let mut runner = SyncRunner::new(&api, &ctx, &shutdown);
    if options.repeat {
        runner.run_loop()?;
    } else {
        let report = runner.run_pass()?;
        info!(
            exported = report.exported,
            deferred = report.deferred,
            actions = report.actions,
            "Completed sync process, exiting"
        );
    }
    Ok(())
}

/// `auditsync preferences`
pub fn show_preferences(
    home: &Home,
    config: Option<&str>,
    use_env: bool,
    template_ids: &[String],
    out: &mut dyn Write,
) -> Result<()> {
    let config = load_config(home, config, use_env)?;
    let api = client(&config)?;
    let preferences = collect_preferences(&api, template_ids)?;
    writeln!(out, "{}", preferences_table(&preferences))?;
    Ok(())
}

pub fn collect_preferences(
    api: &dyn InspectionApi,
    template_ids: &[String],
) -> Result<Vec<Preference>> {
    if template_ids.is_empty() {
        return Ok(api.list_preferences(None)?);
    }
    let mut all = Vec::new();
    for template_id in template_ids {
        all.extend(api.list_preferences(Some(template_id))?);
    }
    Ok(all)
}

pub fn preferences_table(preferences: &[Preference]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Preference ID", "Preference Name", "Global", "Default"]);
    for preference in preferences {
        let label: String = preference.label.chars().take(PREFERENCE_LABEL_WIDTH).collect();
        table.add_row(vec![
            Cell::new(&preference.id),
            Cell::new(label),
            Cell::new(preference.is_global),
            Cell::new(preference.is_default),
        ]);
    }
    table
}

/// `auditsync init`: write the config skeleton and seed the audits watermark.
pub fn init(home: &Home, from_now: bool) -> Result<PathBuf> {
    let path = home.config_path(None);
    if path.exists() {
        return Err(ConfigError::AlreadyExists(path).into());
    }
    fs::create_dir_all(home.configs_dir())
        .with_context(|| format!("Failed to create {}", home.configs_dir().display()))?;
    fs::write(&path, DEFAULT_CONFIG_YAML)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    info!("Default config file created at {}", path.display());

    let store = WatermarkStore::new(home.watermark_dir(), Some(DEFAULT_CONFIG_NAME));
    let start = if from_now {
        Utc::now().format("%Y-%m-%dT%H:%M:%S.000Z").to_string()
    } else {
        BEGINNING_OF_TIME.to_string()
    };
    store.write(Stream::Audits, &start)?;
    info!("Audit exporting set to start from {}", start);
    Ok(path)
}

/// `auditsync watermark`
pub fn show_watermark(home: &Home, config: Option<&str>, out: &mut dyn Write) -> Result<()> {
    let config_name = config_name_for(&home.config_path(config))?;
    let store = WatermarkStore::new(home.watermark_dir(), Some(&config_name));
    for stream in [Stream::Audits, Stream::Actions] {
        writeln!(
            out,
            "{:<8} {}  ({})",
            stream.as_str(),
            store.read(stream)?,
            store.path(stream).display()
        )?;
    }
    Ok(())
}

fn config_name_for(path: &Path) -> Result<String> {
    let raw = if path.is_file() {
        RawConfig::load(path)?
    } else {
        RawConfig::default()
    };
    Ok(raw.config_name()?)
}
