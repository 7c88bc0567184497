//! Export configuration.
//!
//! The YAML file is read into [`RawConfig`], which accepts anything the
//! file might plausibly contain, and then validated once into the typed
//! [`ExportConfig`] used for the rest of the run.

use crate::discovery::TemplateFilter;
use auditsync_client::FlagFilter;
use auditsync_db::CreatePolicy;
use auditsync_sinks::CsvNaming;
use regex::Regex;
use serde::Deserialize;
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const DEFAULT_CONFIG_NAME: &str = "iauditor";
pub const DEFAULT_SYNC_DELAY_SECS: u64 = 900;
pub const DEFAULT_MEDIA_SYNC_OFFSET_SECS: u64 = 600;
pub const DEFAULT_SQL_TABLE: &str = "iauditor_data";
pub const DEFAULT_DATABASE_SCHEMA: &str = "main";

/// Skeleton written by `auditsync init`.
pub const DEFAULT_CONFIG_YAML: &str = "\
API:
    token:
config_name:
export_options:
    export_path:
    export_archived: false
    export_completed: true
    use_real_template_name: false
    filename:
    export_inactive_items: true
    preferences:
    sync_delay_in_seconds: 900
    media_sync_offset_in_seconds: 600
    template_ids:
    merge_rows: false
    actions_merge_rows: false
    allow_table_creation:
    sql_table: iauditor_data
    database_url:
    database_schema: main
";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Config file {path} is not valid YAML: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("No API token configured")]
    MissingToken,
    #[error("API token failed to match expected pattern")]
    InvalidToken,
    #[error("Config name '{0}' can only contain letters, numbers, hyphens or underscores")]
    InvalidConfigName(String),
    #[error("Failed to read template id list {path}: {source}")]
    TemplateList {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Config file already exists at {0}")]
    AlreadyExists(PathBuf),
}

#[derive(Debug, Default, Deserialize)]
pub struct RawApi {
    #[serde(default)]
    pub token: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawExportOptions {
    #[serde(default)]
    pub export_path: Option<Value>,
    #[serde(default)]
    pub export_archived: Option<Value>,
    #[serde(default)]
    pub export_completed: Option<Value>,
    #[serde(default)]
    pub use_real_template_name: Option<Value>,
    #[serde(default)]
    pub filename: Option<Value>,
    #[serde(default)]
    pub export_inactive_items: Option<Value>,
    #[serde(default)]
    pub preferences: Option<Value>,
    #[serde(default)]
    pub sync_delay_in_seconds: Option<Value>,
    #[serde(default)]
    pub media_sync_offset_in_seconds: Option<Value>,
    #[serde(default)]
    pub template_ids: Option<Value>,
    #[serde(default)]
    pub merge_rows: Option<Value>,
    #[serde(default)]
    pub actions_merge_rows: Option<Value>,
    #[serde(default)]
    pub allow_table_creation: Option<Value>,
    #[serde(default)]
    pub sql_table: Option<Value>,
    #[serde(default)]
    pub database_url: Option<Value>,
    #[serde(default)]
    pub database_schema: Option<Value>,
}

/// The config file as written, before validation.
#[derive(Debug, Default, Deserialize)]
pub struct RawConfig {
    #[serde(rename = "API", default)]
    pub api: Option<RawApi>,
    #[serde(default)]
    pub config_name: Option<Value>,
    #[serde(default)]
    pub export_options: Option<RawExportOptions>,
}

impl RawConfig {
    pub fn from_yaml(text: &str, path: &Path) -> Result<Self, ConfigError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text, path)
    }

    /// Override file values with `AUDITSYNC_*` variables from `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty()).map(Value::String);

        if let Some(token) = var("AUDITSYNC_API_TOKEN") {
            self.api.get_or_insert_with(RawApi::default).token = Some(token);
        }
        if let Some(name) = var("AUDITSYNC_CONFIG_NAME") {
            self.config_name = Some(name);
        }
        let options = self.export_options.get_or_insert_with(RawExportOptions::default);
        let overrides = [
            ("AUDITSYNC_SYNC_DELAY", &mut options.sync_delay_in_seconds),
            ("AUDITSYNC_MEDIA_SYNC_OFFSET", &mut options.media_sync_offset_in_seconds),
            ("AUDITSYNC_TEMPLATE_IDS", &mut options.template_ids),
            ("AUDITSYNC_DATABASE_URL", &mut options.database_url),
        ];
        for (name, slot) in overrides {
            if let Some(value) = var(name) {
                debug!("{} set from environment", name);
                *slot = Some(value);
            }
        }
    }

    /// Validated configuration name. Blank falls back to the default and
    /// spaces become underscores.
    pub fn config_name(&self) -> Result<String, ConfigError> {
        let name = match self.config_name.as_ref().and_then(scalar_text) {
            Some(name) => name.replace(' ', "_"),
            None => {
                info!(
                    "The config name has been left blank, defaulting to {}",
                    DEFAULT_CONFIG_NAME
                );
                DEFAULT_CONFIG_NAME.to_string()
            }
        };
        if !matches_pattern(&CONFIG_NAME_PATTERN, &name) {
            return Err(ConfigError::InvalidConfigName(name));
        }
        Ok(name)
    }
}

/// Validated settings for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportConfig {
    pub token: String,
    pub config_name: String,
    /// Export root, already namespaced by the config name.
    pub export_path: PathBuf,
    pub archived: FlagFilter,
    pub completed: FlagFilter,
    pub csv_naming: CsvNaming,
    /// Header item whose response names exported files.
    pub filename_item_id: Option<String>,
    pub include_inactive: bool,
    /// Template id to export preference id.
    pub preferences: BTreeMap<String, String>,
    pub sync_delay: Duration,
    pub media_sync_offset: Duration,
    pub template_filter: TemplateFilter,
    pub merge_rows: bool,
    pub actions_merge_rows: bool,
    pub table_creation: CreatePolicy,
    pub sql_table: String,
    pub database_url: String,
    pub database_schema: String,
}

impl ExportConfig {
    /// Read, optionally overlay the environment, and validate.
    pub fn load(path: &Path, home: &Path, use_env: bool) -> Result<Self, ConfigError> {
        let mut raw = RawConfig::load(path)?;
        if use_env {
            raw.apply_env(|name| std::env::var(name).ok());
        }
        Self::from_raw(raw, home)
    }

    pub fn from_raw(raw: RawConfig, home: &Path) -> Result<Self, ConfigError> {
        let token = raw
            .api
            .as_ref()
            .and_then(|api| api.token.as_ref())
            .and_then(scalar_text)
            .ok_or(ConfigError::MissingToken)?;
        if !matches_pattern(&TOKEN_PATTERN, &token) {
            return Err(ConfigError::InvalidToken);
        }

        let config_name = raw.config_name()?;
        let options = raw.export_options.unwrap_or_default();

        let export_root = match options.export_path.as_ref().and_then(scalar_text) {
            Some(path) => home.join(path),
            None => {
                info!("No export path configured, defaulting to exports");
                home.join("exports")
            }
        };
        let export_path = export_root.join(&config_name);

        let merge_rows = flag(options.merge_rows.as_ref(), "merge_rows", false);
        let include_inactive = if merge_rows {
            info!("Merge rows is enabled, turning on the export of inactive items");
            true
        } else {
            flag(
                options.export_inactive_items.as_ref(),
                "export_inactive_items",
                true,
            )
        };

        let archived = if flag(options.export_archived.as_ref(), "export_archived", false) {
            FlagFilter::Both
        } else {
            FlagFilter::Exclude
        };
        let completed = if flag(options.export_completed.as_ref(), "export_completed", true) {
            FlagFilter::Only
        } else {
            FlagFilter::Both
        };

        let sync_delay = seconds(
            options.sync_delay_in_seconds.as_ref(),
            "sync_delay_in_seconds",
            DEFAULT_SYNC_DELAY_SECS,
        );
        if sync_delay < DEFAULT_SYNC_DELAY_SECS {
            warn!(
                "Sync delay is less than the minimum recommended value of {} seconds",
                DEFAULT_SYNC_DELAY_SECS
            );
        }
        let media_sync_offset = seconds(
            options.media_sync_offset_in_seconds.as_ref(),
            "media_sync_offset_in_seconds",
            DEFAULT_MEDIA_SYNC_OFFSET_SECS,
        );

        let sql_table = options
            .sql_table
            .as_ref()
            .and_then(scalar_text)
            .unwrap_or_else(|| DEFAULT_SQL_TABLE.to_string());
        let database_url = options
            .database_url
            .as_ref()
            .and_then(scalar_text)
            .unwrap_or_else(|| {
                format!(
                    "duckdb:{}",
                    export_path.join(format!("{}.duckdb", config_name)).display()
                )
            });

        Ok(Self {
            token,
            csv_naming: csv_naming(options.use_real_template_name.as_ref(), &config_name),
            filename_item_id: options.filename.as_ref().and_then(scalar_text),
            include_inactive,
            preferences: preference_map(options.preferences.as_ref()),
            sync_delay: Duration::from_secs(sync_delay),
            media_sync_offset: Duration::from_secs(media_sync_offset),
            template_filter: template_filter(options.template_ids.as_ref(), home),
            merge_rows,
            actions_merge_rows: flag(
                options.actions_merge_rows.as_ref(),
                "actions_merge_rows",
                false,
            ),
            table_creation: table_creation(options.allow_table_creation.as_ref()),
            sql_table,
            database_url,
            database_schema: options
                .database_schema
                .as_ref()
                .and_then(scalar_text)
                .unwrap_or_else(|| DEFAULT_DATABASE_SCHEMA.to_string()),
            config_name,
            export_path,
            archived,
            completed,
        })
    }
}

/// A regex compiled on first use and shared for the rest of the process.
struct Pattern {
    source: &'static str,
    compiled: OnceLock<Option<Regex>>,
}

impl Pattern {
    const fn new(source: &'static str) -> Self {
        Self {
            source,
            compiled: OnceLock::new(),
        }
    }

    fn regex(&self) -> Option<&Regex> {
        self.compiled
            .get_or_init(|| Regex::new(self.source).ok())
            .as_ref()
    }
}

static TOKEN_PATTERN: Pattern = Pattern::new("^[a-f0-9]{64}$");
static CONFIG_NAME_PATTERN: Pattern = Pattern::new("^[A-Za-z0-9_-]*$");

fn matches_pattern(pattern: &Pattern, text: &str) -> bool {
    pattern.regex().is_some_and(|re| re.is_match(text))
}

/// Non-blank scalar as text.
fn scalar_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn flag(value: Option<&Value>, key: &str, default: bool) -> bool {
    match value {
        None | Some(Value::Null) => default,
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) if s.trim().eq_ignore_ascii_case("true") => true,
        Some(Value::String(s)) if s.trim().eq_ignore_ascii_case("false") => false,
        Some(other) => {
            warn!("Invalid {} value {:?}, defaulting to {}", key, other, default);
            default
        }
    }
}

fn seconds(value: Option<&Value>, key: &str, default: u64) -> u64 {
    let parsed = match value {
        None | Some(Value::Null) => return default,
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse::<u64>().ok(),
        Some(_) => None,
    };
    parsed.unwrap_or_else(|| {
        warn!("Invalid {} in the configuration file, defaulting to {}", key, default);
        default
    })
}

fn csv_naming(value: Option<&Value>, config_name: &str) -> CsvNaming {
    match value {
        Some(Value::String(s)) if s.trim().starts_with("single_file") => {
            CsvNaming::SingleFile(config_name.to_string())
        }
        other => {
            if flag(other, "use_real_template_name", false) {
                CsvNaming::TemplateName
            } else {
                CsvNaming::TemplateId
            }
        }
    }
}

/// `"tid:pid tid:pid"`. The first entry per template wins and the whole
/// token is kept as the preference id.
fn preference_map(value: Option<&Value>) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    let Some(text) = value.and_then(scalar_text) else {
        return map;
    };
    for token in text.split_whitespace() {
        match token.split_once(':') {
            Some((template_id, _)) if !template_id.is_empty() => {
                map.entry(template_id.to_string())
                    .or_insert_with(|| token.to_string());
            }
            _ => warn!("Ignoring malformed preference '{}'", token),
        }
    }
    map
}

fn template_filter(value: Option<&Value>, home: &Path) -> TemplateFilter {
    match value {
        Some(Value::Sequence(items)) => {
            TemplateFilter::from_ids(items.iter().filter_map(scalar_text))
        }
        Some(other) => match scalar_text(other) {
            Some(text) if text.ends_with(".txt") => TemplateFilter::ListFile(home.join(text)),
            Some(text) => TemplateFilter::from_ids(text.split(',').map(str::to_string)),
            None => TemplateFilter::All,
        },
        None => TemplateFilter::All,
    }
}

fn table_creation(value: Option<&Value>) -> CreatePolicy {
    match value {
        None | Some(Value::Null) => CreatePolicy::Ask,
        other => {
            if flag(other, "allow_table_creation", false) {
                CreatePolicy::Allow
            } else {
                CreatePolicy::Refuse
            }
        }
    }
}
