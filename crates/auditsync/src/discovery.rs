//! Candidate discovery and the media readiness gate.

use crate::config::ConfigError;
use auditsync_client::{ApiError, DiscoveredAudit, DiscoveryQuery, InspectionApi};
use auditsync_model::parse_timestamp;
use chrono::{DateTime, Utc};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// Which templates a discovery search is scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TemplateFilter {
    #[default]
    All,
    Ids(Vec<String>),
    /// Newline-delimited id list, read at the start of each pass.
    ListFile(PathBuf),
}

impl TemplateFilter {
    /// Trimmed, non-empty ids. No ids at all means no filter.
    pub fn from_ids(ids: impl IntoIterator<Item = String>) -> Self {
        let ids: Vec<String> = ids
            .into_iter()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .collect();
        if ids.is_empty() {
            TemplateFilter::All
        } else {
            TemplateFilter::Ids(ids)
        }
    }

    pub fn resolve(&self) -> Result<Vec<String>, ConfigError> {
        match self {
            TemplateFilter::All => Ok(Vec::new()),
            TemplateFilter::Ids(ids) => Ok(ids.clone()),
            TemplateFilter::ListFile(path) => {
                let content = fs::read_to_string(path).map_err(|source| ConfigError::TemplateList {
                    path: path.clone(),
                    source,
                })?;
                Ok(content
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(str::to_string)
                    .collect())
            }
        }
    }
}

/// Source of wall-clock time for the readiness gate.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// True once more than `offset` has passed since `modified_at`.
///
/// An unparseable timestamp counts as ready so the audit is not held back
/// forever.
pub fn is_ready(modified_at: &str, offset: Duration, now: DateTime<Utc>) -> bool {
    let modified = match parse_timestamp(modified_at) {
        Ok(modified) => modified,
        Err(err) => {
            warn!("Cannot apply media sync offset: {}", err);
            return true;
        }
    };
    match (now - modified).to_std() {
        Ok(elapsed) => elapsed > offset,
        Err(_) => false,
    }
}

/// One discovery search, split by the readiness gate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Candidates {
    pub total: u64,
    /// Ready audits, in the order the API returned them.
    pub ready: Vec<DiscoveredAudit>,
    pub deferred: Vec<DiscoveredAudit>,
}

pub fn discover_candidates(
    api: &dyn InspectionApi,
    query: &DiscoveryQuery,
    media_sync_offset: Duration,
    clock: &dyn Clock,
) -> Result<Candidates, ApiError> {
    let discovery = api.discover(query)?;
    info!("{} audits discovered", discovery.total);

    let now = clock.now();
    let mut candidates = Candidates {
        total: discovery.total,
        ..Candidates::default()
    };
    for audit in discovery.audits {
        if is_ready(&audit.modified_at, media_sync_offset, now) {
            candidates.ready.push(audit);
        } else {
            info!(
                "Audit {} modified too recently, some media may not have completed syncing. \
                 Skipping export until next sync cycle",
                audit.audit_id
            );
            candidates.deferred.push(audit);
        }
    }
    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn readiness_gate_uses_elapsed_time() {
        let offset = Duration::from_secs(600);
        assert!(!is_ready("2024-06-01T11:55:00.000Z", offset, now()));
        assert!(is_ready("2024-06-01T11:48:20.000Z", offset, now()));
        assert!(!is_ready("2024-06-01T11:50:00.000Z", offset, now()));
    }

    #[test]
    fn future_and_garbage_timestamps() {
        let offset = Duration::from_secs(600);
        assert!(!is_ready("2024-06-01T13:00:00.000Z", offset, now()));
        assert!(is_ready("yesterday", offset, now()));
    }

    #[test]
    fn id_list_is_trimmed() {
        let filter = TemplateFilter::from_ids(["a ".to_string(), "".to_string(), " b".to_string()]);
        assert_eq!(filter, TemplateFilter::Ids(vec!["a".into(), "b".into()]));
        assert_eq!(TemplateFilter::from_ids(Vec::new()), TemplateFilter::All);
    }

    #[test]
    fn list_file_is_read_line_by_line() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "template_a\n\n  template_b  ").unwrap();
        let filter = TemplateFilter::ListFile(file.path().to_path_buf());
        assert_eq!(filter.resolve().unwrap(), vec!["template_a", "template_b"]);

        let missing = TemplateFilter::ListFile(PathBuf::from("/nonexistent/ids.txt"));
        assert!(matches!(missing.resolve(), Err(ConfigError::TemplateList { .. })));
    }
}
