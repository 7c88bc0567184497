//! Output format selection.

use auditsync_client::RenderFormat;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExportFormat {
    Pdf,
    Docx,
    Json,
    Csv,
    Media,
    WebReportLink,
    Sql,
    Parquet,
    Actions,
    ActionsSql,
}

impl ExportFormat {
    pub const ALL: [ExportFormat; 10] = [
        ExportFormat::Pdf,
        ExportFormat::Docx,
        ExportFormat::Json,
        ExportFormat::Csv,
        ExportFormat::Media,
        ExportFormat::WebReportLink,
        ExportFormat::Sql,
        ExportFormat::Parquet,
        ExportFormat::Actions,
        ExportFormat::ActionsSql,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ExportFormat::Pdf => "pdf",
            ExportFormat::Docx => "docx",
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
            ExportFormat::Media => "media",
            ExportFormat::WebReportLink => "web-report-link",
            ExportFormat::Sql => "sql",
            ExportFormat::Parquet => "parquet",
            ExportFormat::Actions => "actions",
            ExportFormat::ActionsSql => "actions-sql",
        }
    }

    /// Formats produced per audit, as opposed to the actions stream.
    pub fn is_audit_format(self) -> bool {
        !matches!(self, ExportFormat::Actions | ExportFormat::ActionsSql)
    }

    pub fn render_format(self) -> Option<RenderFormat> {
        match self {
            ExportFormat::Pdf => Some(RenderFormat::Pdf),
            ExportFormat::Docx => Some(RenderFormat::Docx),
            _ => None,
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        ExportFormat::ALL
            .into_iter()
            .find(|f| f.as_str() == normalized)
            .ok_or_else(|| s.to_string())
    }
}

/// Parse requested formats in order. Unknown names are logged and dropped,
/// repeats are dropped, and an empty request means pdf.
pub fn parse_formats<S: AsRef<str>>(requested: &[S]) -> Vec<ExportFormat> {
    if requested.is_empty() {
        return vec![ExportFormat::Pdf];
    }
    let mut formats = Vec::new();
    for name in requested {
        match name.as_ref().parse::<ExportFormat>() {
            Ok(format) if !formats.contains(&format) => formats.push(format),
            Ok(_) => {}
            Err(invalid) => {
                let valid: Vec<&str> = ExportFormat::ALL.iter().map(|f| f.as_str()).collect();
                warn!(
                    "{} is not a valid export format. Valid options are {}",
                    invalid,
                    valid.join(", ")
                );
            }
        }
    }
    formats
}
