//! Append-only CSV outputs.
//!
//! Files are opened in append mode and never rewritten. The header goes in
//! only when the file is new or empty, and every field is quoted.

use crate::SinkResult;
use anyhow::Context;
use auditsync_model::{
    assign_sorting_index, sanitize_file_stem, ActionRow, AuditRow, Column, OutputMode,
    ACTION_COLUMNS,
};
use csv::{QuoteStyle, WriterBuilder};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const ACTIONS_CSV_FILENAME: &str = "iauditor_actions.csv";
pub const WEB_REPORT_LINKS_FILENAME: &str = "web-report-links.csv";

const WEB_REPORT_HEADER: [&str; 5] = [
    "Template ID",
    "Template Name",
    "Audit ID",
    "Audit Name",
    "Web Report Link",
];

/// How audit CSV files are named.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CsvNaming {
    /// `<template_id>.csv`
    TemplateId,
    /// `<template name> - <template_id>.csv`
    TemplateName,
    /// One shared file named after the configuration.
    SingleFile(String),
}

impl CsvNaming {
    pub fn file_stem(&self, template_id: &str, template_name: &str) -> String {
        match self {
            CsvNaming::TemplateId => sanitize_file_stem(template_id),
            CsvNaming::TemplateName => {
                format!("{} - {}", template_name, template_id).replace(['/', '\\'], " ")
            }
            CsvNaming::SingleFile(config_name) => sanitize_file_stem(config_name),
        }
    }

    pub fn file_name(&self, template_id: &str, template_name: &str) -> String {
        format!("{}.csv", self.file_stem(template_id, template_name))
    }
}

/// A row of `web-report-links.csv`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebReportLink {
    pub template_id: String,
    pub template_name: String,
    pub audit_id: String,
    pub audit_name: String,
    pub url: String,
}

/// Append `rows` to the CSV at `path`, writing `header` first if the file is new.
pub fn append_csv_rows<I, R, T>(path: &Path, header: &[&str], rows: I) -> SinkResult<u64>
where
    I: IntoIterator<Item = R>,
    R: IntoIterator<Item = T>,
    T: AsRef<[u8]>,
{
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    let is_new = fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open CSV file: {}", path.display()))?;
    let mut writer = WriterBuilder::new()
        .quote_style(QuoteStyle::Always)
        .from_writer(file);

    if is_new {
        info!("Creating {}", path.display());
        writer
            .write_record(header)
            .with_context(|| format!("Failed to write CSV header: {}", path.display()))?;
    }

    let mut count = 0u64;
    for row in rows {
        writer
            .write_record(row)
            .with_context(|| format!("Failed to append CSV row: {}", path.display()))?;
        count += 1;
    }
    writer
        .flush()
        .with_context(|| format!("Failed to flush CSV file: {}", path.display()))?;

    debug!(path = %path.display(), rows = count, "Appended CSV rows");
    Ok(count)
}

/// Number the audit's rows 1..=n and append them to `path`.
pub fn append_audit_rows(path: &Path, rows: &mut [AuditRow]) -> SinkResult<u64> {
    assign_sorting_index(rows);
    let header: Vec<&str> = Column::ALL.iter().map(|c| c.name()).collect();
    append_csv_rows(path, &header, rows.iter().map(|r| r.render(OutputMode::Csv)))
}

pub fn append_action_rows(export_dir: &Path, rows: &[ActionRow]) -> SinkResult<PathBuf> {
    let path = export_dir.join(ACTIONS_CSV_FILENAME);
    info!("Exporting {} actions to {}", rows.len(), path.display());
    append_csv_rows(&path, &ACTION_COLUMNS, rows.iter().map(|r| r.to_fields()))?;
    Ok(path)
}

pub fn append_web_report_link(export_dir: &Path, link: &WebReportLink) -> SinkResult<PathBuf> {
    let path = export_dir.join(WEB_REPORT_LINKS_FILENAME);
    let record = [
        link.template_id.as_str(),
        link.template_name.as_str(),
        link.audit_id.as_str(),
        link.audit_name.as_str(),
        link.url.as_str(),
    ];
    append_csv_rows(&path, &WEB_REPORT_HEADER, [record])?;
    Ok(path)
}
