//! Per-audit fan-out to every configured output format.

use crate::config::ConfigError;
use crate::context::SyncContext;
use crate::format::ExportFormat;
use crate::shutdown::Shutdown;
use crate::watermark::WatermarkError;
use auditsync_client::{ApiError, InspectionApi};
use auditsync_db::TableSetup;
use auditsync_model::{
    flatten, locate_media, resolve_export_filename, AuditDocument, AuditRow, ModelError,
};
use auditsync_sinks::{
    append_audit_rows, append_web_report_link, audit_rows_to_db, write_audit_parquet,
    write_document, write_json, write_media, RelationalSink, SinkError, WebReportLink,
};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ExportError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Sink(SinkError),
    #[error(transparent)]
    Watermark(#[from] WatermarkError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Relational table setup failed: {0}")]
    TableSetup(String),
    #[error("Interrupted by user")]
    Interrupted,
}

impl From<SinkError> for ExportError {
    fn from(err: SinkError) -> Self {
        match err {
            SinkError::Interrupted => ExportError::Interrupted,
            other => ExportError::Sink(other),
        }
    }
}

impl ExportError {
    /// Errors that end the run instead of waiting for the next pass.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ExportError::Watermark(_)
                | ExportError::Config(_)
                | ExportError::TableSetup(_)
                | ExportError::Interrupted
        )
    }
}

/// What happened to one format of one audit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatOutcome {
    Written,
    Skipped(&'static str),
}

/// Exports single audits. Holds no state between audits.
pub struct Dispatcher<'a> {
    api: &'a dyn InspectionApi,
    ctx: &'a SyncContext,
    shutdown: &'a Shutdown,
    relational: &'a TableSetup,
}

impl<'a> Dispatcher<'a> {
    pub fn new(
        api: &'a dyn InspectionApi,
        ctx: &'a SyncContext,
        shutdown: &'a Shutdown,
        relational: &'a TableSetup,
    ) -> Self {
        Self {
            api,
            ctx,
            shutdown,
            relational,
        }
    }

    /// Run every audit format, in configured order, for one document.
    pub fn export_audit(&self, doc: &AuditDocument) -> Result<(), ExportError> {
        let filename =
            resolve_export_filename(doc, self.ctx.config.filename_item_id.as_deref());
        let needs_rows = self.ctx.audit_formats().any(|f| {
            matches!(
                f,
                ExportFormat::Csv | ExportFormat::Sql | ExportFormat::Parquet
            )
        });
        let rows = if needs_rows {
            flatten(doc, self.ctx.config.include_inactive)
        } else {
            Vec::new()
        };

        for format in self.ctx.audit_formats() {
            if self.shutdown.is_requested() {
                return Err(ExportError::Interrupted);
            }
            match self.export_format(format, doc, &filename, &rows)? {
                FormatOutcome::Written => {
                    debug!(audit_id = doc.audit_id(), format = %format, "Format exported")
                }
                FormatOutcome::Skipped(reason) => {
                    warn!(audit_id = doc.audit_id(), format = %format, "Skipped: {}", reason)
                }
            }
        }
        Ok(())
    }

    fn export_format(
        &self,
        format: ExportFormat,
        doc: &AuditDocument,
        filename: &str,
        rows: &[AuditRow],
    ) -> Result<FormatOutcome, ExportError> {
        let config = &self.ctx.config;
        let export_dir = self.ctx.export_dir();
        match format {
            ExportFormat::Pdf | ExportFormat::Docx => {
                let Some(render) = format.render_format() else {
                    return Ok(FormatOutcome::Skipped("not a document format"));
                };
                let preference_id = config.preferences.get(doc.template_id()).map(String::as_str);
                info!(
                    "Saving audit {} as {}",
                    doc.audit_id(),
                    render.extension()
                );
                let bytes = self
                    .api
                    .fetch_rendered(doc.audit_id(), preference_id, render)?;
                write_document(export_dir, filename, render.extension(), &bytes)?;
            }
            ExportFormat::Json => {
                write_json(export_dir, filename, doc.raw())?;
            }
            ExportFormat::Csv => {
                let file_name = config.csv_naming.file_name(
                    doc.template_id(),
                    doc.template_name().unwrap_or_default(),
                );
                let mut rows = rows.to_vec();
                append_audit_rows(&export_dir.join(file_name), &mut rows)?;
            }
            ExportFormat::Media => {
                let media_dir = self.ctx.media_dir(filename);
                for target in locate_media(doc) {
                    if self.shutdown.is_requested() {
                        return Err(ExportError::Interrupted);
                    }
                    let mut content = self.api.fetch_media(doc.audit_id(), &target.media_id)?;
                    write_media(&media_dir, &target.media_id, &target.extension, &mut content)?;
                }
            }
            ExportFormat::WebReportLink => {
                let url = self.api.fetch_web_report_link(doc.audit_id())?;
                let link = WebReportLink {
                    template_id: doc.template_id().to_string(),
                    template_name: doc.template_name().unwrap_or_default().to_string(),
                    audit_id: doc.audit_id().to_string(),
                    audit_name: doc.audit_name().unwrap_or_default().to_string(),
                    url,
                };
                append_web_report_link(export_dir, &link)?;
            }
            ExportFormat::Sql => {
                let TableSetup::Ready { conn, table } = self.relational else {
                    return Ok(FormatOutcome::Skipped("relational table is not available"));
                };
                let sink = RelationalSink::new(conn.clone(), table.clone());
                let shutdown = self.shutdown;
                let should_commit = move || !shutdown.is_requested();
                sink.write(&audit_rows_to_db(rows), Some(&should_commit))?;
            }
            ExportFormat::Parquet => {
                write_audit_parquet(&self.ctx.parquet_dir(), doc.audit_id(), rows)?;
            }
            ExportFormat::Actions | ExportFormat::ActionsSql => {
                return Ok(FormatOutcome::Skipped("actions are exported separately"));
            }
        }
        Ok(FormatOutcome::Written)
    }
}
