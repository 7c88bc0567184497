//! The sync loop: one discovery and export pass, optionally repeated.

use crate::actions::{export_actions, ActionTargets};
use crate::context::SyncContext;
use crate::discovery::{discover_candidates, Clock, SystemClock};
use crate::dispatch::{Dispatcher, ExportError};
use crate::format::ExportFormat;
use crate::shutdown::Shutdown;
use crate::watermark::Stream;
use auditsync_client::{DiscoveryQuery, InspectionApi};
use auditsync_db::{ensure_table, BackendError, DbConnection, TableSetup, TableSpec};
use auditsync_model::AuditDocument;
use auditsync_sinks::{actions_table_spec, audit_table_spec};
use std::io::{self, BufRead, Write};
use tracing::{error, info, warn};

static SYSTEM_CLOCK: SystemClock = SystemClock;

/// Counts for one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    pub discovered: u64,
    pub exported: usize,
    pub deferred: usize,
    pub actions: usize,
}

/// Ask on stdin whether a missing table may be created.
pub fn confirm_on_stdin(spec: &TableSpec) -> bool {
    confirm_table_creation(spec, &mut io::stdin().lock(), &mut io::stdout())
}

/// Prompt on `output` and read a yes/no answer from `input`. Anything but
/// an explicit yes, including an I/O failure, refuses.
fn confirm_table_creation(
    spec: &TableSpec,
    input: &mut impl BufRead,
    output: &mut impl Write,
) -> bool {
    let prompted = write!(
        output,
        "Table {} does not exist. Create it? [y/N]: ",
        spec.qualified_name()
    )
    .and_then(|()| output.flush());
    if let Err(err) = prompted {
        warn!("Could not show table creation prompt: {}", err);
        return false;
    }
    let mut answer = String::new();
    if let Err(err) = input.read_line(&mut answer) {
        warn!("Could not read table creation answer: {}", err);
        return false;
    }
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Owns the state that outlives a single pass: the database connection and
/// the once-per-run table setup results.
pub struct SyncRunner<'a> {
    api: &'a dyn InspectionApi,
    ctx: &'a SyncContext,
    shutdown: &'a Shutdown,
    clock: &'a dyn Clock,
    confirm: Box<dyn FnMut(&TableSpec) -> bool + 'a>,
    conn: Option<DbConnection>,
    audit_table: TableSetup,
    actions_table: TableSetup,
}

impl<'a> SyncRunner<'a> {
    pub fn new(api: &'a dyn InspectionApi, ctx: &'a SyncContext, shutdown: &'a Shutdown) -> Self {
        Self {
            api,
            ctx,
            shutdown,
            clock: &SYSTEM_CLOCK,
            confirm: Box::new(confirm_on_stdin),
            conn: None,
            audit_table: TableSetup::NotStarted,
            actions_table: TableSetup::NotStarted,
        }
    }

    pub fn with_clock(mut self, clock: &'a dyn Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_confirm(mut self, confirm: impl FnMut(&TableSpec) -> bool + 'a) -> Self {
        self.confirm = Box::new(confirm);
        self
    }

    /// Repeat passes every `sync_delay` until interrupted or a fatal error.
    pub fn run_loop(&mut self) -> Result<(), ExportError> {
        let delay = self.ctx.config.sync_delay;
        loop {
            match self.run_pass() {
                Ok(report) => info!(
                    exported = report.exported,
                    deferred = report.deferred,
                    actions = report.actions,
                    "Sync pass complete"
                ),
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => error!("Sync pass failed, retrying next cycle: {}", err),
            }
            info!("Next check will be in {} seconds. Waiting...", delay.as_secs());
            if !self.shutdown.sleep(delay) {
                return Err(ExportError::Interrupted);
            }
        }
    }

    /// One pass: actions first, then every ready audit in discovery order.
    ///
    /// The audits watermark moves to each audit's `modified_at` only after
    /// all of its formats are written, so an aborted pass resumes at the
    /// first unfinished audit.
    pub fn run_pass(&mut self) -> Result<PassReport, ExportError> {
        let mut report = PassReport::default();

        if self.ctx.wants(ExportFormat::ActionsSql) {
            if !self.actions_table.is_started() {
                let spec = actions_table_spec(
                    &self.ctx.config.database_schema,
                    &self.ctx.config.sql_table,
                    self.ctx.config.actions_merge_rows,
                );
                self.actions_table = self.setup_table(spec)?;
            }
            report.actions += export_actions(
                self.api,
                self.ctx,
                ActionTargets::Relational(&self.actions_table),
                self.shutdown,
            )?;
        }
        if self.ctx.wants(ExportFormat::Actions) {
            report.actions +=
                export_actions(self.api, self.ctx, ActionTargets::Csv, self.shutdown)?;
        }
        if self.ctx.audit_formats().next().is_none() {
            return Ok(report);
        }

        let ctx = self.ctx;
        let config = &ctx.config;
        let query = DiscoveryQuery {
            modified_after: ctx.watermarks.read(Stream::Audits)?,
            template_ids: config.template_filter.resolve()?,
            completed: config.completed,
            archived: config.archived,
        };
        let candidates =
            discover_candidates(self.api, &query, config.media_sync_offset, self.clock)?;
        report.discovered = candidates.total;
        report.deferred = candidates.deferred.len();
        if candidates.ready.is_empty() {
            return Ok(report);
        }

        if self.ctx.wants(ExportFormat::Sql) && !self.audit_table.is_started() {
            let spec =
                audit_table_spec(&config.database_schema, &config.sql_table, config.merge_rows);
            self.audit_table = self.setup_table(spec)?;
        }

        let dispatcher = Dispatcher::new(self.api, self.ctx, self.shutdown, &self.audit_table);
        let total = candidates.ready.len();
        for (index, audit) in candidates.ready.iter().enumerate() {
            if self.shutdown.is_requested() {
                return Err(ExportError::Interrupted);
            }
            info!("Processing audit ({}/{})", index + 1, total);
            info!("Downloading {}", audit.audit_id);
            let doc = AuditDocument::from_value(self.api.fetch_audit(&audit.audit_id)?)?;
            dispatcher.export_audit(&doc)?;

            let stamp = if audit.modified_at.trim().is_empty() {
                doc.modified_at().unwrap_or_default()
            } else {
                audit.modified_at.as_str()
            };
            if !stamp.is_empty() {
                self.ctx.watermarks.write(Stream::Audits, stamp)?;
            }
            report.exported += 1;
        }
        Ok(report)
    }

    /// Open the shared connection if needed and make sure `spec` exists.
    ///
    /// A refused creation is fatal. Other failures leave the table marked
    /// failed so relational output is skipped for the rest of the run.
    fn setup_table(&mut self, spec: TableSpec) -> Result<TableSetup, ExportError> {
        if self.conn.is_none() {
            match DbConnection::open_from_url(&self.ctx.config.database_url) {
                Ok(conn) => self.conn = Some(conn),
                Err(err) => return Ok(failed_setup(&spec, err)),
            }
        }
        let Some(conn) = self.conn.clone() else {
            return Ok(TableSetup::NotStarted);
        };
        match ensure_table(&conn, &spec, self.ctx.config.table_creation, &mut *self.confirm) {
            Ok(status) => {
                info!(table = %spec.qualified_name(), ?status, "Relational table ready");
                Ok(TableSetup::Ready { conn, table: spec })
            }
            Err(BackendError::CreationRefused(table)) => Err(ExportError::TableSetup(format!(
                "table {} does not exist and creation was not allowed",
                table
            ))),
            Err(err) => Ok(failed_setup(&spec, err)),
        }
    }
}

fn failed_setup(spec: &TableSpec, err: BackendError) -> TableSetup {
    error!(
        table = %spec.qualified_name(),
        "Relational export disabled for this run: {}", err
    );
    TableSetup::Failed {
        reason: err.to_string(),
    }
}
