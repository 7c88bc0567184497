//! Row shapes and the upsert writer for the DuckDB sink.

use crate::SinkResult;
use auditsync_db::{upsert_rows, DbConnection, DbValue, TableSpec, UpsertReport};
use auditsync_model::{
    parse_timestamp, ActionRow, AuditRow, Cell, Column, ColumnKind, OutputMode, ACTION_COLUMNS,
};
use tracing::{debug, warn};

/// Extra key column derived from the modification time.
pub const DATE_PK_COLUMN: &str = "DatePK";

/// Milliseconds since the epoch for `timestamp`, or 0 when it does not parse.
pub fn date_pk(timestamp: &str) -> i64 {
    if timestamp.trim().is_empty() {
        return 0;
    }
    match parse_timestamp(timestamp) {
        Ok(dt) => dt.timestamp_millis(),
        Err(err) => {
            warn!("Unusable modification time for DatePK: {}", err);
            0
        }
    }
}

fn sql_type(kind: ColumnKind) -> &'static str {
    match kind {
        ColumnKind::Index => "BIGINT",
        ColumnKind::Text => "VARCHAR",
        ColumnKind::Number(_) => "DOUBLE",
        ColumnKind::Flag => "BOOLEAN",
    }
}

/// Table for flattened audit rows.
///
/// With `merge_rows` each item keeps a single row that later exports
/// overwrite. Without it every distinct modification time of an audit keeps
/// its own copy of the item.
pub fn audit_table_spec(schema: &str, table: &str, merge_rows: bool) -> TableSpec {
    let spec = Column::ALL
        .iter()
        .fold(TableSpec::new(schema, table), |spec, column| {
            spec.column(column.name(), sql_type(column.kind()))
        })
        .column(DATE_PK_COLUMN, "BIGINT");
    if merge_rows {
        spec.primary_key(&["AuditID", "ItemID"])
    } else {
        spec.primary_key(&["AuditID", "ItemID", DATE_PK_COLUMN])
    }
}

/// Table for actions, named `<table>_actions`.
pub fn actions_table_spec(schema: &str, table: &str, merge_rows: bool) -> TableSpec {
    let spec = ACTION_COLUMNS
        .iter()
        .fold(
            TableSpec::new(schema, format!("{}_actions", table)),
            |spec, &name| {
                let sql_type = match name {
                    "priorityCode" | "statusCode" => "BIGINT",
                    _ => "VARCHAR",
                };
                spec.column(name, sql_type)
            },
        )
        .column(DATE_PK_COLUMN, "BIGINT");
    if merge_rows {
        spec.primary_key(&["actionId"])
    } else {
        spec.primary_key(&["actionId", DATE_PK_COLUMN])
    }
}

/// Audit rows as database values, in [`audit_table_spec`] column order.
pub fn audit_rows_to_db(rows: &[AuditRow]) -> Vec<Vec<DbValue>> {
    rows.iter()
        .map(|row| {
            let mut values: Vec<DbValue> = Column::ALL
                .iter()
                .map(|&column| match row.cell(column) {
                    Cell::Index(index) => DbValue::Integer(index.map(|i| i as i64).unwrap_or(0)),
                    Cell::Text(text) => DbValue::from(text),
                    Cell::Number(_) => DbValue::from(row.numeric(column, OutputMode::Relational)),
                    Cell::Flag(flag) => DbValue::Boolean(flag),
                })
                .collect();
            values.push(DbValue::Integer(date_pk(&row.audit.date_modified)));
            values
        })
        .collect()
}

/// Action rows as database values, in [`actions_table_spec`] column order.
pub fn action_rows_to_db(rows: &[ActionRow]) -> Vec<Vec<DbValue>> {
    rows.iter()
        .map(|row| {
            let mut values: Vec<DbValue> = row
                .to_fields()
                .into_iter()
                .zip(ACTION_COLUMNS)
                .map(|(field, name)| match name {
                    "priorityCode" => DbValue::from(row.priority_code),
                    "statusCode" => DbValue::from(row.status_code),
                    _ => DbValue::Text(field),
                })
                .collect();
            values.push(DbValue::Integer(date_pk(&row.modified_datetime)));
            values
        })
        .collect()
}

/// A ready table plus the connection that owns it.
#[derive(Debug, Clone)]
pub struct RelationalSink {
    conn: DbConnection,
    table: TableSpec,
}

impl RelationalSink {
    pub fn new(conn: DbConnection, table: TableSpec) -> Self {
        Self { conn, table }
    }

    pub fn table(&self) -> &TableSpec {
        &self.table
    }

    pub fn connection(&self) -> &DbConnection {
        &self.conn
    }

    /// Upsert `rows`. `should_commit` is polled before each commit.
    pub fn write(
        &self,
        rows: &[Vec<DbValue>],
        should_commit: Option<&dyn Fn() -> bool>,
    ) -> SinkResult<UpsertReport> {
        let report = upsert_rows(&self.conn, &self.table, rows, should_commit)?;
        debug!(
            table = %self.table.qualified_name(),
            inserted = report.bulk_inserted,
            merged = report.merged,
            "Relational write complete"
        );
        Ok(report)
    }
}
