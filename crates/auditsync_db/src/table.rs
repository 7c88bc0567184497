//! Table definitions and one-time table setup.

use crate::backend::{quote_column_list, quote_ident, BackendError, DbConnection, DbValue};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub sql_type: &'static str,
}

/// Shape of a sink table: columns in insert order plus the primary key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    pub schema: String,
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub primary_key: Vec<String>,
}

impl TableSpec {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
        }
    }

    pub fn column(mut self, name: impl Into<String>, sql_type: &'static str) -> Self {
        self.columns.push(ColumnDef {
            name: name.into(),
            sql_type,
        });
        self
    }

    pub fn primary_key(mut self, columns: &[&str]) -> Self {
        self.primary_key = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    /// `schema.name`, unquoted.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Positions of the primary-key columns within a row.
    pub fn key_indices(&self) -> Result<Vec<usize>, BackendError> {
        self.primary_key
            .iter()
            .map(|key| {
                self.columns
                    .iter()
                    .position(|c| &c.name == key)
                    .ok_or_else(|| {
                        BackendError::InvalidInput(format!(
                            "Primary key column '{}' is not a column of {}",
                            key,
                            self.qualified_name()
                        ))
                    })
            })
            .collect()
    }

    pub fn create_sql(&self) -> String {
        let mut defs: Vec<String> = self
            .columns
            .iter()
            .map(|c| format!("{} {}", quote_ident(&c.name), c.sql_type))
            .collect();
        if !self.primary_key.is_empty() {
            let keys: Vec<&str> = self.primary_key.iter().map(String::as_str).collect();
            defs.push(format!("PRIMARY KEY ({})", quote_column_list(&keys)));
        }
        format!(
            "CREATE SCHEMA IF NOT EXISTS {schema};\nCREATE TABLE {schema}.{name} (\n    {defs}\n);",
            schema = quote_ident(&self.schema),
            name = quote_ident(&self.name),
            defs = defs.join(",\n    ")
        )
    }
}

/// What to do when a sink table is missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreatePolicy {
    Allow,
    Refuse,
    /// Ask the operator through the supplied confirm callback.
    Ask,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableStatus {
    Existing,
    Created,
}

pub fn table_exists(conn: &DbConnection, spec: &TableSpec) -> Result<bool, BackendError> {
    let count: i64 = conn.query_scalar(
        "SELECT COUNT(*) FROM information_schema.tables WHERE table_schema = ? AND table_name = ?",
        &[
            DbValue::from(spec.schema.as_str()),
            DbValue::from(spec.name.as_str()),
        ],
    )?;
    Ok(count > 0)
}

/// Make sure `spec` exists, creating it when `policy` (or the operator) allows.
///
/// A refusal is returned as [`BackendError::CreationRefused`].
pub fn ensure_table(
    conn: &DbConnection,
    spec: &TableSpec,
    policy: CreatePolicy,
    confirm: &mut dyn FnMut(&TableSpec) -> bool,
) -> Result<TableStatus, BackendError> {
    if table_exists(conn, spec)? {
        return Ok(TableStatus::Existing);
    }
    info!(table = %spec.qualified_name(), "Table not found");

    let allowed = match policy {
        CreatePolicy::Allow => true,
        CreatePolicy::Refuse => false,
        CreatePolicy::Ask => confirm(spec),
    };
    if !allowed {
        warn!(
            table = %spec.qualified_name(),
            "Create the table before continuing, or set allow_table_creation to true"
        );
        return Err(BackendError::CreationRefused(spec.qualified_name()));
    }

    conn.execute_batch(&spec.create_sql())?;
    info!(table = %spec.qualified_name(), "Created table");
    Ok(TableStatus::Created)
}

/// Result of the once-per-run relational setup.
#[derive(Debug)]
pub enum TableSetup {
    NotStarted,
    Ready { conn: DbConnection, table: TableSpec },
    Failed { reason: String },
}

impl TableSetup {
    pub fn is_started(&self) -> bool {
        !matches!(self, TableSetup::NotStarted)
    }
}
