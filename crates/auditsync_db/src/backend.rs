//! DuckDB connection wrapper.
//!
//! One synchronous connection per process, shared by cheap clones. File
//! databases are guarded by an exclusive lock file for as long as any clone
//! is alive. Statements are traced as `db.*` debug spans carrying the
//! statement's leading keyword, a short hash and the elapsed time.

use crate::lock::{try_lock_exclusive, DbLockGuard, LockError};
use duckdb::types::{Value as DuckValue, ValueRef};
use std::fmt;
use std::path::Path;
use std::rc::Rc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug_span, info, warn};

/// Parameters per INSERT statement before a batch is split.
const MAX_PARAMS_PER_STATEMENT: usize = 999;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Database error: {0}")]
    Database(String),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("Query returned no rows: {0}")]
    NoRows(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Type conversion error: {0}")]
    TypeConversion(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unsupported database URL: {0}")]
    UnsupportedUrl(String),

    #[error("Table {0} does not exist and creation was refused")]
    CreationRefused(String),

    #[error("Write interrupted before commit")]
    Interrupted,

    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),
}

/// Fragments DuckDB uses when an insert collides with an existing key.
const KEY_CONFLICT_MARKERS: [&str; 4] = [
    "duplicate key",
    "violates primary key constraint",
    "violates unique constraint",
    "primary key or unique constraint",
];

impl BackendError {
    /// Primary-key or unique constraint violation. NOT NULL, CHECK and
    /// foreign-key failures are not key conflicts.
    pub fn is_constraint_violation(&self) -> bool {
        let message = match self {
            BackendError::DuckDb(err) => err.to_string(),
            BackendError::Database(message) => message.clone(),
            _ => return false,
        }
        .to_ascii_lowercase();
        KEY_CONFLICT_MARKERS.iter().any(|marker| message.contains(marker))
    }
}

/// A bound parameter or a fetched cell.
#[derive(Debug, Clone, PartialEq)]
pub enum DbValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Boolean(bool),
}

macro_rules! db_value_from {
    ($($ty:ty => |$v:ident| $body:expr),+ $(,)?) => {
        $(impl From<$ty> for DbValue {
            fn from($v: $ty) -> Self {
                $body
            }
        })+
    };
}

db_value_from! {
    i64 => |v| DbValue::Integer(v),
    f64 => |v| DbValue::Real(v),
    bool => |v| DbValue::Boolean(v),
    String => |v| DbValue::Text(v),
    &str => |v| DbValue::Text(v.to_owned()),
}

impl<T: Into<DbValue>> From<Option<T>> for DbValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(DbValue::Null, Into::into)
    }
}

impl DbValue {
    fn to_duck(&self) -> DuckValue {
        match self {
            DbValue::Null => DuckValue::Null,
            DbValue::Integer(v) => DuckValue::BigInt(*v),
            DbValue::Real(v) => DuckValue::Double(*v),
            DbValue::Text(v) => DuckValue::Text(v.clone()),
            DbValue::Boolean(v) => DuckValue::Boolean(*v),
        }
    }

    fn from_duck(cell: ValueRef<'_>) -> Self {
        match cell {
            ValueRef::Null => DbValue::Null,
            ValueRef::Boolean(v) => DbValue::Boolean(v),
            ValueRef::TinyInt(v) => DbValue::Integer(v.into()),
            ValueRef::SmallInt(v) => DbValue::Integer(v.into()),
            ValueRef::Int(v) => DbValue::Integer(v.into()),
            ValueRef::BigInt(v) => DbValue::Integer(v),
            ValueRef::HugeInt(v) => DbValue::Integer(v as i64),
            ValueRef::UTinyInt(v) => DbValue::Integer(v.into()),
            ValueRef::USmallInt(v) => DbValue::Integer(v.into()),
            ValueRef::UInt(v) => DbValue::Integer(v.into()),
            ValueRef::UBigInt(v) => DbValue::Integer(v as i64),
            ValueRef::Float(v) => DbValue::Real(v.into()),
            ValueRef::Double(v) => DbValue::Real(v),
            ValueRef::Text(bytes) => DbValue::Text(String::from_utf8_lossy(bytes).into_owned()),
            _ => {
                warn!("Unsupported DuckDB column type read as NULL");
                DbValue::Null
            }
        }
    }
}

/// Conversion from a fetched cell.
pub trait FromDbValue: Sized {
    fn from_db_value(value: &DbValue) -> Result<Self, BackendError>;
}

fn mismatch(expected: &str, value: &DbValue) -> BackendError {
    BackendError::TypeConversion(format!("expected {}, found {:?}", expected, value))
}

impl FromDbValue for i64 {
    fn from_db_value(value: &DbValue) -> Result<Self, BackendError> {
        match value {
            DbValue::Integer(v) => Ok(*v),
            other => Err(mismatch("integer", other)),
        }
    }
}

impl FromDbValue for f64 {
    fn from_db_value(value: &DbValue) -> Result<Self, BackendError> {
        match value {
            DbValue::Real(v) => Ok(*v),
            DbValue::Integer(v) => Ok(*v as f64),
            other => Err(mismatch("number", other)),
        }
    }
}

impl FromDbValue for String {
    fn from_db_value(value: &DbValue) -> Result<Self, BackendError> {
        match value {
            DbValue::Text(v) => Ok(v.clone()),
            other => Err(mismatch("text", other)),
        }
    }
}

impl FromDbValue for bool {
    fn from_db_value(value: &DbValue) -> Result<Self, BackendError> {
        match value {
            DbValue::Boolean(v) => Ok(*v),
            other => Err(mismatch("boolean", other)),
        }
    }
}

impl<T: FromDbValue> FromDbValue for Option<T> {
    fn from_db_value(value: &DbValue) -> Result<Self, BackendError> {
        match value {
            DbValue::Null => Ok(None),
            other => T::from_db_value(other).map(Some),
        }
    }
}

/// Shared database handle. The lock file is released with the last clone.
#[derive(Clone)]
pub struct DbConnection {
    inner: Rc<duckdb::Connection>,
    lock: Option<Rc<DbLockGuard>>,
}

impl fmt::Debug for DbConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbConnection")
            .field("file_locked", &self.lock.is_some())
            .finish()
    }
}

impl DbConnection {
    /// `duckdb:<path>` or `duckdb::memory:`.
    pub fn open_from_url(url: &str) -> Result<Self, BackendError> {
        match url.strip_prefix("duckdb:") {
            Some(":memory:") => Self::open_duckdb_memory(),
            Some(path) if !path.trim().is_empty() => Self::open_duckdb(Path::new(path.trim())),
            _ => Err(BackendError::UnsupportedUrl(url.to_string())),
        }
    }

    pub fn open_duckdb(path: &Path) -> Result<Self, BackendError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                BackendError::Database(format!("Cannot create {}: {}", parent.display(), e))
            })?;
        }
        let lock = try_lock_exclusive(path)?;
        let inner = duckdb::Connection::open(path)?;
        info!("Opened DuckDB database {}", path.display());
        Ok(Self {
            inner: Rc::new(inner),
            lock: Some(Rc::new(lock)),
        })
    }

    pub fn open_duckdb_memory() -> Result<Self, BackendError> {
        let inner = duckdb::Connection::open_in_memory()?;
        info!("Opened in-memory DuckDB database");
        Ok(Self {
            inner: Rc::new(inner),
            lock: None,
        })
    }

    pub fn execute(&self, sql: &str, params: &[DbValue]) -> Result<u64, BackendError> {
        execute(&self.inner, sql, params)
    }

    pub fn execute_batch(&self, sql: &str) -> Result<(), BackendError> {
        traced("db.batch", sql, || Ok(self.inner.execute_batch(sql)?))
    }

    pub fn query_rows(
        &self,
        sql: &str,
        params: &[DbValue],
    ) -> Result<Vec<Vec<DbValue>>, BackendError> {
        query_rows(&self.inner, sql, params)
    }

    /// First column of the first row.
    pub fn query_scalar<T: FromDbValue>(
        &self,
        sql: &str,
        params: &[DbValue],
    ) -> Result<T, BackendError> {
        let rows = self.query_rows(sql, params)?;
        let cell = rows
            .first()
            .and_then(|row| row.first())
            .ok_or_else(|| BackendError::NoRows(sql.to_string()))?;
        T::from_db_value(cell)
    }

    /// Multi-row INSERT of `rows` into `table`, split to stay under the
    /// parameter limit. Every row must have one value per column.
    pub fn bulk_insert_rows(
        &self,
        table: &str,
        columns: &[&str],
        rows: &[Vec<DbValue>],
    ) -> Result<u64, BackendError> {
        insert_chunked(&self.inner, table, columns, rows)
    }

    /// Run `op` between BEGIN and COMMIT. An error from `op` rolls back.
    pub fn transaction<T, F>(&self, op: F) -> Result<T, BackendError>
    where
        F: FnOnce(&mut DbTransaction<'_>) -> Result<T, BackendError>,
    {
        self.execute_batch("BEGIN TRANSACTION")?;
        let mut tx = DbTransaction { conn: &self.inner };
        match op(&mut tx) {
            Ok(value) => {
                self.execute_batch("COMMIT")?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = self.execute_batch("ROLLBACK") {
                    return Err(BackendError::Transaction(format!(
                        "{} (rollback also failed: {})",
                        err, rollback
                    )));
                }
                Err(err)
            }
        }
    }
}

/// Statements issued inside [`DbConnection::transaction`].
pub struct DbTransaction<'c> {
    conn: &'c duckdb::Connection,
}

impl DbTransaction<'_> {
    pub fn execute(&mut self, sql: &str, params: &[DbValue]) -> Result<u64, BackendError> {
        execute(self.conn, sql, params)
    }

    pub fn query_rows(
        &mut self,
        sql: &str,
        params: &[DbValue],
    ) -> Result<Vec<Vec<DbValue>>, BackendError> {
        query_rows(self.conn, sql, params)
    }

    pub fn bulk_insert_rows(
        &mut self,
        table: &str,
        columns: &[&str],
        rows: &[Vec<DbValue>],
    ) -> Result<u64, BackendError> {
        insert_chunked(self.conn, table, columns, rows)
    }
}

fn traced<T>(
    name: &'static str,
    sql: &str,
    op: impl FnOnce() -> Result<T, BackendError>,
) -> Result<T, BackendError> {
    let span = debug_span!(
        "db.statement",
        kind = name,
        op = sql.split_whitespace().next().unwrap_or(""),
        sql_hash = %statement_hash(sql),
        duration_ms = tracing::field::Empty
    );
    let _entered = span.enter();
    let started = Instant::now();
    let result = op();
    span.record("duration_ms", started.elapsed().as_millis() as u64);
    result
}

fn execute(conn: &duckdb::Connection, sql: &str, params: &[DbValue]) -> Result<u64, BackendError> {
    traced("db.execute", sql, || {
        let bound: Vec<DuckValue> = params.iter().map(DbValue::to_duck).collect();
        let changed = conn.prepare(sql)?.execute(duckdb::params_from_iter(bound))?;
        Ok(changed as u64)
    })
}

fn query_rows(
    conn: &duckdb::Connection,
    sql: &str,
    params: &[DbValue],
) -> Result<Vec<Vec<DbValue>>, BackendError> {
    traced("db.query", sql, || {
        let bound: Vec<DuckValue> = params.iter().map(DbValue::to_duck).collect();
        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query(duckdb::params_from_iter(bound))?;
        let width = rows.as_ref().map_or(0, |s| s.column_count());
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(width);
            for index in 0..width {
                values.push(DbValue::from_duck(row.get_ref(index)?));
            }
            out.push(values);
        }
        Ok(out)
    })
}

fn insert_chunked(
    conn: &duckdb::Connection,
    table: &str,
    columns: &[&str],
    rows: &[Vec<DbValue>],
) -> Result<u64, BackendError> {
    if rows.is_empty() {
        return Ok(0);
    }
    if columns.is_empty() || columns.len() > MAX_PARAMS_PER_STATEMENT {
        return Err(BackendError::InvalidInput(format!(
            "cannot insert {} columns into {}",
            columns.len(),
            table
        )));
    }
    if let Some((index, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != columns.len()) {
        return Err(BackendError::InvalidInput(format!(
            "row {} has {} values for {} columns",
            index,
            row.len(),
            columns.len()
        )));
    }

    let placeholders = format!("({})", vec!["?"; columns.len()].join(", "));
    let head = format!(
        "INSERT INTO {} ({}) VALUES ",
        quote_ident_path(table),
        quote_column_list(columns)
    );
    let mut inserted = 0;
    for chunk in rows.chunks(MAX_PARAMS_PER_STATEMENT / columns.len()) {
        let sql = format!("{}{}", head, vec![placeholders.as_str(); chunk.len()].join(", "));
        let params: Vec<DbValue> = chunk.iter().flatten().cloned().collect();
        inserted += execute(conn, &sql, &params)?;
    }
    Ok(inserted)
}

pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote each dot-separated part of `schema.table`.
pub(crate) fn quote_ident_path(path: &str) -> String {
    path.split('.').map(quote_ident).collect::<Vec<_>>().join(".")
}

pub(crate) fn quote_column_list(columns: &[&str]) -> String {
    columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", ")
}

// FNV-1a, 64 bit.
fn statement_hash(sql: &str) -> String {
    let hash = sql
        .bytes()
        .fold(0xcbf2_9ce4_8422_2325_u64, |acc, byte| {
            (acc ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
        });
    format!("{:016x}", hash)
}
