//! Relational sink backend.
//!
//! DuckDB behind a small synchronous API: one exclusive writer per database
//! file, closure-scoped transactions, bulk insert, and an upsert that falls
//! back to per-row merge when the batch collides with existing keys.

pub mod backend;
pub mod lock;
pub mod table;
pub mod upsert;

pub use backend::{BackendError, DbConnection, DbTransaction, DbValue, FromDbValue};
pub use lock::{lock_path_for, try_lock_exclusive, DbLockGuard, LockError};
pub use table::{ensure_table, ColumnDef, CreatePolicy, TableSetup, TableSpec, TableStatus};
pub use upsert::{upsert_rows, UpsertReport};
