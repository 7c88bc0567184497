//! Output writers for exported audits.
//!
//! Each writer takes already-flattened rows or fetched bytes and puts them
//! at their destination:
//! - append-only CSV files (audit rows, actions, web report links)
//! - one Parquet file per audit, staged and renamed into place
//! - rendered documents, JSON and media files
//! - relational rows for the DuckDB sink

use thiserror::Error;

mod csv_append;
mod files;
mod parquet_sink;
mod relational;

pub use csv_append::{
    append_action_rows, append_audit_rows, append_csv_rows, append_web_report_link, CsvNaming,
    WebReportLink, ACTIONS_CSV_FILENAME, WEB_REPORT_LINKS_FILENAME,
};
pub use files::{write_document, write_json, write_media};
pub use parquet_sink::{audit_rows_schema, write_audit_parquet, ParquetSink};
pub use relational::{
    action_rows_to_db, actions_table_spec, audit_rows_to_db, audit_table_spec, date_pk,
    RelationalSink, DATE_PK_COLUMN,
};

/// Errors returned by sink writers.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("{message}")]
    Message { message: String },
    #[error("{message}")]
    Source {
        message: String,
        #[source]
        source: anyhow::Error,
    },
    /// The write was abandoned before commit at the caller's request.
    #[error("Write interrupted before commit")]
    Interrupted,
}

pub type SinkResult<T> = std::result::Result<T, SinkError>;

impl SinkError {
    pub(crate) fn message(message: impl Into<String>) -> Self {
        SinkError::Message {
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for SinkError {
    fn from(err: anyhow::Error) -> Self {
        SinkError::Source {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<auditsync_db::BackendError> for SinkError {
    fn from(err: auditsync_db::BackendError) -> Self {
        match err {
            auditsync_db::BackendError::Interrupted => SinkError::Interrupted,
            other => SinkError::Source {
                message: other.to_string(),
                source: anyhow::Error::new(other),
            },
        }
    }
}
