//! Audit document model for the audit sync pipeline.
//!
//! Everything in this crate is pure: documents come in as JSON, rows and
//! media references come out. No network or filesystem access happens here.
//!
//! - [`AuditDocument`]: parsed audit with an index-based item arena
//! - [`flatten`]: audit → fixed-schema tabular rows
//! - [`locate_media`]: audit → media ids to download
//! - [`resolve_export_filename`]: audit → base name for exported files
//! - [`ActionRecord`]: flat action entity and its row form

mod actions;
mod document;
mod error;
mod filename;
mod flatten;
mod lenient;
mod media;
mod row;
mod tree;

pub use actions::{
    action_priority_label, action_status_label, ActionRecord, ActionRow, ACTION_COLUMNS,
};
pub use document::{
    AuditData, AuditDocument, Authorship, Item, ItemOptions, MediaRef, Responses, Scoring,
    SelectedOption, TemplateData,
};
pub use error::{ModelError, Result};
pub use filename::{resolve_export_filename, sanitize_file_stem, AUDIT_TITLE_ITEM_ID};
pub use flatten::{assign_sorting_index, flatten};
pub use media::{locate_media, MediaTarget, DEFAULT_MEDIA_EXTENSION};
pub use row::{
    AuditFields, AuditRow, Cell, Column, ColumnKind, EmptyNumeric, NumericClass, OutputMode,
};
pub use tree::{ItemNode, ItemTree, NodeId};

/// Epoch sentinel used when no watermark has been persisted yet.
pub const BEGINNING_OF_TIME: &str = "2000-01-01T00:00:00.000Z";

/// Parse a remote ISO-8601 timestamp into UTC.
///
/// Accepts RFC 3339 with or without fractional seconds.
pub fn parse_timestamp(value: &str) -> Result<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(value.trim())
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| ModelError::InvalidTimestamp {
            value: value.to_string(),
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_timestamp_accepts_millis_and_offsets() {
        let a = parse_timestamp("2000-01-01T00:00:00.000Z").unwrap();
        let b = parse_timestamp("2000-01-01T10:00:00+10:00").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn parse_timestamp_rejects_garbage() {
        let err = parse_timestamp("yesterday").unwrap_err();
        assert!(matches!(err, ModelError::InvalidTimestamp { .. }));
    }
}
