//! Per-audit Parquet output.
//!
//! Each audit lands in its own file, `<dir>/<audit_id>.parquet`. Rows are
//! written to a hidden temp file next to the target and renamed into place
//! on commit, so a reader never sees a half-written audit.

use crate::{SinkError, SinkResult};
use anyhow::Context;
use arrow::array::{ArrayRef, BooleanBuilder, Float64Builder, Int64Builder, StringBuilder};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use auditsync_model::{sanitize_file_stem, AuditRow, Cell, Column, ColumnKind, OutputMode};
use parquet::arrow::arrow_writer::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Arrow schema for flattened audit rows.
pub fn audit_rows_schema() -> SchemaRef {
    let fields: Vec<Field> = Column::ALL
        .iter()
        .map(|column| {
            let (data_type, nullable) = match column.kind() {
                ColumnKind::Index => (DataType::Int64, true),
                ColumnKind::Text => (DataType::Utf8, false),
                ColumnKind::Number(_) => (DataType::Float64, true),
                ColumnKind::Flag => (DataType::Boolean, false),
            };
            Field::new(column.name(), data_type, nullable)
        })
        .collect();
    Arc::new(Schema::new(fields))
}

fn audit_rows_batch(rows: &[AuditRow]) -> SinkResult<RecordBatch> {
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(Column::ALL.len());
    for &column in Column::ALL {
        let array: ArrayRef = match column.kind() {
            ColumnKind::Index => {
                let mut builder = Int64Builder::with_capacity(rows.len());
                for row in rows {
                    match row.cell(column) {
                        Cell::Index(Some(i)) => builder.append_value(i as i64),
                        _ => builder.append_null(),
                    }
                }
                Arc::new(builder.finish())
            }
            ColumnKind::Text => {
                let mut builder = StringBuilder::new();
                for row in rows {
                    match row.cell(column) {
                        Cell::Text(value) => builder.append_value(value),
                        _ => builder.append_value(""),
                    }
                }
                Arc::new(builder.finish())
            }
            ColumnKind::Number(_) => {
                let mut builder = Float64Builder::with_capacity(rows.len());
                for row in rows {
                    builder.append_option(row.numeric(column, OutputMode::Columnar));
                }
                Arc::new(builder.finish())
            }
            ColumnKind::Flag => {
                let mut builder = BooleanBuilder::with_capacity(rows.len());
                for row in rows {
                    builder.append_value(matches!(row.cell(column), Cell::Flag(true)));
                }
                Arc::new(builder.finish())
            }
        };
        columns.push(array);
    }
    RecordBatch::try_new(audit_rows_schema(), columns)
        .context("Failed to build audit record batch")
        .map_err(SinkError::from)
}

/// Write one audit's rows to `<dir>/<audit_id>.parquet`, replacing any
/// earlier export of the same audit. The id is sanitized into a single
/// path component.
pub fn write_audit_parquet(dir: &Path, audit_id: &str, rows: &[AuditRow]) -> SinkResult<PathBuf> {
    let batch = audit_rows_batch(rows)?;
    let file_name = format!("{}.parquet", sanitize_file_stem(audit_id));
    let mut sink = ParquetSink::new(dir.to_path_buf(), &file_name)?;
    let outcome = sink
        .write_batch(&batch)
        .and_then(|_| sink.prepare())
        .and_then(|_| sink.commit());
    if let Err(err) = outcome {
        sink.rollback();
        return Err(err);
    }
    Ok(sink.final_path())
}

/// Staged Parquet file writer.
pub struct ParquetSink {
    output_dir: PathBuf,
    file_name: String,
    writer: Option<ArrowWriter<File>>,
    rows_written: u64,
    /// Temp file path for staging
    temp_path: Option<PathBuf>,
    committed: bool,
}

impl ParquetSink {
    pub fn new(output_dir: PathBuf, file_name: &str) -> SinkResult<Self> {
        fs::create_dir_all(&output_dir).with_context(|| {
            format!(
                "Failed to create output directory: {}",
                output_dir.display()
            )
        })?;

        Ok(Self {
            output_dir,
            file_name: file_name.to_string(),
            writer: None,
            rows_written: 0,
            temp_path: None,
            committed: false,
        })
    }

    pub fn final_path(&self) -> PathBuf {
        self.output_dir.join(&self.file_name)
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    fn init(&mut self, schema: SchemaRef) -> SinkResult<()> {
        let temp_path = self.output_dir.join(format!(".{}.tmp", self.file_name));
        debug!(
            "Staging Parquet output {} (temp: {})",
            self.final_path().display(),
            temp_path.display()
        );

        let file = File::create(&temp_path).with_context(|| {
            format!(
                "Failed to create temp parquet file: {}",
                temp_path.display()
            )
        })?;

        let props = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .build();
        let writer = ArrowWriter::try_new(file, schema, Some(props))
            .context("Failed to create Parquet writer")?;

        self.writer = Some(writer);
        self.temp_path = Some(temp_path);
        Ok(())
    }

    pub fn write_batch(&mut self, batch: &RecordBatch) -> SinkResult<u64> {
        if self.committed {
            return Err(SinkError::message("Parquet sink already committed"));
        }
        if self.writer.is_none() {
            self.init(batch.schema())?;
        }
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| SinkError::message("Parquet sink not initialized"))?;

        writer
            .write(batch)
            .context("Failed to write batch to Parquet")?;

        let rows = batch.num_rows() as u64;
        self.rows_written += rows;
        Ok(rows)
    }

    /// Flush and close the staged file.
    pub fn prepare(&mut self) -> SinkResult<()> {
        if let Some(writer) = self.writer.take() {
            writer.close().context("Failed to close Parquet writer")?;
        }
        Ok(())
    }

    /// Move the staged file over the final path.
    pub fn commit(&mut self) -> SinkResult<()> {
        let Some(temp_path) = self.temp_path.take() else {
            return Err(SinkError::message("Nothing staged to commit"));
        };
        let final_path = self.final_path();
        fs::rename(&temp_path, &final_path).with_context(|| {
            format!(
                "Failed to rename {} -> {}",
                temp_path.display(),
                final_path.display()
            )
        })?;
        info!(
            "Wrote Parquet file {} ({} rows)",
            final_path.display(),
            self.rows_written
        );
        self.committed = true;
        Ok(())
    }

    /// Discard the staged file. A committed file is left in place.
    pub fn rollback(&mut self) {
        self.writer = None;
        if let Some(temp_path) = self.temp_path.take() {
            if temp_path.exists() {
                let _ = fs::remove_file(&temp_path);
                warn!("Discarded Parquet temp file: {}", temp_path.display());
            }
        }
    }
}

impl Drop for ParquetSink {
    fn drop(&mut self) {
        if let Some(temp_path) = &self.temp_path {
            if temp_path.exists() {
                let _ = fs::remove_file(temp_path);
                warn!("Cleaned up orphaned temp file: {}", temp_path.display());
            }
        }
    }
}
