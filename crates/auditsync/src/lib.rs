//! Incremental export of inspection audits.
//!
//! Each pass discovers audits modified since the last watermark, holds back
//! the ones still inside the media sync window, and writes every requested
//! format before advancing the watermark.

pub mod actions;
pub mod commands;
pub mod config;
pub mod context;
pub mod discovery;
pub mod dispatch;
pub mod format;
pub mod runner;
pub mod shutdown;
pub mod watermark;

pub use config::{ConfigError, ExportConfig, RawConfig};
pub use context::{Home, SyncContext};
pub use discovery::{discover_candidates, is_ready, Candidates, Clock, SystemClock, TemplateFilter};
pub use dispatch::{Dispatcher, ExportError, FormatOutcome};
pub use format::{parse_formats, ExportFormat};
pub use runner::{PassReport, SyncRunner};
pub use shutdown::{Shutdown, SignalAction};
pub use watermark::{Stream, WatermarkError, WatermarkStore};
