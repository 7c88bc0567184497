//! Client for the remote inspection platform.
//!
//! [`InspectionApi`] is the seam the sync pipeline is written against; the
//! blocking [`HttpInspectionApi`] is the production implementation and tests
//! substitute an in-memory fake.

mod client;
mod error;
mod http;
mod types;

pub use client::{ClientConfig, HttpInspectionApi, DEFAULT_BASE_URL};
pub use error::ApiError;
pub use types::{DiscoveredAudit, Discovery, DiscoveryQuery, FlagFilter, Preference, RenderFormat};

use serde_json::Value;
use std::io::Read;

/// Operations the sync pipeline needs from the remote platform.
pub trait InspectionApi {
    /// Audits modified after `query.modified_after`, oldest first.
    fn discover(&self, query: &DiscoveryQuery) -> Result<Discovery, ApiError>;

    /// The full audit document.
    fn fetch_audit(&self, audit_id: &str) -> Result<Value, ApiError>;

    /// A rendered report, using the given export preference if any.
    fn fetch_rendered(
        &self,
        audit_id: &str,
        preference_id: Option<&str>,
        format: RenderFormat,
    ) -> Result<Vec<u8>, ApiError>;

    fn fetch_media(&self, audit_id: &str, media_id: &str) -> Result<Box<dyn Read>, ApiError>;

    fn fetch_web_report_link(&self, audit_id: &str) -> Result<String, ApiError>;

    /// Raw action records modified after `modified_after`.
    fn fetch_actions(&self, modified_after: &str) -> Result<Vec<Value>, ApiError>;

    /// Export preferences, optionally for one template.
    fn list_preferences(&self, template_id: Option<&str>) -> Result<Vec<Preference>, ApiError>;
}
