//! Media discovery.

use crate::document::{AuditDocument, MediaRef};
use tracing::debug;

pub const DEFAULT_MEDIA_EXTENSION: &str = "jpg";

/// A media blob to fetch and the extension to save it under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaTarget {
    pub media_id: String,
    pub extension: String,
}

impl MediaTarget {
    fn from_ref(media: &MediaRef) -> Self {
        let extension = media
            .file_ext
            .as_deref()
            .map(str::trim)
            .filter(|ext| !ext.is_empty())
            .unwrap_or(DEFAULT_MEDIA_EXTENSION);
        Self {
            media_id: media.media_id.clone(),
            extension: extension.to_string(),
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.{}", self.media_id, self.extension)
    }
}

/// Every media reference in the audit, in document order.
///
/// Per item: attached `media`, then `responses.image` (signatures, drawings),
/// then `options.media` (information fields). Inactive items are included,
/// repeated ids are kept and entries without a `media_id` are skipped.
pub fn locate_media(doc: &AuditDocument) -> Vec<MediaTarget> {
    let mut targets = Vec::new();
    for (_, node) in doc.tree().iter() {
        let item = &node.item;
        targets.extend(item.media.iter().map(MediaTarget::from_ref));
        if let Some(responses) = &item.responses {
            targets.extend(responses.image.iter().map(MediaTarget::from_ref));
        }
        if let Some(options) = &item.options {
            targets.extend(options.media.iter().map(MediaTarget::from_ref));
        }
    }
    debug!(audit_id = doc.audit_id(), count = targets.len(), "Located media");
    targets
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn collects_all_three_sources_in_document_order() {
        let doc = AuditDocument::from_value(json!({
            "audit_id": "audit_1",
            "header_items": [
                {"item_id": "h1", "type": "signature", "responses": {"image": {"media_id": "sig", "file_ext": "png"}}}
            ],
            "items": [
                {"item_id": "i1", "type": "information", "options": {"media": {"media_id": "info"}}},
                {"item_id": "m1", "type": "media", "inactive": true,
                 "media": [{"media_id": "p1", "file_ext": "jpeg"}, {"media_id": "p1", "file_ext": ""}]}
            ]
        }))
        .unwrap();

        let found: Vec<(String, String)> = locate_media(&doc)
            .into_iter()
            .map(|t| (t.media_id, t.extension))
            .collect();
        assert_eq!(
            found,
            vec![
                ("sig".to_string(), "png".to_string()),
                ("info".to_string(), "jpg".to_string()),
                ("p1".to_string(), "jpeg".to_string()),
                ("p1".to_string(), "jpg".to_string()),
            ]
        );
    }

    #[test]
    fn malformed_reference_does_not_hide_its_siblings() {
        let doc = AuditDocument::from_value(json!({
            "audit_id": "audit_1",
            "items": [
                {"item_id": "m1", "type": "media",
                 "media": [{"media_id": "good1"}, {"href": "no id"}, {"media_id": "good2"}]},
                {"item_id": "s1", "type": "drawing",
                 "responses": {"image": [{"file_ext": "png"}, {"media_id": "drawn", "file_ext": "png"}]}},
                {"item_id": "i1", "type": "information",
                 "options": {"media": [{"media_id": 42}, {"media_id": "shown"}]}}
            ]
        }))
        .unwrap();

        let ids: Vec<String> = locate_media(&doc).into_iter().map(|t| t.media_id).collect();
        assert_eq!(ids, vec!["good1", "good2", "drawn", "shown"]);
    }
}
