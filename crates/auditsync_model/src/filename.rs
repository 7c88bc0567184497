//! Export file naming.

use crate::document::AuditDocument;
use crate::tree::Origin;

/// Item id of the built-in audit title field. Templates with title rules omit
/// the item itself, so the audit name is used instead.
pub const AUDIT_TITLE_ITEM_ID: &str = "f3245d40-ea77-11e1-aff1-0800200c9a66";

/// Make `name` safe as a single path component inside an export directory:
/// separators become `_`, and so does a bare `.` or `..`.
pub fn sanitize_file_stem(name: &str) -> String {
    let stem = name.replace(['/', '\\', '\0'], "_");
    match stem.as_str() {
        "." | ".." => "_".repeat(stem.len()),
        _ => stem,
    }
}

/// Base file name for an audit's exports.
///
/// Uses the response text of the header item `title_item_id` when set and
/// non-blank, the audit name for the built-in title item, and the audit id
/// otherwise. Body items are never consulted.
pub fn resolve_export_filename(doc: &AuditDocument, title_item_id: Option<&str>) -> String {
    let name = resolve_title(doc, title_item_id).unwrap_or_else(|| doc.audit_id().to_string());
    sanitize_file_stem(&name)
}

fn resolve_title(doc: &AuditDocument, title_item_id: Option<&str>) -> Option<String> {
    let title_item_id = title_item_id.filter(|id| !id.trim().is_empty())?;

    if title_item_id == AUDIT_TITLE_ITEM_ID {
        if let Some(name) = doc.audit_name().filter(|n| !n.trim().is_empty()) {
            return Some(name.to_string());
        }
    }

    let (_, node) = doc
        .tree()
        .iter()
        .find(|(_, node)| node.origin == Origin::Header && node.item.item_id == title_item_id)?;
    node.item
        .responses
        .as_ref()
        .and_then(|r| r.text.as_deref())
        .filter(|text| !text.trim().is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: serde_json::Value) -> AuditDocument {
        AuditDocument::from_value(value).unwrap()
    }

    #[test]
    fn audit_title_uses_audit_name_with_slashes_replaced() {
        let d = doc(json!({
            "audit_id": "audit_1", "audit_data": {"name": "Site A/B"}, "header_items": []
        }));
        assert_eq!(resolve_export_filename(&d, Some(AUDIT_TITLE_ITEM_ID)), "Site A_B");
    }

    #[test]
    fn custom_item_text_is_used_when_present() {
        let d = doc(json!({
            "audit_id": "audit_1",
            "header_items": [{"item_id": "doc_no", "type": "text", "responses": {"text": "DN-42"}}]
        }));
        assert_eq!(resolve_export_filename(&d, Some("doc_no")), "DN-42");
    }

    #[test]
    fn falls_back_to_audit_id() {
        let d = doc(json!({
            "audit_id": "audit_1",
            "header_items": [{"item_id": "doc_no", "type": "text", "responses": {"text": "   "}}]
        }));
        assert_eq!(resolve_export_filename(&d, Some("doc_no")), "audit_1");
        assert_eq!(resolve_export_filename(&d, Some("missing")), "audit_1");
        assert_eq!(resolve_export_filename(&d, None), "audit_1");
    }

    #[test]
    fn body_item_with_the_title_id_is_ignored() {
        let d = doc(json!({
            "audit_id": "audit_1",
            "header_items": [],
            "items": [{"item_id": "doc_no", "type": "text", "responses": {"text": "Body text"}}]
        }));
        assert_eq!(resolve_export_filename(&d, Some("doc_no")), "audit_1");
    }

    #[test]
    fn unsafe_names_stay_inside_the_export_directory() {
        assert_eq!(sanitize_file_stem(".."), "__");
        assert_eq!(sanitize_file_stem("."), "_");
        assert_eq!(sanitize_file_stem("../../etc"), ".._.._etc");
        assert_eq!(sanitize_file_stem("a\\b"), "a_b");
        assert_eq!(sanitize_file_stem("v1.2"), "v1.2");

        let d = doc(json!({"audit_id": "../audit_1", "header_items": []}));
        assert_eq!(resolve_export_filename(&d, None), ".._audit_1");
    }
}
