//! Audit → rows.

use crate::document::AuditDocument;
use crate::row::{AuditFields, AuditRow};
use std::sync::Arc;
use tracing::debug;

/// Flatten an audit into one row per leaf item, in pre-order.
///
/// Deactivated leaves (the item or an enclosing container is inactive) are
/// left out unless `include_inactive` is set. Containers never produce rows.
/// `sorting_index` is left unset; see [`assign_sorting_index`].
pub fn flatten(doc: &AuditDocument, include_inactive: bool) -> Vec<AuditRow> {
    let tree = doc.tree();
    let audit = Arc::new(AuditFields::from_document(doc));
    let mut rows = Vec::with_capacity(tree.len());
    let mut skipped_inactive = 0usize;

    for id in tree.preorder() {
        let node = tree.node(id);
        let item = &node.item;
        if item.is_container() {
            continue;
        }
        let inactive = tree.is_deactivated(id);
        if inactive && !include_inactive {
            skipped_inactive += 1;
            continue;
        }

        let parent_id = node
            .parent()
            .map(|p| tree.node(p).item.item_id.clone())
            .or_else(|| item.parent_id.clone())
            .unwrap_or_default();
        let (latitude, longitude) = item.coordinates();

        rows.push(AuditRow {
            sorting_index: None,
            item_type: item.item_type.clone(),
            label: item.label().to_string(),
            response: item.response_text(),
            comment: item.comment(),
            media_href: item.media_hrefs(),
            latitude,
            longitude,
            item_score: item.score(),
            item_max_score: item.max_score(),
            item_score_percentage: item.score_percentage(),
            mandatory: item.is_mandatory(),
            failed_response: item.is_failed(),
            inactive,
            item_id: item.item_id.clone(),
            response_id: item.response_ids(),
            parent_id,
            item_category: tree.category(id).to_string(),
            breadcrumb: tree.breadcrumb(id),
            audit: Arc::clone(&audit),
        });
    }

    debug!(
        audit_id = doc.audit_id(),
        rows = rows.len(),
        skipped_inactive,
        "Flattened audit"
    );
    rows
}

/// Number rows 1..=n in their current order.
pub fn assign_sorting_index(rows: &mut [AuditRow]) {
    for (i, row) in rows.iter_mut().enumerate() {
        row.sorting_index = Some(i as u64 + 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc() -> AuditDocument {
        AuditDocument::from_value(json!({
            "audit_id": "audit_1",
            "template_id": "template_1",
            "modified_at": "2024-03-01T10:00:00.000Z",
            "audit_data": {"name": "Weekly check", "score": 1, "total_score": 2},
            "template_data": {"metadata": {"name": "Weekly"}},
            "header_items": [
                {"item_id": "f3245d40-ea77-11e1-aff1-0800200c9a66", "type": "text", "label": "Title", "responses": {"text": "Site A/B"}}
            ],
            "items": [
                {"item_id": "s1", "type": "section", "label": "Kitchen"},
                {"item_id": "q1", "type": "question", "label": "Clean?", "parent_id": "s1",
                 "responses": {"selected": [{"id": "y", "label": "Yes"}]},
                 "scoring": {"score": 1, "max_score": 1}},
                {"item_id": "s2", "type": "section", "label": "Store", "inactive": true},
                {"item_id": "q2", "type": "question", "label": "Locked?", "parent_id": "s2"}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn containers_never_produce_rows() {
        let rows = flatten(&doc(), true);
        assert!(rows.iter().all(|r| r.item_type != "section"));
        assert_eq!(rows.len(), 3);
    }

    #[test]
    fn inactive_leaves_are_omitted_by_default() {
        let rows = flatten(&doc(), false);
        let ids: Vec<&str> = rows.iter().map(|r| r.item_id.as_str()).collect();
        assert_eq!(ids, vec!["f3245d40-ea77-11e1-aff1-0800200c9a66", "q1"]);

        let with_inactive = flatten(&doc(), true);
        let q2 = with_inactive.iter().find(|r| r.item_id == "q2").unwrap();
        assert!(q2.inactive);
        assert_eq!(q2.breadcrumb, "Store");
    }

    #[test]
    fn rows_carry_audit_fields_and_item_values() {
        let rows = flatten(&doc(), false);
        let q1 = &rows[1];
        assert_eq!(q1.response, "Yes");
        assert_eq!(q1.parent_id, "s1");
        assert_eq!(q1.item_category, "Kitchen");
        assert_eq!(q1.item_score_percentage, Some(100.0));
        assert_eq!(q1.audit.audit_name, "Weekly check");
        assert_eq!(q1.audit.date_modified, "2024-03-01T10:00:00.000Z");
        assert_eq!(q1.sorting_index, None);
    }

    #[test]
    fn sorting_index_is_one_based_second_pass() {
        let mut rows = flatten(&doc(), true);
        assign_sorting_index(&mut rows);
        let indices: Vec<_> = rows.iter().map(|r| r.sorting_index).collect();
        assert_eq!(indices, vec![Some(1), Some(2), Some(3)]);
    }
}
