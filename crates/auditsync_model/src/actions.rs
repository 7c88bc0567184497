//! Actions (follow-up tasks raised from audits).

use crate::error::Result;
use crate::lenient::lenient;
use serde::Deserialize;
use serde_json::Value;

/// Column names of the flat action row, in output order.
pub const ACTION_COLUMNS: [&str; 17] = [
    "actionId",
    "description",
    "assignee",
    "priority",
    "priorityCode",
    "status",
    "statusCode",
    "dueDatetime",
    "audit",
    "auditId",
    "linkedToItem",
    "linkedToItemId",
    "creatorName",
    "creatorId",
    "createdDatetime",
    "modifiedDatetime",
    "completedDatetime",
];

pub fn action_priority_label(code: i64) -> Option<&'static str> {
    match code {
        0 => Some("None"),
        10 => Some("Low"),
        20 => Some("Medium"),
        30 => Some("High"),
        _ => None,
    }
}

pub fn action_status_label(code: i64) -> Option<&'static str> {
    match code {
        0 => Some("To Do"),
        10 => Some("In Progress"),
        50 => Some("Done"),
        60 => Some("Cannot Do"),
        _ => None,
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Named {
    #[serde(default, deserialize_with = "lenient")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActionAudit {
    #[serde(default, deserialize_with = "lenient")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub audit_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActionItem {
    #[serde(default, deserialize_with = "lenient")]
    pub label: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub item_id: Option<String>,
}

/// An action as returned by the remote task search.
#[derive(Debug, Clone, Deserialize)]
pub struct ActionRecord {
    #[serde(alias = "task_id")]
    pub action_id: String,
    #[serde(default, deserialize_with = "lenient")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub assignees: Vec<Named>,
    #[serde(default, deserialize_with = "lenient")]
    pub priority: Option<i64>,
    #[serde(default, deserialize_with = "lenient")]
    pub status: Option<i64>,
    #[serde(default, deserialize_with = "lenient")]
    pub due_at: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub audit: Option<ActionAudit>,
    #[serde(default, deserialize_with = "lenient")]
    pub item: Option<ActionItem>,
    #[serde(default, deserialize_with = "lenient")]
    pub created_by: Option<Named>,
    #[serde(default, deserialize_with = "lenient")]
    pub created_at: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub modified_at: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub completed_at: Option<String>,
}

impl ActionRecord {
    pub fn from_value(value: Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn to_row(&self) -> ActionRow {
        let text = |v: Option<&String>| v.cloned().unwrap_or_default();
        let audit = self.audit.as_ref();
        let item = self.item.as_ref();
        let creator = self.created_by.as_ref();
        ActionRow {
            action_id: self.action_id.clone(),
            description: text(self.description.as_ref()),
            assignee: self
                .assignees
                .iter()
                .filter_map(|a| a.name.as_deref())
                .collect::<Vec<_>>()
                .join(", "),
            priority: self
                .priority
                .and_then(action_priority_label)
                .unwrap_or_default()
                .to_string(),
            priority_code: self.priority,
            status: self
                .status
                .and_then(action_status_label)
                .unwrap_or_default()
                .to_string(),
            status_code: self.status,
            due_datetime: text(self.due_at.as_ref()),
            audit: text(audit.and_then(|a| a.name.as_ref())),
            audit_id: text(audit.and_then(|a| a.audit_id.as_ref())),
            linked_to_item: text(item.and_then(|i| i.label.as_ref())),
            linked_to_item_id: text(item.and_then(|i| i.item_id.as_ref())),
            creator_name: text(creator.and_then(|c| c.name.as_ref())),
            creator_id: text(creator.and_then(|c| c.user_id.as_ref())),
            created_datetime: text(self.created_at.as_ref()),
            modified_datetime: text(self.modified_at.as_ref()),
            completed_datetime: text(self.completed_at.as_ref()),
        }
    }
}

/// Flat form of an action, one field per [`ACTION_COLUMNS`] entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionRow {
    pub action_id: String,
    pub description: String,
    pub assignee: String,
    pub priority: String,
    pub priority_code: Option<i64>,
    pub status: String,
    pub status_code: Option<i64>,
    pub due_datetime: String,
    pub audit: String,
    pub audit_id: String,
    pub linked_to_item: String,
    pub linked_to_item_id: String,
    pub creator_name: String,
    pub creator_id: String,
    pub created_datetime: String,
    pub modified_datetime: String,
    pub completed_datetime: String,
}

impl ActionRow {
    pub fn to_fields(&self) -> [String; 17] {
        let code = |c: Option<i64>| c.map(|c| c.to_string()).unwrap_or_default();
        [
            self.action_id.clone(),
            self.description.clone(),
            self.assignee.clone(),
            self.priority.clone(),
            code(self.priority_code),
            self.status.clone(),
            code(self.status_code),
            self.due_datetime.clone(),
            self.audit.clone(),
            self.audit_id.clone(),
            self.linked_to_item.clone(),
            self.linked_to_item_id.clone(),
            self.creator_name.clone(),
            self.creator_id.clone(),
            self.created_datetime.clone(),
            self.modified_datetime.clone(),
            self.completed_datetime.clone(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn action_flattens_with_labels_for_codes() {
        let action = ActionRecord::from_value(json!({
            "action_id": "act_1",
            "description": "Replace extinguisher",
            "assignees": [{"name": "Sam"}, {"name": "Alex"}],
            "priority": 30,
            "status": 10,
            "audit": {"name": "Weekly", "audit_id": "audit_1"},
            "created_by": {"name": "Lee", "user_id": "user_9"},
            "modified_at": "2024-03-01T10:00:00.000Z"
        }))
        .unwrap();
        let row = action.to_row();
        assert_eq!(row.assignee, "Sam, Alex");
        assert_eq!(row.priority, "High");
        assert_eq!(row.status, "In Progress");

        let fields = row.to_fields();
        assert_eq!(fields.len(), ACTION_COLUMNS.len());
        assert_eq!(fields[4], "30");
        assert_eq!(fields[13], "user_9");
        assert_eq!(fields[16], "");
    }

    #[test]
    fn unknown_codes_render_blank_labels() {
        let row = ActionRecord::from_value(json!({"action_id": "a", "priority": 99}))
            .unwrap()
            .to_row();
        assert_eq!(row.priority, "");
        assert_eq!(row.priority_code, Some(99));
    }
}
