//! Request and response shapes shared by every [`crate::InspectionApi`].

use serde::{Deserialize, Serialize};

/// Three-way filter used for the archived and completed search flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlagFilter {
    /// Only records with the flag set.
    Only,
    /// Only records without the flag.
    #[default]
    Exclude,
    /// Either.
    Both,
}

impl FlagFilter {
    pub fn as_query(self) -> &'static str {
        match self {
            FlagFilter::Only => "true",
            FlagFilter::Exclude => "false",
            FlagFilter::Both => "both",
        }
    }
}

/// Parameters of one audit discovery search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryQuery {
    pub modified_after: String,
    /// Empty means every template.
    pub template_ids: Vec<String>,
    pub completed: FlagFilter,
    pub archived: FlagFilter,
}

impl DiscoveryQuery {
    pub fn new(modified_after: impl Into<String>) -> Self {
        Self {
            modified_after: modified_after.into(),
            template_ids: Vec::new(),
            completed: FlagFilter::Only,
            archived: FlagFilter::Exclude,
        }
    }

    /// Query-string pairs in the order the search endpoint expects them.
    pub fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("field", "audit_id".to_string()),
            ("field", "modified_at".to_string()),
            ("field", "template_id".to_string()),
            ("order", "asc".to_string()),
            ("modified_after", self.modified_after.clone()),
        ];
        for template_id in &self.template_ids {
            params.push(("template", template_id.clone()));
        }
        params.push(("archived", self.archived.as_query().to_string()));
        params.push(("completed", self.completed.as_query().to_string()));
        params
    }
}

/// A candidate audit returned by discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredAudit {
    pub audit_id: String,
    #[serde(default)]
    pub modified_at: String,
    #[serde(default)]
    pub template_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discovery {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub audits: Vec<DiscoveredAudit>,
}

/// Rendered document formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderFormat {
    Pdf,
    Docx,
}

impl RenderFormat {
    pub fn as_query(self) -> &'static str {
        match self {
            RenderFormat::Pdf => "pdf",
            RenderFormat::Docx => "docx",
        }
    }

    pub fn extension(self) -> &'static str {
        self.as_query()
    }
}

/// A saved export preference (report layout) for a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preference {
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub is_global: bool,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub template_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovery_params_repeat_template_filter() {
        let mut query = DiscoveryQuery::new("2000-01-01T00:00:00.000Z");
        query.template_ids = vec!["template_a".into(), "template_b".into()];
        query.archived = FlagFilter::Both;
        let params = query.params();

        let templates: Vec<&str> = params
            .iter()
            .filter(|(k, _)| *k == "template")
            .map(|(_, v)| v.as_str())
            .collect();
        assert_eq!(templates, vec!["template_a", "template_b"]);
        assert!(params.contains(&("archived", "both".to_string())));
        assert!(params.contains(&("completed", "true".to_string())));
        assert!(params.contains(&("modified_after", "2000-01-01T00:00:00.000Z".to_string())));
    }

    #[test]
    fn discovery_tolerates_missing_fields() {
        let discovery: Discovery = serde_json::from_str(
            r#"{"count": 1, "total": 1, "audits": [{"audit_id": "audit_1"}]}"#,
        )
        .unwrap();
        assert_eq!(discovery.total, 1);
        assert_eq!(discovery.audits[0].modified_at, "");

        let empty: Discovery = serde_json::from_str("{}").unwrap();
        assert_eq!(empty, Discovery::default());
    }

    #[test]
    fn preference_defaults_flags() {
        let pref: Preference =
            serde_json::from_str(r#"{"id": "pref_1", "label": "Short"}"#).unwrap();
        assert!(!pref.is_global);
        assert!(!pref.is_default);
    }
}
