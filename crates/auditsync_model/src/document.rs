//! Audit document parsing.
//!
//! The remote document is kept verbatim (for JSON export) next to a typed
//! view: audit-level metadata plus an [`ItemTree`] built once at parse time.

use crate::error::{ModelError, Result};
use crate::lenient::{lenient, lenient_f64, lenient_list, value_as_text};
use crate::tree::ItemTree;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::warn;

/// Item types whose children make up their content.
const CONTAINER_TYPES: &[&str] = &["section", "category"];

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Authorship {
    #[serde(default, deserialize_with = "lenient")]
    pub owner: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub owner_id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub author: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub author_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Site {
    #[serde(default, deserialize_with = "lenient")]
    pub name: Option<String>,
}

/// `audit_data` block: audit-level name, scores and dates.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditData {
    #[serde(default, deserialize_with = "lenient")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub score: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub total_score: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub score_percentage: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub duration: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    pub date_started: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub date_completed: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub date_modified: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub authorship: Authorship,
    #[serde(default, deserialize_with = "lenient")]
    pub site: Option<Site>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TemplateMetadata {
    #[serde(default, deserialize_with = "lenient")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TemplateData {
    #[serde(default, deserialize_with = "lenient")]
    pub metadata: TemplateMetadata,
    #[serde(default, deserialize_with = "lenient")]
    pub authorship: Authorship,
}

/// Reference to a media blob stored on the remote side.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MediaRef {
    pub media_id: String,
    #[serde(default, deserialize_with = "lenient")]
    pub file_ext: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub href: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SelectedOption {
    #[serde(default, deserialize_with = "lenient")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub label: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Geometry {
    #[serde(default, deserialize_with = "lenient")]
    pub coordinates: Vec<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Location {
    #[serde(default, deserialize_with = "lenient")]
    pub geometry: Option<Geometry>,
}

/// Type-dependent response payload of an item.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Responses {
    #[serde(default, deserialize_with = "lenient")]
    pub text: Option<String>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub selected: Vec<SelectedOption>,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default, deserialize_with = "lenient")]
    pub datetime: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub failed: Option<bool>,
    /// Signature and drawing images.
    #[serde(default, deserialize_with = "lenient_list")]
    pub image: Vec<MediaRef>,
    #[serde(default, deserialize_with = "lenient")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub location_text: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub location: Option<Location>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ItemOptions {
    #[serde(default, deserialize_with = "lenient_list")]
    pub media: Vec<MediaRef>,
    #[serde(default, deserialize_with = "lenient")]
    pub is_mandatory: Option<bool>,
    #[serde(default, deserialize_with = "lenient")]
    pub link: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Scoring {
    #[serde(default, deserialize_with = "lenient_f64")]
    pub score: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub max_score: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub combined_score: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub combined_max_score: Option<f64>,
}

/// One node of the audit: question, section, media field, signature, ...
#[derive(Debug, Clone, Deserialize)]
pub struct Item {
    pub item_id: String,
    #[serde(default, deserialize_with = "lenient")]
    pub label: Option<String>,
    #[serde(rename = "type", default, deserialize_with = "lenient")]
    pub item_type: String,
    #[serde(default, deserialize_with = "lenient")]
    pub parent_id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub inactive: bool,
    #[serde(default, deserialize_with = "lenient")]
    pub responses: Option<Responses>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub media: Vec<MediaRef>,
    #[serde(default, deserialize_with = "lenient")]
    pub options: Option<ItemOptions>,
    #[serde(default, deserialize_with = "lenient")]
    pub scoring: Option<Scoring>,
    /// Children nested inline rather than linked through `parent_id`.
    #[serde(default, deserialize_with = "lenient_items")]
    pub items: Vec<Item>,
}

impl Item {
    pub fn is_container(&self) -> bool {
        CONTAINER_TYPES.contains(&self.item_type.as_str())
    }

    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or("")
    }

    /// Display value of the response, by item type.
    pub fn response_text(&self) -> String {
        let Some(responses) = &self.responses else {
            return match self.item_type.as_str() {
                "information" => self.options_link().unwrap_or_default(),
                _ => String::new(),
            };
        };

        match self.item_type.as_str() {
            "question" | "list" => join_labels(&responses.selected),
            "text" | "textsingle" => responses.text.clone().unwrap_or_default(),
            "address" | "location" => responses.location_text.clone().unwrap_or_default(),
            "datetime" => responses.datetime.clone().unwrap_or_default(),
            "signature" => responses.name.clone().unwrap_or_default(),
            "checkbox" | "switch" | "slider" | "temperature" => {
                responses.value.as_ref().map(value_as_text).unwrap_or_default()
            }
            "information" => self.options_link().unwrap_or_default(),
            "media" | "drawing" => String::new(),
            _ => {
                if !responses.selected.is_empty() {
                    join_labels(&responses.selected)
                } else if let Some(value) = &responses.value {
                    value_as_text(value)
                } else {
                    String::new()
                }
            }
        }
    }

    /// Free-text note attached to a non-text response.
    pub fn comment(&self) -> String {
        match self.item_type.as_str() {
            "text" | "textsingle" => String::new(),
            _ => self
                .responses
                .as_ref()
                .and_then(|r| r.text.clone())
                .unwrap_or_default(),
        }
    }

    pub fn response_ids(&self) -> String {
        self.responses
            .as_ref()
            .map(|r| {
                r.selected
                    .iter()
                    .filter_map(|s| s.id.as_deref())
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .unwrap_or_default()
    }

    pub fn media_hrefs(&self) -> String {
        self.media
            .iter()
            .filter_map(|m| m.href.as_deref())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// (latitude, longitude) of a location response; GeoJSON stores lon first.
    pub fn coordinates(&self) -> (Option<f64>, Option<f64>) {
        let coords = self
            .responses
            .as_ref()
            .and_then(|r| r.location.as_ref())
            .and_then(|l| l.geometry.as_ref())
            .map(|g| g.coordinates.as_slice())
            .unwrap_or(&[]);
        match coords {
            [lon, lat, ..] => (Some(*lat), Some(*lon)),
            _ => (None, None),
        }
    }

    pub fn score(&self) -> Option<f64> {
        self.scoring
            .as_ref()
            .and_then(|s| s.score.or(s.combined_score))
    }

    pub fn max_score(&self) -> Option<f64> {
        self.scoring
            .as_ref()
            .and_then(|s| s.max_score.or(s.combined_max_score))
    }

    /// Score as a percentage of max score, rounded to two places.
    pub fn score_percentage(&self) -> Option<f64> {
        match (self.score(), self.max_score()) {
            (Some(score), Some(max)) if max > 0.0 => {
                Some((score / max * 100.0 * 100.0).round() / 100.0)
            }
            _ => None,
        }
    }

    pub fn is_mandatory(&self) -> bool {
        self.options
            .as_ref()
            .and_then(|o| o.is_mandatory)
            .unwrap_or(false)
    }

    pub fn is_failed(&self) -> bool {
        self.responses
            .as_ref()
            .and_then(|r| r.failed)
            .unwrap_or(false)
    }

    fn options_link(&self) -> Option<String> {
        let options = self.options.as_ref()?;
        options
            .link
            .clone()
            .or_else(|| options.media.iter().find_map(|m| m.href.clone()))
    }
}

fn join_labels(selected: &[SelectedOption]) -> String {
    selected
        .iter()
        .filter_map(|s| s.label.as_deref())
        .collect::<Vec<_>>()
        .join(", ")
}

fn lenient_items<'de, D>(deserializer: D) -> std::result::Result<Vec<Item>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::Array(values) => Ok(parse_items(values, "nested")),
        _ => Ok(Vec::new()),
    }
}

/// Parse items one at a time so a single malformed item does not sink the audit.
fn parse_items(values: Vec<Value>, origin: &str) -> Vec<Item> {
    values
        .into_iter()
        .enumerate()
        .filter_map(|(index, value)| match serde_json::from_value::<Item>(value) {
            Ok(item) => Some(item),
            Err(err) => {
                warn!(origin, index, "Skipping malformed item: {}", err);
                None
            }
        })
        .collect()
}

#[derive(Deserialize)]
struct DocumentHead {
    #[serde(default, deserialize_with = "lenient")]
    audit_id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    template_id: String,
    #[serde(default, deserialize_with = "lenient")]
    archived: bool,
    #[serde(default, deserialize_with = "lenient")]
    modified_at: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    audit_data: AuditData,
    #[serde(default, deserialize_with = "lenient")]
    template_data: TemplateData,
    #[serde(default, deserialize_with = "lenient")]
    header_items: Vec<Value>,
    #[serde(default, deserialize_with = "lenient")]
    items: Vec<Value>,
}

/// A parsed audit. Read-only once constructed.
#[derive(Debug, Clone)]
pub struct AuditDocument {
    raw: Value,
    audit_id: String,
    template_id: String,
    archived: bool,
    modified_at: Option<String>,
    audit_data: AuditData,
    template_data: TemplateData,
    tree: ItemTree,
}

impl AuditDocument {
    /// Parse from an already-decoded JSON value.
    pub fn from_value(raw: Value) -> Result<Self> {
        if !raw.is_object() {
            return Err(ModelError::invalid_document("expected a JSON object"));
        }
        let head: DocumentHead = serde_json::from_value(raw.clone())?;
        let audit_id = head
            .audit_id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| ModelError::invalid_document("missing audit_id"))?;

        let header_items = parse_items(head.header_items, "header_items");
        let items = parse_items(head.items, "items");
        let tree = ItemTree::build(header_items, items);

        Ok(Self {
            raw,
            audit_id,
            template_id: head.template_id,
            archived: head.archived,
            modified_at: head.modified_at,
            audit_data: head.audit_data,
            template_data: head.template_data,
            tree,
        })
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let raw: Value = serde_json::from_slice(bytes)?;
        Self::from_value(raw)
    }

    /// The document exactly as received.
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    pub fn audit_id(&self) -> &str {
        &self.audit_id
    }

    pub fn template_id(&self) -> &str {
        &self.template_id
    }

    pub fn archived(&self) -> bool {
        self.archived
    }

    pub fn modified_at(&self) -> Option<&str> {
        self.modified_at.as_deref()
    }

    pub fn audit_data(&self) -> &AuditData {
        &self.audit_data
    }

    pub fn template_data(&self) -> &TemplateData {
        &self.template_data
    }

    pub fn audit_name(&self) -> Option<&str> {
        self.audit_data.name.as_deref()
    }

    pub fn template_name(&self) -> Option<&str> {
        self.template_data.metadata.name.as_deref()
    }

    pub fn tree(&self) -> &ItemTree {
        &self.tree
    }
}
