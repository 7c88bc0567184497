//! Fixed-schema tabular row produced by flattening an audit.

use crate::document::AuditDocument;
use std::sync::Arc;

/// How an empty numeric cell is rendered by a given output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmptyNumeric {
    /// Empty string.
    Blank,
    Zero,
    NaN,
}

impl EmptyNumeric {
    /// Numeric fill value; `None` for [`EmptyNumeric::Blank`].
    pub fn fill(self) -> Option<f64> {
        match self {
            EmptyNumeric::Blank => None,
            EmptyNumeric::Zero => Some(0.0),
            EmptyNumeric::NaN => Some(f64::NAN),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericClass {
    /// Item and audit scores, percentages, duration.
    Score,
    /// Latitude and longitude.
    Coordinate,
}

/// Downstream consumer of flattened rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Appended CSV files.
    Csv,
    /// Relational table rows.
    Relational,
    /// Columnar files for numeric analysis.
    Columnar,
}

impl OutputMode {
    /// Empty-value policy. Downstream aggregation relies on these exact fills.
    pub fn empty_numeric(self, class: NumericClass) -> EmptyNumeric {
        match (self, class) {
            (OutputMode::Csv, _) => EmptyNumeric::Blank,
            (OutputMode::Relational, _) => EmptyNumeric::Zero,
            (OutputMode::Columnar, NumericClass::Score) => EmptyNumeric::NaN,
            (OutputMode::Columnar, NumericClass::Coordinate) => EmptyNumeric::Zero,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Index,
    Text,
    Number(NumericClass),
    Flag,
}

macro_rules! columns {
    ($($variant:ident => $kind:expr),+ $(,)?) => {
        /// Output columns, in output order.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Column {
            $($variant),+
        }

        impl Column {
            pub const ALL: &'static [Column] = &[$(Column::$variant),+];

            pub fn name(self) -> &'static str {
                match self {
                    $(Column::$variant => stringify!($variant)),+
                }
            }

            pub fn kind(self) -> ColumnKind {
                match self {
                    $(Column::$variant => $kind),+
                }
            }
        }
    };
}

const SCORE: ColumnKind = ColumnKind::Number(NumericClass::Score);
const COORDINATE: ColumnKind = ColumnKind::Number(NumericClass::Coordinate);

columns! {
    SortingIndex => ColumnKind::Index,
    ItemType => ColumnKind::Text,
    Label => ColumnKind::Text,
    Response => ColumnKind::Text,
    Comment => ColumnKind::Text,
    MediaHypertextReference => ColumnKind::Text,
    Latitude => COORDINATE,
    Longitude => COORDINATE,
    ItemScore => SCORE,
    ItemMaxScore => SCORE,
    ItemScorePercentage => SCORE,
    Mandatory => ColumnKind::Flag,
    FailedResponse => ColumnKind::Flag,
    Inactive => ColumnKind::Flag,
    ItemID => ColumnKind::Text,
    ResponseID => ColumnKind::Text,
    ParentID => ColumnKind::Text,
    AuditOwner => ColumnKind::Text,
    AuditAuthor => ColumnKind::Text,
    AuditOwnerID => ColumnKind::Text,
    AuditAuthorID => ColumnKind::Text,
    AuditName => ColumnKind::Text,
    AuditScore => SCORE,
    AuditMaxScore => SCORE,
    AuditScorePercentage => SCORE,
    AuditDuration => SCORE,
    DateStarted => ColumnKind::Text,
    DateCompleted => ColumnKind::Text,
    DateModified => ColumnKind::Text,
    AuditID => ColumnKind::Text,
    TemplateID => ColumnKind::Text,
    TemplateName => ColumnKind::Text,
    TemplateAuthor => ColumnKind::Text,
    ItemCategory => ColumnKind::Text,
    Breadcrumb => ColumnKind::Text,
    AuditSite => ColumnKind::Text,
    Archived => ColumnKind::Flag,
}

/// Audit-level values repeated on every row of an audit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditFields {
    pub owner: String,
    pub author: String,
    pub owner_id: String,
    pub author_id: String,
    pub audit_name: String,
    pub score: Option<f64>,
    pub max_score: Option<f64>,
    pub score_percentage: Option<f64>,
    pub duration: Option<f64>,
    pub date_started: String,
    pub date_completed: String,
    pub date_modified: String,
    pub audit_id: String,
    pub template_id: String,
    pub template_name: String,
    pub template_author: String,
    pub site: String,
    pub archived: bool,
}

impl AuditFields {
    pub fn from_document(doc: &AuditDocument) -> Self {
        let data = doc.audit_data();
        let template = doc.template_data();
        let text = |v: &Option<String>| v.clone().unwrap_or_default();
        Self {
            owner: text(&data.authorship.owner),
            author: text(&data.authorship.author),
            owner_id: text(&data.authorship.owner_id),
            author_id: text(&data.authorship.author_id),
            audit_name: text(&data.name),
            score: data.score,
            max_score: data.total_score,
            score_percentage: data.score_percentage,
            duration: data.duration,
            date_started: text(&data.date_started),
            date_completed: text(&data.date_completed),
            date_modified: data
                .date_modified
                .clone()
                .or_else(|| doc.modified_at().map(str::to_string))
                .unwrap_or_default(),
            audit_id: doc.audit_id().to_string(),
            template_id: doc.template_id().to_string(),
            template_name: text(&template.metadata.name),
            template_author: text(&template.authorship.author),
            site: data
                .site
                .as_ref()
                .and_then(|s| s.name.clone())
                .unwrap_or_default(),
            archived: doc.archived(),
        }
    }
}

/// A borrowed cell value before an output's empty policy is applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Cell<'a> {
    Index(Option<u64>),
    Text(&'a str),
    Number(Option<f64>),
    Flag(bool),
}

impl Cell<'_> {
    /// Text rendering under `policy` for empty numbers.
    pub fn render(&self, policy: EmptyNumeric) -> String {
        match self {
            Cell::Index(Some(i)) => i.to_string(),
            Cell::Index(None) => String::new(),
            Cell::Text(s) => (*s).to_string(),
            Cell::Number(Some(n)) => format_number(*n),
            Cell::Number(None) => policy.fill().map(format_number).unwrap_or_default(),
            Cell::Flag(true) => "True".to_string(),
            Cell::Flag(false) => "False".to_string(),
        }
    }
}

/// Integral values print without a fractional part ("3" not "3.0").
fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/// One flattened leaf item.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditRow {
    /// Assigned only by [`crate::assign_sorting_index`].
    pub sorting_index: Option<u64>,
    pub item_type: String,
    pub label: String,
    pub response: String,
    pub comment: String,
    pub media_href: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub item_score: Option<f64>,
    pub item_max_score: Option<f64>,
    pub item_score_percentage: Option<f64>,
    pub mandatory: bool,
    pub failed_response: bool,
    pub inactive: bool,
    pub item_id: String,
    pub response_id: String,
    pub parent_id: String,
    pub item_category: String,
    pub breadcrumb: String,
    pub audit: Arc<AuditFields>,
}

impl AuditRow {
    pub fn cell(&self, column: Column) -> Cell<'_> {
        let a = &*self.audit;
        match column {
            Column::SortingIndex => Cell::Index(self.sorting_index),
            Column::ItemType => Cell::Text(&self.item_type),
            Column::Label => Cell::Text(&self.label),
            Column::Response => Cell::Text(&self.response),
            Column::Comment => Cell::Text(&self.comment),
            Column::MediaHypertextReference => Cell::Text(&self.media_href),
            Column::Latitude => Cell::Number(self.latitude),
            Column::Longitude => Cell::Number(self.longitude),
            Column::ItemScore => Cell::Number(self.item_score),
            Column::ItemMaxScore => Cell::Number(self.item_max_score),
            Column::ItemScorePercentage => Cell::Number(self.item_score_percentage),
            Column::Mandatory => Cell::Flag(self.mandatory),
            Column::FailedResponse => Cell::Flag(self.failed_response),
            Column::Inactive => Cell::Flag(self.inactive),
            Column::ItemID => Cell::Text(&self.item_id),
            Column::ResponseID => Cell::Text(&self.response_id),
            Column::ParentID => Cell::Text(&self.parent_id),
            Column::AuditOwner => Cell::Text(&a.owner),
            Column::AuditAuthor => Cell::Text(&a.author),
            Column::AuditOwnerID => Cell::Text(&a.owner_id),
            Column::AuditAuthorID => Cell::Text(&a.author_id),
            Column::AuditName => Cell::Text(&a.audit_name),
            Column::AuditScore => Cell::Number(a.score),
            Column::AuditMaxScore => Cell::Number(a.max_score),
            Column::AuditScorePercentage => Cell::Number(a.score_percentage),
            Column::AuditDuration => Cell::Number(a.duration),
            Column::DateStarted => Cell::Text(&a.date_started),
            Column::DateCompleted => Cell::Text(&a.date_completed),
            Column::DateModified => Cell::Text(&a.date_modified),
            Column::AuditID => Cell::Text(&a.audit_id),
            Column::TemplateID => Cell::Text(&a.template_id),
            Column::TemplateName => Cell::Text(&a.template_name),
            Column::TemplateAuthor => Cell::Text(&a.template_author),
            Column::ItemCategory => Cell::Text(&self.item_category),
            Column::Breadcrumb => Cell::Text(&self.breadcrumb),
            Column::AuditSite => Cell::Text(&a.site),
            Column::Archived => Cell::Flag(a.archived),
        }
    }

    /// Numeric value of `column` with the output's empty fill applied.
    pub fn numeric(&self, column: Column, mode: OutputMode) -> Option<f64> {
        let ColumnKind::Number(class) = column.kind() else {
            return None;
        };
        match self.cell(column) {
            Cell::Number(Some(n)) => Some(n),
            _ => mode.empty_numeric(class).fill(),
        }
    }

    /// Every cell rendered as text under `mode`'s empty policy, in column order.
    pub fn render(&self, mode: OutputMode) -> Vec<String> {
        Column::ALL
            .iter()
            .map(|&column| {
                let policy = match column.kind() {
                    ColumnKind::Number(class) => mode.empty_numeric(class),
                    _ => EmptyNumeric::Blank,
                };
                self.cell(column).render(policy)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare_row() -> AuditRow {
        AuditRow {
            sorting_index: None,
            item_type: "question".into(),
            label: "Exits clear?".into(),
            response: "Yes".into(),
            comment: String::new(),
            media_href: String::new(),
            latitude: None,
            longitude: None,
            item_score: None,
            item_max_score: Some(1.0),
            item_score_percentage: None,
            mandatory: false,
            failed_response: false,
            inactive: false,
            item_id: "q1".into(),
            response_id: String::new(),
            parent_id: String::new(),
            item_category: String::new(),
            breadcrumb: String::new(),
            audit: Arc::new(AuditFields::default()),
        }
    }

    #[test]
    fn schema_has_fixed_order() {
        assert_eq!(Column::ALL.len(), 37);
        assert_eq!(Column::ALL[0].name(), "SortingIndex");
        assert_eq!(Column::ALL[36].name(), "Archived");
    }

    #[test]
    fn empty_numeric_policy_differs_by_output() {
        let row = bare_row();
        assert_eq!(row.numeric(Column::ItemScore, OutputMode::Relational), Some(0.0));
        assert!(row.numeric(Column::ItemScore, OutputMode::Columnar).unwrap().is_nan());
        assert_eq!(row.numeric(Column::Latitude, OutputMode::Columnar), Some(0.0));
        assert_eq!(row.numeric(Column::ItemMaxScore, OutputMode::Columnar), Some(1.0));
        assert_eq!(row.numeric(Column::Label, OutputMode::Relational), None);

        let csv = row.render(OutputMode::Csv);
        assert_eq!(csv[8], "");
        assert_eq!(csv[9], "1");
    }
}
