use serde::{Deserialize, Serialize};

/// Date bounds as sent by clients (`YYYY-MM-DD`, inclusive).
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct DateRangeInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
}

/// Metadata filters of a search request. Values are raw strings; the search
/// engine validates and parses them.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct SearchFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_to: Option<String>,
    /// Nested form of `date_from`/`date_to`; the flat fields win when both
    /// are given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_range: Option<DateRangeInput>,
}

impl SearchFilters {
    /// True when at least one filter field carries a value.
    pub fn is_active(&self) -> bool {
        let (from, to) = self.date_bounds();
        [
            self.document_type.as_deref(),
            self.patient_id.as_deref(),
            self.document_id.as_deref(),
            from,
            to,
        ]
        .into_iter()
        .flatten()
        .any(|v| !v.trim().is_empty())
    }

    /// Effective `(from, to)` bounds, merging the flat and nested forms.
    pub fn date_bounds(&self) -> (Option<&str>, Option<&str>) {
        let nested = self.date_range.as_ref();
        let from = self
            .date_from
            .as_deref()
            .or_else(|| nested.and_then(|r| r.from.as_deref()));
        let to = self
            .date_to
            .as_deref()
            .or_else(|| nested.and_then(|r| r.to.as_deref()));
        (from, to)
    }
}
