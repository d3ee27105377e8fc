use crate::types::ChunkMetadata;
use chrono::NaiveDate;

/// Inclusive calendar date bounds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl DateRange {
    pub const fn is_open(&self) -> bool {
        self.from.is_none() && self.to.is_none()
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from.map_or(true, |from| date >= from) && self.to.map_or(true, |to| date <= to)
    }
}

/// Conjunction of equality predicates over the known metadata fields plus an
/// optional date range. An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataFilter {
    pub document_type: Option<String>,
    pub patient_id: Option<String>,
    pub document_id: Option<String>,
    pub date_range: Option<DateRange>,
}

impl MetadataFilter {
    pub fn is_empty(&self) -> bool {
        self.document_type.is_none()
            && self.patient_id.is_none()
            && self.document_id.is_none()
            && self.date_range.map_or(true, |r| r.is_open())
    }

    /// Records without a `document_date` never satisfy a date range.
    pub fn matches(&self, document_id: &str, metadata: &ChunkMetadata) -> bool {
        if let Some(expected) = &self.document_id {
            if expected != document_id {
                return false;
            }
        }
        if !field_matches(self.document_type.as_deref(), metadata.document_type.as_deref()) {
            return false;
        }
        if !field_matches(self.patient_id.as_deref(), metadata.patient_id.as_deref()) {
            return false;
        }
        match self.date_range {
            Some(range) if !range.is_open() => {
                metadata.document_date.is_some_and(|d| range.contains(d))
            }
            _ => true,
        }
    }
}

fn field_matches(expected: Option<&str>, actual: Option<&str>) -> bool {
    match expected {
        None => true,
        Some(expected) => actual == Some(expected),
    }
}
