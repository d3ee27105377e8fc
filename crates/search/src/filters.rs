use crate::error::{Result, SearchError};
use chrono::NaiveDate;
use semindex_protocol::SearchFilters;
use semindex_vector_store::{DateRange, MetadataFilter};

/// Parse a calendar date in ISO `YYYY-MM-DD` form.
pub fn parse_iso_date(field: &str, raw: &str) -> std::result::Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|e| format!("{field} must be a YYYY-MM-DD date (got '{raw}'): {e}"))
}

/// Validate wire filters and turn them into a store predicate.
pub fn build_filter(filters: &SearchFilters) -> Result<MetadataFilter> {
    let document_type = non_blank("filters.document_type", filters.document_type.as_deref())?;
    let patient_id = non_blank("filters.patient_id", filters.patient_id.as_deref())?;
    let document_id = non_blank("filters.document_id", filters.document_id.as_deref())?;

    let (raw_from, raw_to) = filters.date_bounds();
    let from = raw_from
        .map(|raw| parse_iso_date("filters.date_from", raw))
        .transpose()
        .map_err(SearchError::InvalidQuery)?;
    let to = raw_to
        .map(|raw| parse_iso_date("filters.date_to", raw))
        .transpose()
        .map_err(SearchError::InvalidQuery)?;

    if let (Some(from), Some(to)) = (from, to) {
        if from > to {
            return Err(SearchError::invalid(format!(
                "filters.date_from ({from}) is after filters.date_to ({to})"
            )));
        }
    }

    let date_range = (from.is_some() || to.is_some()).then_some(DateRange { from, to });
    Ok(MetadataFilter {
        document_type,
        patient_id,
        document_id,
        date_range,
    })
}

fn non_blank(field: &str, value: Option<&str>) -> Result<Option<String>> {
    match value {
        None => Ok(None),
        Some(v) if v.trim().is_empty() => Err(SearchError::invalid(format!(
            "{field} must not be empty when provided"
        ))),
        Some(v) => Ok(Some(v.trim().to_string())),
    }
}
