//! Conversion of raw admin text values into sample values and labels.
//!
//! ProxySQL's admin interface returns every column as text. Numeric columns
//! parse as `f64`; a few connection-pool columns are labels rather than
//! values; the backend `status` column is an enumeration mapped to a fixed
//! ordinal so it can be exposed as a gauge.

use std::collections::BTreeMap;

/// Backend status strings in severity order. Ordinals start at 1.
pub const STATUS_ORDINALS: [(&str, u8); 4] = [
    ("ONLINE", 1),
    ("SHUNNED", 2),
    ("OFFLINE_SOFT", 3),
    ("OFFLINE_HARD", 4),
];

/// Columns routed to the label set instead of being exposed as values.
pub const LABEL_FIELDS: [&str; 3] = ["hostgroup", "srv_host", "srv_port"];

/// Column carrying the backend status enumeration.
pub const STATUS_FIELD: &str = "status";

/// Result of coercing one field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Coerced {
    Value(f64),
    Label,
}

/// Error type for field coercion.
#[derive(Debug, Clone, PartialEq)]
pub enum CoerceError {
    /// Text is not a number.
    MalformedValue { field: String, value: String },
    /// Status string outside the ordinal table.
    UnknownStatus { value: String },
}

impl std::fmt::Display for CoerceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoerceError::MalformedValue { field, value } => {
                write!(f, "malformed value for {}: {:?}", field, value)
            }
            CoerceError::UnknownStatus { value } => write!(f, "unknown backend status {:?}", value),
        }
    }
}

impl std::error::Error for CoerceError {}

/// Coerces one raw field. `field` may be in any case.
pub fn parse(field: &str, raw: &str) -> Result<Coerced, CoerceError> {
    if is_label_field(field) {
        return Ok(Coerced::Label);
    }
    if field.eq_ignore_ascii_case(STATUS_FIELD) {
        return status_ordinal(raw).map(Coerced::Value);
    }
    parse_number(field, raw).map(Coerced::Value)
}

/// Parses a plain numeric field.
pub fn parse_number(field: &str, raw: &str) -> Result<f64, CoerceError> {
    raw.trim()
        .parse::<f64>()
        .map_err(|_| CoerceError::MalformedValue {
            field: field.to_string(),
            value: raw.to_string(),
        })
}

/// Maps a backend status string to its ordinal.
pub fn status_ordinal(raw: &str) -> Result<f64, CoerceError> {
    let status = raw.trim();
    STATUS_ORDINALS
        .iter()
        .find(|(name, _)| *name == status)
        .map(|(_, ordinal)| f64::from(*ordinal))
        .ok_or_else(|| CoerceError::UnknownStatus {
            value: raw.to_string(),
        })
}

/// Composes the `endpoint` label from a backend host and port.
pub fn endpoint(host: &str, port: &str) -> String {
    format!("{}:{}", host, port)
}

/// Label set shared by every sample of one connection-pool row.
pub fn pool_labels(hostgroup: &str, host: &str, port: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("hostgroup".to_string(), hostgroup.to_string()),
        ("endpoint".to_string(), endpoint(host, port)),
    ])
}

pub fn is_label_field(field: &str) -> bool {
    LABEL_FIELDS.iter().any(|l| field.eq_ignore_ascii_case(l))
}
