//! Normalized rows produced by transforms and consumed by imports

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::geometry::Geometry;

/// Column holding the source tag used to scope replace-on-import
pub const DATA_SOURCE_FIELD: &str = "data_source";
/// Column holding the acquisition date
pub const ACQUISITION_DATE_FIELD: &str = "data_acquisition_date";
/// Column holding the district name resolved from the geometry
pub const DISTRICT_FIELD: &str = "city_district_name";
/// Geometry column
pub const GEOMETRY_FIELD: &str = "geometry";
/// Discriminator column for tables shared by several resources
pub const TYPE_FIELD: &str = "type";

/// Typed scalar value of a row field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Json(serde_json::Value),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view; text is parsed with a decimal comma tolerated.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Int(i) => Some(*i as f64),
            FieldValue::Float(f) => Some(*f),
            FieldValue::Text(s) => parse_decimal(s),
            _ => None,
        }
    }

    /// Convert a JSON scalar. Arrays and objects stay JSON.
    pub fn from_json(value: &serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => FieldValue::Null,
            Value::Bool(b) => FieldValue::Bool(*b),
            Value::Number(n) => n
                .as_i64()
                .map(FieldValue::Int)
                .or_else(|| n.as_f64().map(FieldValue::Float))
                .unwrap_or(FieldValue::Null),
            Value::String(s) => FieldValue::text(s),
            other => FieldValue::Json(other.clone()),
        }
    }

    /// Text value, with blank and NaN-like strings mapped to null.
    pub fn text(s: &str) -> Self {
        let trimmed = s.trim();
        if trimmed.is_empty() || matches!(trimmed, "nan" | "NaN" | "None" | "null") {
            FieldValue::Null
        } else {
            FieldValue::Text(trimmed.to_string())
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<NaiveDate> for FieldValue {
    fn from(v: NaiveDate) -> Self {
        FieldValue::Date(v)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(FieldValue::Null)
    }
}

/// Parse a decimal number, accepting `,` as the decimal separator.
pub fn parse_decimal(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed
        .parse::<f64>()
        .ok()
        .or_else(|| trimmed.replace(',', ".").parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

/// One record ready for import
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NormalizedRow {
    pub fields: BTreeMap<String, FieldValue>,
    pub geometry: Option<Geometry>,
}

impl NormalizedRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_geometry(mut self, geometry: Geometry) -> Self {
        self.geometry = Some(geometry);
        self
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<FieldValue>) {
        self.fields.insert(field.into(), value.into());
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    pub fn remove(&mut self, field: &str) -> Option<FieldValue> {
        self.fields.remove(field)
    }

    /// Rename a field, keeping its value. A missing source is a no-op.
    pub fn rename(&mut self, from: &str, to: &str) {
        if from == to {
            return;
        }
        if let Some(value) = self.fields.remove(from) {
            self.fields.insert(to.to_string(), value);
        }
    }

    pub fn data_source(&self) -> Option<&str> {
        self.get(DATA_SOURCE_FIELD).and_then(FieldValue::as_str)
    }

    /// Column names in persisted order, including the geometry column.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields
            .keys()
            .map(String::as_str)
            .chain(self.geometry.as_ref().map(|_| GEOMETRY_FIELD))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_decimal_comma() {
        assert_eq!(parse_decimal("49,4432"), Some(49.4432));
        assert_eq!(parse_decimal(" 7.75 "), Some(7.75));
        assert_eq!(parse_decimal("n/a"), None);
        assert_eq!(parse_decimal(""), None);
    }

    #[test]
    fn test_text_normalizes_missing_values() {
        assert!(FieldValue::text("NaN").is_null());
        assert!(FieldValue::text("  ").is_null());
        assert_eq!(FieldValue::text(" Ja "), FieldValue::Text("Ja".into()));
    }

    #[test]
    fn test_from_json_scalars() {
        assert_eq!(FieldValue::from_json(&json!(3)), FieldValue::Int(3));
        assert_eq!(FieldValue::from_json(&json!(3.5)), FieldValue::Float(3.5));
        assert!(matches!(FieldValue::from_json(&json!([1, 2])), FieldValue::Json(_)));
    }

    #[test]
    fn test_rename_and_columns() {
        let mut row = NormalizedRow::new().with_geometry(Geometry::point(7.7, 49.4));
        row.set("Betreiber", "Stadtwerke");
        row.rename("Betreiber", "operator");
        row.rename("absent", "other");
        let columns: Vec<&str> = row.columns().collect();
        assert_eq!(columns, vec!["operator", GEOMETRY_FIELD]);
    }
}
