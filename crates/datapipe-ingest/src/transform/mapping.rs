//! Declarative per-source field mapping
//!
//! Transforms first turn their input into raw rows (column name to text or
//! JSON scalar) and then run a [`RecordMapping`] over each one: renaming,
//! value translation, date and integer parsing, point construction, and
//! row-level filters.

use chrono::{NaiveDate, NaiveDateTime};
use std::collections::{BTreeMap, HashSet};

use crate::geometry::{Coord, Geometry};
use crate::resource::ResourceMeta;
use crate::row::{parse_decimal, FieldValue, NormalizedRow};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateKind {
    Date,
    DateTime,
}

/// Field parsed against a list of `chrono` format strings
#[derive(Debug, Clone, PartialEq)]
pub struct DateColumn {
    pub field: String,
    pub formats: Vec<String>,
    pub kind: DateKind,
}

/// Filter rows by a field whose accepted values come from a resource option
#[derive(Debug, Clone, PartialEq)]
pub struct OptionFilter {
    pub field: String,
    /// Resource option holding a comma separated list of accepted values
    pub option: String,
    /// Used when the resource does not set the option
    pub default: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordMapping {
    /// Source column to target field
    pub rename: Vec<(String, String)>,
    /// Source columns that must exist in the input
    pub required: Vec<String>,
    /// Source columns removed before anything else
    pub drop: Vec<String>,
    /// When non-empty, only these target fields are kept
    pub keep: Vec<String>,
    /// Target fields holding longitude and latitude; consumed into a point
    pub coordinates: Option<(String, String)>,
    /// Text field holding `lat, lon` (optionally parenthesized); rows where
    /// it does not parse keep no geometry
    pub location_pair: Option<String>,
    pub dates: Vec<DateColumn>,
    pub integers: Vec<String>,
    /// Parsed as floats; for `;`-separated lists the first entry wins
    pub decimals: Vec<String>,
    /// Value translations applied to the listed fields
    pub value_map: BTreeMap<String, String>,
    pub value_map_fields: Vec<String>,
    /// Rows where `field == value` are skipped
    pub exclude: Vec<(String, String)>,
    /// Rows missing any of these target fields are skipped
    pub drop_if_null: Vec<String>,
    pub option_filter: Option<OptionFilter>,
    /// Keep only the first row per value of this field
    pub dedupe_on: Option<String>,
}

impl RecordMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rename(mut self, from: &str, to: &str) -> Self {
        self.rename.push((from.to_string(), to.to_string()));
        self
    }

    pub fn renames(mut self, pairs: &[(&str, &str)]) -> Self {
        for (from, to) in pairs {
            self = self.rename(from, to);
        }
        self
    }

    pub fn require(mut self, columns: &[&str]) -> Self {
        self.required.extend(columns.iter().map(|c| c.to_string()));
        self
    }

    pub fn drop_columns(mut self, columns: &[&str]) -> Self {
        self.drop.extend(columns.iter().map(|c| c.to_string()));
        self
    }

    pub fn keep(mut self, fields: &[&str]) -> Self {
        self.keep.extend(fields.iter().map(|c| c.to_string()));
        self
    }

    pub fn point(mut self, lon: &str, lat: &str) -> Self {
        self.coordinates = Some((lon.to_string(), lat.to_string()));
        self
    }

    pub fn location_pair(mut self, field: &str) -> Self {
        self.location_pair = Some(field.to_string());
        self
    }

    pub fn date(mut self, field: &str, formats: &[&str]) -> Self {
        self.dates.push(DateColumn {
            field: field.to_string(),
            formats: formats.iter().map(|f| f.to_string()).collect(),
            kind: DateKind::Date,
        });
        self
    }

    pub fn datetime(mut self, field: &str, formats: &[&str]) -> Self {
        self.dates.push(DateColumn {
            field: field.to_string(),
            formats: formats.iter().map(|f| f.to_string()).collect(),
            kind: DateKind::DateTime,
        });
        self
    }

    pub fn integers(mut self, fields: &[&str]) -> Self {
        self.integers.extend(fields.iter().map(|c| c.to_string()));
        self
    }

    pub fn decimals(mut self, fields: &[&str]) -> Self {
        self.decimals.extend(fields.iter().map(|c| c.to_string()));
        self
    }

    pub fn translate(mut self, fields: &[&str], pairs: &[(&str, &str)]) -> Self {
        self.value_map_fields.extend(fields.iter().map(|c| c.to_string()));
        self.value_map
            .extend(pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())));
        self
    }

    pub fn exclude(mut self, field: &str, value: &str) -> Self {
        self.exclude.push((field.to_string(), value.to_string()));
        self
    }

    pub fn drop_if_null(mut self, fields: &[&str]) -> Self {
        self.drop_if_null.extend(fields.iter().map(|c| c.to_string()));
        self
    }

    pub fn option_filter(mut self, field: &str, option: &str, default: &[&str]) -> Self {
        self.option_filter = Some(OptionFilter {
            field: field.to_string(),
            option: option.to_string(),
            default: default.iter().map(|c| c.to_string()).collect(),
        });
        self
    }

    pub fn dedupe_on(mut self, field: &str) -> Self {
        self.dedupe_on = Some(field.to_string());
        self
    }

    /// First required column missing from `columns`, if any
    pub fn missing_required<'a>(&'a self, columns: &HashSet<&str>) -> Option<&'a str> {
        self.required
            .iter()
            .map(String::as_str)
            .find(|c| !columns.contains(c))
    }

    /// Map a batch of raw rows, applying row filters and de-duplication.
    pub fn apply_all(&self, raw: Vec<NormalizedRow>, meta: &ResourceMeta) -> Vec<NormalizedRow> {
        let accepted = self.accepted_values(meta);
        let mut seen = HashSet::new();
        let total = raw.len();

        let rows: Vec<NormalizedRow> = raw
            .into_iter()
            .filter_map(|row| self.apply(row, accepted.as_ref()))
            .filter(|row| match &self.dedupe_on {
                Some(field) => seen.insert(format!("{:?}", row.get(field))),
                None => true,
            })
            .collect();

        if rows.len() != total {
            tracing::debug!(
                data_source = %meta.data_source,
                kept = rows.len(),
                skipped = total - rows.len(),
                "Rows filtered during mapping"
            );
        }
        rows
    }

    fn accepted_values(&self, meta: &ResourceMeta) -> Option<HashSet<String>> {
        let filter = self.option_filter.as_ref()?;
        let values: HashSet<String> = match meta.option(&filter.option) {
            Some(raw) => datapipe_common::env::split_list(raw).map(str::to_string).collect(),
            None => filter.default.iter().cloned().collect(),
        };
        Some(values)
    }

    /// Map one raw row; `None` means the row is filtered out.
    pub fn apply(
        &self,
        mut row: NormalizedRow,
        accepted: Option<&HashSet<String>>,
    ) -> Option<NormalizedRow> {
        for column in &self.drop {
            row.remove(column);
        }
        for (from, to) in &self.rename {
            row.rename(from, to);
        }
        if !self.keep.is_empty() {
            let keep: HashSet<&str> = self
                .keep
                .iter()
                .map(String::as_str)
                .chain(self.coordinates.iter().flat_map(|(a, b)| [a.as_str(), b.as_str()]))
                .collect();
            row.fields.retain(|k, _| keep.contains(k.as_str()));
        }

        for (field, value) in &self.exclude {
            if row.get(field).and_then(FieldValue::as_str) == Some(value.as_str()) {
                return None;
            }
        }
        if let (Some(filter), Some(accepted)) = (&self.option_filter, accepted) {
            let value = row.get(&filter.field).and_then(FieldValue::as_str)?;
            if !accepted.contains(value) {
                return None;
            }
        }
        if self
            .drop_if_null
            .iter()
            .any(|f| row.get(f).map_or(true, FieldValue::is_null))
        {
            return None;
        }

        for field in &self.value_map_fields {
            if let Some(FieldValue::Text(text)) = row.fields.get_mut(field) {
                if let Some(mapped) = self.value_map.get(text.as_str()) {
                    *text = mapped.clone();
                }
            }
        }
        for field in &self.integers {
            if let Some(value) = row.fields.get_mut(field) {
                *value = match value.as_f64() {
                    Some(v) if v.fract() == 0.0 => FieldValue::Int(v as i64),
                    _ => FieldValue::Null,
                };
            }
        }
        for field in &self.decimals {
            if let Some(value) = row.fields.get_mut(field) {
                let parsed = match &*value {
                    FieldValue::Text(text) => text.split(';').next().and_then(parse_decimal),
                    other => other.as_f64(),
                };
                *value = parsed.into();
            }
        }
        for column in &self.dates {
            if let Some(value) = row.fields.get_mut(&column.field) {
                *value = parse_date_value(value, column);
            }
        }

        if let Some(field) = &self.location_pair {
            if let Some(value) = row.remove(field) {
                row.geometry = value.as_str().and_then(parse_location_pair);
            }
        }
        if let Some((lon_field, lat_field)) = &self.coordinates {
            let lon = row.remove(lon_field).and_then(|v| v.as_f64());
            let lat = row.remove(lat_field).and_then(|v| v.as_f64());
            match (lon, lat) {
                (Some(lon), Some(lat)) if Coord::new(lon, lat).is_valid() => {
                    row.geometry = Some(Geometry::point(lon, lat));
                },
                _ => return None,
            }
        }

        Some(row)
    }
}

/// `"(49.44, 7.77)"` or `"49.44,7.77"`, latitude first
fn parse_location_pair(raw: &str) -> Option<Geometry> {
    let (lat, lon) = raw
        .trim()
        .trim_start_matches('(')
        .trim_end_matches(')')
        .split_once(',')?;
    let lat = lat.trim().parse::<f64>().ok()?;
    let lon = lon.trim().parse::<f64>().ok()?;
    let coord = Coord::new(lon, lat);
    coord.is_valid().then_some(Geometry::Point(coord))
}

fn parse_date_value(value: &FieldValue, column: &DateColumn) -> FieldValue {
    let FieldValue::Text(raw) = value else {
        return value.clone();
    };
    let raw = raw.trim();
    let parsed = column.formats.iter().find_map(|fmt| match column.kind {
        DateKind::Date => NaiveDate::parse_from_str(raw, fmt)
            .ok()
            .or_else(|| NaiveDateTime::parse_from_str(raw, fmt).ok().map(|d| d.date()))
            .map(FieldValue::Date),
        DateKind::DateTime => NaiveDateTime::parse_from_str(raw, fmt)
            .ok()
            .map(FieldValue::Timestamp),
    });
    parsed.unwrap_or_else(|| {
        tracing::debug!(field = %column.field, value = %raw, "Unparsable date, storing null");
        FieldValue::Null
    })
}
