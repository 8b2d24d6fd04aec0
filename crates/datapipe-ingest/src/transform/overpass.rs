//! Overpass API JSON (`out geom`) elements

use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::BTreeMap;

use super::{artifact, read_artifact, RecordMapping, RowTransformer};
use crate::context::PipelineContext;
use crate::error::TransformError;
use crate::geometry::{Coord, Geometry};
use crate::row::{FieldValue, NormalizedRow};

/// Resource option restricting elements to one tag value, `key=value`
pub const REQUIRE_TAG_OPTION: &str = "require_tag";

/// Tag values shown in German in the target tables
const TAG_VALUES: &[(&str, &str)] = &[
    ("yes", "Ja"),
    ("no", "Nein"),
    ("ja", "Ja"),
    ("nein", "Nein"),
    ("customers", "Kunden"),
    ("private", "Privat"),
    ("permissive", "Erlaubt"),
];

#[derive(Debug, Deserialize)]
struct OverpassResponse {
    elements: Vec<Element>,
}

#[derive(Debug, Deserialize)]
struct Element {
    #[serde(rename = "type")]
    kind: String,
    id: i64,
    lat: Option<f64>,
    lon: Option<f64>,
    #[serde(default)]
    geometry: Vec<LatLon>,
    #[serde(default)]
    tags: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct LatLon {
    lat: f64,
    lon: f64,
}

impl Element {
    /// Nodes become points, closed ways polygons; everything else is skipped.
    fn geometry(&self) -> Option<Geometry> {
        match self.kind.as_str() {
            "node" => Some(Geometry::point(self.lon?, self.lat?)),
            "way" if self.geometry.len() >= 4 => {
                let ring: Vec<Coord> = self.geometry.iter().map(|p| Coord::new(p.lon, p.lat)).collect();
                (ring.first() == ring.last()).then_some(Geometry::Polygon(ring))
            },
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct OverpassTransformer {
    mapping: RecordMapping,
}

impl OverpassTransformer {
    pub fn new(mapping: RecordMapping) -> Self {
        Self { mapping }
    }
}

fn translate(value: &str) -> &str {
    TAG_VALUES
        .iter()
        .find(|(from, _)| *from == value)
        .map_or(value, |&(_, to)| to)
}

impl RowTransformer for OverpassTransformer {
    fn transform(
        &self,
        ctx: &PipelineContext,
        _target_model: &str,
        _acquisition_date: NaiveDate,
    ) -> Result<Vec<NormalizedRow>, TransformError> {
        let path = artifact(ctx)?;
        let response: OverpassResponse = serde_json::from_str(&read_artifact(path)?)?;

        let required = ctx
            .resource
            .meta()
            .option(REQUIRE_TAG_OPTION)
            .and_then(|raw| raw.split_once('='))
            .map(|(k, v)| (k.trim(), v.trim()));

        let total = response.elements.len();
        let raw: Vec<NormalizedRow> = response
            .elements
            .into_iter()
            .filter(|e| match required {
                Some((key, value)) => e.tags.get(key).map(String::as_str) == Some(value),
                None => true,
            })
            .filter_map(|element| {
                let geometry = element.geometry()?;
                let mut row = NormalizedRow::new().with_geometry(geometry);
                row.set("osm_id", element.id);
                for (key, value) in &element.tags {
                    row.set(key.replace(':', "_"), FieldValue::text(translate(value)));
                }
                Some(row)
            })
            .collect();

        tracing::debug!(elements = total, kept = raw.len(), "Parsed Overpass elements");
        Ok(self.mapping.apply_all(raw, ctx.resource.meta()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::resource::{ParametrizedQuery, ResourceDescriptor, ResourceMeta};

    const RESPONSE: &str = r#"{
      "version": 0.6,
      "elements": [
        {"type": "node", "id": 11, "lat": 49.44, "lon": 7.76,
         "tags": {"amenity": "recycling", "recycling_type": "container", "recycling:glass": "yes"}},
        {"type": "way", "id": 12, "tags": {"amenity": "recycling", "recycling_type": "centre"},
         "geometry": [{"lat": 49.40, "lon": 7.70}, {"lat": 49.40, "lon": 7.71}, {"lat": 49.41, "lon": 7.71}, {"lat": 49.40, "lon": 7.70}]},
        {"type": "way", "id": 13, "tags": {"amenity": "recycling", "recycling_type": "centre"},
         "geometry": [{"lat": 49.40, "lon": 7.70}, {"lat": 49.41, "lon": 7.71}]},
        {"type": "relation", "id": 14, "tags": {"recycling_type": "centre"}}
      ]
    }"#;

    fn context(dir: &std::path::Path, require: Option<&str>) -> PipelineContext {
        let path = dir.join("recycling.json");
        std::fs::write(&path, RESPONSE).unwrap();
        let mut meta = ResourceMeta::new("osm-recycling", "osm_recycling_containers");
        if let Some(require) = require {
            meta.options.insert(REQUIRE_TAG_OPTION.into(), require.into());
        }
        let resource = ResourceDescriptor::ParametrizedQuery(ParametrizedQuery {
            meta,
            tags: BTreeMap::from([("amenity".to_string(), "recycling".to_string())]),
            place_filter: "Kaiserslautern".into(),
            filename: "recycling.json".into(),
        });
        let mut ctx = PipelineContext::new(resource, dir);
        ctx.add_artifact(path);
        ctx
    }

    #[test]
    fn test_nodes_and_closed_ways() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), None);
        let rows = OverpassTransformer::default()
            .transform(&ctx, "osm_recycling_containers", ctx.acquisition_date)
            .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("osm_id"), Some(&FieldValue::Int(11)));
        assert_eq!(rows[0].get("recycling_glass"), Some(&FieldValue::Text("Ja".into())));
        assert!(matches!(rows[1].geometry, Some(Geometry::Polygon(_))));
    }

    #[test]
    fn test_require_tag_option() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), Some("recycling_type=container"));
        let rows = OverpassTransformer::default()
            .transform(&ctx, "osm_recycling_containers", ctx.acquisition_date)
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("osm_id"), Some(&FieldValue::Int(11)));
    }
}
