//! GeoJSON feature collections (WFS responses, municipal geo exports)

use chrono::NaiveDate;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

use super::{artifact, read_artifact, RecordMapping, RowTransformer};
use crate::context::PipelineContext;
use crate::error::TransformError;
use crate::geometry::Geometry;
use crate::row::{FieldValue, NormalizedRow};

/// Maps feature properties with a per-target-model [`RecordMapping`]
#[derive(Debug, Clone, Default)]
pub struct GeoJsonTransformer {
    default: RecordMapping,
    by_model: BTreeMap<String, RecordMapping>,
}

impl GeoJsonTransformer {
    pub fn new(default: RecordMapping) -> Self {
        Self {
            default,
            by_model: BTreeMap::new(),
        }
    }

    pub fn with_model(mut self, target_model: impl Into<String>, mapping: RecordMapping) -> Self {
        self.by_model.insert(target_model.into(), mapping);
        self
    }

    fn mapping(&self, target_model: &str) -> &RecordMapping {
        self.by_model.get(target_model).unwrap_or(&self.default)
    }
}

impl RowTransformer for GeoJsonTransformer {
    fn transform(
        &self,
        ctx: &PipelineContext,
        target_model: &str,
        _acquisition_date: NaiveDate,
    ) -> Result<Vec<NormalizedRow>, TransformError> {
        let path = artifact(ctx)?;
        let doc: Value = serde_json::from_str(&read_artifact(path)?)?;
        let features = doc
            .get("features")
            .and_then(Value::as_array)
            .ok_or_else(|| TransformError::structure(path, "no features array"))?;

        let mapping = self.mapping(target_model);
        let mut present: HashSet<&str> = HashSet::new();
        let mut raw = Vec::with_capacity(features.len());
        let mut unsupported = 0usize;

        for feature in features {
            let mut row = NormalizedRow::new();
            if let Some(properties) = feature.get("properties").and_then(Value::as_object) {
                for (key, value) in properties {
                    present.insert(key.as_str());
                    row.set(key.as_str(), FieldValue::from_json(value));
                }
            }
            match feature.get("geometry") {
                Some(Value::Null) | None => {},
                Some(geometry) => match Geometry::from_geojson(geometry) {
                    Some(parsed) => row.geometry = Some(parsed),
                    None => {
                        unsupported += 1;
                        continue;
                    },
                },
            }
            raw.push(row);
        }

        if !features.is_empty() {
            if let Some(column) = mapping.missing_required(&present) {
                return Err(TransformError::MissingColumn {
                    path: path.to_path_buf(),
                    column: column.to_string(),
                });
            }
        }
        if unsupported > 0 {
            tracing::warn!(path = %path.display(), skipped = unsupported, "Features with unsupported geometry skipped");
        }

        Ok(mapping.apply_all(raw, ctx.resource.meta()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::resource::{ResourceDescriptor, ResourceMeta, SpatialService};

    const PARKING: &str = r#"{
      "type": "FeatureCollection",
      "features": [
        {"type": "Feature", "properties": {"name": "P1 Altstadt", "type": "car", "capacity": 120},
         "geometry": {"type": "Point", "coordinates": [7.7689, 49.4432]}},
        {"type": "Feature", "properties": {"name": "Stadtgebiet", "type": "city"},
         "geometry": {"type": "Polygon", "coordinates": [[[7.7, 49.4], [7.8, 49.4], [7.8, 49.5], [7.7, 49.4]]]}},
        {"type": "Feature", "properties": {"name": "Linie"},
         "geometry": {"type": "LineString", "coordinates": [[7.7, 49.4], [7.8, 49.5]]}}
      ]
    }"#;

    fn context(dir: &std::path::Path, content: &str, target_model: &str) -> PipelineContext {
        let path = dir.join("layer.geojson");
        std::fs::write(&path, content).unwrap();
        let resource = ResourceDescriptor::SpatialService(SpatialService {
            meta: ResourceMeta::new("kl-wfs", target_model),
            url: "https://geo.example.org/wfs".into(),
            layer_name: "parken".into(),
            srs_name: "EPSG:4326".into(),
            out_format: "application/json".into(),
            filename: "layer.geojson".into(),
        });
        let mut ctx = PipelineContext::new(resource, dir);
        ctx.add_artifact(path);
        ctx
    }

    #[test]
    fn test_per_model_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), PARKING, "kl_parking_locations");
        let transformer = GeoJsonTransformer::new(RecordMapping::new()).with_model(
            "kl_parking_locations",
            RecordMapping::new().require(&["name"]).exclude("type", "city"),
        );

        let rows = transformer
            .transform(&ctx, "kl_parking_locations", ctx.acquisition_date)
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("capacity"), Some(&FieldValue::Int(120)));
        assert_eq!(rows[0].geometry, Some(Geometry::point(7.7689, 49.4432)));

        let rows = transformer
            .transform(&ctx, "kl_other_layer", ctx.acquisition_date)
            .unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_missing_features_is_structural_error() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), r#"{"type": "ExceptionReport"}"#, "kl_sculptures");
        let err = GeoJsonTransformer::default()
            .transform(&ctx, "kl_sculptures", ctx.acquisition_date)
            .unwrap_err();
        assert!(matches!(err, TransformError::Structure { .. }));
    }

    #[test]
    fn test_invalid_json_fails() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), "<html>maintenance</html>", "kl_sculptures");
        let err = GeoJsonTransformer::default()
            .transform(&ctx, "kl_sculptures", ctx.acquisition_date)
            .unwrap_err();
        assert!(matches!(err, TransformError::Json(_)));
    }
}
