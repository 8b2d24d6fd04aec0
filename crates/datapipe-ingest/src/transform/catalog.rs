//! Sensor catalog (YAML list of MQTT topics with their positions)

use chrono::NaiveDate;
use serde::Deserialize;

use super::{artifact, read_artifact, RowTransformer};
use crate::context::PipelineContext;
use crate::error::TransformError;
use crate::geometry::{Coord, Geometry};
use crate::row::NormalizedRow;

pub const UNKNOWN_SENSOR_TYPE: &str = "Unbekannt";

/// Topic keyword to sensor type label; the first keyword found in the topic wins
const SENSOR_TYPES: &[(&str, &str)] = &[
    ("weather", "Wetterstation"),
    ("particle", "Luftqualität"),
    ("sound", "Geräuschpegel"),
    ("distance", "Abstandssensor"),
    ("distance_lidar", "Abstandssensor"),
    ("distance_ultrasonic", "Abstandssensor"),
    ("temperature", "Temperatur"),
    ("moisture", "Feuchtigkeit"),
    ("particle_temp", "Luftqualität & Temperatur"),
    ("temperature_multi", "Temperatur"),
];

#[derive(Debug, Deserialize)]
struct Catalog {
    sensors: Vec<CatalogEntry>,
}

#[derive(Debug, Deserialize)]
struct CatalogEntry {
    topic: String,
    sensor_latitude: f64,
    sensor_longitude: f64,
}

pub fn sensor_type(topic: &str) -> &'static str {
    SENSOR_TYPES
        .iter()
        .find(|(keyword, _)| topic.contains(keyword))
        .map_or(UNKNOWN_SENSOR_TYPE, |&(_, label)| label)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SensorCatalogTransformer;

impl RowTransformer for SensorCatalogTransformer {
    fn transform(
        &self,
        ctx: &PipelineContext,
        _target_model: &str,
        _acquisition_date: NaiveDate,
    ) -> Result<Vec<NormalizedRow>, TransformError> {
        let path = artifact(ctx)?;
        let catalog: Catalog = serde_yaml::from_str(&read_artifact(path)?)?;

        let mut rows = Vec::with_capacity(catalog.sensors.len());
        for entry in catalog.sensors {
            let position = Coord::new(entry.sensor_longitude, entry.sensor_latitude);
            if !position.is_valid() {
                tracing::warn!(topic = %entry.topic, "Sensor with invalid position skipped");
                continue;
            }
            tracing::debug!(topic = %entry.topic, "Loading sensor");
            let mut row = NormalizedRow::new().with_geometry(Geometry::Point(position));
            row.set("sensor_type", sensor_type(&entry.topic));
            row.set("sensor_topic", entry.topic);
            rows.push(row);
        }
        Ok(rows)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::resource::{LocalFile, ResourceDescriptor, ResourceMeta};
    use crate::row::FieldValue;

    #[test]
    fn test_sensor_type_labels() {
        assert_eq!(sensor_type("kl/weather/station-3"), "Wetterstation");
        assert_eq!(sensor_type("kl/particle_temp/7"), "Luftqualität");
        assert_eq!(sensor_type("kl/distance_lidar/2"), "Abstandssensor");
        assert_eq!(sensor_type("kl/unknown/1"), UNKNOWN_SENSOR_TYPE);
    }

    #[test]
    fn test_catalog_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sensors.yaml");
        std::fs::write(
            &path,
            "sensors:\n  - topic: kl/sound/1\n    sensor_latitude: 49.44\n    sensor_longitude: 7.76\n  - topic: kl/moisture/9\n    sensor_latitude: 91.0\n    sensor_longitude: 7.7\n",
        )
        .unwrap();
        let resource = ResourceDescriptor::LocalFile(LocalFile {
            meta: ResourceMeta::new("kl-sensors", "kl_environmental_sensors"),
            filename: "sensors.yaml".into(),
        });
        let mut ctx = PipelineContext::new(resource, dir.path());
        ctx.add_artifact(path);

        let rows = SensorCatalogTransformer
            .transform(&ctx, "kl_environmental_sensors", ctx.acquisition_date)
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("sensor_type"), Some(&FieldValue::Text("Geräuschpegel".into())));
        assert_eq!(rows[0].geometry, Some(Geometry::point(7.76, 49.44)));
    }

    #[test]
    fn test_catalog_without_sensors_key_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sensors.yaml");
        std::fs::write(&path, "devices: []\n").unwrap();
        let resource = ResourceDescriptor::LocalFile(LocalFile {
            meta: ResourceMeta::new("kl-sensors", "kl_environmental_sensors"),
            filename: "sensors.yaml".into(),
        });
        let mut ctx = PipelineContext::new(resource, dir.path());
        ctx.add_artifact(path);

        let err = SensorCatalogTransformer
            .transform(&ctx, "kl_environmental_sensors", ctx.acquisition_date)
            .unwrap_err();
        assert!(matches!(err, TransformError::Yaml(_)));
    }
}
