//! District lookup for row enrichment

use serde_json::Value;
use std::path::Path;

use crate::error::TransformError;
use crate::geometry::{ring_contains, BoundingBox, Coord, Geometry};

/// Resolves the city district a geometry lies in
pub trait DistrictLocator: Send + Sync {
    fn locate(&self, geometry: &Geometry) -> Option<String>;

    /// Extent of all districts, used as the default filter region
    fn extent(&self) -> Option<BoundingBox> {
        None
    }
}

/// Locator used when no district data is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLocator;

impl DistrictLocator for NoopLocator {
    fn locate(&self, _geometry: &Geometry) -> Option<String> {
        None
    }
}

#[derive(Debug, Clone)]
struct District {
    name: String,
    ring: Vec<Coord>,
    bounds: BoundingBox,
}

/// Point-in-polygon lookup over district outlines
#[derive(Debug, Clone, Default)]
pub struct PolygonDistrictLocator {
    districts: Vec<District>,
}

impl PolygonDistrictLocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_district(mut self, name: impl Into<String>, ring: Vec<Coord>) -> Self {
        if let Some(bounds) = BoundingBox::of(&ring) {
            self.districts.push(District {
                name: name.into(),
                ring,
                bounds,
            });
        }
        self
    }

    /// Load a GeoJSON feature collection. The district name is read from
    /// the first present property among `name_properties`.
    pub fn from_geojson_file(
        path: impl AsRef<Path>,
        name_properties: &[&str],
    ) -> Result<Self, TransformError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| TransformError::io(path, e))?;
        let doc: Value = serde_json::from_str(&content)?;
        let features = doc
            .get("features")
            .and_then(Value::as_array)
            .ok_or_else(|| TransformError::structure(path, "expected a FeatureCollection"))?;

        let mut locator = Self::new();
        for feature in features {
            let name = name_properties
                .iter()
                .find_map(|key| feature.get("properties")?.get(*key)?.as_str());
            let geometry = feature.get("geometry").and_then(Geometry::from_geojson);
            match (name, geometry) {
                (Some(name), Some(Geometry::Polygon(ring))) => {
                    locator = locator.with_district(name, ring);
                },
                _ => tracing::debug!(path = %path.display(), "Skipping district feature without name or polygon"),
            }
        }

        if locator.districts.is_empty() {
            return Err(TransformError::structure(path, "no district polygons found"));
        }
        tracing::info!(districts = locator.districts.len(), "Loaded district outlines");
        Ok(locator)
    }

    pub fn len(&self) -> usize {
        self.districts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.districts.is_empty()
    }
}

impl DistrictLocator for PolygonDistrictLocator {
    fn locate(&self, geometry: &Geometry) -> Option<String> {
        let point = geometry.centroid()?;
        self.districts
            .iter()
            .filter(|d| d.bounds.contains(point))
            .find(|d| ring_contains(&d.ring, point))
            .map(|d| d.name.clone())
    }

    fn extent(&self) -> Option<BoundingBox> {
        let corners: Vec<Coord> = self
            .districts
            .iter()
            .flat_map(|d| {
                [
                    Coord::new(d.bounds.min_lon, d.bounds.min_lat),
                    Coord::new(d.bounds.max_lon, d.bounds.max_lat),
                ]
            })
            .collect();
        BoundingBox::of(&corners)
    }
}
