//! Minimal WGS84 geometry support
//!
//! Rows only ever carry points or simple polygons (outer ring only, Z values
//! dropped). Geometries are persisted as WKT and handed to PostGIS with
//! SRID 4326.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Mean earth radius used for kilometre conversions
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Longitude/latitude pair in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coord {
    pub lon: f64,
    pub lat: f64,
}

impl Coord {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }

    pub fn is_valid(&self) -> bool {
        self.lon.is_finite()
            && self.lat.is_finite()
            && (-180.0..=180.0).contains(&self.lon)
            && (-90.0..=90.0).contains(&self.lat)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Geometry {
    Point(Coord),
    /// Closed outer ring; first and last coordinate may or may not repeat
    Polygon(Vec<Coord>),
}

impl Geometry {
    pub fn point(lon: f64, lat: f64) -> Self {
        Geometry::Point(Coord::new(lon, lat))
    }

    /// Parse a GeoJSON geometry object.
    ///
    /// Points and polygons are supported; for multipolygons the first
    /// polygon is used. Returns `None` for anything else.
    pub fn from_geojson(value: &Value) -> Option<Self> {
        let coords = value.get("coordinates")?;
        match value.get("type")?.as_str()? {
            "Point" => coord_from_json(coords).map(Geometry::Point),
            "Polygon" => ring_from_json(coords.get(0)?).map(Geometry::Polygon),
            "MultiPolygon" => ring_from_json(coords.get(0)?.get(0)?).map(Geometry::Polygon),
            _ => None,
        }
    }

    /// Well-known text, e.g. `POINT(7.7 49.4)`
    pub fn to_wkt(&self) -> String {
        match self {
            Geometry::Point(c) => format!("POINT({} {})", c.lon, c.lat),
            Geometry::Polygon(ring) => {
                let mut parts: Vec<String> =
                    ring.iter().map(|c| format!("{} {}", c.lon, c.lat)).collect();
                if let (Some(first), Some(last)) = (ring.first(), ring.last()) {
                    if first != last {
                        parts.push(format!("{} {}", first.lon, first.lat));
                    }
                }
                format!("POLYGON(({}))", parts.join(", "))
            },
        }
    }

    /// Representative point: the point itself, or the vertex mean of a ring.
    pub fn centroid(&self) -> Option<Coord> {
        match self {
            Geometry::Point(c) => Some(*c),
            Geometry::Polygon(ring) if !ring.is_empty() => {
                let n = ring.len() as f64;
                let (lon, lat) = ring
                    .iter()
                    .fold((0.0, 0.0), |(x, y), c| (x + c.lon, y + c.lat));
                Some(Coord::new(lon / n, lat / n))
            },
            Geometry::Polygon(_) => None,
        }
    }

    pub fn bounds(&self) -> Option<BoundingBox> {
        match self {
            Geometry::Point(c) => Some(BoundingBox::around(*c)),
            Geometry::Polygon(ring) => BoundingBox::of(ring),
        }
    }
}

fn coord_from_json(value: &Value) -> Option<Coord> {
    let lon = value.get(0)?.as_f64()?;
    let lat = value.get(1)?.as_f64()?;
    Some(Coord::new(lon, lat))
}

fn ring_from_json(value: &Value) -> Option<Vec<Coord>> {
    let ring: Option<Vec<Coord>> = value.as_array()?.iter().map(coord_from_json).collect();
    ring.filter(|r| r.len() >= 3)
}

/// Ray casting point-in-polygon test against an outer ring.
pub fn ring_contains(ring: &[Coord], p: Coord) -> bool {
    let mut inside = false;
    let n = ring.len();
    if n < 3 {
        return false;
    }
    let mut j = n - 1;
    for i in 0..n {
        let (a, b) = (ring[i], ring[j]);
        if (a.lat > p.lat) != (b.lat > p.lat)
            && p.lon < (b.lon - a.lon) * (p.lat - a.lat) / (b.lat - a.lat) + a.lon
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Axis-aligned lon/lat rectangle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        Self {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        }
    }

    fn around(c: Coord) -> Self {
        Self::new(c.lon, c.lat, c.lon, c.lat)
    }

    pub fn of(coords: &[Coord]) -> Option<Self> {
        let first = coords.first()?;
        Some(coords.iter().skip(1).fold(Self::around(*first), |b, c| {
            Self::new(
                b.min_lon.min(c.lon),
                b.min_lat.min(c.lat),
                b.max_lon.max(c.lon),
                b.max_lat.max(c.lat),
            )
        }))
    }

    /// Grow the box by `km` in every direction.
    pub fn buffered(&self, km: f64) -> Self {
        let dlat = (km / EARTH_RADIUS_KM).to_degrees();
        let mid_lat = ((self.min_lat + self.max_lat) / 2.0).to_radians();
        let dlon = dlat / mid_lat.cos().max(1e-6);
        Self::new(
            self.min_lon - dlon,
            self.min_lat - dlat,
            self.max_lon + dlon,
            self.max_lat + dlat,
        )
    }

    pub fn contains(&self, c: Coord) -> bool {
        (self.min_lon..=self.max_lon).contains(&c.lon)
            && (self.min_lat..=self.max_lat).contains(&c.lat)
    }

    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_lon <= other.max_lon
            && other.min_lon <= self.max_lon
            && self.min_lat <= other.max_lat
            && other.min_lat <= self.max_lat
    }
}

impl std::str::FromStr for BoundingBox {
    type Err = String;

    /// `min_lon,min_lat,max_lon,max_lat`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<f64> = s
            .split(',')
            .map(|p| p.trim().parse::<f64>().map_err(|e| e.to_string()))
            .collect::<Result<_, _>>()?;
        match parts.as_slice() {
            [a, b, c, d] if a <= c && b <= d => Ok(Self::new(*a, *b, *c, *d)),
            _ => Err(format!("expected min_lon,min_lat,max_lon,max_lat, got {s:?}")),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn square() -> Vec<Coord> {
        vec![
            Coord::new(7.0, 49.0),
            Coord::new(8.0, 49.0),
            Coord::new(8.0, 50.0),
            Coord::new(7.0, 50.0),
        ]
    }

    #[test]
    fn test_point_wkt() {
        assert_eq!(Geometry::point(7.7, 49.4).to_wkt(), "POINT(7.7 49.4)");
    }

    #[test]
    fn test_polygon_wkt_is_closed() {
        let wkt = Geometry::Polygon(square()).to_wkt();
        assert!(wkt.starts_with("POLYGON((7 49, 8 49"));
        assert!(wkt.ends_with("7 50, 7 49))"));
    }

    #[test]
    fn test_from_geojson_drops_z() {
        let geom = Geometry::from_geojson(&json!({
            "type": "Polygon",
            "coordinates": [[[7.0, 49.0, 250.0], [8.0, 49.0, 251.0], [8.0, 50.0, 0.0], [7.0, 49.0, 0.0]]]
        }))
        .unwrap();
        match geom {
            Geometry::Polygon(ring) => assert_eq!(ring[0], Coord::new(7.0, 49.0)),
            other => panic!("unexpected {other:?}"),
        }
        assert!(Geometry::from_geojson(&json!({"type": "LineString", "coordinates": []})).is_none());
    }

    #[test]
    fn test_ring_contains() {
        assert!(ring_contains(&square(), Coord::new(7.5, 49.5)));
        assert!(!ring_contains(&square(), Coord::new(8.5, 49.5)));
    }

    #[test]
    fn test_buffered_box() {
        let bbox = BoundingBox::new(7.7, 49.4, 7.8, 49.5).buffered(4.0);
        assert!(bbox.contains(Coord::new(7.66, 49.45)));
        assert!(!bbox.contains(Coord::new(7.5, 49.45)));
    }

    #[test]
    fn test_bbox_from_str() {
        let bbox: BoundingBox = "7.6,49.3,7.9,49.5".parse().unwrap();
        assert_eq!(bbox.max_lat, 49.5);
        assert!("7.9,49.3,7.6,49.5".parse::<BoundingBox>().is_err());
    }
}
