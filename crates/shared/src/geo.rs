//! Minimal GeoJSON-shaped geometry model used by layer sources and markers.
//!
//! Properties are kept in a `BTreeMap` so serialization is canonical; layer
//! content hashing depends on it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Meters per degree of latitude, close enough for visual overlays.
pub const METERS_PER_DEGREE: f64 = 111_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LngLat {
    pub lng: f64,
    pub lat: f64,
}

impl LngLat {
    pub fn new(lng: f64, lat: f64) -> Self {
        Self { lng, lat }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates", rename_all = "PascalCase")]
pub enum Geometry {
    Point(LngLat),
    LineString(Vec<LngLat>),
    Polygon(Vec<Vec<LngLat>>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub geometry: Geometry,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, serde_json::Value>,
}

impl Feature {
    pub fn new(geometry: Geometry) -> Self {
        Self {
            geometry,
            properties: BTreeMap::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FeatureCollection {
    pub features: Vec<Feature>,
}

impl FeatureCollection {
    pub fn new(features: Vec<Feature>) -> Self {
        Self { features }
    }

    pub fn single(feature: Feature) -> Self {
        Self {
            features: vec![feature],
        }
    }
}

/// 36-point circle approximation around `center`, in the source's
/// meters-to-degrees convention.
pub fn circle_polygon(center: LngLat, radius_m: f64) -> Geometry {
    let degree_radius = radius_m / METERS_PER_DEGREE;
    let mut ring = Vec::with_capacity(37);
    for i in 0..=36 {
        let angle = (i as f64 / 36.0) * std::f64::consts::TAU;
        ring.push(LngLat::new(
            center.lng + degree_radius * angle.cos(),
            center.lat + degree_radius * angle.sin(),
        ));
    }
    Geometry::Polygon(vec![ring])
}

/// Axis-aligned bounding box `[min_lng, min_lat, max_lng, max_lat]` with
/// padding in degrees.
pub fn bounding_box(points: &[LngLat], padding: f64) -> Option<[f64; 4]> {
    let first = points.first()?;
    let mut bbox = [first.lng, first.lat, first.lng, first.lat];
    for p in points {
        bbox[0] = bbox[0].min(p.lng);
        bbox[1] = bbox[1].min(p.lat);
        bbox[2] = bbox[2].max(p.lng);
        bbox[3] = bbox[3].max(p.lat);
    }
    Some([
        bbox[0] - padding,
        bbox[1] - padding,
        bbox[2] + padding,
        bbox[3] + padding,
    ])
}

pub fn centroid(points: &[LngLat]) -> Option<LngLat> {
    if points.is_empty() {
        return None;
    }
    let (lng, lat) = points
        .iter()
        .fold((0.0, 0.0), |(lng, lat), p| (lng + p.lng, lat + p.lat));
    let n = points.len() as f64;
    Some(LngLat::new(lng / n, lat / n))
}
