//! Capability surface over the rendering library.
//!
//! The engine depends only on this set of operations (sources, layers, paint
//! properties, markers, camera motion), never on a specific library's full
//! API. Implementations are expected to be cheap, synchronous calls into the
//! renderer; surface creation is the only async step.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shared::{
    domain::{LayerId, MarkerId},
    geo::{FeatureCollection, LngLat},
};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("surface rejected {operation} on {target}: {message}")]
pub struct SurfaceError {
    pub operation: &'static str,
    pub target: String,
    pub message: String,
}

impl SurfaceError {
    pub fn new(
        operation: &'static str,
        target: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            operation,
            target: target.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    Heatmap,
    Extrusion,
    Line,
    Circle,
}

/// Paint parameters for a layer. Only the fields relevant to the layer kind
/// are set; serialization order is stable so descriptors hash canonically.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PaintStyle {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opacity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub radius_px: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extrusion_height_m: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_width_px: Option<f64>,
}

/// A single paint mutation applied outside full reconciliation, e.g. by a
/// running animation tick.
#[derive(Debug, Clone, PartialEq)]
pub enum PaintProperty {
    Opacity(f64),
    ExtrusionHeight(f64),
    Color(String),
    Radius(f64),
}

impl PaintProperty {
    pub fn name(&self) -> &'static str {
        match self {
            PaintProperty::Opacity(_) => "opacity",
            PaintProperty::ExtrusionHeight(_) => "extrusion_height",
            PaintProperty::Color(_) => "color",
            PaintProperty::Radius(_) => "radius",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceSpec {
    pub id: String,
    pub data: FeatureCollection,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayerSpec {
    pub id: LayerId,
    pub kind: LayerKind,
    pub source: String,
    pub paint: PaintStyle,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarkerVisual {
    pub id: MarkerId,
    pub position: LngLat,
    pub label: String,
    pub color: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionKind {
    Fly,
    Ease,
    Jump,
}

/// Camera transition request. `center`/`zoom` are left `None` for
/// pitch/bearing-only eases (projection toggles).
#[derive(Debug, Clone, PartialEq)]
pub struct CameraMove {
    pub center: Option<LngLat>,
    pub zoom: Option<f64>,
    pub pitch: f64,
    pub bearing: f64,
    pub duration_ms: u64,
    pub motion: MotionKind,
}

impl CameraMove {
    pub fn fly(center: LngLat, zoom: f64) -> Self {
        Self {
            center: Some(center),
            zoom: Some(zoom),
            pitch: 0.0,
            bearing: 0.0,
            duration_ms: 2000,
            motion: MotionKind::Fly,
        }
    }

    pub fn ease_projection(pitch: f64, bearing: f64) -> Self {
        Self {
            center: None,
            zoom: None,
            pitch,
            bearing,
            duration_ms: 1200,
            motion: MotionKind::Ease,
        }
    }
}

/// Initial view state handed to the surface provider on session open.
#[derive(Debug, Clone, PartialEq)]
pub struct MapInit {
    pub access_token: String,
    pub center: LngLat,
    pub zoom: f64,
    pub pitch: f64,
    pub bearing: f64,
}

pub trait MapSurface: Send + Sync {
    fn add_source(&self, source: SourceSpec) -> Result<(), SurfaceError>;
    fn remove_source(&self, id: &str) -> Result<(), SurfaceError>;
    fn add_layer(&self, layer: LayerSpec) -> Result<(), SurfaceError>;
    fn remove_layer(&self, id: &LayerId) -> Result<(), SurfaceError>;
    fn set_paint_property(&self, id: &LayerId, property: PaintProperty)
        -> Result<(), SurfaceError>;
    fn place_marker(&self, marker: MarkerVisual) -> Result<(), SurfaceError>;
    fn remove_marker(&self, id: MarkerId) -> Result<(), SurfaceError>;
    fn set_popup_visible(&self, id: MarkerId, visible: bool) -> Result<(), SurfaceError>;
    fn move_camera(&self, motion: CameraMove) -> Result<(), SurfaceError>;
    fn destroy(&self);
}

#[async_trait]
pub trait MapSurfaceProvider: Send + Sync {
    /// Resolves once the surface is ready for mutation, or fails if the
    /// rendering surface cannot be created.
    async fn create_surface(&self, init: &MapInit) -> anyhow::Result<Arc<dyn MapSurface>>;
}

/// Null surface that fails every call. Stands in wherever no renderer has
/// been wired up yet.
pub struct MissingMapSurface;

impl MapSurface for MissingMapSurface {
    fn add_source(&self, source: SourceSpec) -> Result<(), SurfaceError> {
        Err(SurfaceError::new("add_source", source.id, "no surface attached"))
    }

    fn remove_source(&self, id: &str) -> Result<(), SurfaceError> {
        Err(SurfaceError::new("remove_source", id, "no surface attached"))
    }

    fn add_layer(&self, layer: LayerSpec) -> Result<(), SurfaceError> {
        Err(SurfaceError::new("add_layer", layer.id.0, "no surface attached"))
    }

    fn remove_layer(&self, id: &LayerId) -> Result<(), SurfaceError> {
        Err(SurfaceError::new("remove_layer", id.as_str(), "no surface attached"))
    }

    fn set_paint_property(
        &self,
        id: &LayerId,
        _property: PaintProperty,
    ) -> Result<(), SurfaceError> {
        Err(SurfaceError::new("set_paint_property", id.as_str(), "no surface attached"))
    }

    fn place_marker(&self, marker: MarkerVisual) -> Result<(), SurfaceError> {
        Err(SurfaceError::new(
            "place_marker",
            marker.id.0.to_string(),
            "no surface attached",
        ))
    }

    fn remove_marker(&self, id: MarkerId) -> Result<(), SurfaceError> {
        Err(SurfaceError::new("remove_marker", id.0.to_string(), "no surface attached"))
    }

    fn set_popup_visible(&self, id: MarkerId, _visible: bool) -> Result<(), SurfaceError> {
        Err(SurfaceError::new(
            "set_popup_visible",
            id.0.to_string(),
            "no surface attached",
        ))
    }

    fn move_camera(&self, _motion: CameraMove) -> Result<(), SurfaceError> {
        Err(SurfaceError::new("move_camera", "camera", "no surface attached"))
    }

    fn destroy(&self) {}
}
