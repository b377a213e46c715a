//! Shared test doubles: a recording map surface, a fixed provider, and a
//! scripted geocoder.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use map_surface::{
    CameraMove, LayerSpec, MapInit, MapSurface, MapSurfaceProvider, MarkerVisual, PaintProperty,
    SourceSpec, SurfaceError,
};
use shared::{
    domain::{LayerId, MarkerId},
    geo::LngLat,
};

use crate::camera::Geocoder;

/// One recorded surface mutation, in call order.
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceOp {
    AddSource(String),
    RemoveSource(String),
    AddLayer(String),
    RemoveLayer(String),
    SetPaint(String, String),
    PlaceMarker(MarkerId),
    RemoveMarker(MarkerId),
    SetPopup(MarkerId, bool),
    MoveCamera(Option<LngLat>),
    Destroy,
}

#[derive(Default)]
struct RecordingState {
    ops: Vec<SurfaceOp>,
    sources: Vec<String>,
    layers: Vec<String>,
    markers: Vec<MarkerId>,
    popups: HashMap<MarkerId, bool>,
    last_paint: HashMap<(String, String), f64>,
    fail_ops: Vec<&'static str>,
    destroyed: bool,
}

/// A `MapSurface` that records every call and can be told to fail specific
/// operations by name.
#[derive(Default)]
pub struct RecordingSurface {
    state: Mutex<RecordingState>,
}

impl RecordingSurface {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_next(&self, operation: &'static str) {
        self.state.lock().unwrap().fail_ops.push(operation);
    }

    fn check_fail(&self, operation: &'static str, target: &str) -> Result<(), SurfaceError> {
        let mut state = self.state.lock().unwrap();
        if let Some(pos) = state.fail_ops.iter().position(|op| *op == operation) {
            state.fail_ops.remove(pos);
            return Err(SurfaceError::new(operation, target, "injected failure"));
        }
        Ok(())
    }

    fn record(&self, op: SurfaceOp) {
        self.state.lock().unwrap().ops.push(op);
    }

    pub fn ops(&self) -> Vec<SurfaceOp> {
        self.state.lock().unwrap().ops.clone()
    }

    pub fn op_count(&self) -> usize {
        self.state.lock().unwrap().ops.len()
    }

    pub fn live_sources(&self) -> Vec<String> {
        self.state.lock().unwrap().sources.clone()
    }

    pub fn live_layers(&self) -> Vec<String> {
        self.state.lock().unwrap().layers.clone()
    }

    pub fn live_markers(&self) -> Vec<MarkerId> {
        self.state.lock().unwrap().markers.clone()
    }

    pub fn popup_visible(&self, id: MarkerId) -> Option<bool> {
        self.state.lock().unwrap().popups.get(&id).copied()
    }

    pub fn paint_value(&self, layer: &LayerId, property: &str) -> Option<f64> {
        self.state
            .lock()
            .unwrap()
            .last_paint
            .get(&(layer.to_string(), property.to_string()))
            .copied()
    }

    pub fn destroyed(&self) -> bool {
        self.state.lock().unwrap().destroyed
    }
}

impl MapSurface for RecordingSurface {
    fn add_source(&self, source: SourceSpec) -> Result<(), SurfaceError> {
        self.check_fail("add_source", &source.id)?;
        let mut state = self.state.lock().unwrap();
        state.ops.push(SurfaceOp::AddSource(source.id.clone()));
        state.sources.push(source.id);
        Ok(())
    }

    fn remove_source(&self, id: &str) -> Result<(), SurfaceError> {
        self.check_fail("remove_source", id)?;
        let mut state = self.state.lock().unwrap();
        state.ops.push(SurfaceOp::RemoveSource(id.to_string()));
        state.sources.retain(|s| s != id);
        Ok(())
    }

    fn add_layer(&self, layer: LayerSpec) -> Result<(), SurfaceError> {
        self.check_fail("add_layer", layer.id.as_str())?;
        let mut state = self.state.lock().unwrap();
        state.ops.push(SurfaceOp::AddLayer(layer.id.to_string()));
        state.layers.push(layer.id.to_string());
        Ok(())
    }

    fn remove_layer(&self, id: &LayerId) -> Result<(), SurfaceError> {
        self.check_fail("remove_layer", id.as_str())?;
        let mut state = self.state.lock().unwrap();
        state.ops.push(SurfaceOp::RemoveLayer(id.to_string()));
        let name = id.to_string();
        state.layers.retain(|l| *l != name);
        Ok(())
    }

    fn set_paint_property(&self, id: &LayerId, property: PaintProperty) -> Result<(), SurfaceError> {
        self.check_fail("set_paint_property", id.as_str())?;
        let mut state = self.state.lock().unwrap();
        state
            .ops
            .push(SurfaceOp::SetPaint(id.to_string(), property.name().to_string()));
        let value = match property {
            PaintProperty::Opacity(v)
            | PaintProperty::ExtrusionHeight(v)
            | PaintProperty::Radius(v) => v,
            PaintProperty::Color(_) => 0.0,
        };
        state
            .last_paint
            .insert((id.to_string(), property.name().to_string()), value);
        Ok(())
    }

    fn place_marker(&self, marker: MarkerVisual) -> Result<(), SurfaceError> {
        self.check_fail("place_marker", &marker.label)?;
        let mut state = self.state.lock().unwrap();
        state.ops.push(SurfaceOp::PlaceMarker(marker.id));
        state.markers.push(marker.id);
        Ok(())
    }

    fn remove_marker(&self, id: MarkerId) -> Result<(), SurfaceError> {
        self.check_fail("remove_marker", "marker")?;
        let mut state = self.state.lock().unwrap();
        state.ops.push(SurfaceOp::RemoveMarker(id));
        state.markers.retain(|m| *m != id);
        state.popups.remove(&id);
        Ok(())
    }

    fn set_popup_visible(&self, id: MarkerId, visible: bool) -> Result<(), SurfaceError> {
        self.check_fail("set_popup_visible", "marker")?;
        let mut state = self.state.lock().unwrap();
        state.ops.push(SurfaceOp::SetPopup(id, visible));
        state.popups.insert(id, visible);
        Ok(())
    }

    fn move_camera(&self, motion: CameraMove) -> Result<(), SurfaceError> {
        self.check_fail("move_camera", "camera")?;
        self.record(SurfaceOp::MoveCamera(motion.center));
        Ok(())
    }

    fn destroy(&self) {
        let mut state = self.state.lock().unwrap();
        state.ops.push(SurfaceOp::Destroy);
        state.destroyed = true;
    }
}

/// Provider that hands out one fixed surface, or fails when given none.
pub struct FixedSurfaceProvider {
    surface: Option<Arc<RecordingSurface>>,
}

impl FixedSurfaceProvider {
    pub fn new(surface: Arc<RecordingSurface>) -> Arc<Self> {
        Arc::new(Self {
            surface: Some(surface),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self { surface: None })
    }
}

#[async_trait]
impl MapSurfaceProvider for FixedSurfaceProvider {
    async fn create_surface(&self, _init: &MapInit) -> anyhow::Result<Arc<dyn MapSurface>> {
        match &self.surface {
            Some(surface) => Ok(Arc::clone(surface) as Arc<dyn MapSurface>),
            None => Err(anyhow::anyhow!("renderer unavailable")),
        }
    }
}

/// Geocoder returning a fixed point per known place, optionally after a
/// delay so tests can race it against newer intents.
pub struct FixedGeocoder {
    places: HashMap<String, LngLat>,
    delay: Option<Duration>,
}

impl FixedGeocoder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            places: Self::places(),
            delay: None,
        })
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            places: Self::places(),
            delay: Some(delay),
        })
    }

    fn places() -> HashMap<String, LngLat> {
        let mut places = HashMap::new();
        places.insert("San Francisco".to_string(), LngLat::new(-122.4194, 37.7749));
        places.insert("Oakland".to_string(), LngLat::new(-122.2712, 37.8044));
        places.insert("downtown".to_string(), LngLat::new(-122.4, 37.79));
        places
    }
}

#[async_trait]
impl Geocoder for FixedGeocoder {
    async fn geocode(&self, place: &str) -> anyhow::Result<LngLat> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.places
            .get(place)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("unknown place '{place}'"))
    }
}

/// Advance the paused test clock and let woken timer tasks run.
///
/// `tokio::time::advance` only wakes timers; it does not run the woken
/// ticker/popup tasks before returning, so assertions right after a bare
/// `advance` observe state one tick stale. The leading yield lets tasks
/// spawned since the last settle poll once and anchor their timers before
/// the clock moves; the trailing yield lets tasks woken by the advance run
/// before the test asserts.
pub async fn advance_and_settle(duration: Duration) {
    tokio::task::yield_now().await;
    tokio::time::advance(duration).await;
    tokio::task::yield_now().await;
}

/// Ready-to-use session backed by a recording surface.
pub async fn ready_session() -> (Arc<crate::session::MapSession>, Arc<RecordingSurface>) {
    let surface = RecordingSurface::new();
    let lifecycle = crate::session::SessionLifecycle::new(FixedSurfaceProvider::new(Arc::clone(
        &surface,
    )));
    let session = lifecycle
        .open(MapInit {
            access_token: "test-token".into(),
            center: LngLat::new(-122.4194, 37.7749),
            zoom: 13.0,
            pitch: 0.0,
            bearing: 0.0,
        })
        .await
        .expect("session opens");
    (session, surface)
}
