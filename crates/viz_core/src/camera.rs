//! Camera transitions and projection mode.
//!
//! At most one transition intent is in flight per session; a newer request
//! supersedes the previous target rather than queueing behind it. Async
//! continuations (geocode responses) re-check a generation token before
//! touching the camera, so a stale response never moves the map.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};

use async_trait::async_trait;
use map_surface::CameraMove;
use shared::geo::LngLat;
use tracing::{debug, warn};

use crate::session::MapSession;

#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn geocode(&self, place: &str) -> anyhow::Result<LngLat>;
}

pub struct MissingGeocoder;

#[async_trait]
impl Geocoder for MissingGeocoder {
    async fn geocode(&self, place: &str) -> anyhow::Result<LngLat> {
        Err(anyhow::anyhow!("no geocoder configured for '{place}'"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectionMode {
    Flat2d,
    Perspective3d,
}

impl ProjectionMode {
    fn pitch(self) -> f64 {
        match self {
            ProjectionMode::Flat2d => 0.0,
            ProjectionMode::Perspective3d => 60.0,
        }
    }

    fn bearing(self) -> f64 {
        match self {
            ProjectionMode::Flat2d => 0.0,
            ProjectionMode::Perspective3d => -17.6,
        }
    }
}

/// Who holds the truth for projection state: this controller, or an
/// external signal it mirrors. Chosen once at construction, never both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectionAuthority {
    Owned,
    External,
}

pub struct CameraController {
    session: Arc<MapSession>,
    geocoder: Arc<dyn Geocoder>,
    generation: AtomicU64,
    authority: ProjectionAuthority,
    projection: Mutex<ProjectionMode>,
    current_center: Mutex<Option<LngLat>>,
}

impl CameraController {
    pub fn new(
        session: Arc<MapSession>,
        geocoder: Arc<dyn Geocoder>,
        authority: ProjectionAuthority,
    ) -> Arc<Self> {
        Arc::new(Self {
            session,
            geocoder,
            generation: AtomicU64::new(0),
            authority,
            projection: Mutex::new(ProjectionMode::Flat2d),
            current_center: Mutex::new(None),
        })
    }

    fn begin_intent(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_current(&self, token: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == token
    }

    /// Supersede any in-flight intent and move immediately.
    pub fn fly_to(&self, motion: CameraMove) {
        self.begin_intent();
        let Some(surface) = self.session.surface_if_ready() else {
            return;
        };
        if let Some(center) = motion.center {
            *self.current_center.lock().expect("camera center lock poisoned") = Some(center);
        }
        if let Err(err) = surface.move_camera(motion) {
            warn!(error = %err, "camera move rejected");
        }
    }

    /// Geocode a place name, then fly to it. If another intent starts while
    /// the lookup is in flight, the response is discarded silently.
    pub async fn fly_to_city(&self, city: &str, zoom: f64) -> anyhow::Result<Option<LngLat>> {
        let token = self.begin_intent();
        let center = self.geocoder.geocode(city).await?;
        if !self.is_current(token) {
            debug!(city, "stale geocode response discarded");
            return Ok(None);
        }
        let Some(surface) = self.session.surface_if_ready() else {
            return Ok(None);
        };
        *self.current_center.lock().expect("camera center lock poisoned") = Some(center);
        let projection = *self.projection.lock().expect("projection lock poisoned");
        let mut motion = CameraMove::fly(center, zoom);
        motion.pitch = projection.pitch();
        motion.bearing = projection.bearing();
        if let Err(err) = surface.move_camera(motion) {
            warn!(city, error = %err, "camera fly-to rejected");
        }
        Ok(Some(center))
    }

    /// Invalidate any in-flight intent; its continuation will drop.
    pub fn cancel_pending(&self) {
        self.begin_intent();
    }

    /// Toggle between the 3D preset and the flat 2D preset. Only valid when
    /// this controller owns projection state.
    pub fn set_projection(&self, mode: ProjectionMode) {
        if self.authority != ProjectionAuthority::Owned {
            warn!("projection is externally controlled, ignoring set_projection");
            return;
        }
        self.apply_projection(mode);
    }

    /// Mirror an externally controlled projection flag. Only valid when the
    /// external side holds the truth.
    pub fn sync_projection(&self, mode: ProjectionMode) {
        if self.authority != ProjectionAuthority::External {
            warn!("projection is owned by this controller, ignoring sync_projection");
            return;
        }
        self.apply_projection(mode);
    }

    fn apply_projection(&self, mode: ProjectionMode) {
        *self.projection.lock().expect("projection lock poisoned") = mode;
        let Some(surface) = self.session.surface_if_ready() else {
            return;
        };
        if let Err(err) =
            surface.move_camera(CameraMove::ease_projection(mode.pitch(), mode.bearing()))
        {
            warn!(error = %err, "projection ease rejected");
        }
    }

    pub fn projection(&self) -> ProjectionMode {
        *self.projection.lock().expect("projection lock poisoned")
    }

    pub fn current_center(&self) -> Option<LngLat> {
        *self.current_center.lock().expect("camera center lock poisoned")
    }
}

#[cfg(test)]
#[path = "tests/camera_tests.rs"]
mod tests;
