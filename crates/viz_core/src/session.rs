//! Map session lifecycle: create-on-mount, block mutation until ready,
//! destroy-on-unmount.
//!
//! The session handle is exclusively owned here; collaborators receive an
//! `Arc<MapSession>` and go through `surface_if_ready`, which drops calls
//! made outside the Ready state. Callers that need to act on readiness wait
//! on the watch channel instead of polling.

use std::sync::{Arc, RwLock};

use map_surface::{MapInit, MapSurface, MapSurfaceProvider, MissingMapSurface};
use shared::error::InitError;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{animation::AnimationScheduler, camera::CameraController, markers::MarkerPool};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Uninitialized,
    Initializing,
    Ready,
    Errored,
    Destroyed,
}

pub struct MapSession {
    id: Uuid,
    surface: RwLock<Arc<dyn MapSurface>>,
    status: RwLock<SessionStatus>,
    ready: watch::Sender<bool>,
}

impl MapSession {
    fn new() -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            id: Uuid::new_v4(),
            surface: RwLock::new(Arc::new(MissingMapSurface)),
            status: RwLock::new(SessionStatus::Uninitialized),
            ready,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.read().expect("session status lock poisoned")
    }

    pub fn is_ready(&self) -> bool {
        self.status() == SessionStatus::Ready
    }

    /// Capability to mutate the map, or `None` when the session is not
    /// Ready. Callers drop the operation and may re-issue it after the
    /// ready notification fires.
    pub fn surface_if_ready(&self) -> Option<Arc<dyn MapSurface>> {
        if self.is_ready() {
            Some(self.surface.read().expect("session surface lock poisoned").clone())
        } else {
            debug!(session = %self.id, status = ?self.status(), "map mutation dropped, session not ready");
            None
        }
    }

    pub fn ready_signal(&self) -> watch::Receiver<bool> {
        self.ready.subscribe()
    }

    fn set_status(&self, status: SessionStatus) {
        *self.status.write().expect("session status lock poisoned") = status;
        let _ = self.ready.send(status == SessionStatus::Ready);
    }
}

/// Owns the single map session per view. `open` fails with `InitError` if
/// the rendering surface cannot be created; `close` is idempotent and
/// signals dependent components to cancel their timers before the
/// underlying handle is released.
pub struct SessionLifecycle {
    provider: Arc<dyn MapSurfaceProvider>,
    current: Mutex<Option<Arc<MapSession>>>,
}

impl SessionLifecycle {
    pub fn new(provider: Arc<dyn MapSurfaceProvider>) -> Self {
        Self {
            provider,
            current: Mutex::new(None),
        }
    }

    pub async fn open(&self, init: MapInit) -> Result<Arc<MapSession>, InitError> {
        if init.access_token.is_empty() {
            return Err(InitError::new("missing rendering access token"));
        }

        let session = Arc::new(MapSession::new());
        session.set_status(SessionStatus::Initializing);

        match self.provider.create_surface(&init).await {
            Ok(surface) => {
                *session.surface.write().expect("session surface lock poisoned") = surface;
                session.set_status(SessionStatus::Ready);
                info!(session = %session.id, "map session ready");
            }
            Err(err) => {
                session.set_status(SessionStatus::Errored);
                warn!(session = %session.id, error = %err, "map surface creation failed");
                return Err(InitError::new(err.to_string()));
            }
        }

        let mut guard = self.current.lock().await;
        *guard = Some(Arc::clone(&session));
        Ok(session)
    }

    /// Tear down in dependency order: timers first, then the handle. Safe
    /// to call twice; the second call finds no live session.
    pub async fn close(
        &self,
        animations: &AnimationScheduler,
        markers: &MarkerPool,
        camera: &CameraController,
    ) {
        let session = { self.current.lock().await.take() };
        let Some(session) = session else {
            return;
        };
        if session.status() == SessionStatus::Destroyed {
            return;
        }

        animations.cancel_all().await;
        markers.clear().await;
        camera.cancel_pending();

        let surface = session.surface.read().expect("session surface lock poisoned").clone();
        session.set_status(SessionStatus::Destroyed);
        surface.destroy();
        info!(session = %session.id, "map session destroyed");
    }
}
