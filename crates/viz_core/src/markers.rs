//! Transient point markers with auto-popup timers.
//!
//! Every scheduled timer is owned by exactly one marker entry; removal
//! cancels pending timers before the visual is detached, so no timer can
//! fire against a marker that is already gone.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use map_surface::MarkerVisual;
use shared::{
    domain::{AnimationId, MarkerId},
    geo::LngLat,
};
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{debug, warn};

use crate::session::MapSession;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PopupSchedule {
    pub open_after: Duration,
    pub close_after: Duration,
}

/// Where a marker came from; bulk clears select on this (e.g. retiring all
/// markers of the previous simulation result before adding new ones).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerOrigin {
    Command,
    Simulation,
}

#[derive(Debug, Clone)]
pub struct MarkerSpec {
    pub position: LngLat,
    pub label: String,
    pub color: String,
    pub origin: MarkerOrigin,
    pub popup: Option<PopupSchedule>,
    pub owning_animation: Option<AnimationId>,
}

struct MarkerEntry {
    origin: MarkerOrigin,
    owning_animation: Option<AnimationId>,
    open_timer: Option<JoinHandle<()>>,
    close_timer: Option<JoinHandle<()>>,
}

impl MarkerEntry {
    fn cancel_timers(&mut self) {
        if let Some(timer) = self.open_timer.take() {
            timer.abort();
        }
        if let Some(timer) = self.close_timer.take() {
            timer.abort();
        }
    }

    fn pending_timers(&self) -> usize {
        usize::from(self.open_timer.as_ref().is_some_and(|t| !t.is_finished()))
            + usize::from(self.close_timer.as_ref().is_some_and(|t| !t.is_finished()))
    }
}

pub struct MarkerPool {
    session: Arc<MapSession>,
    inner: Mutex<HashMap<MarkerId, MarkerEntry>>,
    next_id: AtomicU64,
}

impl MarkerPool {
    pub fn new(session: Arc<MapSession>) -> Arc<Self> {
        Arc::new(Self {
            session,
            inner: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        })
    }

    /// Place a marker and schedule its popup timers. Returns `None` when the
    /// session is not ready (the call is dropped) or the surface rejects the
    /// visual (logged and skipped).
    pub async fn place(self: &Arc<Self>, spec: MarkerSpec) -> Option<MarkerId> {
        let surface = self.session.surface_if_ready()?;
        let id = MarkerId(self.next_id.fetch_add(1, Ordering::Relaxed));

        if let Err(err) = surface.place_marker(MarkerVisual {
            id,
            position: spec.position,
            label: spec.label.clone(),
            color: spec.color.clone(),
        }) {
            warn!(marker = id.0, error = %err, "marker placement failed, skipping");
            return None;
        }

        let mut entry = MarkerEntry {
            origin: spec.origin,
            owning_animation: spec.owning_animation,
            open_timer: None,
            close_timer: None,
        };

        if let Some(popup) = spec.popup {
            let pool = Arc::clone(self);
            entry.open_timer = Some(tokio::spawn(async move {
                tokio::time::sleep(popup.open_after).await;
                pool.set_popup(id, true).await;
            }));
            let pool = Arc::clone(self);
            entry.close_timer = Some(tokio::spawn(async move {
                tokio::time::sleep(popup.open_after + popup.close_after).await;
                pool.set_popup(id, false).await;
            }));
        }

        self.inner.lock().await.insert(id, entry);
        Some(id)
    }

    /// Popup timer body. Re-checks the marker is still live before touching
    /// the surface; a timer racing a removal is a no-op.
    async fn set_popup(&self, id: MarkerId, visible: bool) {
        let inner = self.inner.lock().await;
        if !inner.contains_key(&id) {
            return;
        }
        let Some(surface) = self.session.surface_if_ready() else {
            return;
        };
        if let Err(err) = surface.set_popup_visible(id, visible) {
            warn!(marker = id.0, error = %err, "popup toggle failed");
        }
    }

    /// Cancel timers, detach the visual, drop the handle — in that order.
    pub async fn remove(&self, id: MarkerId) {
        let entry = { self.inner.lock().await.remove(&id) };
        let Some(mut entry) = entry else {
            return;
        };
        entry.cancel_timers();
        if let Some(surface) = self.session.surface_if_ready() {
            if let Err(err) = surface.remove_marker(id) {
                warn!(marker = id.0, error = %err, "marker removal failed");
            }
        }
    }

    /// Remove every marker matching `predicate`. Synchronous with respect to
    /// the caller: when this returns, no matched marker is visible and none
    /// of their timers remain, even if close timers had not yet elapsed.
    pub async fn remove_where<F>(&self, predicate: F)
    where
        F: Fn(MarkerOrigin, Option<AnimationId>) -> bool,
    {
        let removed: Vec<(MarkerId, MarkerEntry)> = {
            let mut inner = self.inner.lock().await;
            let ids: Vec<MarkerId> = inner
                .iter()
                .filter(|(_, e)| predicate(e.origin, e.owning_animation))
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| inner.remove(&id).map(|e| (id, e)))
                .collect()
        };

        let surface = self.session.surface_if_ready();
        for (id, mut entry) in removed {
            entry.cancel_timers();
            if let Some(surface) = &surface {
                if let Err(err) = surface.remove_marker(id) {
                    warn!(marker = id.0, error = %err, "marker removal failed");
                }
            }
        }
    }

    /// Link a marker's lifetime to an animation; the marker is retired when
    /// that animation reaches its terminal bound.
    pub async fn assign_owner(&self, id: MarkerId, animation: AnimationId) {
        if let Some(entry) = self.inner.lock().await.get_mut(&id) {
            entry.owning_animation = Some(animation);
        }
    }

    pub async fn remove_owned_by(&self, animation: AnimationId) {
        self.remove_where(|_, owner| owner == Some(animation)).await;
    }

    pub async fn clear(&self) {
        debug!("clearing marker pool");
        self.remove_where(|_, _| true).await;
    }

    pub async fn live_count(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn pending_timer_count(&self) -> usize {
        self.inner
            .lock()
            .await
            .values()
            .map(MarkerEntry::pending_timers)
            .sum()
    }
}

#[cfg(test)]
#[path = "tests/markers_tests.rs"]
mod tests;
