//! Timed visual sequences as cancelable state machines.
//!
//! Each animation owns exactly one ticker task. Paint values are a pure
//! function of `progress`, recomputed every tick, so a cancel-and-restart
//! against the same target can never interleave stale accumulated state.
//! The terminal transition fires its follow-up signal exactly once;
//! cancel-after-complete is a no-op.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use map_surface::PaintProperty;
use shared::domain::{AnimationId, LayerId};
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
};
use tracing::{debug, warn};

use crate::session::MapSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Running,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnimationKind {
    /// Fade an extrusion's opacity and height toward zero.
    Demolition,
    /// Fade an overlay layer out and retire it.
    RippleFade,
}

/// Deferred work to run when an animation reaches its terminal bound. Routed
/// through the orchestrator's input queue so all map mutation stays on one
/// logical thread.
#[derive(Debug, Clone, PartialEq)]
pub enum FollowUp {
    RetireLayers(Vec<LayerId>),
}

#[derive(Debug, Clone)]
pub struct AnimationSpec {
    pub kind: AnimationKind,
    pub target_layers: Vec<LayerId>,
    pub step_percent: u8,
    pub interval: Duration,
    /// Starting extrusion height for demolition height scaling.
    pub base_extrusion_height_m: Option<f64>,
    pub follow_up: Option<FollowUp>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnimationSignal {
    pub id: AnimationId,
    pub follow_up: Option<FollowUp>,
}

struct AnimationEntry {
    kind: AnimationKind,
    targets: Vec<LayerId>,
    step_percent: u8,
    base_extrusion_height_m: Option<f64>,
    progress: u8,
    phase: Phase,
    ticker: Option<JoinHandle<()>>,
    follow_up: Option<FollowUp>,
}

enum StepOutcome {
    Continue,
    Terminal,
    Gone,
}

pub struct AnimationScheduler {
    session: Arc<MapSession>,
    inner: Mutex<HashMap<AnimationId, AnimationEntry>>,
    next_id: AtomicU64,
    signals: mpsc::UnboundedSender<AnimationSignal>,
}

impl AnimationScheduler {
    pub fn new(
        session: Arc<MapSession>,
        signals: mpsc::UnboundedSender<AnimationSignal>,
    ) -> Arc<Self> {
        Arc::new(Self {
            session,
            inner: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            signals,
        })
    }

    /// Start an animation. Any Running animation sharing a target layer is
    /// cancelled first, and its ticker is aborted before the new one is
    /// spawned, so two timers can never mutate the same paint property out
    /// of order.
    pub async fn start(self: &Arc<Self>, spec: AnimationSpec) -> AnimationId {
        let id = AnimationId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let interval = spec.interval;

        let mut inner = self.inner.lock().await;
        // Entries that went terminal before this call have been observed by
        // now; sweep them so the map only holds live work.
        inner.retain(|_, entry| entry.phase == Phase::Running);
        for (prior_id, entry) in inner.iter_mut() {
            if entry.phase == Phase::Running
                && entry.targets.iter().any(|t| spec.target_layers.contains(t))
            {
                debug!(prior = prior_id.0, new = id.0, "restart cancels prior animation");
                if let Some(ticker) = entry.ticker.take() {
                    ticker.abort();
                }
                entry.phase = Phase::Cancelled;
                entry.follow_up = None;
            }
        }

        let step_percent = spec.step_percent.clamp(1, 100);
        let scheduler = Arc::clone(self);
        let ticker = tokio::spawn(async move {
            let mut ticks = tokio::time::interval(interval);
            // The first interval tick resolves immediately; consume it so
            // the first step lands one full interval after start.
            ticks.tick().await;
            loop {
                ticks.tick().await;
                match scheduler.step(id).await {
                    StepOutcome::Continue => {}
                    StepOutcome::Terminal | StepOutcome::Gone => break,
                }
            }
        });

        inner.insert(
            id,
            AnimationEntry {
                kind: spec.kind,
                targets: spec.target_layers,
                step_percent,
                base_extrusion_height_m: spec.base_extrusion_height_m,
                progress: 0,
                phase: Phase::Running,
                ticker: Some(ticker),
                follow_up: spec.follow_up,
            },
        );
        id
    }

    async fn step(&self, id: AnimationId) -> StepOutcome {
        let mut inner = self.inner.lock().await;
        let Some(entry) = inner.get_mut(&id) else {
            return StepOutcome::Gone;
        };
        if entry.phase != Phase::Running {
            return StepOutcome::Gone;
        }

        entry.progress = entry.progress.saturating_add(entry.step_percent).min(100);
        let progress = entry.progress;

        if let Some(surface) = self.session.surface_if_ready() {
            for target in &entry.targets {
                for property in paint_for_progress(
                    entry.kind,
                    progress,
                    entry.base_extrusion_height_m,
                ) {
                    if let Err(err) = surface.set_paint_property(target, property) {
                        warn!(animation = id.0, layer = %target, error = %err, "paint step failed");
                    }
                }
            }
        }

        if progress >= 100 {
            entry.phase = Phase::Completed;
            entry.ticker = None;
            let follow_up = entry.follow_up.take();
            drop(inner);
            let _ = self.signals.send(AnimationSignal { id, follow_up });
            return StepOutcome::Terminal;
        }
        StepOutcome::Continue
    }

    /// Running → Cancelled: abort the ticker, never fire the follow-up.
    /// Cancelling an animation that already completed is a no-op.
    pub async fn cancel(&self, id: AnimationId) {
        let mut inner = self.inner.lock().await;
        if let Some(entry) = inner.get_mut(&id) {
            if entry.phase == Phase::Running {
                if let Some(ticker) = entry.ticker.take() {
                    ticker.abort();
                }
                entry.phase = Phase::Cancelled;
                entry.follow_up = None;
            }
        }
    }

    pub async fn cancel_all(&self) {
        let mut inner = self.inner.lock().await;
        for entry in inner.values_mut() {
            if entry.phase == Phase::Running {
                if let Some(ticker) = entry.ticker.take() {
                    ticker.abort();
                }
                entry.phase = Phase::Cancelled;
                entry.follow_up = None;
            }
        }
    }

    /// Drop a terminal entry once its completion signal has been acted on.
    /// Running animations are never reaped.
    pub async fn reap(&self, id: AnimationId) {
        let mut inner = self.inner.lock().await;
        if inner.get(&id).is_some_and(|e| e.phase != Phase::Running) {
            inner.remove(&id);
        }
    }

    pub async fn phase(&self, id: AnimationId) -> Phase {
        self.inner
            .lock()
            .await
            .get(&id)
            .map(|e| e.phase)
            .unwrap_or(Phase::Idle)
    }

    pub async fn progress(&self, id: AnimationId) -> u8 {
        self.inner
            .lock()
            .await
            .get(&id)
            .map(|e| e.progress)
            .unwrap_or(0)
    }

    pub async fn running_count(&self) -> usize {
        self.inner
            .lock()
            .await
            .values()
            .filter(|e| e.phase == Phase::Running)
            .count()
    }

    /// Entries still held, running or awaiting reap.
    pub async fn tracked_count(&self) -> usize {
        self.inner.lock().await.len()
    }
}

/// Linear progress → paint mapping, reproducible from `progress` alone.
fn paint_for_progress(
    kind: AnimationKind,
    progress: u8,
    base_extrusion_height_m: Option<f64>,
) -> Vec<PaintProperty> {
    let factor = 1.0 - f64::from(progress) / 100.0;
    match kind {
        AnimationKind::Demolition => {
            let mut properties = vec![PaintProperty::Opacity(factor)];
            if let Some(base) = base_extrusion_height_m {
                properties.push(PaintProperty::ExtrusionHeight(base * factor));
            }
            properties
        }
        AnimationKind::RippleFade => vec![PaintProperty::Opacity(factor)],
    }
}

#[cfg(test)]
#[path = "tests/animation_tests.rs"]
mod tests;
