//! Declarative layer reconciliation.
//!
//! Layer identity is the id string, not object identity: re-submitting a
//! descriptor with an unchanged content hash is a no-op, a changed hash is a
//! remove-then-add. Sources are always added before the layer that
//! references them and removed after it.

use std::collections::HashMap;

use map_surface::{LayerKind, LayerSpec, PaintStyle, SourceSpec};
use serde::Serialize;
use sha2::{Digest, Sha256};
use shared::{domain::LayerId, geo::FeatureCollection};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::session::MapSession;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerDescriptor {
    pub id: LayerId,
    pub kind: LayerKind,
    pub source: FeatureCollection,
    pub paint: PaintStyle,
    /// Visual footprint in meters; reconciliation applies additions in
    /// descending order so smaller rings paint on top of larger ones.
    pub radius_hint_m: f64,
}

impl LayerDescriptor {
    pub fn content_hash(&self) -> [u8; 32] {
        let bytes = serde_json::to_vec(self).expect("layer descriptor serializes");
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        hasher.finalize().into()
    }

    fn source_id(&self) -> String {
        format!("src:{}", self.id)
    }
}

struct ActiveLayer {
    hash: [u8; 32],
    source_id: String,
}

pub struct LayerReconciler {
    session: Arc<MapSession>,
    active: Mutex<HashMap<LayerId, ActiveLayer>>,
}

impl LayerReconciler {
    pub fn new(session: Arc<MapSession>) -> Self {
        Self {
            session,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Make live map state match `desired`. Individual surface failures are
    /// logged and skipped; they never abort the rest of the batch. Calling
    /// twice with the same set produces zero surface operations the second
    /// time, and an empty set is a full teardown.
    pub async fn reconcile(&self, desired: &[LayerDescriptor]) {
        let Some(surface) = self.session.surface_if_ready() else {
            return;
        };
        let mut active = self.active.lock().await;

        let desired_by_id: HashMap<&LayerId, &LayerDescriptor> =
            desired.iter().map(|d| (&d.id, d)).collect();

        // Retire ids that left the desired set: layer first, then source.
        let stale: Vec<LayerId> = active
            .keys()
            .filter(|id| !desired_by_id.contains_key(*id))
            .cloned()
            .collect();
        for id in stale {
            if let Some(record) = active.remove(&id) {
                if let Err(err) = surface.remove_layer(&id) {
                    warn!(layer = %id, error = %err, "layer removal failed, skipping");
                }
                if let Err(err) = surface.remove_source(&record.source_id) {
                    warn!(source = %record.source_id, error = %err, "source removal failed, skipping");
                }
            }
        }

        // Additions and content changes, outermost footprint first.
        let mut pending: Vec<&LayerDescriptor> = Vec::new();
        for descriptor in desired {
            match active.get(&descriptor.id) {
                Some(record) if record.hash == descriptor.content_hash() => {}
                Some(record) => {
                    // Content changed under a stable id: replace in reverse
                    // add order before re-adding.
                    if let Err(err) = surface.remove_layer(&descriptor.id) {
                        warn!(layer = %descriptor.id, error = %err, "layer replace removal failed");
                    }
                    if let Err(err) = surface.remove_source(&record.source_id) {
                        warn!(source = %record.source_id, error = %err, "source replace removal failed");
                    }
                    active.remove(&descriptor.id);
                    pending.push(descriptor);
                }
                None => pending.push(descriptor),
            }
        }
        pending.sort_by(|a, b| {
            b.radius_hint_m
                .partial_cmp(&a.radius_hint_m)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });

        for descriptor in pending {
            let source_id = descriptor.source_id();
            if let Err(err) = surface.add_source(SourceSpec {
                id: source_id.clone(),
                data: descriptor.source.clone(),
            }) {
                warn!(source = %source_id, error = %err, "source add failed, skipping layer");
                continue;
            }
            if let Err(err) = surface.add_layer(LayerSpec {
                id: descriptor.id.clone(),
                kind: descriptor.kind,
                source: source_id.clone(),
                paint: descriptor.paint.clone(),
            }) {
                warn!(layer = %descriptor.id, error = %err, "layer add failed, rolling back source");
                if let Err(err) = surface.remove_source(&source_id) {
                    warn!(source = %source_id, error = %err, "source rollback failed");
                }
                continue;
            }
            active.insert(
                descriptor.id.clone(),
                ActiveLayer {
                    hash: descriptor.content_hash(),
                    source_id,
                },
            );
        }

        debug!(active = active.len(), "layer reconciliation complete");
    }

    /// Full teardown.
    pub async fn clear(&self) {
        self.reconcile(&[]).await;
    }

    pub async fn active_ids(&self) -> Vec<LayerId> {
        let active = self.active.lock().await;
        let mut ids: Vec<LayerId> = active.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn is_active(&self, id: &LayerId) -> bool {
        self.active.lock().await.contains_key(id)
    }
}

pub fn default_paint(kind: LayerKind, color: &str, opacity: f64) -> PaintStyle {
    let mut paint = PaintStyle {
        color: Some(color.to_string()),
        opacity: Some(opacity),
        ..PaintStyle::default()
    };
    match kind {
        LayerKind::Heatmap | LayerKind::Circle => paint.radius_px = Some(40.0),
        LayerKind::Extrusion => paint.extrusion_height_m = Some(30.0),
        LayerKind::Line => paint.line_width_px = Some(4.0),
    }
    paint
}

#[cfg(test)]
#[path = "tests/layers_tests.rs"]
mod tests;
