//! Metrics snapshot → heatmap layer descriptors.
//!
//! The mapping is a pure function of the snapshot: recomputing twice from
//! the same metrics yields content-hash-identical descriptors, which is what
//! makes repeated reconciliation a no-op.
//!
//! Formula (the source derived ring visuals from ad hoc heuristics; this is
//! the documented replacement):
//!   - a metric with percentage delta `p != 0` produces
//!     `n = clamp(ceil(|p| / 8), 1, 5)` concentric rings;
//!   - ring `k` (1-based, innermost first) has radius `base_radius * k`,
//!     opacity `0.45 - 0.07 * (k - 1)`, and the k-th color of a five-step
//!     ramp — greens for improvements, reds for regressions.

use map_surface::LayerKind;
use shared::{
    domain::LayerId,
    geo::{circle_polygon, Feature, FeatureCollection, LngLat},
    protocol::MetricsSnapshot,
};

use crate::layers::{default_paint, LayerDescriptor};

const POSITIVE_RAMP: [&str; 5] = ["#bbf7d0", "#4ade80", "#22c55e", "#16a34a", "#15803d"];
const NEGATIVE_RAMP: [&str; 5] = ["#fecaca", "#f87171", "#ef4444", "#dc2626", "#b91c1c"];

const MAX_RINGS: usize = 5;
const PERCENT_PER_RING: f64 = 8.0;

pub fn ring_count(percentage: f64) -> usize {
    if percentage == 0.0 {
        return 0;
    }
    ((percentage.abs() / PERCENT_PER_RING).ceil() as usize).clamp(1, MAX_RINGS)
}

pub fn ring_opacity(ring: usize) -> f64 {
    0.45 - 0.07 * (ring as f64 - 1.0)
}

pub fn ring_color(percentage: f64, ring: usize) -> &'static str {
    let ramp = if percentage > 0.0 {
        &POSITIVE_RAMP
    } else {
        &NEGATIVE_RAMP
    };
    ramp[(ring - 1).min(MAX_RINGS - 1)]
}

/// The full desired heatmap descriptor set for a snapshot, centered on the
/// current city. Metrics iterate in name order, so the output order is
/// deterministic too.
pub fn heatmap_descriptors(
    center: LngLat,
    snapshot: &MetricsSnapshot,
    base_radius_m: f64,
) -> Vec<LayerDescriptor> {
    let mut descriptors = Vec::new();
    for (metric, delta) in &snapshot.metrics {
        let rings = ring_count(delta.percentage);
        for ring in 1..=rings {
            let radius_m = base_radius_m * ring as f64;
            let feature = Feature::new(circle_polygon(center, radius_m))
                .with_property("metric", metric.clone())
                .with_property("percentage", delta.percentage)
                .with_property("ring", ring as i64);
            descriptors.push(LayerDescriptor {
                id: LayerId::new(format!("heatmap:{metric}:{ring}")),
                kind: LayerKind::Heatmap,
                source: FeatureCollection::single(feature),
                paint: default_paint(
                    LayerKind::Heatmap,
                    ring_color(delta.percentage, ring),
                    ring_opacity(ring),
                ),
                radius_hint_m: radius_m,
            });
        }
    }
    descriptors
}

#[cfg(test)]
#[path = "tests/heatmap_tests.rs"]
mod tests;
