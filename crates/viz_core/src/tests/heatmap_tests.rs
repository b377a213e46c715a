use shared::{geo::LngLat, protocol::MetricsSnapshot};

use crate::heatmap::{heatmap_descriptors, ring_color, ring_count, ring_opacity};

fn center() -> LngLat {
    LngLat::new(-122.4194, 37.7749)
}

#[test]
fn ring_count_scales_with_magnitude_and_clamps() {
    assert_eq!(ring_count(0.0), 0);
    assert_eq!(ring_count(0.5), 1);
    assert_eq!(ring_count(8.0), 1);
    assert_eq!(ring_count(8.1), 2);
    assert_eq!(ring_count(-17.0), 3);
    assert_eq!(ring_count(40.0), 5);
    assert_eq!(ring_count(-250.0), 5);
}

#[test]
fn inner_rings_are_darker_and_more_opaque() {
    assert!((ring_opacity(1) - 0.45).abs() < 1e-9);
    assert!((ring_opacity(5) - 0.17).abs() < 1e-9);
    assert_eq!(ring_color(12.0, 1), "#bbf7d0");
    assert_eq!(ring_color(12.0, 2), "#4ade80");
    assert_eq!(ring_color(-12.0, 1), "#fecaca");
    assert_eq!(ring_color(-12.0, 2), "#f87171");
}

#[test]
fn descriptors_cover_every_nonzero_metric() {
    let mut snapshot = MetricsSnapshot::single("housing_units", 12.0);
    snapshot.metrics.insert(
        "traffic_congestion".into(),
        shared::protocol::MetricDelta { percentage: -20.0 },
    );
    snapshot.metrics.insert(
        "population".into(),
        shared::protocol::MetricDelta { percentage: 0.0 },
    );

    let descriptors = heatmap_descriptors(center(), &snapshot, 300.0);

    // housing_units: ceil(12/8) = 2 rings; traffic: ceil(20/8) = 3 rings;
    // population at zero contributes nothing.
    assert_eq!(descriptors.len(), 5);
    let ids: Vec<String> = descriptors.iter().map(|d| d.id.to_string()).collect();
    assert_eq!(
        ids,
        vec![
            "heatmap:housing_units:1",
            "heatmap:housing_units:2",
            "heatmap:traffic_congestion:1",
            "heatmap:traffic_congestion:2",
            "heatmap:traffic_congestion:3",
        ]
    );
}

#[test]
fn ring_radii_grow_linearly_from_the_base() {
    let snapshot = MetricsSnapshot::single("gdp_growth", 40.0);
    let descriptors = heatmap_descriptors(center(), &snapshot, 300.0);
    let radii: Vec<f64> = descriptors.iter().map(|d| d.radius_hint_m).collect();
    assert_eq!(radii, vec![300.0, 600.0, 900.0, 1200.0, 1500.0]);
}

#[test]
fn same_snapshot_yields_identical_content_hashes() {
    let snapshot = MetricsSnapshot::single("air_quality", -9.5);
    let first = heatmap_descriptors(center(), &snapshot, 300.0);
    let second = heatmap_descriptors(center(), &snapshot, 300.0);
    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(second.iter()) {
        assert_eq!(a.content_hash(), b.content_hash());
    }
}
