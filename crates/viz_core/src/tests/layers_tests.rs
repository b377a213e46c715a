use shared::{domain::LayerId, geo::LngLat};

use crate::{
    heatmap::heatmap_descriptors,
    layers::{default_paint, LayerDescriptor, LayerReconciler},
    test_support::{ready_session, SurfaceOp},
};
use map_surface::LayerKind;
use shared::{
    geo::{circle_polygon, Feature, FeatureCollection},
    protocol::MetricsSnapshot,
};

fn circle(id: &str, radius_m: f64) -> LayerDescriptor {
    let center = LngLat::new(-122.4194, 37.7749);
    LayerDescriptor {
        id: LayerId::new(id),
        kind: LayerKind::Circle,
        source: FeatureCollection::single(Feature::new(circle_polygon(center, radius_m))),
        paint: default_paint(LayerKind::Circle, "#22c55e", 0.4),
        radius_hint_m: radius_m,
    }
}

#[tokio::test]
async fn reconcile_is_idempotent() {
    let (session, surface) = ready_session().await;
    let reconciler = LayerReconciler::new(session);
    let desired = vec![circle("a", 300.0), circle("b", 600.0)];

    reconciler.reconcile(&desired).await;
    let ops_after_first = surface.op_count();
    assert_eq!(surface.live_layers().len(), 2);

    reconciler.reconcile(&desired).await;
    assert_eq!(surface.op_count(), ops_after_first, "second pass must be a no-op");
}

#[tokio::test]
async fn source_added_before_layer_and_removed_after() {
    let (session, surface) = ready_session().await;
    let reconciler = LayerReconciler::new(session);

    reconciler.reconcile(&[circle("zone", 400.0)]).await;
    assert_eq!(
        surface.ops(),
        vec![
            SurfaceOp::AddSource("src:zone".into()),
            SurfaceOp::AddLayer("zone".into()),
        ]
    );

    reconciler.reconcile(&[]).await;
    let ops = surface.ops();
    assert_eq!(
        &ops[2..],
        &[
            SurfaceOp::RemoveLayer("zone".into()),
            SurfaceOp::RemoveSource("src:zone".into()),
        ]
    );
    assert!(surface.live_layers().is_empty());
    assert!(surface.live_sources().is_empty());
}

#[tokio::test]
async fn larger_footprints_are_added_first() {
    let (session, surface) = ready_session().await;
    let reconciler = LayerReconciler::new(session);

    // Submitted small-first; must be applied large-first.
    reconciler
        .reconcile(&[circle("inner", 300.0), circle("outer", 900.0), circle("mid", 600.0)])
        .await;

    let adds: Vec<String> = surface
        .ops()
        .into_iter()
        .filter_map(|op| match op {
            SurfaceOp::AddLayer(id) => Some(id),
            _ => None,
        })
        .collect();
    assert_eq!(adds, vec!["outer", "mid", "inner"]);
}

#[tokio::test]
async fn changed_content_replaces_layer_under_same_id() {
    let (session, surface) = ready_session().await;
    let reconciler = LayerReconciler::new(session);

    reconciler.reconcile(&[circle("zone", 400.0)]).await;
    reconciler.reconcile(&[circle("zone", 800.0)]).await;

    let ops = surface.ops();
    assert_eq!(
        &ops[2..],
        &[
            SurfaceOp::RemoveLayer("zone".into()),
            SurfaceOp::RemoveSource("src:zone".into()),
            SurfaceOp::AddSource("src:zone".into()),
            SurfaceOp::AddLayer("zone".into()),
        ]
    );
    assert_eq!(surface.live_layers(), vec!["zone"]);
}

#[tokio::test]
async fn failed_source_add_skips_layer_without_aborting_batch() {
    let (session, surface) = ready_session().await;
    let reconciler = LayerReconciler::new(session);

    // First pending addition is the larger footprint; fail its source.
    surface.fail_next("add_source");
    reconciler
        .reconcile(&[circle("big", 900.0), circle("small", 300.0)])
        .await;

    assert_eq!(surface.live_layers(), vec!["small"]);
    assert!(!reconciler.is_active(&LayerId::new("big")).await);
    assert!(reconciler.is_active(&LayerId::new("small")).await);
}

#[tokio::test]
async fn failed_layer_add_rolls_back_its_source() {
    let (session, surface) = ready_session().await;
    let reconciler = LayerReconciler::new(session);

    surface.fail_next("add_layer");
    reconciler.reconcile(&[circle("zone", 400.0)]).await;

    assert!(surface.live_layers().is_empty());
    assert!(surface.live_sources().is_empty());
    assert!(!reconciler.is_active(&LayerId::new("zone")).await);
}

#[tokio::test]
async fn reconcile_after_destroy_is_dropped() {
    let surface = crate::test_support::RecordingSurface::new();
    let lifecycle = crate::session::SessionLifecycle::new(
        crate::test_support::FixedSurfaceProvider::new(surface.clone()),
    );
    let session = lifecycle
        .open(map_surface::MapInit {
            access_token: "t".into(),
            center: LngLat::new(0.0, 0.0),
            zoom: 1.0,
            pitch: 0.0,
            bearing: 0.0,
        })
        .await
        .unwrap();
    let scheduler = crate::animation::AnimationScheduler::new(
        session.clone(),
        tokio::sync::mpsc::unbounded_channel().0,
    );
    let markers = crate::markers::MarkerPool::new(session.clone());
    let camera = crate::camera::CameraController::new(
        session.clone(),
        crate::test_support::FixedGeocoder::new(),
        crate::camera::ProjectionAuthority::Owned,
    );
    lifecycle.close(&scheduler, &markers, &camera).await;

    let reconciler = LayerReconciler::new(session);
    let before = surface.op_count();
    reconciler.reconcile(&[circle("zone", 400.0)]).await;
    assert_eq!(surface.op_count(), before, "mutation after destroy must be dropped");
}

#[tokio::test]
async fn heatmap_descriptor_synthesis_is_reproducible() {
    let center = LngLat::new(-122.4194, 37.7749);
    let mut snapshot = MetricsSnapshot::single("housing_units", 12.0);
    snapshot
        .metrics
        .insert("air_quality".into(), shared::protocol::MetricDelta { percentage: -5.0 });

    let first = heatmap_descriptors(center, &snapshot, 300.0);
    let second = heatmap_descriptors(center, &snapshot, 300.0);
    assert_eq!(first, second);

    let first_hashes: Vec<[u8; 32]> = first.iter().map(LayerDescriptor::content_hash).collect();
    let second_hashes: Vec<[u8; 32]> = second.iter().map(LayerDescriptor::content_hash).collect();
    assert_eq!(first_hashes, second_hashes);
}
