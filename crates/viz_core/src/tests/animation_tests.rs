use std::time::Duration;

use shared::domain::LayerId;
use tokio::sync::mpsc;

use crate::{
    animation::{AnimationKind, AnimationScheduler, AnimationSignal, AnimationSpec, FollowUp, Phase},
    test_support::{advance_and_settle, ready_session},
};

fn demolition(target: &str) -> AnimationSpec {
    AnimationSpec {
        kind: AnimationKind::Demolition,
        target_layers: vec![LayerId::new(target)],
        step_percent: 10,
        interval: Duration::from_millis(500),
        base_extrusion_height_m: Some(30.0),
        follow_up: Some(FollowUp::RetireLayers(vec![LayerId::new(target)])),
    }
}

#[tokio::test(start_paused = true)]
async fn demolition_reaches_terminal_exactly_once() {
    let (session, surface) = ready_session().await;
    let (tx, mut rx) = mpsc::unbounded_channel::<AnimationSignal>();
    let scheduler = AnimationScheduler::new(session, tx);

    let id = scheduler.start(demolition("extrusion:old-mall")).await;
    assert_eq!(scheduler.phase(id).await, Phase::Running);

    // 10 steps of 10% at 500ms each.
    for _ in 0..10 {
        advance_and_settle(Duration::from_millis(500)).await;
    }

    assert_eq!(scheduler.phase(id).await, Phase::Completed);
    assert_eq!(scheduler.progress(id).await, 100);

    let signal = rx.recv().await.expect("completion signal");
    assert_eq!(signal.id, id);
    assert_eq!(
        signal.follow_up,
        Some(FollowUp::RetireLayers(vec![LayerId::new("extrusion:old-mall")]))
    );

    // No further ticks, no second signal.
    advance_and_settle(Duration::from_secs(10)).await;
    assert!(rx.try_recv().is_err());

    // Terminal paint state: opacity and height at zero.
    let layer = LayerId::new("extrusion:old-mall");
    assert_eq!(surface.paint_value(&layer, "opacity"), Some(0.0));
    assert_eq!(surface.paint_value(&layer, "extrusion_height"), Some(0.0));
}

#[tokio::test(start_paused = true)]
async fn progress_is_monotonic_and_paint_tracks_it() {
    let (session, surface) = ready_session().await;
    let (tx, _rx) = mpsc::unbounded_channel();
    let scheduler = AnimationScheduler::new(session, tx);
    let layer = LayerId::new("extrusion:tower");

    let id = scheduler.start(demolition("extrusion:tower")).await;

    advance_and_settle(Duration::from_millis(500)).await;
    assert_eq!(scheduler.progress(id).await, 10);
    let opacity = surface.paint_value(&layer, "opacity").expect("opacity set");
    assert!((opacity - 0.9).abs() < 1e-9);
    let height = surface
        .paint_value(&layer, "extrusion_height")
        .expect("height set");
    assert!((height - 27.0).abs() < 1e-9);

    advance_and_settle(Duration::from_millis(1000)).await;
    assert_eq!(scheduler.progress(id).await, 30);
    let opacity = surface.paint_value(&layer, "opacity").expect("opacity set");
    assert!((opacity - 0.7).abs() < 1e-9);
}

#[tokio::test(start_paused = true)]
async fn restart_cancels_prior_animation_on_same_target() {
    let (session, _surface) = ready_session().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let scheduler = AnimationScheduler::new(session, tx);

    let first = scheduler.start(demolition("extrusion:block")).await;
    advance_and_settle(Duration::from_millis(1500)).await;
    assert_eq!(scheduler.progress(first).await, 30);

    let second = scheduler.start(demolition("extrusion:block")).await;
    assert_eq!(scheduler.phase(first).await, Phase::Cancelled);
    assert_eq!(scheduler.phase(second).await, Phase::Running);
    assert_eq!(scheduler.running_count().await, 1);

    // New animation starts from zero and completes alone; the cancelled
    // one never fires its follow-up.
    for _ in 0..10 {
        advance_and_settle(Duration::from_millis(500)).await;
    }
    assert_eq!(scheduler.phase(second).await, Phase::Completed);
    let signal = rx.recv().await.expect("completion signal");
    assert_eq!(signal.id, second);
    assert!(rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn cancel_after_complete_is_a_noop() {
    let (session, _surface) = ready_session().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let scheduler = AnimationScheduler::new(session, tx);

    let id = scheduler.start(demolition("extrusion:pier")).await;
    for _ in 0..10 {
        advance_and_settle(Duration::from_millis(500)).await;
    }
    assert_eq!(scheduler.phase(id).await, Phase::Completed);
    assert!(rx.recv().await.is_some());

    scheduler.cancel(id).await;
    assert_eq!(scheduler.phase(id).await, Phase::Completed);
}

#[tokio::test(start_paused = true)]
async fn cancel_all_stops_tickers_and_drops_follow_ups() {
    let (session, surface) = ready_session().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let scheduler = AnimationScheduler::new(session, tx);

    let a = scheduler.start(demolition("extrusion:a")).await;
    let b = scheduler.start(demolition("extrusion:b")).await;
    advance_and_settle(Duration::from_millis(500)).await;

    scheduler.cancel_all().await;
    assert_eq!(scheduler.phase(a).await, Phase::Cancelled);
    assert_eq!(scheduler.phase(b).await, Phase::Cancelled);
    assert_eq!(scheduler.running_count().await, 0);

    let paint_ops = surface.op_count();
    advance_and_settle(Duration::from_secs(30)).await;
    assert_eq!(surface.op_count(), paint_ops, "no paint after cancel_all");
    assert!(rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn terminal_entries_are_pruned() {
    let (session, _surface) = ready_session().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let scheduler = AnimationScheduler::new(session, tx);

    let done = scheduler.start(demolition("extrusion:one")).await;
    for _ in 0..10 {
        advance_and_settle(Duration::from_millis(500)).await;
    }
    assert!(rx.recv().await.is_some());
    assert_eq!(scheduler.tracked_count().await, 1);

    scheduler.reap(done).await;
    assert_eq!(scheduler.phase(done).await, Phase::Idle);
    assert_eq!(scheduler.tracked_count().await, 0);

    // Reap never touches a running animation.
    let running = scheduler.start(demolition("extrusion:two")).await;
    scheduler.reap(running).await;
    assert_eq!(scheduler.phase(running).await, Phase::Running);

    // A new start sweeps entries that went terminal earlier.
    let restarted = scheduler.start(demolition("extrusion:two")).await;
    assert_eq!(scheduler.phase(running).await, Phase::Cancelled);
    scheduler.cancel(restarted).await;
    scheduler.start(demolition("extrusion:three")).await;
    assert_eq!(scheduler.phase(running).await, Phase::Idle);
    assert_eq!(scheduler.phase(restarted).await, Phase::Idle);
    assert_eq!(scheduler.tracked_count().await, 1);
}

#[tokio::test(start_paused = true)]
async fn ripple_fade_only_touches_opacity() {
    let (session, surface) = ready_session().await;
    let (tx, _rx) = mpsc::unbounded_channel();
    let scheduler = AnimationScheduler::new(session, tx);
    let layer = LayerId::new("demolition-zone:1");

    scheduler
        .start(AnimationSpec {
            kind: AnimationKind::RippleFade,
            target_layers: vec![layer.clone()],
            step_percent: 25,
            interval: Duration::from_millis(500),
            base_extrusion_height_m: None,
            follow_up: None,
        })
        .await;

    advance_and_settle(Duration::from_millis(500)).await;
    let opacity = surface.paint_value(&layer, "opacity").expect("opacity set");
    assert!((opacity - 0.75).abs() < 1e-9);
    assert_eq!(surface.paint_value(&layer, "extrusion_height"), None);
}
