//! Lifecycle tests for the tracking controller.
//!
//! Every test runs on a paused tokio clock, so the 1s elapsed timer and the
//! 30s flush timer advance only when the test sleeps.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{advance, fix, Harness, MockBackend};
use futures::future::BoxFuture;
use run_tracker::{
    ChannelPositionSource, Fix, MemorySessionStore, NonFatalKind, PositionSource, PositionStream,
    SaveLocation, SessionState, TrackingConfig, TrackingController, TrackingEvent,
};

fn distance_events(events: &[TrackingEvent]) -> Vec<f64> {
    events
        .iter()
        .filter_map(|e| match e {
            TrackingEvent::Distance { meters } => Some(*meters),
            _ => None,
        })
        .collect()
}

fn non_fatal_kinds(events: &[TrackingEvent]) -> Vec<NonFatalKind> {
    events
        .iter()
        .filter_map(|e| match e {
            TrackingEvent::NonFatal(err) => Some(err.kind),
            _ => None,
        })
        .collect()
}

fn saved_location(events: &[TrackingEvent]) -> Option<SaveLocation> {
    events.iter().find_map(|e| match e {
        TrackingEvent::SessionSaved { location, .. } => Some(*location),
        _ => None,
    })
}

// ============================================================================
// Accumulation
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_initial_fix_then_jitter_is_filtered() {
    let mut h = Harness::new();
    h.source.set_current_position(Some(fix(0.0, 0.0)));

    assert!(h.controller.start(None, true, false).await.unwrap());
    h.source.push_fix(fix(0.0, 0.0001));
    h.source.push_fix(fix(0.0, 0.0001));

    let snapshot = h.controller.snapshot().await.unwrap();
    assert_eq!(snapshot.state, SessionState::Tracking);
    assert_eq!(snapshot.session_id.as_deref(), Some("session-1"));
    assert_eq!(snapshot.point_count, 2);
    assert!((snapshot.distance_m - 11.12).abs() < 0.1);

    let events = h.drain_events();
    assert_eq!(events[0], TrackingEvent::StateChanged(SessionState::Tracking));
    // The duplicate fix produced no second distance update
    assert_eq!(distance_events(&events).len(), 1);
    let locations = events
        .iter()
        .filter(|e| matches!(e, TrackingEvent::Location { .. }))
        .count();
    assert_eq!(locations, 2);
}

#[tokio::test(start_paused = true)]
async fn test_stationary_speed_reported_as_zero() {
    let mut h = Harness::new();
    h.controller.start(None, true, false).await.unwrap();

    h.source.push_fix(fix(0.0, 0.0).with_speed(0.3));
    h.source.push_fix(fix(0.0, 0.001).with_speed(3.2));
    h.controller.snapshot().await.unwrap();

    let speeds: Vec<f64> = h
        .drain_events()
        .into_iter()
        .filter_map(|e| match e {
            TrackingEvent::Location { speed_mps, .. } => Some(speed_mps),
            _ => None,
        })
        .collect();
    assert_eq!(speeds, vec![0.0, 3.2]);
}

#[tokio::test(start_paused = true)]
async fn test_stream_error_does_not_stop_tracking() {
    let mut h = Harness::new();
    h.controller.start(None, true, false).await.unwrap();

    h.source.push_error("location services disabled");
    h.source.push_fix(fix(0.0, 0.0));

    let snapshot = h.controller.snapshot().await.unwrap();
    assert_eq!(snapshot.state, SessionState::Tracking);
    assert_eq!(snapshot.point_count, 1);

    let events = h.drain_events();
    assert!(events.iter().any(|e| matches!(
        e,
        TrackingEvent::Error { message } if message.contains("location services disabled")
    )));
}

// ============================================================================
// Timing & Pause
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_elapsed_ticks_once_per_second() {
    let mut h = Harness::new();
    h.controller.start(None, true, false).await.unwrap();

    advance(3_500).await;

    let elapsed: Vec<u64> = h
        .drain_events()
        .into_iter()
        .filter_map(|e| match e {
            TrackingEvent::Elapsed { seconds } => Some(seconds),
            _ => None,
        })
        .collect();
    assert_eq!(elapsed, vec![1, 2, 3]);
    assert_eq!(h.controller.snapshot().await.unwrap().formatted_duration(), "00:03");
}

#[tokio::test(start_paused = true)]
async fn test_paused_time_is_excluded_from_moving_time() {
    let h = Harness::new();
    h.controller.start(None, true, false).await.unwrap();
    advance(3_500).await;

    assert!(h.controller.pause().await.unwrap());
    assert!(!h.controller.pause().await.unwrap());
    advance(10_000).await;
    assert_eq!(h.controller.snapshot().await.unwrap().elapsed_seconds, 3);

    assert!(h.controller.resume().await.unwrap());
    advance(2_000).await;

    let snapshot = h.controller.snapshot().await.unwrap();
    assert_eq!(snapshot.state, SessionState::Tracking);
    assert_eq!(snapshot.elapsed_seconds, 5);
    assert_eq!(snapshot.paused_duration, Duration::from_secs(10));

    h.controller.stop(true).await.unwrap();
    let ends = h.backend.ends();
    assert_eq!(ends.len(), 1);
    assert_eq!(ends[0].1.moving_time_s, 5);
}

#[tokio::test(start_paused = true)]
async fn test_fixes_while_paused_are_ignored() {
    let h = Harness::new();
    h.controller.start(None, true, false).await.unwrap();
    h.source.push_fix(fix(0.0, 0.0));

    h.controller.pause().await.unwrap();
    h.source.push_fix(fix(0.0, 0.01));
    let paused = h.controller.snapshot().await.unwrap();
    assert_eq!(paused.state, SessionState::Paused);
    assert_eq!(paused.point_count, 1);
    assert_eq!(paused.distance_m, 0.0);

    h.controller.resume().await.unwrap();
    h.source.push_fix(fix(0.0, 0.0001));
    let resumed = h.controller.snapshot().await.unwrap();
    assert_eq!(resumed.point_count, 2);
    // Measured from the last point accepted before the pause
    assert!((resumed.distance_m - 11.12).abs() < 0.1);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_transitions_are_rejected() {
    let h = Harness::new();
    assert!(!h.controller.pause().await.unwrap());
    assert!(!h.controller.resume().await.unwrap());
    assert!(h.controller.stop(true).await.unwrap().is_none());

    assert!(h.controller.start(Some("route-9".into()), false, true).await.unwrap());
    assert!(!h.controller.start(None, true, false).await.unwrap());
    assert!(!h.controller.resume().await.unwrap());

    assert_eq!(h.backend.creates(), vec![(Some("route-9".to_string()), false)]);
}

// ============================================================================
// Stop
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_stop_without_save_makes_no_calls() {
    let mut h = Harness::new();
    h.controller.start(None, true, false).await.unwrap();
    h.walk(0, 3);

    assert!(h.controller.stop(false).await.unwrap().is_none());

    assert!(h.backend.appends().is_empty());
    assert!(h.backend.ends().is_empty());
    assert!(h.store.is_empty());
    assert_eq!(h.source.subscriber_count(), 0);
    assert_eq!(h.controller.snapshot().await.unwrap().state, SessionState::Idle);

    let events = h.drain_events();
    assert_eq!(
        events.last(),
        Some(&TrackingEvent::StateChanged(SessionState::Idle))
    );
}

#[tokio::test(start_paused = true)]
async fn test_stop_saves_remotely_with_final_flush() {
    let mut h = Harness::new();
    h.controller.start(None, true, false).await.unwrap();
    h.walk(0, 3);
    let live = h.controller.snapshot().await.unwrap();

    let session = h.controller.stop(true).await.unwrap().unwrap();
    assert_eq!(session.id, "session-1");
    assert!(session.is_finished());

    // Below the batch minimum, but the final flush always goes out
    let appends = h.backend.appends();
    assert_eq!(appends.len(), 1);
    assert_eq!(appends[0].sequences, vec![0, 1, 2]);

    let ends = h.backend.ends();
    assert_eq!(ends.len(), 1);
    assert_eq!(ends[0].1.total_distance_m, live.distance_m);
    assert!(h.store.is_empty());

    assert_eq!(saved_location(&h.drain_events()), Some(SaveLocation::Remote));
}

#[tokio::test(start_paused = true)]
async fn test_stop_falls_back_to_local_store() {
    let backend = MockBackend::new();
    MockBackend::set(&backend.fail_end, true);
    let mut h = Harness::with_backend(backend);

    h.controller.start(None, true, false).await.unwrap();
    h.walk(0, 3);
    advance(4_500).await;
    let live = h.controller.snapshot().await.unwrap();

    let session = h.controller.stop(true).await.unwrap().unwrap();
    assert!(session.id.starts_with("local-"));
    assert!(session.ended_at.is_some());
    assert_eq!(session.points.len(), 3);
    assert_eq!(session.total_distance_m, live.distance_m);
    assert_eq!(session.moving_time_s, 4);
    assert_eq!(session.elevation_gain_m, None);

    let saved = h.store.sessions();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0], session);

    let events = h.drain_events();
    assert_eq!(non_fatal_kinds(&events), vec![NonFatalKind::EndSession]);
    assert_eq!(saved_location(&events), Some(SaveLocation::Local));
}

#[tokio::test(start_paused = true)]
async fn test_failed_final_flush_keeps_points_locally() {
    let backend = MockBackend::new();
    MockBackend::set(&backend.fail_append, true);
    let h = Harness::with_backend(backend);

    h.controller.start(None, true, false).await.unwrap();
    h.walk(0, 4);

    let session = h.controller.stop(true).await.unwrap().unwrap();
    assert_eq!(h.backend.appends().len(), 1);
    assert!(h.backend.ends().is_empty());
    assert_eq!(session.points.len(), 4);
    assert_eq!(h.store.len(), 1);
}

// ============================================================================
// Degraded Mode
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_tracking_continues_without_remote_session() {
    let backend = MockBackend::new();
    MockBackend::set(&backend.fail_create, true);
    let mut h = Harness::with_backend(backend);

    assert!(h.controller.start(None, true, false).await.unwrap());
    h.walk(0, 6);
    advance(31_000).await;

    let snapshot = h.controller.snapshot().await.unwrap();
    assert_eq!(snapshot.session_id, None);
    assert_eq!(snapshot.point_count, 6);
    assert_eq!(snapshot.pending_uploads, 6);
    assert!(h.backend.appends().is_empty());

    let session = h.controller.stop(true).await.unwrap().unwrap();
    assert!(h.backend.ends().is_empty());
    assert_eq!(session.points.len(), 6);
    assert_eq!(h.store.len(), 1);

    let events = h.drain_events();
    assert_eq!(non_fatal_kinds(&events), vec![NonFatalKind::SessionCreate]);
}

/// Source whose one-shot position query never answers.
struct SilentSource(ChannelPositionSource);

impl PositionSource for SilentSource {
    fn current_position(&self) -> BoxFuture<'_, Option<Fix>> {
        Box::pin(std::future::pending())
    }

    fn subscribe(&self, background_mode: bool) -> PositionStream {
        self.0.subscribe(background_mode)
    }
}

#[tokio::test(start_paused = true)]
async fn test_current_position_timeout_is_non_fatal() {
    let backend = MockBackend::new();
    let controller = TrackingController::spawn(
        TrackingConfig::default(),
        Arc::new(SilentSource(ChannelPositionSource::new(8))),
        backend.clone(),
        Arc::new(MemorySessionStore::new()),
    )
    .unwrap();
    let mut events = controller.subscribe();

    assert!(controller.start(None, true, false).await.unwrap());
    let snapshot = controller.snapshot().await.unwrap();
    assert_eq!(snapshot.state, SessionState::Tracking);
    assert_eq!(snapshot.point_count, 0);

    let mut kinds = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let TrackingEvent::NonFatal(err) = event {
            kinds.push(err.kind);
        }
    }
    assert_eq!(kinds, vec![NonFatalKind::CurrentPosition]);
}

// ============================================================================
// Discard & Teardown
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_discard_deletes_remote_session() {
    let h = Harness::new();
    h.controller.start(None, true, false).await.unwrap();
    h.walk(0, 3);

    h.controller.discard().await.unwrap();

    assert_eq!(h.backend.deletes(), vec!["session-1".to_string()]);
    assert!(h.backend.appends().is_empty());
    assert!(h.store.is_empty());
    assert_eq!(h.controller.snapshot().await.unwrap().state, SessionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_failed_delete_is_reported_not_raised() {
    let backend = MockBackend::new();
    MockBackend::set(&backend.fail_delete, true);
    let mut h = Harness::with_backend(backend);

    h.controller.start(None, true, false).await.unwrap();
    h.controller.discard().await.unwrap();

    let events = h.drain_events();
    assert_eq!(non_fatal_kinds(&events), vec![NonFatalKind::Delete]);
    assert_eq!(h.controller.snapshot().await.unwrap().state, SessionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_session_can_restart_after_stop() {
    let h = Harness::new();
    h.controller.start(None, true, false).await.unwrap();
    h.walk(0, 2);
    h.controller.stop(true).await.unwrap();

    assert!(h.controller.start(None, true, false).await.unwrap());
    // The previous session's last fix does not seed the new one
    let fresh = h.controller.snapshot().await.unwrap();
    assert_eq!(fresh.point_count, 0);
    assert_eq!(fresh.distance_m, 0.0);

    h.source.push_fix(fix(10.0, 10.0));
    let snapshot = h.controller.snapshot().await.unwrap();
    assert_eq!(snapshot.session_id.as_deref(), Some("session-2"));
    assert_eq!(snapshot.point_count, 1);
    assert_eq!(snapshot.distance_m, 0.0);
    assert_eq!(snapshot.elapsed_seconds, 0);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_discards_active_session() {
    let h = Harness::new();
    h.controller.start(None, true, false).await.unwrap();

    h.controller.shutdown().await;

    assert_eq!(h.backend.deletes(), vec!["session-1".to_string()]);
    assert_eq!(h.source.subscriber_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_dropping_handle_discards_active_session() {
    let Harness {
        source,
        backend,
        controller,
        ..
    } = Harness::new();
    controller.start(None, true, false).await.unwrap();

    drop(controller);
    advance(10).await;

    assert_eq!(backend.deletes(), vec!["session-1".to_string()]);
    assert_eq!(source.subscriber_count(), 0);
}
