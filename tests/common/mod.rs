//! Scripted collaborators shared by the controller integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use futures::future::BoxFuture;
use run_tracker::{
    ChannelPositionSource, Fix, MemorySessionStore, Result, RunSession, SessionBackend,
    SessionRef, SessionSummary, TrackPoint, TrackingConfig, TrackingController, TrackingError,
    TrackingEvent,
};
use tokio::sync::broadcast;

/// One `append_points` attempt as seen by the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct AppendCall {
    pub session_id: String,
    pub sequences: Vec<u32>,
    pub succeeded: bool,
}

/// Backend that records every call and fails on demand.
#[derive(Default)]
pub struct MockBackend {
    pub fail_create: AtomicBool,
    pub fail_append: AtomicBool,
    pub fail_end: AtomicBool,
    pub fail_delete: AtomicBool,
    pub no_credential: AtomicBool,
    /// Delay applied to `append_points` before it resolves
    pub append_delay: Mutex<Option<Duration>>,
    next_id: AtomicU32,
    creates: Mutex<Vec<(Option<String>, bool)>>,
    appends: Mutex<Vec<AppendCall>>,
    ends: Mutex<Vec<(String, SessionSummary)>>,
    deletes: Mutex<Vec<String>>,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(flag: &AtomicBool, value: bool) {
        flag.store(value, Ordering::SeqCst);
    }

    pub fn creates(&self) -> Vec<(Option<String>, bool)> {
        self.creates.lock().unwrap().clone()
    }

    pub fn appends(&self) -> Vec<AppendCall> {
        self.appends.lock().unwrap().clone()
    }

    pub fn ends(&self) -> Vec<(String, SessionSummary)> {
        self.ends.lock().unwrap().clone()
    }

    pub fn deletes(&self) -> Vec<String> {
        self.deletes.lock().unwrap().clone()
    }

    fn failure(operation: &str) -> TrackingError {
        TrackingError::Backend {
            message: format!("{} unavailable", operation),
            status_code: Some(503),
        }
    }
}

impl SessionBackend for MockBackend {
    fn has_credential(&self) -> bool {
        !self.no_credential.load(Ordering::SeqCst)
    }

    fn create_session<'a>(
        &'a self,
        route_id: Option<&'a str>,
        is_public: bool,
    ) -> BoxFuture<'a, Result<SessionRef>> {
        self.creates
            .lock()
            .unwrap()
            .push((route_id.map(str::to_string), is_public));
        let result = if self.fail_create.load(Ordering::SeqCst) {
            Err(Self::failure("create"))
        } else {
            let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(SessionRef {
                id: format!("session-{}", n),
            })
        };
        Box::pin(futures::future::ready(result))
    }

    fn append_points<'a>(
        &'a self,
        session_id: &'a str,
        points: &'a [TrackPoint],
    ) -> BoxFuture<'a, Result<()>> {
        let succeeded = !self.fail_append.load(Ordering::SeqCst);
        self.appends.lock().unwrap().push(AppendCall {
            session_id: session_id.to_string(),
            sequences: points.iter().map(|p| p.sequence).collect(),
            succeeded,
        });
        let delay = *self.append_delay.lock().unwrap();
        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if succeeded {
                Ok(())
            } else {
                Err(Self::failure("append"))
            }
        })
    }

    fn end_session<'a>(
        &'a self,
        session_id: &'a str,
        summary: &'a SessionSummary,
    ) -> BoxFuture<'a, Result<RunSession>> {
        self.ends
            .lock()
            .unwrap()
            .push((session_id.to_string(), summary.clone()));
        let result = if self.fail_end.load(Ordering::SeqCst) {
            Err(Self::failure("end"))
        } else {
            let now = Utc::now();
            Ok(RunSession {
                id: session_id.to_string(),
                route_id: None,
                is_public: true,
                started_at: now,
                ended_at: Some(now),
                moving_time_s: summary.moving_time_s,
                total_distance_m: summary.total_distance_m,
                elevation_gain_m: summary.elevation_gain_m,
                avg_pace_sec_per_km: Some(summary.avg_pace_sec_per_km),
                points: vec![],
                created_at: now,
            })
        };
        Box::pin(futures::future::ready(result))
    }

    fn delete_session<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<()>> {
        self.deletes.lock().unwrap().push(session_id.to_string());
        let result = if self.fail_delete.load(Ordering::SeqCst) {
            Err(Self::failure("delete"))
        } else {
            Ok(())
        };
        Box::pin(futures::future::ready(result))
    }
}

/// A controller wired to mock collaborators.
pub struct Harness {
    pub source: Arc<ChannelPositionSource>,
    pub backend: Arc<MockBackend>,
    pub store: Arc<MemorySessionStore>,
    pub controller: TrackingController,
    pub events: broadcast::Receiver<TrackingEvent>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_backend(MockBackend::new())
    }

    pub fn with_backend(backend: Arc<MockBackend>) -> Self {
        init_logging();
        let source = Arc::new(ChannelPositionSource::new(64));
        let store = Arc::new(MemorySessionStore::new());
        let controller = TrackingController::spawn(
            TrackingConfig::default(),
            source.clone(),
            backend.clone(),
            store.clone(),
        )
        .expect("default config is valid");
        let events = controller.subscribe();
        Self {
            source,
            backend,
            store,
            controller,
            events,
        }
    }

    /// Push `count` fixes spaced ~11m apart along the equator, starting at `first`.
    pub fn walk(&self, first: u32, count: u32) {
        for i in first..first + count {
            self.source.push_fix(fix(0.0, i as f64 * 0.0001));
        }
    }

    /// Everything published since the last drain.
    pub fn drain_events(&mut self) -> Vec<TrackingEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Route controller logs to the test output (`RUST_LOG=debug cargo test`).
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn fix(lat: f64, lng: f64) -> Fix {
    Fix::new(lat, lng, Utc::now())
}

pub async fn advance(millis: u64) {
    tokio::time::sleep(Duration::from_millis(millis)).await;
}
