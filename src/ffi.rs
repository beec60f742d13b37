//! FFI bindings for mobile platforms (iOS/Android).
//!
//! This module provides the UniFFI bindings that expose the tracking controller
//! to Kotlin and Swift. The host owns the platform location service and pushes
//! fixes into [`FfiTrackingSession`]; progress comes back through a
//! [`TrackingListener`] implemented on the host side.
//!
//! Timestamps cross the boundary as Unix milliseconds.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Local, TimeZone, Utc};
use log::{info, warn};
use tokio::runtime::Runtime;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::{
    format_distance, format_duration, format_pace, format_speed, init_logging, suggest_run_name,
    ChannelPositionSource, Fix, GpsPoint, HttpSessionBackend, NonFatalError, RunSession,
    SaveLocation, SessionState, SqliteSessionStore, TrackPoint, TrackingConfig, TrackingController,
    TrackingError, TrackingEvent, TrackingSnapshot,
};

// ============================================================================
// Listener Callback Interface
// ============================================================================

/// Callback interface for live tracking progress.
/// Implement this in Kotlin/Swift; calls arrive on a background thread.
#[uniffi::export(callback_interface)]
pub trait TrackingListener: Send + Sync {
    /// A fix was accepted. Speed is 0 when stationary.
    fn on_location(&self, point: GpsPoint, speed_mps: f64);
    fn on_elapsed(&self, seconds: u64);
    fn on_distance(&self, meters: f64);
    /// The location stream reported an error; tracking continues.
    fn on_error(&self, message: String);
    /// A recovered failure (upload retry pending, local fallback used, ...).
    fn on_non_fatal(&self, error: NonFatalError);
    fn on_state_changed(&self, state: SessionState);
    fn on_session_saved(&self, session_id: String, location: SaveLocation);
}

fn dispatch(listener: &dyn TrackingListener, event: TrackingEvent) {
    match event {
        TrackingEvent::Location { point, speed_mps } => listener.on_location(point, speed_mps),
        TrackingEvent::Elapsed { seconds } => listener.on_elapsed(seconds),
        TrackingEvent::Distance { meters } => listener.on_distance(meters),
        TrackingEvent::Error { message } => listener.on_error(message),
        TrackingEvent::NonFatal(error) => listener.on_non_fatal(error),
        TrackingEvent::StateChanged(state) => listener.on_state_changed(state),
        TrackingEvent::SessionSaved {
            session_id,
            location,
        } => listener.on_session_saved(session_id, location),
    }
}

// ============================================================================
// FFI Records
// ============================================================================

/// A location fix delivered by the host.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiFix {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
    pub speed: Option<f64>,
    pub accuracy: Option<f64>,
    pub timestamp_ms: i64,
}

impl From<FfiFix> for Fix {
    fn from(f: FfiFix) -> Self {
        Fix {
            latitude: f.latitude,
            longitude: f.longitude,
            altitude: f.altitude,
            speed: f.speed,
            accuracy: f.accuracy,
            timestamp: from_millis(f.timestamp_ms),
        }
    }
}

#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiTrackPoint {
    pub sequence: u32,
    pub latitude: f64,
    pub longitude: f64,
    pub elevation: Option<f64>,
    pub speed: Option<f64>,
    pub timestamp_ms: i64,
}

impl From<TrackPoint> for FfiTrackPoint {
    fn from(p: TrackPoint) -> Self {
        Self {
            sequence: p.sequence,
            latitude: p.latitude,
            longitude: p.longitude,
            elevation: p.elevation,
            speed: p.speed,
            timestamp_ms: p.timestamp.timestamp_millis(),
        }
    }
}

#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiRunSession {
    pub id: String,
    pub route_id: Option<String>,
    pub is_public: bool,
    pub started_at_ms: i64,
    pub ended_at_ms: Option<i64>,
    pub moving_time_s: u64,
    pub total_distance_m: f64,
    pub elevation_gain_m: Option<f64>,
    pub avg_pace_sec_per_km: Option<f64>,
    pub points: Vec<FfiTrackPoint>,
    pub created_at_ms: i64,
}

impl From<RunSession> for FfiRunSession {
    fn from(s: RunSession) -> Self {
        Self {
            id: s.id,
            route_id: s.route_id,
            is_public: s.is_public,
            started_at_ms: s.started_at.timestamp_millis(),
            ended_at_ms: s.ended_at.map(|t| t.timestamp_millis()),
            moving_time_s: s.moving_time_s,
            total_distance_m: s.total_distance_m,
            elevation_gain_m: s.elevation_gain_m,
            avg_pace_sec_per_km: s.avg_pace_sec_per_km,
            points: s.points.into_iter().map(FfiTrackPoint::from).collect(),
            created_at_ms: s.created_at.timestamp_millis(),
        }
    }
}

/// Live progress with display strings ready for the UI.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiTrackingSnapshot {
    pub state: SessionState,
    pub session_id: Option<String>,
    pub elapsed_seconds: u64,
    pub distance_m: f64,
    pub elevation_gain_m: f64,
    pub point_count: u32,
    pub pending_uploads: u32,
    pub distance_text: String,
    pub duration_text: String,
    pub pace_text: String,
}

impl From<TrackingSnapshot> for FfiTrackingSnapshot {
    fn from(s: TrackingSnapshot) -> Self {
        Self {
            distance_text: s.formatted_distance(),
            duration_text: s.formatted_duration(),
            pace_text: s.formatted_pace(),
            state: s.state,
            session_id: s.session_id,
            elapsed_seconds: s.elapsed_seconds,
            distance_m: s.distance_m,
            elevation_gain_m: s.elevation_gain_m,
            point_count: s.point_count as u32,
            pending_uploads: s.pending_uploads as u32,
        }
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
}

// ============================================================================
// Tracking Session Object
// ============================================================================

/// One tracking controller wired to the REST backend and an SQLite fallback store.
#[derive(uniffi::Object)]
pub struct FfiTrackingSession {
    runtime: Runtime,
    source: Arc<ChannelPositionSource>,
    backend: Arc<HttpSessionBackend>,
    store: Arc<SqliteSessionStore>,
    controller: Mutex<Option<TrackingController>>,
    listener_task: Mutex<Option<JoinHandle<()>>>,
}

#[uniffi::export]
impl FfiTrackingSession {
    /// Create a session controller.
    ///
    /// `config_json` overrides [`TrackingConfig`] fields; missing fields keep
    /// their defaults.
    #[uniffi::constructor]
    pub fn new(
        base_url: String,
        access_token: Option<String>,
        db_path: String,
        config_json: Option<String>,
        listener: Box<dyn TrackingListener>,
    ) -> Result<Arc<Self>, TrackingError> {
        init_logging();

        let config = match config_json {
            Some(json) => TrackingConfig::from_json(&json)?,
            None => TrackingConfig::default(),
        };

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .map_err(|e| TrackingError::Internal {
                message: format!("failed to create runtime: {}", e),
            })?;

        let backend = Arc::new(HttpSessionBackend::new(&base_url)?);
        if let Some(token) = access_token {
            backend.set_access_token(token);
        }
        let store = Arc::new(SqliteSessionStore::new(&db_path)?);
        let source = Arc::new(ChannelPositionSource::default());

        let (controller, listener_task) = {
            let _guard = runtime.enter();
            let controller =
                TrackingController::spawn(config, source.clone(), backend.clone(), store.clone())?;
            let mut events = controller.subscribe();
            let listener_task = runtime.spawn(async move {
                loop {
                    match events.recv().await {
                        Ok(event) => dispatch(listener.as_ref(), event),
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("[FfiTrackingSession] Listener lagged, {} events dropped", skipped);
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            });
            (controller, listener_task)
        };

        info!("[FfiTrackingSession] Created for {} (store: {})", base_url, db_path);
        Ok(Arc::new(Self {
            runtime,
            source,
            backend,
            store,
            controller: Mutex::new(Some(controller)),
            listener_task: Mutex::new(Some(listener_task)),
        }))
    }

    /// Deliver a location fix from the platform.
    pub fn push_fix(&self, fix: FfiFix) {
        self.source.push_fix(fix.into());
    }

    /// Report a location stream failure from the platform.
    pub fn push_error(&self, message: String) {
        self.source.push_error(message);
    }

    /// Replace or clear the backend access token.
    pub fn set_access_token(&self, token: Option<String>) {
        match token {
            Some(token) => self.backend.set_access_token(token),
            None => self.backend.clear_access_token(),
        }
    }

    pub fn start(
        &self,
        route_id: Option<String>,
        is_public: bool,
        background_mode: bool,
    ) -> Result<bool, TrackingError> {
        let guard = self.lock_controller()?;
        let controller = guard.as_ref().ok_or(TrackingError::ControllerClosed)?;
        self.runtime
            .block_on(controller.start(route_id, is_public, background_mode))
    }

    pub fn pause(&self) -> Result<bool, TrackingError> {
        let guard = self.lock_controller()?;
        let controller = guard.as_ref().ok_or(TrackingError::ControllerClosed)?;
        self.runtime.block_on(controller.pause())
    }

    pub fn resume(&self) -> Result<bool, TrackingError> {
        let guard = self.lock_controller()?;
        let controller = guard.as_ref().ok_or(TrackingError::ControllerClosed)?;
        self.runtime.block_on(controller.resume())
    }

    pub fn stop(&self, save: bool) -> Result<Option<FfiRunSession>, TrackingError> {
        let guard = self.lock_controller()?;
        let controller = guard.as_ref().ok_or(TrackingError::ControllerClosed)?;
        let session = self.runtime.block_on(controller.stop(save))?;
        Ok(session.map(FfiRunSession::from))
    }

    pub fn discard(&self) -> Result<(), TrackingError> {
        let guard = self.lock_controller()?;
        let controller = guard.as_ref().ok_or(TrackingError::ControllerClosed)?;
        self.runtime.block_on(controller.discard())
    }

    pub fn snapshot(&self) -> Result<FfiTrackingSnapshot, TrackingError> {
        let guard = self.lock_controller()?;
        let controller = guard.as_ref().ok_or(TrackingError::ControllerClosed)?;
        let snapshot = self.runtime.block_on(controller.snapshot())?;
        Ok(snapshot.into())
    }

    /// Sessions saved locally because the backend could not accept them.
    pub fn local_sessions(&self) -> Result<Vec<FfiRunSession>, TrackingError> {
        Ok(self
            .store
            .list()?
            .into_iter()
            .map(FfiRunSession::from)
            .collect())
    }

    /// Forget a local session once the host has re-uploaded it.
    pub fn remove_local_session(&self, id: String) -> Result<bool, TrackingError> {
        self.store.remove(&id)
    }

    /// Discard any active session and stop the controller. Further calls fail.
    pub fn shutdown(&self) {
        let controller = self.controller.lock().ok().and_then(|mut c| c.take());
        if let Some(controller) = controller {
            self.runtime.block_on(controller.shutdown());
        }
        let listener_task = self.listener_task.lock().ok().and_then(|mut t| t.take());
        if let Some(task) = listener_task {
            // Ends once the controller's event channel closes
            let _ = self.runtime.block_on(task);
            info!("[FfiTrackingSession] Shut down");
        }
    }
}

impl Drop for FfiTrackingSession {
    /// Hosts that release the object without calling `shutdown` still get the
    /// active session discarded before the runtime goes away.
    fn drop(&mut self) {
        if tokio::runtime::Handle::try_current().is_ok() {
            // block_on would panic from inside another runtime
            warn!("[FfiTrackingSession] Dropped inside an async context, skipping shutdown");
            return;
        }
        self.shutdown();
    }
}

impl FfiTrackingSession {
    fn lock_controller(
        &self,
    ) -> Result<MutexGuard<'_, Option<TrackingController>>, TrackingError> {
        self.controller.lock().map_err(|_| TrackingError::Internal {
            message: "controller lock poisoned".to_string(),
        })
    }
}

// ============================================================================
// Formatting & Naming
// ============================================================================

#[uniffi::export]
pub fn ffi_format_distance(meters: f64) -> String {
    format_distance(meters)
}

#[uniffi::export]
pub fn ffi_format_duration(seconds: u64) -> String {
    format_duration(seconds)
}

#[uniffi::export]
pub fn ffi_format_pace(elapsed_seconds: u64, distance_m: f64) -> String {
    format_pace(elapsed_seconds, distance_m)
}

#[uniffi::export]
pub fn ffi_format_speed(meters_per_second: f64) -> String {
    format_speed(meters_per_second)
}

/// Suggest a run name using the device's local time of day.
#[uniffi::export]
pub fn ffi_suggest_run_name(start_time_ms: i64, start: GpsPoint, end: GpsPoint) -> String {
    let local = Local
        .timestamp_millis_opt(start_time_ms)
        .single()
        .unwrap_or_else(Local::now);
    suggest_run_name(&local, &start, &end)
}
