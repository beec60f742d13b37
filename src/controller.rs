//! # Tracking Controller
//!
//! Owns the lifecycle of one run session at a time.
//!
//! ## Architecture
//!
//! [`TrackingController`] is a cheap handle; all state lives in a worker task
//! that is the single owner of the accumulation state and the upload queue.
//! The worker multiplexes four inputs onto one loop:
//! - lifecycle commands from the handle
//! - the position stream
//! - the 1 Hz elapsed-time timer
//! - the upload-flush timer
//!
//! so filtering, accumulation and queue draining never interleave. Upload
//! calls run on their own task and report back to the loop; fixes keep being
//! accepted into the queue while a batch is in flight.
//!
//! ## Teardown
//!
//! Call [`TrackingController::shutdown`] before releasing the controller. If the
//! handle is dropped instead, the worker notices the closed command channel and
//! runs the same discard cleanup, but nothing waits for it to finish.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use uuid::Uuid;

use crate::accumulator::{Acceptance, SessionAccumulator};
use crate::backend::SessionBackend;
use crate::config::TrackingConfig;
use crate::error::{NonFatalError, NonFatalKind, Result, TrackingError};
use crate::events::{SaveLocation, SessionState, TrackingEvent};
use crate::format::{display_speed, format_distance, format_duration, format_pace_with_min};
use crate::source::{PositionSource, PositionStream};
use crate::store::LocalSessionStore;
use crate::upload::UploadQueue;
use crate::{average_pace, Fix, GpsPoint, RunSession, SessionSummary, TrackPoint};

// ============================================================================
// Snapshot
// ============================================================================

/// Point-in-time view of the controller's progress.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingSnapshot {
    pub state: SessionState,
    /// Backend session id; `None` when idle or running in degraded mode
    pub session_id: Option<String>,
    pub elapsed_seconds: u64,
    pub distance_m: f64,
    pub elevation_gain_m: f64,
    pub point_count: usize,
    pub pending_uploads: usize,
    pub paused_duration: Duration,
    pub last_point: Option<GpsPoint>,
    min_pace_distance_m: f64,
}

impl TrackingSnapshot {
    fn idle(config: &TrackingConfig) -> Self {
        Self {
            state: SessionState::Idle,
            session_id: None,
            elapsed_seconds: 0,
            distance_m: 0.0,
            elevation_gain_m: 0.0,
            point_count: 0,
            pending_uploads: 0,
            paused_duration: Duration::ZERO,
            last_point: None,
            min_pace_distance_m: config.min_pace_distance_m,
        }
    }

    pub fn formatted_distance(&self) -> String {
        format_distance(self.distance_m)
    }

    pub fn formatted_duration(&self) -> String {
        format_duration(self.elapsed_seconds)
    }

    pub fn formatted_pace(&self) -> String {
        format_pace_with_min(self.elapsed_seconds, self.distance_m, self.min_pace_distance_m)
    }

    /// Average pace in seconds per kilometer.
    pub fn average_pace(&self) -> f64 {
        average_pace(self.elapsed_seconds, self.distance_m)
    }
}

// ============================================================================
// Handle
// ============================================================================

enum Command {
    Start {
        route_id: Option<String>,
        is_public: bool,
        background_mode: bool,
        reply: oneshot::Sender<bool>,
    },
    Pause {
        reply: oneshot::Sender<bool>,
    },
    Resume {
        reply: oneshot::Sender<bool>,
    },
    Stop {
        save: bool,
        reply: oneshot::Sender<Option<RunSession>>,
    },
    Discard {
        reply: oneshot::Sender<()>,
    },
    Snapshot {
        reply: oneshot::Sender<TrackingSnapshot>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to a running tracking worker.
pub struct TrackingController {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<TrackingEvent>,
    worker: JoinHandle<()>,
}

impl TrackingController {
    /// Validate the configuration and spawn the worker on the current tokio runtime.
    pub fn spawn(
        config: TrackingConfig,
        source: Arc<dyn PositionSource>,
        backend: Arc<dyn SessionBackend>,
        store: Arc<dyn LocalSessionStore>,
    ) -> Result<Self> {
        config.validate()?;

        let (command_tx, command_rx) = mpsc::channel(config.command_capacity);
        let (events, _) = broadcast::channel(config.event_capacity);

        let worker = SessionWorker {
            config,
            source,
            backend,
            store,
            events: events.clone(),
            session: None,
            subscription: None,
            ticker: None,
            flusher: None,
            in_flight: None,
        };
        let worker = tokio::spawn(worker.run(command_rx));

        Ok(Self {
            commands: command_tx,
            events,
            worker,
        })
    }

    /// Register a new progress listener.
    pub fn subscribe(&self) -> broadcast::Receiver<TrackingEvent> {
        self.events.subscribe()
    }

    /// Begin a session. Returns false if one is already active.
    pub async fn start(
        &self,
        route_id: Option<String>,
        is_public: bool,
        background_mode: bool,
    ) -> Result<bool> {
        self.request(|reply| Command::Start {
            route_id,
            is_public,
            background_mode,
            reply,
        })
        .await
    }

    /// Pause tracking. Returns false unless currently tracking.
    pub async fn pause(&self) -> Result<bool> {
        self.request(|reply| Command::Pause { reply }).await
    }

    /// Resume a paused session. Returns false unless currently paused.
    pub async fn resume(&self) -> Result<bool> {
        self.request(|reply| Command::Resume { reply }).await
    }

    /// Finish the session.
    ///
    /// With `save`, pending points are flushed and the session is ended on the
    /// backend, falling back to the local store if that fails; a session is
    /// returned either way. Without `save`, everything is dropped and `None` is
    /// returned. Also `None` when no session was active.
    pub async fn stop(&self, save: bool) -> Result<Option<RunSession>> {
        self.request(|reply| Command::Stop { save, reply }).await
    }

    /// Abandon the session, deleting it remotely on a best-effort basis.
    pub async fn discard(&self) -> Result<()> {
        self.request(|reply| Command::Discard { reply }).await
    }

    pub async fn snapshot(&self) -> Result<TrackingSnapshot> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Discard any active session and stop the worker.
    pub async fn shutdown(self) {
        let (reply, done) = oneshot::channel();
        if self.commands.send(Command::Shutdown { reply }).await.is_ok() {
            let _ = done.await;
        }
        if let Err(e) = self.worker.await {
            warn!("[TrackingController] Worker ended abnormally: {}", e);
        }
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| TrackingError::ControllerClosed)?;
        response.await.map_err(|_| TrackingError::ControllerClosed)
    }
}

// ============================================================================
// Worker
// ============================================================================

struct FlushOutcome {
    batch: Vec<TrackPoint>,
    result: Result<()>,
}

/// Everything that exists only while a session is active.
struct ActiveSession {
    /// Set once at start; `None` in degraded mode
    remote_id: Option<String>,
    accumulator: SessionAccumulator,
    uploads: UploadQueue,
}

struct SessionWorker {
    config: TrackingConfig,
    source: Arc<dyn PositionSource>,
    backend: Arc<dyn SessionBackend>,
    store: Arc<dyn LocalSessionStore>,
    events: broadcast::Sender<TrackingEvent>,

    session: Option<ActiveSession>,

    // Cancelled together on every terminal transition
    subscription: Option<PositionStream>,
    ticker: Option<Interval>,
    flusher: Option<Interval>,
    in_flight: Option<JoinHandle<FlushOutcome>>,
}

impl SessionWorker {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        loop {
            tokio::select! {
                biased;

                joined = join_flush(&mut self.in_flight) => {
                    self.in_flight = None;
                    self.finish_flush(joined);
                }
                update = next_update(&mut self.subscription) => self.handle_update(update),
                _ = next_tick(&mut self.ticker) => self.handle_tick(),
                _ = next_tick(&mut self.flusher) => self.begin_flush(),
                command = commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        self.teardown().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => {
                        self.teardown().await;
                        break;
                    }
                },
            }
        }
        debug!("[TrackingController] Worker stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start {
                route_id,
                is_public,
                background_mode,
                reply,
            } => {
                let started = self.start(route_id, is_public, background_mode).await;
                let _ = reply.send(started);
            }
            Command::Pause { reply } => {
                let _ = reply.send(self.pause());
            }
            Command::Resume { reply } => {
                let _ = reply.send(self.resume());
            }
            Command::Stop { save, reply } => {
                let session = self.stop(save).await;
                let _ = reply.send(session);
            }
            Command::Discard { reply } => {
                self.discard().await;
                let _ = reply.send(());
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            Command::Shutdown { reply } => {
                // Handled by the run loop
                let _ = reply.send(());
            }
        }
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    async fn start(
        &mut self,
        route_id: Option<String>,
        is_public: bool,
        background_mode: bool,
    ) -> bool {
        if self.session.is_some() {
            debug!("[TrackingController] start ignored, already tracking");
            return false;
        }

        let remote_id = match self
            .backend
            .create_session(route_id.as_deref(), is_public)
            .await
        {
            Ok(session_ref) => {
                info!("[TrackingController] Remote session {} created", session_ref.id);
                Some(session_ref.id)
            }
            Err(e) => {
                warn!(
                    "[TrackingController] Session creation failed, tracking without remote session: {}",
                    e
                );
                self.non_fatal(NonFatalKind::SessionCreate, &e);
                None
            }
        };

        self.session = Some(ActiveSession {
            remote_id,
            accumulator: SessionAccumulator::new(&self.config, Utc::now()),
            uploads: UploadQueue::new(self.config.min_batch_size),
        });
        self.emit(TrackingEvent::StateChanged(SessionState::Tracking));

        match time::timeout(
            self.config.current_position_timeout(),
            self.source.current_position(),
        )
        .await
        {
            Ok(Some(fix)) => self.accept_fix(&fix),
            Ok(None) => debug!("[TrackingController] No current position at start"),
            Err(_) => {
                let e = TrackingError::position("current position request timed out");
                warn!("[TrackingController] {}", e);
                self.non_fatal(NonFatalKind::CurrentPosition, &e);
            }
        }

        self.subscription = Some(self.source.subscribe(background_mode));
        self.ticker = Some(interval_after(
            self.config.tick_interval(),
            MissedTickBehavior::Burst,
        ));
        self.flusher = Some(interval_after(
            self.config.flush_interval(),
            MissedTickBehavior::Skip,
        ));

        info!(
            "[TrackingController] Tracking started (route={:?}, public={}, background={})",
            route_id, is_public, background_mode
        );
        true
    }

    fn pause(&mut self) -> bool {
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        if !session.accumulator.pause(Instant::now()) {
            return false;
        }
        info!("[TrackingController] Paused");
        self.emit(TrackingEvent::StateChanged(SessionState::Paused));
        true
    }

    fn resume(&mut self) -> bool {
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        match session.accumulator.resume(Instant::now()) {
            Some(paused) => {
                info!("[TrackingController] Resumed after {:?}", paused);
                self.emit(TrackingEvent::StateChanged(SessionState::Tracking));
                true
            }
            None => false,
        }
    }

    async fn stop(&mut self, save: bool) -> Option<RunSession> {
        if self.session.is_none() {
            return None;
        }
        self.cancel_activity();

        if !save {
            if let Some(handle) = self.in_flight.take() {
                handle.abort();
            }
            self.session = None;
            info!("[TrackingController] Stopped without saving");
            self.emit(TrackingEvent::StateChanged(SessionState::Idle));
            return None;
        }

        // Let an in-flight batch settle so a failure is requeued before the final flush
        if let Some(handle) = self.in_flight.take() {
            let joined = handle.await;
            self.finish_flush(joined);
        }

        let mut session = self.session.take()?;
        session.accumulator.resume(Instant::now());
        let summary = session.accumulator.summary();
        let ended_at = Utc::now();

        let remote = match session.remote_id.clone() {
            Some(id) => self.finish_remote(&id, &mut session, &summary).await,
            None => None,
        };

        let result = match remote {
            Some(run) => {
                info!(
                    "[TrackingController] Session {} saved remotely ({:.0}m, {}s)",
                    run.id, summary.total_distance_m, summary.moving_time_s
                );
                self.emit(TrackingEvent::SessionSaved {
                    session_id: run.id.clone(),
                    location: SaveLocation::Remote,
                });
                run
            }
            None => self.save_locally(session, &summary, ended_at),
        };

        self.emit(TrackingEvent::StateChanged(SessionState::Idle));
        Some(result)
    }

    /// Final flush plus end call. `None` means the local fallback must be used.
    async fn finish_remote(
        &mut self,
        session_id: &str,
        session: &mut ActiveSession,
        summary: &SessionSummary,
    ) -> Option<RunSession> {
        let pending = session.uploads.take_all();
        if !pending.is_empty() {
            let result = if self.backend.has_credential() {
                self.backend.append_points(session_id, &pending).await
            } else {
                Err(TrackingError::backend("no access credential for final flush"))
            };
            if let Err(e) = result {
                warn!(
                    "[TrackingController] Final flush of {} points failed: {}",
                    pending.len(),
                    e
                );
                session.uploads.requeue(pending);
                self.non_fatal(NonFatalKind::Upload, &e);
                return None;
            }
            debug!("[TrackingController] Final flush of {} points", pending.len());
        }

        match self.backend.end_session(session_id, summary).await {
            Ok(run) => Some(run),
            Err(e) => {
                warn!("[TrackingController] Ending session {} failed: {}", session_id, e);
                self.non_fatal(NonFatalKind::EndSession, &e);
                None
            }
        }
    }

    fn save_locally(
        &self,
        session: ActiveSession,
        summary: &SessionSummary,
        ended_at: chrono::DateTime<Utc>,
    ) -> RunSession {
        let run = RunSession {
            id: format!("local-{}", Uuid::new_v4()),
            route_id: None,
            is_public: false,
            started_at: session.accumulator.started_at(),
            ended_at: Some(ended_at),
            moving_time_s: summary.moving_time_s,
            total_distance_m: summary.total_distance_m,
            elevation_gain_m: summary.elevation_gain_m,
            avg_pace_sec_per_km: Some(summary.avg_pace_sec_per_km),
            points: session.accumulator.into_points(),
            created_at: ended_at,
        };

        match self.store.save(&run) {
            Ok(()) => {
                info!(
                    "[TrackingController] Session {} saved locally ({} points)",
                    run.id,
                    run.points.len()
                );
                self.emit(TrackingEvent::SessionSaved {
                    session_id: run.id.clone(),
                    location: SaveLocation::Local,
                });
            }
            Err(e) => {
                warn!("[TrackingController] Local save of {} failed: {}", run.id, e);
                self.non_fatal(NonFatalKind::LocalSave, &e);
            }
        }
        run
    }

    async fn discard(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        self.cancel_activity();
        if let Some(handle) = self.in_flight.take() {
            handle.abort();
        }

        if let Some(id) = session.remote_id {
            match self.backend.delete_session(&id).await {
                Ok(()) => info!("[TrackingController] Discarded session {}", id),
                Err(e) => {
                    warn!("[TrackingController] Delete of discarded session {} failed: {}", id, e);
                    self.non_fatal(NonFatalKind::Delete, &e);
                }
            }
        } else {
            info!("[TrackingController] Discarded session without remote id");
        }
        self.emit(TrackingEvent::StateChanged(SessionState::Idle));
    }

    async fn teardown(&mut self) {
        if self.session.is_some() {
            info!("[TrackingController] Released while tracking, discarding session");
            self.discard().await;
        }
    }

    /// Drop the position subscription and both timers.
    fn cancel_activity(&mut self) {
        self.subscription = None;
        self.ticker = None;
        self.flusher = None;
    }

    // ------------------------------------------------------------------------
    // Inputs
    // ------------------------------------------------------------------------

    fn handle_update(&mut self, update: Option<Result<Fix>>) {
        match update {
            Some(Ok(fix)) => self.accept_fix(&fix),
            Some(Err(e)) => {
                warn!("[TrackingController] Position stream error: {}", e);
                self.emit(TrackingEvent::Error {
                    message: e.to_string(),
                });
            }
            None => {
                warn!("[TrackingController] Position stream ended");
                self.subscription = None;
            }
        }
    }

    fn accept_fix(&mut self, fix: &Fix) {
        let (point, moved, distance_m) = {
            let Some(session) = self.session.as_mut() else {
                return;
            };
            match session.accumulator.accept(fix) {
                Acceptance::Accepted { point, moved, .. } => {
                    session.uploads.push(point.clone());
                    (point, moved, session.accumulator.distance_m())
                }
                other => {
                    debug!("[TrackingController] Fix not accepted: {:?}", other);
                    return;
                }
            }
        };

        if moved {
            self.emit(TrackingEvent::Distance { meters: distance_m });
        }
        let speed = display_speed(point.speed.unwrap_or(0.0), self.config.stationary_speed_mps);
        self.emit(TrackingEvent::Location {
            point: point.point(),
            speed_mps: speed,
        });
    }

    fn handle_tick(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if let Some(seconds) = session.accumulator.tick() {
            self.emit(TrackingEvent::Elapsed { seconds });
        }
    }

    /// Timer-driven flush. No-op without a remote id, without a credential,
    /// below the minimum batch size, or while a previous batch is in flight.
    fn begin_flush(&mut self) {
        if self.in_flight.is_some() {
            debug!("[TrackingController] Previous flush still in flight, skipping tick");
            return;
        }
        if !self.backend.has_credential() {
            debug!("[TrackingController] No access credential, skipping flush");
            return;
        }
        let backend = Arc::clone(&self.backend);
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let Some(session_id) = session.remote_id.clone() else {
            return;
        };
        let Some(batch) = session.uploads.take_batch() else {
            return;
        };

        debug!(
            "[TrackingController] Flushing {} points to {}",
            batch.len(),
            session_id
        );
        self.in_flight = Some(tokio::spawn(async move {
            let result = backend.append_points(&session_id, &batch).await;
            FlushOutcome { batch, result }
        }));
    }

    fn finish_flush(&mut self, joined: std::result::Result<FlushOutcome, JoinError>) {
        match joined {
            Ok(FlushOutcome {
                batch,
                result: Ok(()),
            }) => {
                info!("[TrackingController] Uploaded {} points", batch.len());
            }
            Ok(FlushOutcome {
                batch,
                result: Err(e),
            }) => {
                warn!(
                    "[TrackingController] Upload of {} points failed, requeueing: {}",
                    batch.len(),
                    e
                );
                if let Some(session) = self.session.as_mut() {
                    session.uploads.requeue(batch);
                }
                self.non_fatal(NonFatalKind::Upload, &e);
            }
            Err(e) => {
                warn!("[TrackingController] Upload task did not complete: {}", e);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Outputs
    // ------------------------------------------------------------------------

    fn snapshot(&self) -> TrackingSnapshot {
        let mut snapshot = TrackingSnapshot::idle(&self.config);
        if let Some(session) = &self.session {
            let acc = &session.accumulator;
            snapshot.state = if acc.is_paused() {
                SessionState::Paused
            } else {
                SessionState::Tracking
            };
            snapshot.session_id = session.remote_id.clone();
            snapshot.elapsed_seconds = acc.elapsed_seconds();
            snapshot.distance_m = acc.distance_m();
            snapshot.elevation_gain_m = acc.elevation_gain_m();
            snapshot.point_count = acc.point_count();
            snapshot.pending_uploads = session.uploads.len();
            snapshot.paused_duration = acc.paused_duration();
            snapshot.last_point = acc.last_point();
        }
        snapshot
    }

    fn emit(&self, event: TrackingEvent) {
        // No listeners is not an error
        let _ = self.events.send(event);
    }

    fn non_fatal(&self, kind: NonFatalKind, error: &TrackingError) {
        self.emit(TrackingEvent::NonFatal(NonFatalError::new(kind, error)));
    }
}

fn interval_after(period: Duration, behavior: MissedTickBehavior) -> Interval {
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(behavior);
    interval
}

async fn next_update(subscription: &mut Option<PositionStream>) -> Option<Result<Fix>> {
    match subscription {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn join_flush(
    handle: &mut Option<JoinHandle<FlushOutcome>>,
) -> std::result::Result<FlushOutcome, JoinError> {
    match handle {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}
