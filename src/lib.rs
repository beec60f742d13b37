//! # Run Tracker
//!
//! Live run-session tracking for a social running app.
//!
//! This library provides:
//! - A session state machine (idle → tracking → paused → stopped/discarded)
//! - Distance/elevation accumulation over noisy GPS fixes with a movement filter
//! - Incremental, retryable, batched upload of track points to a session backend
//! - A local fallback store for sessions the backend could not accept
//!
//! ## Features
//!
//! - **`http`** - REST session backend client (reqwest)
//! - **`persistence`** - SQLite fallback session store
//! - **`ffi`** - FFI bindings for mobile platforms (iOS/Android)
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use run_tracker::{
//!     ChannelPositionSource, MemorySessionStore, TrackingConfig, TrackingController,
//! };
//!
//! let source = Arc::new(ChannelPositionSource::new(64));
//! let controller = TrackingController::spawn(
//!     TrackingConfig::default(),
//!     source.clone(),
//!     backend,
//!     Arc::new(MemorySessionStore::new()),
//! )?;
//!
//! let mut events = controller.subscribe();
//! controller.start(None, true, false).await?;
//! // ... host pushes fixes into `source` ...
//! let session = controller.stop(true).await?;
//! controller.shutdown().await;
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{NonFatalError, NonFatalKind, Result, TrackingError};

// Tunables for filtering, timers and batching
pub mod config;
pub use config::TrackingConfig;

// Geographic utilities (distance)
pub mod geo_utils;

// Position source contract and channel-fed implementation
pub mod source;
pub use source::{ChannelPositionSource, PositionSource, PositionStream};

// Remote session backend contract
pub mod backend;
pub use backend::SessionBackend;

// HTTP session backend
#[cfg(feature = "http")]
pub mod http;
#[cfg(feature = "http")]
pub use http::HttpSessionBackend;

// Local fallback store
pub mod store;
pub use store::{LocalSessionStore, MemorySessionStore};

#[cfg(feature = "persistence")]
pub mod persistence;
#[cfg(feature = "persistence")]
pub use persistence::SqliteSessionStore;

// Accumulation state and filters
pub mod accumulator;
pub use accumulator::{Acceptance, SessionAccumulator};

// Pending-upload queue
pub mod upload;
pub use upload::UploadQueue;

// Progress notifications
pub mod events;
pub use events::{SaveLocation, SessionState, TrackingEvent};

// Session lifecycle owner
pub mod controller;
pub use controller::{TrackingController, TrackingSnapshot};

// Presentation helpers
pub mod format;
pub use format::{format_distance, format_duration, format_pace, format_speed};

// Human labels for finished runs
pub mod naming;
pub use naming::suggest_run_name;

// FFI bindings for mobile platforms (iOS/Android)
#[cfg(feature = "ffi")]
pub mod ffi;

#[cfg(feature = "ffi")]
uniffi::setup_scaffolding!();

/// Initialize logging for Android (only used in FFI)
#[cfg(all(feature = "ffi", target_os = "android"))]
pub(crate) fn init_logging() {
    use android_logger::Config;
    use log::LevelFilter;

    android_logger::init_once(
        Config::default()
            .with_max_level(LevelFilter::Debug)
            .with_tag("RunTracker"),
    );
}

#[cfg(all(feature = "ffi", not(target_os = "android")))]
pub(crate) fn init_logging() {
    // No-op on non-Android platforms
}

// ============================================================================
// Core Types
// ============================================================================

/// A GPS coordinate with latitude and longitude.
///
/// # Example
/// ```
/// use run_tracker::GpsPoint;
/// let point = GpsPoint::new(51.5074, -0.1278); // London
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct GpsPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsPoint {
    /// Create a new GPS point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

/// One raw positional sample from the position source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fix {
    pub latitude: f64,
    pub longitude: f64,
    /// Altitude in meters; platforms report 0 or a negative value when unknown
    pub altitude: Option<f64>,
    /// Instantaneous speed in m/s
    pub speed: Option<f64>,
    /// Horizontal accuracy in meters
    pub accuracy: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl Fix {
    /// Create a fix with only a coordinate and a capture time.
    pub fn new(latitude: f64, longitude: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            latitude,
            longitude,
            altitude: None,
            speed: None,
            accuracy: None,
            timestamp,
        }
    }

    pub fn with_altitude(mut self, altitude: f64) -> Self {
        self.altitude = Some(altitude);
        self
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = Some(speed);
        self
    }

    pub fn point(&self) -> GpsPoint {
        GpsPoint::new(self.latitude, self.longitude)
    }
}

/// An accepted, sequenced sample of a session's trajectory.
///
/// Sequence numbers are contiguous per session starting at 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackPoint {
    pub sequence: u32,
    pub latitude: f64,
    pub longitude: f64,
    pub elevation: Option<f64>,
    /// Non-negative speed in m/s, absent when the fix carried none
    pub speed: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl TrackPoint {
    pub fn point(&self) -> GpsPoint {
        GpsPoint::new(self.latitude, self.longitude)
    }
}

/// Reference to a session created on the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRef {
    pub id: String,
}

/// Final aggregates sent to the backend when a session ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub moving_time_s: u64,
    pub total_distance_m: f64,
    pub elevation_gain_m: Option<f64>,
    pub avg_pace_sec_per_km: f64,
}

/// The aggregate record of one tracking episode, remote or local.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSession {
    /// Backend identifier, or a locally generated one for fallback records
    pub id: String,
    pub route_id: Option<String>,
    pub is_public: bool,
    pub started_at: DateTime<Utc>,
    /// Present iff the session has been stopped
    pub ended_at: Option<DateTime<Utc>>,
    /// Moving time; paused intervals are excluded
    pub moving_time_s: u64,
    pub total_distance_m: f64,
    pub elevation_gain_m: Option<f64>,
    pub avg_pace_sec_per_km: Option<f64>,
    #[serde(default)]
    pub points: Vec<TrackPoint>,
    pub created_at: DateTime<Utc>,
}

impl RunSession {
    /// Whether the session has been finalized.
    pub fn is_finished(&self) -> bool {
        self.ended_at.is_some()
    }

    /// First and last coordinates of the trajectory.
    pub fn endpoints(&self) -> Option<(GpsPoint, GpsPoint)> {
        let first = self.points.first()?;
        let last = self.points.last()?;
        Some((first.point(), last.point()))
    }
}

/// Average pace in seconds per kilometer; 0 when no distance was covered.
pub fn average_pace(elapsed_seconds: u64, distance_m: f64) -> f64 {
    if distance_m <= 0.0 {
        return 0.0;
    }
    elapsed_seconds as f64 / (distance_m / 1000.0)
}
