//! Progress notifications published by the controller.
//!
//! Events go out on a broadcast channel so any number of listeners (UI, a
//! logger, a test harness) can observe the same session.

use serde::{Deserialize, Serialize};

use crate::error::NonFatalError;
use crate::GpsPoint;

/// Externally visible lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum SessionState {
    Idle,
    Tracking,
    Paused,
}

/// Where a finished session ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum SaveLocation {
    /// Finalized on the backend
    Remote,
    /// Kept in the local fallback store
    Local,
}

/// One progress notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TrackingEvent {
    /// A fix was accepted as a track point. Speed is 0 below the stationary floor.
    Location { point: GpsPoint, speed_mps: f64 },
    /// Elapsed moving seconds advanced.
    Elapsed { seconds: u64 },
    /// Cumulative distance changed.
    Distance { meters: f64 },
    /// The position stream reported an error. Tracking keeps running.
    Error { message: String },
    /// A failure was recovered locally.
    NonFatal(NonFatalError),
    StateChanged(SessionState),
    SessionSaved {
        session_id: String,
        location: SaveLocation,
    },
}
