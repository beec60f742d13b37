//! Unified error handling for the run-tracker library.
//!
//! Fatal errors travel as [`TrackingError`] through [`Result`]. Failures the
//! controller recovers from on its own (a failed upload batch, a failed
//! discard-time delete, ...) are never returned to the caller; they are logged
//! and published on the event channel as a [`NonFatalError`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for run-tracker operations.
#[derive(Debug, Clone, PartialEq, Error)]
#[cfg_attr(feature = "ffi", derive(uniffi::Error))]
pub enum TrackingError {
    /// The session backend rejected or failed a call
    #[error("Backend error: {message}")]
    Backend {
        message: String,
        status_code: Option<u16>,
    },
    /// HTTP transport or status error
    #[error("HTTP error{}: {message}", .status_code.map(|c| format!(" ({})", c)).unwrap_or_default())]
    Http {
        message: String,
        status_code: Option<u16>,
    },
    /// Persistence/storage error
    #[error("Persistence error: {message}")]
    Persistence { message: String },
    /// The position source reported a stream-level failure
    #[error("Position stream error: {message}")]
    PositionStream { message: String },
    /// Configuration error
    #[error("Configuration error: {message}")]
    Config { message: String },
    /// Encoding or decoding failed
    #[error("Serialization error: {message}")]
    Serialization { message: String },
    /// The controller worker has shut down
    #[error("Tracking controller is closed")]
    ControllerClosed,
    /// Generic internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl TrackingError {
    /// Backend failure without an HTTP status.
    pub fn backend(message: impl Into<String>) -> Self {
        TrackingError::Backend {
            message: message.into(),
            status_code: None,
        }
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        TrackingError::Persistence {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        TrackingError::Config {
            message: message.into(),
        }
    }

    pub fn position(message: impl Into<String>) -> Self {
        TrackingError::PositionStream {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for TrackingError {
    fn from(e: serde_json::Error) -> Self {
        TrackingError::Serialization {
            message: e.to_string(),
        }
    }
}

#[cfg(feature = "persistence")]
impl From<rusqlite::Error> for TrackingError {
    fn from(e: rusqlite::Error) -> Self {
        TrackingError::Persistence {
            message: e.to_string(),
        }
    }
}

#[cfg(feature = "persistence")]
impl From<rmp_serde::encode::Error> for TrackingError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        TrackingError::Serialization {
            message: e.to_string(),
        }
    }
}

#[cfg(feature = "persistence")]
impl From<rmp_serde::decode::Error> for TrackingError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        TrackingError::Serialization {
            message: e.to_string(),
        }
    }
}

#[cfg(feature = "http")]
impl From<reqwest::Error> for TrackingError {
    fn from(e: reqwest::Error) -> Self {
        TrackingError::Http {
            status_code: e.status().map(|s| s.as_u16()),
            message: e.to_string(),
        }
    }
}

/// Result type alias for run-tracker operations.
pub type Result<T> = std::result::Result<T, TrackingError>;

/// Which recovered operation a [`NonFatalError`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum NonFatalKind {
    /// Backend session creation failed at start; tracking continues without a remote id
    SessionCreate,
    /// The start-time current-position fetch failed or timed out
    CurrentPosition,
    /// An upload batch failed and was requeued
    Upload,
    /// Ending the remote session failed; the local fallback is used
    EndSession,
    /// Saving to the local session store failed
    LocalSave,
    /// Best-effort delete of a discarded session failed
    Delete,
}

/// A failure that was recovered locally and only reported for observability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct NonFatalError {
    pub kind: NonFatalKind,
    pub message: String,
}

impl NonFatalError {
    pub fn new(kind: NonFatalKind, error: &TrackingError) -> Self {
        Self {
            kind,
            message: error.to_string(),
        }
    }
}
