//! Tracking configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackingError};

/// Configuration for the tracking pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Minimum displacement from the previous accepted point for a fix to count.
    /// Rejects GPS jitter at rest. Default: 2.0 meters
    pub min_movement_m: f64,

    /// Speeds below this are reported as stationary.
    /// Default: 0.5 m/s
    pub stationary_speed_mps: f64,

    /// Below this distance pace is shown as a placeholder.
    /// Default: 10.0 meters
    pub min_pace_distance_m: f64,

    /// Period of the elapsed-time timer.
    /// Default: 1000 ms
    pub tick_interval_ms: u64,

    /// Period of the upload-flush timer.
    /// Default: 30000 ms
    pub flush_interval_ms: u64,

    /// Minimum number of pending points before a timed flush uploads anything.
    /// Default: 5
    pub min_batch_size: usize,

    /// Upper bound on the one-shot position fetch at start.
    /// Default: 10000 ms
    pub current_position_timeout_ms: u64,

    /// Capacity of the progress event channel. Slow listeners lag, they never block tracking.
    /// Default: 256
    pub event_capacity: usize,

    /// Capacity of the controller command channel.
    /// Default: 32
    pub command_capacity: usize,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            min_movement_m: 2.0,
            stationary_speed_mps: 0.5,
            min_pace_distance_m: 10.0,
            tick_interval_ms: 1_000,
            flush_interval_ms: 30_000,
            min_batch_size: 5,
            current_position_timeout_ms: 10_000,
            event_capacity: 256,
            command_capacity: 32,
        }
    }
}

impl TrackingConfig {
    /// Parse a (possibly partial) JSON configuration. Missing fields take defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: TrackingConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every value is usable.
    pub fn validate(&self) -> Result<()> {
        if !(self.min_movement_m >= 0.0) {
            return Err(TrackingError::config("min_movement_m must be >= 0"));
        }
        if !(self.stationary_speed_mps >= 0.0) {
            return Err(TrackingError::config("stationary_speed_mps must be >= 0"));
        }
        if !(self.min_pace_distance_m >= 0.0) {
            return Err(TrackingError::config("min_pace_distance_m must be >= 0"));
        }
        if self.tick_interval_ms == 0 || self.flush_interval_ms == 0 {
            return Err(TrackingError::config("timer intervals must be positive"));
        }
        if self.min_batch_size == 0 {
            return Err(TrackingError::config("min_batch_size must be at least 1"));
        }
        if self.event_capacity == 0 || self.command_capacity == 0 {
            return Err(TrackingError::config("channel capacities must be positive"));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn current_position_timeout(&self) -> Duration {
        Duration::from_millis(self.current_position_timeout_ms)
    }
}
