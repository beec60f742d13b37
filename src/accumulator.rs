//! Accumulation state for one tracking session.
//!
//! Owns the accepted track, cumulative distance and elevation gain, elapsed
//! seconds and paused-time bookkeeping. Everything here is synchronous; the
//! controller feeds it fixes, ticks and pause/resume calls from its single
//! worker so no two mutations ever interleave.

use std::time::Duration;

use chrono::{DateTime, Utc};
use log::debug;
use tokio::time::Instant;

use crate::config::TrackingConfig;
use crate::geo_utils::haversine_distance;
use crate::{average_pace, Fix, GpsPoint, SessionSummary, TrackPoint};

/// Outcome of offering a fix to the accumulator.
#[derive(Debug, Clone, PartialEq)]
pub enum Acceptance {
    /// The fix became a new track point.
    Accepted {
        point: TrackPoint,
        /// Distance added by this point (0 for the first point).
        distance_delta_m: f64,
        /// Whether a previous point existed to measure from.
        moved: bool,
    },
    /// Closer than the movement threshold to the previous point.
    BelowThreshold { distance_m: f64 },
    /// Coordinates outside the valid range.
    Invalid,
    /// Tracking is paused.
    Paused,
}

/// Cumulative state of an active session.
#[derive(Debug, Clone)]
pub struct SessionAccumulator {
    min_movement_m: f64,
    started_at: DateTime<Utc>,
    points: Vec<TrackPoint>,
    distance_m: f64,
    elapsed_seconds: u64,
    elevation_gain_m: f64,
    last_elevation: Option<f64>,
    paused_duration: Duration,
    pause_started: Option<Instant>,
}

impl SessionAccumulator {
    pub fn new(config: &TrackingConfig, started_at: DateTime<Utc>) -> Self {
        Self {
            min_movement_m: config.min_movement_m,
            started_at,
            points: Vec::new(),
            distance_m: 0.0,
            elapsed_seconds: 0,
            elevation_gain_m: 0.0,
            last_elevation: None,
            paused_duration: Duration::ZERO,
            pause_started: None,
        }
    }

    /// Offer a fix. Only accepted fixes change any state.
    pub fn accept(&mut self, fix: &Fix) -> Acceptance {
        if self.is_paused() {
            return Acceptance::Paused;
        }
        if !fix.point().is_valid() {
            debug!(
                "[SessionAccumulator] Dropping fix with invalid coordinates ({}, {})",
                fix.latitude, fix.longitude
            );
            return Acceptance::Invalid;
        }

        let previous = self.points.last().map(TrackPoint::point);
        let distance_m = previous
            .map(|p| haversine_distance(&p, &fix.point()))
            .unwrap_or(0.0);

        if previous.is_some() && distance_m < self.min_movement_m {
            debug!(
                "[SessionAccumulator] Rejecting jitter: {:.2}m < {:.2}m",
                distance_m, self.min_movement_m
            );
            return Acceptance::BelowThreshold { distance_m };
        }

        self.distance_m += distance_m;

        // Climb only: descents never subtract from the gain
        let elevation = fix.altitude.filter(|a| *a > 0.0);
        if let Some(altitude) = elevation {
            if let Some(last) = self.last_elevation {
                if altitude > last {
                    self.elevation_gain_m += altitude - last;
                }
            }
            self.last_elevation = Some(altitude);
        }

        let point = TrackPoint {
            sequence: self.points.len() as u32,
            latitude: fix.latitude,
            longitude: fix.longitude,
            elevation,
            speed: fix.speed.filter(|s| *s >= 0.0),
            timestamp: fix.timestamp,
        };
        self.points.push(point.clone());

        Acceptance::Accepted {
            point,
            distance_delta_m: distance_m,
            moved: previous.is_some(),
        }
    }

    /// Advance elapsed time by one tick. Returns the new elapsed seconds, or
    /// `None` while paused.
    pub fn tick(&mut self) -> Option<u64> {
        if self.is_paused() {
            return None;
        }
        self.elapsed_seconds += 1;
        Some(self.elapsed_seconds)
    }

    /// Start a pause. Returns false if already paused.
    pub fn pause(&mut self, now: Instant) -> bool {
        if self.pause_started.is_some() {
            return false;
        }
        self.pause_started = Some(now);
        true
    }

    /// End a pause, returning its length.
    pub fn resume(&mut self, now: Instant) -> Option<Duration> {
        let started = self.pause_started.take()?;
        let paused = now.saturating_duration_since(started);
        self.paused_duration += paused;
        Some(paused)
    }

    pub fn is_paused(&self) -> bool {
        self.pause_started.is_some()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn points(&self) -> &[TrackPoint] {
        &self.points
    }

    pub fn into_points(self) -> Vec<TrackPoint> {
        self.points
    }

    pub fn last_point(&self) -> Option<GpsPoint> {
        self.points.last().map(TrackPoint::point)
    }

    pub fn point_count(&self) -> usize {
        self.points.len()
    }

    pub fn distance_m(&self) -> f64 {
        self.distance_m
    }

    pub fn elapsed_seconds(&self) -> u64 {
        self.elapsed_seconds
    }

    pub fn elevation_gain_m(&self) -> f64 {
        self.elevation_gain_m
    }

    /// Total completed pause time (an ongoing pause is not included).
    pub fn paused_duration(&self) -> Duration {
        self.paused_duration
    }

    pub fn average_pace(&self) -> f64 {
        average_pace(self.elapsed_seconds, self.distance_m)
    }

    /// Final aggregates for ending the session.
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            moving_time_s: self.elapsed_seconds,
            total_distance_m: self.distance_m,
            elevation_gain_m: (self.elevation_gain_m > 0.0).then_some(self.elevation_gain_m),
            avg_pace_sec_per_km: self.average_pace(),
        }
    }
}
