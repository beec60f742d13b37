//! Presentation helpers for live and finished sessions.
//!
//! Pure functions over already-valid numeric state.

/// Placeholder shown while too little distance is covered for a stable pace.
pub const PACE_PLACEHOLDER: &str = "--:--/km";

/// Minimum distance before pace is shown, in meters.
pub const MIN_PACE_DISTANCE_M: f64 = 10.0;

/// Speeds below this are shown as stationary, in m/s.
pub const STATIONARY_SPEED_MPS: f64 = 0.5;

/// `"2.31 km"` once at least a kilometer is covered, otherwise `"850 m"`.
pub fn format_distance(meters: f64) -> String {
    let whole = meters.max(0.0).round();
    if whole >= 1000.0 {
        format!("{:.2} km", meters / 1000.0)
    } else {
        format!("{} m", whole as u64)
    }
}

/// `H:MM:SS`, or `MM:SS` below one hour.
pub fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    let mins = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, mins, secs)
    } else {
        format!("{:02}:{:02}", mins, secs)
    }
}

/// `MM:SS/km` from elapsed time and distance, or [`PACE_PLACEHOLDER`] under
/// [`MIN_PACE_DISTANCE_M`].
pub fn format_pace(elapsed_seconds: u64, distance_m: f64) -> String {
    format_pace_with_min(elapsed_seconds, distance_m, MIN_PACE_DISTANCE_M)
}

/// [`format_pace`] with a custom minimum distance.
pub fn format_pace_with_min(elapsed_seconds: u64, distance_m: f64, min_distance_m: f64) -> String {
    if distance_m < min_distance_m || distance_m <= 0.0 {
        return PACE_PLACEHOLDER.to_string();
    }
    let seconds_per_km = (elapsed_seconds as f64 / (distance_m / 1000.0)).round() as u64;
    format!("{:02}:{:02}/km", seconds_per_km / 60, seconds_per_km % 60)
}

/// Speed in km/h with one decimal; `"0.0 km/h"` under [`STATIONARY_SPEED_MPS`].
pub fn format_speed(meters_per_second: f64) -> String {
    format!("{:.1} km/h", display_speed(meters_per_second, STATIONARY_SPEED_MPS) * 3.6)
}

/// Speed with anything under the floor (or not a number) reported as 0.
pub fn display_speed(meters_per_second: f64, floor_mps: f64) -> f64 {
    if meters_per_second.is_nan() || meters_per_second < floor_mps {
        0.0
    } else {
        meters_per_second
    }
}
