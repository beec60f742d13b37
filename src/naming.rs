//! Human-readable labels for finished runs.

use chrono::{DateTime, TimeZone, Timelike};

use crate::geo_utils::haversine_distance;
use crate::GpsPoint;

/// Start and end closer than this make the run a loop, in meters.
pub const LOOP_THRESHOLD_M: f64 = 200.0;

/// Suggest a name like `"Morning Run"` or `"Evening Loop Run"`.
///
/// The time of day is taken in the timezone of `start_time`, so pass a local
/// time to get a label that matches the runner's clock.
pub fn suggest_run_name<Tz: TimeZone>(
    start_time: &DateTime<Tz>,
    start: &GpsPoint,
    end: &GpsPoint,
) -> String {
    let period = match start_time.hour() {
        5..=11 => "Morning",
        12..=16 => "Afternoon",
        17..=20 => "Evening",
        _ => "Night",
    };

    if haversine_distance(start, end) <= LOOP_THRESHOLD_M {
        format!("{} Loop Run", period)
    } else {
        format!("{} Run", period)
    }
}
