//! Geographic utilities and unit conversions.
//!
//! Pure functions only: great-circle distance between fixes and the
//! speed/pace conversions used for live metrics.

use crate::LocationFix;

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Meters per second to kilometers per hour.
pub const MPS_TO_KMH: f64 = 3.6;

/// Haversine great-circle distance between two fixes, in meters.
///
/// # Example
/// ```
/// use run_tracker::{LocationFix, geo_utils::haversine_distance};
///
/// let a = LocationFix::new(0.0, 0.0, 0);
/// let b = LocationFix::new(0.0, 1.0, 0);
/// let d = haversine_distance(&a, &b);
/// assert!((d - 111_195.0).abs() < 1.0);
/// ```
pub fn haversine_distance(a: &LocationFix, b: &LocationFix) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlat = (b.latitude - a.latitude).to_radians();
    let dlon = (b.longitude - a.longitude).to_radians();

    // Rounding can push h just past 1.0 for near-antipodal points
    let h = ((dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2))
        .clamp(0.0, 1.0);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_M * c
}

/// Total length of a sequence of fixes in meters, summed pairwise in order.
///
/// This is the full-history computation; live tracking keeps a running sum
/// instead, which must agree with this to floating-point tolerance.
pub fn polyline_length(fixes: &[LocationFix]) -> f64 {
    fixes
        .windows(2)
        .map(|pair| haversine_distance(&pair[0], &pair[1]))
        .sum()
}

/// Convert m/s to km/h, clamping negative and NaN input to zero.
pub fn speed_kmh(speed_mps: f64) -> f64 {
    (speed_mps * MPS_TO_KMH).max(0.0)
}

/// Pace in minutes per kilometer for a speed in m/s.
///
/// Returns `None` (undefined pace) when the speed is not positive and finite.
pub fn pace_min_per_km(speed_mps: f64) -> Option<f64> {
    if !speed_mps.is_finite() || speed_mps <= 0.0 {
        return None;
    }
    Some(60.0 / (speed_mps * MPS_TO_KMH))
}

/// Average speed in m/s over an elapsed time, zero when no time has passed.
pub fn average_speed_mps(distance_m: f64, elapsed_seconds: u64) -> f64 {
    if elapsed_seconds == 0 {
        return 0.0;
    }
    distance_m / elapsed_seconds as f64
}
