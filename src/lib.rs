//! # Run Tracker
//!
//! On-device GPS tracking and live run metrics for a mobile running app.
//!
//! This library provides:
//! - A tracking session state machine (permission, subscription, stop, errors)
//! - Incremental distance, speed and pace from a noisy fix stream
//! - An observable metrics store for UI observers
//! - A run stopwatch independent of the GPS subscription
//!
//! The host app owns the platform location APIs and plugs them in through
//! the traits in [`platform`].
//!
//! ## Quick Start
//!
//! ```rust
//! use run_tracker::{LocationFix, MetricsAccumulator};
//!
//! let mut metrics = MetricsAccumulator::new();
//! let first = LocationFix::new(37.3320, -122.0312, 0).with_speed(2.5);
//! let second = LocationFix::new(37.3321, -122.0312, 5_000).with_speed(2.6);
//!
//! metrics.ingest(&first, 0);
//! let snapshot = metrics.ingest(&second, 5);
//! println!(
//!     "{:.1}m at {:.2} km/h",
//!     snapshot.total_distance_m, snapshot.current_speed_kmh
//! );
//! ```

use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{
    classify_platform_error, ErrorKind, PlatformError, Result, TrackingError, UserGuidance,
};

// Distance and unit conversions
pub mod geo_utils;
pub use geo_utils::{haversine_distance, pace_min_per_km, polyline_length, speed_kmh};

// Update cadence and filtering
pub mod config;
pub use config::{AccuracyFilter, AccuracyTier, TrackerConfig, UpdateConfig};

// Host-provided interfaces
pub mod platform;
pub use platform::{
    AuthorizationResponse, LocationPlatform, RunProgressListener, SettingsLauncher, Subscription,
};

// Permission gate
pub mod permission;
pub use permission::{PermissionCheck, PermissionGate, PermissionStatus};

// Run stopwatch
pub mod clock;
pub use clock::{ManualTimeSource, SessionClock, SystemTimeSource, TimeSource};

// Live metrics and observable store
pub mod metrics;
pub use metrics::{MetricsAccumulator, MetricsSnapshot, MetricsStore, TrackerState};

// Route history and run summary
pub mod route;
pub use route::{Route, RunSummary};

// Tracking session state machine
pub mod session;
pub use session::{FixSink, SessionState, TrackSession, TrackSessionBuilder};

/// Initialize logging for Android. Safe to call more than once.
#[cfg(target_os = "android")]
pub fn init_logging() {
    use android_logger::Config;
    use log::LevelFilter;

    android_logger::init_once(
        Config::default()
            .with_max_level(LevelFilter::Debug)
            .with_tag("RunTracker"),
    );
}

#[cfg(not(target_os = "android"))]
pub fn init_logging() {
    // No-op on non-Android platforms
}

// ============================================================================
// Core Types
// ============================================================================

/// One location sample reported by the platform.
///
/// Optional fields are `None` when the platform did not report them;
/// a missing altitude is unknown, not zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    /// WGS84 degrees
    pub latitude: f64,
    /// WGS84 degrees
    pub longitude: f64,
    /// Meters
    pub altitude: Option<f64>,
    /// Hardware (Doppler) speed in m/s. Negative values mean unknown.
    pub speed_mps: Option<f64>,
    /// Degrees, 0-360
    pub heading_degrees: Option<f64>,
    /// Radius of the 68% confidence circle in meters
    pub horizontal_accuracy_m: Option<f64>,
    /// Unix milliseconds, non-decreasing within a session
    pub timestamp_ms: i64,
}

impl LocationFix {
    /// Create a fix with only a position and timestamp.
    pub fn new(latitude: f64, longitude: f64, timestamp_ms: i64) -> Self {
        Self {
            latitude,
            longitude,
            altitude: None,
            speed_mps: None,
            heading_degrees: None,
            horizontal_accuracy_m: None,
            timestamp_ms,
        }
    }

    pub fn with_speed(mut self, speed_mps: f64) -> Self {
        self.speed_mps = Some(speed_mps);
        self
    }

    pub fn with_accuracy(mut self, horizontal_accuracy_m: f64) -> Self {
        self.horizontal_accuracy_m = Some(horizontal_accuracy_m);
        self
    }

    /// Hardware speed if it is usable: present, finite and not negative.
    pub fn instantaneous_speed(&self) -> Option<f64> {
        self.speed_mps.filter(|s| s.is_finite() && *s >= 0.0)
    }

    /// Check if the fix has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}
