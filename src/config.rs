//! Tracker configuration.
//!
//! The host picks an update cadence profile when starting a session; the
//! core never sniffs whether it is running against simulated location.

use serde::{Deserialize, Serialize};

/// Requested accuracy tier for platform location updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AccuracyTier {
    /// Best the device can do (GNSS). Used for all run tracking.
    #[default]
    Highest,
    Balanced,
    Low,
}

/// Subscription parameters handed to the platform location service.
///
/// The platform delivers a fix when EITHER `min_time_interval_ms` has passed
/// OR `min_distance_m` has been covered, whichever comes first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateConfig {
    /// Accuracy tier to request.
    /// Default: Highest
    pub accuracy: AccuracyTier,
    /// Minimum time between fixes in milliseconds.
    /// Default: 5000
    pub min_time_interval_ms: u64,
    /// Minimum distance between fixes in meters.
    /// Default: 10.0
    pub min_distance_m: f64,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            accuracy: AccuracyTier::Highest,
            min_time_interval_ms: 5_000,
            min_distance_m: 10.0,
        }
    }
}

impl UpdateConfig {
    /// Production cadence (5s / 10m).
    pub fn production() -> Self {
        Self::default()
    }

    /// Fast cadence (1s / 1m) for simulators and emulated location.
    pub fn simulated() -> Self {
        Self {
            accuracy: AccuracyTier::Highest,
            min_time_interval_ms: 1_000,
            min_distance_m: 1.0,
        }
    }
}

/// Optional stage that drops fixes whose reported accuracy is too poor.
///
/// Not installed by default: every fix is accepted unless the host opts in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccuracyFilter {
    /// Reject fixes whose 68% confidence radius exceeds this, in meters.
    pub max_horizontal_accuracy_m: f64,
    /// Whether fixes without any accuracy estimate are accepted.
    pub accept_unknown_accuracy: bool,
}

impl Default for AccuracyFilter {
    fn default() -> Self {
        Self {
            max_horizontal_accuracy_m: 50.0,
            accept_unknown_accuracy: true,
        }
    }
}

impl AccuracyFilter {
    /// Whether a fix with the given accuracy radius passes the filter.
    pub fn accepts(&self, horizontal_accuracy_m: Option<f64>) -> bool {
        match horizontal_accuracy_m {
            Some(acc) if acc.is_finite() && acc >= 0.0 => acc <= self.max_horizontal_accuracy_m,
            _ => self.accept_unknown_accuracy,
        }
    }
}

/// Complete tracker configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TrackerConfig {
    /// Cadence used by `TrackSession::start()`.
    pub update: UpdateConfig,
    /// Accuracy filter, `None` = accept every fix.
    #[serde(default)]
    pub accuracy_filter: Option<AccuracyFilter>,
}

impl TrackerConfig {
    /// Parse a configuration from the host's JSON.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Configuration using the simulated-location cadence.
    pub fn simulated() -> Self {
        Self {
            update: UpdateConfig::simulated(),
            accuracy_filter: None,
        }
    }
}
