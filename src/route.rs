//! Recorded route and end-of-run summary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo_utils::polyline_length;
use crate::session::SessionState;
use crate::LocationFix;

/// Append-only sequence of fixes in arrival order.
///
/// Cleared only when a new session is granted; never edited otherwise.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Route {
    fixes: Vec<LocationFix>,
}

impl Route {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, fix: LocationFix) {
        self.fixes.push(fix);
    }

    pub(crate) fn clear(&mut self) {
        self.fixes.clear();
    }

    pub fn len(&self) -> usize {
        self.fixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fixes.is_empty()
    }

    pub fn last(&self) -> Option<&LocationFix> {
        self.fixes.last()
    }

    pub fn fixes(&self) -> &[LocationFix] {
        &self.fixes
    }

    /// Length recomputed over the whole route. O(n).
    pub fn length_m(&self) -> f64 {
        polyline_length(&self.fixes)
    }
}

/// Final figures for a run, consumed by the host's activity persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub started_at: Option<DateTime<Utc>>,
    pub final_state: SessionState,
    pub total_distance_m: f64,
    pub elapsed_seconds: u64,
    pub average_speed_kmh: f64,
    pub average_pace_min_per_km: f64,
    pub point_count: usize,
}

impl RunSummary {
    /// Serialize for the host bridge.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}
