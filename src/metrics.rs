//! Live run metrics and the observable store that publishes them.
//!
//! ## Architecture
//!
//! - [`MetricsAccumulator`] keeps the running aggregates (last fix and
//!   cumulative distance) so each fix is folded in O(1).
//! - [`MetricsSnapshot`] is an immutable value, replaced wholesale per fix.
//! - [`MetricsStore`] is the single observable container. The tracking
//!   session is its only writer; UI observers read it or subscribe to a
//!   `tokio::sync::watch` channel and wake on their own executor.
//!
//! The session captures a whole [`TrackerState`] under its own lock, tagged
//! with a revision drawn from the store, and publishes it after releasing
//! that lock. The store keeps only the highest revision, so publishes that
//! race each other can never roll the state back.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::TrackingError;
use crate::geo_utils::{average_speed_mps, haversine_distance, pace_min_per_km, speed_kmh};
use crate::permission::PermissionStatus;
use crate::session::SessionState;
use crate::LocationFix;

/// Metrics derived from the fixes received so far.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// From the latest fix's hardware-reported speed, never negative.
    pub current_speed_kmh: f64,
    /// `None` when the current speed is zero or unknown.
    pub current_pace_min_per_km: Option<f64>,
    /// Cumulative distance over elapsed run time.
    pub average_speed_kmh: f64,
    /// Zero until both distance and elapsed time are non-zero.
    pub average_pace_min_per_km: f64,
    /// Sum of great-circle steps between consecutive fixes.
    pub total_distance_m: f64,
    pub last_fix: Option<LocationFix>,
}

/// Running aggregates for one session.
#[derive(Debug, Clone, Default)]
pub struct MetricsAccumulator {
    last_fix: Option<LocationFix>,
    total_distance_m: f64,
}

impl MetricsAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one fix into the aggregates and build the resulting snapshot.
    ///
    /// Position deltas drive total distance; the fix's own speed field
    /// drives current speed and pace. The first fix adds no distance.
    pub fn ingest(&mut self, fix: &LocationFix, elapsed_seconds: u64) -> MetricsSnapshot {
        if let Some(prev) = &self.last_fix {
            let step = haversine_distance(prev, fix);
            if step.is_finite() {
                self.total_distance_m += step;
            }
        }
        self.last_fix = Some(*fix);

        let current_mps = fix.instantaneous_speed().unwrap_or(0.0);
        let average_mps = average_speed_mps(self.total_distance_m, elapsed_seconds);

        MetricsSnapshot {
            current_speed_kmh: speed_kmh(current_mps),
            current_pace_min_per_km: pace_min_per_km(current_mps),
            average_speed_kmh: speed_kmh(average_mps),
            average_pace_min_per_km: pace_min_per_km(average_mps).unwrap_or(0.0),
            total_distance_m: self.total_distance_m,
            last_fix: self.last_fix,
        }
    }

    pub fn total_distance_m(&self) -> f64 {
        self.total_distance_m
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Everything observers can see about the tracker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackerState {
    pub session: SessionState,
    pub permission: PermissionStatus,
    pub metrics: MetricsSnapshot,
    /// Number of fixes in the current route.
    pub point_count: usize,
    pub last_error: Option<TrackingError>,
    /// Increases with every published change.
    pub revision: u64,
}

impl TrackerState {
    /// Subscribed but no fix yet; backs a "still acquiring signal" hint.
    pub fn is_acquiring_signal(&self) -> bool {
        self.session == SessionState::Active && self.point_count == 0
    }
}

/// Observable holder of the latest [`TrackerState`].
///
/// Cloning yields another handle onto the same store.
#[derive(Clone)]
pub struct MetricsStore {
    tx: Arc<watch::Sender<TrackerState>>,
    next_revision: Arc<AtomicU64>,
}

impl MetricsStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(TrackerState::default());
        Self {
            tx: Arc::new(tx),
            next_revision: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Copy of the current state.
    pub fn get(&self) -> TrackerState {
        self.tx.borrow().clone()
    }

    /// Copy of the current metrics snapshot.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.tx.borrow().metrics.clone()
    }

    pub fn permission(&self) -> PermissionStatus {
        self.tx.borrow().permission
    }

    pub fn last_error(&self) -> Option<TrackingError> {
        self.tx.borrow().last_error.clone()
    }

    pub fn session_state(&self) -> SessionState {
        self.tx.borrow().session
    }

    /// Receiver that is notified on every change.
    pub fn subscribe(&self) -> watch::Receiver<TrackerState> {
        self.tx.subscribe()
    }

    /// Current state as JSON for the host bridge.
    pub fn state_json(&self) -> String {
        serde_json::to_string(&*self.tx.borrow()).unwrap_or_else(|_| "{}".to_string())
    }

    /// Reserve the revision for a state about to be published.
    ///
    /// Never touches the channel, so it is safe to call under the session
    /// lock while an observer holds a borrow.
    pub(crate) fn reserve_revision(&self) -> u64 {
        self.next_revision.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Replace the whole state unless a newer revision is already stored.
    ///
    /// Returns whether observers were notified.
    pub(crate) fn publish(&self, revision: u64, state: TrackerState) -> bool {
        self.tx.send_if_modified(|current| {
            if revision <= current.revision {
                return false;
            }
            *current = TrackerState { revision, ..state };
            true
        })
    }
}

impl Default for MetricsStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo_utils::polyline_length;

    fn fix(lat: f64, lon: f64, speed: Option<f64>, t: i64) -> LocationFix {
        LocationFix {
            speed_mps: speed,
            ..LocationFix::new(lat, lon, t)
        }
    }

    #[test]
    fn test_first_fix_zero_distance() {
        let mut acc = MetricsAccumulator::new();
        let snap = acc.ingest(&fix(37.3320, -122.0312, Some(2.5), 0), 0);
        assert_eq!(snap.total_distance_m, 0.0);
        assert_eq!(snap.average_speed_kmh, 0.0);
        assert_eq!(snap.average_pace_min_per_km, 0.0);
        assert!((snap.current_speed_kmh - 9.0).abs() < 1e-9);
    }

    #[test]
    fn test_current_metrics_use_hardware_speed() {
        let mut acc = MetricsAccumulator::new();
        acc.ingest(&fix(0.0, 0.0, None, 0), 0);
        // Large position jump but the hardware reports standing still
        let snap = acc.ingest(&fix(0.0, 0.01, Some(0.0), 1_000), 1);
        assert_eq!(snap.current_speed_kmh, 0.0);
        assert_eq!(snap.current_pace_min_per_km, None);
        assert!(snap.total_distance_m > 1_000.0);
    }

    #[test]
    fn test_negative_speed_is_unknown() {
        let mut acc = MetricsAccumulator::new();
        let snap = acc.ingest(&fix(0.0, 0.0, Some(-1.0), 0), 0);
        assert_eq!(snap.current_speed_kmh, 0.0);
        assert_eq!(snap.current_pace_min_per_km, None);
    }

    #[test]
    fn test_incremental_matches_full_recomputation() {
        let fixes: Vec<LocationFix> = (0..500)
            .map(|i| {
                let jitter = ((i * 7919) % 13) as f64 * 1e-6;
                fix(51.5 + i as f64 * 1e-4 + jitter, -0.12 + jitter, Some(3.0), i * 1_000)
            })
            .collect();

        let mut acc = MetricsAccumulator::new();
        let mut previous = 0.0;
        for (i, f) in fixes.iter().enumerate() {
            let snap = acc.ingest(f, i as u64);
            assert!(snap.total_distance_m >= previous);
            previous = snap.total_distance_m;
        }

        let naive = polyline_length(&fixes);
        assert!((acc.total_distance_m() - naive).abs() <= naive * 1e-12);
    }

    #[test]
    fn test_antipodal_step_is_counted() {
        let mut acc = MetricsAccumulator::new();
        acc.ingest(&fix(45.0, 10.0, None, 0), 0);
        let snap = acc.ingest(&fix(-45.0, -170.0, None, 1_000), 1);
        assert!(snap.total_distance_m > 20_000_000.0);
    }

    #[test]
    fn test_reset() {
        let mut acc = MetricsAccumulator::new();
        acc.ingest(&fix(0.0, 0.0, None, 0), 0);
        acc.ingest(&fix(0.0, 0.001, None, 1_000), 1);
        acc.reset();
        assert_eq!(acc.total_distance_m(), 0.0);
        let snap = acc.ingest(&fix(10.0, 10.0, None, 2_000), 2);
        assert_eq!(snap.total_distance_m, 0.0);
    }

    fn state_with_points(point_count: usize) -> TrackerState {
        TrackerState {
            session: SessionState::Active,
            point_count,
            ..TrackerState::default()
        }
    }

    #[test]
    fn test_store_publish_notifies() {
        let store = MetricsStore::new();
        let mut rx = store.subscribe();
        assert!(!rx.has_changed().unwrap());

        let snapshot = MetricsSnapshot {
            total_distance_m: 42.0,
            ..MetricsSnapshot::default()
        };
        let revision = store.reserve_revision();
        assert!(store.publish(
            revision,
            TrackerState {
                metrics: snapshot.clone(),
                ..state_with_points(3)
            }
        ));

        assert!(rx.has_changed().unwrap());
        let state = rx.borrow_and_update().clone();
        assert_eq!(state.metrics, snapshot);
        assert_eq!(state.point_count, 3);
        assert_eq!(state.revision, revision);
        assert_eq!(store.metrics().total_distance_m, 42.0);
    }

    #[test]
    fn test_store_ignores_stale_revision() {
        let store = MetricsStore::new();
        let older = store.reserve_revision();
        let newer = store.reserve_revision();
        assert!(newer > older);

        assert!(store.publish(newer, state_with_points(2)));
        let mut rx = store.subscribe();
        assert!(!store.publish(older, state_with_points(1)));

        assert!(!rx.has_changed().unwrap());
        assert_eq!(store.get().point_count, 2);
        assert_eq!(store.get().revision, newer);
    }

    #[test]
    fn test_acquiring_signal() {
        let store = MetricsStore::new();
        assert!(!store.get().is_acquiring_signal());
        store.publish(store.reserve_revision(), state_with_points(0));
        assert!(store.get().is_acquiring_signal());
        store.publish(store.reserve_revision(), state_with_points(1));
        assert!(!store.get().is_acquiring_signal());
    }

    #[test]
    fn test_state_json() {
        let store = MetricsStore::new();
        let json = store.state_json();
        assert!(json.contains("\"session\":\"Idle\""));
        assert!(json.contains("\"permission\":\"Undetermined\""));
    }
}
