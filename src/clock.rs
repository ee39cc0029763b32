//! Session stopwatch.
//!
//! The run controller owns the stopwatch (start, pause, resume, reset); the
//! tracking session only reads `elapsed_seconds()`. Keeping the two apart
//! lets "is the run timer running" differ from "is GPS subscribed".

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Source of wall-clock time in Unix milliseconds.
pub trait TimeSource: Send + Sync {
    fn now_millis(&self) -> i64;
}

/// Wall clock backed by the system time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Manually advanced clock for tests and replays.
#[derive(Debug, Default)]
pub struct ManualTimeSource {
    now_ms: AtomicI64,
}

impl ManualTimeSource {
    pub fn new(now_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(now_ms),
        }
    }

    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: i64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl TimeSource for ManualTimeSource {
    fn now_millis(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct ClockState {
    started_at_ms: Option<i64>,
    /// Start of the currently running span, `None` while paused.
    running_since_ms: Option<i64>,
    /// Time accumulated over completed spans.
    banked_ms: i64,
}

/// Stopwatch measuring run time since the session start.
pub struct SessionClock {
    time: Arc<dyn TimeSource>,
    state: Mutex<ClockState>,
}

impl SessionClock {
    /// Create a stopped clock reading the system time.
    pub fn new() -> Self {
        Self::with_time_source(Arc::new(SystemTimeSource))
    }

    /// Create a stopped clock reading from a custom time source.
    pub fn with_time_source(time: Arc<dyn TimeSource>) -> Self {
        Self {
            time,
            state: Mutex::new(ClockState::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ClockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start the stopwatch now, discarding any previous run.
    pub fn start(&self) {
        let now = self.time.now_millis();
        self.start_at(now);
    }

    /// Start the stopwatch at an explicit wall-clock time (Unix ms).
    pub fn start_at(&self, started_at_ms: i64) {
        *self.state() = ClockState {
            started_at_ms: Some(started_at_ms),
            running_since_ms: Some(started_at_ms),
            banked_ms: 0,
        };
    }

    /// Freeze elapsed time. No-op when not running.
    pub fn pause(&self) {
        let now = self.time.now_millis();
        let mut state = self.state();
        if let Some(since) = state.running_since_ms.take() {
            state.banked_ms += (now - since).max(0);
        }
    }

    /// Continue counting after a pause. No-op unless started and paused.
    pub fn resume(&self) {
        let now = self.time.now_millis();
        let mut state = self.state();
        if state.started_at_ms.is_some() && state.running_since_ms.is_none() {
            state.running_since_ms = Some(now);
        }
    }

    /// Clear the stopwatch back to its unstarted state.
    pub fn reset(&self) {
        *self.state() = ClockState::default();
    }

    /// Whether the stopwatch is currently counting.
    pub fn is_running(&self) -> bool {
        self.state().running_since_ms.is_some()
    }

    /// Wall-clock start of the run, if started.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.state()
            .started_at_ms
            .and_then(DateTime::<Utc>::from_timestamp_millis)
    }

    /// Elapsed run time in milliseconds, excluding paused spans.
    pub fn elapsed_millis(&self) -> i64 {
        let now = self.time.now_millis();
        let state = self.state();
        let running = state
            .running_since_ms
            .map(|since| (now - since).max(0))
            .unwrap_or(0);
        state.banked_ms + running
    }

    /// Elapsed run time in whole seconds. Zero before the clock is started.
    pub fn elapsed_seconds(&self) -> u64 {
        (self.elapsed_millis() / 1000) as u64
    }
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::new()
    }
}
