//! # Track Session
//!
//! Lifecycle and fix ingestion for one run.
//!
//! ```text
//! Idle --start--> RequestingPermission --granted--> Active --stop--> Stopped
//!                          |                          |
//!                          +--denied--> Error <--fatal+
//! Stopped / Error --start--> RequestingPermission (route and metrics reset on grant)
//! ```
//!
//! ## Concurrency
//!
//! Fixes arrive on platform threads through a [`FixSink`]. All mutation of
//! the route and aggregates happens under one session mutex. Each
//! subscription is tagged with a generation number; `stop()` and fatal
//! errors bump it under the lock, so once `stop()` returns no fix from the
//! cancelled subscription can land. The lock is never held while calling
//! into the platform, the progress listener or the metrics store: state is
//! captured under the lock and published after it is released, so an
//! observer holding a store borrow can still call back into the session.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::clock::SessionClock;
use crate::config::{AccuracyFilter, TrackerConfig, UpdateConfig};
use crate::error::{classify_platform_error, ErrorKind, PlatformError, Result, TrackingError};
use crate::metrics::{MetricsAccumulator, MetricsSnapshot, MetricsStore, TrackerState};
use crate::permission::{PermissionGate, PermissionStatus};
use crate::platform::{LocationPlatform, RunProgressListener, SettingsLauncher, Subscription};
use crate::route::{Route, RunSummary};
use crate::LocationFix;

/// Session state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SessionState {
    /// Created, never started
    #[default]
    Idle,
    /// Waiting on the permission gate
    RequestingPermission,
    /// Subscribed and ingesting fixes
    Active,
    /// Cleanly stopped; route and metrics still readable
    Stopped,
    /// Terminal failure for this session
    Error(ErrorKind),
}

/// Mutable session data, guarded by one mutex.
///
/// Holds everything the store publishes, so every publish is a complete
/// state and a late one can simply be dropped.
struct SessionCore {
    state: SessionState,
    generation: u64,
    permission: PermissionStatus,
    route: Route,
    metrics: MetricsAccumulator,
    snapshot: MetricsSnapshot,
    last_error: Option<TrackingError>,
    subscription: Option<Box<dyn Subscription>>,
}

impl SessionCore {
    fn enter_error(&mut self, error: TrackingError) {
        self.state = SessionState::Error(error.kind());
        self.generation += 1;
        self.last_error = Some(error);
    }

    fn view(&self) -> TrackerState {
        TrackerState {
            session: self.state,
            permission: self.permission,
            metrics: self.snapshot.clone(),
            point_count: self.route.len(),
            last_error: self.last_error.clone(),
            revision: 0,
        }
    }
}

/// State captured under the session lock, published once it is released.
struct Staged {
    revision: u64,
    state: TrackerState,
}

struct Shared {
    core: Mutex<SessionCore>,
    store: MetricsStore,
    clock: Arc<SessionClock>,
    listener: Option<Arc<dyn RunProgressListener>>,
    filter: Option<AccuracyFilter>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SessionCore> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Must be called with `core` locked, so revisions follow mutation order.
    fn stage(&self, core: &SessionCore) -> Staged {
        Staged {
            revision: self.store.reserve_revision(),
            state: core.view(),
        }
    }

    /// Must be called without the session lock held.
    fn publish(&self, staged: Staged) {
        self.store.publish(staged.revision, staged.state);
    }
}

/// Entry point for the platform's location callbacks.
///
/// Cheap to clone. Holds only a weak reference to the session, so a sink
/// kept alive by the platform never keeps a torn-down session alive.
#[derive(Clone)]
pub struct FixSink {
    shared: Weak<Shared>,
    generation: u64,
}

impl FixSink {
    /// Deliver a fix. Returns whether it was accepted into the route.
    ///
    /// Fixes from a stopped or superseded subscription are dropped.
    pub fn deliver(&self, fix: LocationFix) -> bool {
        let Some(shared) = self.shared.upgrade() else {
            return false;
        };

        let (staged, distance, elapsed_seconds) = {
            let mut core = shared.lock();
            if core.generation != self.generation || core.state != SessionState::Active {
                debug!(
                    "[TrackSession] Dropping fix from inactive subscription (gen {})",
                    self.generation
                );
                return false;
            }

            if let Some(filter) = &shared.filter {
                if !filter.accepts(fix.horizontal_accuracy_m) {
                    debug!(
                        "[TrackSession] Rejected fix with accuracy {:?}m",
                        fix.horizontal_accuracy_m
                    );
                    return false;
                }
            }

            if !fix.is_valid() {
                warn!(
                    "[TrackSession] Fix with invalid coordinates ({}, {}), accepting",
                    fix.latitude, fix.longitude
                );
            }

            if let Some(last) = core.route.last() {
                if fix.timestamp_ms < last.timestamp_ms {
                    debug!(
                        "[TrackSession] Fix timestamp went backwards ({} < {}), accepting",
                        fix.timestamp_ms, last.timestamp_ms
                    );
                }
            }

            core.route.push(fix);
            let elapsed_seconds = shared.clock.elapsed_seconds();
            core.snapshot = core.metrics.ingest(&fix, elapsed_seconds);
            let distance = core.snapshot.total_distance_m;
            (shared.stage(&core), distance, elapsed_seconds)
        };

        shared.publish(staged);
        if let Some(listener) = &shared.listener {
            listener.on_progress(distance, elapsed_seconds);
        }
        true
    }

    /// Report a fatal subscription error (provider crash, revoked access).
    ///
    /// Moves the session to `Error` and cancels the subscription. Data
    /// gathered so far stays readable.
    pub fn fail(&self, error: PlatformError) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };

        let classified = classify_platform_error(&error);
        let (staged, subscription) = {
            let mut core = shared.lock();
            if core.generation != self.generation || core.state != SessionState::Active {
                debug!("[TrackSession] Ignoring error from inactive subscription: {}", error);
                return;
            }
            warn!(
                "[TrackSession] Subscription failed: {} -> {}",
                error,
                classified.kind()
            );
            core.enter_error(classified);
            (shared.stage(&core), core.subscription.take())
        };

        shared.publish(staged);
        if let Some(mut subscription) = subscription {
            subscription.cancel();
        }
    }
}

/// Puts the session back where it was if a `start()` is abandoned while
/// waiting on the permission gate (the future was dropped mid-await).
struct PendingStart<'a> {
    shared: &'a Shared,
    generation: u64,
    previous: SessionState,
    settled: bool,
}

impl PendingStart<'_> {
    fn settle(&mut self) {
        self.settled = true;
    }
}

impl Drop for PendingStart<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let staged = {
            let mut core = self.shared.lock();
            if core.generation != self.generation
                || core.state != SessionState::RequestingPermission
            {
                return;
            }
            warn!(
                "[TrackSession] start() abandoned while requesting permission, back to {:?}",
                self.previous
            );
            core.state = self.previous;
            core.generation += 1;
            self.shared.stage(&core)
        };
        self.shared.publish(staged);
    }
}

/// One tracking session, reusable across runs.
pub struct TrackSession {
    shared: Arc<Shared>,
    platform: Arc<dyn LocationPlatform>,
    gate: PermissionGate,
    update_config: UpdateConfig,
}

impl TrackSession {
    /// Create an idle session with default configuration.
    pub fn new(
        platform: Arc<dyn LocationPlatform>,
        clock: Arc<SessionClock>,
        store: MetricsStore,
    ) -> Self {
        TrackSessionBuilder::new(platform, clock, store).build()
    }

    /// Builder for listeners, settings launcher and configuration.
    pub fn builder(
        platform: Arc<dyn LocationPlatform>,
        clock: Arc<SessionClock>,
        store: MetricsStore,
    ) -> TrackSessionBuilder {
        TrackSessionBuilder::new(platform, clock, store)
    }

    /// Start tracking with the configured update cadence.
    pub async fn start(&self) -> Result<()> {
        let config = self.update_config.clone();
        self.start_with(config).await
    }

    /// Start tracking with an explicit update cadence.
    ///
    /// No-op when already active or waiting on permission. On denial the
    /// session moves to `Error` without subscribing and the classified
    /// error is returned. On grant the route and metrics are reset before
    /// the subscription opens. Dropping the returned future before the
    /// permission answer arrives restores the previous state, so a later
    /// `start()` asks again.
    pub async fn start_with(&self, config: UpdateConfig) -> Result<()> {
        let (staged, mut pending) = {
            let mut core = self.shared.lock();
            let previous = core.state;
            match previous {
                SessionState::Active | SessionState::RequestingPermission => {
                    info!("[TrackSession] start() ignored, session is {:?}", previous);
                    return Ok(());
                }
                SessionState::Idle | SessionState::Stopped | SessionState::Error(_) => {}
            }
            core.state = SessionState::RequestingPermission;
            core.generation += 1;
            let pending = PendingStart {
                shared: &self.shared,
                generation: core.generation,
                previous,
                settled: false,
            };
            (self.shared.stage(&core), pending)
        };
        self.shared.publish(staged);

        let check = self.gate.check_and_request().await;
        pending.settle();

        if check.status != PermissionStatus::Granted {
            let error = check.error.unwrap_or(TrackingError::PermissionDenied {
                can_ask_again: true,
            });
            warn!("[TrackSession] Permission denied: {}", error);
            let staged = {
                let mut core = self.shared.lock();
                core.permission = check.status;
                core.enter_error(error.clone());
                self.shared.stage(&core)
            };
            self.shared.publish(staged);
            return Err(error);
        }

        let (generation, staged) = {
            let mut core = self.shared.lock();
            core.permission = PermissionStatus::Granted;
            core.route.clear();
            core.metrics.reset();
            core.snapshot = MetricsSnapshot::default();
            core.last_error = None;
            core.generation += 1;
            core.state = SessionState::Active;
            (core.generation, self.shared.stage(&core))
        };
        self.shared.publish(staged);

        let sink = FixSink {
            shared: Arc::downgrade(&self.shared),
            generation,
        };

        match self.platform.subscribe(&config, sink) {
            Ok(mut subscription) => {
                let mut core = self.shared.lock();
                if core.generation == generation && core.state == SessionState::Active {
                    core.subscription = Some(subscription);
                    info!(
                        "[TrackSession] Active (every {}ms or {}m, {:?})",
                        config.min_time_interval_ms, config.min_distance_m, config.accuracy
                    );
                } else {
                    // Stopped or failed while subscribing
                    drop(core);
                    subscription.cancel();
                }
                Ok(())
            }
            Err(e) => {
                let error = classify_platform_error(&e);
                warn!("[TrackSession] Subscribe failed: {} -> {}", e, error.kind());
                let staged = {
                    let mut core = self.shared.lock();
                    if core.generation == generation && core.state == SessionState::Active {
                        core.enter_error(error.clone());
                        Some(self.shared.stage(&core))
                    } else {
                        None
                    }
                };
                if let Some(staged) = staged {
                    self.shared.publish(staged);
                }
                Err(error)
            }
        }
    }

    /// Stop tracking. No-op unless active.
    ///
    /// Route and metrics are kept for the final summary; they are only
    /// cleared by the next successful `start()`.
    pub fn stop(&self) {
        let (staged, subscription) = {
            let mut core = self.shared.lock();
            if core.state != SessionState::Active {
                debug!("[TrackSession] stop() ignored, session is {:?}", core.state);
                return;
            }
            core.state = SessionState::Stopped;
            core.generation += 1;
            info!(
                "[TrackSession] Stopped after {} fixes, {:.0}m",
                core.route.len(),
                core.metrics.total_distance_m()
            );
            (self.shared.stage(&core), core.subscription.take())
        };

        self.shared.publish(staged);
        if let Some(mut subscription) = subscription {
            subscription.cancel();
        }
    }

    pub fn state(&self) -> SessionState {
        self.shared.lock().state
    }

    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    /// Copy of the route recorded so far.
    pub fn route(&self) -> Route {
        self.shared.lock().route.clone()
    }

    pub fn point_count(&self) -> usize {
        self.shared.lock().route.len()
    }

    /// Handle to the observable store.
    pub fn store(&self) -> &MetricsStore {
        &self.shared.store
    }

    /// Permission gate, for the host's settings deep-link.
    pub fn permission_gate(&self) -> &PermissionGate {
        &self.gate
    }

    /// Final figures for the host's activity persistence.
    pub fn summary(&self) -> RunSummary {
        let (state, point_count, metrics) = {
            let core = self.shared.lock();
            (core.state, core.route.len(), core.snapshot.clone())
        };

        RunSummary {
            started_at: self.shared.clock.started_at(),
            final_state: state,
            total_distance_m: metrics.total_distance_m,
            elapsed_seconds: self.shared.clock.elapsed_seconds(),
            average_speed_kmh: metrics.average_speed_kmh,
            average_pace_min_per_km: metrics.average_pace_min_per_km,
            point_count,
        }
    }
}

impl Drop for TrackSession {
    fn drop(&mut self) {
        let subscription = self.shared.lock().subscription.take();
        if let Some(mut subscription) = subscription {
            debug!("[TrackSession] Cancelling subscription on teardown");
            subscription.cancel();
        }
    }
}

/// Builder for [`TrackSession`].
pub struct TrackSessionBuilder {
    platform: Arc<dyn LocationPlatform>,
    clock: Arc<SessionClock>,
    store: MetricsStore,
    config: TrackerConfig,
    listener: Option<Arc<dyn RunProgressListener>>,
    settings: Option<Arc<dyn SettingsLauncher>>,
}

impl TrackSessionBuilder {
    fn new(platform: Arc<dyn LocationPlatform>, clock: Arc<SessionClock>, store: MetricsStore) -> Self {
        Self {
            platform,
            clock,
            store,
            config: TrackerConfig::default(),
            listener: None,
            settings: None,
        }
    }

    pub fn config(mut self, config: TrackerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn progress_listener(mut self, listener: Arc<dyn RunProgressListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn settings_launcher(mut self, settings: Arc<dyn SettingsLauncher>) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn build(self) -> TrackSession {
        let mut gate = PermissionGate::new(self.platform.clone());
        if let Some(settings) = self.settings {
            gate = gate.with_settings_launcher(settings);
        }

        let shared = Arc::new(Shared {
            core: Mutex::new(SessionCore {
                state: SessionState::Idle,
                generation: 0,
                permission: PermissionStatus::Undetermined,
                route: Route::new(),
                metrics: MetricsAccumulator::new(),
                snapshot: MetricsSnapshot::default(),
                last_error: None,
                subscription: None,
            }),
            store: self.store,
            clock: self.clock,
            listener: self.listener,
            filter: self.config.accuracy_filter,
        });

        TrackSession {
            shared,
            platform: self.platform,
            gate,
            update_config: self.config.update,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualTimeSource;
    use crate::platform::AuthorizationResponse;
    use futures::future::{BoxFuture, FutureExt};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Platform that hands the sink back to the test.
    #[derive(Default)]
    struct LoopbackPlatform {
        sink: Mutex<Option<FixSink>>,
        subscribes: AtomicUsize,
        cancels: Arc<AtomicUsize>,
    }

    struct LoopbackSubscription(Arc<AtomicUsize>);

    impl Subscription for LoopbackSubscription {
        fn cancel(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl LocationPlatform for LoopbackPlatform {
        fn has_services_enabled(&self) -> bool {
            true
        }

        fn request_foreground_authorization(
            &self,
        ) -> BoxFuture<'_, std::result::Result<AuthorizationResponse, PlatformError>> {
            async { Ok(AuthorizationResponse::granted()) }.boxed()
        }

        fn subscribe(
            &self,
            _config: &UpdateConfig,
            sink: FixSink,
        ) -> std::result::Result<Box<dyn Subscription>, PlatformError> {
            self.subscribes.fetch_add(1, Ordering::SeqCst);
            *self.sink.lock().unwrap() = Some(sink);
            Ok(Box::new(LoopbackSubscription(self.cancels.clone())))
        }
    }

    impl LoopbackPlatform {
        fn sink(&self) -> FixSink {
            self.sink.lock().unwrap().clone().expect("not subscribed")
        }
    }

    fn session_with(
        config: TrackerConfig,
    ) -> (Arc<LoopbackPlatform>, Arc<ManualTimeSource>, TrackSession) {
        let platform = Arc::new(LoopbackPlatform::default());
        let time = Arc::new(ManualTimeSource::new(0));
        let clock = Arc::new(SessionClock::with_time_source(time.clone()));
        clock.start_at(0);
        let session = TrackSession::builder(platform.clone(), clock, MetricsStore::new())
            .config(config)
            .build();
        (platform, time, session)
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let (platform, _time, session) = session_with(TrackerConfig::default());
        assert_eq!(session.state(), SessionState::Idle);

        session.start().await.unwrap();
        assert_eq!(session.state(), SessionState::Active);
        assert_eq!(session.store().permission(), PermissionStatus::Granted);
        assert!(session.store().get().is_acquiring_signal());

        session.stop();
        assert_eq!(session.state(), SessionState::Stopped);
        assert_eq!(platform.cancels.load(Ordering::SeqCst), 1);

        // stop() twice is a no-op
        session.stop();
        assert_eq!(platform.cancels.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stale_sink_is_ignored_after_restart() {
        let (platform, _time, session) = session_with(TrackerConfig::default());
        session.start().await.unwrap();
        let old_sink = platform.sink();
        session.stop();

        session.start().await.unwrap();
        assert!(!old_sink.deliver(LocationFix::new(1.0, 1.0, 0)));
        assert!(platform.sink().deliver(LocationFix::new(1.0, 1.0, 0)));
        assert_eq!(session.point_count(), 1);
    }

    #[tokio::test]
    async fn test_accuracy_filter_rejects_poor_fixes() {
        let config = TrackerConfig {
            accuracy_filter: Some(AccuracyFilter {
                max_horizontal_accuracy_m: 25.0,
                accept_unknown_accuracy: true,
            }),
            ..TrackerConfig::default()
        };
        let (platform, _time, session) = session_with(config);
        session.start().await.unwrap();
        let sink = platform.sink();

        let mut poor = LocationFix::new(0.0, 0.0, 0);
        poor.horizontal_accuracy_m = Some(80.0);
        let mut good = LocationFix::new(0.0, 0.0, 1_000);
        good.horizontal_accuracy_m = Some(5.0);

        assert!(!sink.deliver(poor));
        assert!(sink.deliver(good));
        assert!(sink.deliver(LocationFix::new(0.0, 0.0, 2_000)));
        assert_eq!(session.point_count(), 2);
    }

    #[tokio::test]
    async fn test_default_accepts_poor_accuracy() {
        let (platform, _time, session) = session_with(TrackerConfig::default());
        session.start().await.unwrap();
        let mut poor = LocationFix::new(0.0, 0.0, 0);
        poor.horizontal_accuracy_m = Some(500.0);
        assert!(platform.sink().deliver(poor));
    }

    #[tokio::test]
    async fn test_out_of_order_timestamp_accepted() {
        let (platform, _time, session) = session_with(TrackerConfig::default());
        session.start().await.unwrap();
        let sink = platform.sink();
        assert!(sink.deliver(LocationFix::new(0.0, 0.0, 5_000)));
        assert!(sink.deliver(LocationFix::new(0.0, 0.0001, 4_000)));
        assert_eq!(session.point_count(), 2);
    }

    #[tokio::test]
    async fn test_fatal_error_keeps_partial_data() {
        let (platform, _time, session) = session_with(TrackerConfig::default());
        session.start().await.unwrap();
        let sink = platform.sink();
        sink.deliver(LocationFix::new(0.0, 0.0, 0));
        sink.deliver(LocationFix::new(0.0, 0.001, 5_000));

        sink.fail(PlatformError::new("GPS provider unavailable"));
        assert_eq!(
            session.state(),
            SessionState::Error(ErrorKind::ProviderUnavailable)
        );
        assert_eq!(platform.cancels.load(Ordering::SeqCst), 1);
        assert_eq!(session.point_count(), 2);
        assert!(session.store().metrics().total_distance_m > 100.0);
        assert_eq!(
            session.store().last_error().map(|e| e.kind()),
            Some(ErrorKind::ProviderUnavailable)
        );

        // Nothing lands after the failure
        assert!(!sink.deliver(LocationFix::new(0.0, 0.002, 10_000)));
        assert_eq!(session.point_count(), 2);
    }

    #[tokio::test]
    async fn test_drop_cancels_subscription() {
        let (platform, _time, session) = session_with(TrackerConfig::default());
        session.start().await.unwrap();
        let sink = platform.sink();
        drop(session);
        assert_eq!(platform.cancels.load(Ordering::SeqCst), 1);
        assert!(!sink.deliver(LocationFix::new(0.0, 0.0, 0)));
    }

    #[tokio::test]
    async fn test_summary_after_stop() {
        let (platform, time, session) = session_with(TrackerConfig::default());
        session.start().await.unwrap();
        let sink = platform.sink();
        sink.deliver(LocationFix::new(0.0, 0.0, 0));
        time.set(100_000);
        sink.deliver(LocationFix::new(0.0, 0.003, 100_000));
        session.stop();

        let summary = session.summary();
        assert_eq!(summary.final_state, SessionState::Stopped);
        assert_eq!(summary.point_count, 2);
        assert_eq!(summary.elapsed_seconds, 100);
        assert!((summary.total_distance_m - 333.6).abs() < 1.0);
        assert!(summary.average_pace_min_per_km > 0.0);
        assert_eq!(summary.started_at.map(|t| t.timestamp_millis()), Some(0));
    }
}
