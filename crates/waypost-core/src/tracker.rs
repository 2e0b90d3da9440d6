//! Tracking session controller.
//!
//! [`LocationTracker`] owns the session lifecycle:
//!
//! ```text
//!  Idle ──start_tracking──▶ Starting ──session opened──▶ Tracking
//!   ▲                          │                            │
//!   └──────── failure ─────────┘                      stop_tracking
//!   │                                                       ▼
//!   └──────────────── always, even if session end fails ── Stopping
//! ```
//!
//! While tracking, three tasks run under one cancellation token:
//!
//! - the **sampler** collapses raw fixes from the position watch and the
//!   poll timer into one per debounce window (the window opens on the first
//!   fix and the last fix wins), applies the distance filter and hands
//!   significant samples to the [`DeliveryPipeline`];
//! - the **poll timer** requests a fresh fix every `trackingInterval`
//!   seconds, covering platforms that throttle continuous watches;
//! - the **duration timer** stops the session after `maxTrackingDuration`.
//!
//! `stop_tracking` cancels the token and clears the watch before it makes
//! any network call, so no sample is produced once it has begun. A sample
//! already handed to delivery is delivered or queued before the session is
//! closed.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use waypost_core::mock::{MockApi, MockEnvironment, MockPermissions, MockPositionSource};
//! use waypost_core::{EventKind, LocationTracker, TrackingEvent};
//! use waypost_types::{MemoryStore, PermissionState};
//!
//! # async fn example() -> waypost_core::Result<()> {
//! let tracker = LocationTracker::builder()
//!     .api(Arc::new(MockApi::new()))
//!     .store(Arc::new(MemoryStore::new()))
//!     .positions(Arc::new(MockPositionSource::new()))
//!     .permissions(Arc::new(MockPermissions::new(PermissionState::Granted)))
//!     .environment(Arc::new(MockEnvironment::new()))
//!     .build()?;
//!
//! tracker.on(EventKind::LocationUpdated, |event| {
//!     if let TrackingEvent::LocationUpdated { sample } = event {
//!         println!("sent {}, {}", sample.latitude, sample.longitude);
//!     }
//! });
//!
//! tracker.initialize().await?;
//! tracker.start_tracking().await?;
//! // ...
//! tracker.stop_tracking().await;
//! # Ok(())
//! # }
//! ```

use core::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use waypost_types::geo::has_moved_beyond;
use waypost_types::{
    ConnectionCapabilities, DeviceInfo, KeyValueStore, LocationPreferences, LocationSample,
    PermissionState, Position, PositionError, PositionOptions, PreferencesUpdate, SampleSource,
    TrackingSession,
};

use crate::api::{HistoryPage, HistoryQuery, LocationApi};
use crate::background::{BackgroundCoordinator, WorkerHost};
use crate::capabilities::PermissionProbe;
use crate::config::TrackerConfig;
use crate::delivery::{DeliveryOutcome, DeliveryPipeline};
use crate::device::DeviceTelemetry;
use crate::error::{Error, Result};
use crate::events::{ErrorContext, EventBus, EventKind, EventReceiver, HandlerId, TrackingEvent};
use crate::queue::{FailureQueue, RetryReport};
use crate::retry::with_retry;
use crate::traits::{
    Environment, PermissionSource, PositionSource, PositionUpdate, StaticToken, TokenProvider,
    WatchId,
};

/// Lifecycle phase of the tracker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum TrackingPhase {
    #[default]
    Idle,
    Starting,
    Tracking,
    Stopping,
}

impl fmt::Display for TrackingPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackingPhase::Idle => write!(f, "idle"),
            TrackingPhase::Starting => write!(f, "starting"),
            TrackingPhase::Tracking => write!(f, "tracking"),
            TrackingPhase::Stopping => write!(f, "stopping"),
        }
    }
}

/// Builder for [`LocationTracker`].
///
/// `api`, `store`, `positions`, `permissions` and `environment` are
/// required. Without a worker host the tracker runs foreground-only; without
/// a token provider the worker is answered with no token.
#[derive(Default)]
pub struct TrackerBuilder {
    config: TrackerConfig,
    api: Option<Arc<dyn LocationApi>>,
    store: Option<Arc<dyn KeyValueStore>>,
    positions: Option<Arc<dyn PositionSource>>,
    permissions: Option<Arc<dyn PermissionSource>>,
    environment: Option<Arc<dyn Environment>>,
    worker_host: Option<Arc<dyn WorkerHost>>,
    tokens: Option<Arc<dyn TokenProvider>>,
}

impl TrackerBuilder {
    #[must_use]
    pub fn config(mut self, config: TrackerConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn api(mut self, api: Arc<dyn LocationApi>) -> Self {
        self.api = Some(api);
        self
    }

    #[must_use]
    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn positions(mut self, positions: Arc<dyn PositionSource>) -> Self {
        self.positions = Some(positions);
        self
    }

    #[must_use]
    pub fn permissions(mut self, permissions: Arc<dyn PermissionSource>) -> Self {
        self.permissions = Some(permissions);
        self
    }

    #[must_use]
    pub fn environment(mut self, environment: Arc<dyn Environment>) -> Self {
        self.environment = Some(environment);
        self
    }

    #[must_use]
    pub fn worker_host(mut self, host: Arc<dyn WorkerHost>) -> Self {
        self.worker_host = Some(host);
        self
    }

    #[must_use]
    pub fn tokens(mut self, tokens: Arc<dyn TokenProvider>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    /// Validate the configuration and assemble the tracker.
    pub fn build(self) -> Result<LocationTracker> {
        self.config.validate()?;
        let api = required(self.api, "api")?;
        let store = required(self.store, "store")?;
        let positions = required(self.positions, "positions")?;
        let permissions = required(self.permissions, "permissions")?;
        let environment = required(self.environment, "environment")?;
        let tokens = self
            .tokens
            .unwrap_or_else(|| Arc::new(StaticToken::none()));
        let config = self.config;

        let events = Arc::new(EventBus::new(config.event_capacity));
        let queue = Arc::new(FailureQueue::new(
            Arc::clone(&store),
            config.failure_queue_key.clone(),
            config.failure_queue_capacity,
        ));
        let delivery = DeliveryPipeline::new(
            Arc::clone(&api),
            config.retry.clone(),
            queue,
            Arc::clone(&events),
        );
        let telemetry =
            DeviceTelemetry::new(Arc::clone(&environment), store, config.device_id_key.clone());
        let probe = PermissionProbe::new(
            Arc::clone(&environment),
            Arc::clone(&positions),
            permissions,
            config.permission_probe_timeout,
            config.permission_probe_max_age,
        );
        let background = BackgroundCoordinator::new(
            self.worker_host,
            tokens,
            Arc::clone(&events),
            config.worker_script_url.clone(),
            config.worker_scope.clone(),
        )
        .ready_timeout(config.worker_ready_timeout);

        Ok(LocationTracker {
            inner: Arc::new(TrackerInner {
                config,
                api,
                positions,
                environment,
                events,
                telemetry,
                probe,
                delivery,
                background,
                state: Mutex::new(SessionState::default()),
                preferences: Mutex::new(None),
                monitors_armed: AtomicBool::new(false),
                lifetime: CancellationToken::new(),
            }),
        })
    }
}

fn required<T: ?Sized>(value: Option<Arc<T>>, name: &str) -> Result<Arc<T>> {
    value.ok_or_else(|| Error::invalid_config(format!("tracker requires a {} implementation", name)))
}

/// Continuous location tracker.
///
/// Create one per application with [`LocationTracker::builder`] and share it
/// by reference (or `Arc`). Dropping the tracker cancels every task it
/// started, like [`dispose`](Self::dispose).
pub struct LocationTracker {
    inner: Arc<TrackerInner>,
}

impl fmt::Debug for LocationTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocationTracker")
            .field("phase", &self.phase())
            .field("session_id", &self.current_session_id())
            .finish_non_exhaustive()
    }
}

impl LocationTracker {
    pub fn builder() -> TrackerBuilder {
        TrackerBuilder::default()
    }

    /// Check platform support, negotiate permission and register the
    /// background worker.
    ///
    /// Fails with [`Error::GeolocationUnsupported`] or
    /// [`Error::PermissionDenied`]. A missing or failing background worker is
    /// not an error.
    pub async fn initialize(&self) -> Result<ConnectionCapabilities> {
        self.inner.initialize().await
    }

    /// Platform features, detected once.
    pub fn capabilities(&self) -> ConnectionCapabilities {
        self.inner.probe.capabilities()
    }

    /// Query permission, prompting if it is not granted yet.
    pub async fn request_permission(&self) -> PermissionState {
        self.inner.probe.request_permission().await
    }

    /// Open a session and start sampling.
    ///
    /// A no-op unless the tracker is idle. On failure the tracker returns to
    /// idle, an `error` event tagged `start-tracking` is emitted, and the
    /// error is returned.
    pub async fn start_tracking(&self) -> Result<()> {
        self.inner.start_tracking().await
    }

    /// Stop sampling and close the session.
    ///
    /// A no-op unless the tracker is tracking. Waits for a sample already
    /// in delivery to be sent or queued. Local state is always reset, even if
    /// the backend call to end the session fails.
    pub async fn stop_tracking(&self) {
        self.inner.stop_tracking().await;
    }

    pub fn is_currently_tracking(&self) -> bool {
        self.phase() == TrackingPhase::Tracking
    }

    pub fn phase(&self) -> TrackingPhase {
        self.inner.lock_state().phase
    }

    pub fn current_session_id(&self) -> Option<String> {
        self.current_session().map(|s| s.session_id)
    }

    pub fn current_session(&self) -> Option<TrackingSession> {
        self.inner.lock_state().session.clone()
    }

    /// The last sample that passed the distance filter in this session.
    pub fn last_location(&self) -> Option<LocationSample> {
        self.inner.lock_state().last_location.clone()
    }

    /// Deliver a sample obtained elsewhere through the delivery pipeline.
    ///
    /// Without an active session nothing is sent: an `error` event tagged
    /// `record-location` with code `TRACKING_FAILED` is emitted instead.
    pub async fn record_location(&self, sample: LocationSample) -> DeliveryOutcome {
        self.inner.record_location(sample).await
    }

    /// Redeliver every record in the failure queue once.
    pub async fn retry_failed_locations(&self) -> RetryReport {
        self.inner.delivery.retry_failed().await
    }

    pub fn failure_queue(&self) -> &FailureQueue {
        self.inner.delivery.queue()
    }

    pub fn telemetry(&self) -> &DeviceTelemetry {
        &self.inner.telemetry
    }

    pub fn device_info(&self) -> DeviceInfo {
        self.inner.telemetry.device_info()
    }

    /// Fetch preferences from the backend and cache them.
    pub async fn preferences(&self) -> Result<LocationPreferences> {
        self.inner.fetch_preferences().await
    }

    /// The last preferences fetched, if any.
    pub fn cached_preferences(&self) -> Option<LocationPreferences> {
        self.inner.cached_preferences()
    }

    /// Apply a partial update, validate it and store it on the backend.
    ///
    /// Emits `preferences-updated` with the stored preferences. A running
    /// session keeps the preferences it was started with.
    pub async fn update_preferences(&self, update: PreferencesUpdate) -> Result<LocationPreferences> {
        self.inner.update_preferences(update).await
    }

    pub async fn history(&self, query: &HistoryQuery) -> Result<HistoryPage> {
        self.inner.api.history(query).await
    }

    /// The last sample known to the backend.
    pub async fn current_location(&self) -> Result<Option<LocationSample>> {
        self.inner.api.current().await
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    /// Shorthand for [`EventBus::on`].
    pub fn on<F>(&self, kind: EventKind, handler: F) -> HandlerId
    where
        F: Fn(&TrackingEvent) + Send + Sync + 'static,
    {
        self.inner.events.on(kind, handler)
    }

    /// Shorthand for [`EventBus::off`].
    pub fn off(&self, kind: EventKind, id: HandlerId) -> bool {
        self.inner.events.off(kind, id)
    }

    /// Shorthand for [`EventBus::subscribe`].
    pub fn subscribe(&self) -> EventReceiver {
        self.inner.events.subscribe()
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.inner.config
    }

    /// Cancel every timer, watch and background task and reset session state.
    ///
    /// No network call is made and no event is emitted. The tracker cannot
    /// start a new session afterwards.
    pub fn dispose(&self) {
        self.inner.dispose();
    }
}

impl Drop for LocationTracker {
    fn drop(&mut self) {
        self.inner.dispose();
    }
}

struct TrackerInner {
    config: TrackerConfig,
    api: Arc<dyn LocationApi>,
    positions: Arc<dyn PositionSource>,
    environment: Arc<dyn Environment>,
    events: Arc<EventBus>,
    telemetry: DeviceTelemetry,
    probe: PermissionProbe,
    delivery: DeliveryPipeline,
    background: BackgroundCoordinator,
    state: Mutex<SessionState>,
    preferences: Mutex<Option<LocationPreferences>>,
    monitors_armed: AtomicBool,
    // Parent of every task token; cancelled by dispose
    lifetime: CancellationToken,
}

#[derive(Default)]
struct SessionState {
    phase: TrackingPhase,
    session: Option<TrackingSession>,
    last_location: Option<LocationSample>,
    watch_id: Option<WatchId>,
    tasks: Option<CancellationToken>,
    // Sampler and poll timer, awaited by stop
    workers: Option<TaskTracker>,
    // Bumped by dispose so an in-flight start cannot commit
    generation: u64,
}

impl TrackerInner {
    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cached_preferences(&self) -> Option<LocationPreferences> {
        self.preferences
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn cache_preferences(&self, preferences: &LocationPreferences) {
        *self.preferences.lock().unwrap_or_else(PoisonError::into_inner) = Some(preferences.clone());
    }

    async fn initialize(self: &Arc<Self>) -> Result<ConnectionCapabilities> {
        let capabilities = self.probe.ensure_supported()?;

        if !self.monitors_armed.swap(true, Ordering::SeqCst) {
            if self
                .probe
                .monitor(Arc::clone(&self.events), self.lifetime.child_token())
                .is_none()
            {
                debug!("Platform does not report permission changes");
            }
            if self.config.retry_on_reconnect
                && let Some(mut online) = self.environment.connectivity()
            {
                let initially_online = *online.borrow_and_update();
                tokio::spawn(run_connectivity_monitor(
                    Arc::downgrade(self),
                    online,
                    initially_online,
                    self.lifetime.child_token(),
                ));
            }
        }

        let permission = self.probe.request_permission().await;
        if permission == PermissionState::Denied {
            return Err(Error::PermissionDenied);
        }

        if capabilities.service_worker {
            self.background.register().await;
        }

        info!("Tracker initialized (permission: {})", permission);
        Ok(capabilities)
    }

    async fn fetch_preferences(&self) -> Result<LocationPreferences> {
        let preferences = self.api.get_preferences().await?;
        self.cache_preferences(&preferences);
        Ok(preferences)
    }

    async fn update_preferences(&self, update: PreferencesUpdate) -> Result<LocationPreferences> {
        let current = match self.cached_preferences() {
            Some(preferences) => preferences,
            None => self.fetch_preferences().await?,
        };
        let merged = current.merged(&update);
        merged.validate()?;

        let stored = self.api.update_preferences(&merged).await?;
        self.cache_preferences(&stored);
        info!("Preferences updated");
        self.events.emit(TrackingEvent::PreferencesUpdated {
            preferences: stored.clone(),
        });
        Ok(stored)
    }

    async fn start_tracking(self: &Arc<Self>) -> Result<()> {
        if self.lifetime.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let generation = {
            let mut state = self.lock_state();
            if state.phase != TrackingPhase::Idle {
                info!("start_tracking ignored, tracker is {}", state.phase);
                return Ok(());
            }
            state.phase = TrackingPhase::Starting;
            state.generation
        };

        let mut rollback = StartRollback {
            inner: self,
            generation,
            armed: true,
        };

        match self.open_session(generation).await {
            Ok(session_id) => {
                rollback.armed = false;
                info!("Tracking started, session {}", session_id);
                self.events
                    .emit(TrackingEvent::TrackingStarted { session_id });
                Ok(())
            }
            Err(e) => {
                drop(rollback);
                warn!("Failed to start tracking: {}", e);
                self.events.emit_error(ErrorContext::StartTracking, &e);
                Err(e)
            }
        }
    }

    async fn open_session(self: &Arc<Self>, generation: u64) -> Result<String> {
        let preferences = self.fetch_preferences().await?;
        if !preferences.tracking_enabled {
            return Err(Error::tracking_failed(
                "location tracking is disabled in preferences",
            ));
        }

        let device_info = self.telemetry.device_info();
        let session_id = with_retry(&self.config.retry, "session/start", || {
            self.api.start_session(&device_info)
        })
        .await?;
        if session_id.trim().is_empty() {
            return Err(Error::tracking_failed("backend returned an empty session id"));
        }

        let session = TrackingSession {
            session_id: session_id.clone(),
            device_info,
            started_at: OffsetDateTime::now_utc(),
        };
        if let Err(e) = self.arm_session(generation, session, &preferences) {
            if let Err(end_err) = self.api.end_session(&session_id).await {
                debug!("Could not end abandoned session {}: {}", session_id, end_err);
            }
            return Err(e);
        }
        Ok(session_id)
    }

    // Synchronous so the watch, tasks and session land together or not at all.
    fn arm_session(
        self: &Arc<Self>,
        generation: u64,
        session: TrackingSession,
        preferences: &LocationPreferences,
    ) -> Result<()> {
        let mut state = self.lock_state();
        if state.generation != generation || state.phase != TrackingPhase::Starting {
            return Err(Error::Cancelled);
        }

        let options =
            PositionOptions::tracking(preferences.high_accuracy_mode, self.config.position_timeout);
        let (watch_tx, watch_rx) = mpsc::unbounded_channel();
        let watch_id = self.positions.watch_position(options, watch_tx)?;

        let tasks = self.lifetime.child_token();
        let interval = Duration::from_secs(preferences.tracking_interval.into());
        let (poll_tx, poll_rx) = mpsc::unbounded_channel();

        let workers = TaskTracker::new();
        workers.spawn(run_sampler(
            Arc::downgrade(self),
            session.session_id.clone(),
            watch_rx,
            poll_rx,
            self.config.debounce,
            tasks.clone(),
        ));
        workers.spawn(run_poll_timer(
            Arc::clone(&self.positions),
            options,
            interval,
            poll_tx,
            tasks.clone(),
        ));
        workers.close();
        // Not tracked: it calls stop_tracking, which waits on the workers
        tokio::spawn(run_duration_timer(
            Arc::downgrade(self),
            Duration::from_secs(preferences.max_tracking_duration.into()),
            tasks.clone(),
        ));

        if preferences.background_tracking_enabled
            && !self
                .background
                .start(&session.session_id, interval, preferences.high_accuracy_mode)
        {
            warn!("Background tracking unavailable, tracking in foreground only");
        }

        state.phase = TrackingPhase::Tracking;
        state.session = Some(session);
        state.last_location = None;
        state.watch_id = Some(watch_id);
        state.tasks = Some(tasks);
        state.workers = Some(workers);
        Ok(())
    }

    async fn stop_tracking(&self) {
        let (session, watch_id, tasks, workers) = {
            let mut state = self.lock_state();
            if state.phase != TrackingPhase::Tracking {
                debug!("stop_tracking ignored, tracker is {}", state.phase);
                return;
            }
            state.phase = TrackingPhase::Stopping;
            state.last_location = None;
            (
                state.session.take(),
                state.watch_id.take(),
                state.tasks.take(),
                state.workers.take(),
            )
        };

        // Local resources go first so nothing is sampled during the network call
        if let Some(tasks) = tasks {
            tasks.cancel();
        }
        if let Some(id) = watch_id {
            self.positions.clear_watch(id);
        }
        self.background.stop();

        let reset = ResetToIdle { inner: self };
        if let Some(workers) = workers {
            workers.wait().await;
        }
        let Some(session) = session else {
            return;
        };
        if let Err(e) = self.api.end_session(&session.session_id).await {
            warn!("Could not end session {}: {}", session.session_id, e);
        }
        drop(reset);

        info!("Tracking stopped, session {}", session.session_id);
        self.events.emit(TrackingEvent::TrackingStopped {
            session_id: session.session_id,
        });
    }

    async fn record_location(&self, sample: LocationSample) -> DeliveryOutcome {
        let session_id = self
            .lock_state()
            .session
            .as_ref()
            .map(|s| s.session_id.clone());
        let Some(session_id) = session_id else {
            let err = Error::tracking_failed("no active tracking session");
            warn!("Dropping sample: {}", err);
            self.events.emit_error(ErrorContext::RecordLocation, &err);
            return DeliveryOutcome::Rejected;
        };
        self.delivery.deliver(sample, &session_id).await
    }

    async fn handle_position(&self, session_id: &str, position: Position, source: SampleSource) {
        let battery = self.telemetry.battery_level().await;
        let sample = LocationSample::from_position(
            &position,
            self.telemetry.device_id(),
            self.telemetry.network_type(),
            battery,
            source,
        );

        {
            let mut state = self.lock_state();
            let active = state.phase == TrackingPhase::Tracking
                && state
                    .session
                    .as_ref()
                    .is_some_and(|s| s.session_id == session_id);
            if !active {
                return;
            }
            if !has_moved_beyond(
                state.last_location.as_ref(),
                &sample,
                self.config.distance_threshold_m,
            ) {
                debug!(
                    "Ignoring {:?} fix within {} m of the last sample",
                    source, self.config.distance_threshold_m
                );
                return;
            }
            state.last_location = Some(sample.clone());
        }

        self.delivery.deliver(sample, session_id).await;
    }

    fn report_position_error(&self, err: PositionError) {
        warn!("Position update failed: {}", err);
        self.events
            .emit_error(ErrorContext::Geolocation, &Error::from(err));
    }

    fn dispose(&self) {
        self.lifetime.cancel();

        let (watch_id, tasks) = {
            let mut state = self.lock_state();
            state.generation = state.generation.wrapping_add(1);
            state.phase = TrackingPhase::Idle;
            state.session = None;
            state.last_location = None;
            state.workers = None;
            (state.watch_id.take(), state.tasks.take())
        };

        if let Some(tasks) = tasks {
            tasks.cancel();
        }
        if let Some(id) = watch_id {
            self.positions.clear_watch(id);
        }
        self.background.stop();
        self.background.shutdown();
        debug!("Tracker disposed");
    }
}

/// Returns a failed or abandoned start to idle.
struct StartRollback<'a> {
    inner: &'a TrackerInner,
    generation: u64,
    armed: bool,
}

impl Drop for StartRollback<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.inner.lock_state();
        if state.generation == self.generation && state.phase == TrackingPhase::Starting {
            state.phase = TrackingPhase::Idle;
            state.session = None;
            state.last_location = None;
        }
    }
}

/// Finishes a stop even if the session-end call is cancelled midway.
struct ResetToIdle<'a> {
    inner: &'a TrackerInner,
}

impl Drop for ResetToIdle<'_> {
    fn drop(&mut self) {
        let mut state = self.inner.lock_state();
        if state.phase == TrackingPhase::Stopping {
            state.phase = TrackingPhase::Idle;
            state.session = None;
            state.last_location = None;
        }
    }
}

/// Debounces raw fixes and feeds the survivors to the tracker.
async fn run_sampler(
    inner: Weak<TrackerInner>,
    session_id: String,
    mut watch_rx: mpsc::UnboundedReceiver<PositionUpdate>,
    mut poll_rx: mpsc::UnboundedReceiver<PositionUpdate>,
    debounce: Duration,
    cancel: CancellationToken,
) {
    let mut pending: Option<(Position, SampleSource)> = None;
    let mut watch_open = true;
    let mut poll_open = true;
    let deadline = sleep(debounce);
    tokio::pin!(deadline);

    loop {
        let (update, source) = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = &mut deadline, if pending.is_some() => {
                if let Some((position, source)) = pending.take() {
                    let Some(inner) = inner.upgrade() else { break };
                    inner.handle_position(&session_id, position, source).await;
                }
                continue;
            }
            update = watch_rx.recv(), if watch_open => match update {
                Some(update) => (update, SampleSource::Watch),
                None => {
                    watch_open = false;
                    continue;
                }
            },
            update = poll_rx.recv(), if poll_open => match update {
                Some(update) => (update, SampleSource::Poll),
                None => {
                    poll_open = false;
                    continue;
                }
            },
        };

        match update {
            PositionUpdate::Fix(position) => {
                // The window opens on the first fix; later fixes only replace it
                if pending.is_none() {
                    deadline.as_mut().reset(Instant::now() + debounce);
                }
                pending = Some((position, source));
            }
            PositionUpdate::Failed(err) => {
                let Some(inner) = inner.upgrade() else { break };
                inner.report_position_error(err);
            }
        }
    }
    debug!("Sampler for session {} stopped", session_id);
}

/// Requests a fresh fix every `period`.
async fn run_poll_timer(
    positions: Arc<dyn PositionSource>,
    options: PositionOptions,
    period: Duration,
    sink: mpsc::UnboundedSender<PositionUpdate>,
    cancel: CancellationToken,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let update = tokio::select! {
            _ = cancel.cancelled() => break,
            result = positions.current_position(options) => match result {
                Ok(position) => PositionUpdate::Fix(position),
                Err(e) => PositionUpdate::Failed(e),
            },
        };
        if sink.send(update).is_err() {
            break;
        }
    }
}

/// Stops the session once it has run for `limit`.
async fn run_duration_timer(inner: Weak<TrackerInner>, limit: Duration, cancel: CancellationToken) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = sleep(limit) => {
            if let Some(inner) = inner.upgrade() {
                info!("Maximum tracking duration of {:?} reached", limit);
                inner.stop_tracking().await;
            }
        }
    }
}

/// Drains the failure queue on every offline-to-online transition.
async fn run_connectivity_monitor(
    inner: Weak<TrackerInner>,
    mut online: watch::Receiver<bool>,
    mut was_online: bool,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = online.changed() => {
                if changed.is_err() {
                    break;
                }
                let is_online = *online.borrow_and_update();
                if is_online && !was_online {
                    let Some(inner) = inner.upgrade() else { break };
                    info!("Connectivity restored, retrying failed locations");
                    inner.delivery.retry_failed().await;
                }
                was_online = is_online;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockApi, MockEnvironment, MockPermissions, MockPositionSource};
    use waypost_types::MemoryStore;

    #[test]
    fn test_builder_requires_collaborators() {
        let err = LocationTracker::builder()
            .api(Arc::new(MockApi::new()))
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
        assert!(err.to_string().contains("store"));
    }

    #[test]
    fn test_builder_validates_config() {
        let config = TrackerConfig {
            debounce: Duration::ZERO,
            ..Default::default()
        };
        let result = LocationTracker::builder()
            .config(config)
            .api(Arc::new(MockApi::new()))
            .store(Arc::new(MemoryStore::new()))
            .positions(Arc::new(MockPositionSource::new()))
            .permissions(Arc::new(MockPermissions::new(PermissionState::Granted)))
            .environment(Arc::new(MockEnvironment::new()))
            .build();
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(TrackingPhase::default(), TrackingPhase::Idle);
        assert_eq!(TrackingPhase::Stopping.to_string(), "stopping");
    }
}
