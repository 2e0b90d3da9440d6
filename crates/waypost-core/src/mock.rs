//! Mock platform and backend implementations for testing.
//!
//! Every trait the tracker is generic over has an in-memory stand-in here, so
//! the whole engine can be driven from tests without a browser, a GPS or a
//! network.
//!
//! # Features
//!
//! - **Failure injection**: fail a number of calls, every call, or every call
//!   after the next N successes
//! - **Latency simulation**: delay backend calls to exercise timeouts
//! - **Scripted fixes**: push positions and errors into armed watches
//!
//! # Example
//!
//! ```
//! use waypost_core::mock::MockPositionSource;
//! use waypost_core::{PositionSource, PositionUpdate};
//! use waypost_types::PositionOptions;
//!
//! let source = MockPositionSource::new();
//! let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//! let id = source.watch_position(PositionOptions::default(), tx).unwrap();
//!
//! assert_eq!(source.push_fix(56.9496, 24.1052, 5.0), 1);
//! assert!(matches!(rx.try_recv(), Ok(PositionUpdate::Fix(_))));
//!
//! source.clear_watch(id);
//! assert_eq!(source.push_fix(56.9496, 24.1052, 5.0), 0);
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use waypost_types::{
    ConnectionCapabilities, DeviceInfo, LocationPreferences, LocationSample, PermissionState,
    Position, PositionError, PositionOptions,
};

use crate::api::{HistoryPage, HistoryQuery, LocationApi};
use crate::background::{PageMessage, PageReply, WorkerChannel, WorkerEnvelope, WorkerHost, WorkerMessage};
use crate::error::{Error, Result};
use crate::traits::{Environment, PermissionSource, PositionSource, PositionUpdate, WatchId};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ==========================================================================
// Backend
// ==========================================================================

/// In-memory [`LocationApi`].
///
/// Sessions are numbered `session-1`, `session-2`, ... Recorded samples are
/// kept and served back through `history` and `current`.
pub struct MockApi {
    preferences: Mutex<LocationPreferences>,
    recorded: Mutex<Vec<(LocationSample, String)>>,
    ended: Mutex<Vec<String>>,
    started_devices: Mutex<Vec<DeviceInfo>>,
    session_id: Mutex<Option<String>>,
    session_counter: AtomicU64,
    start_count: AtomicU32,
    end_count: AtomicU32,
    record_attempts: AtomicU32,
    /// Number of record calls to fail before succeeding.
    remaining_record_failures: AtomicU32,
    record_should_fail: AtomicBool,
    /// Record calls left to succeed before every call fails.
    record_successes_left: Mutex<Option<u32>>,
    remaining_start_failures: AtomicU32,
    start_should_fail: AtomicBool,
    end_should_fail: AtomicBool,
    preferences_should_fail: AtomicBool,
    /// Simulated latency of every call in milliseconds (0 = no delay).
    latency_ms: AtomicU64,
}

impl std::fmt::Debug for MockApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockApi")
            .field("start_count", &self.start_count.load(Ordering::Relaxed))
            .field("record_attempts", &self.record_attempts.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Default for MockApi {
    fn default() -> Self {
        Self::new()
    }
}

impl MockApi {
    /// Create a backend that accepts everything, with tracking enabled.
    pub fn new() -> Self {
        Self {
            preferences: Mutex::new(LocationPreferences {
                tracking_enabled: true,
                ..Default::default()
            }),
            recorded: Mutex::new(Vec::new()),
            ended: Mutex::new(Vec::new()),
            started_devices: Mutex::new(Vec::new()),
            session_id: Mutex::new(None),
            session_counter: AtomicU64::new(0),
            start_count: AtomicU32::new(0),
            end_count: AtomicU32::new(0),
            record_attempts: AtomicU32::new(0),
            remaining_record_failures: AtomicU32::new(0),
            record_should_fail: AtomicBool::new(false),
            record_successes_left: Mutex::new(None),
            remaining_start_failures: AtomicU32::new(0),
            start_should_fail: AtomicBool::new(false),
            end_should_fail: AtomicBool::new(false),
            preferences_should_fail: AtomicBool::new(false),
            latency_ms: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn with_preferences(self, preferences: LocationPreferences) -> Self {
        self.set_preferences(preferences);
        self
    }

    pub fn set_preferences(&self, preferences: LocationPreferences) {
        *lock(&self.preferences) = preferences;
    }

    /// Return this id from every `start_session` call instead of numbering.
    pub fn set_session_id(&self, id: impl Into<String>) {
        *lock(&self.session_id) = Some(id.into());
    }

    /// Fail the next `count` record calls, then succeed.
    pub fn set_record_failures(&self, count: u32) {
        self.remaining_record_failures.store(count, Ordering::Relaxed);
    }

    pub fn set_record_should_fail(&self, fail: bool) {
        self.record_should_fail.store(fail, Ordering::Relaxed);
    }

    /// Let the next `successes` record calls through, then fail every call.
    pub fn fail_record_after(&self, successes: u32) {
        *lock(&self.record_successes_left) = Some(successes);
    }

    /// Fail the next `count` session starts, then succeed.
    pub fn set_start_failures(&self, count: u32) {
        self.remaining_start_failures.store(count, Ordering::Relaxed);
    }

    pub fn set_start_should_fail(&self, fail: bool) {
        self.start_should_fail.store(fail, Ordering::Relaxed);
    }

    pub fn set_end_should_fail(&self, fail: bool) {
        self.end_should_fail.store(fail, Ordering::Relaxed);
    }

    pub fn set_preferences_should_fail(&self, fail: bool) {
        self.preferences_should_fail.store(fail, Ordering::Relaxed);
    }

    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Samples accepted so far, with their session ids.
    pub fn recorded(&self) -> Vec<(LocationSample, String)> {
        lock(&self.recorded).clone()
    }

    /// Session ids passed to `end_session`, including failed calls.
    pub fn ended_sessions(&self) -> Vec<String> {
        lock(&self.ended).clone()
    }

    /// Device info sent with each `start_session` call, including failed calls.
    pub fn started_devices(&self) -> Vec<DeviceInfo> {
        lock(&self.started_devices).clone()
    }

    pub fn record_attempts(&self) -> u32 {
        self.record_attempts.load(Ordering::Relaxed)
    }

    pub fn start_count(&self) -> u32 {
        self.start_count.load(Ordering::Relaxed)
    }

    pub fn end_count(&self) -> u32 {
        self.end_count.load(Ordering::Relaxed)
    }

    async fn simulate_latency(&self) {
        let latency = self.latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
    }

    fn check_record(&self) -> Result<()> {
        if self.remaining_record_failures.load(Ordering::Relaxed) > 0 {
            self.remaining_record_failures.fetch_sub(1, Ordering::Relaxed);
            return Err(Error::network("mock record failure"));
        }
        if self.record_should_fail.load(Ordering::Relaxed) {
            return Err(Error::network("mock record failure"));
        }
        let mut left = lock(&self.record_successes_left);
        match left.as_mut() {
            Some(0) => Err(Error::network("mock record failure")),
            Some(n) => {
                *n -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl LocationApi for MockApi {
    async fn start_session(&self, device: &DeviceInfo) -> Result<String> {
        self.start_count.fetch_add(1, Ordering::Relaxed);
        lock(&self.started_devices).push(device.clone());
        self.simulate_latency().await;

        if self.remaining_start_failures.load(Ordering::Relaxed) > 0 {
            self.remaining_start_failures.fetch_sub(1, Ordering::Relaxed);
            return Err(Error::network("mock session start failure"));
        }
        if self.start_should_fail.load(Ordering::Relaxed) {
            return Err(Error::api(500, "mock session start failure"));
        }

        if let Some(id) = lock(&self.session_id).clone() {
            return Ok(id);
        }
        let n = self.session_counter.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(format!("session-{}", n))
    }

    async fn end_session(&self, session_id: &str) -> Result<()> {
        self.end_count.fetch_add(1, Ordering::Relaxed);
        lock(&self.ended).push(session_id.to_string());
        self.simulate_latency().await;

        if self.end_should_fail.load(Ordering::Relaxed) {
            return Err(Error::network("mock session end failure"));
        }
        Ok(())
    }

    async fn record_location(&self, sample: &LocationSample, session_id: &str) -> Result<()> {
        self.record_attempts.fetch_add(1, Ordering::Relaxed);
        self.simulate_latency().await;
        self.check_record()?;
        lock(&self.recorded).push((sample.clone(), session_id.to_string()));
        Ok(())
    }

    async fn get_preferences(&self) -> Result<LocationPreferences> {
        self.simulate_latency().await;
        if self.preferences_should_fail.load(Ordering::Relaxed) {
            return Err(Error::api(503, "mock preferences failure"));
        }
        Ok(lock(&self.preferences).clone())
    }

    async fn update_preferences(
        &self,
        preferences: &LocationPreferences,
    ) -> Result<LocationPreferences> {
        self.simulate_latency().await;
        if self.preferences_should_fail.load(Ordering::Relaxed) {
            return Err(Error::api(503, "mock preferences failure"));
        }
        *lock(&self.preferences) = preferences.clone();
        Ok(preferences.clone())
    }

    async fn history(&self, query: &HistoryQuery) -> Result<HistoryPage> {
        self.simulate_latency().await;
        let matching: Vec<LocationSample> = lock(&self.recorded)
            .iter()
            .map(|(sample, _)| sample)
            .filter(|s| query.from.is_none_or(|from| s.metadata.timestamp >= from))
            .filter(|s| query.to.is_none_or(|to| s.metadata.timestamp <= to))
            .cloned()
            .collect();

        let page = query.page.unwrap_or(1).max(1);
        let page_size = query.page_size.unwrap_or(50).max(1);
        let items = matching
            .iter()
            .skip(((page - 1) * page_size) as usize)
            .take(page_size as usize)
            .cloned()
            .collect();

        Ok(HistoryPage {
            items,
            total: matching.len() as u64,
            page,
            page_size,
        })
    }

    async fn current(&self) -> Result<Option<LocationSample>> {
        self.simulate_latency().await;
        Ok(lock(&self.recorded).last().map(|(sample, _)| sample.clone()))
    }
}

// ==========================================================================
// Positioning
// ==========================================================================

/// Scripted [`PositionSource`].
///
/// Watches receive whatever is pushed with [`push_fix`](Self::push_fix) and
/// [`push_error`](Self::push_error). Single requests resolve with the result
/// set by [`set_current`](Self::set_current), or never resolve if none is set.
#[derive(Default)]
pub struct MockPositionSource {
    watches: Mutex<HashMap<WatchId, mpsc::UnboundedSender<PositionUpdate>>>,
    watch_options: Mutex<Vec<PositionOptions>>,
    next_watch_id: AtomicU64,
    watch_should_fail: AtomicBool,
    current: Mutex<Option<std::result::Result<Position, PositionError>>>,
    current_options: Mutex<Vec<PositionOptions>>,
}

impl std::fmt::Debug for MockPositionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockPositionSource")
            .field("active_watches", &self.active_watches())
            .field("current_requests", &self.current_requests())
            .finish_non_exhaustive()
    }
}

impl MockPositionSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Result of every subsequent `current_position` call.
    pub fn set_current(&self, result: std::result::Result<Position, PositionError>) {
        *lock(&self.current) = Some(result);
    }

    /// Make `watch_position` fail.
    pub fn set_watch_should_fail(&self, fail: bool) {
        self.watch_should_fail.store(fail, Ordering::Relaxed);
    }

    /// Push a fix taken now to every active watch. Returns how many
    /// watches received it.
    pub fn push_fix(&self, latitude: f64, longitude: f64, accuracy: f64) -> usize {
        self.push_position(Position::now(latitude, longitude, accuracy))
    }

    pub fn push_position(&self, position: Position) -> usize {
        self.push(PositionUpdate::Fix(position))
    }

    pub fn push_error(&self, error: PositionError) -> usize {
        self.push(PositionUpdate::Failed(error))
    }

    fn push(&self, update: PositionUpdate) -> usize {
        let mut watches = lock(&self.watches);
        watches.retain(|_, sink| sink.send(update.clone()).is_ok());
        watches.len()
    }

    pub fn active_watches(&self) -> usize {
        lock(&self.watches).len()
    }

    /// Options of the most recently armed watch.
    pub fn last_watch_options(&self) -> Option<PositionOptions> {
        lock(&self.watch_options).last().copied()
    }

    pub fn current_requests(&self) -> usize {
        lock(&self.current_options).len()
    }

    pub fn last_current_options(&self) -> Option<PositionOptions> {
        lock(&self.current_options).last().copied()
    }
}

#[async_trait]
impl PositionSource for MockPositionSource {
    fn watch_position(
        &self,
        options: PositionOptions,
        sink: mpsc::UnboundedSender<PositionUpdate>,
    ) -> Result<WatchId> {
        if self.watch_should_fail.load(Ordering::Relaxed) {
            return Err(Error::PositionUnavailable("mock watch failure".into()));
        }
        let id = self.next_watch_id.fetch_add(1, Ordering::Relaxed) + 1;
        lock(&self.watch_options).push(options);
        lock(&self.watches).insert(id, sink);
        Ok(id)
    }

    fn clear_watch(&self, id: WatchId) {
        lock(&self.watches).remove(&id);
    }

    async fn current_position(
        &self,
        options: PositionOptions,
    ) -> std::result::Result<Position, PositionError> {
        lock(&self.current_options).push(options);
        let result = lock(&self.current).clone();
        match result {
            Some(result) => result,
            None => std::future::pending().await,
        }
    }
}

// ==========================================================================
// Permissions
// ==========================================================================

/// [`PermissionSource`] backed by a watch channel.
pub struct MockPermissions {
    state: watch::Sender<PermissionState>,
    /// State adopted after the first query, simulating a user answering the
    /// prompt.
    resolves_to: Mutex<Option<PermissionState>>,
    queries: AtomicU32,
}

impl std::fmt::Debug for MockPermissions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockPermissions")
            .field("state", &*self.state.borrow())
            .field("queries", &self.queries())
            .finish()
    }
}

impl MockPermissions {
    pub fn new(state: PermissionState) -> Self {
        let (state, _) = watch::channel(state);
        Self {
            state,
            resolves_to: Mutex::new(None),
            queries: AtomicU32::new(0),
        }
    }

    /// Starts at `prompt`; the first query answers the prompt with
    /// `resolves_to`.
    pub fn prompting(resolves_to: PermissionState) -> Self {
        let permissions = Self::new(PermissionState::Prompt);
        *lock(&permissions.resolves_to) = Some(resolves_to);
        permissions
    }

    /// Change the state and notify subscribers.
    pub fn set_state(&self, state: PermissionState) {
        self.state.send_replace(state);
    }

    pub fn queries(&self) -> u32 {
        self.queries.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl PermissionSource for MockPermissions {
    async fn query(&self) -> PermissionState {
        self.queries.fetch_add(1, Ordering::Relaxed);
        let current = *self.state.borrow();
        if let Some(next) = lock(&self.resolves_to).take() {
            self.state.send_replace(next);
        }
        current
    }

    fn changes(&self) -> Option<watch::Receiver<PermissionState>> {
        Some(self.state.subscribe())
    }
}

// ==========================================================================
// Environment
// ==========================================================================

/// Configurable [`Environment`].
///
/// Defaults to a desktop with geolocation, worker, battery and network
/// information support, online, without a known connection type or battery.
pub struct MockEnvironment {
    capabilities: Mutex<ConnectionCapabilities>,
    connection_type: Mutex<Option<String>>,
    battery: Mutex<Option<f64>>,
    battery_fails: AtomicBool,
    online: watch::Sender<bool>,
}

impl std::fmt::Debug for MockEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockEnvironment")
            .field("capabilities", &*lock(&self.capabilities))
            .field("online", &*self.online.borrow())
            .finish_non_exhaustive()
    }
}

impl Default for MockEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEnvironment {
    pub fn new() -> Self {
        let (online, _) = watch::channel(true);
        Self {
            capabilities: Mutex::new(ConnectionCapabilities {
                geolocation: true,
                service_worker: true,
                background_sync: false,
                battery: true,
                network_info: true,
            }),
            connection_type: Mutex::new(None),
            battery: Mutex::new(None),
            battery_fails: AtomicBool::new(false),
            online,
        }
    }

    pub fn set_capabilities(&self, capabilities: ConnectionCapabilities) {
        *lock(&self.capabilities) = capabilities;
    }

    pub fn set_connection_type(&self, connection_type: Option<&str>) {
        *lock(&self.connection_type) = connection_type.map(String::from);
    }

    /// Battery charge as a fraction in `[0, 1]`.
    pub fn set_battery(&self, level: Option<f64>) {
        *lock(&self.battery) = level;
    }

    pub fn set_battery_fails(&self, fail: bool) {
        self.battery_fails.store(fail, Ordering::Relaxed);
    }

    /// Toggle connectivity and notify subscribers.
    pub fn set_online(&self, online: bool) {
        self.online.send_replace(online);
    }
}

#[async_trait]
impl Environment for MockEnvironment {
    fn capabilities(&self) -> ConnectionCapabilities {
        *lock(&self.capabilities)
    }

    fn user_agent(&self) -> String {
        "waypost-mock/1.0".to_string()
    }

    fn platform(&self) -> String {
        "test".to_string()
    }

    fn language(&self) -> String {
        "en-US".to_string()
    }

    fn screen_resolution(&self) -> String {
        "1920x1080".to_string()
    }

    fn timezone(&self) -> String {
        "UTC".to_string()
    }

    fn connection_type(&self) -> Option<String> {
        lock(&self.connection_type).clone()
    }

    async fn battery_level(&self) -> Result<Option<f64>> {
        if self.battery_fails.load(Ordering::Relaxed) {
            return Err(Error::Unknown("mock battery failure".into()));
        }
        Ok(*lock(&self.battery))
    }

    fn connectivity(&self) -> Option<watch::Receiver<bool>> {
        Some(self.online.subscribe())
    }
}

// ==========================================================================
// Background worker
// ==========================================================================

/// [`WorkerHost`] that hands the worker side of each registration to the
/// test through [`take_worker`](Self::take_worker).
pub struct MockWorkerHost {
    supported: bool,
    fail_registration: AtomicBool,
    never_ready: AtomicBool,
    registrations: AtomicU32,
    worker: Mutex<Option<MockWorker>>,
}

impl std::fmt::Debug for MockWorkerHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockWorkerHost")
            .field("supported", &self.supported)
            .field("registrations", &self.registrations())
            .finish_non_exhaustive()
    }
}

impl Default for MockWorkerHost {
    fn default() -> Self {
        Self::new()
    }
}

impl MockWorkerHost {
    pub fn new() -> Self {
        Self {
            supported: true,
            fail_registration: AtomicBool::new(false),
            never_ready: AtomicBool::new(false),
            registrations: AtomicU32::new(0),
            worker: Mutex::new(None),
        }
    }

    /// A host without worker support.
    pub fn unsupported() -> Self {
        Self {
            supported: false,
            ..Self::new()
        }
    }

    pub fn set_fail_registration(&self, fail: bool) {
        self.fail_registration.store(fail, Ordering::Relaxed);
    }

    /// Registrations succeed but the worker never becomes ready.
    pub fn set_never_ready(&self, never: bool) {
        self.never_ready.store(never, Ordering::Relaxed);
    }

    pub fn registrations(&self) -> u32 {
        self.registrations.load(Ordering::Relaxed)
    }

    /// Worker side of the last successful registration.
    pub fn take_worker(&self) -> Option<MockWorker> {
        lock(&self.worker).take()
    }
}

#[async_trait]
impl WorkerHost for MockWorkerHost {
    fn is_supported(&self) -> bool {
        self.supported
    }

    async fn register(&self, script_url: &str, _scope: &str) -> Result<WorkerChannel> {
        self.registrations.fetch_add(1, Ordering::Relaxed);
        if self.fail_registration.load(Ordering::Relaxed) {
            return Err(Error::Unknown(format!("mock registration of {} failed", script_url)));
        }

        let (to_worker, inbox) = mpsc::unbounded_channel();
        let (outbox, from_worker) = mpsc::unbounded_channel();
        *lock(&self.worker) = Some(MockWorker { inbox, outbox });

        let ready: futures::future::BoxFuture<'static, Result<()>> =
            if self.never_ready.load(Ordering::Relaxed) {
                Box::pin(std::future::pending())
            } else {
                Box::pin(async { Ok(()) })
            };

        Ok(WorkerChannel {
            to_worker,
            from_worker,
            ready,
        })
    }
}

/// Worker end of a mock registration.
#[derive(Debug)]
pub struct MockWorker {
    inbox: mpsc::UnboundedReceiver<PageMessage>,
    outbox: mpsc::UnboundedSender<WorkerEnvelope>,
}

impl MockWorker {
    /// Next message from the page, `None` once the page hung up.
    pub async fn next_message(&mut self) -> Option<PageMessage> {
        self.inbox.recv().await
    }

    /// A message the page already sent, without waiting.
    pub fn try_next_message(&mut self) -> Option<PageMessage> {
        self.inbox.try_recv().ok()
    }

    /// Send `GET_AUTH_TOKEN` and wait for the answer.
    pub async fn request_token(&self) -> Option<String> {
        let (envelope, reply) = WorkerEnvelope::request(WorkerMessage::GetAuthToken);
        self.outbox.send(envelope).ok()?;
        match reply.await.ok()? {
            PageReply::AuthToken { token } => token,
        }
    }

    /// Send a message that expects no answer.
    pub fn post(&self, message: WorkerMessage) {
        // The page may already be gone
        let _ = self.outbox.send(WorkerEnvelope::notify(message));
    }
}
