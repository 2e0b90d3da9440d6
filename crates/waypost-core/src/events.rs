//! Tracking event bus.
//!
//! Consumers either register per-kind handlers with [`EventBus::on`] or take
//! a broadcast receiver with [`EventBus::subscribe`]. Handlers run inline on
//! the emitting task; a panicking handler is caught and logged so it cannot
//! abort the operation that emitted the event or starve other handlers.

use core::fmt;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::error;

use waypost_types::{LocationPreferences, LocationSample, PermissionState};

use crate::error::{Error, TrackingError};

/// Events emitted by the tracker.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
#[non_exhaustive]
pub enum TrackingEvent {
    /// A session was opened and sampling is running.
    TrackingStarted { session_id: String },
    /// The session was closed and local resources released.
    TrackingStopped { session_id: String },
    /// A sample was accepted by the backend.
    LocationUpdated { sample: LocationSample },
    /// A failure in the subsystem named by `context`.
    Error {
        context: ErrorContext,
        error: TrackingError,
    },
    /// The platform reported a new permission state.
    PermissionChanged { state: PermissionState },
    /// Preferences were changed through the tracker.
    PreferencesUpdated { preferences: LocationPreferences },
}

impl TrackingEvent {
    /// The kind used to route this event to handlers.
    pub fn kind(&self) -> EventKind {
        match self {
            TrackingEvent::TrackingStarted { .. } => EventKind::TrackingStarted,
            TrackingEvent::TrackingStopped { .. } => EventKind::TrackingStopped,
            TrackingEvent::LocationUpdated { .. } => EventKind::LocationUpdated,
            TrackingEvent::Error { .. } => EventKind::Error,
            TrackingEvent::PermissionChanged { .. } => EventKind::PermissionChanged,
            TrackingEvent::PreferencesUpdated { .. } => EventKind::PreferencesUpdated,
        }
    }

    /// Build an `error` event from an engine error.
    pub fn error(context: ErrorContext, err: &Error) -> Self {
        TrackingEvent::Error {
            context,
            error: TrackingError::from(err),
        }
    }
}

/// Event names as exposed to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    TrackingStarted,
    TrackingStopped,
    LocationUpdated,
    Error,
    PermissionChanged,
    PreferencesUpdated,
}

impl EventKind {
    /// All kinds, in declaration order.
    pub const ALL: [EventKind; 6] = [
        EventKind::TrackingStarted,
        EventKind::TrackingStopped,
        EventKind::LocationUpdated,
        EventKind::Error,
        EventKind::PermissionChanged,
        EventKind::PreferencesUpdated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::TrackingStarted => "tracking-started",
            EventKind::TrackingStopped => "tracking-stopped",
            EventKind::LocationUpdated => "location-updated",
            EventKind::Error => "error",
            EventKind::PermissionChanged => "permission-changed",
            EventKind::PreferencesUpdated => "preferences-updated",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subsystem that produced an `error` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub enum ErrorContext {
    /// Opening a session (`start_tracking`).
    StartTracking,
    /// Delivering a sample.
    RecordLocation,
    /// Reported by the background worker.
    BackgroundTracking,
    /// Runtime failure of the position watch or poll.
    Geolocation,
}

impl ErrorContext {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorContext::StartTracking => "start-tracking",
            ErrorContext::RecordLocation => "record-location",
            ErrorContext::BackgroundTracking => "background-tracking",
            ErrorContext::Geolocation => "geolocation",
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handle returned by [`EventBus::on`], used to unregister the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type Handler = Arc<dyn Fn(&TrackingEvent) + Send + Sync>;

/// Receiver for tracking events.
pub type EventReceiver = broadcast::Receiver<TrackingEvent>;

/// Typed publish/subscribe surface for tracker events.
pub struct EventBus {
    handlers: Mutex<HashMap<EventKind, Vec<(HandlerId, Handler)>>>,
    next_id: AtomicU64,
    sender: broadcast::Sender<TrackingEvent>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("handlers", &self.handler_count())
            .field("receivers", &self.sender.receiver_count())
            .finish()
    }
}

impl EventBus {
    /// Create a bus whose broadcast channel buffers `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            handlers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            sender,
        }
    }

    /// Register a handler for one event kind.
    ///
    /// # Example
    ///
    /// ```
    /// use waypost_core::{EventBus, EventKind, TrackingEvent};
    ///
    /// let bus = EventBus::default();
    /// let id = bus.on(EventKind::TrackingStarted, |event| {
    ///     if let TrackingEvent::TrackingStarted { session_id } = event {
    ///         println!("started {session_id}");
    ///     }
    /// });
    /// assert!(bus.off(EventKind::TrackingStarted, id));
    /// ```
    pub fn on<F>(&self, kind: EventKind, handler: F) -> HandlerId
    where
        F: Fn(&TrackingEvent) + Send + Sync + 'static,
    {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock()
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove a handler. Returns `false` if it was not registered for `kind`.
    pub fn off(&self, kind: EventKind, id: HandlerId) -> bool {
        let mut handlers = self.lock();
        let Some(list) = handlers.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|(handler_id, _)| *handler_id != id);
        before != list.len()
    }

    /// Subscribe to every event through a broadcast channel.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Deliver an event to every handler of its kind and to all subscribers.
    pub fn emit(&self, event: TrackingEvent) {
        let kind = event.kind();
        // Snapshot so handlers may call on/off without deadlocking
        let handlers: Vec<Handler> = self
            .lock()
            .get(&kind)
            .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();

        for handler in handlers {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                error!(
                    "Handler for '{}' panicked: {}",
                    kind,
                    panic_message(panic.as_ref())
                );
            }
        }

        // No receivers is fine
        let _ = self.sender.send(event);
    }

    /// Emit an `error` event for `err` tagged with `context`.
    pub fn emit_error(&self, context: ErrorContext, err: &Error) {
        self.emit(TrackingEvent::error(context, err));
    }

    /// Number of registered handlers across all kinds.
    pub fn handler_count(&self) -> usize {
        self.lock().values().map(Vec::len).sum()
    }

    /// Get the number of active broadcast receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Drop every registered handler.
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<EventKind, Vec<(HandlerId, Handler)>>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(100)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn started(id: &str) -> TrackingEvent {
        TrackingEvent::TrackingStarted {
            session_id: id.to_string(),
        }
    }

    #[test]
    fn test_handlers_receive_only_their_kind() {
        let bus = EventBus::default();
        let started_count = Arc::new(AtomicUsize::new(0));
        let stopped_count = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&started_count);
        bus.on(EventKind::TrackingStarted, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        let c = Arc::clone(&stopped_count);
        bus.on(EventKind::TrackingStopped, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(started("s-1"));
        bus.emit(started("s-2"));

        assert_eq!(started_count.load(Ordering::SeqCst), 2);
        assert_eq!(stopped_count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_off_removes_handler() {
        let bus = EventBus::default();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let id = bus.on(EventKind::TrackingStarted, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(started("a"));
        assert!(bus.off(EventKind::TrackingStarted, id));
        assert!(!bus.off(EventKind::TrackingStarted, id));
        assert!(!bus.off(EventKind::Error, id));
        bus.emit(started("b"));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.handler_count(), 0);
    }

    #[test]
    fn test_panicking_handler_does_not_block_others() {
        let bus = EventBus::default();
        let count = Arc::new(AtomicUsize::new(0));

        bus.on(EventKind::TrackingStarted, |_| panic!("faulty subscriber"));
        let c = Arc::clone(&count);
        bus.on(EventKind::TrackingStarted, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(started("s-1"));
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // The bus stays usable afterwards
        bus.emit(started("s-2"));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_handler_can_unregister_itself() {
        let bus = Arc::new(EventBus::default());
        let bus_clone = Arc::clone(&bus);
        let slot = Arc::new(Mutex::new(None::<HandlerId>));
        let slot_clone = Arc::clone(&slot);

        let id = bus.on(EventKind::TrackingStarted, move |_| {
            if let Some(id) = *slot_clone.lock().unwrap() {
                bus_clone.off(EventKind::TrackingStarted, id);
            }
        });
        *slot.lock().unwrap() = Some(id);

        bus.emit(started("s-1"));
        assert_eq!(bus.handler_count(), 0);
    }

    #[tokio::test]
    async fn test_subscribe_receives_all_events() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.emit(started("s-1"));
        bus.emit_error(ErrorContext::RecordLocation, &Error::network("offline"));

        assert_eq!(rx.recv().await.unwrap(), started("s-1"));
        match rx.recv().await.unwrap() {
            TrackingEvent::Error { context, error } => {
                assert_eq!(context, ErrorContext::RecordLocation);
                assert_eq!(error.code, crate::ErrorCode::NetworkError);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_event_wire_format() {
        let json = serde_json::to_value(started("abc")).unwrap();
        assert_eq!(json["type"], "tracking-started");
        assert_eq!(json["sessionId"], "abc");

        let event = TrackingEvent::error(
            ErrorContext::BackgroundTracking,
            &Error::tracking_failed("worker crashed"),
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["context"], "background-tracking");
        assert_eq!(json["error"]["code"], "TRACKING_FAILED");

        let event = TrackingEvent::PermissionChanged {
            state: PermissionState::Denied,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "permission-changed");
        assert_eq!(json["state"], "denied");
    }

    #[test]
    fn test_event_kind_names() {
        let names: Vec<&str> = EventKind::ALL.iter().map(EventKind::as_str).collect();
        assert_eq!(
            names,
            [
                "tracking-started",
                "tracking-stopped",
                "location-updated",
                "error",
                "permission-changed",
                "preferences-updated"
            ]
        );
        assert_eq!(ErrorContext::RecordLocation.to_string(), "record-location");
    }
}
