//! Background worker coordination.
//!
//! The page and the background worker share no memory; they exchange the
//! small tagged messages defined here over a [`WorkerChannel`]. Requests that
//! need an answer (`GET_AUTH_TOKEN`) carry a one-shot reply port.
//!
//! Background tracking is best effort. When the host has no worker support,
//! registration fails, or the worker never becomes ready, the coordinator
//! logs a warning and tracking continues in the foreground only.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use waypost_types::LocationSample;

use crate::error::{Error, Result};
use crate::events::{ErrorContext, EventBus};
use crate::traits::TokenProvider;

/// Messages sent by the worker to the page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
#[non_exhaustive]
pub enum WorkerMessage {
    /// The worker needs the bearer token; answered on the reply port.
    GetAuthToken,
    /// The worker delivered a sample on its own.
    LocationRecorded {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        location: Option<LocationSample>,
    },
    /// The worker failed to sample or deliver.
    LocationError { error: String },
}

/// Messages sent by the page to the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
#[non_exhaustive]
pub enum PageMessage {
    StartBackgroundTracking {
        session_id: String,
        /// Sampling interval in milliseconds.
        interval: u64,
        high_accuracy: bool,
    },
    StopBackgroundTracking,
}

/// Answers the page sends on a reply port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum PageReply {
    AuthToken { token: Option<String> },
}

/// A worker message plus the port to answer it on, if it expects an answer.
#[derive(Debug)]
pub struct WorkerEnvelope {
    pub message: WorkerMessage,
    pub reply: Option<oneshot::Sender<PageReply>>,
}

impl WorkerEnvelope {
    /// A message that expects no answer.
    pub fn notify(message: WorkerMessage) -> Self {
        Self {
            message,
            reply: None,
        }
    }

    /// A message together with the receiving end of its reply port.
    pub fn request(message: WorkerMessage) -> (Self, oneshot::Receiver<PageReply>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                message,
                reply: Some(tx),
            },
            rx,
        )
    }
}

/// Both directions of a registered worker.
pub struct WorkerChannel {
    pub to_worker: mpsc::UnboundedSender<PageMessage>,
    pub from_worker: mpsc::UnboundedReceiver<WorkerEnvelope>,
    /// Resolves once the worker is active and can receive messages.
    pub ready: BoxFuture<'static, Result<()>>,
}

/// Host able to run the background worker script.
#[async_trait]
pub trait WorkerHost: Send + Sync {
    /// Whether this host can run workers at all.
    fn is_supported(&self) -> bool;

    /// Register the worker at `script_url` with the given scope.
    async fn register(&self, script_url: &str, scope: &str) -> Result<WorkerChannel>;
}

/// Page-side end of the background worker protocol.
pub struct BackgroundCoordinator {
    host: Option<Arc<dyn WorkerHost>>,
    tokens: Arc<dyn TokenProvider>,
    events: Arc<EventBus>,
    script_url: String,
    scope: String,
    ready_timeout: Duration,
    sender: Mutex<Option<mpsc::UnboundedSender<PageMessage>>>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for BackgroundCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundCoordinator")
            .field("script_url", &self.script_url)
            .field("scope", &self.scope)
            .field("available", &self.is_available())
            .finish_non_exhaustive()
    }
}

impl BackgroundCoordinator {
    pub fn new(
        host: Option<Arc<dyn WorkerHost>>,
        tokens: Arc<dyn TokenProvider>,
        events: Arc<EventBus>,
        script_url: impl Into<String>,
        scope: impl Into<String>,
    ) -> Self {
        Self {
            host,
            tokens,
            events,
            script_url: script_url.into(),
            scope: scope.into(),
            ready_timeout: Duration::from_secs(10),
            sender: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    /// How long to wait for the worker to become ready.
    #[must_use]
    pub fn ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    /// Register the worker and start listening to it.
    ///
    /// Returns whether background tracking is available. Calling this again
    /// after a successful registration is a no-op.
    pub async fn register(&self) -> bool {
        if self.is_available() {
            return true;
        }
        let Some(host) = self.host.as_ref() else {
            debug!("No worker host configured, background tracking disabled");
            return false;
        };
        if !host.is_supported() {
            warn!("Background workers not supported, tracking in foreground only");
            return false;
        }

        let channel = match host.register(&self.script_url, &self.scope).await {
            Ok(channel) => channel,
            Err(e) => {
                warn!("Worker registration failed, tracking in foreground only: {}", e);
                return false;
            }
        };

        let WorkerChannel {
            to_worker,
            from_worker,
            ready,
        } = channel;

        match tokio::time::timeout(self.ready_timeout, ready).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!("Worker failed to activate, tracking in foreground only: {}", e);
                return false;
            }
            Err(_) => {
                warn!(
                    "Worker not ready after {:?}, tracking in foreground only",
                    self.ready_timeout
                );
                return false;
            }
        }

        tokio::spawn(run_message_loop(
            from_worker,
            Arc::clone(&self.tokens),
            Arc::clone(&self.events),
            self.cancel.child_token(),
        ));

        *self.lock_sender() = Some(to_worker);
        info!("Background worker registered at {}", self.script_url);
        true
    }

    /// Whether a registered worker is reachable.
    pub fn is_available(&self) -> bool {
        self.lock_sender()
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Ask the worker to sample on its own. Returns `false` if no worker is
    /// available.
    pub fn start(&self, session_id: &str, interval: Duration, high_accuracy: bool) -> bool {
        self.send(PageMessage::StartBackgroundTracking {
            session_id: session_id.to_string(),
            interval: interval.as_millis() as u64,
            high_accuracy,
        })
    }

    /// Ask the worker to stop sampling.
    pub fn stop(&self) -> bool {
        self.send(PageMessage::StopBackgroundTracking)
    }

    /// Stop listening to the worker and drop the channel.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.lock_sender().take();
    }

    fn send(&self, message: PageMessage) -> bool {
        let mut sender = self.lock_sender();
        let Some(tx) = sender.as_ref() else {
            return false;
        };
        if tx.send(message).is_err() {
            warn!("Background worker went away, tracking in foreground only");
            sender.take();
            return false;
        }
        true
    }

    fn lock_sender(&self) -> std::sync::MutexGuard<'_, Option<mpsc::UnboundedSender<PageMessage>>> {
        self.sender.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for BackgroundCoordinator {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_message_loop(
    mut from_worker: mpsc::UnboundedReceiver<WorkerEnvelope>,
    tokens: Arc<dyn TokenProvider>,
    events: Arc<EventBus>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Worker message loop cancelled");
                break;
            }
            envelope = from_worker.recv() => match envelope {
                Some(envelope) => handle_worker_message(envelope, tokens.as_ref(), &events),
                None => {
                    debug!("Worker channel closed");
                    break;
                }
            },
        }
    }
}

fn handle_worker_message(envelope: WorkerEnvelope, tokens: &dyn TokenProvider, events: &EventBus) {
    let WorkerEnvelope { message, reply } = envelope;
    match message {
        WorkerMessage::GetAuthToken => {
            let Some(reply) = reply else {
                warn!("GET_AUTH_TOKEN without a reply port, ignoring");
                return;
            };
            if reply
                .send(PageReply::AuthToken {
                    token: tokens.token(),
                })
                .is_err()
            {
                debug!("Worker dropped the token reply port");
            }
        }
        WorkerMessage::LocationRecorded { location } => match location {
            Some(sample) => debug!(
                "Worker recorded location ({:.6}, {:.6})",
                sample.latitude, sample.longitude
            ),
            None => debug!("Worker recorded a location"),
        },
        WorkerMessage::LocationError { error } => {
            warn!("Background worker error: {}", error);
            events.emit_error(ErrorContext::BackgroundTracking, &Error::tracking_failed(error));
        }
    }
}
