//! Delivery pipeline: retried sample upload with failure-queue fallback.
//!
//! [`DeliveryPipeline::deliver`] never fails its caller. A sample either
//! reaches the backend (and a `location-updated` event is emitted) or, after
//! the retry policy is exhausted, lands in the [`FailureQueue`] and an
//! `error` event tagged `record-location` is emitted.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use waypost_types::LocationSample;

use crate::api::LocationApi;
use crate::error::Result;
use crate::events::{ErrorContext, EventBus, TrackingEvent};
use crate::queue::{FailureQueue, RetryReport};
use crate::retry::{RetryConfig, with_retry};

/// What happened to a sample handed to the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOutcome {
    /// Accepted by the backend.
    Delivered,
    /// Retries exhausted; persisted for a later retry.
    Queued,
    /// Not attempted because no session was active.
    Rejected,
}

/// Uploads samples and drains the failure queue.
pub struct DeliveryPipeline {
    api: Arc<dyn LocationApi>,
    retry: RetryConfig,
    queue: Arc<FailureQueue>,
    events: Arc<EventBus>,
}

impl std::fmt::Debug for DeliveryPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryPipeline")
            .field("retry", &self.retry)
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

impl DeliveryPipeline {
    pub fn new(
        api: Arc<dyn LocationApi>,
        retry: RetryConfig,
        queue: Arc<FailureQueue>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            api,
            retry,
            queue,
            events,
        }
    }

    /// The queue that receives undeliverable samples.
    pub fn queue(&self) -> &FailureQueue {
        &self.queue
    }

    /// A single upload attempt, no retry.
    pub async fn post_once(&self, sample: &LocationSample, session_id: &str) -> Result<()> {
        self.api.record_location(sample, session_id).await
    }

    /// Upload with retry; queue the sample if every attempt fails.
    pub async fn deliver(&self, sample: LocationSample, session_id: &str) -> DeliveryOutcome {
        let result = with_retry(&self.retry, "location/record", || {
            self.post_once(&sample, session_id)
        })
        .await;

        match result {
            Ok(()) => {
                debug!(
                    "Delivered sample ({:.6}, {:.6})",
                    sample.latitude, sample.longitude
                );
                self.events.emit(TrackingEvent::LocationUpdated { sample });
                DeliveryOutcome::Delivered
            }
            Err(e) => {
                warn!("Delivery failed, queueing sample: {}", e);
                if let Err(store_err) = self.queue.store(sample, session_id) {
                    error!("Could not persist failed sample: {}", store_err);
                }
                self.events.emit_error(ErrorContext::RecordLocation, &e);
                DeliveryOutcome::Queued
            }
        }
    }

    /// Redeliver every queued record once.
    ///
    /// Records are posted in queue order with a single attempt each, so a
    /// long outage does not compound backoff delays. Only the records that
    /// were accepted are removed.
    pub async fn retry_failed(&self) -> RetryReport {
        let records = self.queue.records();
        if records.is_empty() {
            return RetryReport::default();
        }

        let attempted = records.len();
        let mut delivered = Vec::with_capacity(attempted);
        for record in records {
            match self.post_once(&record.sample, &record.session_id).await {
                Ok(()) => delivered.push(record),
                Err(e) => debug!("Retry of queued sample failed: {}", e),
            }
        }

        let remaining = match self.queue.acknowledge(&delivered) {
            Ok(remaining) => remaining,
            Err(e) => {
                // Delivered records stay queued and will be sent again
                warn!("Could not rewrite failure queue: {}", e);
                self.queue.len()
            }
        };

        let report = RetryReport {
            attempted,
            delivered: delivered.len(),
            remaining,
        };
        info!(
            "Retried {} queued sample(s): {} delivered, {} remaining",
            report.attempted, report.delivered, report.remaining
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use crate::mock::MockApi;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use waypost_types::{KeyValueStore, MemoryStore, NetworkType, Position, SampleSource};

    fn sample(lat: f64) -> LocationSample {
        LocationSample::from_position(
            &Position::now(lat, 24.1, 5.0),
            "device_test",
            NetworkType::Wifi,
            None,
            SampleSource::Watch,
        )
    }

    fn pipeline(api: Arc<MockApi>) -> (DeliveryPipeline, Arc<EventBus>) {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let queue = Arc::new(FailureQueue::new(store, "failed", 100));
        let events = Arc::new(EventBus::default());
        let pipeline = DeliveryPipeline::new(api, RetryConfig::default(), queue, Arc::clone(&events));
        (pipeline, events)
    }

    #[tokio::test]
    async fn test_deliver_success_emits_location_updated() {
        let api = Arc::new(MockApi::new());
        let (pipeline, events) = pipeline(Arc::clone(&api));
        let mut rx = events.subscribe();

        let outcome = pipeline.deliver(sample(56.0), "sess-1").await;

        assert_eq!(outcome, DeliveryOutcome::Delivered);
        assert_eq!(api.recorded().len(), 1);
        assert_eq!(api.recorded()[0].1, "sess-1");
        assert_eq!(rx.recv().await.unwrap().kind(), EventKind::LocationUpdated);
        assert!(pipeline.queue().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_failures_queue_the_sample() {
        let api = Arc::new(MockApi::new());
        // Would succeed on the 4th attempt
        api.set_record_failures(3);
        let (pipeline, events) = pipeline(Arc::clone(&api));

        let errors = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&errors);
        events.on(EventKind::Error, move |event| {
            if let TrackingEvent::Error { context, .. } = event
                && *context == ErrorContext::RecordLocation
            {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });

        let started = tokio::time::Instant::now();
        let outcome = pipeline.deliver(sample(56.0), "sess-1").await;

        assert_eq!(outcome, DeliveryOutcome::Queued);
        assert_eq!(api.record_attempts(), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(3));
        assert_eq!(errors.load(Ordering::SeqCst), 1);

        let queued = pipeline.queue().records();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].session_id, "sess-1");
        assert_eq!(queued[0].sample.latitude, 56.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_failed_is_idempotent() {
        let api = Arc::new(MockApi::new());
        api.set_record_should_fail(true);
        let (pipeline, _) = pipeline(Arc::clone(&api));

        pipeline.deliver(sample(1.0), "sess-1").await;
        pipeline.deliver(sample(2.0), "sess-1").await;
        assert_eq!(pipeline.queue().len(), 2);

        api.set_record_should_fail(false);
        let before = api.record_attempts();
        let report = pipeline.retry_failed().await;
        assert_eq!(
            report,
            RetryReport {
                attempted: 2,
                delivered: 2,
                remaining: 0
            }
        );
        // One attempt per record, no backoff
        assert_eq!(api.record_attempts() - before, 2);

        let before = api.record_attempts();
        let report = pipeline.retry_failed().await;
        assert_eq!(report, RetryReport::default());
        assert_eq!(api.record_attempts(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_failed_keeps_records_that_fail_again() {
        let api = Arc::new(MockApi::new());
        api.set_record_should_fail(true);
        let (pipeline, _) = pipeline(Arc::clone(&api));

        pipeline.deliver(sample(1.0), "sess-1").await;
        pipeline.deliver(sample(2.0), "sess-1").await;

        // First redelivery succeeds, second fails
        api.set_record_should_fail(false);
        api.fail_record_after(1);
        let report = pipeline.retry_failed().await;

        assert_eq!(report.attempted, 2);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.remaining, 1);
        assert_eq!(pipeline.queue().records()[0].sample.latitude, 2.0);
    }
}
