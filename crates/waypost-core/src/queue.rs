//! Bounded, persisted queue of samples that failed delivery.
//!
//! The queue is a JSON array stored under a single key of a
//! [`KeyValueStore`]. Appends trim from the front so the queue never holds
//! more than its capacity; the oldest records are evicted first.
//!
//! Redelivery lives in [`DeliveryPipeline::retry_failed`](crate::DeliveryPipeline::retry_failed).
//! It reads a snapshot with [`FailureQueue::records`], posts each record
//! without holding any lock, then calls [`FailureQueue::acknowledge`] which
//! removes only the delivered records from the *current* list. Records
//! appended while the retry was in flight therefore survive, and a delivered
//! record is never written back.

use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, warn};

use waypost_types::{FailedLocationRecord, KeyValueStore, LocationSample};

use crate::error::Result;

/// Outcome of one pass over the failure queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryReport {
    /// Records that were sent.
    pub attempted: usize,
    /// Records the backend accepted, now removed from the queue.
    pub delivered: usize,
    /// Records left in the queue afterwards.
    pub remaining: usize,
}

/// Persisted failure queue.
pub struct FailureQueue {
    store: Arc<dyn KeyValueStore>,
    key: String,
    capacity: usize,
    // Serialises read-modify-write cycles within this process
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for FailureQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailureQueue")
            .field("key", &self.key)
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl FailureQueue {
    /// Create a queue over `store` under `key`, holding at most `capacity` records.
    pub fn new(store: Arc<dyn KeyValueStore>, key: impl Into<String>, capacity: usize) -> Self {
        Self {
            store,
            key: key.into(),
            capacity: capacity.max(1),
            write_lock: Mutex::new(()),
        }
    }

    /// Maximum number of records kept.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a failed sample, evicting the oldest records beyond capacity.
    pub fn store(&self, sample: LocationSample, session_id: &str) -> Result<()> {
        let record = FailedLocationRecord {
            sample,
            failed_at: OffsetDateTime::now_utc(),
            session_id: session_id.to_string(),
        };

        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut records = self.load();
        records.push(record);
        if records.len() > self.capacity {
            let overflow = records.len() - self.capacity;
            records.drain(..overflow);
            debug!("Failure queue full, evicted {} oldest record(s)", overflow);
        }
        self.save(&records)
    }

    /// All queued records, oldest first.
    pub fn records(&self) -> Vec<FailedLocationRecord> {
        self.load()
    }

    pub fn len(&self) -> usize {
        self.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every queued record.
    pub fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.store.remove(&self.key)?;
        Ok(())
    }

    /// Remove `delivered` records from the current list and return how many
    /// remain.
    ///
    /// Each delivered record removes at most one matching entry, so a sample
    /// that failed twice is only cleared once per delivery.
    pub fn acknowledge(&self, delivered: &[FailedLocationRecord]) -> Result<usize> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut records = self.load();
        if delivered.is_empty() {
            return Ok(records.len());
        }

        for done in delivered {
            if let Some(pos) = records.iter().position(|r| same_record(r, done)) {
                records.remove(pos);
            }
        }

        if records.is_empty() {
            self.store.remove(&self.key)?;
        } else {
            self.save(&records)?;
        }
        Ok(records.len())
    }

    fn load(&self) -> Vec<FailedLocationRecord> {
        let raw = match self.store.get(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!("Could not read failure queue: {}", e);
                return Vec::new();
            }
        };

        match serde_json::from_str(&raw) {
            Ok(records) => records,
            Err(e) => {
                warn!("Discarding corrupt failure queue '{}': {}", self.key, e);
                Vec::new()
            }
        }
    }

    fn save(&self, records: &[FailedLocationRecord]) -> Result<()> {
        let json = serde_json::to_string(records)?;
        self.store.set(&self.key, &json)?;
        Ok(())
    }
}

// Coordinates may drift by an ulp across JSON rewrites, so they are
// compared with a tolerance; everything else round-trips exactly.
fn same_record(a: &FailedLocationRecord, b: &FailedLocationRecord) -> bool {
    const EPSILON: f64 = 1e-9;
    a.failed_at == b.failed_at
        && a.session_id == b.session_id
        && a.sample.device_id == b.sample.device_id
        && a.sample.metadata.timestamp == b.sample.metadata.timestamp
        && (a.sample.latitude - b.sample.latitude).abs() < EPSILON
        && (a.sample.longitude - b.sample.longitude).abs() < EPSILON
}

#[cfg(test)]
mod tests {
    use super::*;
    use waypost_types::{MemoryStore, NetworkType, Position, SampleSource};

    fn sample(lat: f64) -> LocationSample {
        LocationSample::from_position(
            &Position::now(lat, 24.1, 5.0),
            "device_test",
            NetworkType::Wifi,
            Some(80),
            SampleSource::Watch,
        )
    }

    fn queue(capacity: usize) -> (Arc<MemoryStore>, FailureQueue) {
        let store = Arc::new(MemoryStore::new());
        let queue = FailureQueue::new(Arc::clone(&store) as Arc<dyn KeyValueStore>, "failed", capacity);
        (store, queue)
    }

    #[test]
    fn test_store_and_read_back() {
        let (_, queue) = queue(100);
        assert!(queue.is_empty());

        queue.store(sample(56.0), "sess-1").unwrap();
        queue.store(sample(57.0), "sess-1").unwrap();

        let records = queue.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].session_id, "sess-1");
        assert_eq!(records[0].sample.latitude, 56.0);
        assert_eq!(records[1].sample.latitude, 57.0);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let (_, queue) = queue(100);
        for i in 0..101 {
            queue.store(sample(i as f64 * 0.1), &format!("sess-{i}")).unwrap();
        }

        let records = queue.records();
        assert_eq!(records.len(), 100);
        assert_eq!(records[0].session_id, "sess-1");
        assert_eq!(records[99].session_id, "sess-100");
    }

    #[test]
    fn test_corrupt_queue_is_treated_as_empty() {
        let (store, queue) = queue(10);
        store.set("failed", "{not json").unwrap();
        assert!(queue.is_empty());

        // The next append replaces the corrupt value
        queue.store(sample(1.0), "sess").unwrap();
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_acknowledge_keeps_concurrent_appends() {
        let (_, queue) = queue(10);
        queue.store(sample(1.0), "sess").unwrap();
        queue.store(sample(2.0), "sess").unwrap();
        let snapshot = queue.records();

        // Appended while a retry was in flight
        queue.store(sample(3.0), "sess").unwrap();

        let remaining = queue.acknowledge(&snapshot[..1]).unwrap();
        assert_eq!(remaining, 2);
        let lats: Vec<f64> = queue.records().iter().map(|r| r.sample.latitude).collect();
        assert_eq!(lats, vec![2.0, 3.0]);
    }

    #[test]
    fn test_acknowledge_everything_removes_key() {
        let (store, queue) = queue(10);
        queue.store(sample(1.0), "sess").unwrap();
        let snapshot = queue.records();

        assert_eq!(queue.acknowledge(&snapshot).unwrap(), 0);
        assert!(store.is_empty());

        // Acknowledging again is harmless
        assert_eq!(queue.acknowledge(&snapshot).unwrap(), 0);
    }

    #[test]
    fn test_clear() {
        let (_, queue) = queue(10);
        queue.store(sample(1.0), "sess").unwrap();
        queue.clear().unwrap();
        assert!(queue.is_empty());
    }

    #[test]
    fn test_persisted_format_is_a_json_array() {
        let (store, queue) = queue(10);
        queue.store(sample(1.0), "sess-9").unwrap();

        let raw = store.get("failed").unwrap().unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let first = &json.as_array().unwrap()[0];
        assert_eq!(first["sessionId"], "sess-9");
        assert_eq!(first["latitude"], 1.0);
        assert!(first["failedAt"].is_string());
    }
}
