//! Position source that replays recorded fixes from a file.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::Deserialize;
use time::OffsetDateTime;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::debug;

use waypost_core::{PositionSource, PositionUpdate, WatchId};
use waypost_types::{Coordinates, Position, PositionError, PositionErrorCode, PositionOptions};

fn default_accuracy() -> f64 {
    10.0
}

fn default_delay_ms() -> u64 {
    1000
}

/// One recorded fix.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayFix {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default = "default_accuracy")]
    pub accuracy: f64,
    #[serde(default)]
    pub altitude: Option<f64>,
    #[serde(default)]
    pub heading: Option<f64>,
    #[serde(default)]
    pub speed: Option<f64>,
    /// Wait before emitting this fix, relative to the previous one.
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

impl ReplayFix {
    fn to_position(&self) -> Position {
        Position {
            coords: Coordinates {
                altitude: self.altitude,
                heading: self.heading,
                speed: self.speed,
                ..Coordinates::new(self.latitude, self.longitude, self.accuracy)
            },
            timestamp: OffsetDateTime::now_utc(),
        }
    }
}

/// Parse a JSON array of fixes.
pub fn parse_fixes(json: &str) -> Result<Vec<ReplayFix>> {
    let fixes: Vec<ReplayFix> = serde_json::from_str(json).context("Invalid fixes JSON")?;
    for (i, fix) in fixes.iter().enumerate() {
        if !(-90.0..=90.0).contains(&fix.latitude) || !(-180.0..=180.0).contains(&fix.longitude) {
            bail!(
                "Fix #{} is out of range: ({}, {})",
                i + 1,
                fix.latitude,
                fix.longitude
            );
        }
    }
    Ok(fixes)
}

/// Read and parse a fixes file.
pub fn load_fixes(path: &Path) -> Result<Vec<ReplayFix>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read fixes: {}", path.display()))?;
    parse_fixes(&raw).with_context(|| format!("Failed to load fixes: {}", path.display()))
}

/// Replays a fixed list of fixes into every watch.
///
/// Each watch gets the full list from the start. [`finished`](Self::finished)
/// flips to `true` once any watch has emitted its last fix.
pub struct ReplaySource {
    fixes: Arc<Vec<ReplayFix>>,
    speed: f64,
    next_id: AtomicU64,
    watches: Mutex<HashMap<WatchId, JoinHandle<()>>>,
    last: Arc<Mutex<Option<Position>>>,
    finished: watch::Sender<bool>,
}

impl std::fmt::Debug for ReplaySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplaySource")
            .field("fixes", &self.fixes.len())
            .field("speed", &self.speed)
            .finish_non_exhaustive()
    }
}

impl ReplaySource {
    /// `speed` divides every delay; `2.0` replays twice as fast.
    pub fn new(fixes: Vec<ReplayFix>, speed: f64) -> Result<Self> {
        if !speed.is_finite() || speed <= 0.0 {
            bail!("Replay speed must be a positive number, got {}", speed);
        }
        Ok(Self {
            fixes: Arc::new(fixes),
            speed,
            next_id: AtomicU64::new(1),
            watches: Mutex::new(HashMap::new()),
            last: Arc::new(Mutex::new(None)),
            finished: watch::channel(false).0,
        })
    }

    /// Receiver that turns `true` when a replay has run out of fixes.
    pub fn finished(&self) -> watch::Receiver<bool> {
        self.finished.subscribe()
    }

    fn scaled(&self, delay_ms: u64) -> Duration {
        Duration::from_secs_f64(delay_ms as f64 / 1000.0 / self.speed)
    }
}

#[async_trait]
impl PositionSource for ReplaySource {
    fn watch_position(
        &self,
        _options: PositionOptions,
        sink: mpsc::UnboundedSender<PositionUpdate>,
    ) -> waypost_core::Result<WatchId> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let delays: Vec<Duration> = self.fixes.iter().map(|f| self.scaled(f.delay_ms)).collect();
        let fixes = Arc::clone(&self.fixes);
        let last = Arc::clone(&self.last);
        let finished = self.finished.clone();

        let handle = tokio::spawn(async move {
            for (fix, delay) in fixes.iter().zip(delays) {
                tokio::time::sleep(delay).await;
                let position = fix.to_position();
                *last.lock().unwrap_or_else(PoisonError::into_inner) = Some(position.clone());
                if sink.send(PositionUpdate::Fix(position)).is_err() {
                    return;
                }
            }
            debug!("Replay watch {} exhausted", id);
            finished.send_replace(true);
        });

        self.watches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, handle);
        Ok(id)
    }

    fn clear_watch(&self, id: WatchId) {
        if let Some(handle) = self
            .watches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
        {
            handle.abort();
        }
    }

    async fn current_position(
        &self,
        _options: PositionOptions,
    ) -> std::result::Result<Position, PositionError> {
        let last = self.last.lock().unwrap_or_else(PoisonError::into_inner).clone();
        last.or_else(|| self.fixes.first().map(ReplayFix::to_position))
            .ok_or_else(|| {
                PositionError::new(PositionErrorCode::PositionUnavailable, "no recorded fixes")
            })
    }
}

impl Drop for ReplaySource {
    fn drop(&mut self) {
        for (_, handle) in self
            .watches
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
        {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixes() -> Vec<ReplayFix> {
        parse_fixes(
            r#"[
                {"latitude": 51.5, "longitude": -0.12, "delayMs": 0},
                {"latitude": 51.6, "longitude": -0.12, "accuracy": 4.0, "delayMs": 2000}
            ]"#,
        )
        .unwrap()
    }

    #[test]
    fn test_parse_defaults() {
        let fixes = parse_fixes(r#"[{"latitude": 1.0, "longitude": 2.0}]"#).unwrap();
        assert_eq!(fixes[0].accuracy, 10.0);
        assert_eq!(fixes[0].delay_ms, 1000);
        assert_eq!(fixes[0].altitude, None);
    }

    #[test]
    fn test_parse_rejects_out_of_range() {
        let err = parse_fixes(r#"[{"latitude": 91.0, "longitude": 0.0}]"#).unwrap_err();
        assert!(err.to_string().contains("#1"));
    }

    #[test]
    fn test_rejects_bad_speed() {
        assert!(ReplaySource::new(fixes(), 0.0).is_err());
        assert!(ReplaySource::new(fixes(), f64::NAN).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_emits_fixes_in_order() {
        let source = ReplaySource::new(fixes(), 2.0).unwrap();
        let mut finished = source.finished();
        let (tx, mut rx) = mpsc::unbounded_channel();
        source.watch_position(PositionOptions::default(), tx).unwrap();

        let first = rx.recv().await.unwrap();
        let start = tokio::time::Instant::now();
        let second = rx.recv().await.unwrap();
        // 2000 ms at double speed
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(1) && elapsed < Duration::from_millis(1100));

        match (first, second) {
            (PositionUpdate::Fix(a), PositionUpdate::Fix(b)) => {
                assert_eq!(a.coords.latitude, 51.5);
                assert_eq!(b.coords.latitude, 51.6);
                assert_eq!(b.coords.accuracy, 4.0);
            }
            other => panic!("unexpected updates {other:?}"),
        }

        finished.wait_for(|done| *done).await.unwrap();
        let current = source.current_position(PositionOptions::default()).await.unwrap();
        assert_eq!(current.coords.latitude, 51.6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_watch_stops_replay() {
        let source = ReplaySource::new(fixes(), 1.0).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = source.watch_position(PositionOptions::default(), tx).unwrap();

        assert!(rx.recv().await.is_some());
        source.clear_watch(id);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.recv().await.is_none());
        assert!(!*source.finished().borrow());
    }

    #[tokio::test]
    async fn test_current_position_without_fixes() {
        let source = ReplaySource::new(Vec::new(), 1.0).unwrap();
        let err = source
            .current_position(PositionOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code, PositionErrorCode::PositionUnavailable);
    }
}
