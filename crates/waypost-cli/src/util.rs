//! Shared helpers for command implementations.

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use waypost_core::{
    FailureQueue, FileStore, HttpLocationApi, LocationTracker, PositionSource, StaticToken,
    TokenProvider, default_store_path,
};
use waypost_types::KeyValueStore;

use crate::config::Config;
use crate::host::{HostEnvironment, HostPermissions};
use crate::replay::ReplaySource;

/// Resolve the store file: configured path, else the platform data directory.
pub fn store_path(config: &Config) -> Result<PathBuf> {
    config
        .storage
        .path
        .clone()
        .or_else(default_store_path)
        .context("No data directory on this platform; set [storage] path in the config file")
}

/// Open the persistent key/value store.
pub fn open_store(config: &Config) -> Result<Arc<FileStore>> {
    let path = store_path(config)?;
    let store = FileStore::open(&path)
        .with_context(|| format!("Failed to open store: {}", path.display()))?;
    Ok(Arc::new(store))
}

/// Open the failure queue without a backend connection.
pub fn open_queue(config: &Config) -> Result<FailureQueue> {
    let store: Arc<dyn KeyValueStore> = open_store(config)?;
    Ok(FailureQueue::new(
        store,
        config.tracker.failure_queue_key.clone(),
        config.tracker.failure_queue_capacity,
    ))
}

/// Assemble a tracker wired to the configured backend and store.
///
/// Without `positions` the tracker gets a source with no fixes, which is
/// enough for commands that never start a session.
pub fn build_tracker(
    config: &Config,
    positions: Option<Arc<dyn PositionSource>>,
) -> Result<LocationTracker> {
    let url = config.api_url()?;
    let tokens: Arc<dyn TokenProvider> = match &config.api.token {
        Some(token) => Arc::new(StaticToken::new(token.clone())),
        None => Arc::new(StaticToken::none()),
    };
    let api = HttpLocationApi::with_timeout(
        url,
        Arc::clone(&tokens),
        Duration::from_secs(config.api.timeout),
    )
    .with_context(|| format!("Invalid API URL: {}", url))?;

    let positions = match positions {
        Some(positions) => positions,
        None => Arc::new(ReplaySource::new(Vec::new(), 1.0)?),
    };

    let tracker = LocationTracker::builder()
        .config(config.tracker.clone())
        .api(Arc::new(api))
        .store(open_store(config)?)
        .positions(positions)
        .permissions(Arc::new(HostPermissions))
        .environment(Arc::new(HostEnvironment::new()))
        .tokens(tokens)
        .build()
        .context("Failed to build tracker")?;
    Ok(tracker)
}

/// Write output to stdout
pub fn write_output(content: &str) -> Result<()> {
    let mut stdout = io::stdout().lock();
    stdout.write_all(content.as_bytes())?;
    stdout.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use waypost_types::{LocationSample, NetworkType, Position, SampleSource};

    fn config_in(dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.storage.path = Some(dir.join("store.json"));
        config
    }

    #[test]
    fn test_store_path_prefers_config() {
        let dir = tempdir().unwrap();
        let config = config_in(dir.path());
        assert_eq!(store_path(&config).unwrap(), dir.path().join("store.json"));
    }

    #[test]
    fn test_queue_persists_across_opens() {
        let dir = tempdir().unwrap();
        let config = config_in(dir.path());

        let sample = LocationSample::from_position(
            &Position::now(48.85, 2.35, 5.0),
            "device-1",
            NetworkType::Unknown,
            None,
            SampleSource::Manual,
        );
        open_queue(&config).unwrap().store(sample, "session-1").unwrap();

        let queue = open_queue(&config).unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.records()[0].session_id, "session-1");
    }

    #[test]
    fn test_build_tracker_requires_url() {
        let dir = tempdir().unwrap();
        let config = config_in(dir.path());
        let err = build_tracker(&config, None).unwrap_err();
        assert!(err.to_string().contains("No API URL"));
    }

    #[tokio::test]
    async fn test_build_tracker_with_url() {
        let dir = tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.api.url = Some("http://localhost:9/api".into());

        let tracker = build_tracker(&config, None).unwrap();
        assert!(!tracker.is_currently_tracking());
        assert_eq!(tracker.device_info().platform, std::env::consts::OS);
    }
}
