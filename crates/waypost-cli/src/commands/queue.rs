//! Queue command implementation.

use anyhow::{Context, Result};
use serde_json::json;

use crate::cli::OutputFormat;
use crate::config::Config;
use crate::format::{as_json, format_queue};
use crate::util::{open_queue, write_output};

pub fn cmd_queue(config: &Config, clear: bool, format: OutputFormat) -> Result<()> {
    let queue = open_queue(config)?;

    if clear {
        let removed = queue.len();
        queue.clear().context("Failed to clear failure queue")?;
        let content = match format {
            OutputFormat::Json => as_json(&json!({ "removed": removed }))?,
            OutputFormat::Text => format!("Removed {} queued sample(s).\n", removed),
        };
        return write_output(&content);
    }

    let records = queue.records();
    let content = match format {
        OutputFormat::Json => as_json(&records)?,
        OutputFormat::Text => format_queue(&records, queue.capacity()),
    };
    write_output(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use waypost_types::{LocationSample, NetworkType, Position, SampleSource};

    #[test]
    fn test_clear_empties_persisted_queue() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.storage.path = Some(dir.path().join("store.json"));

        let sample = LocationSample::from_position(
            &Position::now(40.71, -74.0, 8.0),
            "device-1",
            NetworkType::Unknown,
            None,
            SampleSource::Manual,
        );
        open_queue(&config).unwrap().store(sample, "session-1").unwrap();

        cmd_queue(&config, false, OutputFormat::Json).unwrap();
        cmd_queue(&config, true, OutputFormat::Json).unwrap();
        assert!(open_queue(&config).unwrap().is_empty());
    }
}
