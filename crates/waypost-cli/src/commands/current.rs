//! Current command implementation.

use anyhow::{Context, Result};

use crate::cli::OutputFormat;
use crate::config::Config;
use crate::format::{as_json, format_sample_line};
use crate::util::{build_tracker, write_output};

pub async fn cmd_current(config: &Config, format: OutputFormat) -> Result<()> {
    let tracker = build_tracker(config, None)?;
    let current = tracker
        .current_location()
        .await
        .context("Failed to fetch current location")?;

    let content = match (format, current) {
        (OutputFormat::Json, current) => as_json(&current)?,
        (OutputFormat::Text, Some(sample)) => format!("{}\n", format_sample_line(&sample)),
        (OutputFormat::Text, None) => "No location recorded yet.\n".to_string(),
    };
    write_output(&content)
}
