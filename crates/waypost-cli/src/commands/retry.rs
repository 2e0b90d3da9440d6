//! Retry command implementation.

use anyhow::Result;

use crate::cli::OutputFormat;
use crate::config::Config;
use crate::format::as_json;
use crate::util::{build_tracker, write_output};

pub async fn cmd_retry(config: &Config, format: OutputFormat) -> Result<()> {
    let tracker = build_tracker(config, None)?;
    let report = tracker.retry_failed_locations().await;

    let content = match format {
        OutputFormat::Json => as_json(&report)?,
        OutputFormat::Text if report.attempted == 0 => "Failure queue is empty.\n".to_string(),
        OutputFormat::Text => format!(
            "Delivered {} of {} queued sample(s); {} remaining.\n",
            report.delivered, report.attempted, report.remaining
        ),
    };
    write_output(&content)
}
