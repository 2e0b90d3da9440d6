//! Prefs command implementation.

use anyhow::{Context, Result};

use waypost_types::PreferencesUpdate;

use crate::cli::OutputFormat;
use crate::config::Config;
use crate::format::{as_json, format_preferences};
use crate::util::{build_tracker, write_output};

/// Show preferences, or apply `update` first when it sets anything.
pub async fn cmd_prefs(config: &Config, update: PreferencesUpdate, format: OutputFormat) -> Result<()> {
    let tracker = build_tracker(config, None)?;

    let prefs = if update.is_empty() {
        tracker
            .preferences()
            .await
            .context("Failed to fetch preferences")?
    } else {
        tracker
            .update_preferences(update)
            .await
            .context("Failed to update preferences")?
    };

    let content = match format {
        OutputFormat::Json => as_json(&prefs)?,
        OutputFormat::Text => format_preferences(&prefs),
    };
    write_output(&content)
}
