//! Distance command implementation.

use anyhow::{Result, bail};
use owo_colors::OwoColorize;
use serde::Serialize;

use waypost_core::geo::{distance_m, has_moved_beyond};

use crate::cli::OutputFormat;
use crate::format::{as_json, format_distance};
use crate::util::write_output;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DistanceReport {
    meters: f64,
    threshold_meters: f64,
    significant: bool,
}

fn check_point(lat: f64, lon: f64) -> Result<()> {
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        bail!("Coordinates out of range: ({}, {})", lat, lon);
    }
    Ok(())
}

fn measure(from: (f64, f64), to: (f64, f64), threshold: f64) -> Result<DistanceReport> {
    check_point(from.0, from.1)?;
    check_point(to.0, to.1)?;
    let meters = distance_m(&from, &to);
    Ok(DistanceReport {
        meters,
        threshold_meters: threshold,
        significant: has_moved_beyond(Some(&from), &to, threshold),
    })
}

pub fn cmd_distance(
    from: (f64, f64),
    to: (f64, f64),
    threshold: f64,
    format: OutputFormat,
) -> Result<()> {
    let report = measure(from, to, threshold)?;

    let content = match format {
        OutputFormat::Json => as_json(&report)?,
        OutputFormat::Text => {
            let verdict = if report.significant {
                "significant".green().to_string()
            } else {
                "below threshold".yellow().to_string()
            };
            format!(
                "{} ({}, threshold {})\n",
                format_distance(report.meters),
                verdict,
                format_distance(report.threshold_meters)
            )
        }
    };
    write_output(&content)
}
