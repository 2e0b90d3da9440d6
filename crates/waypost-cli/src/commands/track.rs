//! Track command implementation.
//!
//! Runs one tracking session against the configured backend, fed by a file
//! of recorded fixes. The session ends when the replay runs out, when the
//! backend-configured maximum duration elapses, or on Ctrl+C.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde_json::json;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::{debug, info, warn};

use waypost_core::{EventReceiver, LocationTracker, TrackingEvent};

use crate::cli::OutputFormat;
use crate::config::Config;
use crate::format::{as_json_line, format_event_line};
use crate::replay::{ReplaySource, load_fixes};
use crate::util::{build_tracker, write_output};

/// Extra wait after the replay ends so the last debounced fix is delivered.
const FLUSH_MARGIN: Duration = Duration::from_millis(250);

/// Arguments for the track command.
pub struct TrackArgs {
    pub fixes: PathBuf,
    pub speed: f64,
    pub format: OutputFormat,
    pub quiet: bool,
}

/// Why the event loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EndReason {
    ReplayFinished,
    StoppedByTracker,
    Interrupted,
}

#[derive(Debug, Default)]
struct Tally {
    delivered: usize,
    errors: usize,
}

struct EventPrinter {
    format: OutputFormat,
    quiet: bool,
    tally: Tally,
}

impl EventPrinter {
    /// Print one event. Returns `true` when it closes the session.
    fn handle(&mut self, event: &TrackingEvent) -> Result<bool> {
        let closes = match event {
            TrackingEvent::LocationUpdated { .. } => {
                self.tally.delivered += 1;
                false
            }
            TrackingEvent::Error { .. } => {
                self.tally.errors += 1;
                false
            }
            TrackingEvent::TrackingStopped { .. } => true,
            _ => false,
        };

        match self.format {
            OutputFormat::Json => write_output(&as_json_line(event)?)?,
            OutputFormat::Text if !self.quiet => {
                write_output(&format!("{}\n", format_event_line(event)))?
            }
            OutputFormat::Text => {}
        }
        Ok(closes)
    }

    /// Print whatever is already buffered without waiting.
    fn drain(&mut self, events: &mut EventReceiver) -> Result<()> {
        loop {
            match events.try_recv() {
                Ok(event) => {
                    self.handle(&event)?;
                }
                Err(TryRecvError::Lagged(n)) => warn!("Dropped {} event(s)", n),
                Err(TryRecvError::Empty | TryRecvError::Closed) => return Ok(()),
            }
        }
    }
}

pub async fn cmd_track(config: &Config, args: TrackArgs) -> Result<()> {
    let fixes = load_fixes(&args.fixes)?;
    if fixes.is_empty() {
        bail!("No fixes in {}", args.fixes.display());
    }

    let count = fixes.len();
    let source = Arc::new(ReplaySource::new(fixes, args.speed)?);
    let mut finished = source.finished();
    let tracker = build_tracker(config, Some(source.clone()))?;
    let mut events = tracker.subscribe();
    let mut printer = EventPrinter {
        format: args.format,
        quiet: args.quiet,
        tally: Tally::default(),
    };

    let capabilities = tracker
        .initialize()
        .await
        .context("Failed to initialize tracker")?;
    debug!("Capabilities: {:?}", capabilities);

    if !args.quiet && args.format == OutputFormat::Text {
        eprintln!("Replaying {} fix(es) at {}x...", count, args.speed);
    }

    if let Err(e) = tracker.start_tracking().await {
        printer.drain(&mut events)?;
        return Err(e).context("Failed to start tracking");
    }
    let session_id = tracker.current_session_id().unwrap_or_default();

    let reason = run_session(&tracker, &mut events, &mut finished, &mut printer).await?;
    info!("Session {} ending: {:?}", session_id, reason);

    if reason != EndReason::StoppedByTracker {
        if reason == EndReason::ReplayFinished {
            tokio::time::sleep(config.tracker.debounce + FLUSH_MARGIN).await;
        }
        tracker.stop_tracking().await;
    }
    printer.drain(&mut events)?;

    let queued = tracker.failure_queue().len();
    let summary = match args.format {
        OutputFormat::Json => as_json_line(&json!({
            "sessionId": session_id,
            "delivered": printer.tally.delivered,
            "errors": printer.tally.errors,
            "queued": queued,
        }))?,
        OutputFormat::Text => format!(
            "Session {}: {} sample(s) delivered, {} error(s), {} waiting in the failure queue\n",
            session_id, printer.tally.delivered, printer.tally.errors, queued
        ),
    };
    write_output(&summary)
}

async fn run_session(
    tracker: &LocationTracker,
    events: &mut EventReceiver,
    finished: &mut tokio::sync::watch::Receiver<bool>,
    printer: &mut EventPrinter,
) -> Result<EndReason> {
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\nShutting down...");
                return Ok(EndReason::Interrupted);
            }
            done = finished.wait_for(|done| *done) => {
                if done.is_err() {
                    warn!("Replay source went away");
                }
                return Ok(EndReason::ReplayFinished);
            }
            event = events.recv() => match event {
                Ok(event) => {
                    if printer.handle(&event)? && !tracker.is_currently_tracking() {
                        return Ok(EndReason::StoppedByTracker);
                    }
                }
                Err(RecvError::Lagged(n)) => warn!("Dropped {} event(s)", n),
                Err(RecvError::Closed) => return Ok(EndReason::StoppedByTracker),
            },
        }
    }
}
