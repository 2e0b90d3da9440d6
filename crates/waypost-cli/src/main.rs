//! Command-line client for the waypost location tracker.
//!
//! | Command | Description |
//! |---------|-------------|
//! | `track` | Run a session fed by recorded fixes |
//! | `retry` | Redeliver queued samples |
//! | `queue` | List or clear the failure queue |
//! | `prefs` | Show or update tracking preferences |
//! | `history` | Query recorded history |
//! | `current` | Last location known to the backend |
//! | `config` | Show or initialise the configuration file |
//! | `distance` | Haversine distance between two points |

mod cli;
mod commands;
mod config;
mod format;
mod host;
mod replay;
mod util;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use waypost_types::PreferencesUpdate;

use cli::{Cli, Commands};
use commands::{HistoryArgs, TrackArgs};
use config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.quiet {
        EnvFilter::new("warn")
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let format = cli.format();

    // Pure computation, no config needed
    if let Commands::Distance {
        lat1,
        lon1,
        lat2,
        lon2,
    } = cli.command
    {
        return commands::cmd_distance(
            (lat1, lon1),
            (lat2, lon2),
            waypost_core::geo::SIGNIFICANT_DISTANCE_M,
            format,
        );
    }

    if let Commands::Config { init } = cli.command {
        let config = if init {
            Config::default()
        } else {
            Config::load(cli.config.as_deref())?
        };
        return commands::cmd_config(&config, cli.config.as_deref(), init);
    }

    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Track { fixes, speed } => {
            commands::cmd_track(
                &config,
                TrackArgs {
                    fixes,
                    speed,
                    format,
                    quiet: cli.quiet,
                },
            )
            .await?;
        }
        Commands::Retry => commands::cmd_retry(&config, format).await?,
        Commands::Queue { clear } => commands::cmd_queue(&config, clear, format)?,
        Commands::Prefs {
            enabled,
            interval,
            background,
            high_accuracy,
            max_duration,
        } => {
            let update = PreferencesUpdate {
                tracking_enabled: enabled,
                tracking_interval: interval,
                background_tracking_enabled: background,
                high_accuracy_mode: high_accuracy,
                max_tracking_duration: max_duration,
            };
            commands::cmd_prefs(&config, update, format).await?;
        }
        Commands::History {
            from,
            to,
            page,
            page_size,
        } => {
            commands::cmd_history(
                &config,
                HistoryArgs {
                    from,
                    to,
                    page,
                    page_size,
                    format,
                },
            )
            .await?;
        }
        Commands::Current => commands::cmd_current(&config, format).await?,
        Commands::Distance { .. } | Commands::Config { .. } => unreachable!("handled above"),
    }

    Ok(())
}
