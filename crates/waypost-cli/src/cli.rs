//! CLI argument definitions using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Output format for commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "waypost")]
#[command(author, version, about = "Offline-resilient location tracking client", long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output as JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long, global = true, env = "WAYPOST_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn format(&self) -> OutputFormat {
        if self.json {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run a tracking session fed by recorded position fixes
    Track {
        /// JSON file with an array of fixes
        #[arg(short, long)]
        fixes: PathBuf,

        /// Replay speed multiplier for the delays between fixes
        #[arg(long, default_value = "1.0")]
        speed: f64,
    },

    /// Redeliver samples from the failure queue
    Retry,

    /// List or clear samples waiting in the failure queue
    Queue {
        /// Remove every queued sample
        #[arg(long)]
        clear: bool,
    },

    /// Show or update tracking preferences
    Prefs {
        /// Enable or disable tracking
        #[arg(long)]
        enabled: Option<bool>,

        /// Seconds between active position requests (10-3600)
        #[arg(long)]
        interval: Option<u32>,

        /// Let the background worker sample while the page is hidden
        #[arg(long)]
        background: Option<bool>,

        /// Request high-accuracy fixes
        #[arg(long)]
        high_accuracy: Option<bool>,

        /// Seconds after which a session stops on its own (300-86400)
        #[arg(long)]
        max_duration: Option<u32>,
    },

    /// Query recorded location history
    History {
        /// Start of the range (RFC3339 or YYYY-MM-DD)
        #[arg(long)]
        from: Option<String>,

        /// End of the range (RFC3339 or YYYY-MM-DD)
        #[arg(long)]
        to: Option<String>,

        /// 1-based page number
        #[arg(long)]
        page: Option<u32>,

        /// Samples per page
        #[arg(long)]
        page_size: Option<u32>,
    },

    /// Show the last location known to the backend
    Current,

    /// Show the resolved configuration, or write a default config file
    Config {
        /// Write the default configuration if no file exists yet
        #[arg(long)]
        init: bool,
    },

    /// Haversine distance between two points, and whether it is significant
    Distance {
        #[arg(allow_negative_numbers = true)]
        lat1: f64,
        #[arg(allow_negative_numbers = true)]
        lon1: f64,
        #[arg(allow_negative_numbers = true)]
        lat2: f64,
        #[arg(allow_negative_numbers = true)]
        lon2: f64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_json_flag_selects_format() {
        let cli = Cli::try_parse_from(["waypost", "--json", "current"]).unwrap();
        assert_eq!(cli.format(), OutputFormat::Json);

        let cli = Cli::try_parse_from(["waypost", "current"]).unwrap();
        assert_eq!(cli.format(), OutputFormat::Text);
    }

    #[test]
    fn test_distance_accepts_negative_coordinates() {
        let cli =
            Cli::try_parse_from(["waypost", "distance", "-33.86", "151.21", "-33.87", "151.21"])
                .unwrap();
        match cli.command {
            Commands::Distance { lat1, lat2, .. } => {
                assert_eq!(lat1, -33.86);
                assert_eq!(lat2, -33.87);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_prefs_flags() {
        let cli = Cli::try_parse_from([
            "waypost",
            "prefs",
            "--interval",
            "120",
            "--background",
            "true",
        ])
        .unwrap();
        match cli.command {
            Commands::Prefs {
                interval,
                background,
                enabled,
                ..
            } => {
                assert_eq!(interval, Some(120));
                assert_eq!(background, Some(true));
                assert_eq!(enabled, None);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
