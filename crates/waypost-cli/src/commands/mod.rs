//! Command implementations for the CLI.

mod config;
mod current;
mod distance;
mod history;
mod prefs;
mod queue;
mod retry;
mod track;

pub use config::cmd_config;
pub use current::cmd_current;
pub use distance::cmd_distance;
pub use history::{HistoryArgs, cmd_history};
pub use prefs::cmd_prefs;
pub use queue::cmd_queue;
pub use retry::cmd_retry;
pub use track::{TrackArgs, cmd_track};
