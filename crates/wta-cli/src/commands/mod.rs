//! Command implementations for the CLI.

mod config;
mod history;
mod scan;
mod set;
mod watch;

pub use config::cmd_config;
pub use history::{HistoryArgs, cmd_history};
pub use scan::cmd_scan;
pub use set::cmd_set;
pub use watch::{WatchArgs, cmd_watch};
