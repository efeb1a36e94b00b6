//! CLI argument definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use wta_types::SETPOINT_RANGE;

/// Output format for commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl OutputFormat {
    /// Parse a format name as stored in the config file.
    pub fn from_name(name: &str) -> Option<Self> {
        <Self as ValueEnum>::from_str(name, true).ok()
    }
}

/// Reusable device connection arguments
#[derive(Debug, Clone, Args)]
pub struct DeviceArgs {
    /// Controller address (MAC address or UUID), or use WTA_DEVICE env var
    #[arg(short, long, env = "WTA_DEVICE")]
    pub device: Option<String>,

    /// Time allowed for finding and connecting to the controller, in seconds
    #[arg(short = 'T', long, default_value_t = DEFAULT_TIMEOUT)]
    pub timeout: u64,
}

/// Default for `--timeout` in seconds.
pub const DEFAULT_TIMEOUT: u64 = 30;

/// Default for `scan --timeout` in seconds.
pub const DEFAULT_SCAN_TIMEOUT: u64 = 10;

#[derive(Parser)]
#[command(name = "wta")]
#[command(author, version, about = "CLI for WTA chamber controllers", long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output format (defaults to the config file value, then text)
    #[arg(short, long, global = true, value_enum)]
    pub format: Option<OutputFormat>,

    /// Output compact JSON (no pretty-printing)
    #[arg(long, global = true)]
    pub compact: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    /// Write output to file instead of stdout
    #[arg(short, long, global = true)]
    pub output: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scan for nearby WTA controllers
    Scan {
        /// Scan duration in seconds
        #[arg(short = 'T', long, default_value_t = DEFAULT_SCAN_TIMEOUT)]
        timeout: u64,
    },

    /// Stream live readings from a controller
    Watch {
        #[command(flatten)]
        device: DeviceArgs,

        /// Number of readings to print before exiting (0 for unlimited)
        #[arg(short = 'n', long, default_value = "0")]
        count: u32,
    },

    /// Download the history log from a controller
    History {
        #[command(flatten)]
        device: DeviceArgs,

        /// Print the full log instead of the last 48 hours
        #[arg(short, long)]
        all: bool,

        /// Time allowed for the export, in seconds
        #[arg(long, default_value = "60")]
        export_timeout: u64,
    },

    /// Change the chamber setpoint
    Set {
        #[command(flatten)]
        device: DeviceArgs,

        /// Target chamber temperature in °C (30-40)
        #[arg(value_parser = parse_setpoint, allow_negative_numbers = true)]
        celsius: f32,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Parse a setpoint with range validation
fn parse_setpoint(s: &str) -> Result<f32, String> {
    let value: f32 = s
        .parse()
        .map_err(|_| format!("'{}' is not a valid temperature", s))?;
    if value.is_finite() && SETPOINT_RANGE.contains(&value) {
        Ok(value)
    } else {
        Err(format!(
            "Invalid setpoint '{}'. Valid range: {}-{} °C",
            s,
            SETPOINT_RANGE.start(),
            SETPOINT_RANGE.end()
        ))
    }
}

/// Configuration keys
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ConfigKey {
    /// Default controller address
    Device,
    /// Default output format
    Format,
    /// Default connection timeout in seconds
    Timeout,
    /// Controller clock offset from UTC in hours
    UtcOffsetHours,
    /// Advertised name prefix used to filter scan results
    NamePrefix,
}

/// Configuration subcommands
#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Get a configuration value
    Get {
        /// Configuration key
        #[arg(value_enum)]
        key: ConfigKey,
    },

    /// Set a configuration value
    Set {
        /// Configuration key
        #[arg(value_enum)]
        key: ConfigKey,
        /// Configuration value
        #[arg(allow_negative_numbers = true)]
        value: String,
    },

    /// Unset (remove) a configuration value
    Unset {
        /// Configuration key to remove
        #[arg(value_enum)]
        key: ConfigKey,
    },

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init,
}
