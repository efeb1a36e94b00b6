//! Command-line interface for WTA chamber controllers.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `scan` | Scan for nearby controllers |
//! | `watch` | Stream live readings |
//! | `history` | Download the history log |
//! | `set` | Change the chamber setpoint |
//! | `config` | Manage CLI configuration |
//!
//! # Configuration
//!
//! Settings live in `<config dir>/wta/config.toml` (`WTA_CONFIG` overrides
//! the location). The controller is taken from `--device`, then
//! `WTA_DEVICE`, then the configured default, then the last controller
//! connected to.

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;
mod config;
mod format;
mod util;

use cli::{Cli, Commands, DEFAULT_TIMEOUT, DeviceArgs};
use commands::{HistoryArgs, WatchArgs, cmd_config, cmd_history, cmd_scan, cmd_set, cmd_watch};
use config::{Config, resolve_device, resolve_timeout};
use format::FormatOptions;
use util::require_device;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays machine-readable
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

    let config = Config::load();
    let format = cli.format.unwrap_or_else(|| config.output_format());
    let opts = FormatOptions::new(cli.no_color, cli.compact);
    let output = cli.output.as_ref();
    let quiet = cli.quiet;

    match cli.command {
        Commands::Scan { timeout } => {
            let session_config = config.session_config(Duration::from_secs(DEFAULT_TIMEOUT))?;
            cmd_scan(timeout, session_config, format, output, quiet, &opts).await
        }
        Commands::Watch { device, count } => {
            let (device, timeout) = resolve(device, &config)?;
            cmd_watch(WatchArgs {
                device,
                count,
                timeout,
                config: config.session_config(timeout)?,
                format,
                output,
                quiet,
                opts: &opts,
            })
            .await
        }
        Commands::History {
            device,
            all,
            export_timeout,
        } => {
            let (device, timeout) = resolve(device, &config)?;
            let session_config = config
                .session_config(timeout)?
                .export_timeout(Duration::from_secs(export_timeout.max(1)));
            cmd_history(HistoryArgs {
                device,
                all,
                timeout,
                config: session_config,
                format,
                output,
                quiet,
                opts: &opts,
            })
            .await
        }
        Commands::Set { device, celsius } => {
            let (device, timeout) = resolve(device, &config)?;
            cmd_set(device, celsius, timeout, config.session_config(timeout)?, quiet).await
        }
        Commands::Config { action } => cmd_config(action),
    }
}

/// Resolve the controller and the connect timeout for a device command.
fn resolve(args: DeviceArgs, config: &Config) -> Result<(String, Duration)> {
    let device = require_device(resolve_device(args.device, config))?;
    let timeout = resolve_timeout(args.timeout, config, DEFAULT_TIMEOUT);
    Ok((device, Duration::from_secs(timeout)))
}
