//! Scan command implementation.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use wta_core::SessionConfig;

use crate::cli::OutputFormat;
use crate::format::{FormatOptions, format_scan_json, format_scan_text};
use crate::util::{open_session, write_output};

pub async fn cmd_scan(
    timeout: u64,
    config: SessionConfig,
    format: OutputFormat,
    output: Option<&PathBuf>,
    quiet: bool,
    opts: &FormatOptions,
) -> Result<()> {
    let session = open_session(config).await?;
    session.start_scan().await?;

    if !quiet && matches!(format, OutputFormat::Text) {
        eprintln!("Scanning for WTA controllers ({}s)...", timeout);
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            eprintln!("\nScan interrupted.");
        }
        _ = tokio::time::sleep(Duration::from_secs(timeout)) => {}
    }

    let mut peers = session.snapshot().peers;
    session.shutdown().await;

    // Strongest signal first
    peers.sort_by_key(|p| std::cmp::Reverse(p.rssi.unwrap_or(i16::MIN)));

    let content = match format {
        OutputFormat::Json => format_scan_json(&peers, opts)?,
        OutputFormat::Text => format_scan_text(&peers, opts),
    };
    write_output(output, &content)
}
