//! Watch command implementation.
//!
//! Keeps one link open and prints every reading the controller pushes. When
//! the link drops, scanning restarts and the same controller is reconnected
//! as soon as it is seen again.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use owo_colors::OwoColorize;
use time::OffsetDateTime;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;
use wta_core::{DisconnectReason, Error, SessionConfig, SessionEvent};

use crate::cli::OutputFormat;
use crate::format::{FormatOptions, format_measurement_json, format_measurement_line};
use crate::util::{append_output, connect, open_session};

/// Arguments for the watch command.
pub struct WatchArgs<'a> {
    pub device: String,
    pub count: u32,
    pub timeout: Duration,
    pub config: SessionConfig,
    pub format: OutputFormat,
    pub output: Option<&'a PathBuf>,
    pub quiet: bool,
    pub opts: &'a FormatOptions,
}

pub async fn cmd_watch(args: WatchArgs<'_>) -> Result<()> {
    let WatchArgs {
        device,
        count,
        timeout,
        config,
        format,
        output,
        quiet,
        opts,
    } = args;

    let session = open_session(config).await?;
    let peer = connect(&session, &device, timeout, quiet).await?;
    let mut events = session.subscribe();

    if !quiet {
        let header = if opts.no_color {
            format!("Watching: {}", peer)
        } else {
            format!("Watching: {}", peer.as_str().cyan())
        };
        eprintln!("{}", header);
        if count > 0 {
            eprintln!("Count: {} | Press Ctrl+C to stop", count);
        } else {
            eprintln!("Press Ctrl+C to stop");
        }
        eprintln!("{}", "-".repeat(50));
    }

    let mut readings_taken: u32 = 0;
    let mut retry_at: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\nShutting down...");
                break;
            }
            _ = sleep_until(retry_at) => {
                retry_at = None;
                session.connect(peer.clone()).await?;
            }
            event = events.recv() => match event {
                Ok(SessionEvent::Measurement { snapshot }) => {
                    let now = OffsetDateTime::now_utc();
                    let line = match format {
                        OutputFormat::Json => format_measurement_json(&snapshot, peer.as_str(), now)?,
                        OutputFormat::Text => format_measurement_line(&snapshot, now, opts),
                    };
                    append_output(output, &line)?;

                    readings_taken += 1;
                    if count > 0 && readings_taken >= count {
                        if !quiet {
                            eprintln!("Completed {} readings.", readings_taken);
                        }
                        break;
                    }
                }
                Ok(SessionEvent::Disconnected { reason, .. }) => {
                    if !matches!(reason, DisconnectReason::UserRequested | DisconnectReason::Shutdown) {
                        eprintln!("Connection lost ({:?}). Waiting for controller...", reason);
                        session.start_scan().await?;
                    }
                }
                Ok(SessionEvent::Discovered { peer: found }) if found.peer == peer => {
                    session.connect(peer.clone()).await?;
                }
                Ok(SessionEvent::Ready { .. }) => {
                    if !quiet {
                        eprintln!("Reconnected.");
                    }
                }
                Ok(SessionEvent::Error { error: Error::ConnectionThrottled { retry_in } }) => {
                    retry_at = Some(Instant::now() + retry_in);
                }
                Ok(SessionEvent::Error { error }) => {
                    tracing::debug!(%error, "Session reported an error");
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event stream lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    session.shutdown().await;
    Ok(())
}

async fn sleep_until(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
