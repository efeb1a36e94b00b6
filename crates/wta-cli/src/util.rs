//! Utility functions for CLI operations.

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tokio::time::timeout;
use wta_core::{
    BleTransport, Error, PeerId, SessionConfig, SessionEvent, SessionHandle, driver,
};

use crate::config::update_last_device;

/// Get device identifier, with helpful error message.
pub fn require_device(device: Option<String>) -> Result<String> {
    device.ok_or_else(|| {
        anyhow!(
            "No controller specified. Use --device <ADDRESS> or set WTA_DEVICE environment variable.\n\
             Run 'wta scan' to find nearby controllers."
        )
    })
}

/// Open the Bluetooth adapter and start a session on it.
pub async fn open_session(config: SessionConfig) -> Result<SessionHandle> {
    let transport = BleTransport::new()
        .await
        .context("Failed to open Bluetooth adapter")?;
    let session = driver::spawn(Arc::new(transport), config)?;
    Ok(session)
}

/// Scan for `identifier`, connect to it and wait until the link is ready.
///
/// The whole sequence must finish within `limit`. On success the controller
/// is remembered as the last connected device.
pub async fn connect(
    session: &SessionHandle,
    identifier: &str,
    limit: Duration,
    quiet: bool,
) -> Result<PeerId> {
    let mut events = session.subscribe();
    session.start_scan().await?;
    if !quiet {
        eprintln!("Looking for {}...", identifier);
    }

    let peer = timeout(
        limit,
        session.wait_until(|s| s.peers.iter().any(|p| matches_identifier(&p.peer, identifier))),
    )
    .await
    .map_err(|_| not_found(identifier, limit))??
    .peers
    .into_iter()
    .map(|p| p.peer)
    .find(|p| matches_identifier(p, identifier))
    .ok_or_else(|| not_found(identifier, limit))?;

    if !quiet {
        eprintln!("Connecting to {}...", peer);
    }
    session.connect(peer.clone()).await?;

    let outcome = timeout(limit, async {
        let mut last_error: Option<Error> = None;
        loop {
            match events.recv().await {
                Ok(SessionEvent::Ready { peer: ready }) if ready == peer => return Ok(()),
                Ok(SessionEvent::Error { error }) => last_error = Some(error),
                Ok(SessionEvent::Disconnected { reason, .. }) => {
                    return Err(match last_error {
                        Some(error) => anyhow!(error),
                        None => anyhow!("link closed ({:?})", reason),
                    });
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                    return Err(anyhow!(Error::SessionClosed));
                }
            }
        }
    })
    .await
    .map_err(|_| anyhow!("timed out after {}s", limit.as_secs()))
    .and_then(|result| result);

    outcome.with_context(|| {
        format!(
            "Failed to connect to controller: {}\n\n\
             Possible causes:\n  \
             - Controller may be connected to another phone or host\n  \
             - Controller may have gone out of range",
            identifier
        )
    })?;

    // Best effort.
    if let Err(e) = update_last_device(peer.as_str()) {
        tracing::debug!("Failed to remember last device: {}", e);
    }
    Ok(peer)
}

fn matches_identifier(peer: &PeerId, identifier: &str) -> bool {
    peer.as_str().eq_ignore_ascii_case(identifier.trim())
}

fn not_found(identifier: &str, limit: Duration) -> anyhow::Error {
    anyhow!(
        "Controller {} not found within {}s.\n\n\
         Possible causes:\n  \
         - Bluetooth may be disabled -- check system settings\n  \
         - Controller may be out of range or switched off\n  \
         - Address may be incorrect -- run 'wta scan' to verify",
        identifier,
        limit.as_secs()
    )
}

/// Write output to file or stdout
pub fn write_output(output: Option<&PathBuf>, content: &str) -> Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, content)
                .with_context(|| format!("Failed to write to {}", path.display()))?;
        }
        None => {
            print!("{}", content);
            io::stdout().flush()?;
        }
    }
    Ok(())
}

/// Append output to file or write it to stdout.
///
/// Used by streaming commands that emit one chunk at a time.
pub fn append_output(output: Option<&PathBuf>, content: &str) -> Result<()> {
    match output {
        Some(path) => {
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open {}", path.display()))?;
            file.write_all(content.as_bytes())
                .with_context(|| format!("Failed to write to {}", path.display()))?;
        }
        None => {
            print!("{}", content);
            io::stdout().flush()?;
        }
    }
    Ok(())
}
