//! Set command implementation.

use std::time::Duration;

use anyhow::{Result, bail};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::timeout;
use wta_core::{Error, SessionConfig, SessionEvent};

use crate::util::{connect, open_session};

/// How long to wait for a reading that reflects the new setpoint.
const CONFIRM_TIMEOUT: Duration = Duration::from_secs(10);

/// Readings within this distance of the target count as confirmation.
const SETPOINT_TOLERANCE: f32 = 0.05;

pub async fn cmd_set(
    device: String,
    celsius: f32,
    connect_timeout: Duration,
    config: SessionConfig,
    quiet: bool,
) -> Result<()> {
    let session = open_session(config).await?;
    connect(&session, &device, connect_timeout, quiet).await?;

    let mut events = session.subscribe();
    session.set_temperature(celsius).await?;

    let confirmed = timeout(CONFIRM_TIMEOUT, async {
        loop {
            match events.recv().await {
                Ok(SessionEvent::Measurement { snapshot })
                    if (snapshot.setpoint - celsius).abs() < SETPOINT_TOLERANCE =>
                {
                    return Ok(true);
                }
                Ok(SessionEvent::Error {
                    error: error @ Error::WriteFailed { .. },
                }) => return Err(error),
                Ok(SessionEvent::Disconnected { .. }) | Err(RecvError::Closed) => {
                    return Ok(false);
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
            }
        }
    })
    .await
    .unwrap_or(Ok(false));

    session.shutdown().await;

    match confirmed {
        Ok(true) => {
            if !quiet {
                println!("Setpoint set to {:.1} °C", celsius);
            }
        }
        Ok(false) => {
            eprintln!(
                "Setpoint {:.1} °C sent; the controller has not confirmed it yet.",
                celsius
            );
        }
        Err(e) => bail!("Failed to set setpoint: {}", e),
    }
    Ok(())
}
