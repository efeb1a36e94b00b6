//! Example: Downloading the History Log
//!
//! Connects to a controller, requests its history log and prints the
//! entries of the last 48 hours.
//!
//! Run with: `cargo run --example download_history -- <DEVICE_ADDRESS>`

use std::env;
use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::time::timeout;
use wta_core::{BleTransport, SessionConfig, SessionEvent, driver};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    let identifier = if args.len() > 1 {
        args[1].clone()
    } else {
        eprintln!("Usage: {} <DEVICE_ADDRESS>", args[0]);
        eprintln!();
        eprintln!("Example:");
        eprintln!("  {} AA:BB:CC:DD:EE:FF", args[0]);
        std::process::exit(1);
    };

    let transport = Arc::new(BleTransport::new().await?);
    let session = driver::spawn(transport, SessionConfig::default())?;
    let mut events = session.subscribe();

    // The peripheral must have been seen by a scan before it can be connected.
    session.start_scan().await?;
    timeout(
        Duration::from_secs(15),
        session.wait_until(|s| s.peers.iter().any(|p| p.peer.as_str() == identifier)),
    )
    .await??;

    println!("Connecting to {}...", identifier);
    session.connect(identifier.as_str()).await?;
    timeout(Duration::from_secs(15), session.wait_until(|s| s.ready)).await??;
    println!("Connected!");

    println!("Downloading history...");
    session.request_history().await?;
    loop {
        match events.recv().await? {
            SessionEvent::ExportFinished { reason, summary } => {
                println!(
                    "Export finished ({:?}): {} accepted, {} duplicates, {} malformed",
                    reason, summary.accepted, summary.duplicates, summary.malformed
                );
                break;
            }
            SessionEvent::Disconnected { .. } => {
                eprintln!("Link lost during export");
                break;
            }
            _ => {}
        }
    }

    println!();
    println!(
        "{:<28} {:>9} {:>9} {:>9} {:>8}",
        "Timestamp", "Chamber", "External", "Setpoint", "Battery"
    );
    println!("{}", "-".repeat(67));
    for entry in session.recent_history(OffsetDateTime::now_utc()) {
        println!(
            "{:<28} {:>7.2}°C {:>7.2}°C {:>7.2}°C {:>8.2}",
            entry.timestamp.to_string(),
            entry.chamber_temperature,
            entry.external_temperature,
            entry.setpoint,
            entry.battery,
        );
    }

    session.shutdown().await;
    Ok(())
}
