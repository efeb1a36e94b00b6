//! Example: Scanning for Controllers
//!
//! Lists WTA controllers in range for ten seconds.
//!
//! Run with: `cargo run --example scan_controllers`

use std::sync::Arc;
use std::time::Duration;

use wta_core::{BleTransport, SessionConfig, SessionEvent, driver};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let transport = Arc::new(BleTransport::new().await?);
    let session = driver::spawn(transport, SessionConfig::default())?;
    let mut events = session.subscribe();
    session.start_scan().await?;

    println!("Scanning for 10 seconds...");
    let deadline = tokio::time::sleep(Duration::from_secs(10));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            event = events.recv() => match event {
                Ok(SessionEvent::Discovered { peer }) => {
                    println!(
                        "  {:<20} {:<24} {}",
                        peer.name.as_deref().unwrap_or("Unknown"),
                        peer.peer,
                        peer.rssi.map_or("-".to_string(), |rssi| format!("{} dBm", rssi)),
                    );
                }
                Ok(_) => {}
                Err(_) => break,
            },
        }
    }

    let found = session.snapshot().peers.len();
    println!();
    println!("Found {} controller(s)", found);

    session.shutdown().await;
    Ok(())
}
