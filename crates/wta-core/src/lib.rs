//! BLE session engine for WTA chamber controllers.
//!
//! This crate turns the controller's fragmented, delimiter-based text stream
//! into validated domain state, and turns user intents into commands.
//!
//! # Features
//!
//! - **Frame reassembly**: CR+LF records rebuilt from arbitrary notification fragments
//! - **Live telemetry**: range-gated measurement snapshots
//! - **History export**: log download with deduplication and a 48-hour display view
//! - **Connection lifecycle**: scan, connect, characteristic discovery, timeouts, rescan
//! - **Commands**: setpoint changes with the activation pulse the controller requires
//!
//! # Architecture
//!
//! | Layer | Module |
//! |-------|--------|
//! | Wire decoding | [`framing`], [`telemetry`], [`history`] |
//! | Domain state | [`store`], [`session`] |
//! | Outgoing commands | [`commands`] |
//! | Radio | [`transport`], [`ble`], [`mock`] |
//! | Runtime | [`driver`], [`events`] |
//!
//! [`Session`] is a pure state machine: it consumes inputs stamped with the
//! current time and returns the actions to perform. [`driver::spawn`] runs it
//! on tokio against any [`Transport`].
//!
//! # Platform Differences
//!
//! Peripherals are identified by their Bluetooth MAC address on Linux and
//! Windows. On macOS the MAC is hidden and a CoreBluetooth UUID is used
//! instead; it is stable for a given controller on a given Mac only.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use wta_core::{BleTransport, SessionConfig, SessionEvent, driver};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = Arc::new(BleTransport::new().await?);
//!     let session = driver::spawn(transport, SessionConfig::default().auto_connect(true))?;
//!     let mut events = session.subscribe();
//!
//!     while let Ok(event) = events.recv().await {
//!         if let SessionEvent::Measurement { snapshot } = event {
//!             println!("{}", snapshot);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod ble;
pub mod commands;
pub mod config;
pub mod driver;
pub mod error;
pub mod events;
pub mod framing;
pub mod history;
pub mod mock;
pub mod session;
pub mod store;
pub mod telemetry;
pub mod transport;
pub mod util;

// Re-export types and uuid modules from wta-types
pub use wta_types::types;
pub use wta_types::uuid;

// Core exports
pub use ble::BleTransport;
pub use commands::{ACTIVATE, Command, REQUEST_HISTORY, SET_SETPOINT};
pub use config::SessionConfig;
pub use driver::SessionHandle;
pub use error::{Error, Result};
pub use events::{
    DisconnectReason, DiscoveredPeer, EventReceiver, EventSender, ExportEnd, ExportSummary,
    SessionEvent, SessionSnapshot,
};
pub use framing::{FrameBuffer, Record};
pub use history::decode_entry;
pub use mock::{MockCall, MockTransport};
pub use session::{Action, Input, Session, Transition};
pub use store::HistoryStore;
pub use telemetry::{Telemetry, decode_telemetry};
pub use transport::{CharacteristicInfo, Transport, TransportEvent};
pub use util::format_peripheral_id;

// Re-export from wta-types
pub use wta_types::uuid as uuids;
pub use wta_types::{
    ConnectionState, LogEntry, MeasurementSnapshot, ParseError, PeerId, StatusFlags,
};
