//! Transport abstraction for the BLE radio.
//!
//! The session engine never talks to a radio directly. It consumes the
//! [`Transport`] trait, implemented by [`BleTransport`](crate::ble::BleTransport)
//! for real hardware and by [`MockTransport`](crate::mock::MockTransport) for
//! tests. Unsolicited radio activity (discoveries, disconnects, notifications,
//! adapter power changes) is delivered as [`TransportEvent`]s on a channel
//! handed out once by [`Transport::take_events`].

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use uuid::Uuid;
use wta_types::PeerId;

use crate::error::Result;

/// Capacity of the transport event channel.
pub const TRANSPORT_EVENT_CAPACITY: usize = 256;

/// A characteristic located during service discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicInfo {
    /// Characteristic UUID.
    pub uuid: Uuid,
    /// UUID of the service the characteristic belongs to.
    pub service: Uuid,
    /// Supports write with response.
    pub can_write: bool,
    /// Supports write without response.
    pub can_write_without_response: bool,
    /// Supports notifications.
    pub can_notify: bool,
}

impl CharacteristicInfo {
    /// Whether the characteristic accepts writes of either kind.
    pub fn is_writable(&self) -> bool {
        self.can_write || self.can_write_without_response
    }
}

/// Unsolicited activity reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The adapter was powered on or off.
    AdapterState {
        /// Whether the radio is usable.
        powered: bool,
    },
    /// A peripheral was seen while scanning.
    Discovered {
        /// Transport identifier of the peripheral.
        peer: PeerId,
        /// Advertised local name, if any.
        name: Option<String>,
        /// Signal strength in dBm.
        rssi: Option<i16>,
    },
    /// A link was dropped by the peer or the system.
    Disconnected {
        /// The peripheral that went away.
        peer: PeerId,
    },
    /// A notification arrived on a subscribed characteristic.
    Notification {
        /// The sending peripheral.
        peer: PeerId,
        /// The characteristic that notified.
        characteristic: Uuid,
        /// Raw payload.
        data: Bytes,
    },
}

/// Create a transport event channel.
pub fn transport_channel() -> (
    mpsc::Sender<TransportEvent>,
    mpsc::Receiver<TransportEvent>,
) {
    mpsc::channel(TRANSPORT_EVENT_CAPACITY)
}

/// Operations the session engine needs from a BLE radio.
///
/// Every method is a request; completion or failure is reported through the
/// returned `Result`. Implementations must be safe to call concurrently.
///
/// # Example
///
/// ```ignore
/// use wta_core::{Transport, Result};
///
/// async fn scan_briefly<T: Transport>(transport: &T) -> Result<()> {
///     transport.start_scan().await?;
///     tokio::time::sleep(std::time::Duration::from_secs(5)).await;
///     transport.stop_scan().await
/// }
/// ```
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Take the event receiver. Returns `None` once it has been taken.
    fn take_events(&self) -> Option<mpsc::Receiver<TransportEvent>>;

    // --- Scanning ---

    /// Start scanning for peripherals.
    async fn start_scan(&self) -> Result<()>;

    /// Stop scanning.
    async fn stop_scan(&self) -> Result<()>;

    // --- Connection Management ---

    /// Connect to a peripheral. Resolves once the link is up.
    async fn connect(&self, peer: &PeerId) -> Result<()>;

    /// Disconnect from a peripheral, cancelling a pending connect.
    async fn disconnect(&self, peer: &PeerId) -> Result<()>;

    // --- GATT ---

    /// Discover services and return every characteristic found.
    async fn discover_services(&self, peer: &PeerId) -> Result<Vec<CharacteristicInfo>>;

    /// Enable notifications on a characteristic.
    async fn subscribe(&self, peer: &PeerId, characteristic: Uuid) -> Result<()>;

    /// Write a payload to a characteristic.
    async fn write(&self, peer: &PeerId, characteristic: Uuid, data: &[u8]) -> Result<()>;
}
