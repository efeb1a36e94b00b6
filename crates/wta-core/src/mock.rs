//! Mock transport for testing.
//!
//! [`MockTransport`] implements [`Transport`] without any radio. It records
//! every call, answers service discovery with a scripted characteristic set,
//! and lets tests push [`TransportEvent`]s as if they came from the adapter.
//!
//! # Features
//!
//! - **Call recording**: inspect every scan, connect and write afterwards
//! - **Failure injection**: make connects or writes fail, or stall discovery
//! - **Latency simulation**: delay connects to exercise the connect timeout
//! - **Event injection**: deliver discoveries, notifications and link loss

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use uuid::Uuid;
use wta_types::PeerId;
use wta_types::uuid::{WTA_NOTIFY, WTA_SERVICE, WTA_WRITE};

use crate::error::{Error, Result};
use crate::transport::{CharacteristicInfo, Transport, TransportEvent, transport_channel};

/// A call received by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    StartScan,
    StopScan,
    Connect(PeerId),
    Disconnect(PeerId),
    DiscoverServices(PeerId),
    Subscribe { peer: PeerId, characteristic: Uuid },
    Write { peer: PeerId, characteristic: Uuid, data: Vec<u8> },
}

/// A transport double for tests.
///
/// # Example
///
/// ```
/// use wta_core::{MockTransport, Transport};
///
/// #[tokio::main]
/// async fn main() {
///     let transport = MockTransport::new();
///     let peer = MockTransport::random_peer();
///     transport.connect(&peer).await.unwrap();
///     assert!(transport.is_connected(&peer));
/// }
/// ```
pub struct MockTransport {
    sender: mpsc::Sender<TransportEvent>,
    receiver: Mutex<Option<mpsc::Receiver<TransportEvent>>>,
    calls: Mutex<Vec<MockCall>>,
    characteristics: Mutex<Vec<CharacteristicInfo>>,
    connected: Mutex<HashSet<PeerId>>,
    connect_failure: Mutex<Option<String>>,
    fail_writes: AtomicBool,
    stall_discovery: AtomicBool,
    /// Simulated connect latency in milliseconds (0 = no delay).
    connect_latency_ms: AtomicU64,
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("calls", &self.calls().len())
            .field("fail_writes", &self.fail_writes.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Create a mock exposing the standard controller characteristics.
    pub fn new() -> Self {
        let (sender, receiver) = transport_channel();
        Self {
            sender,
            receiver: Mutex::new(Some(receiver)),
            calls: Mutex::new(Vec::new()),
            characteristics: Mutex::new(Self::default_characteristics()),
            connected: Mutex::new(HashSet::new()),
            connect_failure: Mutex::new(None),
            fail_writes: AtomicBool::new(false),
            stall_discovery: AtomicBool::new(false),
            connect_latency_ms: AtomicU64::new(0),
        }
    }

    /// The write and notify characteristics of a WTA controller.
    pub fn default_characteristics() -> Vec<CharacteristicInfo> {
        vec![
            CharacteristicInfo {
                uuid: WTA_WRITE,
                service: WTA_SERVICE,
                can_write: true,
                can_write_without_response: true,
                can_notify: false,
            },
            CharacteristicInfo {
                uuid: WTA_NOTIFY,
                service: WTA_SERVICE,
                can_write: false,
                can_write_without_response: false,
                can_notify: true,
            },
        ]
    }

    /// A random MAC-style peer identifier.
    pub fn random_peer() -> PeerId {
        let bytes: [u8; 6] = rand::random();
        PeerId::new(
            bytes
                .iter()
                .map(|b| format!("{:02X}", b))
                .collect::<Vec<_>>()
                .join(":"),
        )
    }

    // --- Scripting ---

    /// Replace the characteristics returned by service discovery.
    pub fn set_characteristics(&self, characteristics: Vec<CharacteristicInfo>) {
        if let Ok(mut current) = self.characteristics.lock() {
            *current = characteristics;
        }
    }

    /// Make every connect fail with `reason`, or succeed again with `None`.
    pub fn set_connect_failure(&self, reason: Option<&str>) {
        if let Ok(mut failure) = self.connect_failure.lock() {
            *failure = reason.map(str::to_string);
        }
    }

    /// Make every write fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    /// Make service discovery never complete.
    pub fn set_stall_discovery(&self, stall: bool) {
        self.stall_discovery.store(stall, Ordering::Relaxed);
    }

    /// Delay every connect by `latency`.
    pub fn set_connect_latency(&self, latency: Duration) {
        self.connect_latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    // --- Event injection ---

    /// Deliver an event as if it came from the adapter.
    pub async fn emit(&self, event: TransportEvent) {
        let _ = self.sender.send(event).await;
    }

    /// Report a discovered peripheral.
    pub async fn discover(&self, peer: &PeerId, name: &str, rssi: i16) {
        self.emit(TransportEvent::Discovered {
            peer: peer.clone(),
            name: Some(name.to_string()),
            rssi: Some(rssi),
        })
        .await;
    }

    /// Deliver a notification on the notify characteristic.
    pub async fn notify(&self, peer: &PeerId, text: &str) {
        self.emit(TransportEvent::Notification {
            peer: peer.clone(),
            characteristic: WTA_NOTIFY,
            data: Bytes::copy_from_slice(text.as_bytes()),
        })
        .await;
    }

    /// Drop the link to `peer` from the peripheral side.
    pub async fn drop_link(&self, peer: &PeerId) {
        if let Ok(mut connected) = self.connected.lock() {
            connected.remove(peer);
        }
        self.emit(TransportEvent::Disconnected { peer: peer.clone() })
            .await;
    }

    // --- Inspection ---

    /// Every call received so far, in order.
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    /// Payloads written so far, in order.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                MockCall::Write { data, .. } => Some(data),
                _ => None,
            })
            .collect()
    }

    /// Number of recorded calls equal to `call`.
    pub fn count(&self, call: &MockCall) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }

    /// Forget recorded calls.
    pub fn clear_calls(&self) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.clear();
        }
    }

    /// Whether a link to `peer` is up.
    pub fn is_connected(&self, peer: &PeerId) -> bool {
        self.connected
            .lock()
            .map(|connected| connected.contains(peer))
            .unwrap_or(false)
    }

    fn record(&self, call: MockCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    fn check_connected(&self, peer: &PeerId) -> Result<()> {
        if self.is_connected(peer) {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn take_events(&self) -> Option<mpsc::Receiver<TransportEvent>> {
        self.receiver.lock().ok().and_then(|mut receiver| receiver.take())
    }

    async fn start_scan(&self) -> Result<()> {
        self.record(MockCall::StartScan);
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        self.record(MockCall::StopScan);
        Ok(())
    }

    async fn connect(&self, peer: &PeerId) -> Result<()> {
        self.record(MockCall::Connect(peer.clone()));

        // Simulate connect latency
        let latency = self.connect_latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        let failure = self.connect_failure.lock().ok().and_then(|f| f.clone());
        if let Some(reason) = failure {
            return Err(Error::Bluetooth(reason));
        }
        if let Ok(mut connected) = self.connected.lock() {
            connected.insert(peer.clone());
        }
        Ok(())
    }

    async fn disconnect(&self, peer: &PeerId) -> Result<()> {
        self.record(MockCall::Disconnect(peer.clone()));
        if let Ok(mut connected) = self.connected.lock() {
            connected.remove(peer);
        }
        Ok(())
    }

    async fn discover_services(&self, peer: &PeerId) -> Result<Vec<CharacteristicInfo>> {
        self.record(MockCall::DiscoverServices(peer.clone()));
        self.check_connected(peer)?;
        if self.stall_discovery.load(Ordering::Relaxed) {
            std::future::pending::<()>().await;
        }
        Ok(self
            .characteristics
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default())
    }

    async fn subscribe(&self, peer: &PeerId, characteristic: Uuid) -> Result<()> {
        self.record(MockCall::Subscribe {
            peer: peer.clone(),
            characteristic,
        });
        self.check_connected(peer)
    }

    async fn write(&self, peer: &PeerId, characteristic: Uuid, data: &[u8]) -> Result<()> {
        self.record(MockCall::Write {
            peer: peer.clone(),
            characteristic,
            data: data.to_vec(),
        });
        self.check_connected(peer)?;
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(Error::write_failed(characteristic.to_string(), "Mock failure"));
        }
        Ok(())
    }
}
