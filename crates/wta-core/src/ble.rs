//! btleplug-backed transport.
//!
//! [`BleTransport`] drives the first Bluetooth adapter of the host. A
//! background task forwards adapter events (discoveries, disconnects, power
//! state) as [`TransportEvent`]s, and every subscription gets its own task
//! forwarding the peripheral's notification stream.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CentralState, CharPropFlags, Characteristic, Manager as _,
    Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;
use wta_types::PeerId;

use crate::error::{Error, Result};
use crate::transport::{CharacteristicInfo, Transport, TransportEvent, transport_channel};
use crate::util::peer_id;

/// Default timeout for BLE connection.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default timeout for service discovery.
const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for enabling notifications.
const DEFAULT_SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for BLE characteristic write operations.
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for dropping a link.
const DEFAULT_DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Get the first available Bluetooth adapter.
pub async fn get_adapter() -> Result<Adapter> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;

    adapters
        .into_iter()
        .next()
        .ok_or(Error::TransportUnavailable)
}

/// State shared with the background tasks.
struct Shared {
    adapter: Adapter,
    events: mpsc::Sender<TransportEvent>,
    peripherals: RwLock<HashMap<PeerId, Peripheral>>,
    ids: RwLock<HashMap<PeripheralId, PeerId>>,
    characteristics: RwLock<HashMap<PeerId, BTreeSet<Characteristic>>>,
    subscriptions: Subscriptions,
}

impl Shared {
    async fn register(&self, id: &PeripheralId) -> Option<(PeerId, Option<String>, Option<i16>)> {
        let peripheral = self.adapter.peripheral(id).await.ok()?;
        let properties = peripheral.properties().await.ok().flatten()?;
        let peer = peer_id(&properties.address.to_string(), id);

        self.ids.write().await.insert(id.clone(), peer.clone());
        self.peripherals
            .write()
            .await
            .insert(peer.clone(), peripheral);

        Some((peer, properties.local_name, properties.rssi))
    }

    async fn peripheral(&self, peer: &PeerId) -> Result<Peripheral> {
        if let Some(peripheral) = self.peripherals.read().await.get(peer) {
            return Ok(peripheral.clone());
        }

        // Not seen by the event task yet: search the adapter's cache.
        for peripheral in self.adapter.peripherals().await? {
            let id = peripheral.id();
            if let Some((found, _, _)) = self.register(&id).await
                && &found == peer
            {
                return Ok(peripheral);
            }
        }

        Err(Error::connection_failed(peer.clone(), "peripheral not found"))
    }

    async fn characteristic(&self, peer: &PeerId, uuid: Uuid) -> Result<Characteristic> {
        let characteristics = self.characteristics.read().await;
        let known = characteristics.get(peer);
        known
            .and_then(|set| set.iter().find(|c| c.uuid == uuid).cloned())
            .ok_or_else(|| {
                Error::characteristic_not_found(uuid.to_string(), known.map_or(0, BTreeSet::len))
            })
    }

    async fn emit(&self, event: TransportEvent) {
        if self.events.send(event).await.is_err() {
            debug!("Transport event receiver dropped");
        }
    }
}

/// Notification forwarding tasks, one per subscribed peer.
#[derive(Default)]
struct Subscriptions {
    tasks: Mutex<HashMap<PeerId, JoinHandle<()>>>,
}

impl Subscriptions {
    /// Track `handle` for `peer`, stopping the task it replaces.
    fn insert(&self, peer: &PeerId, handle: JoinHandle<()>) {
        if let Ok(mut tasks) = self.tasks.lock()
            && let Some(previous) = tasks.insert(peer.clone(), handle)
        {
            previous.abort();
        }
    }

    fn stop(&self, peer: &PeerId) {
        if let Ok(mut tasks) = self.tasks.lock()
            && let Some(handle) = tasks.remove(peer)
        {
            debug!(%peer, "Stopping notification task");
            handle.abort();
        }
    }

    fn stop_all(&self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            for (_, handle) in tasks.drain() {
                handle.abort();
            }
        }
    }

    #[cfg(test)]
    fn contains(&self, peer: &PeerId) -> bool {
        self.tasks
            .lock()
            .map(|tasks| tasks.contains_key(peer))
            .unwrap_or(false)
    }
}

/// Transport over the host's Bluetooth adapter.
pub struct BleTransport {
    shared: Arc<Shared>,
    receiver: Mutex<Option<mpsc::Receiver<TransportEvent>>>,
    cancel: CancellationToken,
    connect_timeout: Duration,
    discovery_timeout: Duration,
    subscribe_timeout: Duration,
    write_timeout: Duration,
}

impl std::fmt::Debug for BleTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BleTransport")
            .field("connect_timeout", &self.connect_timeout)
            .field("discovery_timeout", &self.discovery_timeout)
            .field("subscribe_timeout", &self.subscribe_timeout)
            .field("write_timeout", &self.write_timeout)
            .finish_non_exhaustive()
    }
}

impl BleTransport {
    /// Open the first adapter and start forwarding its events.
    ///
    /// The current adapter power state is reported as the first event.
    #[tracing::instrument(level = "info")]
    pub async fn new() -> Result<Self> {
        let adapter = get_adapter().await?;
        let mut central_events = adapter.events().await?;
        let powered = adapter
            .adapter_state()
            .await
            .map(|state| state == CentralState::PoweredOn)
            .unwrap_or(true);

        let (sender, receiver) = transport_channel();
        let shared = Arc::new(Shared {
            adapter,
            events: sender,
            peripherals: RwLock::new(HashMap::new()),
            ids: RwLock::new(HashMap::new()),
            characteristics: RwLock::new(HashMap::new()),
            subscriptions: Subscriptions::default(),
        });
        shared.emit(TransportEvent::AdapterState { powered }).await;

        let cancel = CancellationToken::new();
        let task_shared = Arc::clone(&shared);
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    event = central_events.next() => match event {
                        Some(event) => event,
                        None => break,
                    },
                };
                forward_central_event(&task_shared, event).await;
            }
            debug!("Central event task stopped");
        });

        info!(powered, "Bluetooth transport ready");
        Ok(Self {
            shared,
            receiver: Mutex::new(Some(receiver)),
            cancel,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            subscribe_timeout: DEFAULT_SUBSCRIBE_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        })
    }

    /// Set the timeout applied to the link-layer connect.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the timeout applied to service discovery.
    #[must_use]
    pub fn discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    /// Set the timeout applied to enabling notifications.
    #[must_use]
    pub fn subscribe_timeout(mut self, timeout: Duration) -> Self {
        self.subscribe_timeout = timeout;
        self
    }

    /// Set the timeout applied to characteristic writes.
    #[must_use]
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }
}

async fn forward_central_event(shared: &Shared, event: CentralEvent) {
    match event {
        CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
            if let Some((peer, name, rssi)) = shared.register(&id).await {
                shared
                    .emit(TransportEvent::Discovered { peer, name, rssi })
                    .await;
            }
        }
        CentralEvent::DeviceDisconnected(id) => {
            let peer = shared.ids.read().await.get(&id).cloned();
            if let Some(peer) = peer {
                shared.subscriptions.stop(&peer);
                shared.characteristics.write().await.remove(&peer);
                shared.emit(TransportEvent::Disconnected { peer }).await;
            }
        }
        CentralEvent::StateUpdate(state) => {
            let powered = state == CentralState::PoweredOn;
            shared.emit(TransportEvent::AdapterState { powered }).await;
        }
        _ => {}
    }
}

impl Drop for BleTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.shared.subscriptions.stop_all();
    }
}

#[async_trait]
impl Transport for BleTransport {
    fn take_events(&self) -> Option<mpsc::Receiver<TransportEvent>> {
        self.receiver.lock().ok().and_then(|mut receiver| receiver.take())
    }

    async fn start_scan(&self) -> Result<()> {
        self.shared
            .adapter
            .start_scan(ScanFilter::default())
            .await?;
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        self.shared.adapter.stop_scan().await?;
        Ok(())
    }

    #[tracing::instrument(level = "info", skip_all, fields(peer = %peer))]
    async fn connect(&self, peer: &PeerId) -> Result<()> {
        let peripheral = self.shared.peripheral(peer).await?;
        timeout(self.connect_timeout, peripheral.connect())
            .await
            .map_err(|_| Error::timeout(self.connect_timeout))??;
        Ok(())
    }

    #[tracing::instrument(level = "info", skip_all, fields(peer = %peer))]
    async fn disconnect(&self, peer: &PeerId) -> Result<()> {
        self.shared.subscriptions.stop(peer);
        self.shared.characteristics.write().await.remove(peer);
        let peripheral = self.shared.peripherals.read().await.get(peer).cloned();
        if let Some(peripheral) = peripheral {
            timeout(DEFAULT_DISCONNECT_TIMEOUT, peripheral.disconnect())
                .await
                .map_err(|_| Error::timeout(DEFAULT_DISCONNECT_TIMEOUT))??;
        }
        Ok(())
    }

    async fn discover_services(&self, peer: &PeerId) -> Result<Vec<CharacteristicInfo>> {
        let peripheral = self.shared.peripheral(peer).await?;
        timeout(self.discovery_timeout, peripheral.discover_services())
            .await
            .map_err(|_| {
                warn!(%peer, timeout = ?self.discovery_timeout, "Service discovery timed out");
                Error::timeout(self.discovery_timeout)
            })??;

        let characteristics = peripheral.characteristics();
        let infos = characteristics
            .iter()
            .map(|c| CharacteristicInfo {
                uuid: c.uuid,
                service: c.service_uuid,
                can_write: c.properties.contains(CharPropFlags::WRITE),
                can_write_without_response: c
                    .properties
                    .contains(CharPropFlags::WRITE_WITHOUT_RESPONSE),
                can_notify: c.properties.contains(CharPropFlags::NOTIFY)
                    || c.properties.contains(CharPropFlags::INDICATE),
            })
            .collect::<Vec<_>>();

        debug!(%peer, count = infos.len(), "Discovered characteristics");
        self.shared
            .characteristics
            .write()
            .await
            .insert(peer.clone(), characteristics);
        Ok(infos)
    }

    async fn subscribe(&self, peer: &PeerId, characteristic: Uuid) -> Result<()> {
        let peripheral = self.shared.peripheral(peer).await?;
        let target = self.shared.characteristic(peer, characteristic).await?;
        let mut stream = timeout(self.subscribe_timeout, async {
            peripheral.subscribe(&target).await?;
            Ok::<_, btleplug::Error>(peripheral.notifications().await?)
        })
        .await
        .map_err(|_| {
            warn!(%peer, %characteristic, timeout = ?self.subscribe_timeout, "Subscribe timed out");
            Error::timeout(self.subscribe_timeout)
        })??;

        let shared = Arc::clone(&self.shared);
        let cancel = self.cancel.clone();
        let task_peer = peer.clone();
        let handle = tokio::spawn(async move {
            loop {
                let notification = tokio::select! {
                    _ = cancel.cancelled() => break,
                    notification = stream.next() => match notification {
                        Some(notification) => notification,
                        None => break,
                    },
                };
                if notification.uuid != characteristic {
                    continue;
                }
                shared
                    .emit(TransportEvent::Notification {
                        peer: task_peer.clone(),
                        characteristic: notification.uuid,
                        data: Bytes::from(notification.value),
                    })
                    .await;
            }
            debug!(peer = %task_peer, "Notification task stopped");
        });

        self.shared.subscriptions.insert(peer, handle);
        Ok(())
    }

    async fn write(&self, peer: &PeerId, characteristic: Uuid, data: &[u8]) -> Result<()> {
        let peripheral = self.shared.peripheral(peer).await?;
        let target = self.shared.characteristic(peer, characteristic).await?;
        let write_type = if target.properties.contains(CharPropFlags::WRITE) {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };

        timeout(self.write_timeout, peripheral.write(&target, data, write_type))
            .await
            .map_err(|_| {
                Error::write_failed(
                    characteristic.to_string(),
                    format!("timed out after {:?}", self.write_timeout),
                )
            })?
            .map_err(|e| {
                warn!(%peer, %characteristic, error = %e, "Write failed");
                Error::write_failed(characteristic.to_string(), e.to_string())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn forever() -> JoinHandle<()> {
        tokio::spawn(std::future::pending::<()>())
    }

    async fn stopped(task: &tokio::task::AbortHandle) -> bool {
        timeout(Duration::from_secs(1), async {
            while !task.is_finished() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .is_ok()
    }

    #[tokio::test]
    async fn test_subscription_stopped_for_peer() {
        let subscriptions = Subscriptions::default();
        let lost = PeerId::new("AA:BB");
        let other = PeerId::new("CC:DD");
        let task = forever();
        let abort = task.abort_handle();
        subscriptions.insert(&lost, task);
        subscriptions.insert(&other, forever());

        subscriptions.stop(&lost);

        assert!(stopped(&abort).await);
        assert!(!subscriptions.contains(&lost));
        assert!(subscriptions.contains(&other));
        subscriptions.stop_all();
        assert!(!subscriptions.contains(&other));
    }

    #[tokio::test]
    async fn test_resubscribe_replaces_task() {
        let subscriptions = Subscriptions::default();
        let peer = PeerId::new("AA:BB");
        let first = forever();
        let abort = first.abort_handle();
        subscriptions.insert(&peer, first);
        subscriptions.insert(&peer, forever());

        assert!(stopped(&abort).await);
        assert!(subscriptions.contains(&peer));
        subscriptions.stop_all();
    }
}
