//! Session events and published state.
//!
//! Consumers observe a session in two ways: a [`SessionSnapshot`] published
//! after every completed transition, and a stream of [`SessionEvent`]s for
//! things that happen once (a discovery, a finished export, an error).

use std::sync::Arc;

use serde::{Serialize, Serializer};
use tokio::sync::broadcast;
use wta_types::{ConnectionState, LogEntry, MeasurementSnapshot, PeerId};

use crate::error::Error;

/// A peripheral seen while scanning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredPeer {
    /// Transport identifier.
    pub peer: PeerId,
    /// Advertised local name, if any.
    pub name: Option<String>,
    /// Last reported signal strength in dBm.
    pub rssi: Option<i16>,
}

/// Why a link ended.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new reasons
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum DisconnectReason {
    /// Normal disconnection requested by user.
    UserRequested,
    /// Connection attempt timed out.
    Timeout,
    /// The transport rejected the connection attempt.
    ConnectFailed,
    /// The peer or the system dropped the link.
    LinkLost,
    /// The controller lacks the expected characteristics.
    MissingCharacteristic,
    /// The adapter was powered off.
    AdapterOff,
    /// The session shut down.
    Shutdown,
}

/// How a history export ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportEnd {
    /// The end-of-history record arrived.
    Sentinel,
    /// The export timeout fired first.
    Timeout,
    /// The link went down mid-transfer.
    Aborted,
    /// The history request could not be written.
    RequestFailed,
}

/// Counters of one history export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ExportSummary {
    /// Entries added to the store.
    pub accepted: usize,
    /// Entries rejected as same-second duplicates.
    pub duplicates: usize,
    /// Entries that failed to decode.
    pub malformed: usize,
}

/// Events emitted by a session.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum SessionEvent {
    /// Scanning started or stopped.
    Scanning { active: bool },
    /// A matching peripheral was seen for the first time.
    Discovered { peer: DiscoveredPeer },
    /// A connection attempt started.
    Connecting { peer: PeerId },
    /// The link is up; characteristic discovery follows.
    Connected { peer: PeerId },
    /// Characteristics located and notifications requested.
    Ready { peer: PeerId },
    /// The link ended or the attempt was abandoned.
    Disconnected {
        peer: Option<PeerId>,
        reason: DisconnectReason,
    },
    /// A new live reading replaced the previous one.
    Measurement { snapshot: MeasurementSnapshot },
    /// A history export started; the store was cleared.
    ExportStarted,
    /// A history export ended.
    ExportFinished {
        reason: ExportEnd,
        summary: ExportSummary,
    },
    /// A recoverable failure.
    Error {
        #[serde(serialize_with = "serialize_error")]
        error: Error,
    },
}

impl SessionEvent {
    /// Wrap an error into an event.
    pub fn error(error: impl Into<Error>) -> Self {
        Self::Error {
            error: error.into(),
        }
    }
}

fn serialize_error<S: Serializer>(error: &Error, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(error)
}

/// State published after every transition.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionSnapshot {
    /// Connection lifecycle state.
    pub state: ConnectionState,
    /// Targeted peripheral, if any.
    pub peer: Option<PeerId>,
    /// Whether the write and notify characteristics are located.
    pub ready: bool,
    /// Whether scanning is active.
    pub scanning: bool,
    /// Whether a history export is in progress.
    pub exporting: bool,
    /// Last valid live reading.
    pub measurement: Option<MeasurementSnapshot>,
    /// Matching peripherals seen while scanning.
    pub peers: Vec<DiscoveredPeer>,
    /// Full history, ascending by timestamp.
    #[serde(skip)]
    pub history: Arc<Vec<LogEntry>>,
}

/// Sender for session events.
pub type EventSender = broadcast::Sender<SessionEvent>;

/// Receiver for session events.
pub type EventReceiver = broadcast::Receiver<SessionEvent>;

/// Create a new event channel with the given capacity.
pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    broadcast::channel(capacity)
}

/// Fan-out of session events to any number of subscribers.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: EventSender,
}

impl EventDispatcher {
    /// Create a new event dispatcher.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = event_channel(capacity);
        Self { sender }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Send an event.
    pub fn send(&self, event: SessionEvent) {
        // Ignore error if no receivers
        let _ = self.sender.send(event);
    }

    /// Get the number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_EVENT_CAPACITY)
    }
}
