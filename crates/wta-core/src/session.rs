//! Connection session state machine.
//!
//! [`Session`] holds all state of one controller session and changes it only
//! in [`Session::handle`]. Each call takes one [`Input`] (a user intent, a
//! transport event, an I/O completion or a clock tick) together with the
//! current time, and returns the [`Action`]s to perform on the transport and
//! the [`SessionEvent`]s to publish. The session never performs I/O and
//! never reads the clock itself, which makes every timeout deterministic in
//! tests.
//!
//! # Timers
//!
//! Timers are plain deadlines stored next to the state that owns them:
//!
//! | Deadline | Armed by | Cleared by |
//! |----------|----------|------------|
//! | connect timeout | connect request | success, failure, teardown |
//! | link setup timeout | connect success | characteristics located, teardown |
//! | export timeout | history request | sentinel, failed request write, teardown |
//! | activation | subscription, setpoint write | firing, teardown |
//! | rescan | unexpected link loss | firing, scan/connect intents |
//!
//! Expired deadlines are processed at the start of every `handle` call, and
//! each one re-checks the state it expects before acting, so a stale timer
//! can never affect a session that has moved on.

use std::time::Instant;

use bytes::Bytes;
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use uuid::Uuid;
use wta_types::{ConnectionState, MeasurementSnapshot, PeerId};

use crate::commands::{Command, REQUEST_HISTORY, validate_setpoint};
use crate::config::SessionConfig;
use crate::error::Error;
use crate::events::{
    DisconnectReason, DiscoveredPeer, ExportEnd, ExportSummary, SessionEvent, SessionSnapshot,
};
use crate::framing::{FrameBuffer, Record};
use crate::history::decode_record;
use crate::store::HistoryStore;
use crate::telemetry::{Telemetry, decode_telemetry, telemetry_lines};
use crate::transport::{CharacteristicInfo, TransportEvent};

/// Everything that can drive the session.
#[derive(Debug, Clone)]
pub enum Input {
    // --- User intents ---
    /// Start scanning for controllers.
    StartScan,
    /// Stop scanning.
    StopScan,
    /// Connect to a peripheral.
    Connect(PeerId),
    /// Drop the current link or cancel the pending attempt.
    Disconnect,
    /// Change the setpoint (°C).
    SetTemperature(f32),
    /// Download the history log.
    RequestHistory,

    // --- Transport ---
    /// Unsolicited transport activity.
    Transport(TransportEvent),
    /// A `Connect` action completed.
    ConnectSucceeded(PeerId),
    /// A `DiscoverServices` action completed.
    ServicesDiscovered {
        peer: PeerId,
        characteristics: Vec<CharacteristicInfo>,
    },
    /// An action failed.
    ActionFailed { action: Action, error: Error },

    // --- Time ---
    /// Process expired deadlines.
    Tick,
}

/// Work for the transport, in the order it must be performed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    StartScan,
    StopScan,
    Connect(PeerId),
    /// Abandon a pending connection attempt.
    CancelConnect(PeerId),
    Disconnect(PeerId),
    DiscoverServices(PeerId),
    Subscribe {
        peer: PeerId,
        characteristic: Uuid,
    },
    Write {
        peer: PeerId,
        characteristic: Uuid,
        data: Bytes,
    },
}

/// Result of one call to [`Session::handle`].
#[derive(Debug, Default)]
pub struct Transition {
    /// Transport work, to be executed in order.
    pub actions: Vec<Action>,
    /// Events to publish once the transition is complete.
    pub events: Vec<SessionEvent>,
}

impl Transition {
    /// Whether nothing needs to be done.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty() && self.events.is_empty()
    }

    fn act(&mut self, action: Action) {
        self.actions.push(action);
    }

    fn emit(&mut self, event: SessionEvent) {
        self.events.push(event);
    }

    fn fail(&mut self, error: impl Into<Error>) {
        self.events.push(SessionEvent::error(error));
    }
}

/// Located characteristics of a ready link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Link {
    write: Uuid,
    notify: Uuid,
}

/// An in-progress history export.
#[derive(Debug)]
struct Export {
    deadline: Instant,
    frames: FrameBuffer,
    summary: ExportSummary,
}

/// State of one controller session.
#[derive(Debug)]
pub struct Session {
    config: SessionConfig,
    state: ConnectionState,
    adapter_ready: bool,
    scanning: bool,
    peer: Option<PeerId>,
    link: Option<Link>,
    last_attempt: Option<Instant>,
    connect_deadline: Option<Instant>,
    setup_deadline: Option<Instant>,
    activation_at: Option<Instant>,
    rescan_at: Option<Instant>,
    export: Option<Export>,
    measurement: Option<MeasurementSnapshot>,
    store: HistoryStore,
    peers: Vec<DiscoveredPeer>,
}

impl Session {
    /// Create a disconnected session.
    pub fn new(config: SessionConfig) -> Self {
        let store = HistoryStore::new(config.display_window);
        Self {
            config,
            state: ConnectionState::Disconnected,
            adapter_ready: true,
            scanning: false,
            peer: None,
            link: None,
            last_attempt: None,
            connect_deadline: None,
            setup_deadline: None,
            activation_at: None,
            rescan_at: None,
            export: None,
            measurement: None,
            store,
            peers: Vec::new(),
        }
    }

    // --- Accessors ---

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn peer(&self) -> Option<&PeerId> {
        self.peer.as_ref()
    }

    /// Whether the write and notify characteristics are located.
    pub fn is_ready(&self) -> bool {
        self.link.is_some()
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    pub fn is_exporting(&self) -> bool {
        self.export.is_some()
    }

    pub fn adapter_ready(&self) -> bool {
        self.adapter_ready
    }

    pub fn measurement(&self) -> Option<MeasurementSnapshot> {
        self.measurement
    }

    pub fn store(&self) -> &HistoryStore {
        &self.store
    }

    pub fn peers(&self) -> &[DiscoveredPeer] {
        &self.peers
    }

    /// The earliest armed deadline, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        [
            self.connect_deadline,
            self.setup_deadline,
            self.export.as_ref().map(|export| export.deadline),
            self.activation_at,
            self.rescan_at,
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Display projection of the store relative to `now`.
    pub fn recent_history(&self, now: OffsetDateTime) -> Vec<wta_types::LogEntry> {
        self.store.display_entries(now)
    }

    /// Build the published view of the session, history excluded.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            peer: self.peer.clone(),
            ready: self.is_ready(),
            scanning: self.scanning,
            exporting: self.is_exporting(),
            measurement: self.measurement,
            peers: self.peers.clone(),
            history: Default::default(),
        }
    }

    // --- Transition function ---

    /// Apply one input at time `now`.
    pub fn handle(&mut self, input: Input, now: Instant) -> Transition {
        let mut out = Transition::default();
        self.expire(now, &mut out);

        match input {
            Input::StartScan => {
                self.peers.clear();
                self.start_scan(&mut out);
            }
            Input::StopScan => self.stop_scan(&mut out),
            Input::Connect(peer) => self.connect(peer, now, false, &mut out),
            Input::Disconnect => self.user_disconnect(now, &mut out),
            Input::SetTemperature(value) => self.set_temperature(value, now, &mut out),
            Input::RequestHistory => self.request_history(now, &mut out),
            Input::Transport(event) => self.on_transport(event, now, &mut out),
            Input::ConnectSucceeded(peer) => self.on_connected(peer, now, &mut out),
            Input::ServicesDiscovered {
                peer,
                characteristics,
            } => self.on_services(peer, &characteristics, now, &mut out),
            Input::ActionFailed { action, error } => {
                self.on_action_failed(action, error, now, &mut out)
            }
            Input::Tick => {}
        }

        out
    }

    fn expire(&mut self, now: Instant, out: &mut Transition) {
        if self.connect_deadline.is_some_and(|deadline| now >= deadline) {
            self.connect_deadline = None;
            if self.state == ConnectionState::Connecting
                && let Some(peer) = self.peer.clone()
            {
                warn!(%peer, timeout = ?self.config.connect_timeout, "Connection attempt timed out");
                out.act(Action::CancelConnect(peer));
                out.fail(Error::timeout(self.config.connect_timeout));
                self.teardown(DisconnectReason::Timeout, true, now, out);
            }
        }

        if self.setup_deadline.is_some_and(|deadline| now >= deadline) {
            self.setup_deadline = None;
            if self.state == ConnectionState::Connected
                && self.link.is_none()
                && let Some(peer) = self.peer.clone()
            {
                warn!(%peer, timeout = ?self.config.setup_timeout, "Link setup timed out");
                out.act(Action::Disconnect(peer));
                out.fail(Error::timeout(self.config.setup_timeout));
                self.teardown(DisconnectReason::Timeout, true, now, out);
            }
        }

        if self
            .export
            .as_ref()
            .is_some_and(|export| now >= export.deadline)
        {
            warn!(timeout = ?self.config.export_timeout, "History export timed out");
            out.fail(Error::ExportTimeout {
                duration: self.config.export_timeout,
            });
            self.finish_export(ExportEnd::Timeout, out);
        }

        if self.activation_at.is_some_and(|at| now >= at) {
            self.activation_at = None;
            if let (Some(peer), Some(link)) = (self.peer.clone(), self.link) {
                debug!(%peer, "Sending activation pulse");
                out.act(write(peer, link.write, Command::Activate));
            }
        }

        if self.rescan_at.is_some_and(|at| now >= at) {
            self.rescan_at = None;
            if self.state == ConnectionState::Disconnected && self.adapter_ready {
                debug!("Restarting scan after link loss");
                self.start_scan(out);
            }
        }
    }

    // --- Scanning ---

    fn start_scan(&mut self, out: &mut Transition) {
        self.rescan_at = None;
        if !self.adapter_ready {
            out.fail(Error::TransportUnavailable);
            return;
        }
        if self.state != ConnectionState::Disconnected {
            debug!(state = %self.state, "Not scanning while a peer is targeted");
            return;
        }
        if self.scanning {
            return;
        }
        info!("Scanning for controllers");
        self.scanning = true;
        out.act(Action::StartScan);
        out.emit(SessionEvent::Scanning { active: true });
    }

    fn stop_scan(&mut self, out: &mut Transition) {
        self.rescan_at = None;
        if self.scanning {
            self.scanning = false;
            out.act(Action::StopScan);
            out.emit(SessionEvent::Scanning { active: false });
        }
    }

    // --- Connection lifecycle ---

    fn connect(&mut self, peer: PeerId, now: Instant, automatic: bool, out: &mut Transition) {
        if let Some(last) = self.last_attempt {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < self.config.connect_cooldown {
                let retry_in = self.config.connect_cooldown - elapsed;
                debug!(%peer, ?retry_in, "Connection attempt throttled");
                if !automatic {
                    out.fail(Error::ConnectionThrottled { retry_in });
                }
                return;
            }
        }
        if self.state != ConnectionState::Disconnected {
            warn!(%peer, state = %self.state, "Ignoring connect request");
            return;
        }
        if !self.adapter_ready {
            out.fail(Error::TransportUnavailable);
            return;
        }

        self.stop_scan(out);
        info!(%peer, "Connecting");
        self.state = ConnectionState::Connecting;
        self.peer = Some(peer.clone());
        self.last_attempt = Some(now);
        self.connect_deadline = Some(now + self.config.connect_timeout);
        out.act(Action::Connect(peer.clone()));
        out.emit(SessionEvent::Connecting { peer });
    }

    fn on_connected(&mut self, peer: PeerId, now: Instant, out: &mut Transition) {
        if self.state != ConnectionState::Connecting || self.peer.as_ref() != Some(&peer) {
            debug!(%peer, state = %self.state, "Dropping stale connect result");
            if self.peer.as_ref() != Some(&peer) {
                out.act(Action::Disconnect(peer));
            }
            return;
        }
        info!(%peer, "Connected");
        self.state = ConnectionState::Connected;
        self.connect_deadline = None;
        self.setup_deadline = Some(now + self.config.setup_timeout);
        out.act(Action::DiscoverServices(peer.clone()));
        out.emit(SessionEvent::Connected { peer });
    }

    fn on_services(
        &mut self,
        peer: PeerId,
        characteristics: &[CharacteristicInfo],
        now: Instant,
        out: &mut Transition,
    ) {
        if self.state != ConnectionState::Connected
            || self.peer.as_ref() != Some(&peer)
            || self.link.is_some()
        {
            debug!(%peer, "Dropping stale service discovery result");
            return;
        }

        let find = |uuid: Uuid| characteristics.iter().find(|c| c.uuid == uuid);
        let write_char = find(self.config.write_characteristic).filter(|c| c.is_writable());
        let notify_char = find(self.config.notify_characteristic).filter(|c| c.can_notify);

        let (write_char, notify_char) = match (write_char, notify_char) {
            (Some(w), Some(n)) => (w, n),
            (w, _) => {
                let missing = if w.is_none() {
                    self.config.write_characteristic
                } else {
                    self.config.notify_characteristic
                };
                warn!(%peer, %missing, available = characteristics.len(), "Required characteristic not found");
                out.fail(Error::characteristic_not_found(
                    missing.to_string(),
                    characteristics.len(),
                ));
                out.act(Action::Disconnect(peer));
                self.teardown(DisconnectReason::MissingCharacteristic, true, now, out);
                return;
            }
        };

        let link = Link {
            write: write_char.uuid,
            notify: notify_char.uuid,
        };
        info!(%peer, write = %link.write, notify = %link.notify, "Controller ready");
        self.link = Some(link);
        self.setup_deadline = None;
        out.act(Action::Subscribe {
            peer: peer.clone(),
            characteristic: link.notify,
        });
        self.activation_at = Some(now + self.config.activation_delay);
        out.emit(SessionEvent::Ready { peer });
    }

    fn user_disconnect(&mut self, now: Instant, out: &mut Transition) {
        match (self.state, self.peer.clone()) {
            (ConnectionState::Connecting, Some(peer)) => out.act(Action::CancelConnect(peer)),
            (ConnectionState::Connected, Some(peer)) => out.act(Action::Disconnect(peer)),
            _ => {
                self.rescan_at = None;
                return;
            }
        }
        self.teardown(DisconnectReason::UserRequested, false, now, out);
    }

    /// Return to `Disconnected`, releasing everything the link owned.
    fn teardown(
        &mut self,
        reason: DisconnectReason,
        rescan: bool,
        now: Instant,
        out: &mut Transition,
    ) {
        if self.export.is_some() {
            self.finish_export(ExportEnd::Aborted, out);
        }
        self.link = None;
        self.connect_deadline = None;
        self.setup_deadline = None;
        self.activation_at = None;
        self.measurement = None;
        let peer = self.peer.take();

        if self.state != ConnectionState::Disconnected {
            info!(peer = ?peer, ?reason, "Disconnected");
            self.state = ConnectionState::Disconnected;
            out.emit(SessionEvent::Disconnected { peer, reason });
        }

        self.rescan_at = rescan.then(|| now + self.config.rescan_delay);
    }

    /// Shut the session down: drop any link and disarm every timer.
    pub fn shutdown(&mut self, now: Instant) -> Transition {
        let mut out = Transition::default();
        match (self.state, self.peer.clone()) {
            (ConnectionState::Connecting, Some(peer)) => out.act(Action::CancelConnect(peer)),
            (ConnectionState::Connected, Some(peer)) => out.act(Action::Disconnect(peer)),
            _ => {}
        }
        self.teardown(DisconnectReason::Shutdown, false, now, &mut out);
        self.stop_scan(&mut out);
        out
    }

    // --- Commands ---

    fn set_temperature(&mut self, value: f32, now: Instant, out: &mut Transition) {
        if let Err(e) = validate_setpoint(value) {
            warn!(value, "Rejecting setpoint");
            out.fail(e);
            return;
        }
        let (Some(peer), Some(link)) = (self.peer.clone(), self.link) else {
            out.fail(Error::NotConnected);
            return;
        };
        info!(%peer, value, "Setting setpoint");
        out.act(write(peer, link.write, Command::SetSetpoint(value)));
        self.activation_at = Some(now + self.config.activation_delay);
    }

    fn request_history(&mut self, now: Instant, out: &mut Transition) {
        let (Some(peer), Some(link)) = (self.peer.clone(), self.link) else {
            out.fail(Error::NotConnected);
            return;
        };
        if self.export.is_some() {
            debug!("Restarting history export");
        }
        self.store.clear();
        self.export = Some(Export {
            deadline: now + self.config.export_timeout,
            frames: FrameBuffer::new(),
            summary: ExportSummary::default(),
        });
        info!(%peer, "Requesting history");
        out.emit(SessionEvent::ExportStarted);
        out.act(write(peer, link.write, Command::RequestHistory));
    }

    fn finish_export(&mut self, reason: ExportEnd, out: &mut Transition) {
        if let Some(export) = self.export.take() {
            if !export.frames.is_empty() {
                debug!(
                    pending = export.frames.pending().len(),
                    "Discarding partial history record"
                );
            }
            info!(?reason, accepted = export.summary.accepted, duplicates = export.summary.duplicates, malformed = export.summary.malformed, "History export finished");
            out.emit(SessionEvent::ExportFinished {
                reason,
                summary: export.summary,
            });
        }
    }

    // --- Transport events ---

    fn on_transport(&mut self, event: TransportEvent, now: Instant, out: &mut Transition) {
        match event {
            TransportEvent::AdapterState { powered } => self.on_adapter(powered, now, out),
            TransportEvent::Discovered { peer, name, rssi } => {
                self.on_discovered(peer, name, rssi, now, out)
            }
            TransportEvent::Disconnected { peer } => {
                if self.peer.as_ref() == Some(&peer) {
                    warn!(%peer, "Link lost");
                    self.teardown(DisconnectReason::LinkLost, true, now, out);
                } else {
                    debug!(%peer, "Ignoring disconnect of untracked peer");
                }
            }
            TransportEvent::Notification {
                peer,
                characteristic,
                data,
            } => {
                let expected = self.link.map(|link| link.notify);
                if self.peer.as_ref() != Some(&peer) || expected != Some(characteristic) {
                    debug!(%peer, %characteristic, "Ignoring notification");
                    return;
                }
                let text = String::from_utf8_lossy(&data);
                self.on_notification(&text, out);
            }
        }
    }

    fn on_adapter(&mut self, powered: bool, now: Instant, out: &mut Transition) {
        self.adapter_ready = powered;
        if powered {
            info!("Bluetooth adapter ready");
            if self.state == ConnectionState::Disconnected {
                self.start_scan(out);
            }
            return;
        }

        warn!("Bluetooth adapter unavailable");
        match (self.state, self.peer.clone()) {
            (ConnectionState::Connecting, Some(peer)) => out.act(Action::CancelConnect(peer)),
            (ConnectionState::Connected, Some(peer)) => out.act(Action::Disconnect(peer)),
            _ => {}
        }
        self.teardown(DisconnectReason::AdapterOff, false, now, out);
        if self.scanning {
            self.scanning = false;
            out.emit(SessionEvent::Scanning { active: false });
        }
        out.fail(Error::TransportUnavailable);
    }

    fn on_discovered(
        &mut self,
        peer: PeerId,
        name: Option<String>,
        rssi: Option<i16>,
        now: Instant,
        out: &mut Transition,
    ) {
        if !self.config.matches_name(name.as_deref()) {
            return;
        }

        match self.peers.iter_mut().find(|known| known.peer == peer) {
            Some(known) => {
                known.rssi = rssi.or(known.rssi);
                if name.is_some() {
                    known.name = name;
                }
            }
            None => {
                let discovered = DiscoveredPeer {
                    peer: peer.clone(),
                    name,
                    rssi,
                };
                debug!(%peer, name = ?discovered.name, ?rssi, "Discovered controller");
                self.peers.push(discovered.clone());
                out.emit(SessionEvent::Discovered { peer: discovered });
            }
        }

        if self.config.auto_connect && self.state == ConnectionState::Disconnected {
            self.connect(peer, now, true, out);
        }
    }

    fn on_notification(&mut self, text: &str, out: &mut Transition) {
        let Some(export) = self.export.as_mut() else {
            self.on_telemetry(text, out);
            return;
        };

        let offset = self.config.utc_offset;
        let mut records = export.frames.push(text).into_iter();
        while let Some(record) = records.next() {
            if record == Record::EndOfHistory {
                self.finish_export(ExportEnd::Sentinel, out);
                for record in records.by_ref() {
                    if let Record::Data(line) = record {
                        self.on_telemetry(&line, out);
                    }
                }
                return;
            }

            for result in decode_record(&record, offset) {
                let Some(export) = self.export.as_mut() else {
                    return;
                };
                match result {
                    Ok(entry) => match self.store.add_entry(entry) {
                        Ok(()) => export.summary.accepted += 1,
                        Err(_) => export.summary.duplicates += 1,
                    },
                    Err(e) => {
                        export.summary.malformed += 1;
                        out.fail(e);
                    }
                }
            }
        }
    }

    fn on_telemetry(&mut self, text: &str, out: &mut Transition) {
        for line in telemetry_lines(text) {
            match decode_telemetry(line) {
                Ok(Telemetry::Reading(snapshot)) => {
                    debug!(%snapshot, "Measurement");
                    self.measurement = Some(snapshot);
                    out.emit(SessionEvent::Measurement { snapshot });
                }
                Ok(Telemetry::Control(value)) => {
                    debug!(value, "Ignoring control message");
                }
                Err(e) => {
                    debug!(line, error = %e, "Dropping telemetry line");
                    out.fail(e);
                }
            }
        }
    }

    // --- Completions ---

    fn on_action_failed(&mut self, action: Action, error: Error, now: Instant, out: &mut Transition) {
        match action {
            Action::Connect(peer) => {
                if self.state == ConnectionState::Connecting && self.peer.as_ref() == Some(&peer) {
                    warn!(%peer, %error, "Connection failed");
                    out.fail(Error::connection_failed(peer, error.to_string()));
                    self.teardown(DisconnectReason::ConnectFailed, true, now, out);
                } else {
                    debug!(%peer, %error, "Dropping stale connect failure");
                }
            }
            Action::DiscoverServices(peer) | Action::Subscribe { peer, .. } => {
                if self.peer.as_ref() == Some(&peer) {
                    warn!(%peer, %error, "Link setup failed");
                    out.fail(error);
                    out.act(Action::Disconnect(peer));
                    self.teardown(DisconnectReason::LinkLost, true, now, out);
                }
            }
            Action::StartScan => {
                warn!(%error, "Scan failed to start");
                if self.scanning {
                    self.scanning = false;
                    out.emit(SessionEvent::Scanning { active: false });
                }
                out.fail(error);
            }
            Action::Write {
                characteristic,
                data,
                ..
            } => {
                warn!(%characteristic, %error, "Write failed");
                out.fail(match error {
                    Error::WriteFailed { .. } => error,
                    other => Error::write_failed(characteristic.to_string(), other.to_string()),
                });
                if data[..] == [REQUEST_HISTORY] && self.export.is_some() {
                    self.finish_export(ExportEnd::RequestFailed, out);
                }
            }
            Action::StopScan
            | Action::CancelConnect(_)
            | Action::Disconnect(_) => {
                debug!(?action, %error, "Cleanup action failed");
            }
        }
    }
}

fn write(peer: PeerId, characteristic: Uuid, command: Command) -> Action {
    // Only the setpoint can fail to encode, and it is validated beforehand.
    let data = command.encode().unwrap_or_default();
    Action::Write {
        peer,
        characteristic,
        data,
    }
}
