//! Async driver running a [`Session`] against a [`Transport`].
//!
//! [`spawn`] starts one task that owns the session. User intents, transport
//! events, I/O completions and deadline ticks are funnelled into that task
//! and applied one at a time, so the state machine and the history store are
//! never mutated concurrently. Actions produced by a transition are handed
//! to a separate I/O task which performs them in order. Link setup (connect
//! and service discovery) runs in its own task so that a timeout, a
//! disconnect or shutdown can abort it without waiting on the transport.
//!
//! State is published through a `watch` channel once a transition is
//! complete and only if the view changed, then the transition's events are
//! broadcast.

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use wta_types::{LogEntry, PeerId};

use crate::commands::validate_setpoint;
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::events::{EventDispatcher, EventReceiver, SessionSnapshot};
use crate::session::{Action, Input, Session, Transition};
use crate::store::display_projection;
use crate::transport::{Transport, TransportEvent};

/// Capacity of the intent channel.
const INTENT_CAPACITY: usize = 32;

/// Time the I/O task gets to drain teardown actions on shutdown.
const IO_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Start a session task on the current tokio runtime.
///
/// # Errors
///
/// Returns [`Error::InvalidConfig`] if the config does not validate or the
/// transport's event receiver was already taken.
pub fn spawn<T: Transport>(transport: Arc<T>, config: SessionConfig) -> Result<SessionHandle> {
    config.validate()?;
    let transport_events = transport
        .take_events()
        .ok_or_else(|| Error::invalid_config("transport events already taken"))?;

    let (intent_tx, intent_rx) = mpsc::channel(INTENT_CAPACITY);
    let (state_tx, state_rx) = watch::channel(SessionSnapshot::default());
    let events = EventDispatcher::new(config.event_capacity);
    let cancel = CancellationToken::new();
    let display_window = config.display_window;

    let (action_tx, action_rx) = mpsc::unbounded_channel();
    let (result_tx, result_rx) = mpsc::unbounded_channel();
    let io = tokio::spawn(run_io(transport, action_rx, result_tx));

    let driver = Driver {
        session: Session::new(config),
        state: state_tx,
        events: events.clone(),
        actions: action_tx,
        history: (0, Arc::default()),
    };
    let task = tokio::spawn(driver.run(
        intent_rx,
        transport_events,
        result_rx,
        cancel.clone(),
        io,
    ));

    Ok(SessionHandle {
        intents: intent_tx,
        state: state_rx,
        events,
        cancel,
        display_window,
        task: Arc::new(tokio::sync::Mutex::new(Some(task))),
    })
}

struct Driver {
    session: Session,
    state: watch::Sender<SessionSnapshot>,
    events: EventDispatcher,
    actions: mpsc::UnboundedSender<Action>,
    history: (u64, Arc<Vec<LogEntry>>),
}

impl Driver {
    async fn run(
        mut self,
        mut intents: mpsc::Receiver<Input>,
        mut transport_events: mpsc::Receiver<TransportEvent>,
        mut results: mpsc::UnboundedReceiver<Input>,
        cancel: CancellationToken,
        mut io: JoinHandle<()>,
    ) {
        info!("Session started");
        loop {
            let deadline = self.session.next_deadline();
            let input = tokio::select! {
                _ = cancel.cancelled() => break,
                intent = intents.recv() => match intent {
                    Some(intent) => intent,
                    // every handle dropped
                    None => break,
                },
                Some(event) = transport_events.recv() => Input::Transport(event),
                Some(result) = results.recv() => result,
                _ = sleep_until(deadline) => Input::Tick,
            };
            let transition = self.session.handle(input, now());
            self.apply(transition);
        }

        let transition = self.session.shutdown(now());
        self.apply(transition);
        drop(self.actions);
        match tokio::time::timeout(IO_DRAIN_TIMEOUT, &mut io).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "I/O task ended abnormally"),
            Err(_) => {
                warn!(timeout = ?IO_DRAIN_TIMEOUT, "Transport did not settle, abandoning pending I/O");
                io.abort();
            }
        }
        info!("Session stopped");
    }

    fn apply(&mut self, transition: Transition) {
        let revision = self.session.store().revision();

        for action in transition.actions {
            if self.actions.send(action).is_err() {
                debug!("I/O task gone, dropping action");
            }
        }

        if revision != self.history.0 {
            self.history = (revision, Arc::new(self.session.store().all_entries()));
        }
        let mut snapshot = self.session.snapshot();
        snapshot.history = Arc::clone(&self.history.1);
        self.state.send_if_modified(|current| {
            if same_view(current, &snapshot) {
                false
            } else {
                *current = snapshot;
                true
            }
        });

        for event in transition.events {
            self.events.send(event);
        }
    }
}

/// Field-wise comparison; history is compared by identity since a new
/// `Arc` is built whenever the store changes.
fn same_view(a: &SessionSnapshot, b: &SessionSnapshot) -> bool {
    Arc::ptr_eq(&a.history, &b.history)
        && a.state == b.state
        && a.peer == b.peer
        && a.ready == b.ready
        && a.scanning == b.scanning
        && a.exporting == b.exporting
        && a.measurement == b.measurement
        && a.peers == b.peers
}

fn now() -> std::time::Instant {
    Instant::now().into_std()
}

async fn sleep_until(deadline: Option<std::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}

async fn run_io<T: Transport>(
    transport: Arc<T>,
    mut actions: mpsc::UnboundedReceiver<Action>,
    results: mpsc::UnboundedSender<Input>,
) {
    let mut setup = LinkSetup::default();

    while let Some(action) = actions.recv().await {
        debug!(?action, "Executing");
        let outcome = match &action {
            Action::StartScan => transport.start_scan().await,
            Action::StopScan => transport.stop_scan().await,
            Action::Connect(peer) => {
                let transport = Arc::clone(&transport);
                let task_peer = peer.clone();
                setup.spawn(peer, &results, async move {
                    match transport.connect(&task_peer).await {
                        Ok(()) => Input::ConnectSucceeded(task_peer),
                        Err(error) => Input::ActionFailed {
                            action: Action::Connect(task_peer),
                            error,
                        },
                    }
                });
                Ok(())
            }
            Action::DiscoverServices(peer) => {
                let transport = Arc::clone(&transport);
                let task_peer = peer.clone();
                setup.spawn(peer, &results, async move {
                    match transport.discover_services(&task_peer).await {
                        Ok(characteristics) => Input::ServicesDiscovered {
                            peer: task_peer,
                            characteristics,
                        },
                        Err(error) => Input::ActionFailed {
                            action: Action::DiscoverServices(task_peer),
                            error,
                        },
                    }
                });
                Ok(())
            }
            Action::CancelConnect(peer) | Action::Disconnect(peer) => {
                setup.abort(peer);
                transport.disconnect(peer).await
            }
            Action::Subscribe {
                peer,
                characteristic,
            } => transport.subscribe(peer, *characteristic).await,
            Action::Write {
                peer,
                characteristic,
                data,
            } => transport.write(peer, *characteristic, data).await,
        };

        if let Err(error) = outcome {
            let _ = results.send(Input::ActionFailed { action, error });
        }
    }
}

/// The in-flight link setup step (connect or service discovery), if any.
///
/// Dropping it aborts the step, so nothing outlives the I/O task.
#[derive(Default)]
struct LinkSetup {
    pending: Option<(PeerId, JoinHandle<()>)>,
}

impl LinkSetup {
    fn spawn(
        &mut self,
        peer: &PeerId,
        results: &mpsc::UnboundedSender<Input>,
        step: impl Future<Output = Input> + Send + 'static,
    ) {
        let results = results.clone();
        let handle = tokio::spawn(async move {
            let _ = results.send(step.await);
        });
        if let Some((_, previous)) = self.pending.replace((peer.clone(), handle)) {
            previous.abort();
        }
    }

    fn abort(&mut self, peer: &PeerId) {
        if self.pending.as_ref().is_some_and(|(pending, _)| pending == peer)
            && let Some((_, handle)) = self.pending.take()
        {
            debug!(%peer, "Aborting link setup");
            handle.abort();
        }
    }

}

impl Drop for LinkSetup {
    fn drop(&mut self) {
        if let Some((_, handle)) = self.pending.take() {
            handle.abort();
        }
    }
}

/// Handle to a running session.
///
/// Cheap to clone; every clone talks to the same session task.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    intents: mpsc::Sender<Input>,
    state: watch::Receiver<SessionSnapshot>,
    events: EventDispatcher,
    cancel: CancellationToken,
    display_window: Duration,
    task: Arc<tokio::sync::Mutex<Option<JoinHandle<()>>>>,
}

impl SessionHandle {
    async fn send(&self, input: Input) -> Result<()> {
        self.intents
            .send(input)
            .await
            .map_err(|_| Error::SessionClosed)
    }

    /// Start scanning for controllers.
    pub async fn start_scan(&self) -> Result<()> {
        self.send(Input::StartScan).await
    }

    /// Stop scanning.
    pub async fn stop_scan(&self) -> Result<()> {
        self.send(Input::StopScan).await
    }

    /// Connect to a controller.
    ///
    /// Throttling and failures are reported as events, not as errors here.
    pub async fn connect(&self, peer: impl Into<PeerId>) -> Result<()> {
        self.send(Input::Connect(peer.into())).await
    }

    /// Drop the link or cancel the pending attempt.
    pub async fn disconnect(&self) -> Result<()> {
        self.send(Input::Disconnect).await
    }

    /// Change the setpoint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSetpoint`] right away if the value is outside
    /// 30-40 °C; nothing is written in that case.
    pub async fn set_temperature(&self, celsius: f32) -> Result<()> {
        validate_setpoint(celsius)?;
        self.send(Input::SetTemperature(celsius)).await
    }

    /// Clear the history and download it again from the controller.
    pub async fn request_history(&self) -> Result<()> {
        self.send(Input::RequestHistory).await
    }

    /// The latest published state.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.borrow().clone()
    }

    /// A receiver notified after every published transition.
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.state.clone()
    }

    /// Wait until the published state satisfies `predicate`.
    pub async fn wait_until(
        &self,
        mut predicate: impl FnMut(&SessionSnapshot) -> bool,
    ) -> Result<SessionSnapshot> {
        let mut state = self.state.clone();
        let snapshot = state
            .wait_for(|snapshot| predicate(snapshot))
            .await
            .map_err(|_| Error::SessionClosed)?;
        Ok(snapshot.clone())
    }

    /// Full history, ascending by timestamp.
    pub fn history(&self) -> Arc<Vec<LogEntry>> {
        Arc::clone(&self.state.borrow().history)
    }

    /// History within the display window before `now`, newest first.
    pub fn recent_history(&self, now: OffsetDateTime) -> Vec<LogEntry> {
        let window = time::Duration::try_from(self.display_window).unwrap_or(time::Duration::MAX);
        display_projection(self.history().iter(), now, window)
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    /// Whether the session task has stopped.
    pub fn is_closed(&self) -> bool {
        self.intents.is_closed()
    }

    /// Stop the session: drop the link, disarm every timer and wait for the
    /// task to finish.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(task) = self.task.lock().await.take()
            && let Err(e) = task.await
        {
            warn!(error = %e, "Session task ended abnormally");
        }
    }
}
