//! End-to-end session tests against the mock transport.
//!
//! Time is paused, so connect, activation and export timers elapse as soon
//! as the runtime is otherwise idle.

use std::sync::Arc;
use std::time::Duration;

use time::macros::datetime;
use tokio::time::timeout;
use wta_core::{
    ACTIVATE, ConnectionState, DisconnectReason, Error, EventReceiver, ExportEnd, ExportSummary,
    MockCall, MockTransport, PeerId, REQUEST_HISTORY, SessionConfig, SessionEvent, SessionHandle,
    driver,
};

const WAIT: Duration = Duration::from_secs(120);

fn start(config: SessionConfig) -> (Arc<MockTransport>, SessionHandle, EventReceiver) {
    let transport = Arc::new(MockTransport::new());
    let session = driver::spawn(Arc::clone(&transport), config).unwrap();
    let events = session.subscribe();
    (transport, session, events)
}

async fn next_event(
    events: &mut EventReceiver,
    mut predicate: impl FnMut(&SessionEvent) -> bool,
) -> SessionEvent {
    timeout(WAIT, async {
        loop {
            let event = events.recv().await.expect("event stream closed");
            if predicate(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition never held");
}

async fn scan_and_discover(transport: &MockTransport, session: &SessionHandle) -> PeerId {
    session.start_scan().await.unwrap();
    session.wait_until(|s| s.scanning).await.unwrap();

    let peer = MockTransport::random_peer();
    transport.discover(&peer, "WTA-Chamber", -55).await;
    session
        .wait_until(|s| s.peers.iter().any(|p| p.peer == peer))
        .await
        .unwrap();
    peer
}

async fn connect_ready(transport: &MockTransport, session: &SessionHandle) -> PeerId {
    let peer = scan_and_discover(transport, session).await;
    session.connect(peer.clone()).await.unwrap();
    timeout(WAIT, session.wait_until(|s| s.ready)).await.unwrap().unwrap();
    peer
}

#[tokio::test(start_paused = true)]
async fn test_scan_lists_matching_peers_only() {
    let (transport, session, _events) = start(SessionConfig::default());
    let peer = scan_and_discover(&transport, &session).await;

    transport
        .discover(&MockTransport::random_peer(), "Thermo-1", -40)
        .await;
    transport.discover(&peer, "WTA-Chamber", -48).await;

    // a signal update alone is still published
    let snapshot = timeout(
        WAIT,
        session.wait_until(|s| s.peers.iter().any(|p| p.rssi == Some(-48))),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(snapshot.peers.len(), 1);
    assert_eq!(snapshot.peers[0].name.as_deref(), Some("WTA-Chamber"));
    assert_eq!(transport.count(&MockCall::StartScan), 1);

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_connect_subscribes_and_activates() {
    let (transport, session, mut events) = start(SessionConfig::default());
    let peer = connect_ready(&transport, &session).await;

    next_event(&mut events, |e| matches!(e, SessionEvent::Ready { .. })).await;
    eventually(|| transport.writes().contains(&vec![ACTIVATE])).await;

    let calls = transport.calls();
    let position = |call: &MockCall| calls.iter().position(|c| c == call).unwrap();
    assert!(position(&MockCall::StopScan) < position(&MockCall::Connect(peer.clone())));
    assert!(
        position(&MockCall::Connect(peer.clone()))
            < position(&MockCall::DiscoverServices(peer.clone()))
    );
    assert_eq!(session.snapshot().state, ConnectionState::Connected);
    assert!(!session.snapshot().scanning);

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_telemetry_updates_snapshot() {
    let (transport, session, mut events) = start(SessionConfig::default());
    let peer = connect_ready(&transport, &session).await;

    transport.notify(&peer, "3250,2510,3300,80\r\n").await;
    let event = next_event(&mut events, |e| matches!(e, SessionEvent::Measurement { .. })).await;
    let SessionEvent::Measurement { snapshot } = event else {
        unreachable!();
    };
    assert!((snapshot.chamber_temperature - 32.5).abs() < 0.001);
    assert_eq!(snapshot.battery, 80);

    // out of range: the previous reading stays
    transport.notify(&peer, "6000,2510,3300,80").await;
    next_event(&mut events, |e| matches!(e, SessionEvent::Error { .. })).await;
    let measurement = session.snapshot().measurement.unwrap();
    assert!((measurement.chamber_temperature - 32.5).abs() < 0.001);

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_set_temperature_writes_setpoint_then_activation() {
    let (transport, session, _events) = start(SessionConfig::default());
    connect_ready(&transport, &session).await;
    eventually(|| transport.writes().contains(&vec![ACTIVATE])).await;
    transport.clear_calls();

    session.set_temperature(35.0).await.unwrap();
    eventually(|| transport.writes().len() == 2).await;
    assert_eq!(transport.writes(), vec![b"s350".to_vec(), vec![ACTIVATE]]);

    assert!(matches!(
        session.set_temperature(45.0).await,
        Err(Error::InvalidSetpoint { .. })
    ));

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_history_export_fills_store() {
    let (transport, session, mut events) = start(SessionConfig::default());
    let peer = connect_ready(&transport, &session).await;

    session.request_history().await.unwrap();
    next_event(&mut events, |e| matches!(e, SessionEvent::ExportStarted)).await;
    eventually(|| transport.writes().contains(&vec![REQUEST_HISTORY])).await;

    transport
        .notify(&peer, "3250,2510,80,3300,15,06,24,14,30,00,1\r3260,")
        .await;
    transport
        .notify(&peer, "2520,79,3300,15,06,24,14,40,00,1\r\n3270,2530,78,3300,")
        .await;
    transport
        .notify(&peer, "15,06,24,14,40,00,1\r\nf\r\n")
        .await;

    let event = next_event(&mut events, |e| matches!(e, SessionEvent::ExportFinished { .. })).await;
    assert!(matches!(
        event,
        SessionEvent::ExportFinished {
            reason: ExportEnd::Sentinel,
            summary: ExportSummary {
                accepted: 2,
                duplicates: 1,
                malformed: 0
            },
        }
    ));

    let history = session.history();
    assert_eq!(history.len(), 2);
    assert!(history[0].timestamp < history[1].timestamp);

    let recent = session.recent_history(datetime!(2024-06-16 12:00 UTC));
    assert_eq!(recent.len(), 2);
    assert!(recent[0].timestamp > recent[1].timestamp);
    assert!(session.recent_history(datetime!(2024-06-20 12:00 UTC)).is_empty());

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_history_export_times_out() {
    let config = SessionConfig::default().export_timeout(Duration::from_secs(5));
    let (transport, session, mut events) = start(config);
    let peer = connect_ready(&transport, &session).await;

    session.request_history().await.unwrap();
    transport
        .notify(&peer, "3250,2510,80,3300,15,06,24,14,30,00,1\r\n")
        .await;

    let event = next_event(&mut events, |e| matches!(e, SessionEvent::ExportFinished { .. })).await;
    assert!(matches!(
        event,
        SessionEvent::ExportFinished {
            reason: ExportEnd::Timeout,
            summary: ExportSummary { accepted: 1, .. },
        }
    ));
    assert!(!session.snapshot().exporting);
    assert_eq!(session.history().len(), 1);

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_connect_timeout_restarts_scan() {
    let (transport, session, mut events) = start(SessionConfig::default());
    transport.set_connect_latency(Duration::from_secs(60));
    let peer = scan_and_discover(&transport, &session).await;

    session.connect(peer.clone()).await.unwrap();
    let event = next_event(&mut events, |e| matches!(e, SessionEvent::Disconnected { .. })).await;
    assert!(matches!(
        event,
        SessionEvent::Disconnected {
            reason: DisconnectReason::Timeout,
            ..
        }
    ));

    session.wait_until(|s| s.scanning).await.unwrap();
    assert_eq!(transport.count(&MockCall::StartScan), 2);
    assert!(!transport.is_connected(&peer));

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_repeated_connect_is_throttled() {
    let (transport, session, mut events) = start(SessionConfig::default());
    transport.set_connect_failure(Some("refused"));
    let peer = scan_and_discover(&transport, &session).await;

    session.connect(peer.clone()).await.unwrap();
    next_event(&mut events, |e| {
        matches!(
            e,
            SessionEvent::Disconnected {
                reason: DisconnectReason::ConnectFailed,
                ..
            }
        )
    })
    .await;

    session.connect(peer.clone()).await.unwrap();
    next_event(&mut events, |e| {
        matches!(
            e,
            SessionEvent::Error {
                error: Error::ConnectionThrottled { .. }
            }
        )
    })
    .await;
    assert_eq!(transport.count(&MockCall::Connect(peer)), 1);

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_link_loss_clears_state_and_rescans() {
    let (transport, session, mut events) = start(SessionConfig::default());
    let peer = connect_ready(&transport, &session).await;
    transport.notify(&peer, "3250,2510,3300,80").await;
    session.wait_until(|s| s.measurement.is_some()).await.unwrap();

    transport.drop_link(&peer).await;
    next_event(&mut events, |e| {
        matches!(
            e,
            SessionEvent::Disconnected {
                reason: DisconnectReason::LinkLost,
                ..
            }
        )
    })
    .await;

    let snapshot = session.wait_until(|s| s.scanning).await.unwrap();
    assert_eq!(snapshot.state, ConnectionState::Disconnected);
    assert!(snapshot.peer.is_none());
    assert!(snapshot.measurement.is_none());
    assert!(!snapshot.ready);

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_auto_connect_on_discovery() {
    let (transport, session, _events) = start(SessionConfig::default().auto_connect(true));
    let peer = scan_and_discover(&transport, &session).await;

    let snapshot = timeout(WAIT, session.wait_until(|s| s.ready))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.peer, Some(peer));

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_user_disconnect_does_not_rescan() {
    let (transport, session, _events) = start(SessionConfig::default());
    let peer = connect_ready(&transport, &session).await;

    session.disconnect().await.unwrap();
    session
        .wait_until(|s| s.state == ConnectionState::Disconnected)
        .await
        .unwrap();
    eventually(|| !transport.is_connected(&peer)).await;

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(!session.snapshot().scanning);
    assert_eq!(transport.count(&MockCall::StartScan), 1);

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_disconnects() {
    let (transport, session, _events) = start(SessionConfig::default());
    let peer = connect_ready(&transport, &session).await;

    session.shutdown().await;
    assert!(session.is_closed());
    assert!(!transport.is_connected(&peer));
    assert_eq!(transport.count(&MockCall::Disconnect(peer)), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_discovery_times_out_and_rescans() {
    let (transport, session, mut events) = start(SessionConfig::default());
    transport.set_stall_discovery(true);
    let peer = scan_and_discover(&transport, &session).await;

    session.connect(peer.clone()).await.unwrap();
    let event = next_event(&mut events, |e| matches!(e, SessionEvent::Disconnected { .. })).await;
    assert!(matches!(
        event,
        SessionEvent::Disconnected {
            reason: DisconnectReason::Timeout,
            ..
        }
    ));
    assert_eq!(transport.count(&MockCall::Disconnect(peer.clone())), 1);

    let snapshot = session.wait_until(|s| s.scanning).await.unwrap();
    assert!(!snapshot.ready);
    assert!(!transport.is_connected(&peer));

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_not_blocked_by_stalled_discovery() {
    let config = SessionConfig::default().setup_timeout(Duration::from_secs(3600));
    let (transport, session, _events) = start(config);
    transport.set_stall_discovery(true);
    let peer = scan_and_discover(&transport, &session).await;

    session.connect(peer.clone()).await.unwrap();
    session
        .wait_until(|s| s.state == ConnectionState::Connected)
        .await
        .unwrap();
    eventually(|| transport.count(&MockCall::DiscoverServices(peer.clone())) == 1).await;

    session.disconnect().await.unwrap();
    timeout(
        Duration::from_secs(1),
        eventually(|| transport.count(&MockCall::Disconnect(peer.clone())) == 1),
    )
    .await
    .expect("disconnect waited behind service discovery");
    assert!(!transport.is_connected(&peer));

    session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_not_blocked_by_stalled_discovery() {
    let config = SessionConfig::default().setup_timeout(Duration::from_secs(3600));
    let (transport, session, _events) = start(config);
    transport.set_stall_discovery(true);
    let peer = scan_and_discover(&transport, &session).await;

    session.connect(peer.clone()).await.unwrap();
    session
        .wait_until(|s| s.state == ConnectionState::Connected)
        .await
        .unwrap();

    timeout(Duration::from_secs(10), session.shutdown())
        .await
        .expect("shutdown waited behind service discovery");
    assert!(session.is_closed());
    assert_eq!(transport.count(&MockCall::Disconnect(peer)), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_history_request_ends_export() {
    let (transport, session, mut events) = start(SessionConfig::default());
    connect_ready(&transport, &session).await;
    eventually(|| transport.writes().contains(&vec![ACTIVATE])).await;
    transport.set_fail_writes(true);

    session.request_history().await.unwrap();
    let event = next_event(&mut events, |e| matches!(e, SessionEvent::ExportFinished { .. })).await;
    assert!(matches!(
        event,
        SessionEvent::ExportFinished {
            reason: ExportEnd::RequestFailed,
            ..
        }
    ));
    assert!(!session.snapshot().exporting);
    assert_eq!(session.snapshot().state, ConnectionState::Connected);

    session.shutdown().await;
}
