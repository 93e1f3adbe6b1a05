//! Unit tests for the connection state machine.

use std::sync::Mutex;

use rstest::rstest;
use tokio::time::Instant;

use super::*;
use crate::transport::MemoryTransport;

type EventLog = Arc<Mutex<Vec<String>>>;

fn recording_hooks(log: &EventLog) -> LifecycleHooks {
    let mut hooks = LifecycleHooks::default();
    for (name, list) in [
        ("connected", &mut hooks.connected),
        ("disconnected", &mut hooks.disconnected),
        ("reconnecting", &mut hooks.reconnecting),
    ] {
        let log = Arc::clone(log);
        list.push(Arc::new(move || log.lock().expect("lock").push(name.to_owned())));
    }
    let failures = Arc::clone(log);
    hooks.connect_failed.push(Arc::new(move |_: &TransportError| {
        failures.lock().expect("lock").push("connect_failed".to_owned());
    }));
    hooks
}

fn lifecycle(transport: &MemoryTransport, log: &EventLog, delay_ms: u64) -> Arc<Lifecycle> {
    Arc::new(Lifecycle::new(
        Arc::new(transport.clone()),
        recording_hooks(log),
        ReconnectConfig::from_millis(delay_ms).expect("positive delay"),
    ))
}

fn events(log: &EventLog) -> Vec<String> { log.lock().expect("lock").clone() }

async fn wait_for(lifecycle: &Lifecycle, wanted: ConnectionState) {
    let mut rx = lifecycle.watch();
    rx.wait_for(|state| *state == wanted)
        .await
        .expect("lifecycle alive");
}

#[test]
fn reconnect_delay_defaults_to_two_seconds() {
    assert_eq!(ReconnectConfig::default().delay(), Duration::from_secs(2));
}

#[rstest]
#[case(0, false)]
#[case(1, true)]
#[case(2_000, true)]
fn reconnect_delay_must_be_positive(#[case] millis: u64, #[case] valid: bool) {
    assert_eq!(ReconnectConfig::from_millis(millis).is_ok(), valid);
}

#[tokio::test]
async fn connect_moves_to_connected_and_fires_hook() {
    let transport = MemoryTransport::new();
    let log = EventLog::default();
    let lifecycle = lifecycle(&transport, &log, 100);
    assert_eq!(lifecycle.state(), ConnectionState::Disconnected);

    lifecycle.connect().await.expect("connect");
    assert_eq!(lifecycle.state(), ConnectionState::Connected);
    assert_eq!(events(&log), vec!["connected"]);

    lifecycle.connect().await.expect("already connected is a no-op");
    assert_eq!(transport.connect_attempts(), 1);
}

#[tokio::test]
async fn failed_connect_returns_to_disconnected() {
    let transport = MemoryTransport::new();
    transport.fail_next_connects(1);
    let log = EventLog::default();
    let lifecycle = lifecycle(&transport, &log, 100);

    let err = lifecycle.connect().await.expect_err("scripted failure");
    assert!(matches!(err, BusError::Transport(TransportError::Io(_))));
    assert_eq!(lifecycle.state(), ConnectionState::Disconnected);
    assert_eq!(events(&log), vec!["connect_failed"]);

    lifecycle.connect().await.expect("second attempt succeeds");
    assert_eq!(lifecycle.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn disconnect_while_connected_reconnects_after_delay() {
    let transport = MemoryTransport::new();
    let log = EventLog::default();
    let lifecycle = lifecycle(&transport, &log, 500);
    lifecycle.connect().await.expect("connect");

    let dropped_at = Instant::now();
    lifecycle.on_transport_disconnected();
    assert_eq!(lifecycle.state(), ConnectionState::Reconnecting);

    wait_for(&lifecycle, ConnectionState::Connected).await;
    assert!(dropped_at.elapsed() >= Duration::from_millis(500));
    assert_eq!(transport.connect_attempts(), 2);
    assert_eq!(
        events(&log),
        vec!["connected", "disconnected", "reconnecting", "connected"]
    );
}

#[tokio::test(start_paused = true)]
async fn reconnect_failures_are_retried() {
    let transport = MemoryTransport::new();
    let log = EventLog::default();
    let lifecycle = lifecycle(&transport, &log, 100);
    lifecycle.connect().await.expect("connect");
    transport.fail_next_connects(2);

    lifecycle.on_transport_disconnected();
    wait_for(&lifecycle, ConnectionState::Connected).await;

    assert_eq!(transport.connect_attempts(), 4);
    assert_eq!(
        events(&log),
        vec![
            "connected",
            "disconnected",
            "reconnecting",
            "connect_failed",
            "reconnecting",
            "connect_failed",
            "reconnecting",
            "connected",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn stop_is_terminal() {
    let transport = MemoryTransport::new();
    let log = EventLog::default();
    let lifecycle = lifecycle(&transport, &log, 100);
    lifecycle.connect().await.expect("connect");

    lifecycle
        .stop(&CancellationToken::new())
        .await
        .expect("stop");
    assert_eq!(lifecycle.state(), ConnectionState::Disconnected);

    lifecycle.on_transport_disconnected();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(transport.connect_attempts(), 1);
    assert!(matches!(lifecycle.connect().await, Err(BusError::Stopped)));
    assert_eq!(events(&log), vec!["connected", "disconnected"]);
}

#[tokio::test(start_paused = true)]
async fn stop_interrupts_backoff() {
    let transport = MemoryTransport::new();
    let log = EventLog::default();
    let lifecycle = lifecycle(&transport, &log, 60_000);
    lifecycle.connect().await.expect("connect");
    lifecycle.on_transport_disconnected();

    lifecycle
        .stop(&CancellationToken::new())
        .await
        .expect("stop returns without waiting out the delay");
    assert_eq!(transport.connect_attempts(), 1);
    assert_eq!(lifecycle.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn transport_reported_connection_is_adopted() {
    let transport = MemoryTransport::new();
    let log = EventLog::default();
    let lifecycle = lifecycle(&transport, &log, 100);

    lifecycle.on_transport_connected();
    assert_eq!(lifecycle.state(), ConnectionState::Connected);
    lifecycle.on_transport_connected();
    assert_eq!(events(&log), vec!["connected"]);
}

#[tokio::test]
async fn transport_connection_after_stop_is_ignored() {
    let transport = MemoryTransport::new();
    let log = EventLog::default();
    let lifecycle = lifecycle(&transport, &log, 100);
    lifecycle.connect().await.expect("connect");
    lifecycle
        .stop(&CancellationToken::new())
        .await
        .expect("stop");

    lifecycle.on_transport_connected();
    assert_eq!(lifecycle.state(), ConnectionState::Disconnected);
    assert_eq!(events(&log), vec!["connected", "disconnected"]);
}

#[tokio::test(start_paused = true)]
async fn reconnect_completing_after_stop_stays_disconnected() {
    let transport = MemoryTransport::new();
    let log = EventLog::default();
    let lifecycle = lifecycle(&transport, &log, 100);
    lifecycle.connect().await.expect("connect");
    lifecycle.on_transport_disconnected();
    assert_eq!(lifecycle.state(), ConnectionState::Reconnecting);

    lifecycle
        .stop(&CancellationToken::new())
        .await
        .expect("stop");
    assert!(!lifecycle.transition(ConnectionState::Disconnected, ConnectionState::Connecting));
    assert!(!lifecycle.mark_connected());
    assert_eq!(lifecycle.state(), ConnectionState::Disconnected);
    assert!(!events(&log).ends_with(&["connected".to_owned()]));
}
