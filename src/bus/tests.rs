//! Unit tests for the message bus over an in-memory transport.

use std::{
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use rstest::rstest;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::*;
use crate::{
    frame::status,
    interceptor::InterceptorError,
    lifecycle::ReconnectConfig,
    test_support::{ack_bytes, decode_sent, message_bytes},
    transport::MemoryTransport,
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct Ping {
    seq: u32,
}

impl Message for Ping {
    const TYPE_TAG: &'static str = "Ping";
}

impl Request for Ping {
    type Response = u32;
}

async fn connected_bus(transport: &MemoryTransport) -> MessageBus<MemoryTransport> {
    MessageBusBuilder::new()
        .connect(transport.clone())
        .await
        .expect("connect")
}

async fn wait_until_settled<T: Transport, C: Codec>(bus: &MessageBus<T, C>, pending: usize) {
    while bus.pending_requests() != pending {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn request_resolves_with_matching_acknowledgement() {
    let transport = MemoryTransport::new();
    let bus = connected_bus(&transport).await;

    let caller = bus.clone();
    let request =
        tokio::spawn(async move { caller.request(&Ping { seq: 1 }, &CancellationToken::new()).await });

    let sent = transport.wait_for_sent(1).await;
    let frame = decode_sent(&sent[0]);
    assert_eq!(frame.type_tag(), "Ping");
    assert_eq!(bus.pending_requests(), 1);

    transport.inject(ack_bytes(&Acknowledgement::ok(frame.id())));
    let ack = request.await.expect("join").expect("ack");
    assert_eq!(ack.correlation_id, frame.id());
    assert_eq!(ack.status_code, status::OK);
    assert_eq!(bus.pending_requests(), 0);

    // A repeated acknowledgement has nothing left to resolve.
    transport.inject(ack_bytes(&Acknowledgement::failed(frame.id(), "late")));
    tokio::task::yield_now().await;
    assert_eq!(bus.pending_requests(), 0);
}

#[tokio::test]
async fn cancelled_request_releases_its_entry() {
    let transport = MemoryTransport::new();
    let bus = connected_bus(&transport).await;
    let cancel = CancellationToken::new();

    let caller = bus.clone();
    let token = cancel.clone();
    let request = tokio::spawn(async move { caller.request(&Ping { seq: 2 }, &token).await });
    let sent = transport.wait_for_sent(1).await;
    wait_until_settled(&bus, 1).await;

    cancel.cancel();
    let err = request.await.expect("join").expect_err("cancelled");
    assert!(matches!(err, BusError::Cancelled));
    assert_eq!(bus.pending_requests(), 0);

    transport.inject(ack_bytes(&Acknowledgement::ok(decode_sent(&sent[0]).id())));
    tokio::task::yield_now().await;
    assert_eq!(bus.pending_requests(), 0);
    assert_eq!(transport.sent().len(), 1, "cancellation sends nothing");
}

#[tokio::test]
async fn repeated_identifier_is_rejected() {
    let transport = MemoryTransport::new();
    let bus = MessageBusBuilder::new()
        .id_source(|| FrameId::from_u128(77))
        .connect(transport.clone())
        .await
        .expect("connect");

    let caller = bus.clone();
    let first =
        tokio::spawn(async move { caller.request(&Ping { seq: 1 }, &CancellationToken::new()).await });
    wait_until_settled(&bus, 1).await;

    let err = bus
        .request(&Ping { seq: 2 }, &CancellationToken::new())
        .await
        .expect_err("duplicate id");
    assert!(matches!(err, BusError::DuplicateCorrelationId(id) if id == FrameId::from_u128(77)));
    assert_eq!(transport.sent().len(), 1, "duplicate is never transmitted");

    transport.inject(ack_bytes(&Acknowledgement::ok(FrameId::from_u128(77))));
    let ack = first.await.expect("join").expect("first request unaffected");
    assert_eq!(ack.status_code, status::OK);
}

#[tokio::test]
async fn sending_hook_sees_frame_before_transport() {
    let transport = MemoryTransport::new();
    let observed = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&observed);
    let probe = transport.clone();
    let bus = MessageBusBuilder::new()
        .on_sending(move |envelope| {
            seen.lock().expect("lock").push((
                envelope.id(),
                envelope.type_tag().to_owned(),
                envelope.payload().to_vec(),
                probe.sent().len(),
            ));
            Ok(())
        })
        .connect(transport.clone())
        .await
        .expect("connect");

    let id = bus
        .send(&Ping { seq: 3 }, &CancellationToken::new())
        .await
        .expect("send");

    let frame = decode_sent(&transport.sent()[0]);
    let observed = observed.lock().expect("lock");
    assert_eq!(observed.len(), 1);
    let (seen_id, seen_tag, seen_payload, sent_before) = &observed[0];
    assert_eq!(*seen_id, id);
    assert_eq!(*seen_id, frame.id());
    assert_eq!(seen_tag, frame.type_tag());
    assert_eq!(seen_payload.as_slice(), frame.payload());
    assert_eq!(*sent_before, 0);
}

#[tokio::test]
async fn failing_sending_hook_aborts_request() {
    let transport = MemoryTransport::new();
    let bus = MessageBusBuilder::new()
        .on_sending(|_| Err(InterceptorError::new("blocked")))
        .connect(transport.clone())
        .await
        .expect("connect");

    let err = bus
        .request(&Ping { seq: 4 }, &CancellationToken::new())
        .await
        .expect_err("hook rejects");
    assert!(matches!(err, BusError::Interceptor(ref e) if e.message() == "blocked"));
    assert!(transport.sent().is_empty());
    assert_eq!(bus.pending_requests(), 0);
}

#[tokio::test]
async fn send_before_connect_fails_without_leaking() {
    let transport = MemoryTransport::new();
    let bus = MessageBusBuilder::new()
        .build(transport.clone())
        .expect("build");
    let err = bus
        .request(&Ping { seq: 5 }, &CancellationToken::new())
        .await
        .expect_err("not connected");
    assert!(matches!(
        err,
        BusError::Transport(crate::transport::TransportError::NotConnected)
    ));
    assert_eq!(bus.pending_requests(), 0);
}

#[tokio::test]
async fn inbound_messages_reach_subscribers_after_receive_hooks() {
    let transport = MemoryTransport::new();
    let received_hooks = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&received_hooks);
    let bus = MessageBusBuilder::new()
        .on_received(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .connect(transport.clone())
        .await
        .expect("connect");

    let (tx, mut rx) = mpsc::unbounded_channel();
    bus.subscribe(move |ping: Ping| {
        let tx = tx.clone();
        async move { tx.send(ping.seq).map_err(|e| HandlerError::new(e.to_string())) }
    });

    transport.inject(Bytes::from_static(&[0xde, 0xad]));
    transport.inject(message_bytes(&Ping { seq: 11 }));
    assert_eq!(rx.recv().await, Some(11));

    transport.inject(ack_bytes(&Acknowledgement::ok(FrameId::from_u128(1))));
    transport.inject(message_bytes(&Ping { seq: 12 }));
    assert_eq!(rx.recv().await, Some(12));
    assert_eq!(
        received_hooks.load(Ordering::SeqCst),
        2,
        "acknowledgements bypass receive hooks"
    );
}

#[tokio::test]
async fn rejected_frames_are_not_dispatched() {
    let transport = MemoryTransport::new();
    let bus = MessageBusBuilder::new()
        .on_received(|envelope| {
            if envelope.payload().is_empty() {
                Ok(())
            } else {
                Err("filtered".into())
            }
        })
        .connect(transport.clone())
        .await
        .expect("connect");
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    bus.subscribe(move |_: Ping| {
        seen.fetch_add(1, Ordering::SeqCst);
        async { Ok(()) }
    });

    transport.inject(message_bytes(&Ping { seq: 1 }));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn link_loss_triggers_reconnect_and_keeps_pending_requests() {
    let transport = MemoryTransport::new();
    let events = Arc::new(Mutex::new(Vec::new()));
    let (on_disc, on_reconn, on_conn) = (
        Arc::clone(&events),
        Arc::clone(&events),
        Arc::clone(&events),
    );
    let bus = MessageBusBuilder::new()
        .reconnect_delay(Duration::from_millis(250))
        .on_connected(move || on_conn.lock().expect("lock").push("connected"))
        .on_disconnected(move || on_disc.lock().expect("lock").push("disconnected"))
        .on_reconnecting(move || on_reconn.lock().expect("lock").push("reconnecting"))
        .connect(transport.clone())
        .await
        .expect("connect");

    let caller = bus.clone();
    let request =
        tokio::spawn(async move { caller.request(&Ping { seq: 9 }, &CancellationToken::new()).await });
    let sent = transport.wait_for_sent(1).await;

    let mut state = bus.watch_state();
    transport.simulate_drop();
    state
        .wait_for(|s| *s == ConnectionState::Reconnecting)
        .await
        .expect("state");
    state
        .wait_for(|s| *s == ConnectionState::Connected)
        .await
        .expect("state");
    assert_eq!(transport.connect_attempts(), 2);
    assert_eq!(bus.pending_requests(), 1);

    transport.inject(ack_bytes(&Acknowledgement::ok(decode_sent(&sent[0]).id())));
    let ack = request.await.expect("join").expect("late ack resolves");
    assert!(ack.is_success());
    assert_eq!(
        *events.lock().expect("lock"),
        vec!["connected", "disconnected", "reconnecting", "connected"]
    );
}

#[tokio::test]
async fn typed_request_decodes_reply() {
    let transport = MemoryTransport::new();
    let bus = connected_bus(&transport).await;

    let caller = bus.clone();
    let request = tokio::spawn(async move {
        caller
            .request_typed::<Ping, u32>(&Ping { seq: 6 }, &CancellationToken::new())
            .await
    });
    let sent = transport.wait_for_sent(1).await;
    let reply = BincodeCodec.encode(&36u32).expect("encode");
    transport.inject(ack_bytes(
        &Acknowledgement::ok(decode_sent(&sent[0]).id()).with_payload(reply),
    ));

    let typed = request.await.expect("join").expect("ack");
    assert_eq!(typed.payload, Some(36));
    assert_eq!(typed.into_result().expect("success"), 36);
}

#[rstest]
#[case(status::NOT_FOUND, Some("no handler for type Ping"))]
#[case(status::HANDLER_FAILED, Some("boom"))]
fn non_success_typed_acknowledgement_is_rejected(
    #[case] code: i32,
    #[case] message: Option<&str>,
) {
    let typed = TypedAcknowledgement::<u32> {
        correlation_id: FrameId::from_u128(1),
        status_code: code,
        error_message: message.map(str::to_owned),
        payload: None,
    };
    let err = typed.into_result().expect_err("rejected");
    assert!(matches!(err, BusError::Rejected { status, .. } if status == code));
}

#[test]
fn successful_acknowledgement_without_reply_is_missing_payload() {
    let typed = TypedAcknowledgement::<u32> {
        correlation_id: FrameId::from_u128(1),
        status_code: status::OK,
        error_message: None,
        payload: None,
    };
    assert!(matches!(typed.into_result(), Err(BusError::MissingPayload)));
}

#[tokio::test]
async fn zero_reconnect_delay_is_rejected() {
    let err = MessageBusBuilder::new()
        .reconnect_delay(Duration::ZERO)
        .build(MemoryTransport::new())
        .expect_err("zero delay");
    assert!(matches!(err, BusError::Config(_)));
}

#[tokio::test]
async fn stopped_bus_does_not_reconnect() {
    let transport = MemoryTransport::new();
    let bus = connected_bus(&transport).await;
    bus.stop(&CancellationToken::new()).await.expect("stop");
    assert_eq!(bus.state(), ConnectionState::Disconnected);

    transport.simulate_drop();
    tokio::task::yield_now().await;
    assert_eq!(transport.connect_attempts(), 1);
    assert!(matches!(bus.connect().await, Err(BusError::Stopped)));
}

#[tokio::test(flavor = "current_thread")]
async fn queued_connection_event_does_not_revive_stopped_bus() {
    let transport = MemoryTransport::new();
    // The `Connected` event emitted by `connect` is still queued when `stop` runs.
    let bus = connected_bus(&transport).await;
    bus.stop(&CancellationToken::new()).await.expect("stop");

    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert_eq!(bus.state(), ConnectionState::Disconnected);
    assert_eq!(*bus.watch_state().borrow(), ConnectionState::Disconnected);
    assert!(matches!(bus.connect().await, Err(BusError::Stopped)));
}

#[rstest]
#[case::request(true)]
#[case::send(false)]
#[tokio::test]
async fn already_cancelled_token_reports_cancellation(#[case] expect_ack: bool) {
    let transport = MemoryTransport::new();
    let bus = connected_bus(&transport).await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = if expect_ack {
        bus.request(&Ping { seq: 1 }, &cancel).await.expect_err("cancelled")
    } else {
        bus.send(&Ping { seq: 1 }, &cancel).await.expect_err("cancelled")
    };
    assert!(matches!(err, BusError::Cancelled), "got {err:?}");
    assert!(transport.sent().is_empty());
    assert_eq!(bus.pending_requests(), 0);
}

#[tokio::test(start_paused = true)]
async fn stop_waits_for_running_subscribers() {
    let transport = MemoryTransport::new();
    let bus = connected_bus(&transport).await;
    let (started_tx, mut started_rx) = mpsc::unbounded_channel();
    let release = Arc::new(tokio::sync::Notify::new());
    let gate = Arc::clone(&release);
    bus.subscribe(move |ping: Ping| {
        let started_tx = started_tx.clone();
        let gate = Arc::clone(&gate);
        async move {
            let _ = started_tx.send(ping.seq);
            gate.notified().await;
            Ok(())
        }
    });
    transport.inject(message_bytes(&Ping { seq: 4 }));
    assert_eq!(started_rx.recv().await, Some(4));

    let stopping = {
        let bus = bus.clone();
        tokio::spawn(async move { bus.stop(&CancellationToken::new()).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!stopping.is_finished(), "stop returned while a handler ran");

    release.notify_one();
    stopping.await.expect("join").expect("stop");
}

#[tokio::test(start_paused = true)]
async fn stop_gives_up_on_handlers_when_cancelled() {
    let transport = MemoryTransport::new();
    let bus = connected_bus(&transport).await;
    let (started_tx, mut started_rx) = mpsc::unbounded_channel();
    bus.subscribe(move |_: Ping| {
        let started_tx = started_tx.clone();
        async move {
            let _ = started_tx.send(());
            std::future::pending::<()>().await;
            Ok(())
        }
    });
    transport.inject(message_bytes(&Ping { seq: 5 }));
    started_rx.recv().await.expect("handler started");

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });
    assert!(matches!(bus.stop(&cancel).await, Err(BusError::Cancelled)));
    assert_eq!(bus.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn reconnect_config_sets_the_retry_delay() {
    let transport = MemoryTransport::new();
    let bus = MessageBusBuilder::new()
        .reconnect_config(ReconnectConfig::from_millis(750).expect("positive delay"))
        .connect(transport.clone())
        .await
        .expect("connect");
    let mut state = bus.watch_state();

    let dropped_at = tokio::time::Instant::now();
    transport.simulate_drop();
    state
        .wait_for(|s| *s == ConnectionState::Reconnecting)
        .await
        .expect("state");
    state
        .wait_for(|s| *s == ConnectionState::Connected)
        .await
        .expect("state");
    assert!(dropped_at.elapsed() >= Duration::from_millis(750));
    assert_eq!(transport.connect_attempts(), 2);
}
