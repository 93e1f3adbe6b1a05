//! End-to-end request/acknowledgement tests over linked in-memory transports.

use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicI32, Ordering},
    },
};

use framebus::{
    BusError,
    HandlerError,
    JsonCodec,
    MessageBusBuilder,
    ResponderBuilder,
    frame::status,
    transport::MemoryTransport,
};
use framebus_testing::{Doubling, TestMessage, serve_pair};
use futures::future::join_all;
use rstest::rstest;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn subscriber_sees_request_and_ack_is_ok() {
    let responder = ResponderBuilder::new().build();
    let seen = Arc::new(AtomicI32::new(0));
    let slot = Arc::clone(&seen);
    responder.subscribe(move |m: TestMessage| {
        slot.store(m.value, Ordering::SeqCst);
        async { Ok(()) }
    });
    let (client, served) = serve_pair(responder).await;

    let bus = MessageBusBuilder::new()
        .connect(client)
        .await
        .expect("connect");
    let cancel = CancellationToken::new();
    let ack = bus
        .request(&TestMessage { value: 1234 }, &cancel)
        .await
        .expect("request");

    assert_eq!(ack.status_code, status::OK);
    assert!(ack.is_success());
    assert_eq!(seen.load(Ordering::SeqCst), 1234);
    assert_eq!(bus.pending_requests(), 0);
    served.shutdown().await;
}

#[tokio::test]
async fn unhandled_type_is_acknowledged_with_not_found() {
    let (client, served) = serve_pair(ResponderBuilder::new().build()).await;
    let bus = MessageBusBuilder::new()
        .connect(client)
        .await
        .expect("connect");

    let ack = bus
        .request(&TestMessage { value: 1 }, &CancellationToken::new())
        .await
        .expect("request");
    assert_eq!(ack.status_code, status::NOT_FOUND);
    assert_eq!(
        ack.error_message.as_deref(),
        Some("no handler for type TestMessage")
    );
    served.shutdown().await;
}

#[rstest]
#[case::first_fails(Some("first"), None, "first")]
#[case::second_fails(None, Some("second"), "second")]
#[case::both_fail(Some("first"), Some("second"), "second")]
#[tokio::test]
async fn handler_failure_is_reported_with_last_message(
    #[case] first: Option<&'static str>,
    #[case] second: Option<&'static str>,
    #[case] expected: &str,
) {
    let responder = ResponderBuilder::new().build();
    for outcome in [first, second] {
        responder.subscribe(move |_: TestMessage| async move {
            match outcome {
                Some(msg) => Err(HandlerError::new(msg)),
                None => Ok(()),
            }
        });
    }
    let (client, served) = serve_pair(responder).await;
    let bus = MessageBusBuilder::new()
        .connect(client)
        .await
        .expect("connect");

    let ack = bus
        .request(&TestMessage { value: 1 }, &CancellationToken::new())
        .await
        .expect("request");
    assert_eq!(ack.status_code, status::HANDLER_FAILED);
    assert_eq!(ack.error_message.as_deref(), Some(expected));
    served.shutdown().await;
}

#[tokio::test]
async fn typed_reply_round_trips_over_json() {
    let responder = ResponderBuilder::new().codec(JsonCodec).build();
    responder.reply(|Doubling(n): Doubling| async move { Ok(n * 2) });
    let (client, served) = serve_pair(responder).await;

    let bus = MessageBusBuilder::new()
        .codec(JsonCodec)
        .connect(client)
        .await
        .expect("connect");
    let reply = bus
        .request_typed::<_, i64>(&Doubling(21), &CancellationToken::new())
        .await
        .expect("request")
        .into_result()
        .expect("reply");
    assert_eq!(reply, 42);
    served.shutdown().await;
}

#[tokio::test]
async fn concurrent_requests_each_receive_their_own_acknowledgement() {
    let responder = ResponderBuilder::new().build();
    responder.reply(|Doubling(n): Doubling| async move { Ok(n * 2) });
    let (client, served) = serve_pair(responder).await;
    let bus = MessageBusBuilder::new()
        .connect(client)
        .await
        .expect("connect");
    let cancel = CancellationToken::new();

    let replies = join_all((0..50_i64).map(|n| {
        let bus = bus.clone();
        let cancel = cancel.clone();
        async move {
            let ack = bus
                .request_typed::<_, i64>(&Doubling(n), &cancel)
                .await
                .expect("request");
            (n, ack.correlation_id, ack.into_result().expect("reply"))
        }
    }))
    .await;

    let ids: HashSet<_> = replies.iter().map(|(_, id, _)| *id).collect();
    assert_eq!(ids.len(), 50);
    for (n, _, doubled) in replies {
        assert_eq!(doubled, n * 2);
    }
    assert_eq!(bus.pending_requests(), 0);
    served.shutdown().await;
}

#[tokio::test]
async fn cancelled_request_leaves_no_pending_entry() {
    // Nobody serves the peer, so no acknowledgement ever arrives.
    let (client, _peer) = MemoryTransport::pair();
    let bus = MessageBusBuilder::new()
        .connect(client)
        .await
        .expect("connect");
    let cancel = CancellationToken::new();
    let request = {
        let bus = bus.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { bus.request(&TestMessage { value: 5 }, &cancel).await })
    };
    bus.transport().wait_for_sent(1).await;
    assert_eq!(bus.pending_requests(), 1);

    cancel.cancel();
    let result = request.await.expect("join");
    assert!(matches!(result, Err(BusError::Cancelled)));
    assert_eq!(bus.pending_requests(), 0);
}
