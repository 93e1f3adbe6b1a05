//! Tag-routed handler registry.
//!
//! Handlers are stored per type tag as type-erased invokers. Each invoker
//! captures the codec and concrete message type at subscription time, so
//! routing needs nothing beyond the tag string carried by the frame.
//!
//! The initiating side dispatches with [`SubscriberRegistry::dispatch_detached`],
//! spawning every handler and moving on. A responder awaits each handler with
//! [`SubscriberRegistry::dispatch_awaited`] and folds the outcomes into the
//! acknowledgement status.

use std::{any::Any, fmt, future::Future, panic::AssertUnwindSafe, sync::Arc};

use bytes::Bytes;
use dashmap::DashMap;
use futures::{FutureExt, future::BoxFuture};
use tokio_util::task::TaskTracker;

use crate::{
    codec::{Codec, CodecError},
    frame::{Acknowledgement, FrameId, status},
    message::{Message, Request},
    metrics,
};

/// Failure reported by a message handler.
///
/// The message is what the responder places in the acknowledgement.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub(crate) fn decode(tag: &str, error: &CodecError) -> Self {
        Self::new(format!("failed to decode payload of type {tag}: {error}"))
    }

    pub(crate) fn encode(tag: &str, error: &CodecError) -> Self {
        Self::new(format!("failed to encode reply to type {tag}: {error}"))
    }

    pub(crate) fn panicked(payload: &(dyn Any + Send)) -> Self {
        Self::new(format!("handler panicked: {}", panic_text(payload)))
    }

    #[must_use]
    pub fn message(&self) -> &str { &self.message }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self { Self::new(message) }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self { Self::new(message) }
}

/// Message carried by a caught panic payload.
///
/// `panic!` with a literal yields `&str`, with format arguments `String`.
pub(crate) fn panic_text(payload: &(dyn Any + Send)) -> &str {
    match payload.downcast_ref::<String>() {
        Some(text) => text.as_str(),
        None => payload
            .downcast_ref::<&'static str>()
            .copied()
            .unwrap_or("non-string panic payload"),
    }
}

/// Result of one handler invocation: an optional encoded reply.
pub type HandlerResult = Result<Option<Vec<u8>>, HandlerError>;

type Invoker = Arc<dyn Fn(Bytes) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Outcome of a detached dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// No handler is registered for the tag.
    NoHandler,
    /// This many handlers were started.
    Dispatched(usize),
}

/// Aggregated outcome of an awaited dispatch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DispatchReport {
    /// Status to acknowledge with; see [`status`].
    pub status_code: i32,
    /// Message of the last failing handler, or the no-handler message.
    pub error_message: Option<String>,
    /// Reply of the last successful handler that produced one.
    pub reply: Option<Vec<u8>>,
    /// Number of handlers invoked.
    pub handlers_run: usize,
}

impl DispatchReport {
    fn no_handler(tag: &str) -> Self {
        let ack = Acknowledgement::not_found(FrameId::from_u128(0), tag);
        Self {
            status_code: ack.status_code,
            error_message: ack.error_message,
            reply: None,
            handlers_run: 0,
        }
    }

    /// Turn the report into the acknowledgement of frame `id`.
    #[must_use]
    pub fn into_acknowledgement(self, id: FrameId) -> Acknowledgement {
        Acknowledgement {
            correlation_id: id,
            status_code: self.status_code,
            error_message: self.error_message,
            payload: self.reply,
        }
    }
}

/// Registry mapping type tags to ordered handler lists.
///
/// Registration is add-only. Handlers for one tag run in the order they were
/// registered.
#[derive(Default)]
pub struct SubscriberRegistry {
    handlers: DashMap<String, Vec<Invoker>>,
}

impl fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for entry in &self.handlers {
            map.entry(entry.key(), &entry.value().len());
        }
        map.finish()
    }
}

impl SubscriberRegistry {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Register `handler` for messages of type `M`.
    pub fn subscribe<M, C, F, Fut>(&self, codec: Arc<C>, handler: F)
    where
        M: Message,
        C: Codec,
        F: Fn(M) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let invoker: Invoker = Arc::new(move |payload: Bytes| {
            let codec = Arc::clone(&codec);
            let handler = Arc::clone(&handler);
            async move {
                let message: M = codec
                    .decode(&payload)
                    .map_err(|e| HandlerError::decode(M::TYPE_TAG, &e))?;
                handler(message).await.map(|()| None)
            }
            .boxed()
        });
        self.push(M::TYPE_TAG, invoker);
    }

    /// Register a handler whose return value is encoded into the
    /// acknowledgement payload.
    pub fn reply<M, C, F, Fut>(&self, codec: Arc<C>, handler: F)
    where
        M: Request,
        C: Codec,
        F: Fn(M) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<M::Response, HandlerError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let invoker: Invoker = Arc::new(move |payload: Bytes| {
            let codec = Arc::clone(&codec);
            let handler = Arc::clone(&handler);
            async move {
                let message: M = codec
                    .decode(&payload)
                    .map_err(|e| HandlerError::decode(M::TYPE_TAG, &e))?;
                let response = handler(message).await?;
                codec
                    .encode(&response)
                    .map(Some)
                    .map_err(|e| HandlerError::encode(M::TYPE_TAG, &e))
            }
            .boxed()
        });
        self.push(M::TYPE_TAG, invoker);
    }

    fn push(&self, tag: &str, invoker: Invoker) {
        self.handlers
            .entry(tag.to_owned())
            .or_default()
            .push(invoker);
    }

    // Clone the list so no shard lock is held while handlers run.
    fn snapshot(&self, tag: &str) -> Vec<Invoker> {
        self.handlers
            .get(tag)
            .map(|list| list.value().clone())
            .unwrap_or_default()
    }

    /// Start every handler for `tag` on `tracker` without awaiting it.
    ///
    /// Handler failures and panics are logged and otherwise ignored.
    pub fn dispatch_detached(&self, tag: &str, payload: Bytes, tracker: &TaskTracker) -> DispatchOutcome {
        let invokers = self.snapshot(tag);
        if invokers.is_empty() {
            return DispatchOutcome::NoHandler;
        }
        let count = invokers.len();
        for invoker in invokers {
            let tag = tag.to_owned();
            let fut = invoker(payload.clone());
            tracker.spawn(async move {
                match AssertUnwindSafe(fut).catch_unwind().await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => {
                        metrics::inc_errors();
                        tracing::warn!(type_tag = %tag, error = %e, "subscriber failed");
                    }
                    Err(panic) => {
                        metrics::inc_errors();
                        tracing::error!(
                            type_tag = %tag,
                            panic = panic_text(&*panic),
                            "subscriber panicked"
                        );
                    }
                }
            });
        }
        DispatchOutcome::Dispatched(count)
    }

    /// Run every handler for `tag` in registration order and aggregate the
    /// result.
    ///
    /// Every handler runs even after an earlier one failed. The report
    /// carries status 404 when nothing is registered, 500 with the last
    /// failure's message when any handler failed, and 200 otherwise.
    pub async fn dispatch_awaited(&self, tag: &str, payload: Bytes) -> DispatchReport {
        let invokers = self.snapshot(tag);
        if invokers.is_empty() {
            return DispatchReport::no_handler(tag);
        }
        let mut report = DispatchReport {
            status_code: status::OK,
            error_message: None,
            reply: None,
            handlers_run: 0,
        };
        for invoker in invokers {
            report.handlers_run += 1;
            let outcome = match AssertUnwindSafe(invoker(payload.clone()))
                .catch_unwind()
                .await
            {
                Ok(result) => result,
                Err(panic) => Err(HandlerError::panicked(&*panic)),
            };
            match outcome {
                Ok(Some(reply)) => report.reply = Some(reply),
                Ok(None) => {}
                Err(e) => {
                    metrics::inc_errors();
                    tracing::warn!(type_tag = %tag, error = %e, "handler failed");
                    report.status_code = status::HANDLER_FAILED;
                    report.error_message = Some(e.message);
                }
            }
        }
        report
    }
}
