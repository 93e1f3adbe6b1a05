//! Builder for [`MessageBus`].

use std::{sync::Arc, time::Duration};

use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::{BusInner, IdSource, MessageBus};
use crate::{
    codec::{BincodeCodec, Codec},
    correlation::PendingRequests,
    dispatch::SubscriberRegistry,
    envelope::Envelope,
    error::BusError,
    frame::FrameId,
    interceptor::{FnInterceptor, Interceptor, InterceptorChain, InterceptorError},
    lifecycle::{Lifecycle, LifecycleHooks, ReconnectConfig},
    transport::{Transport, TransportError, event_channel},
};

/// Configures and creates a [`MessageBus`].
///
/// ```
/// use std::time::Duration;
///
/// use framebus::{MessageBusBuilder, transport::MemoryTransport};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), framebus::BusError> {
/// let bus = MessageBusBuilder::new()
///     .reconnect_delay(Duration::from_millis(500))
///     .on_connected(|| println!("up"))
///     .connect(MemoryTransport::new())
///     .await?;
/// assert_eq!(bus.state(), framebus::ConnectionState::Connected);
/// # Ok(())
/// # }
/// ```
pub struct MessageBusBuilder<C = BincodeCodec> {
    codec: C,
    reconnect_delay: Duration,
    interceptors: InterceptorChain,
    hooks: LifecycleHooks,
    id_source: IdSource,
}

impl Default for MessageBusBuilder<BincodeCodec> {
    fn default() -> Self { Self::new() }
}

impl MessageBusBuilder<BincodeCodec> {
    /// Create a builder using [`BincodeCodec`] and a two second reconnect
    /// delay.
    #[must_use]
    pub fn new() -> Self {
        Self {
            codec: BincodeCodec,
            reconnect_delay: ReconnectConfig::DEFAULT_DELAY,
            interceptors: InterceptorChain::default(),
            hooks: LifecycleHooks::default(),
            id_source: Arc::new(FrameId::random),
        }
    }
}

impl<C: Codec> MessageBusBuilder<C> {
    /// Replace the codec used for payloads and frames.
    #[must_use]
    pub fn codec<C2: Codec>(self, codec: C2) -> MessageBusBuilder<C2> {
        MessageBusBuilder {
            codec,
            reconnect_delay: self.reconnect_delay,
            interceptors: self.interceptors,
            hooks: self.hooks,
            id_source: self.id_source,
        }
    }

    /// Delay between reconnection attempts. Must be positive; a zero delay
    /// is rejected by [`build`](Self::build).
    #[must_use]
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Use an already validated reconnect configuration.
    #[must_use]
    pub fn reconnect_config(mut self, config: ReconnectConfig) -> Self {
        self.reconnect_delay = config.delay();
        self
    }

    /// Append an interceptor. Interceptors run in the order added.
    #[must_use]
    pub fn interceptor<I: Interceptor>(mut self, interceptor: I) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    /// Append a send hook built from a closure.
    #[must_use]
    pub fn on_sending<F>(self, hook: F) -> Self
    where
        F: Fn(&Envelope<'_>) -> Result<(), InterceptorError> + Send + Sync + 'static,
    {
        self.interceptor(FnInterceptor::sending(hook))
    }

    /// Append a receive hook built from a closure.
    #[must_use]
    pub fn on_received<F>(self, hook: F) -> Self
    where
        F: Fn(&Envelope<'_>) -> Result<(), InterceptorError> + Send + Sync + 'static,
    {
        self.interceptor(FnInterceptor::received(hook))
    }

    /// Register a callback fired each time the connection is established.
    #[must_use]
    pub fn on_connected<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.hooks.connected.push(Arc::new(f));
        self
    }

    /// Register a callback fired when an established connection ends.
    #[must_use]
    pub fn on_disconnected<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.hooks.disconnected.push(Arc::new(f));
        self
    }

    /// Register a callback fired before every reconnection delay.
    #[must_use]
    pub fn on_reconnecting<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.hooks.reconnecting.push(Arc::new(f));
        self
    }

    /// Register a callback fired whenever a connection attempt fails.
    #[must_use]
    pub fn on_connect_failed<F>(mut self, f: F) -> Self
    where
        F: Fn(&TransportError) + Send + Sync + 'static,
    {
        self.hooks.connect_failed.push(Arc::new(f));
        self
    }

    /// Override how frame identifiers are generated.
    ///
    /// Identifiers must be unique among pending requests; a repeated one
    /// fails the request with [`BusError::DuplicateCorrelationId`].
    #[must_use]
    pub fn id_source<F>(mut self, f: F) -> Self
    where
        F: Fn() -> FrameId + Send + Sync + 'static,
    {
        self.id_source = Arc::new(f);
        self
    }

    /// Create the bus over `transport` without connecting it.
    ///
    /// Must be called from within a Tokio runtime: the bus spawns its event
    /// loop immediately.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Config`] if the reconnect delay is zero.
    pub fn build<T: Transport>(self, transport: T) -> Result<MessageBus<T, C>, BusError> {
        let config = ReconnectConfig::new(self.reconnect_delay)?;
        let transport = Arc::new(transport);
        let (sink, events) = event_channel();
        transport.attach(sink);
        let lifecycle = Lifecycle::new(
            Arc::clone(&transport) as Arc<dyn Transport>,
            self.hooks,
            config,
        );
        let inner = BusInner {
            transport,
            codec: Arc::new(self.codec),
            pending: PendingRequests::new(),
            subscribers: SubscriberRegistry::new(),
            interceptors: self.interceptors,
            lifecycle: Arc::new(lifecycle),
            id_source: self.id_source,
            handlers: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        };
        Ok(MessageBus::spawn(inner, events))
    }

    /// Create the bus over `transport` and connect it.
    ///
    /// # Errors
    ///
    /// Returns configuration errors from [`build`](Self::build) and
    /// connection errors from [`MessageBus::connect`].
    pub async fn connect<T: Transport>(self, transport: T) -> Result<MessageBus<T, C>, BusError> {
        let bus = self.build(transport)?;
        bus.connect().await?;
        Ok(bus)
    }
}
