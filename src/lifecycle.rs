//! Connection lifecycle and automatic reconnection.
//!
//! The lifecycle tracks a [`ConnectionState`] in a watch channel and fires
//! registered callbacks at each transition. When an established link drops,
//! it moves to [`ConnectionState::Reconnecting`] and retries the transport's
//! `connect` after a fixed delay, forever, until the owner stops it.

use std::{
    fmt,
    sync::{Arc, Weak},
    time::Duration,
};

use tokio::sync::watch;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    error::{BusError, ConfigError},
    transport::{Transport, TransportError},
};

/// Link state observed by a [`MessageBus`](crate::MessageBus).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        };
        f.write_str(name)
    }
}

/// Delay between reconnection attempts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconnectConfig {
    delay: Duration,
}

impl ReconnectConfig {
    /// Delay used when none is configured.
    pub const DEFAULT_DELAY: Duration = Duration::from_secs(2);

    /// Validate and wrap `delay`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NonPositiveReconnectDelay`] for a zero delay.
    ///
    /// ```
    /// use std::time::Duration;
    ///
    /// use framebus::lifecycle::ReconnectConfig;
    ///
    /// assert!(ReconnectConfig::new(Duration::ZERO).is_err());
    /// assert_eq!(
    ///     ReconnectConfig::new(Duration::from_millis(250)).map(|c| c.delay()),
    ///     Ok(Duration::from_millis(250))
    /// );
    /// ```
    pub fn new(delay: Duration) -> Result<Self, ConfigError> {
        if delay.is_zero() {
            return Err(ConfigError::NonPositiveReconnectDelay(delay));
        }
        Ok(Self { delay })
    }

    /// Shorthand for [`ReconnectConfig::new`] with a millisecond delay.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NonPositiveReconnectDelay`] when `millis` is 0.
    pub fn from_millis(millis: u64) -> Result<Self, ConfigError> {
        Self::new(Duration::from_millis(millis))
    }

    #[must_use]
    pub const fn delay(&self) -> Duration { self.delay }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            delay: Self::DEFAULT_DELAY,
        }
    }
}

/// Callback fired on a lifecycle transition.
pub type LifecycleCallback = Arc<dyn Fn() + Send + Sync>;

/// Callback fired when a connection attempt fails.
pub type ConnectFailedCallback = Arc<dyn Fn(&TransportError) + Send + Sync>;

/// Ordered callback lists, invoked synchronously in registration order.
#[derive(Clone, Default)]
pub(crate) struct LifecycleHooks {
    pub(crate) connected: Vec<LifecycleCallback>,
    pub(crate) disconnected: Vec<LifecycleCallback>,
    pub(crate) reconnecting: Vec<LifecycleCallback>,
    pub(crate) connect_failed: Vec<ConnectFailedCallback>,
}

impl LifecycleHooks {
    fn fire(callbacks: &[LifecycleCallback]) {
        for callback in callbacks {
            callback();
        }
    }

    fn fire_connect_failed(&self, error: &TransportError) {
        for callback in &self.connect_failed {
            callback(error);
        }
    }
}

/// Drives a transport through the connection state machine.
pub(crate) struct Lifecycle {
    transport: Arc<dyn Transport>,
    state: watch::Sender<ConnectionState>,
    hooks: LifecycleHooks,
    config: ReconnectConfig,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifecycle")
            .field("state", &*self.state.borrow())
            .field("config", &self.config)
            .field("stopped", &self.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Lifecycle {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        hooks: LifecycleHooks,
        config: ReconnectConfig,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            transport,
            state,
            hooks,
            config,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    pub(crate) fn state(&self) -> ConnectionState { *self.state.borrow() }

    pub(crate) fn watch(&self) -> watch::Receiver<ConnectionState> { self.state.subscribe() }

    pub(crate) fn is_stopped(&self) -> bool { self.shutdown.is_cancelled() }

    // Once stopped, the state stays `Disconnected`.
    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.state.send_if_modified(|state| {
            if *state == from && !self.is_stopped() {
                *state = to;
                true
            } else {
                false
            }
        })
    }

    // A concurrent `stop` wins over a connect that completes afterwards.
    fn mark_connected(&self) -> bool {
        let marked = self.transition(ConnectionState::Connecting, ConnectionState::Connected);
        if marked {
            log::info!("connection established");
            LifecycleHooks::fire(&self.hooks.connected);
        }
        marked
    }

    /// Connect the transport on the owner's request.
    pub(crate) async fn connect(&self) -> Result<(), BusError> {
        if self.is_stopped() {
            return Err(BusError::Stopped);
        }
        let mut current = ConnectionState::Disconnected;
        let started = self.state.send_if_modified(|state| {
            current = *state;
            if *state == ConnectionState::Disconnected && !self.is_stopped() {
                *state = ConnectionState::Connecting;
                true
            } else {
                false
            }
        });
        if !started {
            if self.is_stopped() {
                return Err(BusError::Stopped);
            }
            return match current {
                ConnectionState::Connected => Ok(()),
                _ => Err(BusError::ConnectInProgress),
            };
        }
        match self.transport.connect(&self.shutdown).await {
            Ok(()) if self.mark_connected() => Ok(()),
            Ok(()) => Err(BusError::Stopped),
            Err(_) if self.is_stopped() => Err(BusError::Stopped),
            Err(e) => {
                self.transition(ConnectionState::Connecting, ConnectionState::Disconnected);
                log::warn!("connect failed: error={e}");
                self.hooks.fire_connect_failed(&e);
                Err(e.into())
            }
        }
    }

    /// React to the transport announcing an established link.
    ///
    /// Only links the lifecycle was not already tracking change state.
    pub(crate) fn on_transport_connected(&self) {
        if self.is_stopped() {
            log::debug!("ignoring transport connection after stop");
            return;
        }
        let adopted = self.state.send_if_modified(|state| {
            if matches!(
                *state,
                ConnectionState::Disconnected | ConnectionState::Reconnecting
            ) && !self.is_stopped()
            {
                *state = ConnectionState::Connected;
                true
            } else {
                false
            }
        });
        if adopted {
            log::info!("transport reported connection");
            LifecycleHooks::fire(&self.hooks.connected);
        }
    }

    /// React to the transport losing its link.
    pub(crate) fn on_transport_disconnected(self: &Arc<Self>) {
        if self.is_stopped()
            || !self.transition(ConnectionState::Connected, ConnectionState::Reconnecting)
        {
            log::debug!("ignoring disconnect in state {}", self.state());
            return;
        }
        log::warn!(
            "connection lost; reconnecting every {:?}",
            self.config.delay()
        );
        LifecycleHooks::fire(&self.hooks.disconnected);
        self.tracker.spawn(reconnect_loop(Arc::downgrade(self)));
    }

    /// Stop for good: no further reconnection, transport torn down.
    pub(crate) async fn stop(&self, cancel: &CancellationToken) -> Result<(), BusError> {
        self.shutdown.cancel();
        let previous = self.state.send_replace(ConnectionState::Disconnected);
        if previous == ConnectionState::Connected {
            LifecycleHooks::fire(&self.hooks.disconnected);
        }
        self.tracker.close();
        self.transport.stop(cancel).await?;
        self.tracker.wait().await;
        Ok(())
    }
}

async fn reconnect_loop(lifecycle: Weak<Lifecycle>) {
    let mut attempt: u64 = 0;
    loop {
        let Some(this) = lifecycle.upgrade() else {
            return;
        };
        LifecycleHooks::fire(&this.hooks.reconnecting);
        let delay = this.config.delay();
        let shutdown = this.shutdown.clone();
        drop(this);

        tokio::select! {
            biased;

            () = shutdown.cancelled() => return,
            () = tokio::time::sleep(delay) => {}
        }

        let Some(this) = lifecycle.upgrade() else {
            return;
        };
        if !this.transition(ConnectionState::Reconnecting, ConnectionState::Connecting) {
            // Stopped, or the transport reconnected on its own.
            return;
        }
        attempt += 1;
        match this.transport.connect(&this.shutdown).await {
            Ok(()) => {
                this.mark_connected();
                return;
            }
            Err(e) => {
                if this.is_stopped() {
                    return;
                }
                log::warn!("reconnect attempt {attempt} failed: error={e}");
                tracing::warn!(attempt, error = %e, "reconnect attempt failed");
                this.hooks.fire_connect_failed(&e);
                if !this.transition(ConnectionState::Connecting, ConnectionState::Reconnecting) {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests;
