//! Observer interceptors.
//!
//! An [`Interceptor`] watches frames as they leave and arrive. Hooks run in
//! registration order; the first failure aborts the send or dispatch of that
//! frame. Acknowledgement frames received by a bus bypass the receive hooks.

use std::{fmt, sync::Arc};

use async_trait::async_trait;

use crate::envelope::Envelope;

/// Failure raised by an interceptor hook.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct InterceptorError {
    message: String,
}

impl InterceptorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn message(&self) -> &str { &self.message }
}

impl From<&str> for InterceptorError {
    fn from(message: &str) -> Self { Self::new(message) }
}

impl From<String> for InterceptorError {
    fn from(message: String) -> Self { Self::new(message) }
}

/// Send and receive hooks observing frames.
///
/// Both hooks default to accepting the frame.
#[async_trait]
pub trait Interceptor: Send + Sync + 'static {
    /// Called before a frame's bytes are handed to the transport.
    async fn on_sending(&self, _envelope: &Envelope<'_>) -> Result<(), InterceptorError> { Ok(()) }

    /// Called before a non-acknowledgement frame is dispatched.
    async fn on_received(&self, _envelope: &Envelope<'_>) -> Result<(), InterceptorError> { Ok(()) }
}

type Hook = Arc<dyn Fn(&Envelope<'_>) -> Result<(), InterceptorError> + Send + Sync>;

/// Interceptor built from synchronous closures.
///
/// Builders use this for their `on_sending`/`on_received` shortcuts.
#[derive(Clone, Default)]
pub struct FnInterceptor {
    sending: Option<Hook>,
    received: Option<Hook>,
}

impl FnInterceptor {
    /// Observe outbound frames with `hook`.
    #[must_use]
    pub fn sending<F>(hook: F) -> Self
    where
        F: Fn(&Envelope<'_>) -> Result<(), InterceptorError> + Send + Sync + 'static,
    {
        Self {
            sending: Some(Arc::new(hook)),
            received: None,
        }
    }

    /// Observe inbound frames with `hook`.
    #[must_use]
    pub fn received<F>(hook: F) -> Self
    where
        F: Fn(&Envelope<'_>) -> Result<(), InterceptorError> + Send + Sync + 'static,
    {
        Self {
            sending: None,
            received: Some(Arc::new(hook)),
        }
    }
}

impl fmt::Debug for FnInterceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnInterceptor")
            .field("sending", &self.sending.is_some())
            .field("received", &self.received.is_some())
            .finish()
    }
}

#[async_trait]
impl Interceptor for FnInterceptor {
    async fn on_sending(&self, envelope: &Envelope<'_>) -> Result<(), InterceptorError> {
        self.sending.as_ref().map_or(Ok(()), |hook| hook(envelope))
    }

    async fn on_received(&self, envelope: &Envelope<'_>) -> Result<(), InterceptorError> {
        self.received.as_ref().map_or(Ok(()), |hook| hook(envelope))
    }
}

/// Ordered interceptor list, fixed once built.
#[derive(Clone, Default)]
pub struct InterceptorChain {
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptorChain")
            .field("len", &self.interceptors.len())
            .finish()
    }
}

impl InterceptorChain {
    pub(crate) fn push(&mut self, interceptor: Arc<dyn Interceptor>) {
        self.interceptors.push(interceptor);
    }

    #[must_use]
    pub fn len(&self) -> usize { self.interceptors.len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.interceptors.is_empty() }

    /// Run every send hook in order.
    ///
    /// # Errors
    ///
    /// Returns the first hook failure; later hooks do not run.
    pub async fn sending(&self, envelope: &Envelope<'_>) -> Result<(), InterceptorError> {
        for interceptor in &self.interceptors {
            interceptor.on_sending(envelope).await?;
        }
        Ok(())
    }

    /// Run every receive hook in order.
    ///
    /// # Errors
    ///
    /// Returns the first hook failure; later hooks do not run.
    pub async fn received(&self, envelope: &Envelope<'_>) -> Result<(), InterceptorError> {
        for interceptor in &self.interceptors {
            interceptor.on_received(envelope).await?;
        }
        Ok(())
    }
}
