//! Interceptor that records what it observes.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use framebus::{Direction, Envelope, FrameId, Interceptor, InterceptorError};

/// One hook invocation seen by a [`RecordingInterceptor`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Observed {
    pub name: &'static str,
    pub direction: Direction,
    pub id: FrameId,
    pub type_tag: String,
}

/// Records every hook call into a log shared between several interceptors,
/// optionally rejecting frames in one direction.
#[derive(Clone, Debug)]
pub struct RecordingInterceptor {
    name: &'static str,
    log: Arc<Mutex<Vec<Observed>>>,
    reject: Option<Direction>,
}

impl RecordingInterceptor {
    #[must_use]
    pub fn new(name: &'static str, log: &Arc<Mutex<Vec<Observed>>>) -> Self {
        Self {
            name,
            log: Arc::clone(log),
            reject: None,
        }
    }

    /// Fail every hook call in `direction` after recording it.
    #[must_use]
    pub fn rejecting(mut self, direction: Direction) -> Self {
        self.reject = Some(direction);
        self
    }

    fn observe(&self, direction: Direction, envelope: &Envelope<'_>) -> Result<(), InterceptorError> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Observed {
                name: self.name,
                direction,
                id: envelope.id(),
                type_tag: envelope.type_tag().to_owned(),
            });
        if self.reject == Some(direction) {
            return Err(InterceptorError::new(format!("{} rejected frame", self.name)));
        }
        Ok(())
    }
}

#[async_trait]
impl Interceptor for RecordingInterceptor {
    async fn on_sending(&self, envelope: &Envelope<'_>) -> Result<(), InterceptorError> {
        self.observe(Direction::Outbound, envelope)
    }

    async fn on_received(&self, envelope: &Envelope<'_>) -> Result<(), InterceptorError> {
        self.observe(Direction::Inbound, envelope)
    }
}

/// Snapshot the shared log.
#[must_use]
pub fn observed(log: &Arc<Mutex<Vec<Observed>>>) -> Vec<Observed> {
    log.lock().unwrap_or_else(PoisonError::into_inner).clone()
}
