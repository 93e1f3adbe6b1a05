//! Pending-request bookkeeping.
//!
//! [`PendingRequests`] maps the identifier of every outstanding request frame
//! to the one-shot slot its caller is waiting on. An acknowledgement resolves
//! the slot with the matching `correlation_id`; each slot resolves at most
//! once and is removed as soon as it resolves, is cancelled, or its waiter is
//! dropped.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::{DashMap, mapref::entry::Entry};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::{
    error::BusError,
    frame::{Acknowledgement, FrameId},
    metrics,
};

#[derive(Debug)]
struct PendingEntry {
    seq: u64,
    tx: oneshot::Sender<Acknowledgement>,
}

/// Concurrent table of requests awaiting an [`Acknowledgement`].
#[derive(Debug, Default)]
pub struct PendingRequests {
    entries: DashMap<FrameId, PendingEntry>,
    next_seq: AtomicU64,
}

impl PendingRequests {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Reserve a slot for `id`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::DuplicateCorrelationId`] if `id` is already
    /// pending. The existing entry is left untouched.
    pub fn register(&self, id: FrameId) -> Result<ResponseWaiter<'_>, BusError> {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        match self.entries.entry(id) {
            Entry::Occupied(_) => return Err(BusError::DuplicateCorrelationId(id)),
            Entry::Vacant(slot) => {
                slot.insert(PendingEntry { seq, tx });
            }
        }
        metrics::inc_pending();
        Ok(ResponseWaiter {
            pending: self,
            id,
            seq,
            rx: Some(rx),
        })
    }

    /// Deliver `ack` to the request it correlates with.
    ///
    /// Returns `false` when no request with that identifier is pending.
    pub fn resolve(&self, ack: Acknowledgement) -> bool {
        let Some((_, entry)) = self.entries.remove(&ack.correlation_id) else {
            return false;
        };
        metrics::dec_pending();
        if entry.tx.send(ack).is_err() {
            log::debug!("acknowledgement arrived after its waiter went away");
        }
        true
    }

    /// Abandon the pending request for `id`, if any.
    ///
    /// The waiter observes [`BusError::Cancelled`].
    pub fn cancel(&self, id: FrameId) -> bool {
        let removed = self.entries.remove(&id).is_some();
        if removed {
            metrics::dec_pending();
        }
        removed
    }

    #[must_use]
    pub fn contains(&self, id: FrameId) -> bool { self.entries.contains_key(&id) }

    #[must_use]
    pub fn len(&self) -> usize { self.entries.len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    fn release(&self, id: FrameId, seq: u64) {
        if self
            .entries
            .remove_if(&id, |_, entry| entry.seq == seq)
            .is_some()
        {
            metrics::dec_pending();
        }
    }
}

/// Handle held by a caller awaiting the acknowledgement of one request.
///
/// Dropping the waiter withdraws the pending entry.
#[derive(Debug)]
pub struct ResponseWaiter<'a> {
    pending: &'a PendingRequests,
    id: FrameId,
    seq: u64,
    rx: Option<oneshot::Receiver<Acknowledgement>>,
}

impl ResponseWaiter<'_> {
    #[must_use]
    pub const fn id(&self) -> FrameId { self.id }

    /// Wait for the acknowledgement or for `cancel` to fire.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Cancelled`] if `cancel` fires first or the entry
    /// was withdrawn through [`PendingRequests::cancel`].
    pub async fn wait(mut self, cancel: &CancellationToken) -> Result<Acknowledgement, BusError> {
        let Some(rx) = self.rx.take() else {
            return Err(BusError::Cancelled);
        };
        tokio::select! {
            biased;

            res = rx => res.map_err(|_| BusError::Cancelled),
            () = cancel.cancelled() => Err(BusError::Cancelled),
        }
    }
}

impl Drop for ResponseWaiter<'_> {
    fn drop(&mut self) { self.pending.release(self.id, self.seq); }
}
