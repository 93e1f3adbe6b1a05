//! Read-only frame view handed to observer interceptors.

use crate::frame::{Frame, FrameId};

/// Borrowed view of a [`Frame`] exposed to
/// [`Interceptor`](crate::interceptor::Interceptor) hooks.
///
/// Interceptors observe frames; they cannot alter what is sent or
/// dispatched.
#[derive(Clone, Copy, Debug)]
pub struct Envelope<'a> {
    frame: &'a Frame,
}

impl<'a> Envelope<'a> {
    pub(crate) const fn new(frame: &'a Frame) -> Self { Self { frame } }

    #[must_use]
    pub const fn id(&self) -> FrameId { self.frame.id() }

    #[must_use]
    pub fn type_tag(&self) -> &'a str { self.frame.type_tag() }

    #[must_use]
    pub fn payload(&self) -> &'a [u8] { self.frame.payload() }

    /// Return `true` when the viewed frame carries an acknowledgement.
    #[must_use]
    pub fn is_acknowledgement(&self) -> bool { self.frame.is_acknowledgement() }
}
