//! Metric helpers for `framebus`.
//!
//! This module defines metric names and simple helper functions wrapping the
//! [`metrics`](https://docs.rs/metrics) crate. With the `metrics` feature
//! disabled every helper compiles to a no-op.

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

/// Name of the gauge tracking responder connections being served.
pub const CONNECTIONS_ACTIVE: &str = "framebus_connections_active";
/// Name of the gauge tracking requests awaiting an acknowledgement.
pub const PENDING_REQUESTS: &str = "framebus_pending_requests";
/// Name of the counter tracking frames sent and received.
pub const FRAMES_TOTAL: &str = "framebus_frames_total";
/// Name of the counter tracking error occurrences.
pub const ERRORS_TOTAL: &str = "framebus_errors_total";

/// Direction of frame processing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Frames decoded from a transport.
    Inbound,
    /// Frames handed to a transport.
    Outbound,
}

impl Direction {
    #[cfg_attr(not(feature = "metrics"), allow(dead_code))]
    fn as_str(self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

/// Increment the active connections gauge.
pub fn inc_connections() {
    #[cfg(feature = "metrics")]
    gauge!(CONNECTIONS_ACTIVE).increment(1.0);
}

/// Decrement the active connections gauge.
pub fn dec_connections() {
    #[cfg(feature = "metrics")]
    gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Increment the pending requests gauge.
pub fn inc_pending() {
    #[cfg(feature = "metrics")]
    gauge!(PENDING_REQUESTS).increment(1.0);
}

/// Decrement the pending requests gauge.
pub fn dec_pending() {
    #[cfg(feature = "metrics")]
    gauge!(PENDING_REQUESTS).decrement(1.0);
}

/// Record a frame for the given direction.
#[cfg_attr(not(feature = "metrics"), allow(unused_variables))]
pub fn inc_frames(direction: Direction) {
    #[cfg(feature = "metrics")]
    counter!(FRAMES_TOTAL, "direction" => direction.as_str()).increment(1);
}

/// Record an error occurrence.
pub fn inc_errors() {
    #[cfg(feature = "metrics")]
    counter!(ERRORS_TOTAL).increment(1);
}
