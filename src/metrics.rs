//! Metric helpers for `klipper-wire`.
//!
//! This module defines metric names and simple helper functions
//! wrapping the [`metrics`](https://docs.rs/metrics) crate. Without the
//! `metrics` feature every helper compiles to a no-op. The library never
//! installs a recorder or exporter; that is left to the application.

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

/// Name of the counter tracking frames sent and received.
pub const FRAMES_TOTAL: &str = "klipper_wire_frames_total";
/// Name of the counter tracking scheduled reconnect attempts.
pub const RECONNECTS_TOTAL: &str = "klipper_wire_reconnects_total";
/// Name of the counter tracking resolved call outcomes.
pub const CALL_OUTCOMES_TOTAL: &str = "klipper_wire_call_outcomes_total";
/// Name of the gauge tracking calls awaiting a reply.
pub const PENDING_CALLS: &str = "klipper_wire_pending_calls";

/// Direction of frame processing.
#[derive(Clone, Copy, Debug)]
pub enum Direction {
    /// Frames received from Klipper.
    Inbound,
    /// Frames written to Klipper.
    Outbound,
}

impl Direction {
    /// Label value used for the `direction` label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

/// Record a frame for the given direction.
pub fn inc_frames(direction: Direction) {
    #[cfg(feature = "metrics")]
    counter!(FRAMES_TOTAL, "direction" => direction.as_str()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = direction;
}

/// Record a scheduled reconnect attempt.
pub fn inc_reconnects() {
    #[cfg(feature = "metrics")]
    counter!(RECONNECTS_TOTAL).increment(1);
}

/// Record a resolved call, labelled with its outcome.
pub fn inc_call_outcome(outcome: &'static str) {
    #[cfg(feature = "metrics")]
    counter!(CALL_OUTCOMES_TOTAL, "outcome" => outcome).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = outcome;
}

/// Publish the number of calls awaiting a reply.
#[cfg_attr(
    feature = "metrics",
    expect(
        clippy::cast_precision_loss,
        reason = "pending call counts stay far below f64 precision limits"
    )
)]
pub fn set_pending_calls(count: usize) {
    #[cfg(feature = "metrics")]
    gauge!(PENDING_CALLS).set(count as f64);
    #[cfg(not(feature = "metrics"))]
    let _ = count;
}
