//! Connection manager state.

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Where the connection manager is in its connect loop.
#[derive(Debug)]
pub(super) enum LinkState {
    /// `start()` has not been called yet.
    Idle,
    /// A connect attempt is scheduled or in flight.
    Connecting {
        attempt: u64,
        cancel: CancellationToken,
    },
    /// A transport is open and its reader and writer tasks are running.
    Open {
        attempt: u64,
        writer: mpsc::UnboundedSender<Bytes>,
        cancel: CancellationToken,
    },
    /// `stop()` was called; nothing reconnects any more.
    Stopped,
}

impl LinkState {
    /// Returns `true` while `attempt` is the connect attempt being awaited.
    pub(super) fn awaits_connect(&self, attempt: u64) -> bool {
        matches!(self, Self::Connecting { attempt: current, .. } if *current == attempt)
    }

    /// Returns `true` while `attempt` owns the open transport.
    pub(super) fn is_open_for(&self, attempt: u64) -> bool {
        matches!(self, Self::Open { attempt: current, .. } if *current == attempt)
    }
}
