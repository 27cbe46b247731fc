//! Events posted to the driver by connection helper tasks.

use std::{fmt, io};

use bytes::Bytes;

use crate::transport::BoxedStream;

/// Outcome of a helper task, tagged with the connect attempt it belongs to.
///
/// The connection manager ignores events whose attempt is no longer the
/// current one, so a slow reader of a torn-down link can never disturb its
/// successor.
pub enum LinkEvent {
    /// The connector produced a stream.
    Opened {
        /// Attempt that opened the stream.
        attempt: u64,
        /// Freshly connected stream.
        stream: BoxedStream,
    },
    /// The connector failed.
    ConnectFailed {
        /// Attempt that failed.
        attempt: u64,
        /// Error reported by the connector.
        error: io::Error,
    },
    /// The reader task received bytes.
    Data {
        /// Attempt owning the reader.
        attempt: u64,
        /// Raw bytes in arrival order.
        chunk: Bytes,
    },
    /// The transport ended, cleanly (`None`) or with an error.
    Closed {
        /// Attempt owning the transport.
        attempt: u64,
        /// Error that ended the transport, if any.
        error: Option<io::Error>,
    },
}

impl LinkEvent {
    /// Connect attempt this event belongs to.
    #[must_use]
    pub fn attempt(&self) -> u64 {
        match self {
            Self::Opened { attempt, .. }
            | Self::ConnectFailed { attempt, .. }
            | Self::Data { attempt, .. }
            | Self::Closed { attempt, .. } => *attempt,
        }
    }
}

impl fmt::Debug for LinkEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Opened { attempt, .. } => {
                f.debug_struct("Opened").field("attempt", attempt).finish_non_exhaustive()
            }
            Self::ConnectFailed { attempt, error } => f
                .debug_struct("ConnectFailed")
                .field("attempt", attempt)
                .field("error", error)
                .finish(),
            Self::Data { attempt, chunk } => f
                .debug_struct("Data")
                .field("attempt", attempt)
                .field("len", &chunk.len())
                .finish(),
            Self::Closed { attempt, error } => f
                .debug_struct("Closed")
                .field("attempt", attempt)
                .field("error", error)
                .finish(),
        }
    }
}

/// Signal emitted by the connection manager to the correlation engine.
#[derive(Debug)]
pub enum LinkSignal {
    /// A new transport became usable. Emitted before any of its frames.
    Connected,
    /// The transport was torn down or a connect attempt failed.
    Disconnected {
        /// Error that caused the disconnect, if any.
        error: Option<io::Error>,
    },
    /// One complete frame, in byte-arrival order.
    Frame(Bytes),
}
