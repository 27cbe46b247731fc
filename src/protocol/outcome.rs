//! Typed outcome of a call.

use std::fmt;

use serde_json::Value;
use tracing::error;

use super::Object;

/// Why a sent call produced no usable reply.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NoReplyReason {
    /// No reply arrived within the call's timeout.
    Timeout,
    /// The connection dropped while the call was pending.
    Disconnected,
    /// A reply arrived but carried neither a `result` nor an `error` object.
    StrangeResponse,
}

impl fmt::Display for NoReplyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Timeout => "Timeout",
            Self::Disconnected => "Disconnected",
            Self::StrangeResponse => "Strange response",
        })
    }
}

impl fmt::Display for CallOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Result(_) => f.write_str("result"),
            Self::ProtocolError(details) => {
                write!(f, "protocol error: {}", Value::Object(details.clone()))
            }
            Self::NoReply(reason) => write!(f, "no reply: {reason}"),
            Self::Disconnected => f.write_str("disconnected"),
        }
    }
}

/// Resolution of a single call. Every call resolves exactly once.
///
/// # Examples
///
/// ```
/// use klipper_wire::protocol::{CallOutcome, NoReplyReason};
///
/// let outcome = CallOutcome::NoReply(NoReplyReason::Disconnected);
/// assert!(outcome.is_disconnected());
/// assert!(outcome.into_result().is_none());
/// ```
#[derive(Clone, Debug, PartialEq)]
pub enum CallOutcome {
    /// The server answered with a `result` object.
    Result(Object),
    /// The server answered with an `error` object.
    ProtocolError(Object),
    /// The call was sent but no usable reply was received.
    NoReply(NoReplyReason),
    /// The call was never sent because no transport was open.
    Disconnected,
}

impl CallOutcome {
    /// Returns `true` for a successful reply.
    #[must_use]
    pub fn is_result(&self) -> bool { matches!(self, Self::Result(_)) }

    /// Returns `true` if the call failed because the link was down, whether
    /// it was never sent or the link dropped while it was pending.
    #[must_use]
    pub fn is_disconnected(&self) -> bool {
        matches!(
            self,
            Self::Disconnected | Self::NoReply(NoReplyReason::Disconnected)
        )
    }

    /// Take the result payload, discarding any failure.
    #[must_use]
    pub fn into_result(self) -> Option<Object> {
        match self {
            Self::Result(result) => Some(result),
            _ => None,
        }
    }

    /// Short outcome name used in log fields and metric labels.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Result(_) => "result",
            Self::ProtocolError(_) => "protocol_error",
            Self::NoReply(_) => "no_reply",
            Self::Disconnected => "disconnected",
        }
    }

    /// Emit one structured error line describing a failed call to `method`.
    ///
    /// Does nothing for [`CallOutcome::Result`].
    pub fn log_failure(&self, method: &str) {
        match self {
            Self::Result(_) => {}
            Self::ProtocolError(details) => error!(
                method,
                outcome = self.kind(),
                reason = %serde_json::Value::Object(details.clone()),
                "request failed"
            ),
            Self::NoReply(reason) => error!(
                method,
                outcome = self.kind(),
                reason = %reason,
                "request failed"
            ),
            Self::Disconnected => error!(
                method,
                outcome = self.kind(),
                reason = "klipper API socket is disconnected",
                "request failed"
            ),
        }
    }
}
