#![doc(html_root_url = "https://docs.rs/klipper-wire/latest")]
//! Public API for the `klipper-wire` library.
//!
//! This crate talks to Klipper's API socket: separator-framed JSON requests
//! with id correlation, push subscriptions, automatic reconnection and a
//! stall watchdog.

pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod endpoints;
pub mod metrics;
pub mod printer;
pub mod protocol;
pub mod transport;

pub use client::{ClientBuilder, KlipperClient, LinkStatus, Subscription};
pub use codec::{FrameBuffer, SEPARATOR, SeparatorCodec};
pub use config::{ClientConfig, ConfigError};
pub use connection::{ReconnectStatus, SendStatus};
pub use endpoints::{ObjectsQuery, ObjectsSubscription, ObjectsUpdate};
pub use metrics::{CALL_OUTCOMES_TOTAL, Direction, FRAMES_TOTAL, PENDING_CALLS, RECONNECTS_TOTAL};
pub use printer::PrinterAttribute;
pub use protocol::{CallOutcome, IdGenerator, NoReplyReason, Object};
pub use transport::{Connector, TcpConnector, UnixConnector};
