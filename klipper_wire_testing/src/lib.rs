//! Test doubles for driving a [`KlipperClient`](klipper_wire::KlipperClient)
//! without a printer.
//!
//! [`DuplexConnector`] hands the client in-memory streams and passes the
//! other ends to the test as [`FakeKlipper`]s, which speak the separator
//! framed JSON protocol. [`FailingConnector`] refuses every attempt.
//!
//! ```rust
//! use klipper_wire::{KlipperClient, LinkStatus, Object};
//! use klipper_wire_testing::DuplexConnector;
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let (connector, mut servers) = DuplexConnector::new("fake");
//! let client = KlipperClient::builder().connector(connector).build();
//! let mut events = client.link_events();
//! client.start();
//! assert_eq!(events.recv().await.unwrap(), LinkStatus::Connected);
//!
//! let mut klipper = servers.accept().await;
//! let call = tokio::spawn({
//!     let client = client.clone();
//!     async move { client.call_default("info", Object::new()).await }
//! });
//! let request = klipper.recv_request().await;
//! klipper.reply_result(&request, json!({"state": "ready"})).await;
//! assert!(call.await.unwrap().is_result());
//! client.shutdown().await;
//! # }
//! ```

pub mod connectors;
pub mod klipper;
pub mod logging;

pub use connectors::{DuplexConnector, FailingConnector, FakeKlipperQueue};
pub use klipper::FakeKlipper;
pub use logging::{LoggerHandle, logger};
