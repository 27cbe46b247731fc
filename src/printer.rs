//! Printer-level conveniences built on [`KlipperClient`].
//!
//! [`PrinterAttribute`] holds the last known value of one printer
//! attribute and forgets it whenever the link drops. The status structs
//! mirror common `objects/subscribe` queries, and [`announce`] identifies
//! the application to Klipper on every connect.

use std::{sync::Arc, time::Duration};

use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::{broadcast::error::RecvError, watch};
use tracing::info;

use crate::{
    client::{KlipperClient, LinkStatus},
    protocol::{CallOutcome, Object},
};

/// Timeout for the `info` call issued by [`announce`].
pub const INFO_TIMEOUT: Duration = Duration::from_millis(1000);

/// Last known value of a printer attribute.
///
/// Consecutive equal values are published once. Receivers always see the
/// latest value first, and `None` while the value is unknown.
///
/// # Examples
///
/// ```
/// use klipper_wire::printer::PrinterAttribute;
///
/// let state = PrinterAttribute::new();
/// let mut seen = state.subscribe();
/// state.set("ready".to_owned());
/// assert!(seen.has_changed().unwrap_or(false));
/// assert_eq!(*seen.borrow_and_update(), Some("ready".to_owned()));
///
/// state.set("ready".to_owned());
/// assert!(!seen.has_changed().unwrap_or(true));
/// ```
#[derive(Debug)]
pub struct PrinterAttribute<T> {
    value: Arc<watch::Sender<Option<T>>>,
}

impl<T> Clone for PrinterAttribute<T> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
        }
    }
}

impl<T> Default for PrinterAttribute<T> {
    fn default() -> Self {
        Self {
            value: Arc::new(watch::Sender::new(None)),
        }
    }
}

impl<T> PrinterAttribute<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Create an attribute with an unknown value.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Record a new value; equal to the current one means no notification.
    pub fn set(&self, value: T) {
        self.value.send_if_modified(|current| {
            if current.as_ref() == Some(&value) {
                return false;
            }
            *current = Some(value);
            true
        });
    }

    /// Forget the current value.
    pub fn reset(&self) {
        self.value.send_if_modified(|current| current.take().is_some());
    }

    /// Current value, if known.
    #[must_use]
    pub fn get(&self) -> Option<T> { self.value.borrow().clone() }

    /// Observe the value.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<T>> { self.value.subscribe() }

    /// Reset the value whenever `client`'s link disconnects.
    ///
    /// The watcher runs on the client's task tracker until the client stops,
    /// and forgets the value when it exits.
    pub fn track(&self, client: &KlipperClient) {
        let attribute = ResetOnDrop(self.clone());
        let mut events = client.link_events();
        client.spawn_tracked(async move {
            loop {
                match events.recv().await {
                    Ok(LinkStatus::Disconnected) => attribute.0.reset(),
                    Ok(LinkStatus::Connected) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }
}

/// Forgets the wrapped attribute's value when dropped, including when the
/// owning task is cancelled.
struct ResetOnDrop<T>(PrinterAttribute<T>)
where
    T: Clone + PartialEq + Send + Sync + 'static;

impl<T> Drop for ResetOnDrop<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn drop(&mut self) { self.0.reset(); }
}

/// `toolhead` attributes commonly watched.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct ToolheadStatus {
    /// Homed axes, such as `"xyz"`.
    pub homed_axes: Option<String>,
}

/// Attributes of a heater such as `extruder` or `heater_bed`.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct HeaterStatus {
    /// Measured temperature in degrees Celsius.
    pub temperature: Option<f64>,
    /// Target temperature in degrees Celsius.
    pub target: Option<f64>,
}

/// `webhooks` attributes describing Klipper's own state.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct WebhooksStatus {
    /// `ready`, `startup`, `shutdown` or `error`.
    pub state: Option<String>,
    /// Human readable explanation of `state`.
    pub state_message: Option<String>,
}

/// Identify this application to Klipper on every connect.
///
/// Subscribes to link events immediately, so call it before
/// [`KlipperClient::start`] to catch the first connect.
pub fn announce(client: &KlipperClient, name: impl Into<String>, version: impl Into<String>) {
    let params = info_params(&name.into(), &version.into());
    let caller = client.clone();
    let mut events = client.link_events();
    client.spawn_tracked(async move {
        loop {
            match events.recv().await {
                Ok(LinkStatus::Connected) => {
                    let outcome = caller.call("info", params.clone(), INFO_TIMEOUT).await;
                    log_info_outcome(&outcome);
                }
                Ok(LinkStatus::Disconnected) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
    });
}

fn info_params(name: &str, version: &str) -> Object {
    let mut params = Object::new();
    params.insert(
        "client_info".to_owned(),
        json!({ "name": name, "version": version }),
    );
    params
}

fn log_info_outcome(outcome: &CallOutcome) {
    match outcome {
        CallOutcome::Result(result) => {
            let version = result
                .get("software_version")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            info!(software_version = version, "connected to klipper");
        }
        failure => failure.log_failure("info"),
    }
}
