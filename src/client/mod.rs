//! Public handle to a Klipper API connection.
//!
//! [`KlipperClient`] is a cheap, cloneable handle onto a background driver
//! task that owns the connection manager and the correlation engine. The
//! driver is spawned idle by [`ClientBuilder::build`] and starts connecting
//! on [`KlipperClient::start`]. From then on it reconnects forever until
//! [`KlipperClient::stop`].
//!
//! ```no_run
//! use klipper_wire::{client::KlipperClient, protocol::Object};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let client = KlipperClient::builder().build();
//! client.start();
//! let outcome = client.call_default("info", Object::new()).await;
//! if !outcome.is_result() {
//!     outcome.log_failure("info");
//! }
//! client.shutdown().await;
//! # }
//! ```

mod builder;
mod driver;
pub(crate) mod subscription;

use std::{future::Future, time::Duration};

pub use builder::ClientBuilder;
use driver::Command;
pub use subscription::Subscription;
use serde::de::DeserializeOwned;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    connection::ReconnectStatus,
    endpoints::{ObjectsQuery, ObjectsSubscription},
    protocol::{CallOutcome, Object},
};

/// Link transition announced through [`KlipperClient::link_events`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkStatus {
    /// A transport opened. Calls issued from now on can be sent.
    Connected,
    /// A transport closed or a connect attempt failed. Every call pending on
    /// the link has already been resolved.
    Disconnected,
}

/// Handle to a Klipper API connection.
#[derive(Clone, Debug)]
pub struct KlipperClient {
    commands: mpsc::UnboundedSender<Command>,
    status: broadcast::Sender<LinkStatus>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    call_timeout: Duration,
}

impl KlipperClient {
    /// Start building a client.
    #[must_use]
    pub fn builder() -> ClientBuilder { ClientBuilder::new() }

    /// Begin connecting. Calling it again, or after [`stop`](Self::stop),
    /// has no effect.
    pub fn start(&self) { let _ = self.commands.send(Command::Start); }

    /// Close the link and stop reconnecting for good.
    ///
    /// Pending calls resolve, subscriptions end, and later calls resolve
    /// [`CallOutcome::Disconnected`]. Safe to call repeatedly.
    pub fn stop(&self) { self.shutdown.cancel(); }

    /// Stop and wait until every background task has exited.
    pub async fn shutdown(&self) {
        self.stop();
        self.tracker.close();
        self.tracker.wait().await;
    }

    /// Returns `true` once [`stop`](Self::stop) was called.
    #[must_use]
    pub fn is_stopped(&self) -> bool { self.shutdown.is_cancelled() }

    /// Call `method` and wait for its outcome, at most `timeout`.
    pub async fn call(
        &self,
        method: impl Into<String>,
        params: Object,
        timeout: Duration,
    ) -> CallOutcome {
        let (reply, outcome) = oneshot::channel();
        let command = Command::Call {
            method: method.into(),
            params,
            timeout,
            reply,
        };
        if self.commands.send(command).is_err() {
            return CallOutcome::Disconnected;
        }
        outcome.await.unwrap_or(CallOutcome::Disconnected)
    }

    /// Call `method` with the configured default timeout.
    pub async fn call_default(&self, method: impl Into<String>, params: Object) -> CallOutcome {
        self.call(method, params, self.call_timeout).await
    }

    /// Open a push channel for `method`.
    ///
    /// The subscribe call is issued in the background; the returned stream
    /// ends if it fails or when the connection drops.
    pub fn subscribe(&self, method: impl Into<String>, params: Object) -> Subscription {
        let (sink, subscription) = Subscription::channel();
        let _ = self.commands.send(Command::Subscribe {
            method: method.into(),
            params,
            sink,
        });
        subscription
    }

    /// Subscribe to printer object updates with a typed status payload.
    pub fn subscribe_objects<S>(&self, query: &ObjectsQuery) -> ObjectsSubscription<S>
    where
        S: DeserializeOwned,
    {
        ObjectsSubscription::new(self.subscribe(ObjectsQuery::SUBSCRIBE_METHOD, query.to_params()))
    }

    /// Tear down the open transport; a new attempt follows after the
    /// reconnect delay.
    pub async fn force_reconnect(&self) -> ReconnectStatus {
        let (reply, status) = oneshot::channel();
        if self.commands.send(Command::ForceReconnect { reply }).is_err() {
            return ReconnectStatus::AlreadyDisconnected;
        }
        status.await.unwrap_or(ReconnectStatus::AlreadyDisconnected)
    }

    /// Receive link transitions from now on.
    #[must_use]
    pub fn link_events(&self) -> broadcast::Receiver<LinkStatus> { self.status.subscribe() }

    /// Spawn `task` on the client's task tracker, cancelled when the client
    /// stops.
    pub(crate) fn spawn_tracked<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let shutdown = self.shutdown.clone();
        self.tracker.spawn(async move {
            let _ = shutdown.run_until_cancelled(task).await;
        });
    }
}
