//! Request/response correlation and subscription multiplexing.
//!
//! The [`Correlator`] turns the frames produced by the connection manager
//! into exactly-once call outcomes and into subscription pushes. It owns
//! the pending-call map, the subscription map, the per-call timeouts and
//! the stall watchdog. Everything runs on the driver task, so none of this
//! state is shared or locked.

mod id;
mod message;
mod outcome;

use std::{
    collections::HashMap,
    future::poll_fn,
    pin::Pin,
    time::Duration,
};

use bytes::Bytes;
pub use id::IdGenerator;
pub use message::SUBSCRIPTION_TAG_KEY;
pub use outcome::{CallOutcome, NoReplyReason};
use serde_json::Value;
use tokio::{
    sync::oneshot,
    time::{Instant, Sleep, sleep},
};
use tokio_util::time::{DelayQueue, delay_queue};
use tracing::{debug, error, warn};

use crate::{
    client::subscription::{Subscription, UpdateSink},
    connection::{Link, LinkSignal, ReconnectStatus, SendStatus},
    metrics::{self, Direction},
};

/// JSON object as exchanged with Klipper.
pub type Object = serde_json::Map<String, Value>;

/// Lifecycle of a registered subscription.
///
/// Ended subscriptions are removed from the registry, so only the two live
/// states are represented.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriptionState {
    /// The subscribe call is still in flight.
    Pending,
    /// The subscribe call succeeded; pushes are being delivered.
    Active,
}

/// Timer that fired inside the correlator.
#[derive(Debug, PartialEq, Eq)]
pub enum Timer {
    /// The call with this id reached its timeout.
    Expired(String),
    /// No frame arrived within the inactivity window.
    Stall,
}

enum Completion {
    Caller(oneshot::Sender<CallOutcome>),
    Subscribe { tag: String },
}

struct PendingCall {
    method: String,
    timeout: Duration,
    completion: Completion,
    key: delay_queue::Key,
}

struct SubscriptionEntry {
    method: String,
    sink: UpdateSink,
    state: SubscriptionState,
}

/// Correlation engine state.
pub struct Correlator {
    ids: IdGenerator,
    pending: HashMap<String, PendingCall>,
    subscriptions: HashMap<String, SubscriptionEntry>,
    timeouts: DelayQueue<String>,
    subscribe_timeout: Duration,
    max_inactivity: Duration,
    watchdog: Option<Pin<Box<Sleep>>>,
}

impl Correlator {
    /// Create an engine with an idle watchdog.
    #[must_use]
    pub fn new(ids: IdGenerator, subscribe_timeout: Duration, max_inactivity: Duration) -> Self {
        Self {
            ids,
            pending: HashMap::new(),
            subscriptions: HashMap::new(),
            timeouts: DelayQueue::new(),
            subscribe_timeout,
            max_inactivity,
            watchdog: None,
        }
    }

    /// Number of calls awaiting a reply.
    #[must_use]
    pub fn pending_calls(&self) -> usize { self.pending.len() }

    /// Number of registered subscriptions.
    #[must_use]
    pub fn subscriptions(&self) -> usize { self.subscriptions.len() }

    /// State of the subscription registered under `tag`, if it is still live.
    #[must_use]
    pub fn subscription_state(&self, tag: &str) -> Option<SubscriptionState> {
        self.subscriptions.get(tag).map(|entry| entry.state)
    }

    /// Start the stall watchdog. It keeps firing every inactivity window
    /// without frames until [`Correlator::shutdown`].
    pub fn arm_watchdog(&mut self) {
        self.watchdog = Some(Box::pin(sleep(self.max_inactivity)));
    }

    /// Send a call and register it until a reply, its timeout or a
    /// disconnect resolves it through `reply`.
    pub fn call(
        &mut self,
        link: &mut impl Link,
        method: &str,
        params: Object,
        timeout: Duration,
        reply: oneshot::Sender<CallOutcome>,
    ) {
        self.dispatch(link, method, &params, timeout, Completion::Caller(reply));
    }

    /// Open a push channel for `method`.
    pub fn subscribe(&mut self, link: &mut impl Link, method: &str, params: Object) -> Subscription {
        let (sink, subscription) = Subscription::channel();
        self.subscribe_with(link, method, params, sink);
        subscription
    }

    /// Open a push channel for `method`, delivering into `sink`.
    pub(crate) fn subscribe_with(
        &mut self,
        link: &mut impl Link,
        method: &str,
        params: Object,
        sink: UpdateSink,
    ) {
        let tag = self.ids.next_id();
        self.subscriptions.insert(
            tag.clone(),
            SubscriptionEntry {
                method: method.to_owned(),
                sink,
                state: SubscriptionState::Pending,
            },
        );
        let params = message::with_response_template(params, &tag);
        self.dispatch(
            link,
            method,
            &params,
            self.subscribe_timeout,
            Completion::Subscribe { tag },
        );
    }

    /// Apply a signal from the connection manager.
    pub fn on_signal(&mut self, signal: LinkSignal) {
        match signal {
            LinkSignal::Connected => self.rearm_watchdog(),
            LinkSignal::Disconnected { .. } => self.fail_all(),
            LinkSignal::Frame(frame) => self.on_frame(&frame),
        }
    }

    /// Resolve the call `id` with a timeout, if it is still pending.
    pub fn expire(&mut self, id: &str) {
        let Some(call) = self.pending.remove(id) else {
            return;
        };
        debug!(
            id,
            method = %call.method,
            timeout_ms = %call.timeout.as_millis(),
            "call timed out"
        );
        self.complete(&call.method, call.completion, CallOutcome::NoReply(NoReplyReason::Timeout));
        metrics::set_pending_calls(self.pending.len());
    }

    /// React to the stall watchdog firing: tear the link down and re-arm.
    pub fn on_stall(&mut self, link: &mut impl Link) {
        self.rearm_watchdog();
        if link.force_reconnect() == ReconnectStatus::Reconnecting {
            warn!(
                max_inactivity_ms = %self.max_inactivity.as_millis(),
                "klipper stopped answering; forcing reconnect"
            );
        }
    }

    /// Wait for the next call timeout or watchdog firing.
    ///
    /// Cancellation safe: dropping the future loses no timer.
    pub async fn next_timer(&mut self) -> Timer {
        let timeouts = &mut self.timeouts;
        let watchdog = &mut self.watchdog;
        tokio::select! {
            Some(expired) = poll_fn(|cx| timeouts.poll_expired(cx)), if !timeouts.is_empty() => {
                Timer::Expired(expired.into_inner())
            }
            () = async {
                match watchdog.as_mut() {
                    Some(watchdog) => watchdog.as_mut().await,
                    None => std::future::pending().await,
                }
            } => Timer::Stall,
        }
    }

    /// Stop the watchdog and resolve everything still outstanding.
    pub fn shutdown(&mut self) {
        self.watchdog = None;
        self.fail_all();
    }

    fn dispatch(
        &mut self,
        link: &mut impl Link,
        method: &str,
        params: &Object,
        timeout: Duration,
        completion: Completion,
    ) {
        let id = self.ids.next_id();
        let frame: Bytes = match message::encode_request(&id, method, params) {
            Ok(frame) => frame,
            Err(error) => {
                error!(method, error = %error, "unable to encode request");
                self.complete(method, completion, CallOutcome::Disconnected);
                return;
            }
        };
        let length = frame.len();
        match link.send(frame) {
            SendStatus::Sent => {}
            SendStatus::NotConnected => {
                self.complete(method, completion, CallOutcome::Disconnected);
                return;
            }
            SendStatus::TooLarge => {
                error!(method, length, "request exceeds maximum frame length");
                self.complete(method, completion, CallOutcome::Disconnected);
                return;
            }
        }

        let key = self.timeouts.insert(id.clone(), timeout);
        self.pending.insert(
            id,
            PendingCall {
                method: method.to_owned(),
                timeout,
                completion,
                key,
            },
        );
        metrics::set_pending_calls(self.pending.len());
    }

    fn complete(&mut self, method: &str, completion: Completion, outcome: CallOutcome) {
        metrics::inc_call_outcome(outcome.kind());
        match completion {
            Completion::Caller(reply) => {
                let _ = reply.send(outcome);
            }
            Completion::Subscribe { tag } => {
                if outcome.is_result() {
                    if let Some(entry) = self.subscriptions.get_mut(&tag) {
                        entry.state = SubscriptionState::Active;
                    }
                } else {
                    error!(method, reason = %outcome, "unable to subscribe");
                    self.subscriptions.remove(&tag);
                }
            }
        }
    }

    fn on_frame(&mut self, frame: &[u8]) {
        metrics::inc_frames(Direction::Inbound);
        self.rearm_watchdog();

        let object = match serde_json::from_slice::<Value>(frame) {
            Ok(Value::Object(object)) => object,
            Ok(_) => {
                unrecognized(frame);
                return;
            }
            Err(error) => {
                error!(
                    error = %error,
                    frame = %String::from_utf8_lossy(frame),
                    "unable to parse frame as JSON"
                );
                return;
            }
        };

        if let Some(call) = message::frame_id(&object).and_then(|id| self.pending.remove(id)) {
            let _ = self.timeouts.try_remove(&call.key);
            let outcome = message::reply_outcome(object);
            if outcome == CallOutcome::NoReply(NoReplyReason::StrangeResponse) {
                error!(
                    method = %call.method,
                    frame = %String::from_utf8_lossy(frame),
                    "strange response from klipper"
                );
            }
            self.complete(&call.method, call.completion, outcome);
            metrics::set_pending_calls(self.pending.len());
            return;
        }

        if let Some((tag, params)) = message::into_push(object)
            && let Some(entry) = self.subscriptions.get(&tag)
        {
            if entry.sink.send(params).is_err() {
                debug!(tag = %tag, method = %entry.method, "subscription receiver dropped");
                self.subscriptions.remove(&tag);
            }
            return;
        }

        unrecognized(frame);
    }

    fn fail_all(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        self.timeouts.clear();
        for call in pending.into_values() {
            self.complete(
                &call.method,
                call.completion,
                CallOutcome::NoReply(NoReplyReason::Disconnected),
            );
        }
        self.subscriptions.clear();
        metrics::set_pending_calls(0);
    }

    fn rearm_watchdog(&mut self) {
        if let Some(watchdog) = self.watchdog.as_mut() {
            watchdog.as_mut().reset(Instant::now() + self.max_inactivity);
        }
    }
}

fn unrecognized(frame: &[u8]) {
    error!(
        frame = %String::from_utf8_lossy(frame),
        "unrecognized frame from klipper"
    );
}

#[cfg(test)]
mod tests;
