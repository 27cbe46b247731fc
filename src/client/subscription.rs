//! Push channel returned by [`KlipperClient::subscribe`](super::KlipperClient::subscribe).

use std::{
    pin::Pin,
    task::{Context, Poll},
};

use futures::Stream;
use tokio::sync::mpsc;

use crate::protocol::Object;

/// Sending half of a subscription, held by the correlation engine.
pub(crate) type UpdateSink = mpsc::UnboundedSender<Object>;

/// Stream of payloads pushed by Klipper for one subscription.
///
/// The stream yields the `params` object of every push tagged with this
/// subscription and ends, without error, when the subscribe call fails or
/// the connection drops. Dropping it unregisters the subscription the next
/// time Klipper pushes to it.
#[derive(Debug)]
pub struct Subscription {
    updates: mpsc::UnboundedReceiver<Object>,
}

impl Subscription {
    pub(crate) fn channel() -> (UpdateSink, Self) {
        let (sink, updates) = mpsc::unbounded_channel();
        (sink, Self { updates })
    }

    /// Wait for the next pushed payload; `None` once the subscription ended.
    pub async fn next_update(&mut self) -> Option<Object> { self.updates.recv().await }

    /// Returns `true` once the subscription ended and every buffered update
    /// was consumed.
    #[must_use]
    pub fn is_ended(&self) -> bool { self.updates.is_closed() && self.updates.is_empty() }
}

impl Stream for Subscription {
    type Item = Object;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.updates.poll_recv(cx)
    }
}
