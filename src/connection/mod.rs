//! Connection manager for the Klipper API socket.
//!
//! The manager owns at most one transport at a time and runs the
//! connect, stream, disconnect, wait, reconnect loop until stopped. It is a
//! plain state machine: the driver feeds it [`LinkEvent`]s from the helper
//! tasks it spawned and drains the resulting [`LinkSignal`]s with
//! [`ConnectionManager::next_signal`]. Transport faults never escape as
//! errors; they become a [`LinkSignal::Disconnected`] followed by a fresh
//! attempt after the fixed reconnect delay.

mod event;
mod io;
mod state;

use std::{collections::VecDeque, sync::Arc, time::Duration};

use bytes::Bytes;
pub use event::{LinkEvent, LinkSignal};
use state::LinkState;
use tokio::sync::mpsc;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{Instrument, debug, error, info};

use crate::{
    codec::FrameBuffer,
    metrics::{self, Direction},
    transport::{BoxedStream, Connector},
};

/// Result of [`Link::send`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendStatus {
    /// The payload was queued on the open transport.
    Sent,
    /// No transport is open; nothing was queued.
    NotConnected,
    /// The payload exceeds the maximum frame length; nothing was queued and
    /// the transport stays up.
    TooLarge,
}

/// Result of [`Link::force_reconnect`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconnectStatus {
    /// An open transport was torn down; a new attempt follows after the delay.
    Reconnecting,
    /// No transport was open, so nothing was torn down.
    AlreadyDisconnected,
}

/// Outbound half of a link, as seen by the correlation engine.
pub trait Link {
    /// Write one frame if a transport is open.
    fn send(&mut self, frame: Bytes) -> SendStatus;

    /// Tear down the open transport, if any.
    fn force_reconnect(&mut self) -> ReconnectStatus;
}

/// Owner of the single logical connection to Klipper.
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    address: String,
    reconnect_delay: Duration,
    max_frame_length: usize,
    state: LinkState,
    buffer: FrameBuffer,
    signals: VecDeque<LinkSignal>,
    attempts: u64,
    events: mpsc::UnboundedSender<LinkEvent>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl ConnectionManager {
    /// Create an idle manager.
    ///
    /// Helper tasks post their events to `events`, are spawned on `tracker`
    /// and are cancelled together with `shutdown`.
    #[must_use]
    pub fn new(
        connector: Arc<dyn Connector>,
        reconnect_delay: Duration,
        max_frame_length: usize,
        events: mpsc::UnboundedSender<LinkEvent>,
        shutdown: CancellationToken,
        tracker: TaskTracker,
    ) -> Self {
        let address = connector.describe();
        Self {
            connector,
            address,
            reconnect_delay,
            max_frame_length,
            state: LinkState::Idle,
            buffer: FrameBuffer::new(max_frame_length),
            signals: VecDeque::new(),
            attempts: 0,
            events,
            shutdown,
            tracker,
        }
    }

    /// Address of the server, as described by the connector.
    #[must_use]
    pub fn address(&self) -> &str { &self.address }

    /// Returns `true` while a transport is open.
    #[must_use]
    pub fn is_connected(&self) -> bool { matches!(self.state, LinkState::Open { .. }) }

    /// Number of connect attempts made so far.
    #[must_use]
    pub fn attempts(&self) -> u64 { self.attempts }

    /// Begin connecting immediately. No-op unless the manager is idle.
    ///
    /// Returns whether this call started the manager.
    pub fn start(&mut self) -> bool {
        if !matches!(self.state, LinkState::Idle) {
            return false;
        }
        self.schedule_attempt(None);
        true
    }

    /// Cancel any pending attempt, close the open transport and stop
    /// reconnecting for good. Safe to call in any state.
    pub fn stop(&mut self) {
        match std::mem::replace(&mut self.state, LinkState::Stopped) {
            LinkState::Open { cancel, .. } => {
                cancel.cancel();
                self.buffer.clear();
                info!(address = %self.address, "klipper API socket closed");
                self.signals.push_back(LinkSignal::Disconnected { error: None });
            }
            LinkState::Connecting { cancel, .. } => cancel.cancel(),
            LinkState::Idle | LinkState::Stopped => {}
        }
    }

    /// Apply an event reported by a helper task.
    ///
    /// Events from superseded attempts are dropped.
    pub fn handle_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Opened { attempt, stream } if self.state.awaits_connect(attempt) => {
                self.open(attempt, stream);
            }
            LinkEvent::ConnectFailed { attempt, error } if self.state.awaits_connect(attempt) => {
                error!(
                    address = %self.address,
                    error = %error,
                    "failed to connect to klipper API socket"
                );
                self.signals.push_back(LinkSignal::Disconnected { error: Some(error) });
                self.schedule_attempt(Some(self.reconnect_delay));
            }
            LinkEvent::Data { attempt, chunk } if self.state.is_open_for(attempt) => {
                self.on_data(&chunk);
            }
            LinkEvent::Closed { attempt, error } if self.state.is_open_for(attempt) => {
                self.teardown(error);
            }
            stale => debug!(attempt = stale.attempt(), "ignoring event from a previous attempt"),
        }
    }

    /// Take the next signal for the correlation engine.
    pub fn next_signal(&mut self) -> Option<LinkSignal> { self.signals.pop_front() }

    fn schedule_attempt(&mut self, delay: Option<Duration>) {
        self.attempts += 1;
        let attempt = self.attempts;
        let cancel = self.shutdown.child_token();
        self.state = LinkState::Connecting {
            attempt,
            cancel: cancel.clone(),
        };
        if delay.is_some() {
            metrics::inc_reconnects();
        }
        self.tracker.spawn(
            io::connect_attempt(
                Arc::clone(&self.connector),
                attempt,
                delay,
                self.events.clone(),
                cancel,
            )
            .in_current_span(),
        );
    }

    fn open(&mut self, attempt: u64, stream: BoxedStream) {
        let (reader, writer) = tokio::io::split(stream);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let cancel = self.shutdown.child_token();

        self.tracker.spawn(
            io::read_loop(reader, attempt, self.events.clone(), cancel.clone()).in_current_span(),
        );
        self.tracker.spawn(
            io::write_loop(
                writer,
                self.max_frame_length,
                outbound_rx,
                attempt,
                self.events.clone(),
                cancel.clone(),
            )
            .in_current_span(),
        );

        self.state = LinkState::Open {
            attempt,
            writer: outbound_tx,
            cancel,
        };
        self.buffer.clear();
        info!(address = %self.address, "connected to klipper API socket");
        self.signals.push_back(LinkSignal::Connected);
    }

    fn on_data(&mut self, chunk: &[u8]) {
        self.buffer.extend(chunk);
        loop {
            match self.buffer.next_frame() {
                Ok(Some(frame)) => self.signals.push_back(LinkSignal::Frame(frame)),
                Ok(None) => break,
                Err(error) => {
                    self.teardown(Some(error));
                    break;
                }
            }
        }
    }

    fn teardown(&mut self, error: Option<std::io::Error>) {
        let LinkState::Open { cancel, .. } = &self.state else {
            return;
        };
        cancel.cancel();
        self.buffer.clear();
        match &error {
            Some(error) => error!(
                address = %self.address,
                error = %error,
                "klipper API socket closed with an error"
            ),
            None => info!(address = %self.address, "klipper API socket closed"),
        }
        self.signals.push_back(LinkSignal::Disconnected { error });
        self.schedule_attempt(Some(self.reconnect_delay));
    }
}

impl Link for ConnectionManager {
    fn send(&mut self, frame: Bytes) -> SendStatus {
        let LinkState::Open { writer, .. } = &self.state else {
            return SendStatus::NotConnected;
        };
        if frame.len() > self.max_frame_length {
            return SendStatus::TooLarge;
        }
        if writer.send(frame).is_err() {
            return SendStatus::NotConnected;
        }
        metrics::inc_frames(Direction::Outbound);
        SendStatus::Sent
    }

    fn force_reconnect(&mut self) -> ReconnectStatus {
        if !self.is_connected() {
            return ReconnectStatus::AlreadyDisconnected;
        }
        self.teardown(None);
        ReconnectStatus::Reconnecting
    }
}
