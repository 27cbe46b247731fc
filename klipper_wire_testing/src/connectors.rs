//! [`Connector`] implementations backed by in-memory streams.

use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use klipper_wire::{Connector, transport::BoxedStream};
use tokio::{io::duplex, sync::mpsc};

use crate::FakeKlipper;

const PIPE_CAPACITY: usize = 64 * 1024;

/// Connector producing one duplex pipe per attempt.
///
/// The server end of every pipe is queued on the [`FakeKlipperQueue`]
/// returned by [`DuplexConnector::new`].
#[derive(Clone)]
pub struct DuplexConnector {
    label: String,
    servers: mpsc::UnboundedSender<FakeKlipper>,
    attempts: Arc<AtomicUsize>,
}

impl DuplexConnector {
    /// Create a connector labelled `label` in log lines.
    #[must_use]
    pub fn new(label: impl Into<String>) -> (Self, FakeKlipperQueue) {
        let (servers, queue) = mpsc::unbounded_channel();
        let connector = Self {
            label: label.into(),
            servers,
            attempts: Arc::new(AtomicUsize::new(0)),
        };
        (connector, FakeKlipperQueue { queue })
    }

    /// Number of connect attempts so far.
    #[must_use]
    pub fn attempts(&self) -> usize { self.attempts.load(Ordering::SeqCst) }
}

#[async_trait]
impl Connector for DuplexConnector {
    async fn connect(&self) -> io::Result<BoxedStream> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let (client, server) = duplex(PIPE_CAPACITY);
        self.servers
            .send(FakeKlipper::new(server))
            .map_err(|_| io::Error::from(io::ErrorKind::ConnectionRefused))?;
        Ok(Box::new(client))
    }

    fn describe(&self) -> String { format!("duplex://{}", self.label) }
}

/// Server ends produced by a [`DuplexConnector`], in connect order.
pub struct FakeKlipperQueue {
    queue: mpsc::UnboundedReceiver<FakeKlipper>,
}

impl FakeKlipperQueue {
    /// Wait for the client's next connection.
    ///
    /// # Panics
    ///
    /// Panics if the connector was dropped.
    pub async fn accept(&mut self) -> FakeKlipper {
        self.queue.recv().await.expect("connector dropped")
    }

    /// Take an already established connection without waiting.
    pub fn try_accept(&mut self) -> Option<FakeKlipper> { self.queue.try_recv().ok() }
}

/// Connector whose every attempt is refused.
#[derive(Clone)]
pub struct FailingConnector {
    label: String,
    attempts: Arc<AtomicUsize>,
}

impl FailingConnector {
    /// Create a connector labelled `label` in log lines.
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            attempts: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of connect attempts so far.
    #[must_use]
    pub fn attempts(&self) -> usize { self.attempts.load(Ordering::SeqCst) }
}

#[async_trait]
impl Connector for FailingConnector {
    async fn connect(&self) -> io::Result<BoxedStream> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(io::Error::new(
            io::ErrorKind::ConnectionRefused,
            format!("{} refused the connection", self.label),
        ))
    }

    fn describe(&self) -> String { format!("refused://{}", self.label) }
}
