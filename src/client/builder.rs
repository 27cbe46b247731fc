//! Builder for [`KlipperClient`].

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{Instrument, info_span};

use super::{KlipperClient, driver::Driver};
use crate::{
    config::ClientConfig,
    connection::ConnectionManager,
    protocol::{Correlator, IdGenerator},
    transport::{Connector, UnixConnector},
};

const STATUS_CAPACITY: usize = 16;

/// Builder for [`KlipperClient`].
///
/// Without an explicit connector the client connects to the Unix socket at
/// [`ClientConfig::socket_path`].
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
///
/// use klipper_wire::{client::KlipperClient, config::ClientConfig, transport::TcpConnector};
///
/// # #[tokio::main]
/// # async fn main() {
/// let client = KlipperClient::builder()
///     .config(ClientConfig::default().with_reconnect_delay(Duration::from_millis(500)))
///     .connector(TcpConnector::new("printer.local:7125"))
///     .build();
/// client.start();
/// # }
/// ```
#[derive(Default)]
pub struct ClientBuilder {
    config: ClientConfig,
    connector: Option<Arc<dyn Connector>>,
    ids: Option<IdGenerator>,
}

impl ClientBuilder {
    /// Create a builder with default configuration.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Replace the configuration.
    #[must_use]
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config.normalized();
        self
    }

    /// Use `connector` to open transports.
    #[must_use]
    pub fn connector(mut self, connector: impl Connector + 'static) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    /// Use a fixed id generator instead of a random base.
    #[must_use]
    pub fn id_generator(mut self, ids: IdGenerator) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Spawn the idle driver task and return its handle.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn build(self) -> KlipperClient {
        let Self {
            config,
            connector,
            ids,
        } = self;
        let connector: Arc<dyn Connector> = match connector {
            Some(connector) => connector,
            None => Arc::new(UnixConnector::new(config.socket_path())),
        };
        let ids = ids.unwrap_or_else(|| IdGenerator::new(config.id_base_len()));

        let shutdown = CancellationToken::new();
        let tracker = TaskTracker::new();
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (events_tx, events) = mpsc::unbounded_channel();
        let (status, _) = broadcast::channel(STATUS_CAPACITY);

        let span = info_span!("klipper_link", address = %connector.describe());
        let driver = Driver {
            link: ConnectionManager::new(
                connector,
                config.reconnect_delay(),
                config.max_frame_length(),
                events_tx,
                shutdown.clone(),
                tracker.clone(),
            ),
            correlator: Correlator::new(ids, config.subscribe_timeout(), config.max_inactivity()),
            commands,
            events,
            status: status.clone(),
            shutdown: shutdown.clone(),
        };
        tracker.spawn(driver.run().instrument(span));

        KlipperClient {
            commands: commands_tx,
            status,
            shutdown,
            tracker,
            call_timeout: config.call_timeout(),
        }
    }
}
