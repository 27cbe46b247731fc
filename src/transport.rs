//! Transport factories for the Klipper API socket.
//!
//! The connection manager never opens sockets itself. It asks a
//! [`Connector`] for a fresh duplex byte stream on every connect attempt,
//! which lets tests substitute in-memory streams for the real socket.

use std::{
    io,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpStream, UnixStream},
};

/// Trait alias for byte streams a [`Connector`] may produce.
pub trait LinkStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T> LinkStream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// Boxed stream handed to the connection manager.
pub type BoxedStream = Box<dyn LinkStream>;

/// Factory producing one duplex stream per connect attempt.
///
/// Implementations must be cancellation-safe: the connection manager drops
/// a pending `connect()` future when the client stops.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a new stream to the server.
    async fn connect(&self) -> io::Result<BoxedStream>;

    /// Human readable address used in log lines.
    fn describe(&self) -> String;
}

/// Connects to Klipper's API Unix domain socket.
#[derive(Clone, Debug)]
pub struct UnixConnector {
    path: PathBuf,
}

impl UnixConnector {
    /// Create a connector for the socket at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self { Self { path: path.into() } }

    /// Path this connector opens.
    #[must_use]
    pub fn path(&self) -> &Path { &self.path }
}

#[async_trait]
impl Connector for UnixConnector {
    async fn connect(&self) -> io::Result<BoxedStream> {
        let stream = UnixStream::connect(&self.path).await?;
        Ok(Box::new(stream))
    }

    fn describe(&self) -> String { self.path.display().to_string() }
}

/// Connects to a Klipper API socket exposed over TCP, for example through
/// `socat` on a remote host.
#[derive(Clone, Debug)]
pub struct TcpConnector {
    address: String,
}

impl TcpConnector {
    /// Create a connector for `address` in `host:port` form.
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> io::Result<BoxedStream> {
        let stream = TcpStream::connect(self.address.as_str()).await?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }

    fn describe(&self) -> String { format!("tcp://{}", self.address) }
}
