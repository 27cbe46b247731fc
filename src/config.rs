//! Client configuration.
//!
//! [`ClientConfig`] collects the values the connection manager and the
//! correlation engine need: where to connect, how long to wait between
//! reconnect attempts, and the timeouts guarding calls and the link as a
//! whole. Values can be set programmatically or read from the
//! `AKKI_KLIPPER_API_*` environment variables.

use std::{path::PathBuf, time::Duration};

use thiserror::Error;

use crate::codec::{DEFAULT_MAX_FRAME_LENGTH, clamp_frame_length};

/// Environment variable naming the Klipper API socket path.
pub const ENV_SOCKET_PATH: &str = "AKKI_KLIPPER_API_UDS";
/// Environment variable holding the reconnect delay in milliseconds.
pub const ENV_RECONNECT_DELAY_MS: &str = "AKKI_KLIPPER_API_RECONNECT_DELAY_MS";
/// Environment variable holding the inactivity window in milliseconds.
pub const ENV_MAX_INACTIVITY_MS: &str = "AKKI_KLIPPER_API_MAX_INACTIVITY_MS";
/// Environment variable holding the default call timeout in milliseconds.
pub const ENV_CALL_TIMEOUT_MS: &str = "AKKI_KLIPPER_API_CALL_TIMEOUT_MS";
/// Environment variable holding the subscribe timeout in milliseconds.
pub const ENV_SUBSCRIBE_TIMEOUT_MS: &str = "AKKI_KLIPPER_API_SUBSCRIBE_TIMEOUT_MS";

/// Socket path used when none is configured.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/klippy_uds";
/// Length of the random prefix shared by every call id.
pub const DEFAULT_ID_BASE_LEN: usize = 5;

const MIN_DURATION: Duration = Duration::from_millis(1);

/// Errors raised while reading configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable held something other than a millisecond count.
    #[error("invalid value {value:?} for {variable}: expected milliseconds as an unsigned integer")]
    InvalidValue {
        /// Name of the offending variable.
        variable: &'static str,
        /// Raw value as found in the environment.
        value: String,
    },
}

/// Settings for a [`KlipperClient`](crate::client::KlipperClient).
///
/// # Default Values
/// - `socket_path`: `/tmp/klippy_uds`
/// - `reconnect_delay`: 1 second
/// - `call_timeout`: 5 seconds
/// - `subscribe_timeout`: 1 second
/// - `max_inactivity`: 8 seconds
/// - `max_frame_length`: 16 MiB
/// - `id_base_len`: 5
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use klipper_wire::config::ClientConfig;
///
/// let config = ClientConfig::default()
///     .with_socket_path("/run/klipper/api")
///     .with_reconnect_delay(Duration::from_millis(250));
/// assert_eq!(config.reconnect_delay(), Duration::from_millis(250));
/// assert_eq!(config.subscribe_timeout(), Duration::from_secs(1));
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    socket_path: PathBuf,
    reconnect_delay: Duration,
    call_timeout: Duration,
    subscribe_timeout: Duration,
    max_inactivity: Duration,
    max_frame_length: usize,
    id_base_len: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            reconnect_delay: Duration::from_secs(1),
            call_timeout: Duration::from_secs(5),
            subscribe_timeout: Duration::from_secs(1),
            max_inactivity: Duration::from_secs(8),
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
            id_base_len: DEFAULT_ID_BASE_LEN,
        }
    }
}

impl ClientConfig {
    /// Read configuration from the process environment.
    ///
    /// Unset variables keep their default value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if a duration variable cannot be
    /// parsed as a millisecond count.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with(|name| std::env::var(name).ok())
    }

    /// Read configuration through `lookup` instead of the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if a duration variable cannot be
    /// parsed as a millisecond count.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    ///
    /// use klipper_wire::config::ClientConfig;
    ///
    /// let config = ClientConfig::from_env_with(|name| {
    ///     (name == "AKKI_KLIPPER_API_RECONNECT_DELAY_MS").then(|| "200".to_owned())
    /// })
    /// .expect("valid environment");
    /// assert_eq!(config.reconnect_delay(), Duration::from_millis(200));
    /// ```
    pub fn from_env_with<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(path) = lookup(ENV_SOCKET_PATH).filter(|p| !p.is_empty()) {
            config.socket_path = PathBuf::from(path);
        }
        if let Some(delay) = millis(&lookup, ENV_RECONNECT_DELAY_MS)? {
            config.reconnect_delay = delay;
        }
        if let Some(window) = millis(&lookup, ENV_MAX_INACTIVITY_MS)? {
            config.max_inactivity = window;
        }
        if let Some(timeout) = millis(&lookup, ENV_CALL_TIMEOUT_MS)? {
            config.call_timeout = timeout;
        }
        if let Some(timeout) = millis(&lookup, ENV_SUBSCRIBE_TIMEOUT_MS)? {
            config.subscribe_timeout = timeout;
        }
        Ok(config.normalized())
    }

    /// Clamp durations to at least one millisecond and the frame limit to
    /// [`MIN_FRAME_LENGTH`](crate::codec::MIN_FRAME_LENGTH).
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.reconnect_delay = self.reconnect_delay.max(MIN_DURATION);
        self.call_timeout = self.call_timeout.max(MIN_DURATION);
        self.subscribe_timeout = self.subscribe_timeout.max(MIN_DURATION);
        self.max_inactivity = self.max_inactivity.max(MIN_DURATION);
        self.max_frame_length = clamp_frame_length(self.max_frame_length);
        self.id_base_len = self.id_base_len.max(1);
        self
    }

    /// Set the Unix socket path used by [`UnixConnector`](crate::transport::UnixConnector).
    #[must_use]
    pub fn with_socket_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.socket_path = path.into();
        self
    }

    /// Set the fixed delay between a disconnect and the next connect attempt.
    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay.max(MIN_DURATION);
        self
    }

    /// Set the timeout used by [`KlipperClient::call_default`](crate::client::KlipperClient::call_default).
    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout.max(MIN_DURATION);
        self
    }

    /// Set the timeout applied to the initial call of every subscription.
    #[must_use]
    pub fn with_subscribe_timeout(mut self, timeout: Duration) -> Self {
        self.subscribe_timeout = timeout.max(MIN_DURATION);
        self
    }

    /// Set the inactivity window after which a silent link is torn down.
    #[must_use]
    pub fn with_max_inactivity(mut self, window: Duration) -> Self {
        self.max_inactivity = window.max(MIN_DURATION);
        self
    }

    /// Set the largest frame accepted from the server.
    #[must_use]
    pub fn with_max_frame_length(mut self, length: usize) -> Self {
        self.max_frame_length = clamp_frame_length(length);
        self
    }

    /// Set the length of the random call id prefix.
    #[must_use]
    pub fn with_id_base_len(mut self, length: usize) -> Self {
        self.id_base_len = length.max(1);
        self
    }

    /// Path of the Klipper API Unix socket.
    #[must_use]
    pub fn socket_path(&self) -> &std::path::Path { &self.socket_path }

    /// Delay between a disconnect and the next connect attempt.
    #[must_use]
    pub fn reconnect_delay(&self) -> Duration { self.reconnect_delay }

    /// Default timeout for calls.
    #[must_use]
    pub fn call_timeout(&self) -> Duration { self.call_timeout }

    /// Timeout for the initial call of a subscription.
    #[must_use]
    pub fn subscribe_timeout(&self) -> Duration { self.subscribe_timeout }

    /// Inactivity window enforced by the stall watchdog.
    #[must_use]
    pub fn max_inactivity(&self) -> Duration { self.max_inactivity }

    /// Largest accepted frame in bytes.
    #[must_use]
    pub fn max_frame_length(&self) -> usize { self.max_frame_length }

    /// Length of the random call id prefix.
    #[must_use]
    pub fn id_base_len(&self) -> usize { self.id_base_len }
}

fn millis<F>(lookup: &F, variable: &'static str) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(variable) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<u64>()
        .map(|ms| Some(Duration::from_millis(ms)))
        .map_err(|_| ConfigError::InvalidValue {
            variable,
            value: raw,
        })
}
