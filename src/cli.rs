//! Command line interface for the `klipper-wire` binary.
//!
//! The binary connects to Klipper, subscribes to the requested printer
//! objects and prints every update as one JSON line.

use std::{path::PathBuf, str::FromStr};

use clap::Parser;

/// Command line arguments for the `klipper-wire` binary.
#[derive(Debug, Parser)]
#[command(
    name = "klipper-wire",
    version,
    about = "Watch printer objects over the Klipper API socket"
)]
pub struct Cli {
    /// Path of the Klipper API Unix socket.
    #[arg(short, long, env = "AKKI_KLIPPER_API_UDS", conflicts_with = "tcp")]
    pub socket: Option<PathBuf>,

    /// Connect over TCP to `host:port` instead of the Unix socket.
    #[arg(long, value_name = "HOST:PORT")]
    pub tcp: Option<String>,

    /// Printer object to watch, optionally limited to attributes:
    /// `toolhead:homed_axes,position`. Repeatable.
    #[arg(short, long = "watch", value_name = "OBJECT[:ATTR,...]")]
    pub watch: Vec<WatchTarget>,

    /// Delay between reconnect attempts, in milliseconds.
    #[arg(long, value_name = "MS")]
    pub reconnect_delay_ms: Option<u64>,

    /// Force a reconnect after this long without a frame, in milliseconds.
    #[arg(long, value_name = "MS")]
    pub max_inactivity_ms: Option<u64>,
}

/// One `--watch` argument.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WatchTarget {
    /// Printer object name.
    pub object: String,
    /// Attributes to watch; empty means all of them.
    pub attributes: Vec<String>,
}

impl FromStr for WatchTarget {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (object, attributes) = match value.split_once(':') {
            Some((object, attributes)) => (object, attributes),
            None => (value, ""),
        };
        let object = object.trim();
        if object.is_empty() {
            return Err(format!("missing object name in `{value}`"));
        }
        let attributes = attributes
            .split(',')
            .map(str::trim)
            .filter(|attribute| !attribute.is_empty())
            .map(str::to_owned)
            .collect();
        Ok(Self {
            object: object.to_owned(),
            attributes,
        })
    }
}
