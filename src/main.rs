//! `klipper-wire` binary: watch printer objects and print updates.
//!
//! Each update is written to stdout as one JSON line. Logs go to stderr and
//! honour `RUST_LOG`.

mod cli;

use std::{io::Write, time::Duration};

use clap::Parser;
use klipper_wire::{
    ClientConfig,
    ConfigError,
    KlipperClient,
    LinkStatus,
    ObjectsQuery,
    TcpConnector,
    UnixConnector,
    printer::{PrinterAttribute, WebhooksStatus, announce},
};
use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to write update: {0}")]
    Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = cli::Cli::parse();
    let config = build_config(&cli)?;

    let builder = KlipperClient::builder().config(config.clone());
    let client = match &cli.tcp {
        Some(address) => builder.connector(TcpConnector::new(address.clone())).build(),
        None => builder
            .connector(UnixConnector::new(config.socket_path()))
            .build(),
    };
    announce(&client, env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    let state = PrinterAttribute::<String>::new();
    state.track(&client);

    let query = cli.watch.iter().fold(
        ObjectsQuery::new().object("webhooks", ["state", "state_message"]),
        |query, watch| query.object(watch.object.clone(), watch.attributes.clone()),
    );
    client.start();

    let result = tokio::select! {
        result = watch(&client, &query, &state) => result,
        _ = tokio::signal::ctrl_c() => Ok(()),
    };
    info!("shutting down");
    client.shutdown().await;
    result
}

fn build_config(cli: &cli::Cli) -> Result<ClientConfig, ConfigError> {
    let mut config = ClientConfig::from_env()?;
    if let Some(path) = &cli.socket {
        config = config.with_socket_path(path.clone());
    }
    if let Some(ms) = cli.reconnect_delay_ms {
        config = config.with_reconnect_delay(Duration::from_millis(ms));
    }
    if let Some(ms) = cli.max_inactivity_ms {
        config = config.with_max_inactivity(Duration::from_millis(ms));
    }
    Ok(config.normalized())
}

/// Resubscribe after every reconnect and print each update.
async fn watch(
    client: &KlipperClient,
    query: &ObjectsQuery,
    state: &PrinterAttribute<String>,
) -> Result<(), CliError> {
    let mut events = client.link_events();
    loop {
        let mut updates = client.subscribe_objects::<Value>(query);
        while let Some(update) = updates.next_update().await {
            match update {
                Ok(update) => {
                    if let Some(webhooks) = update.status.get("webhooks") {
                        let webhooks: WebhooksStatus =
                            serde_json::from_value(webhooks.clone()).unwrap_or_default();
                        if let Some(current) = webhooks.state
                            && state.get().as_ref() != Some(&current)
                        {
                            info!(state = %current, "klipper state changed");
                            state.set(current);
                        }
                    }
                    let line = json!({"eventtime": update.eventtime, "status": update.status});
                    let mut stdout = std::io::stdout().lock();
                    writeln!(stdout, "{line}")?;
                }
                Err(error) => warn!(%error, "undecodable object update"),
            }
        }
        if client.is_stopped() {
            return Ok(());
        }
        wait_for_connect(&mut events).await;
    }
}

async fn wait_for_connect(events: &mut broadcast::Receiver<LinkStatus>) {
    loop {
        match events.recv().await {
            Ok(LinkStatus::Connected) | Err(RecvError::Closed) => return,
            Ok(LinkStatus::Disconnected) | Err(RecvError::Lagged(_)) => {}
        }
    }
}
