#![allow(dead_code, reason = "each test binary uses a subset of the helpers")]
//! Shared setup for integration tests.

use std::time::Duration;

use klipper_wire::{
    ClientConfig,
    Connector,
    IdGenerator,
    KlipperClient,
    LinkStatus,
    Object,
    protocol::CallOutcome,
};
use klipper_wire_testing::{FakeKlipper, FakeKlipperQueue};
use tokio::{sync::broadcast, task::JoinHandle};

/// Base of every id issued by [`client`].
pub const ID_BASE: &str = "test";

/// Configuration whose watchdog stays out of the way.
pub fn quiet_config() -> ClientConfig {
    ClientConfig::default().with_max_inactivity(Duration::from_secs(3600))
}

/// Build an idle client with predictable ids.
pub fn client(connector: impl Connector + 'static, config: ClientConfig) -> KlipperClient {
    KlipperClient::builder()
        .config(config)
        .connector(connector)
        .id_generator(IdGenerator::with_base(ID_BASE))
        .build()
}

/// Start `client` and return the server end once calls can be sent.
pub async fn start(client: &KlipperClient, servers: &mut FakeKlipperQueue) -> FakeKlipper {
    let mut events = client.link_events();
    client.start();
    wait_for(&mut events, LinkStatus::Connected).await;
    servers.accept().await
}

/// Wait for the next `status` broadcast, skipping others.
pub async fn wait_for(events: &mut broadcast::Receiver<LinkStatus>, status: LinkStatus) {
    loop {
        if events.recv().await.expect("client alive") == status {
            return;
        }
    }
}

/// Issue a call on a separate task.
pub fn spawn_call(
    client: &KlipperClient,
    method: &'static str,
    timeout: Duration,
) -> JoinHandle<CallOutcome> {
    let client = client.clone();
    tokio::spawn(async move { client.call(method, Object::new(), timeout).await })
}

/// Let every runnable task finish its current work.
///
/// With the clock paused, the runtime only advances time once all tasks are
/// idle, so a short sleep drains pending work without skipping timers.
pub async fn settle() { tokio::time::sleep(Duration::from_millis(1)).await; }
