//! Integration tests for push subscriptions.

use std::time::Duration;

use klipper_wire::{Object, ObjectsQuery, printer::ToolheadStatus};
use klipper_wire_testing::{DuplexConnector, LoggerHandle, logger};
use log::Level;
use rstest::rstest;
use serde::Deserialize;
use serde_json::{Value, json};
use serial_test::serial;
use tokio::time::Instant;

mod common;
use common::{quiet_config, settle, start};

fn object(value: Value) -> Object {
    match value {
        Value::Object(object) => object,
        other => panic!("expected an object, got {other}"),
    }
}

#[rstest]
#[tokio::test(start_paused = true)]
#[serial(client_logs)]
async fn pushes_flow_until_the_link_drops(mut logger: LoggerHandle) {
    logger.clear();
    let (connector, mut servers) = DuplexConnector::new("pushes");
    let client = common::client(connector, quiet_config());
    let mut klipper = start(&client, &mut servers).await;

    let mut updates = client.subscribe(
        "objects/subscribe",
        object(json!({"objects": {"toolhead": ["homed_axes"]}})),
    );
    let request = klipper.recv_request().await;
    assert_eq!(
        request["params"],
        json!({
            "objects": {"toolhead": ["homed_axes"]},
            "response_template": {"akkiSubId": "test-1"},
        })
    );

    klipper
        .reply_result(&request, json!({"eventtime": 1.0, "status": {}}))
        .await;
    klipper.push(&request, json!({"a": 8})).await;
    assert_eq!(updates.next_update().await, Some(object(json!({"a": 8}))));

    klipper.hang_up();
    assert_eq!(updates.next_update().await, None);
    assert!(updates.is_ended());

    let mut klipper = servers.accept().await;
    klipper.push(&request, json!({"a": 9})).await;
    settle().await;
    assert_eq!(updates.next_update().await, None);
    assert_eq!(
        logger
            .take_matching(Level::Error, "unrecognized frame from klipper")
            .len(),
        1
    );

    client.shutdown().await;
}

#[rstest]
#[tokio::test(start_paused = true)]
#[serial(client_logs)]
async fn failed_subscribe_ends_the_channel(mut logger: LoggerHandle) {
    logger.clear();
    let (connector, mut servers) = DuplexConnector::new("refused-subscribe");
    let client = common::client(connector, quiet_config());
    let mut klipper = start(&client, &mut servers).await;

    let mut updates = client.subscribe("objects/subscribe", Object::new());
    let request = klipper.recv_request().await;
    klipper
        .reply_error(&request, json!({"message": "Invalid argument"}))
        .await;

    assert_eq!(updates.next_update().await, None);
    let logged = logger.take_matching(Level::Error, "unable to subscribe");
    assert_eq!(logged.len(), 1);
    assert!(logged[0].contains("objects/subscribe"), "{}", logged[0]);

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn unanswered_subscribe_ends_after_the_subscribe_timeout() {
    let (connector, mut servers) = DuplexConnector::new("silent-subscribe");
    let client = common::client(
        connector,
        quiet_config().with_subscribe_timeout(Duration::from_millis(1000)),
    );
    let mut klipper = start(&client, &mut servers).await;

    let started = Instant::now();
    let mut updates = client.subscribe("objects/subscribe", Object::new());
    klipper.recv_request().await;

    assert_eq!(updates.next_update().await, None);
    assert!(started.elapsed() >= Duration::from_millis(1000));
    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn identical_subscriptions_are_independent() {
    let (connector, mut servers) = DuplexConnector::new("twins");
    let client = common::client(connector, quiet_config());
    let mut klipper = start(&client, &mut servers).await;

    let params = object(json!({"objects": {"webhooks": null}}));
    let mut first = client.subscribe("objects/subscribe", params.clone());
    let mut second = client.subscribe("objects/subscribe", params);
    let first_request = klipper.recv_request().await;
    let second_request = klipper.recv_request().await;
    assert_ne!(
        first_request["params"]["response_template"],
        second_request["params"]["response_template"]
    );
    klipper.reply_result(&first_request, json!({})).await;
    klipper.reply_result(&second_request, json!({})).await;

    klipper.push(&second_request, json!({"to": "second"})).await;
    klipper.push(&first_request, json!({"to": "first"})).await;
    assert_eq!(second.next_update().await, Some(object(json!({"to": "second"}))));
    assert_eq!(first.next_update().await, Some(object(json!({"to": "first"}))));

    client.shutdown().await;
    assert_eq!(first.next_update().await, None);
    assert_eq!(second.next_update().await, None);
}

#[derive(Debug, Deserialize, PartialEq)]
struct Homing {
    toolhead: Option<ToolheadStatus>,
}

#[tokio::test(start_paused = true)]
async fn object_updates_decode_into_the_requested_shape() {
    let (connector, mut servers) = DuplexConnector::new("typed");
    let client = common::client(connector, quiet_config());
    let mut klipper = start(&client, &mut servers).await;

    let query = ObjectsQuery::new().object("toolhead", ["homed_axes"]);
    let mut updates = client.subscribe_objects::<Homing>(&query);
    let request = klipper.recv_request().await;
    assert_eq!(request["method"], "objects/subscribe");
    assert_eq!(request["params"]["objects"], json!({"toolhead": ["homed_axes"]}));
    klipper.reply_result(&request, json!({})).await;

    klipper
        .push(
            &request,
            json!({"eventtime": 42.5, "status": {"toolhead": {"homed_axes": "xy"}}}),
        )
        .await;
    let update = updates
        .next_update()
        .await
        .expect("update")
        .expect("decodes");
    assert!((update.eventtime - 42.5).abs() < f64::EPSILON);
    assert_eq!(
        update.status.toolhead.and_then(|toolhead| toolhead.homed_axes),
        Some("xy".to_owned())
    );

    klipper.push(&request, json!({"status": {}})).await;
    assert!(updates.next_update().await.expect("update").is_err());

    client.shutdown().await;
}
