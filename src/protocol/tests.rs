//! Tests for call correlation, subscriptions and the stall watchdog.

use std::time::Duration;

use bytes::Bytes;
use klipper_wire_testing::{LoggerHandle, logger};
use log::Level;
use rstest::{fixture, rstest};
use serde_json::{Value, json};
use serial_test::serial;
use tokio::{sync::oneshot, time::Instant};

use super::*;

#[derive(Default)]
struct FakeLink {
    connected: bool,
    sent: Vec<Value>,
    reconnects: usize,
    max_frame_length: Option<usize>,
}

impl FakeLink {
    fn connected() -> Self {
        Self {
            connected: true,
            ..Self::default()
        }
    }

    fn last_id(&self) -> String {
        self.sent
            .last()
            .and_then(|frame| frame["id"].as_str())
            .expect("request id")
            .to_owned()
    }
}

impl Link for FakeLink {
    fn send(&mut self, frame: Bytes) -> SendStatus {
        if !self.connected {
            return SendStatus::NotConnected;
        }
        if self.max_frame_length.is_some_and(|limit| frame.len() > limit) {
            return SendStatus::TooLarge;
        }
        self.sent
            .push(serde_json::from_slice(&frame).expect("request is JSON"));
        SendStatus::Sent
    }

    fn force_reconnect(&mut self) -> ReconnectStatus {
        if !self.connected {
            return ReconnectStatus::AlreadyDisconnected;
        }
        self.connected = false;
        self.reconnects += 1;
        ReconnectStatus::Reconnecting
    }
}

#[fixture]
fn correlator() -> Correlator {
    Correlator::new(
        IdGenerator::with_base("abcde"),
        Duration::from_millis(1000),
        Duration::from_millis(8000),
    )
}

fn object(value: Value) -> Object {
    match value {
        Value::Object(object) => object,
        other => panic!("expected object, got {other}"),
    }
}

fn frame(value: &Value) -> LinkSignal { LinkSignal::Frame(Bytes::from(value.to_string())) }

fn assert_window(since: Instant, expected: Duration) {
    let elapsed = since.elapsed();
    assert!(
        elapsed >= expected && elapsed < expected + Duration::from_millis(5),
        "fired after {elapsed:?}, expected {expected:?}"
    );
}

#[test]
fn ids_share_a_base_and_count_up() {
    let mut ids = IdGenerator::with_base("abcde");
    assert_eq!(ids.next_id(), "abcde-1");
    assert_eq!(ids.next_id(), "abcde-2");

    let random = IdGenerator::new(5);
    assert_eq!(random.base().chars().count(), 5);
    assert!(
        random
            .base()
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    );
}

#[rstest]
#[tokio::test(start_paused = true)]
#[serial(protocol_logs)]
async fn call_encodes_one_request_frame(mut correlator: Correlator) {
    let mut link = FakeLink::connected();
    let (tx, _rx) = oneshot::channel();
    correlator.call(
        &mut link,
        "objects/query",
        object(json!({"objects": {"webhooks": null}})),
        Duration::from_secs(5),
        tx,
    );

    assert_eq!(
        link.sent,
        vec![json!({
            "id": "abcde-1",
            "method": "objects/query",
            "params": {"objects": {"webhooks": null}},
        })]
    );
    assert_eq!(correlator.pending_calls(), 1);
}

#[rstest]
#[case(json!({"result": {"state": "ready"}}), CallOutcome::Result(object(json!({"state": "ready"}))))]
#[case(json!({"error": {"message": "nope"}}), CallOutcome::ProtocolError(object(json!({"message": "nope"}))))]
#[case(json!({"result": 5}), CallOutcome::NoReply(NoReplyReason::StrangeResponse))]
#[case(json!({}), CallOutcome::NoReply(NoReplyReason::StrangeResponse))]
#[tokio::test(start_paused = true)]
#[serial(protocol_logs)]
async fn reply_shape_selects_outcome(
    mut correlator: Correlator,
    #[case] reply: Value,
    #[case] expected: CallOutcome,
) {
    let mut link = FakeLink::connected();
    let (tx, mut rx) = oneshot::channel();
    correlator.call(&mut link, "info", Object::new(), Duration::from_secs(5), tx);

    let mut reply = object(reply);
    reply.insert("id".to_owned(), Value::String(link.last_id()));
    correlator.on_signal(frame(&Value::Object(reply)));

    assert_eq!(rx.try_recv().expect("resolved"), expected);
    assert_eq!(correlator.pending_calls(), 0);
    assert!(correlator.timeouts.is_empty(), "timer must be cancelled");
}

#[rstest]
#[tokio::test(start_paused = true)]
#[serial(protocol_logs)]
async fn call_while_disconnected_resolves_immediately(mut correlator: Correlator) {
    let mut link = FakeLink::default();
    let (tx, mut rx) = oneshot::channel();
    correlator.call(&mut link, "info", Object::new(), Duration::from_secs(5), tx);

    assert_eq!(rx.try_recv().expect("resolved"), CallOutcome::Disconnected);
    assert_eq!(correlator.pending_calls(), 0);
    assert!(correlator.timeouts.is_empty());
}

#[rstest]
#[tokio::test(start_paused = true)]
#[serial(protocol_logs)]
async fn oversized_request_fails_alone(mut correlator: Correlator, mut logger: LoggerHandle) {
    logger.clear();
    let mut link = FakeLink {
        max_frame_length: Some(64),
        ..FakeLink::connected()
    };
    let (small_tx, mut small_rx) = oneshot::channel();
    correlator.call(&mut link, "info", Object::new(), Duration::from_secs(5), small_tx);
    let (large_tx, mut large_rx) = oneshot::channel();
    correlator.call(
        &mut link,
        "gcode/script",
        object(json!({"script": "G1 X10 Y10 F3000\n".repeat(8)})),
        Duration::from_secs(5),
        large_tx,
    );

    assert_eq!(large_rx.try_recv().expect("resolved"), CallOutcome::Disconnected);
    assert_eq!(link.sent.len(), 1);
    assert_eq!(correlator.pending_calls(), 1);
    assert_eq!(correlator.timeouts.len(), 1);
    let errors = logger.take_matching(Level::Error, "request exceeds maximum frame length");
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("gcode/script"), "method is logged: {}", errors[0]);

    correlator.on_signal(frame(&json!({"id": link.last_id(), "result": {}})));
    assert_eq!(small_rx.try_recv().expect("resolved"), CallOutcome::Result(Object::new()));
}

#[rstest]
#[tokio::test(start_paused = true)]
#[serial(protocol_logs)]
async fn concurrent_calls_receive_their_own_replies(mut correlator: Correlator) {
    let mut link = FakeLink::connected();
    let mut receivers = Vec::new();
    for n in 0..5 {
        let (tx, rx) = oneshot::channel();
        correlator.call(
            &mut link,
            "echo",
            object(json!({"n": n})),
            Duration::from_secs(5),
            tx,
        );
        receivers.push(rx);
    }

    for request in link.sent.iter().rev() {
        correlator.on_signal(frame(&json!({
            "id": request["id"],
            "result": {"n": request["params"]["n"]},
        })));
    }

    for (n, mut rx) in receivers.into_iter().enumerate() {
        assert_eq!(
            rx.try_recv().expect("resolved"),
            CallOutcome::Result(object(json!({"n": n})))
        );
    }
}

#[rstest]
#[tokio::test(start_paused = true)]
#[serial(protocol_logs)]
async fn timeout_resolves_once_and_late_reply_is_unrecognized(
    mut correlator: Correlator,
    mut logger: LoggerHandle,
) {
    logger.clear();
    let mut link = FakeLink::connected();
    let (tx, mut rx) = oneshot::channel();
    let started = Instant::now();
    correlator.call(&mut link, "info", Object::new(), Duration::from_millis(500), tx);
    let id = link.last_id();

    assert_eq!(correlator.next_timer().await, Timer::Expired(id.clone()));
    assert!(started.elapsed() >= Duration::from_millis(500));
    correlator.expire(&id);
    assert_eq!(
        rx.try_recv().expect("resolved"),
        CallOutcome::NoReply(NoReplyReason::Timeout)
    );

    correlator.on_signal(frame(&json!({"id": id, "result": {"late": true}})));
    let logged = logger.take_matching(Level::Error, "unrecognized frame from klipper");
    assert_eq!(logged.len(), 1);
    assert!(logged[0].contains("late"), "{}", logged[0]);
}

#[rstest]
#[tokio::test(start_paused = true)]
#[serial(protocol_logs)]
async fn malformed_frames_are_logged_and_dropped(
    mut correlator: Correlator,
    mut logger: LoggerHandle,
) {
    logger.clear();
    correlator.on_signal(LinkSignal::Frame(Bytes::from_static(b"{not json")));
    correlator.on_signal(LinkSignal::Frame(Bytes::new()));
    correlator.on_signal(frame(&json!([1, 2, 3])));
    correlator.on_signal(frame(&json!({"id": 7, "result": {}})));

    let mut parse_errors = 0;
    let mut unrecognized = 0;
    while let Some(record) = logger.pop() {
        let message = record.args().to_string();
        if message.contains("unable to parse frame as JSON") {
            parse_errors += 1;
        }
        if message.contains("unrecognized frame from klipper") {
            unrecognized += 1;
        }
    }
    assert_eq!(parse_errors, 2);
    assert_eq!(unrecognized, 2);
}

#[rstest]
#[tokio::test(start_paused = true)]
#[serial(protocol_logs)]
async fn strange_response_is_logged(mut correlator: Correlator, mut logger: LoggerHandle) {
    logger.clear();
    let mut link = FakeLink::connected();
    let (tx, _rx) = oneshot::channel();
    correlator.call(&mut link, "gcode/script", Object::new(), Duration::from_secs(5), tx);
    correlator.on_signal(frame(&json!({"id": link.last_id()})));

    let logged = logger.take_matching(Level::Error, "strange response from klipper");
    assert_eq!(logged.len(), 1);
    assert!(logged[0].contains("gcode/script"), "{}", logged[0]);
}

#[rstest]
#[tokio::test(start_paused = true)]
#[serial(protocol_logs)]
async fn disconnect_fails_pending_calls_and_ends_subscriptions(mut correlator: Correlator) {
    let mut link = FakeLink::connected();
    let mut receivers = Vec::new();
    for _ in 0..3 {
        let (tx, rx) = oneshot::channel();
        correlator.call(&mut link, "info", Object::new(), Duration::from_secs(5), tx);
        receivers.push(rx);
    }
    let mut subscription = correlator.subscribe(&mut link, "gcode/subscribe_output", Object::new());
    let tag = link.last_id();
    correlator.on_signal(frame(&json!({"id": tag, "result": {}})));

    correlator.on_signal(LinkSignal::Disconnected { error: None });

    for mut rx in receivers {
        let outcome = rx.try_recv().expect("resolved");
        assert_eq!(outcome, CallOutcome::NoReply(NoReplyReason::Disconnected));
        assert!(outcome.is_disconnected());
    }
    assert_eq!(correlator.pending_calls(), 0);
    assert_eq!(correlator.subscriptions(), 0);
    assert!(correlator.timeouts.is_empty());
    assert_eq!(subscription.next_update().await, None);
}

#[rstest]
#[tokio::test(start_paused = true)]
#[serial(protocol_logs)]
async fn subscription_lifecycle(mut correlator: Correlator, mut logger: LoggerHandle) {
    logger.clear();
    let mut link = FakeLink::connected();
    let mut subscription = correlator.subscribe(
        &mut link,
        "objects/subscribe",
        object(json!({"objects": {"toolhead": ["homed_axes"]}})),
    );

    let request = link.sent.last().cloned().expect("subscribe request");
    let tag = request["id"].as_str().expect("id").to_owned();
    assert_eq!(
        request["params"],
        json!({
            "objects": {"toolhead": ["homed_axes"]},
            "response_template": {"akkiSubId": tag},
        })
    );
    assert_eq!(correlator.subscription_state(&tag), Some(SubscriptionState::Pending));

    correlator.on_signal(frame(&json!({"id": tag, "result": {"status": {}}})));
    assert_eq!(correlator.subscription_state(&tag), Some(SubscriptionState::Active));

    correlator.on_signal(frame(&json!({"akkiSubId": tag, "params": {"a": 8}})));
    correlator.on_signal(LinkSignal::Disconnected { error: None });
    correlator.on_signal(frame(&json!({"akkiSubId": tag, "params": {"a": 9}})));

    assert_eq!(subscription.next_update().await, Some(object(json!({"a": 8}))));
    assert_eq!(subscription.next_update().await, None);
    assert!(subscription.is_ended());
    assert_eq!(
        logger.take_matching(Level::Error, "unrecognized frame from klipper").len(),
        1
    );
}

#[rstest]
#[tokio::test(start_paused = true)]
#[serial(protocol_logs)]
async fn failed_subscribe_ends_the_channel(mut correlator: Correlator, mut logger: LoggerHandle) {
    logger.clear();
    let mut link = FakeLink::connected();
    let mut subscription = correlator.subscribe(&mut link, "objects/subscribe", Object::new());
    let tag = link.last_id();

    correlator.on_signal(frame(&json!({"id": tag, "error": {"message": "bad objects"}})));

    assert_eq!(subscription.next_update().await, None);
    assert_eq!(correlator.subscriptions(), 0);
    let logged = logger.take_matching(Level::Error, "unable to subscribe");
    assert_eq!(logged.len(), 1);
    assert!(logged[0].contains("bad objects"), "{}", logged[0]);
}

#[rstest]
#[tokio::test(start_paused = true)]
#[serial(protocol_logs)]
async fn subscribe_times_out_after_subscribe_timeout(mut correlator: Correlator) {
    let mut link = FakeLink::connected();
    let mut subscription = correlator.subscribe(&mut link, "objects/subscribe", Object::new());
    let started = Instant::now();

    let Timer::Expired(id) = correlator.next_timer().await else {
        panic!("expected call expiry");
    };
    assert_window(started, Duration::from_millis(1000));
    correlator.expire(&id);

    assert_eq!(subscription.next_update().await, None);
}

#[rstest]
#[tokio::test(start_paused = true)]
#[serial(protocol_logs)]
async fn subscribe_while_disconnected_ends_immediately(mut correlator: Correlator) {
    let mut link = FakeLink::default();
    let mut subscription = correlator.subscribe(&mut link, "objects/subscribe", Object::new());

    assert_eq!(subscription.next_update().await, None);
    assert_eq!(correlator.subscriptions(), 0);
}

#[rstest]
#[tokio::test(start_paused = true)]
#[serial(protocol_logs)]
async fn identical_subscriptions_are_independent(mut correlator: Correlator) {
    let mut link = FakeLink::connected();
    let params = object(json!({"objects": {"webhooks": null}}));
    let mut first = correlator.subscribe(&mut link, "objects/subscribe", params.clone());
    let first_tag = link.last_id();
    let mut second = correlator.subscribe(&mut link, "objects/subscribe", params);
    let second_tag = link.last_id();
    assert_ne!(first_tag, second_tag);

    correlator.on_signal(frame(&json!({"akkiSubId": second_tag, "params": {"n": 2}})));
    correlator.on_signal(frame(&json!({"akkiSubId": first_tag, "params": {"n": 1}})));

    assert_eq!(first.next_update().await, Some(object(json!({"n": 1}))));
    assert_eq!(second.next_update().await, Some(object(json!({"n": 2}))));
}

#[rstest]
#[tokio::test(start_paused = true)]
#[serial(protocol_logs)]
async fn dropped_subscription_is_unregistered_on_next_push(mut correlator: Correlator) {
    let mut link = FakeLink::connected();
    let subscription = correlator.subscribe(&mut link, "objects/subscribe", Object::new());
    let tag = link.last_id();
    drop(subscription);
    assert_eq!(correlator.subscriptions(), 1);

    correlator.on_signal(frame(&json!({"akkiSubId": tag, "params": {}})));
    assert_eq!(correlator.subscriptions(), 0);
}

#[rstest]
#[tokio::test(start_paused = true)]
#[serial(protocol_logs)]
async fn watchdog_forces_reconnect_once_per_window(
    mut correlator: Correlator,
    mut logger: LoggerHandle,
) {
    logger.clear();
    let mut link = FakeLink::connected();
    correlator.arm_watchdog();
    let started = Instant::now();

    assert_eq!(correlator.next_timer().await, Timer::Stall);
    assert_window(started, Duration::from_millis(8000));
    correlator.on_stall(&mut link);
    assert_eq!(link.reconnects, 1);

    link.connected = true;
    tokio::time::advance(Duration::from_millis(4000)).await;
    correlator.on_signal(frame(&json!({"akkiSubId": "nobody", "params": {}})));
    let rearmed = Instant::now();
    assert_eq!(correlator.next_timer().await, Timer::Stall);
    assert_window(rearmed, Duration::from_millis(8000));
    correlator.on_stall(&mut link);
    assert_eq!(link.reconnects, 2);

    assert_eq!(correlator.next_timer().await, Timer::Stall);
    correlator.on_stall(&mut link);
    assert_eq!(link.reconnects, 2, "nothing to tear down");

    let warnings =
        logger.take_matching(Level::Warn, "klipper stopped answering; forcing reconnect");
    assert_eq!(warnings.len(), 2);
}

#[rstest]
#[tokio::test(start_paused = true)]
#[serial(protocol_logs)]
async fn connect_restarts_the_inactivity_window(mut correlator: Correlator) {
    correlator.arm_watchdog();
    tokio::time::advance(Duration::from_millis(7000)).await;

    correlator.on_signal(LinkSignal::Connected);
    let connected = Instant::now();
    assert_eq!(correlator.next_timer().await, Timer::Stall);
    assert_window(connected, Duration::from_millis(8000));
}

#[rstest]
#[tokio::test(start_paused = true)]
#[serial(protocol_logs)]
async fn shutdown_disarms_the_watchdog(mut correlator: Correlator) {
    let mut link = FakeLink::connected();
    correlator.arm_watchdog();
    let (tx, mut rx) = oneshot::channel();
    correlator.call(&mut link, "info", Object::new(), Duration::from_secs(5), tx);

    correlator.shutdown();

    assert!(rx.try_recv().expect("resolved").is_disconnected());
    let timer = tokio::time::timeout(Duration::from_secs(60), correlator.next_timer()).await;
    assert!(timer.is_err(), "no timer may fire after shutdown");
}
