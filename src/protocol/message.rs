//! JSON shapes exchanged with Klipper.
//!
//! Outgoing calls are `{"id", "method", "params"}` objects. Incoming frames
//! are either replies carrying the call id and a `result` or `error`
//! object, or pushes carrying the subscription tag under
//! [`SUBSCRIPTION_TAG_KEY`] and a `params` object.

use bytes::Bytes;
use serde::Serialize;
use serde_json::{Value, json};

use super::{CallOutcome, NoReplyReason, Object};

/// Key under which Klipper echoes a subscription's tag on every push.
pub const SUBSCRIPTION_TAG_KEY: &str = "akkiSubId";

#[derive(Serialize)]
struct Request<'a> {
    id: &'a str,
    method: &'a str,
    params: &'a Object,
}

/// Serialize one call frame, without the trailing separator.
pub(crate) fn encode_request(id: &str, method: &str, params: &Object) -> serde_json::Result<Bytes> {
    serde_json::to_vec(&Request { id, method, params }).map(Bytes::from)
}

/// Add the response template telling Klipper how to tag pushes.
pub(crate) fn with_response_template(mut params: Object, tag: &str) -> Object {
    params.insert(
        "response_template".to_owned(),
        json!({ SUBSCRIPTION_TAG_KEY: tag }),
    );
    params
}

/// Turn a reply frame into the outcome of the call it answers.
pub(crate) fn reply_outcome(mut frame: Object) -> CallOutcome {
    if let Some(Value::Object(result)) = frame.remove("result") {
        return CallOutcome::Result(result);
    }
    if let Some(Value::Object(error)) = frame.remove("error") {
        return CallOutcome::ProtocolError(error);
    }
    CallOutcome::NoReply(NoReplyReason::StrangeResponse)
}

/// Split a push frame into its tag and payload.
pub(crate) fn into_push(mut frame: Object) -> Option<(String, Object)> {
    let tag = frame_tag(&frame)?.to_owned();
    match frame.remove("params") {
        Some(Value::Object(params)) => Some((tag, params)),
        _ => None,
    }
}

/// String id carried by a frame, if any.
pub(crate) fn frame_id(frame: &Object) -> Option<&str> { frame.get("id").and_then(Value::as_str) }

/// Non-empty subscription tag carried by a frame, if any.
pub(crate) fn frame_tag(frame: &Object) -> Option<&str> {
    frame
        .get(SUBSCRIPTION_TAG_KEY)
        .and_then(Value::as_str)
        .filter(|tag| !tag.is_empty())
}
