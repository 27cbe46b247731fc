//! Server side of an in-memory Klipper API connection.

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use klipper_wire::{SeparatorCodec, protocol::SUBSCRIPTION_TAG_KEY};
use serde_json::{Value, json};
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio_util::codec::Framed;

/// Scripted stand-in for Klipper on one connection.
///
/// Helpers panic on transport errors: they are meant for tests only.
pub struct FakeKlipper {
    framed: Framed<DuplexStream, SeparatorCodec>,
}

impl FakeKlipper {
    /// Wrap the server end of a pipe.
    #[must_use]
    pub fn new(stream: DuplexStream) -> Self {
        Self {
            framed: Framed::new(stream, SeparatorCodec::default()),
        }
    }

    /// Next frame from the client, or `None` once it hung up.
    ///
    /// # Panics
    ///
    /// Panics if the client sent an oversized frame.
    pub async fn recv_frame(&mut self) -> Option<Bytes> {
        self.framed
            .next()
            .await
            .map(|frame| frame.expect("client frame within limits"))
    }

    /// Next request from the client, parsed as JSON.
    ///
    /// # Panics
    ///
    /// Panics if the client hung up or sent something other than JSON.
    pub async fn recv_request(&mut self) -> Value {
        let frame = self.recv_frame().await.expect("client hung up");
        serde_json::from_slice(&frame).expect("request is JSON")
    }

    /// Returns `true` once the client closed its end.
    pub async fn closed(&mut self) -> bool { self.recv_frame().await.is_none() }

    /// Send `message` as one frame.
    ///
    /// # Panics
    ///
    /// Panics if the client end is gone.
    pub async fn send(&mut self, message: &Value) {
        let payload = serde_json::to_vec(message).expect("serializable message");
        self.framed
            .send(Bytes::from(payload))
            .await
            .expect("client end open");
    }

    /// Write `bytes` verbatim, separators included.
    ///
    /// # Panics
    ///
    /// Panics if the client end is gone.
    pub async fn send_raw(&mut self, bytes: &[u8]) {
        let stream = self.framed.get_mut();
        stream.write_all(bytes).await.expect("client end open");
        stream.flush().await.expect("client end open");
    }

    /// Answer `request` with a `result` object.
    pub async fn reply_result(&mut self, request: &Value, result: Value) {
        self.send(&json!({"id": request["id"], "result": result})).await;
    }

    /// Answer `request` with an `error` object.
    pub async fn reply_error(&mut self, request: &Value, error: Value) {
        self.send(&json!({"id": request["id"], "error": error})).await;
    }

    /// Push `params` to the subscription opened by `request`.
    ///
    /// # Panics
    ///
    /// Panics if `request` carries no response template.
    pub async fn push(&mut self, request: &Value, params: Value) {
        let tag = request["params"]["response_template"][SUBSCRIPTION_TAG_KEY]
            .as_str()
            .expect("subscribe request carries a tag")
            .to_owned();
        self.send(&json!({SUBSCRIPTION_TAG_KEY: tag, "params": params}))
            .await;
    }

    /// Close the connection from the server side.
    pub fn hang_up(self) { drop(self); }
}
