//! Helper tasks owning the socket on behalf of the connection manager.
//!
//! None of these tasks touch manager state. They report back through the
//! driver's event queue, tagging every event with their connect attempt.

use std::{sync::Arc, time::Duration};

use bytes::{Bytes, BytesMut};
use futures::SinkExt;
use tokio::{
    io::{AsyncReadExt, ReadHalf, WriteHalf},
    sync::mpsc,
    time::sleep,
};
use tokio_util::{codec::FramedWrite, sync::CancellationToken};

use super::LinkEvent;
use crate::{
    codec::SeparatorCodec,
    transport::{BoxedStream, Connector},
};

const READ_CHUNK: usize = 8 * 1024;

/// Wait `delay` (if any), then ask the connector for a stream.
pub(super) async fn connect_attempt(
    connector: Arc<dyn Connector>,
    attempt: u64,
    delay: Option<Duration>,
    events: mpsc::UnboundedSender<LinkEvent>,
    cancel: CancellationToken,
) {
    let result = cancel
        .run_until_cancelled(async {
            if let Some(delay) = delay {
                sleep(delay).await;
            }
            connector.connect().await
        })
        .await;

    let event = match result {
        None => return,
        Some(Ok(stream)) => LinkEvent::Opened { attempt, stream },
        Some(Err(error)) => LinkEvent::ConnectFailed { attempt, error },
    };
    let _ = events.send(event);
}

/// Forward raw chunks from the socket until it closes.
pub(super) async fn read_loop(
    mut reader: ReadHalf<BoxedStream>,
    attempt: u64,
    events: mpsc::UnboundedSender<LinkEvent>,
    cancel: CancellationToken,
) {
    let mut buf = BytesMut::with_capacity(READ_CHUNK);
    loop {
        buf.reserve(READ_CHUNK);
        let Some(read) = cancel.run_until_cancelled(reader.read_buf(&mut buf)).await else {
            return;
        };
        let event = match read {
            Ok(0) => LinkEvent::Closed {
                attempt,
                error: None,
            },
            Ok(_) => LinkEvent::Data {
                attempt,
                chunk: buf.split().freeze(),
            },
            Err(error) => LinkEvent::Closed {
                attempt,
                error: Some(error),
            },
        };
        let done = matches!(event, LinkEvent::Closed { .. });
        if events.send(event).is_err() || done {
            return;
        }
    }
}

/// Write queued payloads, each followed by the frame separator.
pub(super) async fn write_loop(
    writer: WriteHalf<BoxedStream>,
    max_frame_length: usize,
    mut outbound: mpsc::UnboundedReceiver<Bytes>,
    attempt: u64,
    events: mpsc::UnboundedSender<LinkEvent>,
    cancel: CancellationToken,
) {
    let mut sink = FramedWrite::new(writer, SeparatorCodec::new(max_frame_length));
    let written = cancel
        .run_until_cancelled(async {
            while let Some(payload) = outbound.recv().await {
                sink.send(payload).await?;
            }
            Ok::<(), std::io::Error>(())
        })
        .await;

    if let Some(Err(error)) = written {
        let _ = events.send(LinkEvent::Closed {
            attempt,
            error: Some(error),
        });
    }
}
