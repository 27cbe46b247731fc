//! Separator-delimited framing for the Klipper API socket.
//!
//! Klipper terminates every JSON message with a single `0x03` byte, in both
//! directions. [`SeparatorCodec`] implements `tokio_util`'s [`Decoder`] and
//! [`Encoder`] for that format. The connection manager feeds raw socket
//! chunks into a [`FrameBuffer`] and drains complete frames from it; the
//! writer task wraps its half of the socket in a `FramedWrite` so every
//! outgoing payload is followed by the separator.
//!
//! Zero-length frames are valid and survive a round trip.

use std::io;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Byte separating consecutive frames on the wire.
pub const SEPARATOR: u8 = 0x03;

/// Minimum accepted value for the maximum frame length.
///
/// Smaller limits are clamped up to this value.
pub const MIN_FRAME_LENGTH: usize = 64;

/// Default upper bound for a single frame (16 MiB).
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

pub(crate) fn clamp_frame_length(value: usize) -> usize { value.max(MIN_FRAME_LENGTH) }

/// Codec splitting a byte stream on [`SEPARATOR`].
///
/// # Examples
///
/// ```
/// use bytes::BytesMut;
/// use klipper_wire::codec::SeparatorCodec;
/// use tokio_util::codec::Decoder;
///
/// let mut codec = SeparatorCodec::default();
/// let mut buf = BytesMut::from(&b"{\"id\":\"a-1\"}\x03{\"i"[..]);
/// let frame = codec.decode(&mut buf).expect("decode").expect("complete frame");
/// assert_eq!(&frame[..], b"{\"id\":\"a-1\"}");
/// assert!(codec.decode(&mut buf).expect("decode").is_none());
/// assert_eq!(&buf[..], b"{\"i");
/// ```
#[derive(Clone, Debug)]
pub struct SeparatorCodec {
    max_frame_length: usize,
    // Prefix of the buffer already known to hold no separator.
    scanned: usize,
}

impl SeparatorCodec {
    /// Construct a codec rejecting frames longer than `max_frame_length`.
    #[must_use]
    pub fn new(max_frame_length: usize) -> Self {
        Self {
            max_frame_length: clamp_frame_length(max_frame_length),
            scanned: 0,
        }
    }

    /// Return the maximum frame length accepted by this codec.
    #[must_use]
    pub fn max_frame_length(&self) -> usize { self.max_frame_length }

    /// Forget any scan progress, for use after the buffer was cleared.
    pub fn reset(&mut self) { self.scanned = 0; }

    fn oversized(&self) -> io::Error {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "frame exceeds maximum length of {} bytes",
                self.max_frame_length
            ),
        )
    }
}

impl Default for SeparatorCodec {
    fn default() -> Self { Self::new(DEFAULT_MAX_FRAME_LENGTH) }
}

impl Decoder for SeparatorCodec {
    type Item = Bytes;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let start = self.scanned.min(src.len());
        let Some(offset) = src[start..].iter().position(|&b| b == SEPARATOR) else {
            self.scanned = src.len();
            if src.len() > self.max_frame_length {
                return Err(self.oversized());
            }
            return Ok(None);
        };

        let end = start + offset;
        self.scanned = 0;
        if end > self.max_frame_length {
            return Err(self.oversized());
        }
        let frame = src.split_to(end).freeze();
        src.advance(1);
        Ok(Some(frame))
    }
}

impl Encoder<Bytes> for SeparatorCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.len() > self.max_frame_length {
            return Err(self.oversized());
        }
        dst.reserve(item.len() + 1);
        dst.put_slice(&item);
        dst.put_u8(SEPARATOR);
        Ok(())
    }
}

/// Partial-frame buffer owned by the connection manager.
///
/// Chunks are appended as they arrive; [`FrameBuffer::next_frame`] yields
/// each complete frame in arrival order and keeps the unterminated remainder
/// for the next chunk.
#[derive(Debug)]
pub struct FrameBuffer {
    buf: BytesMut,
    codec: SeparatorCodec,
}

impl FrameBuffer {
    /// Create an empty buffer enforcing `max_frame_length`.
    #[must_use]
    pub fn new(max_frame_length: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            codec: SeparatorCodec::new(max_frame_length),
        }
    }

    /// Append a chunk received from the transport.
    pub fn extend(&mut self, chunk: &[u8]) { self.buf.extend_from_slice(chunk); }

    /// Take the next complete frame, if one is buffered.
    ///
    /// # Errors
    ///
    /// Returns [`io::ErrorKind::InvalidData`] once the buffered partial frame
    /// grows past the configured maximum length.
    pub fn next_frame(&mut self) -> io::Result<Option<Bytes>> { self.codec.decode(&mut self.buf) }

    /// Drop any buffered partial frame.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.codec.reset();
    }

    /// Number of buffered bytes not yet emitted as a frame.
    #[must_use]
    pub fn len(&self) -> usize { self.buf.len() }

    /// Returns `true` when no partial frame is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.buf.is_empty() }
}
