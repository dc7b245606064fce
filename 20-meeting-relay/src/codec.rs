//! Length-prefixed binary framing.
//!
//! Every frame on the wire is:
//! - 1 byte: message kind
//! - 4 bytes: payload length (big-endian)
//! - N bytes: payload
//!
//! Decoding is resumable: a partial frame is left in place until the rest
//! of it arrives, so one socket read can drain several frames and one frame
//! can span several reads.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::CodecError;
use crate::message::{Message, MessageKind};

/// Kind byte plus length prefix.
pub const HEADER_LEN: usize = 5;

/// Result of a single decode attempt against an accumulation buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Frame { message: Message, consumed: usize },
    NeedMoreData,
}

/// Serializes one frame.
pub fn encode(kind: MessageKind, payload: &[u8]) -> Result<Bytes, CodecError> {
    let len = i32::try_from(payload.len()).map_err(|_| CodecError::PayloadTooLarge {
        len: payload.len(),
    })?;

    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buf.put_u8(kind.as_byte());
    buf.put_i32(len);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

pub fn encode_message(message: &Message) -> Result<Bytes, CodecError> {
    encode(message.kind, &message.payload)
}

/// Decodes the frame at the start of `buf` without consuming anything.
pub fn decode(buf: &[u8]) -> Decoded {
    let Some(len) = declared_len(buf) else {
        return Decoded::NeedMoreData;
    };
    let end = HEADER_LEN + len;
    if buf.len() < end {
        return Decoded::NeedMoreData;
    }

    let message = Message::new(
        MessageKind::from(buf[0]),
        Bytes::copy_from_slice(&buf[HEADER_LEN..end]),
    );
    Decoded::Frame {
        message,
        consumed: end,
    }
}

/// Payload length announced by the header at the start of `buf`, if the
/// header is complete.
pub fn declared_len(buf: &[u8]) -> Option<usize> {
    if buf.len() < HEADER_LEN {
        return None;
    }
    let mut header = &buf[1..HEADER_LEN];
    Some(header.get_u32() as usize)
}

/// Streaming decoder that owns the accumulation buffer for one connection.
///
/// Consumed bytes are released by advancing the buffer's read cursor, so
/// draining many small frames never re-copies what is still queued.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::with_capacity(64 * 1024)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
        }
    }

    /// Appends raw bytes read from the transport.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Direct access for `AsyncReadExt::read_buf`.
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Payload length of the frame currently at the head of the buffer.
    pub fn pending_frame_len(&self) -> Option<usize> {
        declared_len(&self.buffer)
    }

    /// Pops the next complete frame, or `None` if more data is needed.
    pub fn next_message(&mut self) -> Option<Message> {
        let len = self.pending_frame_len()?;
        if self.buffer.len() < HEADER_LEN + len {
            return None;
        }

        let kind = MessageKind::from(self.buffer[0]);
        self.buffer.advance(HEADER_LEN);
        let payload = self.buffer.split_to(len).freeze();
        Some(Message { kind, payload })
    }
}

impl Iterator for FrameDecoder {
    type Item = Message;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_message()
    }
}
