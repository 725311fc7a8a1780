//! Codec for encoding and decoding Courier frames.
//!
//! Two encodings are supported:
//!
//! - JSON, carried in WebSocket text messages (the default, what browser clients speak)
//! - MessagePack with length-prefixed framing, carried in binary messages

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Maximum frame size (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Length prefix size in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {size} exceeds maximum {max}")]
    FrameTooLarge {
        /// Encoded or declared payload length.
        size: usize,
        /// Limit the frame was checked against.
        max: usize,
    },

    /// Not enough data to decode frame.
    #[error("Incomplete frame: need {0} more bytes")]
    Incomplete(usize),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Unknown encoding name.
    #[error("Unknown encoding: {0}")]
    UnknownEncoding(String),
}

/// Wire encoding of a connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// JSON text messages.
    #[default]
    Json,
    /// Length-prefixed MessagePack binary messages.
    #[serde(rename = "msgpack")]
    MessagePack,
}

impl Encoding {
    /// Whether frames in this encoding travel as binary messages.
    #[must_use]
    pub fn is_binary(self) -> bool {
        matches!(self, Encoding::MessagePack)
    }

    /// Encode a frame in this encoding.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails or the frame is too large.
    pub fn encode<T: Serialize>(self, frame: &T) -> Result<Bytes, ProtocolError> {
        match self {
            Encoding::Json => encode_json(frame).map(Bytes::from),
            Encoding::MessagePack => encode(frame),
        }
    }
}

impl FromStr for Encoding {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(Encoding::Json),
            "msgpack" | "messagepack" => Ok(Encoding::MessagePack),
            other => Err(ProtocolError::UnknownEncoding(other.to_string())),
        }
    }
}

/// Encode a frame as JSON text.
///
/// # Errors
///
/// Returns an error if serialization fails or the frame is too large.
pub fn encode_json<T: Serialize>(frame: &T) -> Result<String, ProtocolError> {
    let text = serde_json::to_string(frame)?;
    if text.len() > MAX_FRAME_SIZE {
        return Err(too_large(text.len(), MAX_FRAME_SIZE));
    }
    Ok(text)
}

/// Decode a frame from JSON text.
///
/// # Errors
///
/// Returns an error if the text is not a valid frame.
pub fn decode_json<T: DeserializeOwned>(text: &str) -> Result<T, ProtocolError> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(too_large(text.len(), MAX_FRAME_SIZE));
    }
    Ok(serde_json::from_str(text)?)
}

/// Encode a frame to bytes.
///
/// The encoded format is:
/// - 4 bytes: Big-endian length prefix
/// - N bytes: MessagePack-encoded frame
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode<T: Serialize>(frame: &T) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::new();
    encode_into(frame, &mut buf)?;
    Ok(buf.freeze())
}

/// Encode a frame into an existing buffer.
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode_into<T: Serialize>(frame: &T, buf: &mut BytesMut) -> Result<(), ProtocolError> {
    let payload = rmp_serde::to_vec_named(frame)?;

    if payload.len() > MAX_FRAME_SIZE {
        return Err(too_large(payload.len(), MAX_FRAME_SIZE));
    }

    buf.reserve(LENGTH_PREFIX_SIZE + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);

    Ok(())
}

/// Decode a frame from bytes.
///
/// # Errors
///
/// Returns an error if the data is incomplete, too large, or invalid.
pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T, ProtocolError> {
    if data.len() < LENGTH_PREFIX_SIZE {
        return Err(ProtocolError::Incomplete(LENGTH_PREFIX_SIZE - data.len()));
    }

    let length = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;

    if length > MAX_FRAME_SIZE {
        return Err(too_large(length, MAX_FRAME_SIZE));
    }

    let total_size = LENGTH_PREFIX_SIZE + length;
    if data.len() < total_size {
        return Err(ProtocolError::Incomplete(total_size - data.len()));
    }

    let frame = rmp_serde::from_slice(&data[LENGTH_PREFIX_SIZE..total_size])?;
    Ok(frame)
}

/// Try to decode a frame from a buffer, advancing it if successful.
///
/// Returns `Ok(Some(frame))` if a complete frame was decoded,
/// `Ok(None)` if more data is needed, or `Err` on protocol error.
///
/// # Errors
///
/// Returns an error if the frame is too large or invalid.
pub fn decode_from<T: DeserializeOwned>(buf: &mut BytesMut) -> Result<Option<T>, ProtocolError> {
    decode_from_with_limit(buf, MAX_FRAME_SIZE)
}

/// Like [`decode_from`], rejecting frames whose declared length exceeds `max`.
///
/// An oversized frame is reported as soon as its length prefix is buffered.
/// The buffer is left untouched in that case.
///
/// # Errors
///
/// Returns an error if the frame is too large or invalid.
pub fn decode_from_with_limit<T: DeserializeOwned>(
    buf: &mut BytesMut,
    max: usize,
) -> Result<Option<T>, ProtocolError> {
    if buf.len() < LENGTH_PREFIX_SIZE {
        return Ok(None);
    }

    let length = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;

    let max = max.min(MAX_FRAME_SIZE);
    if length > max {
        return Err(too_large(length, max));
    }

    let total_size = LENGTH_PREFIX_SIZE + length;
    if buf.len() < total_size {
        return Ok(None);
    }

    buf.advance(LENGTH_PREFIX_SIZE);
    let payload = buf.split_to(length);
    let frame = rmp_serde::from_slice(&payload)?;

    Ok(Some(frame))
}

/// Reassembles length-prefixed frames from a stream of binary messages.
///
/// Frames may span several messages. A frame declared larger than the
/// reader's limit is reported once and its bytes are skipped as they arrive,
/// so the stream stays in sync and never buffers more than one frame.
#[derive(Debug)]
pub struct FrameReader {
    buf: BytesMut,
    max_frame_size: usize,
    discard: usize,
}

impl FrameReader {
    /// Create a reader accepting payloads of at most `max_frame_size` bytes.
    #[must_use]
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
            max_frame_size: max_frame_size.min(MAX_FRAME_SIZE),
            discard: 0,
        }
    }

    /// Append received bytes.
    pub fn extend(&mut self, data: &[u8]) {
        let skipped = self.discard.min(data.len());
        self.discard -= skipped;
        self.buf.extend_from_slice(&data[skipped..]);
    }

    /// Bytes currently buffered.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Decode the next complete frame, if one is buffered.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::FrameTooLarge`] for an oversized frame and a
    /// decode error for a malformed one. Either way the offending frame is
    /// consumed and the next call continues with the following frame.
    pub fn next_frame<T: DeserializeOwned>(&mut self) -> Result<Option<T>, ProtocolError> {
        match decode_from_with_limit(&mut self.buf, self.max_frame_size) {
            Err(ProtocolError::FrameTooLarge { size, max }) => {
                let total = LENGTH_PREFIX_SIZE + size;
                if self.buf.len() >= total {
                    self.buf.advance(total);
                } else {
                    self.discard = total - self.buf.len();
                    self.buf.clear();
                }
                Err(too_large(size, max))
            }
            other => other,
        }
    }
}

fn too_large(size: usize, max: usize) -> ProtocolError {
    ProtocolError::FrameTooLarge { size, max }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::{ChatMessage, ClientFrame, Notification, ServerFrame};

    #[test]
    fn test_msgpack_envelope_decodes() {
        let frame = ClientFrame::SendNotification(Notification::new("bob", "like", "liked"));
        let encoded = encode(&frame).unwrap();
        let decoded: ClientFrame = decode(&encoded).unwrap();
        assert_eq!(frame, decoded);
    }

    #[test]
    fn test_json_text_matches_event_names() {
        let frame = ServerFrame::Notification(Notification::chat("bob", "alice"));
        let text = encode_json(&frame).unwrap();
        assert!(text.contains(r#""event":"notification""#));
        assert!(text.contains(r#""type":"chat""#));

        let decoded: ClientFrame =
            decode_json(r#"{"event":"joinRoom","data":"alice_bob"}"#).unwrap();
        assert_eq!(decoded, ClientFrame::join_room("alice_bob"));
    }

    #[test]
    fn test_decode_incomplete() {
        let frame = ClientFrame::register("alice");
        let encoded = encode(&frame).unwrap();

        let partial = &encoded[..5];
        match decode::<ClientFrame>(partial) {
            Err(ProtocolError::Incomplete(_)) => {}
            other => panic!("Expected Incomplete error, got {:?}", other),
        }
    }

    #[test]
    fn test_declared_length_too_large() {
        let mut buf = BytesMut::new();
        buf.put_u32((MAX_FRAME_SIZE + 1) as u32);

        match decode_from::<ClientFrame>(&mut buf) {
            Err(ProtocolError::FrameTooLarge { .. }) => {}
            other => panic!("Expected FrameTooLarge error, got {:?}", other),
        }
    }

    #[test]
    fn test_limit_applies_to_declared_length() {
        let mut buf = BytesMut::new();
        buf.put_u32(1024);

        match decode_from_with_limit::<ClientFrame>(&mut buf, 512) {
            Err(ProtocolError::FrameTooLarge { size: 1024, max: 512 }) => {}
            other => panic!("Expected FrameTooLarge error, got {:?}", other),
        }
        assert_eq!(buf.len(), LENGTH_PREFIX_SIZE);
    }

    #[test]
    fn test_reader_reassembles_split_frames() {
        let frame = ClientFrame::ChatMessage(ChatMessage::new("alice", "bob", "r", "hello"));
        let encoded = encode(&frame).unwrap();
        let (head, tail) = encoded.split_at(3);

        let mut reader = FrameReader::new(1024);
        reader.extend(head);
        assert!(reader.next_frame::<ClientFrame>().unwrap().is_none());
        reader.extend(tail);
        assert_eq!(reader.next_frame::<ClientFrame>().unwrap(), Some(frame));
        assert_eq!(reader.buffered(), 0);
    }

    #[test]
    fn test_reader_skips_oversized_frame_split_across_messages() {
        let big = ClientFrame::ChatMessage(ChatMessage::new("alice", "bob", "r", "x".repeat(4096)));
        let small = ClientFrame::register("erin");
        let mut stream = encode(&big).unwrap().to_vec();
        stream.extend_from_slice(&encode(&small).unwrap());

        let mut reader = FrameReader::new(1024);
        let mut decoded = Vec::new();
        let mut rejected = 0;
        for chunk in stream.chunks(700) {
            reader.extend(chunk);
            assert!(reader.buffered() <= 1024 + LENGTH_PREFIX_SIZE);
            loop {
                match reader.next_frame::<ClientFrame>() {
                    Ok(Some(frame)) => decoded.push(frame),
                    Ok(None) => break,
                    Err(ProtocolError::FrameTooLarge { .. }) => rejected += 1,
                    Err(e) => panic!("unexpected error: {e}"),
                }
            }
        }

        assert_eq!(rejected, 1);
        assert_eq!(decoded, vec![small]);
    }

    #[test]
    fn test_reader_skips_malformed_frame() {
        let mut data = BytesMut::new();
        data.put_u32(2);
        data.extend_from_slice(&[0xc1, 0xc1]);
        encode_into(&ClientFrame::register("alice"), &mut data).unwrap();

        let mut reader = FrameReader::new(1024);
        reader.extend(&data);
        assert!(matches!(
            reader.next_frame::<ClientFrame>(),
            Err(ProtocolError::Decode(_))
        ));
        assert_eq!(
            reader.next_frame::<ClientFrame>().unwrap(),
            Some(ClientFrame::register("alice"))
        );
    }

    #[test]
    fn test_streaming_decode() {
        let frame1 = ClientFrame::register("alice");
        let frame2 = ClientFrame::ChatMessage(ChatMessage::new("alice", "bob", "alice_bob", "hi"));

        let mut buf = BytesMut::new();
        encode_into(&frame1, &mut buf).unwrap();
        encode_into(&frame2, &mut buf).unwrap();

        let decoded1: ClientFrame = decode_from(&mut buf).unwrap().unwrap();
        let decoded2: ClientFrame = decode_from(&mut buf).unwrap().unwrap();

        assert_eq!(frame1, decoded1);
        assert_eq!(frame2, decoded2);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_encoding_from_str() {
        assert_eq!("json".parse::<Encoding>().unwrap(), Encoding::Json);
        assert_eq!("msgpack".parse::<Encoding>().unwrap(), Encoding::MessagePack);
        assert!("xml".parse::<Encoding>().is_err());
        assert!(Encoding::MessagePack.is_binary());
        assert!(!Encoding::default().is_binary());
    }
}
