//! CastV2 frame codec.
//!
//! Wire format: a 4-byte big-endian length prefix followed by that many
//! bytes of a `CastMessage` protobuf payload.
//!
//! ```text
//! [0..4)  payload_len (u32, big-endian)
//! [4..)   payload_len bytes of CastMessage (protobuf)
//! ```
//!
//! A length above [`MAX_FRAME_LEN`] is fatal — the caller must tear the
//! connection down. A frame whose length is well-formed but whose payload
//! fails to parse as protobuf is *not* fatal: the bytes are still consumed
//! according to the declared length, so the stream never desynchronizes,
//! and the caller just keeps reading.

use bytes::{Buf, BytesMut};
use prost::Message as _;

use crate::cast::{CastMessage, MAX_FRAME_LEN};

/// Outcome of pulling one frame off the wire.
#[derive(Debug)]
pub enum FrameEvent {
    /// A complete, well-formed `CastMessage`.
    Message(CastMessage),
    /// A validly-framed payload that failed to parse as protobuf. The
    /// frame's bytes were still consumed; the stream stays in sync.
    Skipped,
}

/// Encode a `CastMessage` into a single length-prefixed buffer.
pub fn encode(message: &CastMessage) -> Vec<u8> {
    let payload_len = message.encoded_len();
    let mut buf = Vec::with_capacity(4 + payload_len);
    buf.extend_from_slice(&(payload_len as u32).to_be_bytes());
    message
        .encode(&mut buf)
        .expect("encoding into a Vec<u8> never fails");
    buf
}

/// Stateful decoder over a rolling receive buffer. Feed it bytes as they
/// arrive off the socket and drain complete frames with [`decode_next`].
///
/// [`decode_next`]: FrameDecoder::decode_next
#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    max_len: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// A decoder capped at the protocol's hard [`MAX_FRAME_LEN`].
    pub fn new() -> Self {
        Self { buf: BytesMut::new(), max_len: MAX_FRAME_LEN }
    }

    /// A decoder capped at a caller-supplied length, e.g. a configured
    /// `castv2.max_frame_len` tighter than the protocol's own ceiling.
    pub fn with_max_len(max_len: usize) -> Self {
        Self { buf: BytesMut::new(), max_len }
    }

    /// Append freshly-read socket bytes to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Pull the next frame out of the buffer, if a complete one is present.
    ///
    /// Returns `Ok(None)` when fewer than a full frame is buffered so far —
    /// call again after the next socket read. Returns `Err` only when the
    /// declared length exceeds this decoder's configured cap, which the
    /// caller must treat as fatal for the connection.
    pub fn decode_next(&mut self) -> Result<Option<FrameEvent>, FrameError> {
        if self.buf.len() < 4 {
            return Ok(None);
        }
        let declared_len = u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]) as usize;
        if declared_len > self.max_len {
            return Err(FrameError::LengthExceeded { declared: declared_len, max: self.max_len });
        }
        if self.buf.len() < 4 + declared_len {
            return Ok(None);
        }
        self.buf.advance(4);
        let payload = self.buf.split_to(declared_len);
        match CastMessage::decode(payload.as_ref()) {
            Ok(message) => Ok(Some(FrameEvent::Message(message))),
            Err(_) => Ok(Some(FrameEvent::Skipped)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("declared frame length {declared} exceeds the {max}-byte cap")]
    LengthExceeded { declared: usize, max: usize },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cast::{NS_HEARTBEAT, PayloadType, ProtocolVersion};

    fn sample_message() -> CastMessage {
        CastMessage {
            protocol_version: ProtocolVersion::Castv210 as i32,
            source_id: "sender-0".to_string(),
            destination_id: "receiver-0".to_string(),
            namespace: NS_HEARTBEAT.to_string(),
            payload_type: PayloadType::String as i32,
            payload_utf8: Some("{\"type\":\"PING\"}".to_string()),
            payload_binary: None,
        }
    }

    #[test]
    fn roundtrip_single_frame() {
        let message = sample_message();
        let bytes = encode(&message);

        let mut decoder = FrameDecoder::new();
        decoder.extend(&bytes);
        match decoder.decode_next().unwrap() {
            Some(FrameEvent::Message(decoded)) => assert_eq!(decoded, message),
            other => panic!("expected Message, got {other:?}"),
        }
        assert!(matches!(decoder.decode_next().unwrap(), None));
    }

    #[test]
    fn partial_write_waits_for_more_bytes() {
        let bytes = encode(&sample_message());
        let mut decoder = FrameDecoder::new();
        decoder.extend(&bytes[..bytes.len() - 1]);
        assert!(matches!(decoder.decode_next().unwrap(), None));
        decoder.extend(&bytes[bytes.len() - 1..]);
        assert!(matches!(decoder.decode_next().unwrap(), Some(FrameEvent::Message(_))));
    }

    #[test]
    fn length_only_also_waits() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&[0, 0, 0, 5]);
        assert!(matches!(decoder.decode_next().unwrap(), None));
    }

    #[test]
    fn oversized_length_is_fatal() {
        let mut decoder = FrameDecoder::new();
        let mut bytes = ((MAX_FRAME_LEN + 1) as u32).to_be_bytes().to_vec();
        bytes.extend_from_slice(&[0u8; 16]);
        decoder.extend(&bytes);
        match decoder.decode_next() {
            Err(FrameError::LengthExceeded { declared, max }) => {
                assert_eq!(declared, MAX_FRAME_LEN + 1);
                assert_eq!(max, MAX_FRAME_LEN);
            }
            other => panic!("expected LengthExceeded, got {other:?}"),
        }
    }

    #[test]
    fn with_max_len_uses_the_supplied_cap_instead_of_the_protocol_ceiling() {
        let mut decoder = FrameDecoder::with_max_len(16);
        let mut bytes = 17u32.to_be_bytes().to_vec();
        bytes.extend_from_slice(&[0u8; 17]);
        decoder.extend(&bytes);
        match decoder.decode_next() {
            Err(FrameError::LengthExceeded { declared, max }) => {
                assert_eq!(declared, 17);
                assert_eq!(max, 16);
            }
            other => panic!("expected LengthExceeded, got {other:?}"),
        }
    }

    #[test]
    fn malformed_protobuf_is_skipped_without_desyncing_stream() {
        let garbage_len = 6u32;
        let mut bytes = garbage_len.to_be_bytes().to_vec();
        // tag 1 with wiretype 5 (32-bit) is not a valid field on CastMessage's
        // wire schema at this byte position once combined with trailing junk.
        bytes.extend_from_slice(&[0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
        bytes.extend_from_slice(&encode(&sample_message()));

        let mut decoder = FrameDecoder::new();
        decoder.extend(&bytes);

        match decoder.decode_next().unwrap() {
            Some(FrameEvent::Skipped) => {}
            other => panic!("expected Skipped, got {other:?}"),
        }
        match decoder.decode_next().unwrap() {
            Some(FrameEvent::Message(message)) => assert_eq!(message, sample_message()),
            other => panic!("expected following Message to decode cleanly, got {other:?}"),
        }
    }

    #[test]
    fn multiple_frames_in_one_read_all_drain() {
        let mut bytes = encode(&sample_message());
        bytes.extend_from_slice(&encode(&sample_message()));
        let mut decoder = FrameDecoder::new();
        decoder.extend(&bytes);
        assert!(matches!(decoder.decode_next().unwrap(), Some(FrameEvent::Message(_))));
        assert!(matches!(decoder.decode_next().unwrap(), Some(FrameEvent::Message(_))));
        assert!(matches!(decoder.decode_next().unwrap(), None));
    }

    #[test]
    fn encode_prefixes_big_endian_length() {
        let message = sample_message();
        let expected_len = message.encoded_len() as u32;
        let bytes = encode(&message);
        let declared = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        assert_eq!(declared, expected_len);
        assert_eq!(bytes.len(), 4 + expected_len as usize);
    }
}
