//! Frame codec for build-server communication.
//!
//! Each frame is a protobuf-style varint32 length prefix followed by that many
//! bytes of JSON-encoded `Envelope`:
//!
//! ```text
//! [1-5 bytes] body length (base-128 varint, least significant group first)
//! [N bytes]   envelope JSON
//! ```
//!
//! The decoder reassembles partial reads and yields exactly one frame per
//! complete message, in the order they were written.

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use super::envelope::Envelope;

/// Default maximum body length: 16 MB
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

/// A varint32 never needs more than 5 bytes
const MAX_VARINT_LEN: usize = 5;

/// Errors that break framing. The stream cannot be resynchronized after one.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed frame length prefix")]
    MalformedLength,

    #[error("Frame length {length} exceeds maximum of {max} bytes")]
    FrameTooLarge { length: u64, max: usize },

    #[error("Failed to serialize envelope: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// One decoded frame.
#[derive(Debug)]
pub enum InboundFrame {
    /// Well-formed envelope
    Envelope(Envelope),
    /// Complete frame whose body is not a valid envelope.
    ///
    /// Framing is still intact, so the stream can continue past it.
    Malformed(String),
}

/// Length-prefixed JSON envelope codec.
#[derive(Debug, Clone)]
pub struct EnvelopeCodec {
    max_frame_length: usize,
}

impl EnvelopeCodec {
    pub fn new() -> Self {
        Self::with_max_frame_length(DEFAULT_MAX_FRAME_LENGTH)
    }

    pub fn with_max_frame_length(max_frame_length: usize) -> Self {
        Self { max_frame_length }
    }

    pub fn max_frame_length(&self) -> usize {
        self.max_frame_length
    }
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        Self::new()
    }
}

/// Read a varint length prefix.
///
/// Returns `Ok(None)` when more bytes are needed, otherwise the decoded value
/// and the number of prefix bytes.
fn read_varint(src: &[u8]) -> Result<Option<(u64, usize)>, CodecError> {
    let mut value: u64 = 0;
    for (index, byte) in src.iter().take(MAX_VARINT_LEN).enumerate() {
        value |= u64::from(byte & 0x7f) << (7 * index);
        if byte & 0x80 == 0 {
            return Ok(Some((value, index + 1)));
        }
    }

    if src.len() >= MAX_VARINT_LEN {
        Err(CodecError::MalformedLength)
    } else {
        Ok(None)
    }
}

fn put_varint(mut value: u64, dst: &mut BytesMut) {
    while value >= 0x80 {
        dst.put_u8((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    dst.put_u8(value as u8);
}

impl Decoder for EnvelopeCodec {
    type Item = InboundFrame;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some((length, prefix_len)) = read_varint(src)? else {
            return Ok(None);
        };

        let body_len = usize::try_from(length)
            .ok()
            .filter(|len| *len <= self.max_frame_length)
            .ok_or(CodecError::FrameTooLarge {
                length,
                max: self.max_frame_length,
            })?;

        let frame_len = prefix_len + body_len;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        src.advance(prefix_len);
        let body = src.split_to(body_len);

        let frame = match serde_json::from_slice::<Envelope>(&body) {
            Ok(envelope) => InboundFrame::Envelope(envelope),
            Err(e) => InboundFrame::Malformed(e.to_string()),
        };
        Ok(Some(frame))
    }
}

impl Encoder<Envelope> for EnvelopeCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Envelope, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body = serde_json::to_vec(&item)?;
        if body.len() > self.max_frame_length {
            return Err(CodecError::FrameTooLarge {
                length: body.len() as u64,
                max: self.max_frame_length,
            });
        }

        dst.reserve(MAX_VARINT_LEN + body.len());
        put_varint(body.len() as u64, dst);
        dst.extend_from_slice(&body);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{BuildRequest, EnvelopeBody, ResponsePayload, SessionId};
    use serde_json::json;

    fn encode(envelope: Envelope) -> BytesMut {
        let mut buf = BytesMut::new();
        EnvelopeCodec::new().encode(envelope, &mut buf).unwrap();
        buf
    }

    fn expect_envelope(frame: Option<InboundFrame>) -> Envelope {
        match frame {
            Some(InboundFrame::Envelope(envelope)) => envelope,
            other => panic!("expected envelope frame, got {:?}", other),
        }
    }

    #[test]
    fn varint_prefix_uses_continuation_bits() {
        let mut buf = BytesMut::new();
        put_varint(300, &mut buf);
        assert_eq!(&buf[..], &[0xac, 0x02]);

        assert_eq!(read_varint(&buf).unwrap(), Some((300, 2)));
    }

    #[test]
    fn single_byte_prefix_for_short_bodies() {
        let envelope = Envelope::request(SessionId::new(), BuildRequest::shutdown(false));
        let buf = encode(envelope.clone());

        let body_len = serde_json::to_vec(&envelope).unwrap().len();
        assert!(body_len < 128);
        assert_eq!(buf[0] as usize, body_len);
        assert_eq!(buf.len(), body_len + 1);
    }

    #[test]
    fn decode_waits_for_complete_frame() {
        let envelope = Envelope::request(
            SessionId::new(),
            BuildRequest::make("P", vec!["m1".to_string()]),
        );
        let full = encode(envelope.clone());
        let mut codec = EnvelopeCodec::new();

        // Feed one byte at a time; only the last byte completes the frame.
        let mut src = BytesMut::new();
        for (index, byte) in full.iter().enumerate() {
            src.put_u8(*byte);
            let frame = codec.decode(&mut src).unwrap();
            if index + 1 < full.len() {
                assert!(frame.is_none(), "frame emitted early at byte {}", index);
            } else {
                assert_eq!(expect_envelope(frame), envelope);
            }
        }
        assert!(src.is_empty());
    }

    #[test]
    fn decode_preserves_frame_order() {
        let first = Envelope::response(
            SessionId::new(),
            ResponsePayload::progress(json!({"step": 1})),
        );
        let second = Envelope::response(
            SessionId::new(),
            ResponsePayload::completion(json!({"step": 2})),
        );

        let mut src = encode(first.clone());
        src.extend_from_slice(&encode(second.clone()));

        let mut codec = EnvelopeCodec::new();
        assert_eq!(expect_envelope(codec.decode(&mut src).unwrap()), first);
        assert_eq!(expect_envelope(codec.decode(&mut src).unwrap()), second);
        assert!(codec.decode(&mut src).unwrap().is_none());
    }

    #[test]
    fn malformed_body_is_reported_without_losing_sync() {
        let garbage = b"{not json";
        let mut src = BytesMut::new();
        put_varint(garbage.len() as u64, &mut src);
        src.extend_from_slice(garbage);

        let valid = Envelope::response(SessionId::new(), ResponsePayload::completion(json!(null)));
        src.extend_from_slice(&encode(valid.clone()));

        let mut codec = EnvelopeCodec::new();
        match codec.decode(&mut src).unwrap() {
            Some(InboundFrame::Malformed(reason)) => assert!(!reason.is_empty()),
            other => panic!("expected malformed frame, got {:?}", other),
        }
        let next = expect_envelope(codec.decode(&mut src).unwrap());
        assert!(matches!(next.body(), EnvelopeBody::Response(_)));
    }

    #[test]
    fn oversized_length_prefix_is_rejected() {
        let mut src = BytesMut::new();
        put_varint(1024, &mut src);

        let mut codec = EnvelopeCodec::with_max_frame_length(512);
        let err = codec.decode(&mut src).unwrap_err();
        assert!(matches!(
            err,
            CodecError::FrameTooLarge {
                length: 1024,
                max: 512
            }
        ));
    }

    #[test]
    fn overlong_varint_is_rejected() {
        let mut src = BytesMut::from(&[0xff, 0xff, 0xff, 0xff, 0xff, 0x01][..]);
        let err = EnvelopeCodec::new().decode(&mut src).unwrap_err();
        assert!(matches!(err, CodecError::MalformedLength));
    }

    #[test]
    fn encode_rejects_envelope_above_limit() {
        let envelope = Envelope::request(
            SessionId::new(),
            BuildRequest::make("P", vec!["x".repeat(256)]),
        );
        let mut codec = EnvelopeCodec::with_max_frame_length(64);
        let mut dst = BytesMut::new();

        let err = codec.encode(envelope, &mut dst).unwrap_err();
        assert!(matches!(err, CodecError::FrameTooLarge { max: 64, .. }));
        assert!(dst.is_empty(), "nothing should be written on failure");
    }
}
