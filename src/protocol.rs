//! Wire protocol types for build-server communication.
//!
//! This module provides the envelope exchanged with the build server and the
//! frame codec that turns a byte stream into discrete envelopes and back.
//!
//! ## Module Structure
//!
//! - `session_id` - SessionId type for correlating responses with requests
//! - `envelope` - Envelope, BuildRequest and ResponsePayload
//! - `codec` - varint32 length-prefixed frame codec

mod codec;
mod envelope;
mod session_id;

pub use codec::{CodecError, DEFAULT_MAX_FRAME_LENGTH, EnvelopeCodec, InboundFrame};
pub use envelope::{BuildRequest, Envelope, EnvelopeBody, RequestKind, ResponsePayload};
pub use session_id::SessionId;
