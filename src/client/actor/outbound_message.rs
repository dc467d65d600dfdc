//! Outbound message type for the writer loop.
//!
//! All envelopes pass through the single writer queue so frames never
//! interleave on the socket. Each carries a oneshot sender the writer uses to
//! report the outcome of the socket write back to the requester.

use tokio::sync::oneshot;

use crate::protocol::{CodecError, Envelope};

/// Envelope queued for the writer task.
#[derive(Debug)]
pub(crate) struct OutboundMessage {
    /// The envelope to encode and write
    pub(crate) envelope: Envelope,
    /// Completed once the frame has been flushed to the transport (or failed)
    pub(crate) ack: oneshot::Sender<Result<(), CodecError>>,
}

impl OutboundMessage {
    /// Create a message and the receiver for its write acknowledgement.
    pub(crate) fn new(envelope: Envelope) -> (Self, oneshot::Receiver<Result<(), CodecError>>) {
        let (ack, ack_rx) = oneshot::channel();
        (Self { envelope, ack }, ack_rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{BuildRequest, SessionId};

    #[test]
    fn outbound_message_debug_format() {
        let envelope = Envelope::request(SessionId::new(), BuildRequest::shutdown(false));
        let (message, _ack_rx) = OutboundMessage::new(envelope);

        let debug_str = format!("{:?}", message);
        assert!(
            debug_str.contains("envelope"),
            "Debug format should contain 'envelope': {}",
            debug_str
        );
    }

    #[tokio::test]
    async fn dropped_message_closes_ack_channel() {
        let envelope = Envelope::request(SessionId::new(), BuildRequest::shutdown(false));
        let (message, ack_rx) = OutboundMessage::new(envelope);

        drop(message);
        assert!(ack_rx.await.is_err(), "requester should observe the drop");
    }
}
