//! Writer task for the build-server connection.
//!
//! This module provides the single-writer actor that consumes the outbound
//! queue and writes framed envelopes to the socket. Every message carries an
//! acknowledgement channel; the requester awaits it so a failed write is
//! reported back to the session that issued it.
//!
//! # Shutdown
//!
//! Cancelling the task (explicitly or by dropping the handle):
//! 1. Drops every queued message (their requesters see the ack channel close)
//! 2. Flushes and shuts down the write half, bounded by `CLOSE_TIMEOUT`
//! 3. Returns the close result through the join handle

use std::io;
use std::sync::Mutex;
use std::time::Duration;

use futures::SinkExt;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedWrite;
use tokio_util::sync::CancellationToken;

use super::OutboundMessage;
use crate::error::LockResultExt;
use crate::protocol::{CodecError, EnvelopeCodec};

/// Queue capacity for outbound messages.
///
/// Bounds memory usage and provides backpressure to requesters.
pub(crate) const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Upper bound on flushing and shutting down the write half.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Handle to a running Writer Task.
///
/// Dropping the handle cancels the task.
pub(crate) struct WriterTaskHandle {
    join_handle: Mutex<Option<JoinHandle<Result<(), CodecError>>>>,
    cancel_token: CancellationToken,
}

impl WriterTaskHandle {
    /// Stop the writer and wait for the transport to be closed.
    ///
    /// Returns the result of flushing and shutting down the write half.
    /// Subsequent calls return `Ok(())`.
    pub(crate) async fn shutdown(&self) -> Result<(), CodecError> {
        self.cancel_token.cancel();

        let join_handle = self
            .join_handle
            .lock()
            .recover_poison("WriterTaskHandle::shutdown")
            .take();

        match join_handle {
            Some(handle) => match handle.await {
                Ok(result) => result,
                Err(e) => Err(CodecError::Io(io::Error::other(e))),
            },
            None => Ok(()),
        }
    }

    /// Cancel the writer task without waiting for it.
    pub(crate) fn cancel(&self) {
        self.cancel_token.cancel();
    }
}

impl Drop for WriterTaskHandle {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

/// Spawn a writer task that writes queued envelopes to `sink`.
pub(crate) fn spawn_writer_task<W>(
    sink: FramedWrite<W, EnvelopeCodec>,
    rx: mpsc::Receiver<OutboundMessage>,
) -> WriterTaskHandle
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let cancel_token = CancellationToken::new();
    let join_handle = tokio::spawn(writer_loop(sink, rx, cancel_token.clone()));

    WriterTaskHandle {
        join_handle: Mutex::new(Some(join_handle)),
        cancel_token,
    }
}

/// The main writer loop.
///
/// Exits when cancelled or when every sender has been dropped.
async fn writer_loop<W>(
    mut sink: FramedWrite<W, EnvelopeCodec>,
    mut rx: mpsc::Receiver<OutboundMessage>,
    cancel_token: CancellationToken,
) -> Result<(), CodecError>
where
    W: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            biased;

            _ = cancel_token.cancelled() => {
                log::debug!(
                    target: "buildlink::client::writer",
                    "Writer task cancelled, closing transport"
                );
                rx.close();
                let mut dropped = 0usize;
                while rx.try_recv().is_ok() {
                    dropped += 1;
                }
                if dropped > 0 {
                    log::debug!(
                        target: "buildlink::client::writer",
                        "Dropped {} queued message(s) on shutdown",
                        dropped
                    );
                }
                return close_sink(&mut sink).await;
            }

            msg = rx.recv() => {
                match msg {
                    Some(OutboundMessage { envelope, ack }) => {
                        let session_id = envelope.session_id();
                        let result = tokio::select! {
                            biased;
                            _ = cancel_token.cancelled() => Err(CodecError::Io(io::Error::new(
                                io::ErrorKind::ConnectionAborted,
                                "connection closing",
                            ))),
                            result = sink.send(envelope) => result,
                        };
                        if let Err(e) = &result {
                            log::warn!(
                                target: "buildlink::client::writer",
                                "Write error for session {}: {}",
                                session_id,
                                e
                            );
                        }
                        let _ = ack.send(result);
                    }
                    None => {
                        log::debug!(
                            target: "buildlink::client::writer",
                            "Writer channel closed, closing transport"
                        );
                        return close_sink(&mut sink).await;
                    }
                }
            }
        }
    }
}

async fn close_sink<W>(sink: &mut FramedWrite<W, EnvelopeCodec>) -> Result<(), CodecError>
where
    W: AsyncWrite + Unpin,
{
    match tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await {
        Ok(result) => result,
        Err(_) => Err(CodecError::Io(io::Error::new(
            io::ErrorKind::TimedOut,
            "timed out closing build server connection",
        ))),
    }
}
