//! Reader task for the build-server connection.
//!
//! The Reader Task:
//! - Waits for the start signal, sent once the connection is marked Connected
//! - Decodes frames from the read half of the socket
//! - Hands envelopes to the ResponseDispatcher
//! - Drops malformed frames with a warning (framing is still intact)
//! - On EOF or a fatal read error, reports the connection as closed so every
//!   outstanding session is terminated
//! - Exits quietly when cancelled; whoever cancelled it owns the teardown

use std::sync::Mutex;

use futures::StreamExt;
use log::{debug, warn};
use tokio::io::AsyncRead;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;

use crate::client::dispatcher::ResponseDispatcher;
use crate::client::session::TerminationReason;
use crate::error::LockResultExt;
use crate::protocol::{EnvelopeCodec, InboundFrame};

/// Handle to a running Reader Task.
///
/// Dropping the handle cancels the task.
pub(crate) struct ReaderTaskHandle {
    join_handle: Mutex<Option<JoinHandle<()>>>,
    start_tx: Mutex<Option<oneshot::Sender<()>>>,
    cancel_token: CancellationToken,
}

impl ReaderTaskHandle {
    /// Let the reader begin consuming frames.
    pub(crate) fn start(&self) {
        let start_tx = self
            .start_tx
            .lock()
            .recover_poison("ReaderTaskHandle::start")
            .take();
        if let Some(tx) = start_tx {
            let _ = tx.send(());
        }
    }

    /// Cancel the reader and wait for it to exit.
    pub(crate) async fn shutdown(&self) {
        self.cancel_token.cancel();

        let join_handle = self
            .join_handle
            .lock()
            .recover_poison("ReaderTaskHandle::shutdown")
            .take();

        if let Some(handle) = join_handle
            && let Err(e) = handle.await
        {
            warn!(
                target: "buildlink::client::reader",
                "Reader task ended abnormally: {}",
                e
            );
        }
    }

    /// Cancel the reader without waiting for it.
    pub(crate) fn cancel(&self) {
        self.cancel_token.cancel();
    }
}

impl Drop for ReaderTaskHandle {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

/// Spawn a reader task that decodes frames and dispatches them.
///
/// The task does nothing until `ReaderTaskHandle::start` is called.
pub(crate) fn spawn_reader_task<R>(
    frames: FramedRead<R, EnvelopeCodec>,
    dispatcher: ResponseDispatcher,
) -> ReaderTaskHandle
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let cancel_token = CancellationToken::new();
    let (start_tx, start_rx) = oneshot::channel();

    let join_handle = tokio::spawn(reader_loop(
        frames,
        dispatcher,
        start_rx,
        cancel_token.clone(),
    ));

    ReaderTaskHandle {
        join_handle: Mutex::new(Some(join_handle)),
        start_tx: Mutex::new(Some(start_tx)),
        cancel_token,
    }
}

/// The main reader loop - reads frames and dispatches them.
async fn reader_loop<R>(
    mut frames: FramedRead<R, EnvelopeCodec>,
    dispatcher: ResponseDispatcher,
    start_rx: oneshot::Receiver<()>,
    cancel_token: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    tokio::select! {
        biased;
        _ = cancel_token.cancelled() => return,
        started = start_rx => {
            if started.is_err() {
                return;
            }
        }
    }

    let reason = loop {
        tokio::select! {
            biased;

            _ = cancel_token.cancelled() => {
                debug!(
                    target: "buildlink::client::reader",
                    "Reader task cancelled, shutting down"
                );
                return;
            }

            next = frames.next() => {
                match next {
                    Some(Ok(InboundFrame::Envelope(envelope))) => {
                        dispatcher.on_message(envelope);
                    }
                    Some(Ok(InboundFrame::Malformed(reason))) => {
                        warn!(
                            target: "buildlink::client::reader",
                            "Dropping malformed envelope: {}",
                            reason
                        );
                    }
                    Some(Err(e)) => {
                        warn!(
                            target: "buildlink::client::reader",
                            "Reader error: {}, terminating outstanding sessions",
                            e
                        );
                        break TerminationReason::ConnectionLost(e.to_string());
                    }
                    None => {
                        debug!(
                            target: "buildlink::client::reader",
                            "Build server closed the connection"
                        );
                        break TerminationReason::ConnectionLost(
                            "build server closed the connection".to_string(),
                        );
                    }
                }
            }
        }
    };

    dispatcher.on_connection_closed(reason);
}
