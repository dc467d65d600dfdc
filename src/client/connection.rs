//! TCP connection to the build server.
//!
//! A `ConnectionHandle` owns both halves of one socket through its actor
//! tasks: the writer drains the outbound queue, the reader feeds the
//! `ResponseDispatcher`. Dropping the handle cancels both tasks.

use std::io;
use std::net::SocketAddr;

use log::debug;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpSocket, TcpStream, lookup_host};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};

use super::actor::{
    OUTBOUND_QUEUE_CAPACITY, OutboundMessage, ReaderTaskHandle, WriterTaskHandle,
    spawn_reader_task, spawn_writer_task,
};
use super::dispatcher::ResponseDispatcher;
use crate::config::ClientSettings;
use crate::error::{ClientError, ClientResult};
use crate::protocol::{CodecError, Envelope, EnvelopeCodec};

/// Dial the build server with `TCP_NODELAY` and `SO_KEEPALIVE` set.
///
/// Every resolved address is tried in order; the last dial error is reported
/// if none of them accepts. The whole attempt is bounded by the connect
/// timeout from `settings`.
pub(crate) async fn dial(host: &str, port: u16, settings: &ClientSettings) -> ClientResult<TcpStream> {
    let address = format!("{}:{}", host, port);
    let timeout = settings.connect_timeout();

    match tokio::time::timeout(timeout, dial_any(&address)).await {
        Ok(result) => result,
        Err(_) => Err(ClientError::ConnectTimeout { address, timeout }),
    }
}

async fn dial_any(address: &str) -> ClientResult<TcpStream> {
    let candidates = lookup_host(address)
        .await
        .map_err(|e| ClientError::dial(address, e))?;

    let mut last_error = None;
    for candidate in candidates {
        match dial_one(candidate).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!(
                    target: "buildlink::client",
                    "Dial to {} failed: {}",
                    candidate,
                    e
                );
                last_error = Some(e);
            }
        }
    }

    match last_error {
        Some(e) => Err(ClientError::dial(address, e)),
        None => Err(ClientError::AddressResolution {
            address: address.to_string(),
        }),
    }
}

async fn dial_one(addr: SocketAddr) -> io::Result<TcpStream> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_keepalive(true)?;

    let stream = socket.connect(addr).await?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Live connection: outbound queue plus the reader and writer tasks.
pub(crate) struct ConnectionHandle {
    peer: Option<SocketAddr>,
    outbound: mpsc::Sender<OutboundMessage>,
    writer: WriterTaskHandle,
    reader: ReaderTaskHandle,
}

impl ConnectionHandle {
    /// Spawn the actor tasks over an already split transport.
    ///
    /// The reader stays idle until `start` is called.
    pub(crate) fn from_parts<R, W>(
        read: R,
        write: W,
        codec: EnvelopeCodec,
        dispatcher: ResponseDispatcher,
        peer: Option<SocketAddr>,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outbound, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let writer = spawn_writer_task(FramedWrite::new(write, codec.clone()), rx);
        let reader = spawn_reader_task(FramedRead::new(read, codec), dispatcher);

        Self {
            peer,
            outbound,
            writer,
            reader,
        }
    }

    /// Split a dialed stream and spawn the actor tasks.
    pub(crate) fn open_tcp(
        stream: TcpStream,
        settings: &ClientSettings,
        dispatcher: ResponseDispatcher,
    ) -> Self {
        let peer = stream.peer_addr().ok();
        let (read, write) = stream.into_split();
        let codec = EnvelopeCodec::with_max_frame_length(settings.max_frame_length);
        Self::from_parts(read, write, codec, dispatcher, peer)
    }

    /// Queue `envelope` and wait until the writer has put it on the wire.
    pub(crate) async fn transmit(&self, envelope: Envelope) -> Result<(), CodecError> {
        let (message, ack) = OutboundMessage::new(envelope);

        self.outbound
            .send(message)
            .await
            .map_err(|_| writer_gone())?;

        match ack.await {
            Ok(result) => result,
            Err(_) => Err(writer_gone()),
        }
    }

    /// Let the reader begin dispatching inbound frames.
    pub(crate) fn start(&self) {
        self.reader.start();
    }

    /// Flush and shut down the write half, then stop the reader.
    ///
    /// The reader is always stopped, even if closing the writer failed.
    pub(crate) async fn close(&self) -> Result<(), CodecError> {
        let result = self.writer.shutdown().await;
        self.reader.shutdown().await;
        result
    }

    /// Cancel both tasks without waiting for them.
    pub(crate) fn cancel(&self) {
        self.writer.cancel();
        self.reader.cancel();
    }

    pub(crate) fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }
}

fn writer_gone() -> CodecError {
    CodecError::Io(io::Error::new(
        io::ErrorKind::BrokenPipe,
        "build server connection is closed",
    ))
}
