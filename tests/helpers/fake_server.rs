//! In-process fake build server speaking the envelope protocol over TCP.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use buildlink::protocol::{
    BuildRequest, Envelope, EnvelopeBody, EnvelopeCodec, InboundFrame, ResponsePayload,
    SessionId,
};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::codec::Framed;

/// How the fake server treats each connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Answer every request with one progress response, then a completion
    Respond,
    /// Close the socket right after reading the first request
    DropAfterRequest,
    /// Read requests, never answer, and keep the socket open
    Silent,
    /// Send an undecodable frame before answering each request
    MalformedThenRespond,
    /// Wait for two requests, send progress for both, then complete them in reverse order
    InterleavePairs,
}

pub struct FakeBuildServer {
    addr: SocketAddr,
    accepts: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<BuildRequest>>>,
    task: JoinHandle<()>,
}

impl FakeBuildServer {
    pub async fn start(behavior: Behavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake build server");
        let addr = listener.local_addr().expect("local addr");
        let accepts = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(Mutex::new(Vec::new()));

        let task = tokio::spawn(accept_loop(
            listener,
            behavior,
            Arc::clone(&accepts),
            Arc::clone(&requests),
        ));

        Self {
            addr,
            accepts,
            requests,
            task,
        }
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Number of TCP connections accepted so far.
    pub fn accept_count(&self) -> usize {
        self.accepts.load(Ordering::SeqCst)
    }

    /// Requests received so far, across all connections.
    pub fn requests(&self) -> Vec<BuildRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for FakeBuildServer {
    fn drop(&mut self) {
        // Aborting the accept loop drops its JoinSet, which aborts every connection.
        self.task.abort();
    }
}

async fn accept_loop(
    listener: TcpListener,
    behavior: Behavior,
    accepts: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<BuildRequest>>>,
) {
    let mut connections = JoinSet::new();
    loop {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        accepts.fetch_add(1, Ordering::SeqCst);
        connections.spawn(serve(stream, behavior, Arc::clone(&requests)));
    }
}

async fn serve(stream: TcpStream, behavior: Behavior, requests: Arc<Mutex<Vec<BuildRequest>>>) {
    let mut framed = Framed::new(stream, EnvelopeCodec::new());
    let mut waiting: Vec<SessionId> = Vec::new();

    while let Some(Ok(frame)) = framed.next().await {
        let InboundFrame::Envelope(envelope) = frame else {
            continue;
        };
        let (session_id, body) = envelope.into_parts();
        let EnvelopeBody::Request(request) = body else {
            continue;
        };
        let kind = request.kind().to_string();
        requests.lock().unwrap().push(request);

        match behavior {
            Behavior::Respond => {
                if respond(&mut framed, session_id, &kind).await.is_err() {
                    return;
                }
            }
            Behavior::DropAfterRequest => return,
            Behavior::Silent => {}
            Behavior::MalformedThenRespond => {
                let garbage = b"{\"not\":\"an envelope\"}";
                let stream = framed.get_mut();
                if stream.write_all(&[garbage.len() as u8]).await.is_err()
                    || stream.write_all(garbage).await.is_err()
                {
                    return;
                }
                if respond(&mut framed, session_id, &kind).await.is_err() {
                    return;
                }
            }
            Behavior::InterleavePairs => {
                waiting.push(session_id);
                if waiting.len() == 2 {
                    for id in &waiting {
                        let progress = ResponsePayload::progress(json!({"session": id.to_string()}));
                        if framed.send(Envelope::response(*id, progress)).await.is_err() {
                            return;
                        }
                    }
                    for id in waiting.drain(..).rev() {
                        let done = ResponsePayload::completion(json!({"session": id.to_string()}));
                        if framed.send(Envelope::response(id, done)).await.is_err() {
                            return;
                        }
                    }
                }
            }
        }
    }

    if behavior == Behavior::Silent {
        // Keep the socket open until the server is dropped.
        std::future::pending::<()>().await;
    }
}

async fn respond(
    framed: &mut Framed<TcpStream, EnvelopeCodec>,
    session_id: SessionId,
    kind: &str,
) -> Result<(), buildlink::protocol::CodecError> {
    framed
        .send(Envelope::response(
            session_id,
            ResponsePayload::progress(json!({"kind": kind, "stage": "running"})),
        ))
        .await?;
    framed
        .send(Envelope::response(
            session_id,
            ResponsePayload::completion(json!({"kind": kind, "stage": "done"})),
        ))
        .await
}
