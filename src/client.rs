//! Build-server client.
//!
//! This module provides the BuildServerClient which owns one persistent TCP
//! connection to a build server and multiplexes concurrent build requests over
//! it. Every request is a session keyed by a `SessionId`; responses are routed
//! back to the caller's `PendingRequest` until a completing response or a
//! forced termination resolves it.
//!
//! ## Module Structure
//!
//! - `state` - connection lifecycle state machine
//! - `session` - per-session result channel (`PendingRequest`)
//! - `registry` - in-flight session map
//! - `dispatcher` - routes inbound envelopes, handles connection loss
//! - `actor` - reader and writer tasks
//! - `connection` - dialing and the per-connection handle

mod actor;
mod connection;
mod dispatcher;
mod registry;
mod session;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use log::{debug, info, warn};

pub use registry::DispatchOutcome;
pub use session::{PendingRequest, SessionEvent, SessionOutcome, TerminationReason};
pub use state::ConnectionState;

use connection::ConnectionHandle;
use dispatcher::ResponseDispatcher;
use registry::SessionRegistry;
use state::ConnectionStateCell;

use crate::config::ClientSettings;
use crate::error::{ClientError, ClientResult};
use crate::protocol::{BuildRequest, CodecError, Envelope, SessionId};

/// State shared between the facade and the reader task.
pub(crate) struct ClientCore {
    pub(crate) state: ConnectionStateCell,
    /// Present only while Connected (and during teardown, until taken).
    pub(crate) connection: ArcSwapOption<ConnectionHandle>,
    pub(crate) registry: SessionRegistry,
}

impl ClientCore {
    pub(crate) fn new() -> Self {
        Self {
            state: ConnectionStateCell::new(),
            connection: ArcSwapOption::empty(),
            registry: SessionRegistry::new(),
        }
    }
}

/// Client for a remote build server.
///
/// All methods take `&self`; share the client with `Arc` to issue requests
/// from several tasks at once.
///
/// # Example
///
/// ```no_run
/// # async fn run() -> buildlink::ClientResult<()> {
/// use buildlink::BuildServerClient;
///
/// let client = BuildServerClient::new();
/// client.connect("127.0.0.1", 4050).await?;
/// if let Some(pending) = client.send_make("P", vec!["m1".to_string()]).await {
///     let outcome = pending.wait().await;
///     println!("completed: {}", outcome.is_completed());
/// }
/// client.disconnect().await?;
/// # Ok(())
/// # }
/// ```
pub struct BuildServerClient {
    core: Arc<ClientCore>,
    settings: ClientSettings,
}

impl Default for BuildServerClient {
    fn default() -> Self {
        Self::new()
    }
}

impl BuildServerClient {
    /// Create a disconnected client with default settings.
    pub fn new() -> Self {
        Self {
            core: Arc::new(ClientCore::new()),
            settings: ClientSettings::default(),
        }
    }

    /// Create a disconnected client with the given settings.
    pub fn with_settings(settings: ClientSettings) -> ClientResult<Self> {
        settings.validate()?;
        Ok(Self {
            core: Arc::new(ClientCore::new()),
            settings,
        })
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn state(&self) -> ConnectionState {
        self.core.state.load()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Number of sessions still awaiting resolution.
    pub fn pending_sessions(&self) -> usize {
        self.core.registry.len()
    }

    /// Address of the connected build server, if any.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.core
            .connection
            .load_full()
            .and_then(|connection| connection.peer_addr())
    }

    /// Connect to `host:port`.
    ///
    /// Only one caller dials at a time. Callers that arrive while a dial is in
    /// flight wait for it and share its result. Returns `Ok(())` immediately
    /// when already connected.
    pub async fn connect(&self, host: &str, port: u16) -> ClientResult<()> {
        loop {
            match self
                .core
                .state
                .try_transition(ConnectionState::Disconnected, ConnectionState::Connecting)
            {
                Ok(()) => break,
                Err(ConnectionState::Connected) => return Ok(()),
                Err(ConnectionState::Connecting) => {
                    return match self.core.state.wait_until_settled().await {
                        ConnectionState::Connected => Ok(()),
                        _ => Err(ClientError::ConnectAttemptFailed),
                    };
                }
                Err(ConnectionState::Disconnecting) => {
                    self.core.state.wait_until_settled().await;
                }
                // Lost a race with a transition back to Disconnected; try again.
                Err(ConnectionState::Disconnected) => {}
            }
        }

        // Reverts Connecting -> Disconnected on failure or if this future is dropped mid-dial.
        let mut dial_guard = ConnectingGuard::new(&self.core.state);

        let stream = match connection::dial(host, port, &self.settings).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(
                    target: "buildlink::client",
                    "Failed to connect to build server: {}",
                    e
                );
                return Err(e);
            }
        };

        let connection = Arc::new(ConnectionHandle::open_tcp(
            stream,
            &self.settings,
            ResponseDispatcher::new(Arc::clone(&self.core)),
        ));
        self.core.connection.store(Some(Arc::clone(&connection)));

        if self
            .core
            .state
            .try_transition(ConnectionState::Connecting, ConnectionState::Connected)
            .is_err()
        {
            // Only the dialer leaves Connecting, so this is unreachable in practice.
            self.core.connection.store(None);
            connection.cancel();
            return Err(ClientError::ConnectAttemptFailed);
        }
        dial_guard.disarm();
        connection.start();

        info!(
            target: "buildlink::client",
            "Connected to build server at {}:{}",
            host,
            port
        );
        Ok(())
    }

    /// Connect to the host and port from this client's settings.
    pub async fn connect_configured(&self) -> ClientResult<()> {
        let host = self.settings.host.clone();
        self.connect(&host, self.settings.port).await
    }

    /// Close the connection and terminate every outstanding session.
    ///
    /// Does nothing unless connected. If another path is already tearing the
    /// connection down, waits for it to finish. When this returns, no session
    /// is left registered.
    pub async fn disconnect(&self) -> ClientResult<()> {
        match self
            .core
            .state
            .try_transition(ConnectionState::Connected, ConnectionState::Disconnecting)
        {
            Ok(()) => {}
            Err(ConnectionState::Disconnecting) => {
                self.core.state.wait_until_settled().await;
                return Ok(());
            }
            Err(_) => return Ok(()),
        }

        // Teardown runs in its own task so it completes even if the caller
        // stops polling this future.
        let teardown = tokio::spawn(tear_down(Arc::clone(&self.core)));
        match teardown.await {
            Ok(close_result) => close_result.map_err(ClientError::from),
            Err(e) => Err(ClientError::Io(std::io::Error::other(e))),
        }
    }

    /// Issue a request and return the handle that observes its responses.
    ///
    /// Returns `None`, with no side effects, when not connected. If the write
    /// fails the returned handle is already resolved with
    /// `TerminationReason::TransmitFailed`.
    pub async fn send_request(&self, request: BuildRequest) -> Option<PendingRequest> {
        if !self.is_connected() {
            return None;
        }
        let connection = self.core.connection.load_full()?;

        let session_id = SessionId::new();
        let Some(pending) = self.core.registry.register(session_id) else {
            warn!(
                target: "buildlink::client",
                "Session id {} already registered, dropping {} request",
                session_id,
                request.kind()
            );
            return None;
        };

        // Teardown may have swept the registry between the first check and registration.
        if !self.is_connected() {
            self.core
                .registry
                .retire(session_id, TerminationReason::NotConnected);
            return None;
        }

        let kind = request.kind();
        if let Err(e) = connection
            .transmit(Envelope::request(session_id, request))
            .await
        {
            warn!(
                target: "buildlink::client",
                "Failed to send {} request for session {}: {}",
                kind,
                session_id,
                e
            );
            self.core
                .registry
                .retire(session_id, TerminationReason::TransmitFailed(e.to_string()));
        } else {
            debug!(
                target: "buildlink::client",
                "Sent {} request for session {}",
                kind,
                session_id
            );
        }

        Some(pending)
    }

    pub async fn send_make(
        &self,
        project_id: impl Into<String>,
        modules: Vec<String>,
    ) -> Option<PendingRequest> {
        self.send_request(BuildRequest::make(project_id, modules))
            .await
    }

    pub async fn send_rebuild(
        &self,
        project_id: impl Into<String>,
        modules: Vec<String>,
    ) -> Option<PendingRequest> {
        self.send_request(BuildRequest::rebuild(project_id, modules))
            .await
    }

    /// Ask the build server to shut down; `forced` skips waiting for running builds.
    pub async fn send_shutdown_request(&self, forced: bool) -> Option<PendingRequest> {
        self.send_request(BuildRequest::shutdown(forced)).await
    }
}

/// Close the connection, terminate every session and settle in Disconnected.
///
/// Must only run after this caller moved the state to Disconnecting.
async fn tear_down(core: Arc<ClientCore>) -> Result<(), CodecError> {
    let close_result = match core.connection.swap(None) {
        Some(connection) => connection.close().await,
        None => Ok(()),
    };

    let terminated = core.registry.terminate_all(TerminationReason::Disconnected);
    if terminated > 0 {
        debug!(
            target: "buildlink::client",
            "Terminated {} outstanding session(s) on disconnect",
            terminated
        );
    }

    let _ = core
        .state
        .try_transition(ConnectionState::Disconnecting, ConnectionState::Disconnected);
    info!(target: "buildlink::client", "Disconnected from build server");

    close_result
}

/// Owns the Connecting state for the duration of a dial.
///
/// Unless disarmed, dropping it moves the state back to Disconnected and wakes
/// callers waiting on the dial.
struct ConnectingGuard<'a> {
    state: &'a ConnectionStateCell,
    armed: bool,
}

impl<'a> ConnectingGuard<'a> {
    fn new(state: &'a ConnectionStateCell) -> Self {
        Self { state, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let _ = self
                .state
                .try_transition(ConnectionState::Connecting, ConnectionState::Disconnected);
        }
    }
}

impl Drop for BuildServerClient {
    fn drop(&mut self) {
        // The reader task holds the core through its dispatcher; releasing the
        // connection here breaks that cycle.
        if let Some(connection) = self.core.connection.swap(None) {
            connection.cancel();
        }
        self.core
            .registry
            .terminate_all(TerminationReason::Disconnected);
    }
}
