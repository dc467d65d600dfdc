//! Routes decoded envelopes to their sessions and handles connection loss.

use std::sync::Arc;

use log::{debug, info, warn};

use super::ClientCore;
use super::registry::DispatchOutcome;
use super::session::TerminationReason;
use super::state::ConnectionState;
use crate::protocol::{Envelope, EnvelopeBody};

/// Callback target for the reader task.
///
/// Shares the client core with the facade, so responses and teardown both
/// observe the same registry and connection state.
#[derive(Clone)]
pub(crate) struct ResponseDispatcher {
    core: Arc<ClientCore>,
}

impl ResponseDispatcher {
    pub(crate) fn new(core: Arc<ClientCore>) -> Self {
        Self { core }
    }

    /// Handle one envelope read from the connection.
    pub(crate) fn on_message(&self, envelope: Envelope) {
        let (session_id, body) = envelope.into_parts();
        match body {
            EnvelopeBody::Response(response) => {
                match self.core.registry.dispatch(session_id, response) {
                    DispatchOutcome::Delivered | DispatchOutcome::Completed => {}
                    DispatchOutcome::Unknown => {
                        debug!(
                            target: "buildlink::client::dispatcher",
                            "Dropping response for unknown session {}",
                            session_id
                        );
                    }
                }
            }
            EnvelopeBody::Request(request) => {
                warn!(
                    target: "buildlink::client::dispatcher",
                    "Ignoring {} request sent by the build server (session {})",
                    request.kind(),
                    session_id
                );
            }
        }
    }

    /// Handle EOF or a fatal read error.
    ///
    /// If the connection was Connected, this call owns the teardown: it
    /// releases the connection handle and moves the state to Disconnected.
    /// Otherwise a local disconnect already owns it, and only outstanding
    /// sessions are terminated here.
    pub(crate) fn on_connection_closed(&self, reason: TerminationReason) {
        let owns_teardown = self
            .core
            .state
            .try_transition(ConnectionState::Connected, ConnectionState::Disconnecting)
            .is_ok();

        if owns_teardown && let Some(connection) = self.core.connection.swap(None) {
            // Dropping the last reference from inside the reader task is fine:
            // the handles only cancel their tasks on drop.
            connection.cancel();
        }

        let terminated = self.core.registry.terminate_all(reason.clone());
        if terminated > 0 {
            debug!(
                target: "buildlink::client::dispatcher",
                "Terminated {} outstanding session(s): {}",
                terminated,
                reason
            );
        }

        if owns_teardown {
            let _ = self
                .core
                .state
                .try_transition(ConnectionState::Disconnecting, ConnectionState::Disconnected);
            info!(
                target: "buildlink::client",
                "Disconnected from build server: {}",
                reason
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{BuildRequest, ResponsePayload, SessionId};
    use serde_json::json;
    use std::time::Duration;

    const SHORT: Duration = Duration::from_millis(100);

    fn connected_core() -> Arc<ClientCore> {
        let core = Arc::new(ClientCore::new());
        core.state
            .try_transition(ConnectionState::Disconnected, ConnectionState::Connecting)
            .unwrap();
        core.state
            .try_transition(ConnectionState::Connecting, ConnectionState::Connected)
            .unwrap();
        core
    }

    #[tokio::test]
    async fn response_is_routed_to_its_session() {
        let core = connected_core();
        let dispatcher = ResponseDispatcher::new(Arc::clone(&core));
        let id = SessionId::new();
        let mut pending = core.registry.register(id).unwrap();

        dispatcher.on_message(Envelope::response(id, ResponsePayload::completion(json!(7))));

        assert!(pending.await_completion(SHORT).await);
        assert_eq!(pending.responses()[0].payload(), &json!(7));
        assert!(core.registry.is_empty());
    }

    #[test]
    fn server_sent_request_is_ignored() {
        let core = connected_core();
        let dispatcher = ResponseDispatcher::new(Arc::clone(&core));
        let id = SessionId::new();
        let _pending = core.registry.register(id).unwrap();

        dispatcher.on_message(Envelope::request(id, BuildRequest::shutdown(false)));

        assert!(core.registry.contains(id));
    }

    #[tokio::test]
    async fn connection_closed_while_connected_tears_down() {
        let core = connected_core();
        let dispatcher = ResponseDispatcher::new(Arc::clone(&core));
        let mut pending = core.registry.register(SessionId::new()).unwrap();

        dispatcher.on_connection_closed(TerminationReason::ConnectionLost("eof".to_string()));

        assert_eq!(core.state.load(), ConnectionState::Disconnected);
        assert!(core.registry.is_empty());
        assert!(pending.await_completion(SHORT).await);
        assert_eq!(
            pending.termination(),
            Some(&TerminationReason::ConnectionLost("eof".to_string()))
        );
    }

    #[test]
    fn connection_closed_during_local_disconnect_leaves_state_to_owner() {
        let core = connected_core();
        core.state
            .try_transition(ConnectionState::Connected, ConnectionState::Disconnecting)
            .unwrap();
        let dispatcher = ResponseDispatcher::new(Arc::clone(&core));
        let _pending = core.registry.register(SessionId::new()).unwrap();

        dispatcher.on_connection_closed(TerminationReason::ConnectionLost("eof".to_string()));

        assert_eq!(core.state.load(), ConnectionState::Disconnecting);
        assert!(core.registry.is_empty());
    }
}
