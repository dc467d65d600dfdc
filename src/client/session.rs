//! Per-session result channel.
//!
//! A session is one request/response exchange multiplexed over the shared
//! connection. Each side holds one end of an unbounded channel:
//!
//! - `SessionSlot` (registry side) pushes responses and resolves the session
//! - `PendingRequest` (caller side) receives them and observes resolution
//!
//! The channel closes exactly once, either after the completing response or
//! after a single `Terminated` event. Channel closure is the resolution signal,
//! so no separate completion gate is needed.

use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::error::LockResultExt;
use crate::protocol::{ResponsePayload, SessionId};

/// Why a session ended without a completing response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    /// The client disconnected while the session was outstanding
    Disconnected,
    /// The transport reported EOF or a read error
    ConnectionLost(String),
    /// The request never left the machine
    TransmitFailed(String),
    /// Teardown started between registering and sending the request
    NotConnected,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationReason::Disconnected => f.write_str("client disconnected"),
            TerminationReason::ConnectionLost(cause) => write!(f, "connection lost: {}", cause),
            TerminationReason::TransmitFailed(cause) => write!(f, "transmit failed: {}", cause),
            TerminationReason::NotConnected => f.write_str("connection not ready"),
        }
    }
}

/// Event delivered to the caller of a session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A response from the build server. The last one has `is_completion()` set.
    Response(ResponsePayload),
    /// The session was force-terminated; no further events follow.
    Terminated(TerminationReason),
}

/// Final result of a session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    Completed {
        responses: Vec<ResponsePayload>,
    },
    Terminated {
        responses: Vec<ResponsePayload>,
        reason: TerminationReason,
    },
}

impl SessionOutcome {
    pub fn responses(&self) -> &[ResponsePayload] {
        match self {
            SessionOutcome::Completed { responses } => responses,
            SessionOutcome::Terminated { responses, .. } => responses,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, SessionOutcome::Completed { .. })
    }
}

/// Registry-side end of a session.
///
/// Holds the sender until the session is resolved. Resolution takes the
/// sender out under the lock, so it happens at most once and nothing can be
/// delivered afterwards.
pub(crate) struct SessionSlot {
    id: SessionId,
    events: Mutex<Option<mpsc::UnboundedSender<SessionEvent>>>,
}

impl SessionSlot {
    /// Create a slot and the caller-facing handle bound to it.
    pub(crate) fn open(id: SessionId) -> (Self, PendingRequest) {
        let (tx, rx) = mpsc::unbounded_channel();
        let slot = Self {
            id,
            events: Mutex::new(Some(tx)),
        };
        (slot, PendingRequest::new(id, rx))
    }

    /// Deliver an intermediate response.
    ///
    /// Returns `false` if the session is already resolved or the caller dropped
    /// its handle.
    pub(crate) fn deliver(&self, response: ResponsePayload) -> bool {
        let events = self.events.lock().recover_poison("SessionSlot::deliver");
        match events.as_ref() {
            Some(tx) => tx.send(SessionEvent::Response(response)).is_ok(),
            None => false,
        }
    }

    /// Deliver the completing response and resolve the session.
    ///
    /// Returns `false` if the session was already resolved.
    pub(crate) fn complete(&self, response: ResponsePayload) -> bool {
        self.resolve(SessionEvent::Response(response))
    }

    /// Notify the caller of termination and resolve the session.
    ///
    /// Returns `false` if the session was already resolved.
    pub(crate) fn terminate(&self, reason: TerminationReason) -> bool {
        self.resolve(SessionEvent::Terminated(reason))
    }

    #[cfg(test)]
    pub(crate) fn is_resolved(&self) -> bool {
        self.events
            .lock()
            .recover_poison("SessionSlot::is_resolved")
            .is_none()
    }

    fn resolve(&self, last: SessionEvent) -> bool {
        let sender = self
            .events
            .lock()
            .recover_poison("SessionSlot::resolve")
            .take();

        match sender {
            Some(tx) => {
                if tx.send(last).is_err() {
                    log::debug!(
                        target: "buildlink::client",
                        "Session {} resolved after caller dropped its handle",
                        self.id
                    );
                }
                // Dropping the sender closes the channel: the caller sees resolution.
                true
            }
            None => false,
        }
    }
}

/// Caller-facing handle for an outstanding request.
///
/// Await it to learn when the exchange is finished. Dropping it is allowed;
/// later responses for the session are then discarded.
#[derive(Debug)]
pub struct PendingRequest {
    session_id: SessionId,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    responses: Vec<ResponsePayload>,
    termination: Option<TerminationReason>,
    resolved: bool,
}

impl PendingRequest {
    fn new(session_id: SessionId, events: mpsc::UnboundedReceiver<SessionEvent>) -> Self {
        Self {
            session_id,
            events,
            responses: Vec::new(),
            termination: None,
            resolved: false,
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Receive the next event for this session.
    ///
    /// Returns `None` once the session is resolved and every event has been
    /// consumed. Events returned here are not recorded in `responses()`.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        if self.resolved {
            return None;
        }
        let event = self.events.recv().await;
        if event.is_none() {
            self.resolved = true;
        }
        event
    }

    /// Wait until the session is resolved or `timeout` elapses.
    ///
    /// Returns `true` if the session is resolved. Events received while waiting
    /// are kept and exposed by `responses()` and `termination()`. Calling this
    /// again after a timeout resumes where the previous call stopped.
    pub async fn await_completion(&mut self, timeout: Duration) -> bool {
        if self.resolved {
            return true;
        }
        tokio::time::timeout(timeout, self.drain()).await.is_ok()
    }

    /// Wait for resolution without a timeout and return the outcome.
    pub async fn wait(mut self) -> SessionOutcome {
        self.drain().await;
        match self.termination {
            Some(reason) => SessionOutcome::Terminated {
                responses: self.responses,
                reason,
            },
            None => SessionOutcome::Completed {
                responses: self.responses,
            },
        }
    }

    /// Whether the session has been observed as resolved by this handle.
    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    /// Responses drained by `await_completion`.
    pub fn responses(&self) -> &[ResponsePayload] {
        &self.responses
    }

    /// Termination reason drained by `await_completion`, if the session was
    /// force-terminated.
    pub fn termination(&self) -> Option<&TerminationReason> {
        self.termination.as_ref()
    }

    async fn drain(&mut self) {
        while !self.resolved {
            match self.events.recv().await {
                Some(SessionEvent::Response(response)) => self.responses.push(response),
                Some(SessionEvent::Terminated(reason)) => self.termination = Some(reason),
                None => self.resolved = true,
            }
        }
    }
}
