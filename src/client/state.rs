//! Connection state machine for the build-server connection.
//!
//! Tracks the lifecycle of the single TCP connection a client owns:
//! - Disconnected: no connection, nothing in flight (initial and terminal state)
//! - Connecting: one caller is dialing
//! - Connected: requests may be sent
//! - Disconnecting: teardown in progress, outstanding sessions are being terminated
//!
//! Valid transitions:
//! - Disconnected -> Connecting (a caller won the right to dial)
//! - Connecting -> Connected (dial succeeded)
//! - Connecting -> Disconnected (dial failed)
//! - Connected -> Disconnecting (local disconnect or connection lost)
//! - Disconnecting -> Disconnected (teardown finished)

use std::sync::atomic::{AtomicU8, Ordering};

use log::{trace, warn};
use tokio::sync::Notify;

/// State of the build-server connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Disconnecting = 3,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Disconnected,
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Disconnecting,
            // Only `ConnectionState as u8` is ever stored in the cell.
            other => unreachable!("invalid connection state byte {}", other),
        }
    }

    /// Whether `self -> next` is an edge of the lifecycle.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connected, Disconnecting)
                | (Disconnecting, Disconnected)
        )
    }

    /// Connecting and Disconnecting are owned by exactly one in-flight operation.
    pub fn is_transitional(self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Disconnecting
        )
    }
}

/// Atomically updated connection state with change notification.
///
/// Transitions are compare-and-swap, so two callers racing on the same edge
/// never both win.
pub(crate) struct ConnectionStateCell {
    state: AtomicU8,
    changed: Notify,
}

impl ConnectionStateCell {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(ConnectionState::Disconnected as u8),
            changed: Notify::new(),
        }
    }

    pub(crate) fn load(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Move from `from` to `to` if the current state is `from`.
    ///
    /// Returns the observed state on failure. Edges outside the lifecycle are
    /// rejected without touching the state.
    pub(crate) fn try_transition(
        &self,
        from: ConnectionState,
        to: ConnectionState,
    ) -> Result<(), ConnectionState> {
        if !from.can_transition_to(to) {
            warn!(
                target: "buildlink::client",
                "Rejected invalid connection state transition {:?} -> {:?}",
                from,
                to
            );
            return Err(self.load());
        }

        match self
            .state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => {
                trace!(
                    target: "buildlink::client",
                    "Connection state {:?} -> {:?}",
                    from,
                    to
                );
                self.changed.notify_waiters();
                Ok(())
            }
            Err(actual) => Err(ConnectionState::from_u8(actual)),
        }
    }

    /// Wait until no connect or disconnect is in progress and return that state.
    pub(crate) async fn wait_until_settled(&self) -> ConnectionState {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            // Register before reading the state so a transition in between is not missed.
            notified.as_mut().enable();

            let state = self.load();
            if !state.is_transitional() {
                return state;
            }
            notified.await;
        }
    }
}
