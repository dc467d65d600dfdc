//! Session registry for in-flight requests.
//!
//! This module provides the SessionRegistry which tracks outstanding sessions
//! and routes incoming responses to their callers.
//!
//! # Retirement
//!
//! A session leaves the registry exactly once, through one of:
//! - a completing response (`dispatch`)
//! - forced termination (`retire` / `terminate_all`)
//!
//! Every path starts with an atomic `remove`; only the caller that actually
//! removed the entry goes on to resolve the session. Completion and termination
//! are therefore mutually exclusive.

use std::sync::Arc;

use dashmap::DashMap;

use super::session::{PendingRequest, SessionSlot, TerminationReason};
use crate::protocol::{ResponsePayload, SessionId};

/// Result of routing one response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Intermediate response handed to the session; it stays registered
    Delivered,
    /// Completing response handed over and the session retired
    Completed,
    /// No such session (never registered, or already retired)
    Unknown,
}

/// Concurrent map from session identifier to its registry-side slot.
///
/// Slots are stored behind `Arc` so they can be cloned out of the map and used
/// without holding a shard lock.
pub(crate) struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<SessionSlot>>,
}

impl SessionRegistry {
    pub(crate) fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Register a new session and return the caller's handle.
    ///
    /// Must be called before the request is transmitted so that a response
    /// arriving early can still be matched.
    ///
    /// Returns `None` if a session with this identifier is already registered.
    pub(crate) fn register(&self, id: SessionId) -> Option<PendingRequest> {
        use dashmap::mapref::entry::Entry;

        match self.sessions.entry(id) {
            Entry::Occupied(_) => None,
            Entry::Vacant(vacant) => {
                let (slot, pending) = SessionSlot::open(id);
                vacant.insert(Arc::new(slot));
                Some(pending)
            }
        }
    }

    /// Route a response to its session.
    ///
    /// A completing response retires the session; any other response leaves
    /// it registered. Responses for unknown sessions are dropped.
    pub(crate) fn dispatch(&self, id: SessionId, response: ResponsePayload) -> DispatchOutcome {
        if response.is_completion() {
            match self.sessions.remove(&id) {
                Some((_, slot)) => {
                    slot.complete(response);
                    DispatchOutcome::Completed
                }
                None => DispatchOutcome::Unknown,
            }
        } else {
            // Clone the slot out so the shard guard is released before delivery.
            let slot = self.sessions.get(&id).map(|entry| Arc::clone(entry.value()));
            match slot {
                Some(slot) => {
                    slot.deliver(response);
                    DispatchOutcome::Delivered
                }
                None => DispatchOutcome::Unknown,
            }
        }
    }

    /// Force-terminate one session.
    ///
    /// Returns `true` if this call retired it, `false` if it was already gone.
    pub(crate) fn retire(&self, id: SessionId, reason: TerminationReason) -> bool {
        match self.sessions.remove(&id) {
            Some((_, slot)) => slot.terminate(reason),
            None => false,
        }
    }

    /// Force-terminate every registered session.
    ///
    /// Takes a snapshot of the identifiers first, then retires each one
    /// individually so no map lock is held while callers are notified.
    /// Returns the number of sessions this call retired.
    pub(crate) fn terminate_all(&self, reason: TerminationReason) -> usize {
        let ids: Vec<SessionId> = self.sessions.iter().map(|entry| *entry.key()).collect();

        ids.into_iter()
            .filter(|id| self.retire(*id, reason.clone()))
            .count()
    }

    pub(crate) fn len(&self) -> usize {
        self.sessions.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub(crate) fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }
}
