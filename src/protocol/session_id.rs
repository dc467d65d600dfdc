//! Session identifier type for build-server communication.
//!
//! This module provides a type-safe wrapper for session identifiers, the
//! correlation token that ties every response back to the request that opened
//! the session.

use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Identifier of one logical request/response exchange.
///
/// Wraps a 128-bit ULID. The client generates one per request, so identifiers
/// are unique for the life of the connection and usable as registry keys.
///
/// # Wire Format
///
/// Serialized as the 26-character Crockford base32 ULID string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Ulid);

impl SessionId {
    /// Generate a fresh session identifier.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse a session identifier from its string form.
    ///
    /// Returns `None` if the string is not a valid ULID.
    pub fn parse(value: &str) -> Option<Self> {
        Ulid::from_string(value).ok().map(Self)
    }

    /// Get the raw 128-bit value.
    #[inline]
    pub fn as_u128(self) -> u128 {
        self.0.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl From<u128> for SessionId {
    fn from(value: u128) -> Self {
        Self(Ulid(value))
    }
}
