//! Error handling types for buildlink
//!
//! This module provides the error types surfaced by the build-server client.
//! Per-request failures are never reported here: they reach the caller through
//! the session's `PendingRequest` as a termination reason.

use std::sync::PoisonError;
use std::time::Duration;
use thiserror::Error;

use crate::protocol::CodecError;

/// Errors returned synchronously by connection lifecycle operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// TCP dial to the build server failed
    #[error("Failed to connect to build server at {address}: {source}")]
    Dial {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// TCP dial did not complete within the configured timeout
    #[error("Timed out after {timeout:?} connecting to build server at {address}")]
    ConnectTimeout { address: String, timeout: Duration },

    /// Host name resolved to no usable socket address
    #[error("Could not resolve build server address: {address}")]
    AddressResolution { address: String },

    /// Another caller's concurrent connection attempt failed while we waited on it
    #[error("Concurrent connection attempt failed")]
    ConnectAttemptFailed,

    /// Frame encoding or decoding failed
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid client configuration
    #[error("Invalid configuration: {message}")]
    Config { message: String },
}

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;

impl ClientError {
    /// Create a dial error
    pub fn dial(address: impl Into<String>, source: std::io::Error) -> Self {
        ClientError::Dial {
            address: address.into(),
            source,
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        ClientError::Config {
            message: message.into(),
        }
    }
}

/// Helper trait to recover the guard from a poisoned std lock.
pub trait LockResultExt<T> {
    /// Recover from a PoisonError with logging.
    ///
    /// The context parameter identifies which operation triggered lock recovery.
    fn recover_poison(self, context: &str) -> T;
}

impl<T> LockResultExt<T> for Result<T, PoisonError<T>> {
    fn recover_poison(self, context: &str) -> T {
        match self {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!(
                    target: "buildlink::lock_recovery",
                    "Recovered from poisoned lock in {}",
                    context
                );
                poisoned.into_inner()
            }
        }
    }
}
