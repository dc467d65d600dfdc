//! Async client for a remote build server.
//!
//! One `BuildServerClient` keeps a single TCP connection to the build server
//! and multiplexes make, rebuild and shutdown requests over it. Each request
//! yields a `PendingRequest` that receives the server's responses and is
//! resolved exactly once, by a completing response or by termination.

pub mod client;
pub mod config;
pub mod error;
pub mod protocol;

pub use client::{
    BuildServerClient, ConnectionState, DispatchOutcome, PendingRequest, SessionEvent,
    SessionOutcome, TerminationReason,
};
pub use config::ClientSettings;
pub use error::{ClientError, ClientResult};
