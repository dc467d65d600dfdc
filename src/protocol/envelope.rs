//! Envelope types exchanged with the build server.
//!
//! Every message on the wire is an `Envelope`: a session identifier plus either
//! a request (client to server) or a response (server to client). Response
//! payloads are opaque to the client apart from the `completed` flag.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::session_id::SessionId;

/// Kind of request sent to the build server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Make,
    Rebuild,
    Shutdown,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestKind::Make => "make",
            RequestKind::Rebuild => "rebuild",
            RequestKind::Shutdown => "shutdown",
        };
        f.write_str(name)
    }
}

/// Request issued to the build server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BuildRequest {
    /// Incremental build of the given modules
    Make {
        project_id: String,
        modules: Vec<String>,
    },
    /// Full rebuild of the given modules
    Rebuild {
        project_id: String,
        modules: Vec<String>,
    },
    /// Ask the server to stop; `forced` skips waiting for running builds
    Shutdown { forced: bool },
}

impl BuildRequest {
    pub fn make(project_id: impl Into<String>, modules: Vec<String>) -> Self {
        BuildRequest::Make {
            project_id: project_id.into(),
            modules,
        }
    }

    pub fn rebuild(project_id: impl Into<String>, modules: Vec<String>) -> Self {
        BuildRequest::Rebuild {
            project_id: project_id.into(),
            modules,
        }
    }

    pub fn shutdown(forced: bool) -> Self {
        BuildRequest::Shutdown { forced }
    }

    pub fn kind(&self) -> RequestKind {
        match self {
            BuildRequest::Make { .. } => RequestKind::Make,
            BuildRequest::Rebuild { .. } => RequestKind::Rebuild,
            BuildRequest::Shutdown { .. } => RequestKind::Shutdown,
        }
    }
}

/// Response sent by the build server for an open session.
///
/// A session may receive any number of responses; the one with `completed`
/// set is the last and retires the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponsePayload {
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    completed: bool,
}

impl ResponsePayload {
    /// Intermediate response; the session stays open.
    pub fn progress(payload: Value) -> Self {
        Self {
            payload,
            completed: false,
        }
    }

    /// Final response; the session is retired once it is delivered.
    pub fn completion(payload: Value) -> Self {
        Self {
            payload,
            completed: true,
        }
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn into_payload(self) -> Value {
        self.payload
    }

    /// Whether the server declared the exchange finished.
    pub fn is_completion(&self) -> bool {
        self.completed
    }
}

/// Body of an envelope: a request or a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeBody {
    Request(BuildRequest),
    Response(ResponsePayload),
}

/// Message on the wire.
///
/// Immutable once constructed; only the codec touches its serialized form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    session_id: SessionId,
    #[serde(flatten)]
    body: EnvelopeBody,
}

impl Envelope {
    pub fn request(session_id: SessionId, request: BuildRequest) -> Self {
        Self {
            session_id,
            body: EnvelopeBody::Request(request),
        }
    }

    pub fn response(session_id: SessionId, response: ResponsePayload) -> Self {
        Self {
            session_id,
            body: EnvelopeBody::Response(response),
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn body(&self) -> &EnvelopeBody {
        &self.body
    }

    pub fn into_parts(self) -> (SessionId, EnvelopeBody) {
        (self.session_id, self.body)
    }
}
