use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ClientError, ClientResult};
use crate::protocol::DEFAULT_MAX_FRAME_LENGTH;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 4050;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 600;

/// Settings for reaching the build server.
///
/// Every field is optional in TOML; missing fields take their defaults.
///
/// ```toml
/// host = "build.local"
/// port = 4050
/// connect_timeout_ms = 5000
/// request_timeout_secs = 900
/// max_frame_length = 8388608
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientSettings {
    pub host: String,
    pub port: u16,
    /// Bound on resolving and dialing the build server
    pub connect_timeout_ms: u64,
    /// How long the CLI waits for a session to resolve
    pub request_timeout_secs: u64,
    /// Largest frame body accepted or sent, in bytes
    pub max_frame_length: usize,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
        }
    }
}

impl ClientSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Reject settings the client cannot work with.
    pub fn validate(&self) -> ClientResult<()> {
        if self.host.trim().is_empty() {
            return Err(ClientError::config("host must not be empty"));
        }
        if self.port == 0 {
            return Err(ClientError::config("port must be non-zero"));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ClientError::config("connect_timeout_ms must be greater than zero"));
        }
        if self.max_frame_length == 0 {
            return Err(ClientError::config("max_frame_length must be greater than zero"));
        }
        Ok(())
    }

    /// Parse settings from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}
