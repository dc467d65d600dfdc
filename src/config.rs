//! Client configuration.
//!
//! `ClientSettings` carries everything needed to reach the build server and
//! bound the client's waits. Settings come from built-in defaults, an
//! optional TOML file, and finally CLI flags, in that order of precedence.

pub mod settings;
pub mod user;

pub use settings::{
    ClientSettings, DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_HOST, DEFAULT_PORT,
    DEFAULT_REQUEST_TIMEOUT_SECS,
};
pub use user::{
    UserConfigError, UserConfigResult, load_config_file, load_user_config, user_config_path,
};
