//! User configuration loading for buildlink.
//!
//! This module handles loading user-wide configuration from the XDG config directory.
//! User config location: $XDG_CONFIG_HOME/buildlink/buildlink.toml
//! Fallback: the platform config directory (e.g. ~/.config/buildlink/buildlink.toml)

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::ClientSettings;

/// Errors that can occur when loading a configuration file.
#[derive(Debug, Error)]
pub enum UserConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

pub type UserConfigResult<T> = Result<T, UserConfigError>;

/// Returns the path to the user configuration file.
///
/// The path is determined by:
/// 1. If $XDG_CONFIG_HOME is set: $XDG_CONFIG_HOME/buildlink/buildlink.toml
/// 2. Otherwise: <platform config dir>/buildlink/buildlink.toml
///
/// Returns None if no config directory can be determined.
pub fn user_config_path() -> Option<PathBuf> {
    let base = match std::env::var("XDG_CONFIG_HOME") {
        Ok(xdg_config) if !xdg_config.is_empty() => PathBuf::from(xdg_config),
        _ => dirs::config_dir()?,
    };
    Some(base.join("buildlink").join("buildlink.toml"))
}

/// Load settings from an explicit file. A missing file is an error.
pub fn load_config_file(path: &Path) -> UserConfigResult<ClientSettings> {
    let content = fs::read_to_string(path).map_err(|source| UserConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    ClientSettings::from_toml_str(&content).map_err(|source| UserConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Load the user config file if it exists.
///
/// Returns `Ok(None)` when there is no config directory or no file in it.
pub fn load_user_config() -> UserConfigResult<Option<ClientSettings>> {
    let Some(path) = user_config_path() else {
        return Ok(None);
    };
    if !path.exists() {
        log::debug!(
            target: "buildlink::config",
            "No user config at {}",
            path.display()
        );
        return Ok(None);
    }
    load_config_file(&path).map(Some)
}
