// Per-user file locations.
// Config and token files live in the platform config directory.

use std::path::PathBuf;

use directories::ProjectDirs;

const APP_NAME: &str = "actions-status";

/// Base config directory (~/.config/actions-status on Linux).
pub fn config_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().to_path_buf())
}

/// Default path of the monitor configuration file.
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.json"))
}

/// Path of the persisted OAuth token.
pub fn token_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("oauth_token"))
}
