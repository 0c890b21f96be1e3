//! Platform directory lookup

use std::path::PathBuf;

use etcetera::{BaseStrategy, choose_base_strategy};

/// Directory holding the user-level `troza.toml`
///
/// `$XDG_CONFIG_HOME/troza` (or `~/.config/troza`) on Unix, `%APPDATA%\troza` on Windows.
pub fn user_config_dir() -> Option<PathBuf> {
    choose_base_strategy()
        .ok()
        .map(|strategy| strategy.config_dir().join("troza"))
}
