//! XDG Base Directory paths for cftunnel.
//!
//! XDG paths are used on every platform, like gh and kubectl do, so the
//! layout is the same on macOS and Linux.

use std::path::PathBuf;

const APP_NAME: &str = "cftunnel";

/// Get the cftunnel config directory.
///
/// Returns `$XDG_CONFIG_HOME/cftunnel` if set, otherwise
/// `~/.config/cftunnel`. This is where `config.toml` lives.
///
/// # Examples
///
/// ```
/// use cftunnel_paths::config_dir;
///
/// let config_file = config_dir().join("config.toml");
/// ```
pub fn config_dir() -> PathBuf {
    resolve(std::env::var_os("XDG_CONFIG_HOME"), ".config")
}

/// Get the cftunnel data directory.
///
/// Returns `$XDG_DATA_HOME/cftunnel` if set, otherwise
/// `~/.local/share/cftunnel`. Tunnel records and logs are stored here.
///
/// # Examples
///
/// ```
/// use cftunnel_paths::data_dir;
///
/// let logs = data_dir().join("logs");
/// ```
pub fn data_dir() -> PathBuf {
    resolve(std::env::var_os("XDG_DATA_HOME"), ".local/share")
}

fn resolve(xdg: Option<std::ffi::OsString>, home_relative: &str) -> PathBuf {
    match xdg.filter(|value| !value.is_empty()) {
        Some(base) => PathBuf::from(base).join(APP_NAME),
        None => dirs::home_dir()
            .map(|home| home.join(home_relative))
            .unwrap_or_else(|| PathBuf::from(home_relative))
            .join(APP_NAME),
    }
}
