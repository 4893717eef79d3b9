use std::path::PathBuf;
use std::time::Duration;

use cftunnel_core::{DEFAULT_BINARY, Protocol, RegistryConfig};
use serde::{Deserialize, Serialize};

/// Default local port offered for new tunnels
pub const DEFAULT_PORT: u16 = 3000;

/// Default number of log lines shown by `logs`
pub const DEFAULT_TAIL_LINES: usize = 50;

/// Contents of `config.toml`; every section and key is optional
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CftunnelConfig {
    pub defaults: DefaultsSection,
    pub launcher: LauncherSection,
    pub storage: StorageSection,
    pub logs: LogsSection,
}

/// Values pre-filled when starting a tunnel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultsSection {
    pub port: u16,
    pub protocol: Protocol,
}

impl Default for DefaultsSection {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            protocol: Protocol::Http,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherSection {
    /// cloudflared executable, looked up in PATH unless absolute
    pub binary: String,
    /// How long a new tunnel must survive to count as started
    pub startup_grace_ms: u64,
    /// Liveness checks after SIGTERM before SIGKILL
    pub stop_poll_attempts: u32,
    pub stop_poll_interval_ms: u64,
    /// How long `start` waits for the public URL
    pub url_wait_secs: u64,
}

impl Default for LauncherSection {
    fn default() -> Self {
        Self {
            binary: DEFAULT_BINARY.to_string(),
            startup_grace_ms: 3000,
            stop_poll_attempts: 5,
            stop_poll_interval_ms: 1000,
            url_wait_secs: 15,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StorageSection {
    /// Overrides the XDG data directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogsSection {
    pub tail_lines: usize,
}

impl Default for LogsSection {
    fn default() -> Self {
        Self {
            tail_lines: DEFAULT_TAIL_LINES,
        }
    }
}

impl CftunnelConfig {
    /// Where tunnel records and logs live
    pub fn base_dir(&self) -> PathBuf {
        self.storage
            .base_dir
            .clone()
            .unwrap_or_else(cftunnel_paths::data_dir)
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig::new(self.base_dir())
            .with_startup_grace(Duration::from_millis(self.launcher.startup_grace_ms))
            .with_stop_polling(
                self.launcher.stop_poll_attempts,
                Duration::from_millis(self.launcher.stop_poll_interval_ms),
            )
    }

    pub fn url_wait(&self) -> Duration {
        Duration::from_secs(self.launcher.url_wait_secs)
    }
}
