//! Tunnel record types

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TunnelError;

/// Scheme of the local endpoint a tunnel forwards to
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Http,
    Https,
}

impl Protocol {
    /// All supported protocols, in menu order
    pub const ALL: [Protocol; 2] = [Protocol::Http, Protocol::Https];

    /// Get the protocol name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }

    /// URL cloudflared should forward to
    pub fn local_url(&self, port: u16) -> String {
        format!("{}://localhost:{}", self.as_str(), port)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = TunnelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "https" => Ok(Self::Https),
            other => Err(TunnelError::InvalidInput(format!(
                "protocol must be http or https, got '{}'",
                other
            ))),
        }
    }
}

/// Check that a port lies in 1..=65535
pub fn validate_port(port: u32) -> Result<u16, TunnelError> {
    u16::try_from(port)
        .ok()
        .filter(|port| *port != 0)
        .ok_or_else(|| {
            TunnelError::InvalidInput(format!("port must be between 1 and 65535, got {}", port))
        })
}

/// Config record persisted next to the PID marker
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TunnelMeta {
    pub name: String,
    pub port: u16,
    pub protocol: Protocol,
    pub start_time: DateTime<Utc>,
    /// Size of the log before this run started writing to it
    #[serde(default)]
    pub log_offset: u64,
}

/// One running tunnel as seen by the registry
#[derive(Debug, Clone, PartialEq)]
pub struct TunnelRecord {
    /// Unique key; names every file that belongs to the tunnel
    pub id: String,
    /// Display label, equal to `id` for tunnels created by this crate
    pub name: String,
    pub local_port: u16,
    pub protocol: Protocol,
    pub pid: u32,
    pub start_time: DateTime<Utc>,
    pub log_path: PathBuf,
    /// Where this run's output begins in `log_path`
    pub log_offset: u64,
}

impl TunnelRecord {
    pub(crate) fn from_meta(id: &str, pid: u32, meta: TunnelMeta, log_path: PathBuf) -> Self {
        Self {
            id: id.to_string(),
            name: meta.name,
            local_port: meta.port,
            protocol: meta.protocol,
            pid,
            start_time: meta.start_time,
            log_path,
            log_offset: meta.log_offset,
        }
    }

    pub(crate) fn meta(&self) -> TunnelMeta {
        TunnelMeta {
            name: self.name.clone(),
            port: self.local_port,
            protocol: self.protocol,
            start_time: self.start_time,
            log_offset: self.log_offset,
        }
    }

    /// Local endpoint this tunnel exposes
    pub fn local_url(&self) -> String {
        self.protocol.local_url(self.local_port)
    }

    /// Public URL announced by this run so far, recomputed on every call.
    ///
    /// Logs are appended across runs of the same id, so output written
    /// before `log_offset` belongs to an earlier tunnel and is skipped.
    pub fn public_url(&self) -> Option<String> {
        super::url::extract_since(&self.log_path, self.log_offset)
    }

    /// Time since the tunnel was created
    pub fn uptime(&self) -> chrono::Duration {
        Utc::now() - self.start_time
    }
}
