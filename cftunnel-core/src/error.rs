//! Error types for cftunnel-core

use std::path::PathBuf;

use thiserror::Error;

/// Errors from tunnel registry and launcher operations
#[derive(Error, Debug)]
pub enum TunnelError {
    /// Malformed port, protocol, id, or selection
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Required external binary is not available
    #[error("{binary} is not installed or not found in PATH")]
    MissingDependency { binary: String },

    /// The OS could not create the tunnel process
    #[error("Failed to spawn {binary}: {source}")]
    SpawnFailed {
        binary: String,
        #[source]
        source: std::io::Error,
        log_tail: String,
    },

    /// The process spawned but was gone before the startup window elapsed
    #[error("Tunnel '{id}' exited right after launch")]
    LaunchFailed { id: String, log_tail: String },

    /// No live tunnel with this id
    #[error("Tunnel '{0}' not found")]
    NotFound(String),

    /// The OS refused to deliver a termination signal
    #[error("Failed to stop tunnel '{id}' (PID {pid}): {source}")]
    StopFailed {
        id: String,
        pid: u32,
        #[source]
        source: std::io::Error,
    },

    /// Base directory is not creatable or not writable
    #[error("Storage directory {path} is unavailable: {source}")]
    StorageUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File I/O failed after startup
    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// A record could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TunnelError {
    /// Captured process output attached to launch failures, if any
    pub fn log_tail(&self) -> Option<&str> {
        match self {
            Self::SpawnFailed { log_tail, .. } | Self::LaunchFailed { log_tail, .. } => {
                Some(log_tail.as_str()).filter(|tail| !tail.is_empty())
            }
            _ => None,
        }
    }

    /// Whether this error should end the process rather than a single operation
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::MissingDependency { .. } | Self::StorageUnavailable { .. }
        )
    }
}
