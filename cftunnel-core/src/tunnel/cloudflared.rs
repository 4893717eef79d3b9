//! cloudflared discovery

use std::path::PathBuf;

use tokio::process::Command;
use tracing::debug;

use crate::error::TunnelError;

/// Default name of the tunnel binary looked up on PATH
pub const DEFAULT_BINARY: &str = "cloudflared";

/// Result of checking cloudflared installation
#[derive(Debug, Clone)]
pub struct CloudflaredInfo {
    pub version: String,
    pub path: PathBuf,
}

/// Resolve `binary` on PATH and read its version.
///
/// A binary that resolves but fails `--version` still counts as installed,
/// with version `unknown`.
pub async fn check_installation(binary: &str) -> Result<CloudflaredInfo, TunnelError> {
    let path = which::which(binary).map_err(|e| {
        debug!(binary, error = %e, "Tunnel binary lookup failed");
        TunnelError::MissingDependency {
            binary: binary.to_string(),
        }
    })?;

    let version = match Command::new(&path).arg("--version").output().await {
        Ok(output) if output.status.success() => {
            parse_version(&String::from_utf8_lossy(&output.stdout))
        }
        _ => None,
    }
    .unwrap_or_else(|| "unknown".to_string());

    Ok(CloudflaredInfo { version, path })
}

/// Parse "cloudflared version 2024.12.0 (built 2024-12-01)"
///
/// Banners of any other shape yield `None`.
fn parse_version(output: &str) -> Option<String> {
    let mut words = output.lines().next()?.split_whitespace();
    words.next()?;
    if words.next()? != "version" {
        return None;
    }
    words.next().map(String::from)
}
