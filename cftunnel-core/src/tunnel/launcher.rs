//! Spawning the tunnel binary

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use tokio::net::TcpStream;
use tracing::debug;

use super::cloudflared::DEFAULT_BINARY;
use crate::error::TunnelError;

/// Starts a tunnel process for a local endpoint
pub trait TunnelLauncher: Send + Sync {
    /// Spawn without waiting and return the new process id.
    ///
    /// Only a failure to create the process is an error. A process that
    /// exits right away comes back as a PID that is already dead.
    fn launch(&self, local_url: &str, log_path: &Path) -> Result<u32, TunnelError>;
}

/// Launcher running `<binary> tunnel --url <local_url>`
#[derive(Debug, Clone)]
pub struct CloudflaredLauncher {
    binary: PathBuf,
}

impl Default for CloudflaredLauncher {
    fn default() -> Self {
        Self::new(DEFAULT_BINARY)
    }
}

impl CloudflaredLauncher {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }
}

impl TunnelLauncher for CloudflaredLauncher {
    fn launch(&self, local_url: &str, log_path: &Path) -> Result<u32, TunnelError> {
        let stdout = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;
        let stderr = stdout.try_clone()?;

        let mut cmd = Command::new(&self.binary);
        cmd.arg("tunnel")
            .arg("--url")
            .arg(local_url)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr);

        // Own session, so closing the terminal does not take the tunnel down
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // SAFETY: pre_exec runs after fork, before exec; setsid is async-signal-safe
            unsafe {
                cmd.pre_exec(|| {
                    libc::setsid();
                    Ok(())
                });
            }
        }

        let child = cmd.spawn().map_err(|source| TunnelError::SpawnFailed {
            binary: self.binary.display().to_string(),
            source,
            log_tail: super::url::tail_lines(log_path, 20).unwrap_or_default(),
        })?;

        debug!(pid = child.id(), local_url, log = %log_path.display(), "Spawned tunnel process");
        Ok(child.id())
    }
}

/// Default timeout for [`probe_local_port`]
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// Best-effort check that something accepts TCP connections on `localhost:port`
pub async fn probe_local_port(port: u16, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, TcpStream::connect(("127.0.0.1", port))).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            debug!(port, error = %e, "Local port probe refused");
            false
        }
        Err(_) => {
            debug!(port, "Local port probe timed out");
            false
        }
    }
}
