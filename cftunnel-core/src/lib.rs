//! cftunnel-core: Core library for the cftunnel quick-tunnel manager
//!
//! This crate owns everything below the command line:
//!
//! - **Registry** - [`Registry`] maps tunnel ids to background cloudflared
//!   processes, persists them as small files, and sweeps dead ones
//! - **Launcher** - [`TunnelLauncher`] and [`CloudflaredLauncher`] spawn the
//!   external binary detached, with output captured to a log file
//! - **Liveness** - [`ProcessProber`] answers whether a PID is still running
//! - **URL extraction** - [`extract_latest`] recovers the public
//!   `trycloudflare.com` URL from a tunnel log
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use cftunnel_core::{CloudflaredLauncher, Protocol, Registry, RegistryConfig, SystemProber};
//!
//! # async fn example() -> Result<(), cftunnel_core::TunnelError> {
//! let registry = Registry::open(
//!     RegistryConfig::new("/tmp/cftunnel"),
//!     Arc::new(CloudflaredLauncher::default()),
//!     Arc::new(SystemProber),
//! )?;
//!
//! let record = registry.start("my-app", 3000, Protocol::Http).await?;
//! println!("{} running as PID {}", record.id, record.pid);
//! # Ok(())
//! # }
//! ```
//!
//! # Storage layout
//!
//! ```text
//! <base_dir>/
//! ├── tunnels/
//! │   ├── my-app.json   config record (name, port, protocol, start_time, log_offset)
//! │   └── my-app.pid    PID marker
//! └── logs/
//!     └── my-app.log    combined cloudflared output, kept after stop
//! ```

pub mod error;
pub mod tunnel;

pub use error::TunnelError;
pub use tunnel::{
    CloudflaredInfo, CloudflaredLauncher, DEFAULT_BINARY, DEFAULT_PROBE_TIMEOUT, MockLauncher,
    MockProber, ProcessProber, Protocol, Registry, RegistryConfig, RemoveAllReport, StopOutcome,
    SystemProber, TunnelLauncher, TunnelRecord, check_installation, extract_latest,
    probe_local_port, sanitize_name, tail_lines, validate_port,
};
