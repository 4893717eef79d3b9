//! Quick-tunnel lifecycle: launching, tracking and stopping cloudflared

pub mod cloudflared;
pub mod launcher;
pub mod mock;
pub mod naming;
pub mod process;
pub mod record;
pub mod registry;
pub mod url;

pub use cloudflared::{CloudflaredInfo, DEFAULT_BINARY, check_installation};
pub use launcher::{CloudflaredLauncher, DEFAULT_PROBE_TIMEOUT, TunnelLauncher, probe_local_port};
pub use mock::{MockLauncher, MockProber};
pub use naming::sanitize_name;
pub use process::{ProcessProber, SystemProber};
pub use record::{Protocol, TunnelRecord, validate_port};
pub use registry::{Registry, RegistryConfig, RemoveAllReport, StopOutcome};
pub use url::{extract_latest, tail_lines};
