mod loader;
mod types;

pub use loader::{CONFIG_DIR_ENV, ConfigLoader};
pub use types::CftunnelConfig;
