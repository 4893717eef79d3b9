use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use cftunnel_core::{Protocol, validate_port};

use super::types::CftunnelConfig;

/// Overrides the directory holding `config.toml` (useful for isolated tests)
pub const CONFIG_DIR_ENV: &str = "CFTUNNEL_CONFIG_DIR";

const CONFIG_FILE: &str = "config.toml";

pub struct ConfigLoader;

/// Report of what was saved and any warnings
#[derive(Debug, Default)]
pub struct SaveReport {
    /// Values that were saved: (key, value)
    pub saved: Vec<(String, String)>,
    /// Values that replaced a non-default one: (key, old_value, new_value)
    pub overwritten: Vec<(String, String, String)>,
}

impl fmt::Display for SaveReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.saved.is_empty() {
            writeln!(f, "Configuration saved:")?;
            for (key, value) in &self.saved {
                writeln!(f, "  {} = {}", key, value)?;
            }
        }

        if !self.overwritten.is_empty() {
            writeln!(f, "\nWarning: Overwriting existing values:")?;
            for (key, old, new) in &self.overwritten {
                writeln!(f, "  {} = {} -> {}", key, old, new)?;
            }
        }

        Ok(())
    }
}

impl ConfigLoader {
    /// Load the user config, falling back to defaults when there is none
    pub fn load() -> Result<CftunnelConfig> {
        Self::load_from_path(&Self::config_path())
    }

    /// Path of `config.toml`, honouring `CFTUNNEL_CONFIG_DIR`
    pub fn config_path() -> PathBuf {
        match std::env::var_os(CONFIG_DIR_ENV) {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir).join(CONFIG_FILE),
            _ => cftunnel_paths::config_dir().join(CONFIG_FILE),
        }
    }

    pub fn load_from_path(path: &Path) -> Result<CftunnelConfig> {
        if !path.exists() {
            return Ok(CftunnelConfig::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("Invalid config in {}", path.display()))
    }

    /// Save config to a specific path
    ///
    /// Creates parent directories if they don't exist.
    pub fn save_to_path(config: &CftunnelConfig, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let toml = toml::to_string_pretty(config)?;
        std::fs::write(path, toml)?;

        Ok(())
    }

    /// Save config with a report of what was saved and any warnings
    ///
    /// Returns a `SaveReport` containing:
    /// - `saved`: Non-default values that were saved
    /// - `overwritten`: Existing non-default values that changed
    pub fn save_with_report(config: &CftunnelConfig, path: &Path) -> Result<SaveReport> {
        let defaults = flatten(&CftunnelConfig::default());
        let existing = if path.exists() {
            Some(flatten(&Self::load_from_path(path)?))
        } else {
            None
        };

        let mut report = SaveReport::default();
        for (key, value) in flatten(config) {
            let default = lookup(&defaults, key);
            if Some(value.as_str()) != default {
                report.saved.push((key.to_string(), value.clone()));
            }
            if let Some(old) = existing.as_ref().and_then(|e| lookup(e, key))
                && Some(old) != default
                && old != value
            {
                report
                    .overwritten
                    .push((key.to_string(), old.to_string(), value.clone()));
            }
        }

        Self::save_to_path(config, path)?;
        Ok(report)
    }

    /// Apply one `section.key = value` assignment as given to `config set`
    pub fn set_value(config: &mut CftunnelConfig, key: &str, value: &str) -> Result<()> {
        let value = value.trim();
        match key {
            "defaults.port" => config.defaults.port = validate_port(parse(key, value)?)?,
            "defaults.protocol" => config.defaults.protocol = value.parse::<Protocol>()?,
            "launcher.binary" => {
                if value.is_empty() {
                    bail!("launcher.binary cannot be empty");
                }
                config.launcher.binary = value.to_string();
            }
            "launcher.startup_grace_ms" => config.launcher.startup_grace_ms = parse(key, value)?,
            "launcher.stop_poll_attempts" => {
                config.launcher.stop_poll_attempts = parse(key, value)?
            }
            "launcher.stop_poll_interval_ms" => {
                config.launcher.stop_poll_interval_ms = parse(key, value)?
            }
            "launcher.url_wait_secs" => config.launcher.url_wait_secs = parse(key, value)?,
            "storage.base_dir" => {
                config.storage.base_dir = (!value.is_empty()).then(|| PathBuf::from(value))
            }
            "logs.tail_lines" => config.logs.tail_lines = parse(key, value)?,
            _ => bail!(
                "Unknown config key '{}'. Known keys: {}",
                key,
                KEYS.join(", ")
            ),
        }
        Ok(())
    }
}

/// Keys accepted by [`ConfigLoader::set_value`]
pub const KEYS: &[&str] = &[
    "defaults.port",
    "defaults.protocol",
    "launcher.binary",
    "launcher.startup_grace_ms",
    "launcher.stop_poll_attempts",
    "launcher.stop_poll_interval_ms",
    "launcher.url_wait_secs",
    "storage.base_dir",
    "logs.tail_lines",
];

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| anyhow::anyhow!("'{}' is not a valid value for {}", value, key))
}

fn flatten(config: &CftunnelConfig) -> Vec<(&'static str, String)> {
    let mut values = vec![
        ("defaults.port", config.defaults.port.to_string()),
        (
            "defaults.protocol",
            format!("\"{}\"", config.defaults.protocol),
        ),
        ("launcher.binary", format!("\"{}\"", config.launcher.binary)),
        (
            "launcher.startup_grace_ms",
            config.launcher.startup_grace_ms.to_string(),
        ),
        (
            "launcher.stop_poll_attempts",
            config.launcher.stop_poll_attempts.to_string(),
        ),
        (
            "launcher.stop_poll_interval_ms",
            config.launcher.stop_poll_interval_ms.to_string(),
        ),
        (
            "launcher.url_wait_secs",
            config.launcher.url_wait_secs.to_string(),
        ),
        ("logs.tail_lines", config.logs.tail_lines.to_string()),
    ];
    if let Some(dir) = &config.storage.base_dir {
        values.push(("storage.base_dir", format!("\"{}\"", dir.display())));
    }
    values
}

fn lookup<'a>(values: &'a [(&'static str, String)], key: &str) -> Option<&'a str> {
    values
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v.as_str())
}
