use std::io::Write;

use anyhow::Result;
use clap::{Args, Subcommand};

use super::prompts::print_success_to;
use crate::config::{CONFIG_DIR_ENV, CftunnelConfig, ConfigLoader};

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Show current configuration (defaults filled in)
    Show,
    /// Show configuration and data paths
    Path,
    /// Set a value, e.g. `config set defaults.port 8080`
    Set {
        /// Dotted key such as defaults.protocol or logs.tail_lines
        key: String,
        value: String,
    },
}

pub fn run<W: Write>(args: ConfigArgs, out: &mut W) -> Result<()> {
    let path = ConfigLoader::config_path();
    match args.command {
        ConfigCommands::Show => show_config(&ConfigLoader::load_from_path(&path)?, out),
        ConfigCommands::Path => show_paths(&ConfigLoader::load_from_path(&path)?, out),
        ConfigCommands::Set { key, value } => {
            let mut config = ConfigLoader::load_from_path(&path)?;
            ConfigLoader::set_value(&mut config, &key, &value)?;
            let report = ConfigLoader::save_with_report(&config, &path)?;
            print_success_to(out, &format!("Updated {}", path.display()))?;
            write!(out, "{}", report)?;
            Ok(())
        }
    }
}

fn show_config<W: Write>(config: &CftunnelConfig, out: &mut W) -> Result<()> {
    let toml_str = toml::to_string_pretty(config)?;
    writeln!(out, "{}", toml_str)?;
    Ok(())
}

fn show_paths<W: Write>(config: &CftunnelConfig, out: &mut W) -> Result<()> {
    writeln!(
        out,
        "Config file: {}  (override the directory with {})",
        ConfigLoader::config_path().display(),
        CONFIG_DIR_ENV
    )?;
    writeln!(out, "Data dir:    {}", config.base_dir().display())?;
    writeln!(out, "Tunnel logs: {}", config.base_dir().join("logs").display())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use serial_test::serial;
    use tempfile::TempDir;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        config: ConfigArgs,
    }

    /// Point the loader at a scratch directory for the duration of `f`
    fn with_config_dir(f: impl FnOnce(&TempDir)) {
        let temp_dir = TempDir::new().unwrap();
        // SAFETY: every caller is #[serial]
        unsafe {
            std::env::set_var(CONFIG_DIR_ENV, temp_dir.path());
        }
        f(&temp_dir);
        unsafe {
            std::env::remove_var(CONFIG_DIR_ENV);
        }
    }

    fn run_cli(argv: &[&str]) -> (Result<()>, String) {
        let cli = TestCli::parse_from(argv);
        let mut out = Vec::new();
        let result = run(cli.config, &mut out);
        (result, String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_config_set_parses_key_and_value() {
        let cli = TestCli::parse_from(["test", "set", "defaults.port", "8080"]);
        assert!(matches!(
            cli.config.command,
            ConfigCommands::Set { ref key, ref value } if key == "defaults.port" && value == "8080"
        ));
    }

    #[test]
    #[serial]
    fn test_show_without_file_prints_defaults() {
        with_config_dir(|_| {
            let (result, out) = run_cli(&["test", "show"]);
            result.unwrap();
            assert!(out.contains("[defaults]"));
            assert!(out.contains("port = 3000"));
            assert!(out.contains("binary = \"cloudflared\""));
        });
    }

    #[test]
    #[serial]
    fn test_set_persists_value() {
        with_config_dir(|dir| {
            let (result, out) = run_cli(&["test", "set", "defaults.protocol", "https"]);
            result.unwrap();
            assert!(out.contains("defaults.protocol = \"https\""));

            let saved = ConfigLoader::load_from_path(&dir.path().join("config.toml")).unwrap();
            assert_eq!(saved.defaults.protocol, cftunnel_core::Protocol::Https);
        });
    }

    #[test]
    #[serial]
    fn test_set_unknown_key_fails_without_writing() {
        with_config_dir(|dir| {
            let (result, _) = run_cli(&["test", "set", "server.port", "1"]);
            assert!(result.is_err());
            assert!(!dir.path().join("config.toml").exists());
        });
    }

    #[test]
    #[serial]
    fn test_path_mentions_override_variable() {
        with_config_dir(|dir| {
            let (result, out) = run_cli(&["test", "path"]);
            result.unwrap();
            assert!(out.contains(CONFIG_DIR_ENV));
            assert!(out.contains(&dir.path().display().to_string()));
        });
    }
}
