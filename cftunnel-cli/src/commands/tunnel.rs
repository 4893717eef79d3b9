//! Arguments of the scripted tunnel subcommands

use clap::Args;

use super::dispatch::Action;
use cftunnel_core::Protocol;

/// Arguments for `cftunnel start`
#[derive(Debug, Args)]
pub struct StartArgs {
    /// Tunnel name; letters, digits, '-' and '_' (generated when omitted)
    #[arg(short, long, default_value = "")]
    pub name: String,

    /// Local port to expose (defaults to the configured port)
    #[arg(short, long)]
    pub port: Option<u32>,

    /// Local protocol: http or https (defaults to the configured protocol)
    #[arg(long)]
    pub protocol: Option<Protocol>,

    /// Return right after launch instead of waiting for the public URL
    #[arg(long)]
    pub no_wait: bool,
}

/// Arguments for `cftunnel stop`
#[derive(Debug, Args)]
pub struct StopArgs {
    /// Tunnel name as shown by `cftunnel list`
    pub id: String,

    /// Send SIGKILL right away instead of SIGTERM
    #[arg(short, long)]
    pub force: bool,
}

/// Arguments for `cftunnel stop-all`
#[derive(Debug, Args)]
pub struct StopAllArgs {
    /// Send SIGKILL right away instead of SIGTERM
    #[arg(short, long)]
    pub force: bool,
}

/// Arguments for `cftunnel logs`
#[derive(Debug, Args)]
pub struct LogsArgs {
    /// Tunnel name; logs of stopped tunnels are kept
    pub id: String,

    /// Number of lines to show (defaults to logs.tail_lines)
    #[arg(short = 'n', long)]
    pub lines: Option<usize>,
}

impl From<StartArgs> for Action {
    fn from(args: StartArgs) -> Self {
        Action::Start {
            name: args.name,
            port: args.port,
            protocol: args.protocol,
            wait_for_url: !args.no_wait,
        }
    }
}

impl From<StopArgs> for Action {
    fn from(args: StopArgs) -> Self {
        Action::Stop {
            id: args.id,
            force: args.force,
        }
    }
}

impl From<StopAllArgs> for Action {
    fn from(args: StopAllArgs) -> Self {
        Action::StopAll { force: args.force }
    }
}

impl From<LogsArgs> for Action {
    fn from(args: LogsArgs) -> Self {
        Action::Logs {
            id: args.id,
            lines: args.lines,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct StartCli {
        #[command(flatten)]
        args: StartArgs,
    }

    #[derive(Parser)]
    struct StopCli {
        #[command(flatten)]
        args: StopArgs,
    }

    #[derive(Parser)]
    struct LogsCli {
        #[command(flatten)]
        args: LogsArgs,
    }

    #[test]
    fn test_start_defaults_to_waiting_with_config_values() {
        let cli = StartCli::parse_from(["test"]);
        assert_eq!(
            Action::from(cli.args),
            Action::Start {
                name: String::new(),
                port: None,
                protocol: None,
                wait_for_url: true,
            }
        );
    }

    #[test]
    fn test_start_with_all_flags() {
        let cli = StartCli::parse_from([
            "test",
            "--name",
            "web",
            "--port",
            "8443",
            "--protocol",
            "https",
            "--no-wait",
        ]);
        assert_eq!(
            Action::from(cli.args),
            Action::Start {
                name: "web".to_string(),
                port: Some(8443),
                protocol: Some(Protocol::Https),
                wait_for_url: false,
            }
        );
    }

    #[test]
    fn test_start_rejects_unknown_protocol() {
        assert!(StartCli::try_parse_from(["test", "--protocol", "ftp"]).is_err());
    }

    #[test]
    fn test_stop_force_flag() {
        let cli = StopCli::parse_from(["test", "web", "--force"]);
        assert_eq!(
            Action::from(cli.args),
            Action::Stop {
                id: "web".to_string(),
                force: true,
            }
        );
    }

    #[test]
    fn test_stop_requires_id() {
        assert!(StopCli::try_parse_from(["test"]).is_err());
    }

    #[test]
    fn test_logs_line_count() {
        let cli = LogsCli::parse_from(["test", "web", "-n", "5"]);
        assert_eq!(
            Action::from(cli.args),
            Action::Logs {
                id: "web".to_string(),
                lines: Some(5),
            }
        );
    }
}
