use std::io::{self, Write};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use cftunnel_core::{CloudflaredLauncher, Registry, SystemProber, TunnelError, check_installation};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use commands::dispatch::{Action, Dispatcher};
use commands::prompts::{print_failure_to, print_step_to};
use config::{CftunnelConfig, ConfigLoader};

#[derive(Parser)]
#[command(name = "cftunnel", about = "Run several Cloudflare quick tunnels side by side")]
#[command(version, propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive menu (the default)
    Menu,
    /// Start a tunnel in the background
    Start(commands::tunnel::StartArgs),
    /// Stop one tunnel
    Stop(commands::tunnel::StopArgs),
    /// Stop every running tunnel
    StopAll(commands::tunnel::StopAllArgs),
    /// List running tunnels with their public URLs
    List,
    /// Show the end of a tunnel log
    Logs(commands::tunnel::LogsArgs),
    /// Manage configuration
    Config(commands::config::ConfigArgs),
}

impl Commands {
    /// Commands that spawn cloudflared and so need it installed
    fn needs_binary(&self) -> bool {
        matches!(self, Commands::Menu | Commands::Start(_))
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli.command.unwrap_or(Commands::Menu)).await {
        Ok(code) => code,
        Err(e) => {
            let _ = print_failure_to(&mut io::stderr(), &e);
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr; RUST_LOG wins over `--verbose`
fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

async fn run(command: Commands) -> Result<ExitCode> {
    let mut stdout = io::stdout();
    let needs_binary = command.needs_binary();

    let action = match command {
        Commands::Config(args) => {
            commands::config::run(args, &mut stdout)?;
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Menu => None,
        Commands::Start(args) => Some(Action::from(args)),
        Commands::Stop(args) => Some(Action::from(args)),
        Commands::StopAll(args) => Some(Action::from(args)),
        Commands::List => Some(Action::List),
        Commands::Logs(args) => Some(Action::from(args)),
    };

    let config = ConfigLoader::load()?;
    if needs_binary {
        ensure_cloudflared(&config, &mut stdout).await?;
    }

    let registry = Registry::open(
        config.registry_config(),
        Arc::new(CloudflaredLauncher::new(&config.launcher.binary)),
        Arc::new(SystemProber),
    )?;
    let mut dispatcher = Dispatcher::new(registry, &config);

    let Some(action) = action else {
        return commands::menu::run(&mut dispatcher).await;
    };

    // Per-command failures are reported here; only setup errors bubble up
    match dispatcher.execute(action, &mut stdout).await {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(e) => {
            print_failure_to(&mut io::stderr(), &e)?;
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn ensure_cloudflared<W: Write>(config: &CftunnelConfig, out: &mut W) -> Result<()> {
    match check_installation(&config.launcher.binary).await {
        Ok(info) => {
            tracing::debug!(
                path = %info.path.display(),
                version = %info.version,
                "Found cloudflared"
            );
            Ok(())
        }
        Err(e @ TunnelError::MissingDependency { .. }) => {
            print_step_to(out, "Checking cloudflared...")?;
            writeln!(out, "not found")?;
            writeln!(out)?;
            writeln!(out, "{}", install_instructions())?;
            Err(e.into())
        }
        Err(e) => Err(e.into()),
    }
}

fn install_instructions() -> &'static str {
    if cfg!(target_os = "macos") {
        "Install cloudflared with:\n  brew install cloudflared"
    } else if cfg!(target_os = "windows") {
        "Install cloudflared with:\n  winget install --id Cloudflare.cloudflared"
    } else {
        "Install cloudflared from:\n  https://developers.cloudflare.com/cloudflare-one/connections/connect-networks/downloads/"
    }
}
