//! Interactive menu, the default when no subcommand is given
//!
//! Every choice is turned into an [`Action`] and handed to the
//! [`Dispatcher`]; this module only prompts and prints.

use std::io::{self, Write};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use cftunnel_core::{
    DEFAULT_PROBE_TIMEOUT, Protocol, TunnelError, TunnelRecord, probe_local_port, validate_port,
};
use dialoguer::console::{Term, style};
use dialoguer::{Confirm, Input, Select, theme::ColorfulTheme};
use tokio::sync::Notify;
use tracing::debug;

use super::dispatch::{Action, Dispatcher, TunnelDefaults};
use super::prompts::{print_failure_to, print_header};
use crate::config::ConfigLoader;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MenuChoice {
    Start,
    StopOne,
    StopAll,
    ViewLogs,
    Configure,
    Help,
    Exit,
}

impl MenuChoice {
    const ALL: [MenuChoice; 7] = [
        MenuChoice::Start,
        MenuChoice::StopOne,
        MenuChoice::StopAll,
        MenuChoice::ViewLogs,
        MenuChoice::Configure,
        MenuChoice::Help,
        MenuChoice::Exit,
    ];

    fn label(self) -> &'static str {
        match self {
            MenuChoice::Start => "Start a new tunnel",
            MenuChoice::StopOne => "Stop a tunnel",
            MenuChoice::StopAll => "Stop all tunnels",
            MenuChoice::ViewLogs => "View tunnel logs",
            MenuChoice::Configure => "Configure defaults",
            MenuChoice::Help => "Help",
            MenuChoice::Exit => "Exit",
        }
    }
}

/// Ctrl-C latch shared with a background signal listener
#[derive(Clone)]
struct Interrupts {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Interrupts {
    /// Register the handler before the first prompt so SIGINT never kills us
    fn install() -> io::Result<Self> {
        let interrupts = Self {
            flag: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        };

        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            let mut sigint = signal(SignalKind::interrupt())?;
            let latch = interrupts.clone();
            tokio::spawn(async move {
                while sigint.recv().await.is_some() {
                    latch.raise();
                }
            });
        }

        #[cfg(not(unix))]
        {
            let latch = interrupts.clone();
            tokio::spawn(async move {
                while tokio::signal::ctrl_c().await.is_ok() {
                    latch.raise();
                }
            });
        }

        Ok(interrupts)
    }

    fn raise(&self) {
        debug!("Interrupt received");
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    fn raised(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Whether a prompt ended because the user pressed Ctrl-C
fn is_interrupted(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<dialoguer::Error>(),
        Some(dialoguer::Error::IO(e)) if e.kind() == io::ErrorKind::Interrupted
    )
}

/// Run the menu until the user exits or presses Ctrl-C
pub async fn run(dispatcher: &mut Dispatcher) -> Result<ExitCode> {
    let interrupts = Interrupts::install()?;
    let theme = ColorfulTheme::default();
    let mut stdout = io::stdout();

    print_header("CLOUDFLARE QUICK TUNNELS");

    loop {
        show_tunnels(dispatcher, &mut stdout).await?;

        let step = menu_step(dispatcher, &theme, &interrupts, &mut stdout).await;
        match step {
            Ok(true) => {}
            Ok(false) => {
                writeln!(
                    stdout,
                    "Running tunnels keep going in the background. Use `cftunnel stop-all` to end them."
                )?;
                return Ok(ExitCode::SUCCESS);
            }
            Err(e) if is_interrupted(&e) => {
                return handle_interrupt(dispatcher, &theme, &mut stdout).await;
            }
            Err(e) => recover(&mut stdout, e)?,
        }

        if interrupts.raised() {
            return handle_interrupt(dispatcher, &theme, &mut stdout).await;
        }
        writeln!(stdout)?;
    }
}

async fn show_tunnels<W: Write>(dispatcher: &mut Dispatcher, out: &mut W) -> Result<()> {
    match dispatcher.execute(Action::List, out).await {
        Ok(()) => Ok(()),
        Err(e) => recover(out, e),
    }
}

/// Report a failed menu step and keep the session going.
///
/// Startup-class errors and broken prompts are handed back instead, since
/// retrying them would only fail again.
fn recover<W: Write>(out: &mut W, err: anyhow::Error) -> Result<()> {
    if ends_session(&err) {
        return Err(err);
    }
    print_failure_to(out, &err)?;
    Ok(())
}

/// One round of the menu; `Ok(false)` means the user chose to exit
async fn menu_step<W: Write>(
    dispatcher: &mut Dispatcher,
    theme: &ColorfulTheme,
    interrupts: &Interrupts,
    out: &mut W,
) -> Result<bool> {
    let labels: Vec<&str> = MenuChoice::ALL.iter().map(|c| c.label()).collect();
    let index = Select::with_theme(theme)
        .with_prompt("What would you like to do?")
        .items(&labels)
        .default(0)
        .interact()?;

    let choice = MenuChoice::ALL[index];
    let action = match choice {
        MenuChoice::Start => prompt_start(dispatcher.defaults(), theme).await?,
        MenuChoice::StopOne => {
            let records = dispatcher.registry().enumerate().await?;
            pick_tunnel(&records, "Which tunnel should be stopped?", theme, out)?
                .map(|id| Action::Stop { id, force: false })
        }
        MenuChoice::StopAll => prompt_stop_all(dispatcher, theme).await?,
        MenuChoice::ViewLogs => {
            let records = dispatcher.registry().enumerate().await?;
            pick_tunnel(&records, "Show the log of which tunnel?", theme, out)?
                .map(|id| Action::Logs { id, lines: None })
        }
        MenuChoice::Configure => Some(prompt_defaults(dispatcher.defaults(), theme)?),
        MenuChoice::Help => Some(Action::Help),
        MenuChoice::Exit => return Ok(false),
    };

    let Some(action) = action else {
        writeln!(out, "Cancelled.")?;
        return Ok(true);
    };

    // Registry::create kills a process it has not recorded yet when dropped
    tokio::select! {
        result = dispatcher.execute(action, out) => result?,
        _ = interrupts.notify.notified() => return Ok(true),
    }
    if choice == MenuChoice::Configure {
        offer_to_save(dispatcher.defaults(), theme, out)?;
    }
    Ok(true)
}

async fn prompt_start(
    defaults: TunnelDefaults,
    theme: &ColorfulTheme,
) -> Result<Option<Action>> {
    let name: String = Input::with_theme(theme)
        .with_prompt("Tunnel name (blank for a generated one)")
        .allow_empty(true)
        .interact_text()?;
    let (port, protocol) = prompt_port_and_protocol(defaults, theme)?;

    let checked = validate_port(port)?;
    if !probe_local_port(checked, DEFAULT_PROBE_TIMEOUT).await {
        let proceed = Confirm::with_theme(theme)
            .with_prompt(format!(
                "Nothing is listening on {}. Start the tunnel anyway?",
                protocol.local_url(checked)
            ))
            .default(false)
            .interact()?;
        if !proceed {
            return Ok(None);
        }
    }

    Ok(Some(Action::Start {
        name,
        port: Some(port),
        protocol: Some(protocol),
        wait_for_url: true,
    }))
}

fn prompt_port_and_protocol(
    defaults: TunnelDefaults,
    theme: &ColorfulTheme,
) -> Result<(u32, Protocol)> {
    let port: u32 = Input::with_theme(theme)
        .with_prompt("Local port")
        .default(u32::from(defaults.port))
        .validate_with(|port: &u32| validate_port(*port).map(|_| ()).map_err(|e| e.to_string()))
        .interact_text()?;

    let protocols: Vec<&str> = Protocol::ALL.iter().map(|p| p.as_str()).collect();
    let default_index = Protocol::ALL
        .iter()
        .position(|p| *p == defaults.protocol)
        .unwrap_or(0);
    let index = Select::with_theme(theme)
        .with_prompt("Local protocol")
        .items(&protocols)
        .default(default_index)
        .interact()?;

    Ok((port, Protocol::ALL[index]))
}

async fn prompt_stop_all(
    dispatcher: &Dispatcher,
    theme: &ColorfulTheme,
) -> Result<Option<Action>> {
    let count = dispatcher.registry().enumerate().await?.len();
    if count == 0 {
        return Ok(Some(Action::StopAll { force: false }));
    }
    let confirmed = Confirm::with_theme(theme)
        .with_prompt(format!("Stop all {} tunnel(s)?", count))
        .default(false)
        .interact()?;
    Ok(confirmed.then_some(Action::StopAll { force: false }))
}

fn prompt_defaults(defaults: TunnelDefaults, theme: &ColorfulTheme) -> Result<Action> {
    let (port, protocol) = prompt_port_and_protocol(defaults, theme)?;
    Ok(Action::SetDefaults { port, protocol })
}

/// Label shown for a tunnel in selection lists
fn tunnel_label(record: &TunnelRecord) -> String {
    format!(
        "{} ({}, PID {})",
        record.id,
        record.local_url(),
        record.pid
    )
}

/// Let the user pick one of `records`; `None` on cancel or when there are none
fn pick_tunnel<W: Write>(
    records: &[TunnelRecord],
    prompt: &str,
    theme: &ColorfulTheme,
    out: &mut W,
) -> Result<Option<String>> {
    if records.is_empty() {
        writeln!(out, "No tunnels running.")?;
        return Ok(None);
    }

    let mut labels: Vec<String> = records.iter().map(tunnel_label).collect();
    labels.push("Cancel".to_string());
    let index = Select::with_theme(theme)
        .with_prompt(prompt)
        .items(&labels)
        .default(0)
        .interact()?;

    Ok(records.get(index).map(|record| record.id.clone()))
}

fn offer_to_save<W: Write>(
    defaults: TunnelDefaults,
    theme: &ColorfulTheme,
    out: &mut W,
) -> Result<()> {
    let save = Confirm::with_theme(theme)
        .with_prompt("Save these defaults to the config file?")
        .default(false)
        .interact()?;
    if !save {
        return Ok(());
    }

    let path = ConfigLoader::config_path();
    let mut config = ConfigLoader::load_from_path(&path)?;
    config.defaults.port = defaults.port;
    config.defaults.protocol = defaults.protocol;
    let report = ConfigLoader::save_with_report(&config, &path)?;
    write!(out, "{}", report)?;
    Ok(())
}

async fn handle_interrupt<W: Write>(
    dispatcher: &mut Dispatcher,
    theme: &ColorfulTheme,
    out: &mut W,
) -> Result<ExitCode> {
    let _ = Term::stdout().show_cursor();
    writeln!(out, "\n{}", style("Interrupted.").yellow())?;

    let running = dispatcher
        .registry()
        .enumerate()
        .await
        .map(|records| records.len())
        .unwrap_or(0);
    if running > 0 {
        // A second Ctrl-C here means "no"
        let stop = Confirm::with_theme(theme)
            .with_prompt(format!("Stop all {} running tunnel(s) before exiting?", running))
            .default(true)
            .interact()
            .unwrap_or(false);
        if stop {
            if let Err(e) = dispatcher.execute(Action::StopAll { force: false }, out).await {
                print_failure_to(out, &e)?;
            }
        } else {
            writeln!(out, "Leaving {} tunnel(s) running.", running)?;
        }
    }

    Ok(ExitCode::FAILURE)
}

fn is_fatal(err: &anyhow::Error) -> bool {
    err.downcast_ref::<TunnelError>()
        .is_some_and(TunnelError::is_fatal)
}

/// Fatal errors, plus prompt failures other than Ctrl-C
fn ends_session(err: &anyhow::Error) -> bool {
    is_fatal(err) || err.downcast_ref::<dialoguer::Error>().is_some()
}
