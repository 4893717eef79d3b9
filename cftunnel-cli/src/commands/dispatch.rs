//! Command dispatcher shared by the menu and the subcommands

use std::io::Write;
use std::time::Duration;

use anyhow::{Result, bail};
use cftunnel_core::{
    DEFAULT_PROBE_TIMEOUT, Protocol, Registry, StopOutcome, TunnelRecord, probe_local_port,
    validate_port,
};
use tracing::warn;

use super::prompts::{print_error_to, print_success_to, print_warning_to};
use super::table::tunnel_table;
use crate::config::CftunnelConfig;

/// Port and protocol offered when a start request leaves them out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TunnelDefaults {
    pub port: u16,
    pub protocol: Protocol,
}

impl From<&CftunnelConfig> for TunnelDefaults {
    fn from(config: &CftunnelConfig) -> Self {
        Self {
            port: config.defaults.port,
            protocol: config.defaults.protocol,
        }
    }
}

/// A validated request, independent of where it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Start {
        /// Empty means a generated name
        name: String,
        port: Option<u32>,
        protocol: Option<Protocol>,
        /// Block until the public URL shows up in the log
        wait_for_url: bool,
    },
    Stop {
        id: String,
        force: bool,
    },
    StopAll {
        force: bool,
    },
    List,
    Logs {
        id: String,
        lines: Option<usize>,
    },
    SetDefaults {
        port: u32,
        protocol: Protocol,
    },
    Help,
}

/// Runs [`Action`]s against a [`Registry`], writing results to a writer
pub struct Dispatcher {
    registry: Registry,
    defaults: TunnelDefaults,
    url_wait: Duration,
    tail_lines: usize,
}

impl Dispatcher {
    pub fn new(registry: Registry, config: &CftunnelConfig) -> Self {
        Self {
            registry,
            defaults: TunnelDefaults::from(config),
            url_wait: config.url_wait(),
            tail_lines: config.logs.tail_lines,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn defaults(&self) -> TunnelDefaults {
        self.defaults
    }

    pub async fn execute<W: Write>(&mut self, action: Action, out: &mut W) -> Result<()> {
        match action {
            Action::Start {
                name,
                port,
                protocol,
                wait_for_url,
            } => self.start(&name, port, protocol, wait_for_url, out).await,
            Action::Stop { id, force } => self.stop(&id, force, out).await,
            Action::StopAll { force } => self.stop_all(force, out).await,
            Action::List => self.list(out).await,
            Action::Logs { id, lines } => self.logs(&id, lines, out).await,
            Action::SetDefaults { port, protocol } => self.set_defaults(port, protocol, out),
            Action::Help => Ok(write_help(out)?),
        }
    }

    async fn start<W: Write>(
        &mut self,
        name: &str,
        port: Option<u32>,
        protocol: Option<Protocol>,
        wait_for_url: bool,
        out: &mut W,
    ) -> Result<()> {
        let port = port.unwrap_or(u32::from(self.defaults.port));
        let protocol = protocol.unwrap_or(self.defaults.protocol);
        let checked = validate_port(port)?;
        if !probe_local_port(checked, DEFAULT_PROBE_TIMEOUT).await {
            warn!(port, "Nothing is listening on {}", protocol.local_url(checked));
        }

        let record = self.registry.start(name, port, protocol).await?;
        print_success_to(
            out,
            &format!(
                "Started tunnel '{}' for {} (PID {})",
                record.id,
                record.local_url(),
                record.pid
            ),
        )?;

        if wait_for_url {
            self.report_url(&record, out).await?;
        }
        Ok(())
    }

    async fn report_url<W: Write>(&self, record: &TunnelRecord, out: &mut W) -> Result<()> {
        match self.registry.wait_for_url(&record.id, self.url_wait).await {
            Ok(Some(url)) => writeln!(out, "  Public URL: {}", url)?,
            Ok(None) => writeln!(
                out,
                "  Public URL not announced yet; see `cftunnel list` or `cftunnel logs {}`",
                record.id
            )?,
            // The tunnel was created; only the URL poll lost track of it
            Err(e) => print_warning_to(out, &format!("Could not read public URL: {}", e))?,
        }
        Ok(())
    }

    async fn stop<W: Write>(&mut self, id: &str, force: bool, out: &mut W) -> Result<()> {
        let outcome = self.registry.remove(id, !force).await?;
        let message = match outcome {
            StopOutcome::Terminated => format!("Stopped tunnel '{}'", id),
            StopOutcome::Killed => format!("Killed tunnel '{}'", id),
            StopOutcome::AlreadyExited => format!("Tunnel '{}' had already exited; cleaned up", id),
        };
        print_success_to(out, &message)?;
        Ok(())
    }

    async fn stop_all<W: Write>(&mut self, force: bool, out: &mut W) -> Result<()> {
        let report = self.registry.remove_all(!force).await?;
        if report.stopped == 0 && report.failures.is_empty() {
            writeln!(out, "No tunnels running.")?;
            return Ok(());
        }

        if report.stopped > 0 {
            print_success_to(out, &format!("Stopped {} tunnel(s)", report.stopped))?;
        }
        for (id, err) in &report.failures {
            print_error_to(out, &format!("{}: {}", id, err))?;
        }
        if !report.failures.is_empty() {
            bail!("{} tunnel(s) could not be stopped", report.failures.len());
        }
        Ok(())
    }

    async fn list<W: Write>(&self, out: &mut W) -> Result<()> {
        let records = self.registry.enumerate().await?;
        if records.is_empty() {
            writeln!(out, "No tunnels running.")?;
        } else {
            writeln!(out, "{}", tunnel_table(&records))?;
        }
        Ok(())
    }

    async fn logs<W: Write>(&self, id: &str, lines: Option<usize>, out: &mut W) -> Result<()> {
        let tail = self
            .registry
            .log_tail(id, lines.unwrap_or(self.tail_lines))
            .await?;
        if tail.is_empty() {
            writeln!(out, "Log for '{}' is empty.", id)?;
        } else {
            writeln!(out, "{}", tail)?;
        }
        Ok(())
    }

    fn set_defaults<W: Write>(&mut self, port: u32, protocol: Protocol, out: &mut W) -> Result<()> {
        let port = validate_port(port)?;
        self.defaults = TunnelDefaults { port, protocol };
        print_success_to(
            out,
            &format!("Defaults set to port {} over {}", port, protocol),
        )?;
        Ok(())
    }
}

fn write_help<W: Write>(out: &mut W) -> std::io::Result<()> {
    writeln!(out, "cftunnel runs Cloudflare quick tunnels in the background.")?;
    writeln!(out)?;
    writeln!(out, "Each tunnel exposes one local port on a random")?;
    writeln!(out, "https://<words>.trycloudflare.com address. Tunnels keep")?;
    writeln!(out, "running after cftunnel exits; stop them from the menu or")?;
    writeln!(out, "with `cftunnel stop <name>`.")?;
    writeln!(out)?;
    writeln!(out, "Commands:")?;
    writeln!(out, "  cftunnel                      interactive menu")?;
    writeln!(out, "  cftunnel start --port 3000    start a tunnel")?;
    writeln!(out, "  cftunnel list                 show running tunnels")?;
    writeln!(out, "  cftunnel logs <name>          show the end of a tunnel log")?;
    writeln!(out, "  cftunnel stop <name>          stop one tunnel")?;
    writeln!(out, "  cftunnel stop-all             stop every tunnel")?;
    writeln!(out, "  cftunnel config show          print the configuration")?;
    Ok(())
}
