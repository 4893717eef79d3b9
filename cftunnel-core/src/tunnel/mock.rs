//! Deterministic prober and launcher for tests
//!
//! `MockLauncher` hands out fake PIDs and registers them with a shared
//! `MockProber`, so registry logic can be exercised without real processes
//! or timing.

use std::collections::HashMap;
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;

use super::launcher::TunnelLauncher;
use super::process::ProcessProber;
use crate::error::TunnelError;

/// First PID handed out by [`MockLauncher`]
const FIRST_MOCK_PID: u32 = 40_000;

#[derive(Debug, Clone, Copy, Default)]
struct MockProcess {
    ignores_sigterm: bool,
}

#[derive(Debug, Default)]
struct ProberState {
    processes: HashMap<u32, MockProcess>,
    signals: Vec<(u32, bool)>,
    denied: Vec<u32>,
}

/// In-memory process table
#[derive(Debug, Clone, Default)]
pub struct MockProber {
    state: Arc<Mutex<ProberState>>,
}

impl MockProber {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ProberState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Mark `pid` as running
    pub fn spawn(&self, pid: u32) {
        self.lock().processes.insert(pid, MockProcess::default());
    }

    /// Mark `pid` as running and deaf to SIGTERM
    pub fn spawn_stubborn(&self, pid: u32) {
        self.lock().processes.insert(
            pid,
            MockProcess {
                ignores_sigterm: true,
            },
        );
    }

    /// Simulate the process exiting on its own
    pub fn exit(&self, pid: u32) {
        self.lock().processes.remove(&pid);
    }

    /// Make every signal to `pid` fail with permission denied
    pub fn deny_signals(&self, pid: u32) {
        self.lock().denied.push(pid);
    }

    /// Signals delivered so far as `(pid, force)`
    pub fn signals(&self) -> Vec<(u32, bool)> {
        self.lock().signals.clone()
    }

    /// Number of processes currently alive
    pub fn alive_count(&self) -> usize {
        self.lock().processes.len()
    }
}

impl ProcessProber for MockProber {
    fn is_alive(&self, pid: u32) -> bool {
        self.lock().processes.contains_key(&pid)
    }

    fn terminate(&self, pid: u32, force: bool) -> io::Result<()> {
        let mut state = self.lock();
        if state.denied.contains(&pid) {
            return Err(io::Error::from(io::ErrorKind::PermissionDenied));
        }
        state.signals.push((pid, force));
        let obeys = state
            .processes
            .get(&pid)
            .is_some_and(|process| force || !process.ignores_sigterm);
        if obeys {
            state.processes.remove(&pid);
        }
        Ok(())
    }
}

#[derive(Debug)]
struct LauncherState {
    next_pid: u32,
    output: Vec<String>,
    exit_immediately: bool,
    fail_spawn: bool,
    on_launch: Option<Arc<Notify>>,
    launched: Vec<(u32, String)>,
}

/// Launcher that fakes processes in a [`MockProber`]
#[derive(Debug, Clone)]
pub struct MockLauncher {
    prober: MockProber,
    state: Arc<Mutex<LauncherState>>,
}

impl MockLauncher {
    pub fn new(prober: MockProber) -> Self {
        Self {
            prober,
            state: Arc::new(Mutex::new(LauncherState {
                next_pid: FIRST_MOCK_PID,
                output: Vec::new(),
                exit_immediately: false,
                fail_spawn: false,
                on_launch: None,
                launched: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LauncherState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Lines each launched process "prints" to its log
    pub fn with_output(self, lines: &[&str]) -> Self {
        self.lock().output = lines.iter().map(|l| l.to_string()).collect();
        self
    }

    /// Launched processes die before anyone can look at them
    pub fn exit_immediately(self) -> Self {
        self.lock().exit_immediately = true;
        self
    }

    /// The OS refuses to create processes
    pub fn fail_spawn(self) -> Self {
        self.lock().fail_spawn = true;
        self
    }

    /// Signal `notify` right after each process is spawned
    pub fn notify_on_launch(self, notify: Arc<Notify>) -> Self {
        self.lock().on_launch = Some(notify);
        self
    }

    /// `(pid, local_url)` for every launch so far
    pub fn launched(&self) -> Vec<(u32, String)> {
        self.lock().launched.clone()
    }
}

impl TunnelLauncher for MockLauncher {
    fn launch(&self, local_url: &str, log_path: &Path) -> Result<u32, TunnelError> {
        let mut state = self.lock();
        if state.fail_spawn {
            return Err(TunnelError::SpawnFailed {
                binary: "mock-cloudflared".to_string(),
                source: io::Error::from(io::ErrorKind::NotFound),
                log_tail: String::new(),
            });
        }

        let mut log = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;
        for line in &state.output {
            writeln!(log, "{}", line)?;
        }

        let pid = state.next_pid;
        state.next_pid += 1;
        state.launched.push((pid, local_url.to_string()));
        if !state.exit_immediately {
            self.prober.spawn(pid);
        }
        if let Some(notify) = &state.on_launch {
            notify.notify_one();
        }
        Ok(pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn launched_pids_are_alive_and_distinct() {
        let dir = tempdir().unwrap();
        let prober = MockProber::new();
        let launcher = MockLauncher::new(prober.clone());

        let a = launcher.launch("http://localhost:1", &dir.path().join("a.log")).unwrap();
        let b = launcher.launch("http://localhost:2", &dir.path().join("b.log")).unwrap();

        assert_ne!(a, b);
        assert!(prober.is_alive(a));
        assert!(prober.is_alive(b));
        assert_eq!(prober.alive_count(), 2);
        assert_eq!(launcher.launched().len(), 2);
    }

    #[test]
    fn stubborn_process_survives_sigterm_only() {
        let prober = MockProber::new();
        prober.spawn_stubborn(7);

        prober.terminate(7, false).unwrap();
        assert!(prober.is_alive(7));
        prober.terminate(7, true).unwrap();
        assert!(!prober.is_alive(7));
        assert_eq!(prober.signals(), vec![(7, false), (7, true)]);
    }

    #[test]
    fn output_lines_are_written_to_log() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("a.log");
        let launcher = MockLauncher::new(MockProber::new()).with_output(&["hello"]);
        launcher.launch("http://localhost:1", &log).unwrap();
        assert_eq!(std::fs::read_to_string(&log).unwrap(), "hello\n");
    }
}
