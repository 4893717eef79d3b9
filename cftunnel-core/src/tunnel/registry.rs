//! Registry of running tunnels
//!
//! Each tunnel is a pair of files under `<base_dir>/tunnels` keyed by id: a
//! JSON config record and a PID marker. The marker is written last and is
//! what makes a tunnel exist. Every read path re-checks liveness and purges
//! tunnels whose process is gone.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use tokio::fs;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use super::launcher::TunnelLauncher;
use super::naming::{disambiguate, generated_name, is_valid_id, sanitize_name};
use super::process::ProcessProber;
use super::record::{Protocol, TunnelMeta, TunnelRecord, validate_port};
use crate::error::TunnelError;

const TUNNELS_DIR: &str = "tunnels";
const LOGS_DIR: &str = "logs";
const PID_EXT: &str = "pid";
const META_EXT: &str = "json";
const LOG_EXT: &str = "log";

/// Lines of log attached to launch failures
const FAILURE_TAIL_LINES: usize = 20;

/// How often liveness is checked during the startup window
const STARTUP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How often the log is rescanned while waiting for a public URL
const URL_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Timing and location settings for a [`Registry`]
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryConfig {
    /// Root of the on-disk state
    pub base_dir: PathBuf,
    /// How long a new process must stay alive to count as launched
    pub startup_grace: Duration,
    /// Liveness checks after SIGTERM before escalating to SIGKILL
    pub stop_poll_attempts: u32,
    /// Delay between those checks
    pub stop_poll_interval: Duration,
}

impl RegistryConfig {
    /// Defaults: 3s startup window, 5 stop polls one second apart
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            startup_grace: Duration::from_secs(3),
            stop_poll_attempts: 5,
            stop_poll_interval: Duration::from_secs(1),
        }
    }

    pub fn with_startup_grace(mut self, grace: Duration) -> Self {
        self.startup_grace = grace;
        self
    }

    pub fn with_stop_polling(mut self, attempts: u32, interval: Duration) -> Self {
        self.stop_poll_attempts = attempts;
        self.stop_poll_interval = interval;
        self
    }
}

/// How a tunnel went away in [`Registry::remove`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Exited after SIGTERM
    Terminated,
    /// Needed SIGKILL
    Killed,
    /// Was already gone; only its files were cleaned up
    AlreadyExited,
}

/// Result of [`Registry::remove_all`]
#[derive(Debug, Default)]
pub struct RemoveAllReport {
    /// Tunnels stopped successfully
    pub stopped: usize,
    /// Tunnels that could not be stopped, with the reason
    pub failures: Vec<(String, TunnelError)>,
}

enum PidMarker {
    Missing,
    Corrupt,
    Pid(u32),
}

/// Source of truth for which tunnels exist
pub struct Registry {
    config: RegistryConfig,
    tunnels_dir: PathBuf,
    logs_dir: PathBuf,
    launcher: Arc<dyn TunnelLauncher>,
    prober: Arc<dyn ProcessProber>,
    reserved: Mutex<HashSet<String>>,
}

impl Registry {
    /// Open the registry, creating the storage directories.
    ///
    /// Fails with `StorageUnavailable` when the directories cannot be
    /// created or written to.
    pub fn open(
        config: RegistryConfig,
        launcher: Arc<dyn TunnelLauncher>,
        prober: Arc<dyn ProcessProber>,
    ) -> Result<Self, TunnelError> {
        let tunnels_dir = config.base_dir.join(TUNNELS_DIR);
        let logs_dir = config.base_dir.join(LOGS_DIR);

        for dir in [&tunnels_dir, &logs_dir] {
            ensure_writable(dir).map_err(|source| TunnelError::StorageUnavailable {
                path: dir.clone(),
                source,
            })?;
        }
        debug!("Tunnel registry at {}", config.base_dir.display());

        Ok(Self {
            config,
            tunnels_dir,
            logs_dir,
            launcher,
            prober,
            reserved: Mutex::new(HashSet::new()),
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.config.base_dir
    }

    /// Path of the log file for `id`, whether or not it exists
    pub fn log_path(&self, id: &str) -> PathBuf {
        self.logs_dir.join(format!("{}.{}", id, LOG_EXT))
    }

    fn pid_path(&self, id: &str) -> PathBuf {
        self.tunnels_dir.join(format!("{}.{}", id, PID_EXT))
    }

    fn meta_path(&self, id: &str) -> PathBuf {
        self.tunnels_dir.join(format!("{}.{}", id, META_EXT))
    }

    fn reserved(&self) -> MutexGuard<'_, HashSet<String>> {
        self.reserved
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// All live tunnels, oldest first.
    ///
    /// Doubles as a liveness sweep: tunnels whose process is gone, or whose
    /// PID marker is unreadable, are deleted before the result is built.
    pub async fn enumerate(&self) -> Result<Vec<TunnelRecord>, TunnelError> {
        let mut ids = Vec::new();
        let mut entries = fs::read_dir(&self.tunnels_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(PID_EXT) {
                continue;
            }
            if let Some(id) = path.file_stem().and_then(|stem| stem.to_str()) {
                ids.push(id.to_string());
            }
        }

        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = self.load_live(&id).await? {
                records.push(record);
            }
        }
        records.sort_by(|a, b| {
            a.start_time
                .cmp(&b.start_time)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(records)
    }

    /// Turn a requested name into an unused id and hold it for [`create`].
    ///
    /// The name is stripped to letters, digits, `-` and `_`; an empty result
    /// becomes a generated `app_xxxxxxxx`. Ids of live tunnels and earlier
    /// reservations are skipped by appending `_1`, `_2`, …
    ///
    /// [`create`]: Registry::create
    pub async fn reserve_id(&self, candidate: &str) -> Result<String, TunnelError> {
        let mut base = sanitize_name(candidate);
        if base.is_empty() {
            base = generated_name();
            debug!("Name '{}' sanitized to nothing, using {}", candidate, base);
        }

        // Sweep first so ids of dead tunnels can be reused
        self.enumerate().await?;

        let mut reserved = self.reserved();
        let id = disambiguate(&base, |id| {
            reserved.contains(id) || self.pid_path(id).exists()
        });
        reserved.insert(id.clone());
        Ok(id)
    }

    /// Drop a reservation that will not be used
    pub fn release(&self, id: &str) {
        self.reserved().remove(id);
    }

    /// Launch a tunnel under `id` and record it.
    ///
    /// Rejects bad ports and ids with `InvalidInput` before touching
    /// anything. After spawning, the record is written and the process is
    /// watched for the startup window; if it dies, the record is removed
    /// again and `LaunchFailed` carries the end of its log. A reservation
    /// for `id` is released either way.
    ///
    /// Dropping the future between spawn and the PID marker kills the new
    /// process, so a running cloudflared always has a record.
    pub async fn create(
        &self,
        id: &str,
        port: u32,
        protocol: Protocol,
    ) -> Result<TunnelRecord, TunnelError> {
        let _reservation = Reservation { registry: self, id };
        self.create_reserved(id, port, protocol).await
    }

    async fn create_reserved(
        &self,
        id: &str,
        port: u32,
        protocol: Protocol,
    ) -> Result<TunnelRecord, TunnelError> {
        let port = validate_port(port)?;
        if !is_valid_id(id) {
            return Err(TunnelError::InvalidInput(format!(
                "'{}' is not a valid tunnel id (letters, digits, '-' and '_' only)",
                id
            )));
        }
        if self.load_live(id).await?.is_some() {
            return Err(TunnelError::InvalidInput(format!(
                "tunnel '{}' is already running",
                id
            )));
        }

        let log_path = self.log_path(id);
        let log_offset = fs::metadata(&log_path)
            .await
            .map(|meta| meta.len())
            .unwrap_or(0);
        let local_url = protocol.local_url(port);

        let pid = self.launcher.launch(&local_url, &log_path)?;
        let mut spawned = Unrecorded {
            prober: self.prober.as_ref(),
            id,
            pid,
            recorded: false,
        };
        let record = TunnelRecord {
            id: id.to_string(),
            name: id.to_string(),
            local_port: port,
            protocol,
            pid,
            start_time: Utc::now(),
            log_path,
            log_offset,
        };

        if let Err(e) = self.persist(&record).await {
            warn!("Could not record tunnel '{}': {}", id, e);
            drop(spawned);
            self.purge(id).await;
            return Err(e);
        }
        spawned.recorded = true;
        info!(id, pid, %local_url, "Tunnel launched");

        if !self.survives_startup(pid).await {
            warn!(id, pid, "Tunnel process exited during startup");
            self.purge(id).await;
            return Err(TunnelError::LaunchFailed {
                id: id.to_string(),
                log_tail: self.failure_tail(&record.log_path),
            });
        }

        Ok(record)
    }

    /// [`reserve_id`] followed by [`create`]
    ///
    /// [`reserve_id`]: Registry::reserve_id
    /// [`create`]: Registry::create
    pub async fn start(
        &self,
        name: &str,
        port: u32,
        protocol: Protocol,
    ) -> Result<TunnelRecord, TunnelError> {
        // Validate before reserving so bad input never touches storage
        validate_port(port)?;
        let id = self.reserve_id(name).await?;
        self.create(&id, port, protocol).await
    }

    /// The live tunnel with this id
    pub async fn lookup(&self, id: &str) -> Result<TunnelRecord, TunnelError> {
        if !is_valid_id(id) {
            return Err(TunnelError::NotFound(id.to_string()));
        }
        self.load_live(id)
            .await?
            .ok_or_else(|| TunnelError::NotFound(id.to_string()))
    }

    /// Stop a tunnel and delete its record, keeping the log.
    ///
    /// With `graceful`, SIGTERM is sent first and the process gets
    /// `stop_poll_attempts` checks to exit before SIGKILL. Without it,
    /// SIGKILL is sent right away.
    pub async fn remove(&self, id: &str, graceful: bool) -> Result<StopOutcome, TunnelError> {
        if !is_valid_id(id) {
            return Err(TunnelError::NotFound(id.to_string()));
        }
        let pid = match self.read_marker(id).await? {
            PidMarker::Missing => return Err(TunnelError::NotFound(id.to_string())),
            PidMarker::Corrupt => {
                self.purge(id).await;
                return Err(TunnelError::NotFound(id.to_string()));
            }
            PidMarker::Pid(pid) => pid,
        };

        if !self.prober.is_alive(pid) {
            self.delete_record(id).await?;
            info!(id, pid, "Tunnel had already exited");
            return Ok(StopOutcome::AlreadyExited);
        }

        let stop_failed = |source| TunnelError::StopFailed {
            id: id.to_string(),
            pid,
            source,
        };

        let outcome = if graceful {
            self.prober.terminate(pid, false).map_err(stop_failed)?;
            if self.wait_for_exit(pid).await {
                StopOutcome::Terminated
            } else {
                warn!(id, pid, "Tunnel ignored SIGTERM, sending SIGKILL");
                self.prober.terminate(pid, true).map_err(stop_failed)?;
                StopOutcome::Killed
            }
        } else {
            self.prober.terminate(pid, true).map_err(stop_failed)?;
            StopOutcome::Killed
        };

        self.delete_record(id).await?;
        info!(id, pid, ?outcome, "Tunnel stopped");
        Ok(outcome)
    }

    /// Stop every live tunnel; one failure does not stop the rest
    pub async fn remove_all(&self, graceful: bool) -> Result<RemoveAllReport, TunnelError> {
        let mut report = RemoveAllReport::default();
        for record in self.enumerate().await? {
            match self.remove(&record.id, graceful).await {
                Ok(_) => report.stopped += 1,
                Err(e) => {
                    warn!("Failed to stop tunnel '{}': {}", record.id, e);
                    report.failures.push((record.id, e));
                }
            }
        }
        Ok(report)
    }

    /// Poll the log until cloudflared announces the public URL.
    ///
    /// Returns `None` on timeout or when the tunnel dies first.
    pub async fn wait_for_url(
        &self,
        id: &str,
        timeout: Duration,
    ) -> Result<Option<String>, TunnelError> {
        let record = self.lookup(id).await?;
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(url) = record.public_url() {
                return Ok(Some(url));
            }
            if Instant::now() >= deadline || !self.prober.is_alive(record.pid) {
                return Ok(None);
            }
            sleep(URL_POLL_INTERVAL).await;
        }
    }

    /// Last `lines` lines of the log for `id`; works for stopped tunnels too
    pub async fn log_tail(&self, id: &str, lines: usize) -> Result<String, TunnelError> {
        if !is_valid_id(id) {
            return Err(TunnelError::NotFound(id.to_string()));
        }
        let path = self.log_path(id);
        match super::url::tail_lines(&path, lines) {
            Ok(tail) => Ok(tail),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(TunnelError::NotFound(id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn read_marker(&self, id: &str) -> Result<PidMarker, TunnelError> {
        match fs::read_to_string(self.pid_path(id)).await {
            Ok(content) => Ok(content
                .trim()
                .parse::<u32>()
                .map(PidMarker::Pid)
                .unwrap_or(PidMarker::Corrupt)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(PidMarker::Missing),
            Err(e) => Err(e.into()),
        }
    }

    /// Load `id` if its process is alive, purging it otherwise
    async fn load_live(&self, id: &str) -> Result<Option<TunnelRecord>, TunnelError> {
        let pid = match self.read_marker(id).await? {
            PidMarker::Missing => return Ok(None),
            PidMarker::Corrupt => {
                debug!(id, "Purging tunnel with unreadable PID marker");
                self.purge(id).await;
                return Ok(None);
            }
            PidMarker::Pid(pid) => pid,
        };

        if !self.prober.is_alive(pid) {
            debug!(id, pid, "Purging dead tunnel");
            self.purge(id).await;
            return Ok(None);
        }

        let meta = match fs::read_to_string(self.meta_path(id)).await {
            Ok(content) => match serde_json::from_str::<TunnelMeta>(&content) {
                Ok(meta) => meta,
                Err(e) => {
                    warn!(id, pid, "Skipping tunnel with malformed config record: {}", e);
                    return Ok(None);
                }
            },
            Err(e) => {
                warn!(id, pid, "Skipping tunnel without config record: {}", e);
                return Ok(None);
            }
        };

        Ok(Some(TunnelRecord::from_meta(
            id,
            pid,
            meta,
            self.log_path(id),
        )))
    }

    /// Config record first, PID marker last, each via write-then-rename
    async fn persist(&self, record: &TunnelRecord) -> Result<(), TunnelError> {
        let meta = serde_json::to_vec_pretty(&record.meta())?;
        write_atomic(&self.meta_path(&record.id), &meta).await?;
        write_atomic(
            &self.pid_path(&record.id),
            format!("{}\n", record.pid).as_bytes(),
        )
        .await?;
        Ok(())
    }

    /// Delete marker and config record; the log stays
    async fn delete_record(&self, id: &str) -> io::Result<()> {
        for path in [self.pid_path(id), self.meta_path(id)] {
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Best-effort [`delete_record`](Registry::delete_record)
    async fn purge(&self, id: &str) {
        if let Err(e) = self.delete_record(id).await {
            debug!(id, "Could not purge tunnel files: {}", e);
        }
    }

    async fn survives_startup(&self, pid: u32) -> bool {
        let deadline = Instant::now() + self.config.startup_grace;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return self.prober.is_alive(pid);
            }
            if !self.prober.is_alive(pid) {
                return false;
            }
            sleep(STARTUP_POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn wait_for_exit(&self, pid: u32) -> bool {
        for _ in 0..self.config.stop_poll_attempts {
            if !self.prober.is_alive(pid) {
                return true;
            }
            sleep(self.config.stop_poll_interval).await;
        }
        !self.prober.is_alive(pid)
    }

    fn failure_tail(&self, log_path: &Path) -> String {
        super::url::tail_lines(log_path, FAILURE_TAIL_LINES).unwrap_or_default()
    }
}

/// Releases a reserved id on drop
struct Reservation<'a> {
    registry: &'a Registry,
    id: &'a str,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.registry.release(self.id);
    }
}

/// Kills a spawned process on drop unless its PID marker was written
struct Unrecorded<'a> {
    prober: &'a dyn ProcessProber,
    id: &'a str,
    pid: u32,
    recorded: bool,
}

impl Drop for Unrecorded<'_> {
    fn drop(&mut self) {
        if self.recorded {
            return;
        }
        warn!(
            id = self.id,
            pid = self.pid,
            "Killing tunnel process that was never recorded"
        );
        if let Err(e) = self.prober.terminate(self.pid, true) {
            warn!(id = self.id, pid = self.pid, "Could not kill unrecorded tunnel: {}", e);
        }
    }
}

fn ensure_writable(dir: &Path) -> io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let probe = dir.join(".write-test");
    std::fs::write(&probe, b"")?;
    std::fs::remove_file(&probe)
}

async fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, contents).await?;
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tunnel::mock::{MockLauncher, MockProber};
    use tempfile::{TempDir, tempdir};
    use tokio::sync::Notify;

    const URL_LINE: &str = "INF |  https://quiet-river-test.trycloudflare.com  |";

    struct Harness {
        _dir: TempDir,
        prober: MockProber,
        launcher: MockLauncher,
        registry: Registry,
    }

    fn harness_with(launcher: impl FnOnce(MockLauncher) -> MockLauncher) -> Harness {
        let dir = tempdir().unwrap();
        let prober = MockProber::new();
        let launcher = launcher(MockLauncher::new(prober.clone()));
        let config = RegistryConfig::new(dir.path())
            .with_startup_grace(Duration::from_millis(10))
            .with_stop_polling(3, Duration::from_millis(1));
        let registry =
            Registry::open(config, Arc::new(launcher.clone()), Arc::new(prober.clone())).unwrap();
        Harness {
            _dir: dir,
            prober,
            launcher,
            registry,
        }
    }

    fn harness() -> Harness {
        harness_with(|l| l)
    }

    fn tunnel_files(registry: &Registry) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(&registry.tunnels_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn open_creates_layout() {
        let h = harness();
        assert!(h.registry.base_dir().join("tunnels").is_dir());
        assert!(h.registry.base_dir().join("logs").is_dir());
    }

    #[cfg(unix)]
    #[test]
    fn open_on_file_is_storage_unavailable() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, "x").unwrap();
        let prober = MockProber::new();
        let result = Registry::open(
            RegistryConfig::new(&file),
            Arc::new(MockLauncher::new(prober.clone())),
            Arc::new(prober),
        );
        assert!(matches!(
            result,
            Err(TunnelError::StorageUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn create_persists_live_record() {
        let h = harness();
        let record = h.registry.create("app", 3000, Protocol::Http).await.unwrap();

        assert_eq!(record.id, "app");
        assert_eq!(record.local_port, 3000);
        assert!(h.prober.is_alive(record.pid));
        assert_eq!(tunnel_files(&h.registry), vec!["app.json", "app.pid"]);
        assert_eq!(
            h.launcher.launched(),
            vec![(record.pid, "http://localhost:3000".to_string())]
        );

        let marker = std::fs::read_to_string(h.registry.pid_path("app")).unwrap();
        assert_eq!(marker.trim(), record.pid.to_string());
    }

    #[tokio::test]
    async fn create_rejects_out_of_range_port_without_side_effects() {
        let h = harness();
        let err = h
            .registry
            .create("app", 70000, Protocol::Http)
            .await
            .unwrap_err();

        assert!(matches!(err, TunnelError::InvalidInput(_)));
        assert!(tunnel_files(&h.registry).is_empty());
        assert!(h.launcher.launched().is_empty());
    }

    #[tokio::test]
    async fn create_rejects_unsanitized_id() {
        let h = harness();
        let err = h
            .registry
            .create("../escape", 3000, Protocol::Http)
            .await
            .unwrap_err();
        assert!(matches!(err, TunnelError::InvalidInput(_)));
        assert!(h.launcher.launched().is_empty());
    }

    #[tokio::test]
    async fn create_rejects_running_id() {
        let h = harness();
        h.registry.create("app", 3000, Protocol::Http).await.unwrap();
        let err = h
            .registry
            .create("app", 3001, Protocol::Http)
            .await
            .unwrap_err();
        assert!(matches!(err, TunnelError::InvalidInput(_)));
        assert_eq!(h.launcher.launched().len(), 1);
    }

    #[tokio::test]
    async fn immediate_exit_is_launch_failed_and_rolled_back() {
        let h = harness_with(|l| {
            l.with_output(&["ERR failed to parse ingress"])
                .exit_immediately()
        });
        let err = h
            .registry
            .create("app", 3000, Protocol::Http)
            .await
            .unwrap_err();

        match err {
            TunnelError::LaunchFailed { id, log_tail } => {
                assert_eq!(id, "app");
                assert!(log_tail.contains("failed to parse ingress"));
            }
            other => panic!("expected LaunchFailed, got {:?}", other),
        }
        assert!(tunnel_files(&h.registry).is_empty());
        assert!(h.registry.log_path("app").exists());
    }

    #[tokio::test]
    async fn spawn_failure_persists_nothing() {
        let h = harness_with(|l| l.fail_spawn());
        let err = h
            .registry
            .start("app", 3000, Protocol::Http)
            .await
            .unwrap_err();
        assert!(matches!(err, TunnelError::SpawnFailed { .. }));
        assert!(tunnel_files(&h.registry).is_empty());

        // The reservation was released, so the name is free again
        assert_eq!(h.registry.reserve_id("app").await.unwrap(), "app");
    }

    #[tokio::test]
    async fn reserve_id_sanitizes_and_generates() {
        let h = harness();
        assert_eq!(h.registry.reserve_id("my app!").await.unwrap(), "myapp");
        let generated = h.registry.reserve_id("!!!").await.unwrap();
        assert!(generated.starts_with("app_"));
    }

    #[tokio::test]
    async fn reserve_id_is_injective_within_session() {
        let h = harness();
        let a = h.registry.reserve_id("app").await.unwrap();
        let b = h.registry.reserve_id("app").await.unwrap();
        let c = h.registry.reserve_id("app").await.unwrap();
        assert_eq!((a.as_str(), b.as_str(), c.as_str()), ("app", "app_1", "app_2"));
    }

    #[tokio::test]
    async fn released_reservation_is_reusable() {
        let h = harness();
        let a = h.registry.reserve_id("app").await.unwrap();
        h.registry.release(&a);
        assert_eq!(h.registry.reserve_id("app").await.unwrap(), "app");
    }

    #[tokio::test]
    async fn same_name_twice_gets_distinct_stoppable_ids() {
        let h = harness();
        let first = h.registry.start("app", 3000, Protocol::Http).await.unwrap();
        let second = h.registry.start("app", 3001, Protocol::Https).await.unwrap();

        assert_eq!(first.id, "app");
        assert_eq!(second.id, "app_1");

        h.registry.remove(&first.id, true).await.unwrap();
        assert!(h.prober.is_alive(second.pid));
        let remaining = h.registry.enumerate().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, "app_1");

        h.registry.remove(&second.id, true).await.unwrap();
        assert!(h.registry.enumerate().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn dead_tunnel_id_is_reused() {
        let h = harness();
        let record = h.registry.start("app", 3000, Protocol::Http).await.unwrap();
        h.prober.exit(record.pid);
        assert_eq!(h.registry.reserve_id("app").await.unwrap(), "app");
    }

    #[tokio::test]
    async fn enumerate_sweeps_dead_records() {
        let h = harness();
        let alive = h.registry.start("alive", 3000, Protocol::Http).await.unwrap();
        let dead = h.registry.start("dead", 3001, Protocol::Http).await.unwrap();
        h.prober.exit(dead.pid);

        let records = h.registry.enumerate().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, alive.id);
        assert_eq!(tunnel_files(&h.registry), vec!["alive.json", "alive.pid"]);
    }

    #[tokio::test]
    async fn enumerate_purges_corrupt_marker() {
        let h = harness();
        std::fs::write(h.registry.pid_path("junk"), "not a pid").unwrap();
        std::fs::write(h.registry.meta_path("junk"), "{}").unwrap();

        assert!(h.registry.enumerate().await.unwrap().is_empty());
        assert!(tunnel_files(&h.registry).is_empty());
    }

    #[tokio::test]
    async fn enumerate_is_ordered_by_start_time() {
        let h = harness();
        h.registry.start("zeta", 3000, Protocol::Http).await.unwrap();
        h.registry.start("alpha", 3001, Protocol::Http).await.unwrap();

        let ids: Vec<String> = h
            .registry
            .enumerate()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["zeta", "alpha"]);
    }

    #[tokio::test]
    async fn lookup_of_dead_tunnel_is_not_found() {
        let h = harness();
        let record = h.registry.start("app", 3000, Protocol::Http).await.unwrap();
        assert_eq!(h.registry.lookup("app").await.unwrap().pid, record.pid);

        h.prober.exit(record.pid);
        assert!(matches!(
            h.registry.lookup("app").await,
            Err(TunnelError::NotFound(_))
        ));
        assert!(tunnel_files(&h.registry).is_empty());
    }

    #[tokio::test]
    async fn graceful_remove_keeps_log() {
        let h = harness_with(|l| l.with_output(&[URL_LINE]));
        let record = h.registry.start("app", 3000, Protocol::Http).await.unwrap();

        let outcome = h.registry.remove("app", true).await.unwrap();
        assert_eq!(outcome, StopOutcome::Terminated);
        assert_eq!(h.prober.signals(), vec![(record.pid, false)]);
        assert!(matches!(
            h.registry.lookup("app").await,
            Err(TunnelError::NotFound(_))
        ));
        assert!(record.log_path.exists());
        assert!(tunnel_files(&h.registry).is_empty());
    }

    #[tokio::test]
    async fn graceful_remove_escalates_to_kill() {
        let h = harness();
        let record = h.registry.start("app", 3000, Protocol::Http).await.unwrap();
        h.prober.exit(record.pid);
        h.prober.spawn_stubborn(record.pid);

        let outcome = h.registry.remove("app", true).await.unwrap();
        assert_eq!(outcome, StopOutcome::Killed);
        assert_eq!(
            h.prober.signals(),
            vec![(record.pid, false), (record.pid, true)]
        );
        assert!(!h.prober.is_alive(record.pid));
    }

    #[tokio::test]
    async fn forced_remove_skips_sigterm() {
        let h = harness();
        let record = h.registry.start("app", 3000, Protocol::Http).await.unwrap();
        assert_eq!(
            h.registry.remove("app", false).await.unwrap(),
            StopOutcome::Killed
        );
        assert_eq!(h.prober.signals(), vec![(record.pid, true)]);
    }

    #[tokio::test]
    async fn remove_unknown_is_not_found() {
        let h = harness();
        assert!(matches!(
            h.registry.remove("ghost", true).await,
            Err(TunnelError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn remove_already_exited_cleans_up() {
        let h = harness();
        let record = h.registry.start("app", 3000, Protocol::Http).await.unwrap();
        h.prober.exit(record.pid);

        assert_eq!(
            h.registry.remove("app", true).await.unwrap(),
            StopOutcome::AlreadyExited
        );
        assert!(h.prober.signals().is_empty());
        assert!(tunnel_files(&h.registry).is_empty());
    }

    #[tokio::test]
    async fn denied_signal_is_stop_failed_and_keeps_record() {
        let h = harness();
        let record = h.registry.start("app", 3000, Protocol::Http).await.unwrap();
        h.prober.deny_signals(record.pid);

        let err = h.registry.remove("app", true).await.unwrap_err();
        assert!(matches!(err, TunnelError::StopFailed { pid, .. } if pid == record.pid));
        assert_eq!(h.registry.lookup("app").await.unwrap().pid, record.pid);
    }

    #[tokio::test]
    async fn remove_all_reports_partial_failures() {
        let h = harness();
        h.registry.start("one", 3000, Protocol::Http).await.unwrap();
        let stuck = h.registry.start("two", 3001, Protocol::Http).await.unwrap();
        h.registry.start("three", 3002, Protocol::Http).await.unwrap();
        h.prober.deny_signals(stuck.pid);

        let report = h.registry.remove_all(true).await.unwrap();
        assert_eq!(report.stopped, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, "two");

        let left = h.registry.enumerate().await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, "two");
    }

    #[tokio::test]
    async fn wait_for_url_reads_log() {
        let h = harness_with(|l| l.with_output(&["INF Starting tunnel", URL_LINE]));
        let record = h.registry.start("app", 3000, Protocol::Http).await.unwrap();

        let url = h
            .registry
            .wait_for_url(&record.id, Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(
            url.as_deref(),
            Some("https://quiet-river-test.trycloudflare.com")
        );
    }

    #[tokio::test]
    async fn wait_for_url_times_out_without_url() {
        let h = harness();
        let record = h.registry.start("app", 3000, Protocol::Http).await.unwrap();
        let url = h
            .registry
            .wait_for_url(&record.id, Duration::from_millis(10))
            .await
            .unwrap();
        assert!(url.is_none());
    }

    #[tokio::test]
    async fn restarted_tunnel_ignores_previous_url() {
        let h = harness_with(|l| l.with_output(&[URL_LINE]));
        let first = h.registry.start("app", 3000, Protocol::Http).await.unwrap();
        assert!(first.public_url().is_some());
        h.registry.remove("app", true).await.unwrap();

        let log = h.registry.log_path("app");
        let before = std::fs::metadata(&log).unwrap().len();

        // Second run has not announced its URL yet
        let _ = h.launcher.clone().with_output(&["INF Starting tunnel"]);
        let again = h.registry.start("app", 3000, Protocol::Http).await.unwrap();

        assert_eq!(again.log_offset, before);
        assert!(std::fs::read_to_string(&log).unwrap().contains("trycloudflare.com"));
        assert!(again.public_url().is_none());
        assert!(
            h.registry
                .wait_for_url("app", Duration::from_millis(10))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn cancelled_create_leaves_no_orphan() {
        let launched = Arc::new(Notify::new());
        let h = harness_with(|l| l.notify_on_launch(launched.clone()));
        let id = h.registry.reserve_id("app").await.unwrap();

        tokio::select! {
            biased;
            _ = launched.notified() => {}
            result = h.registry.create(&id, 3000, Protocol::Http) => {
                panic!("create outlived the startup window: {:?}", result.map(|r| r.id));
            }
        }

        assert_eq!(h.launcher.launched().len(), 1);
        // Every process still running is listed and so reachable by stop-all
        let listed = h.registry.enumerate().await.unwrap();
        assert_eq!(h.prober.alive_count(), listed.len());
        assert!(h.registry.reserved().is_empty());

        h.registry.remove_all(true).await.unwrap();
        assert_eq!(h.prober.alive_count(), 0);
        assert_eq!(h.registry.reserve_id("app").await.unwrap(), "app");
    }

    #[tokio::test]
    async fn log_tail_survives_stop() {
        let h = harness_with(|l| l.with_output(&["line one", "line two"]));
        h.registry.start("app", 3000, Protocol::Http).await.unwrap();
        h.registry.remove("app", true).await.unwrap();

        assert_eq!(h.registry.log_tail("app", 1).await.unwrap(), "line two");
        assert!(matches!(
            h.registry.log_tail("never", 5).await,
            Err(TunnelError::NotFound(_))
        ));
    }
}
