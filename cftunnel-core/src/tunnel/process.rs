//! Process liveness and termination
//!
//! Liveness is decided by asking the OS whether a PID exists. PIDs can be
//! reused after exit, so a positive answer is best-effort.

use std::io;

/// Capability for checking and signalling tunnel processes
pub trait ProcessProber: Send + Sync {
    /// True iff a process with this id exists and the current user may signal it
    fn is_alive(&self, pid: u32) -> bool;

    /// Ask the process to exit (`force == false`) or kill it outright.
    ///
    /// Never blocks. A process that is already gone is not an error.
    fn terminate(&self, pid: u32, force: bool) -> io::Result<()>;
}

/// Prober backed by `kill(2)`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProber;

#[cfg(unix)]
impl ProcessProber for SystemProber {
    fn is_alive(&self, pid: u32) -> bool {
        let Some(pid) = to_pid(pid) else {
            return false;
        };
        reap_own_child(pid);
        // SAFETY: kill with signal 0 only checks if process exists, doesn't send a signal
        unsafe { libc::kill(pid, 0) == 0 }
    }

    fn terminate(&self, pid: u32, force: bool) -> io::Result<()> {
        let Some(pid) = to_pid(pid) else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "refusing to signal a process group",
            ));
        };
        let signal = if force { libc::SIGKILL } else { libc::SIGTERM };
        // SAFETY: plain kill(2) on a single positive pid
        if unsafe { libc::kill(pid, signal) } == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            Ok(())
        } else {
            Err(err)
        }
    }
}

#[cfg(not(unix))]
impl ProcessProber for SystemProber {
    fn is_alive(&self, _pid: u32) -> bool {
        false
    }

    fn terminate(&self, _pid: u32, _force: bool) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "process signalling is only supported on unix",
        ))
    }
}

/// Positive pids only; 0 and negatives address process groups in kill(2)
#[cfg(unix)]
fn to_pid(pid: u32) -> Option<libc::pid_t> {
    libc::pid_t::try_from(pid).ok().filter(|pid| *pid > 0)
}

/// Collect the exit status if `pid` is an exited child of this process.
///
/// Tunnels launched during this session are our children; without this they
/// would linger as zombies and keep answering `kill(pid, 0)`.
#[cfg(unix)]
fn reap_own_child(pid: libc::pid_t) {
    let mut status = 0;
    // SAFETY: WNOHANG never blocks; ECHILD for foreign pids is ignored
    unsafe {
        libc::waitpid(pid, &mut status, libc::WNOHANG);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Command;
    use std::time::{Duration, Instant};

    fn wait_until_dead(prober: &SystemProber, pid: u32) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if !prober.is_alive(pid) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        false
    }

    #[test]
    fn current_process_is_alive() {
        assert!(SystemProber.is_alive(std::process::id()));
    }

    #[test]
    fn nonexistent_process_is_dead() {
        // PID 999999 is unlikely to exist
        assert!(!SystemProber.is_alive(999_999));
    }

    #[test]
    fn pid_zero_is_never_alive() {
        assert!(!SystemProber.is_alive(0));
        assert!(SystemProber.terminate(0, true).is_err());
    }

    #[test]
    fn exited_child_is_reaped_and_dead() {
        let child = Command::new("sh").args(["-c", "exit 0"]).spawn().unwrap();
        let pid = child.id();
        drop(child);
        assert!(wait_until_dead(&SystemProber, pid));
    }

    #[test]
    fn terminate_stops_running_child() {
        let child = Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id();
        drop(child);

        assert!(SystemProber.is_alive(pid));
        SystemProber.terminate(pid, false).unwrap();
        assert!(wait_until_dead(&SystemProber, pid));
    }

    #[test]
    fn terminate_vanished_process_is_ok() {
        let mut child = Command::new("sh").args(["-c", "exit 0"]).spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        assert!(SystemProber.terminate(pid, true).is_ok());
    }
}
