//! Child process driver. Spawns, liveness-probes, and terminates a single
//! managed child: a terminate-request signal, a bounded grace period polled
//! with `waitpid(..., WNOHANG)`, then an unconditional SIGKILL escalation.

use std::os::unix::process::CommandExt;
use std::process::Command as StdCommand;
use std::time::Duration;

use tracing::{error, warn};

use crate::config::AppConfig;
use crate::error::WatchdogError;

pub const MAX_WAIT_TERMINATION_S: u64 = 30;
pub const MAX_WAIT_START_S: u64 = 5;

/// Job-control/terminal signals reset to default disposition in the child
/// before exec, so the child doesn't inherit our process group's signal
/// dispositions.
const RESET_SIGNALS: [libc::c_int; 5] = [
    libc::SIGINT,
    libc::SIGQUIT,
    libc::SIGTSTP,
    libc::SIGTTIN,
    libc::SIGTTOU,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildState {
    Idle,
    WaitingToStart,
    Running,
    Restarting,
}

/// Per-child record.
#[derive(Debug, Clone)]
pub struct ManagedChild {
    pub config: AppConfig,
    pub pid: i32,
    pub started: bool,
    pub first_heartbeat_received: bool,
}

impl ManagedChild {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            pid: 0,
            started: false,
            first_heartbeat_received: false,
        }
    }
}

/// Fork+exec the child's `command`, tokenised on ASCII spaces. Uses a
/// `pre_exec` hook plus `std::mem::forget(child)` — the driver tracks the
/// process exclusively by pid/signals from here on, never through
/// `std::process::Child`.
pub fn spawn(child: &mut ManagedChild) -> Result<(), WatchdogError> {
    let mut tokens = child.config.command.split(' ').filter(|s| !s.is_empty());
    let program = tokens
        .next()
        .ok_or_else(|| WatchdogError::SpawnFailed(format!("empty cmd for '{}'", child.config.name)))?;
    let args: Vec<&str> = tokens.collect();

    let mut cmd = StdCommand::new(program);
    cmd.args(&args);

    // SAFETY: pre_exec only calls async-signal-safe libc functions
    // (signal, setsid) between fork and exec.
    unsafe {
        cmd.pre_exec(|| {
            for sig in RESET_SIGNALS {
                libc::signal(sig, libc::SIG_DFL);
            }
            if libc::setsid() < 0 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }

    let spawned = cmd
        .spawn()
        .map_err(|e| WatchdogError::SpawnFailed(format!("{}: {e}", child.config.name)))?;

    let pid = spawned.id() as i32;
    // We manage the child by pid/signals directly; forget the handle so its
    // Drop impl doesn't try to reap or kill it out from under us.
    std::mem::forget(spawned);

    child.pid = pid;
    child.started = true;
    child.first_heartbeat_received = false;
    Ok(())
}

/// Zero-signal liveness probe. "No such process" → not running;
/// "permission denied" → assumed running (conservative); any other error is
/// logged and treated as running.
pub fn is_running(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    // SAFETY: signal 0 performs no action beyond existence/permission checks.
    let ret = unsafe { libc::kill(pid, 0) };
    if ret == 0 {
        return true;
    }
    match std::io::Error::last_os_error().raw_os_error() {
        Some(libc::ESRCH) => false,
        Some(libc::EPERM) => true,
        other => {
            warn!(pid, errno = ?other, "is_running probe returned unexpected error, assuming running");
            true
        }
    }
}

/// Non-blocking reap. Returns true when the child has exited, been killed,
/// been stopped, or no longer exists — all "terminated" from our
/// perspective.
fn try_reap(pid: i32) -> bool {
    let mut status: libc::c_int = 0;
    // SAFETY: waitpid with WNOHANG is always safe to call.
    let ret = unsafe { libc::waitpid(pid, &mut status, libc::WNOHANG) };
    if ret == pid {
        return true; // exited / killed-by-signal / stopped-by-signal
    }
    if ret == -1 && std::io::Error::last_os_error().raw_os_error() == Some(libc::ECHILD) {
        return true; // no such child
    }
    false
}

/// Graceful-then-forced termination. On confirmed termination, resets
/// `started`/`first_heartbeat_received`/`pid`. On unconfirmed termination
/// after the forced kill, leaves `started = true` for retry.
pub async fn terminate(child: &mut ManagedChild) {
    if child.pid <= 0 {
        return;
    }
    let pid = child.pid;

    // SAFETY: kill() with a valid signal is safe.
    unsafe {
        libc::kill(pid, libc::SIGTERM);
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(MAX_WAIT_TERMINATION_S);
    let mut confirmed = false;
    loop {
        if try_reap(pid) {
            confirmed = true;
            break;
        }
        if tokio::time::Instant::now() >= deadline {
            break;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    if !confirmed {
        warn!(pid, name = %child.config.name, "termination grace period elapsed, sending SIGKILL");
        // SAFETY: kill() with a valid signal is safe.
        unsafe {
            libc::kill(pid, libc::SIGKILL);
        }
        confirmed = try_reap(pid);
        if !confirmed {
            tokio::time::sleep(Duration::from_millis(50)).await;
            confirmed = try_reap(pid);
        }
    }

    if confirmed {
        child.started = false;
        child.first_heartbeat_received = false;
        child.pid = 0;
    } else {
        error!(pid, name = %child.config.name, "forced kill did not confirm exit; will retry next tick");
    }
}

/// Terminate (if running) then spawn, waiting up to `MAX_WAIT_START_S` for
/// the new process to report as running.
pub async fn restart(child: &mut ManagedChild) -> Result<(), WatchdogError> {
    if is_running(child.pid) {
        terminate(child).await;
    }
    spawn(child)?;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(MAX_WAIT_START_S);
    while !is_running(child.pid) {
        if tokio::time::Instant::now() >= deadline {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app(cmd: &str) -> AppConfig {
        AppConfig {
            name: "t".into(),
            command: cmd.into(),
            start_delay_s: 0,
            heartbeat_delay_s: 0,
            heartbeat_interval_s: 0,
        }
    }

    #[test]
    fn is_running_false_for_zero_pid() {
        assert!(!is_running(0));
        assert!(!is_running(-1));
    }

    #[test]
    fn is_running_false_for_nonexistent_pid() {
        // A pid astronomically unlikely to exist.
        assert!(!is_running(i32::MAX - 1));
    }

    #[tokio::test]
    async fn spawn_and_terminate_sleep() {
        let mut child = ManagedChild::new(app("/bin/sleep 30"));
        spawn(&mut child).expect("spawn should succeed");
        assert!(child.started);
        assert!(child.pid > 0);
        assert!(is_running(child.pid));

        terminate(&mut child).await;
        assert!(!child.started);
        assert_eq!(child.pid, 0);
    }

    #[tokio::test]
    async fn terminate_noop_on_pid_zero() {
        let mut child = ManagedChild::new(app("/bin/true"));
        terminate(&mut child).await; // should not panic or hang
        assert_eq!(child.pid, 0);
    }

    #[tokio::test]
    async fn spawn_failure_reports_error() {
        let mut child = ManagedChild::new(app("/this/path/does/not/exist-at-all"));
        let result = spawn(&mut child);
        assert!(result.is_err());
        assert!(!child.started);
    }

    #[tokio::test]
    async fn restart_replaces_process() {
        let mut child = ManagedChild::new(app("/bin/sleep 30"));
        spawn(&mut child).expect("spawn should succeed");
        let old_pid = child.pid;

        restart(&mut child).await.expect("restart should succeed");
        assert!(child.pid > 0);
        assert_ne!(child.pid, old_pid);
        assert!(is_running(child.pid));

        terminate(&mut child).await;
    }
}
