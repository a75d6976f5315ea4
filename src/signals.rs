//! Signal-driven cancellation. Low-latency async cancel without blocking
//! inside handlers; routed into the same tick gate as UDP via
//! `tokio::signal::unix` streams polled in the loop's `select!`, so a
//! signal is acted on by the loop itself rather than from inside a signal
//! handler.

use tokio::signal::unix::{signal, Signal, SignalKind};

use crate::command::Command;

/// A repeated USR1 past this count is "stuck": exit immediately, no cleanup.
pub const USR1_STUCK_THRESHOLD: u32 = 10;

pub struct SignalListener {
    int: Signal,
    term: Signal,
    quit: Signal,
    usr1: Signal,
    usr1_count: u32,
}

impl SignalListener {
    pub fn new() -> std::io::Result<Self> {
        Ok(Self {
            int: signal(SignalKind::interrupt())?,
            term: signal(SignalKind::terminate())?,
            quit: signal(SignalKind::quit())?,
            usr1: signal(SignalKind::user_defined1())?,
            usr1_count: 0,
        })
    }

    /// Wait for the next signal and translate it into a `Command`. Returns
    /// `None` only if every underlying signal stream has closed (should not
    /// happen in practice).
    pub async fn next(&mut self) -> Option<Command> {
        tokio::select! {
            _ = self.int.recv() => Some(Command::RestartMe),
            _ = self.term.recv() => Some(Command::RestartMe),
            _ = self.quit.recv() => Some(Command::Reboot),
            _ = self.usr1.recv() => {
                self.usr1_count += 1;
                if self.usr1_count >= USR1_STUCK_THRESHOLD {
                    // Stuck: exit immediately, bypassing all cleanup.
                    std::process::exit(0);
                }
                Some(Command::ExitNormal)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sigterm_maps_to_restart_me() {
        let mut listener = SignalListener::new().expect("signal registration should succeed");
        let pid = std::process::id() as i32;
        unsafe {
            libc::kill(pid, libc::SIGTERM);
        }
        let cmd = listener.next().await;
        assert_eq!(cmd, Some(Command::RestartMe));
    }

    #[tokio::test]
    async fn sigquit_maps_to_reboot() {
        let mut listener = SignalListener::new().expect("signal registration should succeed");
        let pid = std::process::id() as i32;
        unsafe {
            libc::kill(pid, libc::SIGQUIT);
        }
        let cmd = listener.next().await;
        assert_eq!(cmd, Some(Command::Reboot));
    }

    #[tokio::test]
    async fn usr1_maps_to_exit_normal_below_threshold() {
        let mut listener = SignalListener::new().expect("signal registration should succeed");
        let pid = std::process::id() as i32;
        for _ in 0..3 {
            unsafe {
                libc::kill(pid, libc::SIGUSR1);
            }
            let cmd = listener.next().await;
            assert_eq!(cmd, Some(Command::ExitNormal));
        }
        assert_eq!(listener.usr1_count, 3);
    }
}
