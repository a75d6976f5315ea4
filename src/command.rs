//! The signal handler's command vocabulary: what a delivered signal resolves
//! to once translated out of `SignalListener`. UDP heartbeats/by-name
//! commands and the filesystem rendezvous files carry enough shape of their
//! own (a pid, a file path) that routing them through this enum would just
//! be a re-wrap; each of those sources is applied directly where it's read.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    ExitNormal,
    RestartMe,
    Reboot,
}

/// Process exit codes a surrounding shell script interprets to relaunch or
/// reboot.
pub mod exit_code {
    pub const NORMAL: i32 = 0;
    pub const FATAL_STARTUP: i32 = 1;
    pub const RESTART_ME: i32 = 2;
    pub const REBOOT: i32 = 3;
}
