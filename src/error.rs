use thiserror::Error;

/// Error taxonomy for the supervisor. Most variants are logged and absorbed
/// into a child's state machine rather than propagated; only `ConfigInvalid`
/// (startup) and `UdpFatal` (mid-loop) ever reach `main`.
#[derive(Debug, Error)]
pub enum WatchdogError {
    #[error("config invalid: {0}")]
    ConfigInvalid(String),

    #[error("failed to spawn child: {0}")]
    SpawnFailed(String),

    #[error("udp endpoint fatal: {0}")]
    UdpFatal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
