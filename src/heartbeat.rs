//! Heartbeat tracker. Per-child last-seen timestamp, first-heartbeat flag,
//! and the timeout decision. Pure logic over monotonic seconds — never
//! wall-clock time, so a change to the system clock can't mask or fake a
//! timeout.

#[derive(Debug, Clone, Copy)]
pub struct HeartbeatSample {
    pub elapsed_s: u64,
    pub is_first: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct HeartbeatState {
    pub last_heartbeat_at: u64,
    pub first_heartbeat_received: bool,
}

impl HeartbeatState {
    pub fn new(now: u64) -> Self {
        Self {
            last_heartbeat_at: now,
            first_heartbeat_received: false,
        }
    }

    /// Reset on spawn/restart: stamps `last_heartbeat_at` so the first
    /// heartbeat's grace window starts from spawn.
    pub fn reset_on_spawn(&mut self, now: u64) {
        self.last_heartbeat_at = now;
        self.first_heartbeat_received = false;
    }

    /// Record a valid heartbeat arriving at `now`. Returns the sample to be
    /// folded into the statistics store's timing aggregates.
    pub fn record(&mut self, now: u64) -> HeartbeatSample {
        let elapsed_s = now.saturating_sub(self.last_heartbeat_at);
        let is_first = !self.first_heartbeat_received;
        self.first_heartbeat_received = true;
        self.last_heartbeat_at = now;
        HeartbeatSample { elapsed_s, is_first }
    }

    /// Timeout decision for one tick. `started == false` and
    /// `heartbeat_interval_s == 0` both suppress timeout entirely. A clock
    /// running backward resets the baseline without reporting a timeout.
    pub fn check_timeout(
        &mut self,
        now: u64,
        started: bool,
        heartbeat_interval_s: u64,
        heartbeat_delay_s: u64,
    ) -> bool {
        if !started || heartbeat_interval_s == 0 {
            return false;
        }

        if now < self.last_heartbeat_at {
            self.last_heartbeat_at = now;
            return false;
        }

        let threshold = if self.first_heartbeat_received {
            heartbeat_interval_s
        } else {
            heartbeat_interval_s.max(heartbeat_delay_s)
        };

        now.saturating_sub(self.last_heartbeat_at) >= threshold
    }
}

/// Parse a heartbeat datagram of the form `"p" <decimal PID>`. Valid iff the
/// decimal part parses to an integer in `(0, i32::MAX)`. The receiver
/// accepts leading non-digit bytes (the tag byte itself and anything before
/// the first digit) but requires the remainder to be pure ASCII digits with
/// no sign.
pub fn parse_heartbeat_pid(payload: &[u8]) -> Option<i32> {
    let text = std::str::from_utf8(payload).ok()?;
    let digits_start = text.find(|c: char| c.is_ascii_digit())?;
    let digits = &text[digits_start..];
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let pid: i64 = digits.parse().ok()?;
    if pid > 0 && pid < i64::from(i32::MAX) {
        Some(pid as i32)
    } else {
        None
    }
}
