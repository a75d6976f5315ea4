//! The supervisor loop. Owns the child table and composes every other
//! component on a ≤500ms cadence. One owned structure (`Supervisor`) whose
//! methods are the component operations, rather than file-scope statics —
//! this is what lets tests inject a `FakeClock`.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::child::{self, ManagedChild};
use crate::clock::Clock;
use crate::command::exit_code;
use crate::config::WatchdogConfig;
use crate::files;
use crate::heartbeat::{parse_heartbeat_pid, HeartbeatState};
use crate::reboot::RebootPolicy;
use crate::resource::CpuSampler;
use crate::signals::SignalListener;
use crate::stats::StatsStore;
use crate::udp::{self, UdpEndpoint, WireCommand};

const UDP_POLL_TIMEOUT_MS: u64 = 500;
const RESOURCE_SAMPLE_INTERVAL_S: u64 = 60;
const STATS_PERSIST_INTERVAL_S: u64 = 15 * 60;
const REBOOT_CHECK_INTERVAL_S: u64 = 60;

pub struct Supervisor {
    clock: Arc<dyn Clock>,
    udp: UdpEndpoint,
    signals: SignalListener,
    working_dir: PathBuf,
    apps: Vec<ManagedChild>,
    heartbeats: Vec<HeartbeatState>,
    cpu_samplers: Vec<CpuSampler>,
    stats: StatsStore,
    reboot_policy: RebootPolicy,
    last_resource_uptime: Option<u64>,
    last_persist_uptime: Option<u64>,
    last_reboot_check_uptime: Option<u64>,
}

impl Supervisor {
    pub async fn new(
        config: WatchdogConfig,
        working_dir: PathBuf,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, crate::error::WatchdogError> {
        let udp = UdpEndpoint::bind(config.udp_port).await?;
        let signals = SignalListener::new().map_err(|e| {
            crate::error::WatchdogError::ConfigInvalid(format!("signal setup failed: {e}"))
        })?;

        let now = clock.monotonic_secs();
        let names: Vec<String> = config.apps.iter().map(|a| a.name.clone()).collect();
        let stats = StatsStore::load(&working_dir, &names);

        let heartbeats = config.apps.iter().map(|_| HeartbeatState::new(now)).collect();
        let cpu_samplers = config.apps.iter().map(|_| CpuSampler::new()).collect();
        let apps = config.apps.into_iter().map(ManagedChild::new).collect();

        Ok(Self {
            clock,
            udp,
            signals,
            working_dir,
            apps,
            heartbeats,
            cpu_samplers,
            stats,
            reboot_policy: config.reboot_policy,
            last_resource_uptime: None,
            last_persist_uptime: None,
            last_reboot_check_uptime: None,
        })
    }

    /// Run until an exit trigger fires; returns the process exit code.
    pub async fn run(mut self) -> i32 {
        let code = loop {
            tokio::select! {
                udp_result = self.udp.poll(UDP_POLL_TIMEOUT_MS) => {
                    match udp_result {
                        Ok(Some(datagram)) => self.handle_datagram(&datagram),
                        Ok(None) => {}
                        Err(e) => {
                            error!(error = %e, "udp endpoint fatal, exiting");
                            break exit_code::RESTART_ME;
                        }
                    }
                }
                cmd = self.signals.next() => {
                    if let Some(code) = self.apply_signal(cmd) {
                        break code;
                    }
                }
            }

            if let Some(code) = self.run_tick().await {
                break code;
            }
        };

        info!(code, "supervisor loop exiting, persisting stats and terminating children");

        // Shutdown (persist + per-child terminate, which can block up to
        // MAX_WAIT_TERMINATION_S) still races against the signal stream, so a
        // stuck shutdown that draws repeated USR1 can still hit the
        // stuck-supervisor threshold and exit immediately from inside
        // `signals.next()`.
        let Supervisor { mut apps, mut stats, mut signals, .. } = self;
        let shutdown = async move {
            stats.persist_all();
            for child in apps.iter_mut() {
                if child.started {
                    child::terminate(child).await;
                }
            }
        };
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = signals.next() => {}
            }
        }
        code
    }

    fn apply_signal(&mut self, cmd: Option<crate::command::Command>) -> Option<i32> {
        use crate::command::Command;
        match cmd {
            Some(Command::ExitNormal) => Some(exit_code::NORMAL),
            Some(Command::RestartMe) => Some(exit_code::RESTART_ME),
            Some(Command::Reboot) => Some(exit_code::REBOOT),
            _ => None,
        }
    }

    fn handle_datagram(&mut self, datagram: &[u8]) {
        match udp::decode(datagram) {
            WireCommand::Heartbeat(payload) => self.handle_heartbeat(&payload),
            WireCommand::StartByName | WireCommand::StopByName | WireCommand::RestartByName => {
                debug!("reserved start/stop/restart-by-name command received; currently disabled");
            }
            WireCommand::Unknown(tag) => {
                warn!(tag, datagram = %hex_printable(datagram), "unknown command tag, discarding");
            }
        }
    }

    fn handle_heartbeat(&mut self, payload: &[u8]) {
        let Some(pid) = parse_heartbeat_pid(payload) else {
            warn!(datagram = %hex_printable(payload), "invalid heartbeat datagram, discarding");
            return;
        };
        let Some(idx) = self.apps.iter().position(|c| c.started && c.pid == pid) else {
            warn!(pid, "heartbeat for unknown pid, discarding");
            return;
        };
        let now = self.clock.monotonic_secs();
        let sample = self.heartbeats[idx].record(now);
        let name = self.apps[idx].config.name.clone();
        self.stats.record_heartbeat(&name, sample);
    }

    /// Process the child table and the filesystem/reboot command sources
    /// for one tick. Returns `Some(exit_code)` if the loop should stop.
    async fn run_tick(&mut self) -> Option<i32> {
        let now = self.clock.monotonic_secs();
        let wall_now = self.clock.wall_secs();

        let due_resource_sample = due(now, RESOURCE_SAMPLE_INTERVAL_S, self.last_resource_uptime);
        if due_resource_sample {
            self.last_resource_uptime = Some(now);
        }
        let due_persist = due(now, STATS_PERSIST_INTERVAL_S, self.last_persist_uptime);
        if due_persist {
            self.last_persist_uptime = Some(now);
            // Persist before any crash/timeout/stop/restart kill this tick,
            // so a kill never races ahead of the stats it would invalidate.
            self.stats.persist_all();
        }

        for idx in 0..self.apps.len() {
            self.process_app(idx, now, wall_now, due_resource_sample).await;
        }

        if let Some(code) = self.check_global_files() {
            return Some(code);
        }

        let due_reboot_check = due(now, REBOOT_CHECK_INTERVAL_S, self.last_reboot_check_uptime);
        if due_reboot_check {
            self.last_reboot_check_uptime = Some(now);
            if self.reboot_policy.fires(now, wall_now) {
                info!("periodic reboot policy fired");
                return Some(exit_code::REBOOT);
            }
        }

        None
    }

    async fn process_app(
        &mut self,
        idx: usize,
        now: u64,
        wall_now: u64,
        due_resource_sample: bool,
    ) {
        let name = self.apps[idx].config.name.clone();
        let started = self.apps[idx].started;

        if started {
            let pid = self.apps[idx].pid;

            if due_resource_sample {
                if let Some(cpu_pct) = self.cpu_samplers[idx].sample(pid) {
                    if let Ok(rss_kb) = crate::resource::read_rss_kb(pid) {
                        self.stats.record_resource_sample(&name, cpu_pct, rss_kb);
                    }
                }
            }
            if !child::is_running(pid) {
                info!(name = %name, pid, "child not running, treating as crash");
                self.stats.record_crash(&name, wall_now);
                self.restart_child(idx).await;
                return;
            }

            let interval_s = self.apps[idx].config.heartbeat_interval_s;
            let delay_s = self.apps[idx].config.heartbeat_delay_s;
            if self.heartbeats[idx].check_timeout(now, started, interval_s, delay_s) {
                warn!(name = %name, "heartbeat timed out, restarting");
                self.stats.record_heartbeat_reset(&name, wall_now);
                self.restart_child(idx).await;
                return;
            }

            let stop_path = files::stop_file(&self.working_dir, &name);
            if files::present(&stop_path) {
                info!(name = %name, "stop latch present, terminating");
                child::terminate(&mut self.apps[idx]).await;
                return;
            }

            let restart_path = files::restart_file(&self.working_dir, &name);
            if files::present(&restart_path) {
                info!(name = %name, "restart file present, restarting");
                self.restart_child(idx).await;
                files::remove(&restart_path);
            }
        } else {
            let stop_path = files::stop_file(&self.working_dir, &name);
            let start_path = files::start_file(&self.working_dir, &name);
            let start_delay_elapsed = now >= self.apps[idx].config.start_delay_s;

            if !files::present(&stop_path) && (files::present(&start_path) || start_delay_elapsed) {
                match child::spawn(&mut self.apps[idx]) {
                    Ok(()) => {
                        self.heartbeats[idx].reset_on_spawn(now);
                        self.stats.record_start(&name, wall_now);
                        info!(name = %name, pid = self.apps[idx].pid, "spawned");
                        files::remove(&start_path);
                        let restart_path = files::restart_file(&self.working_dir, &name);
                        files::remove(&restart_path);
                    }
                    Err(e) => {
                        error!(name = %name, error = %e, "spawn failed, will retry next tick");
                    }
                }
            }
        }
    }

    async fn restart_child(&mut self, idx: usize) {
        let name = self.apps[idx].config.name.clone();
        if child::restart(&mut self.apps[idx]).await.is_ok() {
            let now = self.clock.monotonic_secs();
            self.heartbeats[idx].reset_on_spawn(now);
            info!(name = %name, pid = self.apps[idx].pid, "restarted");
        } else {
            error!(name = %name, "restart failed");
        }
    }

    fn check_global_files(&mut self) -> Option<i32> {
        let stop = self.working_dir.join(files::WDT_STOP);
        if files::present(&stop) {
            files::remove(&stop);
            return Some(exit_code::NORMAL);
        }
        let restart = self.working_dir.join(files::WDT_RESTART);
        if files::present(&restart) {
            files::remove(&restart);
            return Some(exit_code::RESTART_ME);
        }
        let reboot = self.working_dir.join(files::WDT_REBOOT);
        if files::present(&reboot) {
            files::remove(&reboot);
            return Some(exit_code::REBOOT);
        }
        None
    }
}

/// True exactly once per distinct multiple of `interval_s` in monotonic time.
fn due(now: u64, interval_s: u64, last: Option<u64>) -> bool {
    now % interval_s == 0 && last != Some(now)
}

fn hex_printable(bytes: &[u8]) -> String {
    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect::<Vec<_>>().join(" ");
    let printable: String = bytes
        .iter()
        .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
        .collect();
    format!("[{hex}] \"{printable}\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::config::AppConfig;
    use tempfile::tempdir;

    fn make_config(port: u16, name: &str, cmd: &str) -> WatchdogConfig {
        WatchdogConfig {
            udp_port: port,
            apps: vec![AppConfig {
                name: name.to_string(),
                command: cmd.to_string(),
                start_delay_s: 0,
                heartbeat_delay_s: 5,
                heartbeat_interval_s: 2,
            }],
            reboot_policy: RebootPolicy::Disabled,
        }
    }

    #[tokio::test]
    async fn startup_binds_and_loads_fresh_stats() {
        let dir = tempdir().unwrap();
        let clock: Arc<dyn Clock> = Arc::new(FakeClock::new(1_000));
        let config = make_config(0, "A", "/bin/true");
        let sup = Supervisor::new(config, dir.path().to_path_buf(), clock).await;
        assert!(sup.is_ok());
    }

    #[test]
    fn due_gates_on_exact_multiple_and_dedupes() {
        assert!(due(60, 60, None));
        assert!(!due(60, 60, Some(60)));
        assert!(!due(61, 60, None));
        assert!(due(120, 60, Some(60)));
    }

    #[test]
    fn hex_printable_is_readable() {
        let s = hex_printable(b"p1\x01");
        assert!(s.contains("70 31 01"));
        assert!(s.contains("p1."));
    }
}
