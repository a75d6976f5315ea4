//! Durable per-child statistics. Two files per child: `stats_<app>.raw`
//! (fixed-layout binary, `bincode`-encoded, `magic` last) and
//! `stats_<app>.log` (overwritten human text).
//!
//! A single fixed binary layout, not a versioned/variant one: any future
//! field change must bump `MAGIC`, not attempt in-place migration.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::heartbeat::HeartbeatSample;

/// Identifies an initialised record. Absence/mismatch triggers a reset.
pub const MAGIC: u32 = 0x5057_5354; // ASCII "PWST"

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatsRecord {
    pub started_at: u64,
    pub crashed_at: u64,
    pub heartbeat_reset_at: u64,

    pub start_count: u64,
    pub crash_count: u64,
    pub heartbeat_reset_count: u64,
    pub heartbeat_count: u64,
    pub heartbeat_count_old: u64,
    pub avg_heartbeat_count_old: f64,

    pub first_heartbeat_min_s: Option<u64>,
    pub first_heartbeat_max_s: Option<u64>,
    pub first_heartbeat_avg_s: f64,

    pub inter_heartbeat_min_s: Option<u64>,
    pub inter_heartbeat_max_s: Option<u64>,
    pub inter_heartbeat_avg_s: f64,

    pub cpu_current_pct: f64,
    pub cpu_min_pct: f64,
    pub cpu_max_pct: f64,
    pub cpu_avg_pct: f64,

    pub rss_current_kb: u64,
    pub rss_min_kb: u64,
    pub rss_max_kb: u64,
    pub rss_avg_kb: f64,
    pub resource_sample_count: u64,

    pub magic: u32,
}

impl StatsRecord {
    pub fn zeroed() -> Self {
        Self {
            started_at: 0,
            crashed_at: 0,
            heartbeat_reset_at: 0,
            start_count: 0,
            crash_count: 0,
            heartbeat_reset_count: 0,
            heartbeat_count: 0,
            heartbeat_count_old: 0,
            avg_heartbeat_count_old: 0.0,
            first_heartbeat_min_s: None,
            first_heartbeat_max_s: None,
            first_heartbeat_avg_s: 0.0,
            inter_heartbeat_min_s: None,
            inter_heartbeat_max_s: None,
            inter_heartbeat_avg_s: 0.0,
            cpu_current_pct: 0.0,
            cpu_min_pct: 0.0,
            cpu_max_pct: 0.0,
            cpu_avg_pct: 0.0,
            rss_current_kb: 0,
            rss_min_kb: 0,
            rss_max_kb: 0,
            rss_avg_kb: 0.0,
            resource_sample_count: 0,
            magic: MAGIC,
        }
    }

    fn events_so_far(&self) -> u64 {
        self.start_count + self.crash_count + self.heartbeat_reset_count
    }

    /// Snapshot `heartbeat_count` into `heartbeat_count_old` and zero it.
    /// Shared by start/crash/heartbeat-reset events.
    fn snapshot_and_reset_heartbeat_count(&mut self) {
        self.heartbeat_count_old = self.heartbeat_count;
        self.heartbeat_count = 0;
    }

    fn fold_heartbeat_count_old(&mut self) {
        let n = self.events_so_far().max(1);
        self.avg_heartbeat_count_old =
            update_counter_avg(self.avg_heartbeat_count_old, n, self.heartbeat_count_old as f64);
    }

    pub fn on_start(&mut self, wall_now: u64) {
        self.start_count += 1;
        self.started_at = wall_now;
        self.snapshot_and_reset_heartbeat_count();
    }

    pub fn on_crash(&mut self, wall_now: u64) {
        self.crash_count += 1;
        self.crashed_at = wall_now;
        self.snapshot_and_reset_heartbeat_count();
        self.fold_heartbeat_count_old();
    }

    pub fn on_heartbeat_reset(&mut self, wall_now: u64) {
        self.heartbeat_reset_count += 1;
        self.heartbeat_reset_at = wall_now;
        self.snapshot_and_reset_heartbeat_count();
        self.fold_heartbeat_count_old();
    }

    pub fn on_heartbeat(&mut self, sample: HeartbeatSample) {
        self.heartbeat_count += 1;
        if sample.is_first {
            let n = self.events_so_far().max(1);
            self.first_heartbeat_avg_s =
                update_counter_avg(self.first_heartbeat_avg_s, n, sample.elapsed_s as f64);
            self.first_heartbeat_min_s =
                Some(self.first_heartbeat_min_s.map_or(sample.elapsed_s, |m| m.min(sample.elapsed_s)));
            self.first_heartbeat_max_s =
                Some(self.first_heartbeat_max_s.map_or(sample.elapsed_s, |m| m.max(sample.elapsed_s)));
        } else {
            let n = self.heartbeat_count.saturating_sub(1).max(1);
            self.inter_heartbeat_avg_s =
                update_counter_avg(self.inter_heartbeat_avg_s, n, sample.elapsed_s as f64);
            self.inter_heartbeat_min_s =
                Some(self.inter_heartbeat_min_s.map_or(sample.elapsed_s, |m| m.min(sample.elapsed_s)));
            self.inter_heartbeat_max_s =
                Some(self.inter_heartbeat_max_s.map_or(sample.elapsed_s, |m| m.max(sample.elapsed_s)));
        }
    }

    pub fn on_resource_sample(&mut self, cpu_pct: f64, rss_kb: u64) {
        self.cpu_current_pct = cpu_pct;
        self.rss_current_kb = rss_kb;

        if self.resource_sample_count == 0 {
            self.cpu_min_pct = cpu_pct;
            self.cpu_max_pct = cpu_pct;
            self.cpu_avg_pct = cpu_pct;
            self.rss_min_kb = rss_kb;
            self.rss_max_kb = rss_kb;
            self.rss_avg_kb = rss_kb as f64;
        } else {
            self.cpu_min_pct = self.cpu_min_pct.min(cpu_pct);
            self.cpu_max_pct = self.cpu_max_pct.max(cpu_pct);
            self.cpu_avg_pct = update_ema(self.cpu_avg_pct, cpu_pct, 0.1);
            self.rss_min_kb = self.rss_min_kb.min(rss_kb);
            self.rss_max_kb = self.rss_max_kb.max(rss_kb);
            self.rss_avg_kb = update_counter_avg(
                self.rss_avg_kb,
                self.resource_sample_count + 1,
                rss_kb as f64,
            );
        }
        self.resource_sample_count += 1;
    }

    pub fn render_human(&self, name: &str) -> String {
        let fmt_ts = |ts: u64| {
            if ts == 0 {
                "Never".to_string()
            } else {
                chrono::DateTime::from_timestamp(ts as i64, 0)
                    .map(|dt| dt.to_rfc3339())
                    .unwrap_or_else(|| "Never".to_string())
            }
        };
        format!(
            "app: {name}\n\
             started_at: {started}\n\
             crashed_at: {crashed}\n\
             heartbeat_reset_at: {hb_reset}\n\
             start_count: {start_count}\n\
             crash_count: {crash_count}\n\
             heartbeat_reset_count: {heartbeat_reset_count}\n\
             heartbeat_count: {heartbeat_count}\n\
             heartbeat_count_old: {heartbeat_count_old}\n\
             avg_heartbeat_count_old: {avg_heartbeat_count_old:.2}\n\
             first_heartbeat_s(min/max/avg): {fh_min:?}/{fh_max:?}/{fh_avg:.2}\n\
             inter_heartbeat_s(min/max/avg): {ih_min:?}/{ih_max:?}/{ih_avg:.2}\n\
             cpu_pct(current/min/max/avg): {cpu_cur:.2}/{cpu_min:.2}/{cpu_max:.2}/{cpu_avg:.2}\n\
             rss_kb(current/min/max/avg): {rss_cur}/{rss_min}/{rss_max}/{rss_avg:.2}\n\
             resource_sample_count: {resource_sample_count}\n",
            started = fmt_ts(self.started_at),
            crashed = fmt_ts(self.crashed_at),
            hb_reset = fmt_ts(self.heartbeat_reset_at),
            start_count = self.start_count,
            crash_count = self.crash_count,
            heartbeat_reset_count = self.heartbeat_reset_count,
            heartbeat_count = self.heartbeat_count,
            heartbeat_count_old = self.heartbeat_count_old,
            avg_heartbeat_count_old = self.avg_heartbeat_count_old,
            fh_min = self.first_heartbeat_min_s,
            fh_max = self.first_heartbeat_max_s,
            fh_avg = self.first_heartbeat_avg_s,
            ih_min = self.inter_heartbeat_min_s,
            ih_max = self.inter_heartbeat_max_s,
            ih_avg = self.inter_heartbeat_avg_s,
            cpu_cur = self.cpu_current_pct,
            cpu_min = self.cpu_min_pct,
            cpu_max = self.cpu_max_pct,
            cpu_avg = self.cpu_avg_pct,
            rss_cur = self.rss_current_kb,
            rss_min = self.rss_min_kb,
            rss_max = self.rss_max_kb,
            rss_avg = self.rss_avg_kb,
            resource_sample_count = self.resource_sample_count,
        )
    }
}

/// `avg <- (avg*(n-1) + x) / n`, the counters-of-samples running average.
pub fn update_counter_avg(avg: f64, n: u64, x: f64) -> f64 {
    let n = n.max(1) as f64;
    (avg * (n - 1.0) + x) / n
}

/// Exponential moving average with a fixed smoothing factor.
pub fn update_ema(avg: f64, x: f64, alpha: f64) -> f64 {
    alpha * x + (1.0 - alpha) * avg
}

pub struct StatsStore {
    dir: PathBuf,
    records: HashMap<String, StatsRecord>,
}

impl StatsStore {
    /// Load (or initialise) a record for every name in `names`, reading
    /// `stats_<name>.raw` from `dir`. A missing file is created-on-first-
    /// persist; a magic mismatch zeroes the record and re-stamps `magic`
    /// without affecting other records.
    pub fn load(dir: &Path, names: &[String]) -> Self {
        let mut records = HashMap::new();
        for name in names {
            let record = Self::load_one(dir, name);
            records.insert(name.clone(), record);
        }
        Self {
            dir: dir.to_path_buf(),
            records,
        }
    }

    fn raw_path(dir: &Path, name: &str) -> PathBuf {
        dir.join(format!("stats_{name}.raw"))
    }

    fn log_path(dir: &Path, name: &str) -> PathBuf {
        dir.join(format!("stats_{name}.log"))
    }

    fn load_one(dir: &Path, name: &str) -> StatsRecord {
        let path = Self::raw_path(dir, name);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(_) => return StatsRecord::zeroed(),
        };
        match bincode::deserialize::<StatsRecord>(&bytes) {
            Ok(record) if record.magic == MAGIC => record,
            Ok(_) => {
                warn!(name, "stats record magic mismatch, resetting");
                StatsRecord::zeroed()
            }
            Err(e) => {
                warn!(name, error = %e, "stats record corrupt, resetting");
                StatsRecord::zeroed()
            }
        }
    }

    pub fn get(&self, name: &str) -> &StatsRecord {
        self.records.get(name).expect("stats record must exist for every configured app")
    }

    pub fn record_start(&mut self, name: &str, wall_now: u64) {
        self.records.entry(name.to_string()).or_insert_with(StatsRecord::zeroed).on_start(wall_now);
    }

    pub fn record_crash(&mut self, name: &str, wall_now: u64) {
        self.records.entry(name.to_string()).or_insert_with(StatsRecord::zeroed).on_crash(wall_now);
    }

    pub fn record_heartbeat_reset(&mut self, name: &str, wall_now: u64) {
        self.records
            .entry(name.to_string())
            .or_insert_with(StatsRecord::zeroed)
            .on_heartbeat_reset(wall_now);
    }

    pub fn record_heartbeat(&mut self, name: &str, sample: HeartbeatSample) {
        self.records.entry(name.to_string()).or_insert_with(StatsRecord::zeroed).on_heartbeat(sample);
    }

    pub fn record_resource_sample(&mut self, name: &str, cpu_pct: f64, rss_kb: u64) {
        self.records
            .entry(name.to_string())
            .or_insert_with(StatsRecord::zeroed)
            .on_resource_sample(cpu_pct, rss_kb);
    }

    /// Atomically persist both `.raw` and `.log` for every tracked child.
    pub fn persist_all(&self) {
        for (name, record) in &self.records {
            if let Err(e) = Self::persist_one(&self.dir, name, record) {
                warn!(name, error = %e, "failed to persist stats, will retry next cycle");
            }
        }
    }

    fn persist_one(dir: &Path, name: &str, record: &StatsRecord) -> std::io::Result<()> {
        let raw_path = Self::raw_path(dir, name);
        let bytes = bincode::serialize(record)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        atomic_write(&raw_path, &bytes)?;

        let log_path = Self::log_path(dir, name);
        atomic_write(&log_path, record.render_human(name).as_bytes())?;
        Ok(())
    }
}

fn atomic_write(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    std::fs::write(&tmp_path, bytes)?;
    std::fs::rename(&tmp_path, path)
}
