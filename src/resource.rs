//! Resource sampling: CPU% and RSS for a managed child, read from
//! `/proc/{pid}/stat` and `/proc/{pid}/status`. Tracks *current* RSS as a
//! live sample (`VmRSS`), not peak-since-start (`VmHWM`) — see DESIGN.md.

use std::io;
use std::time::Instant;

/// Parse CPU time (utime + stime) from `/proc/{pid}/stat` content, in clock
/// ticks. `comm` can contain spaces/parens, so we anchor on the last `)`.
pub fn parse_cpu_time(stat: &str) -> io::Result<u64> {
    let after_comm = stat
        .rfind(')')
        .map(|i| &stat[i + 2..])
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "malformed /proc/stat"))?;

    let fields: Vec<&str> = after_comm.split_whitespace().collect();
    if fields.len() < 13 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "too few fields in /proc/stat",
        ));
    }

    let utime: u64 = fields[11]
        .parse()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let stime: u64 = fields[12]
        .parse()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    Ok(utime + stime)
}

pub fn read_cpu_time(pid: i32) -> io::Result<u64> {
    let stat = std::fs::read_to_string(format!("/proc/{pid}/stat"))?;
    parse_cpu_time(&stat)
}

/// Parse current resident set size (VmRSS) from `/proc/{pid}/status`
/// content, in KB.
pub fn parse_rss_kb(status: &str) -> io::Result<u64> {
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("VmRSS:") {
            let trimmed = rest.trim();
            let kb_str = trimmed.strip_suffix(" kB").unwrap_or(trimmed);
            return kb_str
                .trim()
                .parse()
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e));
        }
    }
    Err(io::Error::new(
        io::ErrorKind::NotFound,
        "VmRSS not found in /proc/status",
    ))
}

pub fn read_rss_kb(pid: i32) -> io::Result<u64> {
    let status = std::fs::read_to_string(format!("/proc/{pid}/status"))?;
    parse_rss_kb(&status)
}

pub fn clock_ticks_per_sec() -> u64 {
    #[cfg(target_os = "linux")]
    {
        // SAFETY: sysconf(_SC_CLK_TCK) is always safe to call.
        let ticks = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
        if ticks > 0 {
            ticks as u64
        } else {
            100
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        100
    }
}

/// Tracks the previous CPU-ticks/instant pair for one child so successive
/// 60-second samples can be turned into a CPU percentage.
pub struct CpuSampler {
    prev_ticks: Option<u64>,
    prev_instant: Option<Instant>,
}

impl CpuSampler {
    pub fn new() -> Self {
        Self {
            prev_ticks: None,
            prev_instant: None,
        }
    }

    /// Sample current CPU% for `pid`. Returns `None` if the process can't be
    /// read (already exited, permission denied, etc).
    pub fn sample(&mut self, pid: i32) -> Option<f64> {
        let ticks = read_cpu_time(pid).ok()?;
        let now = Instant::now();

        let pct = match (self.prev_ticks, self.prev_instant) {
            (Some(prev_ticks), Some(prev_instant)) => {
                let tick_delta = ticks.saturating_sub(prev_ticks) as f64;
                let secs = now.duration_since(prev_instant).as_secs_f64().max(0.001);
                let ticks_per_sec = clock_ticks_per_sec() as f64;
                ((tick_delta / ticks_per_sec) / secs) * 100.0
            }
            _ => 0.0,
        };

        self.prev_ticks = Some(ticks);
        self.prev_instant = Some(now);
        Some(pct)
    }
}

impl Default for CpuSampler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_STAT: &str =
        "12345 (bash) S 1 12345 12345 0 -1 4194304 500 0 0 0 150 30 0 0 20 0 1 0 100 1234567 200 18446744073709551615 0 0 0 0 0 0 0 0 0 0 0 0 17 0 0 0 0 0 0";

    #[test]
    fn parse_cpu_time_normal() {
        assert_eq!(parse_cpu_time(SAMPLE_STAT).unwrap(), 180);
    }

    #[test]
    fn parse_cpu_time_comm_with_spaces() {
        let stat = "999 (Web Content) S 1 999 999 0 -1 0 0 0 0 0 42 8 0 0 20 0 1 0 100 0 0 18446744073709551615 0 0 0 0 0 0 0 0 0 0 0 0 17 0 0 0 0 0 0";
        assert_eq!(parse_cpu_time(stat).unwrap(), 50);
    }

    #[test]
    fn parse_cpu_time_malformed() {
        assert!(parse_cpu_time("garbage").is_err());
    }

    #[test]
    fn parse_cpu_time_too_few_fields() {
        assert!(parse_cpu_time("1 (bash) S 0 1").is_err());
    }

    const SAMPLE_STATUS: &str = "\
Name:\tbash
VmPeak:\t 10000 kB
VmHWM:\t  4096 kB
VmRSS:\t  3000 kB
Threads:\t1";

    #[test]
    fn parse_rss_normal() {
        assert_eq!(parse_rss_kb(SAMPLE_STATUS).unwrap(), 3000);
    }

    #[test]
    fn parse_rss_missing() {
        let status = "Name:\tbash\nVmPeak:\t10000 kB\n";
        assert!(parse_rss_kb(status).is_err());
    }

    #[test]
    fn clock_ticks_positive() {
        assert!(clock_ticks_per_sec() > 0);
    }

    #[test]
    fn cpu_sampler_first_sample_is_zero_baseline() {
        let mut sampler = CpuSampler::new();
        // Our own process always exists.
        let pid = std::process::id() as i32;
        let first = sampler.sample(pid);
        assert!(first.is_some());
        assert_eq!(first.unwrap(), 0.0);
    }
}
