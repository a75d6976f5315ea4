//! `-t NAME` self-test dispatch. Each test re-exercises a unit-tested
//! building block end-to-end and prints one PASS/FAIL line — a thin
//! smoke-check dispatch rather than a polished test harness.

use crate::config;
use crate::heartbeat::HeartbeatSample;
use crate::stats::StatsStore;

pub fn run(name: &str) -> i32 {
    let result = match name {
        "config-roundtrip" => config_roundtrip(),
        "stats-roundtrip" => stats_roundtrip(),
        other => Err(format!("unknown self-test '{other}'")),
    };

    match result {
        Ok(()) => {
            println!("PASS {name}");
            0
        }
        Err(e) => {
            eprintln!("FAIL {name}: {e}");
            1
        }
    }
}

fn config_roundtrip() -> Result<(), String> {
    let text = "[processWatchdog]\nudp_port = 12345\n[app:demo]\ncmd = /bin/true\n";
    let cfg = config::parse(text).map_err(|e| e.to_string())?;
    if cfg.udp_port != 12345 || cfg.apps.len() != 1 || cfg.apps[0].name != "demo" {
        return Err("parsed config did not match input".to_string());
    }
    Ok(())
}

fn stats_roundtrip() -> Result<(), String> {
    let dir = std::env::temp_dir().join(format!("procwatchdog-selftest-{}", std::process::id()));
    std::fs::create_dir_all(&dir).map_err(|e| e.to_string())?;

    let result = (|| {
        let mut store = StatsStore::load(&dir, &["demo".to_string()]);
        store.record_start("demo", 1_000);
        store.record_heartbeat("demo", HeartbeatSample { elapsed_s: 2, is_first: true });
        store.persist_all();

        let reloaded = StatsStore::load(&dir, &["demo".to_string()]);
        let rec = reloaded.get("demo");
        if rec.start_count != 1 || rec.heartbeat_count != 1 {
            return Err("reloaded stats record did not match what was persisted".to_string());
        }
        Ok(())
    })();

    let _ = std::fs::remove_dir_all(&dir);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_self_tests_pass() {
        assert_eq!(run("config-roundtrip"), 0);
        assert_eq!(run("stats-roundtrip"), 0);
    }

    #[test]
    fn unknown_self_test_fails() {
        assert_eq!(run("bogus"), 1);
    }
}
