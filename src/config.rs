//! Configuration loading. A small hand-rolled line scanner for the fixed
//! `[processWatchdog]` + repeating `[app:Name]` grammar, rather than a
//! general-purpose INI crate: syntax beyond the fixed field list is out of
//! scope, so there's nothing a general parser would buy here.

use std::collections::HashSet;
use std::path::Path;

use crate::error::WatchdogError;
use crate::reboot::RebootPolicy;

pub const MAX_APPS: usize = 6;
pub const MAX_NAME_LEN: usize = 31;
pub const MAX_CMD_LEN: usize = 255;
pub const MAX_APP_CMD_LENGTH: usize = 255;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub name: String,
    pub command: String,
    pub start_delay_s: u64,
    pub heartbeat_delay_s: u64,
    pub heartbeat_interval_s: u64,
}

#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    pub udp_port: u16,
    pub apps: Vec<AppConfig>,
    pub reboot_policy: RebootPolicy,
}

enum Section {
    None,
    Global,
    App(String),
}

pub fn load(path: &Path) -> Result<WatchdogConfig, WatchdogError> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        WatchdogError::ConfigInvalid(format!("cannot read {}: {e}", path.display()))
    })?;
    parse(&text)
}

pub fn parse(text: &str) -> Result<WatchdogConfig, WatchdogError> {
    let mut udp_port: Option<u16> = None;
    let mut periodic_reboot = String::new();
    let mut section = Section::None;
    let mut app_fields: Vec<(String, Vec<(String, String)>)> = Vec::new();
    let mut seen_names: HashSet<String> = HashSet::new();

    for raw_line in text.lines() {
        let line = strip_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        if line.starts_with('[') {
            let header = line
                .strip_prefix('[')
                .and_then(|s| s.strip_suffix(']'))
                .unwrap_or(line)
                .trim();
            if header.eq_ignore_ascii_case("processWatchdog") {
                section = Section::Global;
            } else if let Some(name) = header.strip_prefix("app:") {
                let name = name.trim().to_string();
                if name.len() > MAX_NAME_LEN {
                    return Err(WatchdogError::ConfigInvalid(format!(
                        "app name '{name}' exceeds {MAX_NAME_LEN} characters"
                    )));
                }
                if !seen_names.insert(name.to_lowercase()) {
                    return Err(WatchdogError::ConfigInvalid(format!(
                        "duplicate app name '{name}'"
                    )));
                }
                app_fields.push((name.clone(), Vec::new()));
                section = Section::App(name);
            } else {
                // Unknown section: ignored.
                section = Section::None;
            }
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim().to_string();
        let value = value.trim().to_string();

        match &section {
            Section::Global => {
                if key.eq_ignore_ascii_case("udp_port") {
                    udp_port = value.parse::<u32>().ok();
                } else if key.eq_ignore_ascii_case("periodic_reboot") {
                    periodic_reboot = value;
                }
                // Unknown keys ignored.
            }
            Section::App(_) => {
                if let Some((_, fields)) = app_fields.last_mut() {
                    fields.push((key, value));
                }
            }
            Section::None => {}
        }
    }

    if app_fields.len() > MAX_APPS {
        return Err(WatchdogError::ConfigInvalid(format!(
            "too many apps: {} exceeds MAX_APPS={MAX_APPS}",
            app_fields.len()
        )));
    }

    let port = udp_port.ok_or_else(|| {
        WatchdogError::ConfigInvalid("udp_port missing or not a valid u16".to_string())
    })?;
    if port == 0 || port > 65535 {
        return Err(WatchdogError::ConfigInvalid(format!(
            "udp_port {port} out of range 1..65535"
        )));
    }

    let mut apps = Vec::with_capacity(app_fields.len());
    for (name, fields) in app_fields {
        apps.push(build_app_config(name, fields)?);
    }

    Ok(WatchdogConfig {
        udp_port: port as u16,
        apps,
        reboot_policy: RebootPolicy::parse(&periodic_reboot),
    })
}

fn build_app_config(
    name: String,
    fields: Vec<(String, String)>,
) -> Result<AppConfig, WatchdogError> {
    let mut command = String::new();
    let mut start_delay_s = 0u64;
    let mut heartbeat_delay_s = 0u64;
    let mut heartbeat_interval_s = 0u64;

    for (key, value) in fields {
        if key.eq_ignore_ascii_case("cmd") {
            command = value;
        } else if key.eq_ignore_ascii_case("start_delay") {
            start_delay_s = parse_non_negative(&name, &key, &value)?;
        } else if key.eq_ignore_ascii_case("heartbeat_delay") {
            heartbeat_delay_s = parse_non_negative(&name, &key, &value)?;
        } else if key.eq_ignore_ascii_case("heartbeat_interval") {
            heartbeat_interval_s = parse_non_negative(&name, &key, &value)?;
        }
        // Unknown keys ignored.
    }

    if command.is_empty() {
        return Err(WatchdogError::ConfigInvalid(format!(
            "app '{name}' has no cmd"
        )));
    }
    if command.len() > MAX_CMD_LEN {
        return Err(WatchdogError::ConfigInvalid(format!(
            "app '{name}' cmd exceeds {MAX_CMD_LEN} characters"
        )));
    }

    Ok(AppConfig {
        name,
        command,
        start_delay_s,
        heartbeat_delay_s,
        heartbeat_interval_s,
    })
}

fn parse_non_negative(app: &str, key: &str, value: &str) -> Result<u64, WatchdogError> {
    value
        .parse::<u64>()
        .map_err(|_| WatchdogError::ConfigInvalid(format!("app '{app}': {key} must be a non-negative integer, got '{value}'")))
}

fn strip_comment(line: &str) -> &str {
    match line.find(';') {
        Some(idx) => &line[..idx],
        None => line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "
[processWatchdog]
udp_port = 12345
periodic_reboot = 04:00 ; optional

[app:A]
start_delay = 1
heartbeat_delay = 5
heartbeat_interval = 2
cmd = /usr/bin/true --flag

[app:B]
cmd = /usr/bin/false
";

    #[test]
    fn parses_sample_config() {
        let cfg = parse(SAMPLE).unwrap();
        assert_eq!(cfg.udp_port, 12345);
        assert_eq!(cfg.apps.len(), 2);
        assert_eq!(cfg.apps[0].name, "A");
        assert_eq!(cfg.apps[0].command, "/usr/bin/true --flag");
        assert_eq!(cfg.apps[0].heartbeat_interval_s, 2);
        assert_eq!(cfg.apps[1].name, "B");
        assert_eq!(cfg.apps[1].start_delay_s, 0);
    }

    #[test]
    fn insertion_order_preserved() {
        let cfg = parse(SAMPLE).unwrap();
        assert_eq!(cfg.apps[0].name, "A");
        assert_eq!(cfg.apps[1].name, "B");
    }

    #[test]
    fn rejects_port_zero() {
        let text = "[processWatchdog]\nudp_port = 0\n";
        assert!(parse(text).is_err());
    }

    #[test]
    fn rejects_port_out_of_range() {
        let text = "[processWatchdog]\nudp_port = 70000\n";
        assert!(parse(text).is_err());
    }

    #[test]
    fn rejects_missing_port() {
        let text = "[processWatchdog]\n";
        assert!(parse(text).is_err());
    }

    #[test]
    fn rejects_too_many_apps() {
        let mut text = String::from("[processWatchdog]\nudp_port = 1\n");
        for i in 0..(MAX_APPS + 1) {
            text.push_str(&format!("[app:app{i}]\ncmd = /bin/true\n"));
        }
        assert!(parse(&text).is_err());
    }

    #[test]
    fn rejects_name_too_long() {
        let long_name = "x".repeat(MAX_NAME_LEN + 1);
        let text = format!("[processWatchdog]\nudp_port = 1\n[app:{long_name}]\ncmd = /bin/true\n");
        assert!(parse(&text).is_err());
    }

    #[test]
    fn rejects_cmd_too_long() {
        let long_cmd = "x".repeat(MAX_CMD_LEN + 1);
        let text = format!("[processWatchdog]\nudp_port = 1\n[app:A]\ncmd = {long_cmd}\n");
        assert!(parse(&text).is_err());
    }

    #[test]
    fn rejects_app_without_cmd() {
        let text = "[processWatchdog]\nudp_port = 1\n[app:A]\nstart_delay = 1\n";
        assert!(parse(text).is_err());
    }

    #[test]
    fn unknown_keys_and_sections_ignored() {
        let text = "
[processWatchdog]
udp_port = 1
frobnicate = true
[bogus]
whatever = 1
[app:A]
cmd = /bin/true
nonsense_key = 5
";
        let cfg = parse(text).unwrap();
        assert_eq!(cfg.apps.len(), 1);
    }

    #[test]
    fn rejects_duplicate_app_names_case_insensitive() {
        let text = "
[processWatchdog]
udp_port = 1
[app:A]
cmd = /bin/true
[app:a]
cmd = /bin/false
";
        assert!(parse(text).is_err());
    }
}
