mod child;
mod clock;
mod command;
mod config;
mod error;
mod files;
mod heartbeat;
mod reboot;
mod resource;
mod selftest;
mod signals;
mod stats;
mod supervisor;
mod udp;

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info};

use crate::clock::SystemClock;
use crate::command::exit_code;
use crate::error::WatchdogError;
use crate::supervisor::Supervisor;

const VERSION: &str = env!("CARGO_PKG_VERSION");

struct Args {
    config_path: PathBuf,
    self_test: Option<String>,
}

fn parse_args<I: Iterator<Item = String>>(mut args: I) -> Result<Args, String> {
    let mut config_path = PathBuf::from("config.ini");
    let mut self_test = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-i" => {
                let path = args.next().ok_or("-i requires a path argument")?;
                config_path = PathBuf::from(path);
            }
            "-t" => {
                let name = args.next().ok_or("-t requires a test name argument")?;
                self_test = Some(name);
            }
            "-v" => {
                println!("procwatchdog {VERSION}");
                std::process::exit(exit_code::NORMAL);
            }
            "-h" => {
                print_help();
                std::process::exit(exit_code::NORMAL);
            }
            other => return Err(format!("unrecognised argument: {other}")),
        }
    }

    Ok(Args { config_path, self_test })
}

fn print_help() {
    println!("usage: procwatchdog -i <file.ini> [-v] [-h] [-t <testname>]");
    println!("  -i PATH    configuration file (default: config.ini)");
    println!("  -v         print version and exit");
    println!("  -h         print this help and exit");
    println!("  -t NAME    run a self-test and exit");
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(message) => {
            eprintln!("{message}");
            print_help();
            std::process::exit(exit_code::FATAL_STARTUP);
        }
    };

    if let Some(name) = args.self_test {
        std::process::exit(selftest::run(&name));
    }

    let config = match config::load(&args.config_path) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, path = %args.config_path.display(), "failed to load config");
            std::process::exit(exit_code::FATAL_STARTUP);
        }
    };

    let working_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let clock: Arc<dyn clock::Clock> = Arc::new(SystemClock::new());

    let supervisor = match Supervisor::new(config, working_dir, clock).await {
        Ok(supervisor) => supervisor,
        Err(e @ WatchdogError::UdpFatal(_)) => {
            error!(error = %e, "udp bind failed on startup");
            std::process::exit(exit_code::RESTART_ME);
        }
        Err(e) => {
            error!(error = %e, "supervisor startup failed");
            std::process::exit(exit_code::FATAL_STARTUP);
        }
    };

    info!("procwatchdog starting");
    let code = supervisor.run().await;
    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_config_ini_with_no_args() {
        let args = parse_args(std::iter::empty()).unwrap();
        assert_eq!(args.config_path, PathBuf::from("config.ini"));
        assert!(args.self_test.is_none());
    }

    #[test]
    fn parses_dash_i_override() {
        let args = parse_args(vec!["-i".to_string(), "/etc/watchdog.ini".to_string()].into_iter()).unwrap();
        assert_eq!(args.config_path, PathBuf::from("/etc/watchdog.ini"));
    }

    #[test]
    fn parses_dash_t_self_test_name() {
        let args = parse_args(vec!["-t".to_string(), "config-roundtrip".to_string()].into_iter()).unwrap();
        assert_eq!(args.self_test.as_deref(), Some("config-roundtrip"));
    }

    #[test]
    fn rejects_unknown_flag() {
        assert!(parse_args(vec!["-z".to_string()].into_iter()).is_err());
    }

    #[test]
    fn rejects_dash_i_without_value() {
        assert!(parse_args(vec!["-i".to_string()].into_iter()).is_err());
    }
}
