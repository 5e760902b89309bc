//! Command-line interface handling for the Switchboard server.
//!
//! One command with a positional `operation` (`run`, `start`, `stop` or
//! `restart`) and a handful of flags that override configuration.

use clap::{Arg, ArgAction, Command};
use std::ffi::OsString;
use std::path::PathBuf;

pub const DEFAULT_CONFIG_PATH: &str = "switchboard.toml";

/// Command line arguments parsed from user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliArgs {
    /// Requested daemon operation, validated later
    pub operation: String,
    /// Ignore an existing PID file
    pub force: bool,
    /// Verbose logging (`-d` or `-v`)
    pub debug: bool,
    /// Optional override for the PID file path
    pub pid_file: Option<PathBuf>,
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// Optional override for bind address
    pub bind_address: Option<String>,
    /// Optional override for bind port
    pub port: Option<u16>,
    /// Optional override for log level
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
    /// Set on the background child spawned by `start`
    pub daemonized: bool,
}

impl CliArgs {
    pub fn parse() -> Self {
        Self::parse_from(std::env::args_os())
    }

    pub fn parse_from<I, T>(args: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let matches = command().get_matches_from(args);

        Self {
            operation: matches
                .get_one::<String>("operation")
                .cloned()
                .unwrap_or_else(|| "run".to_string()),
            force: matches.get_flag("force"),
            debug: matches.get_flag("debug") || matches.get_flag("verbose"),
            pid_file: matches.get_one::<String>("pid-file").map(PathBuf::from),
            config_path: PathBuf::from(
                matches
                    .get_one::<String>("config")
                    .map(String::as_str)
                    .unwrap_or(DEFAULT_CONFIG_PATH),
            ),
            bind_address: matches.get_one::<String>("bind").cloned(),
            port: matches.get_one::<u16>("port").copied(),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
            daemonized: matches.get_flag("daemonized"),
        }
    }
}

fn command() -> Command {
    Command::new("switchboard")
        .version(env!("CARGO_PKG_VERSION"))
        .about("WebSocket event server")
        .arg(
            Arg::new("operation")
                .value_name("OPERATION")
                .help("What to do: run, start, stop or restart")
                .default_value("run"),
        )
        .arg(
            Arg::new("force")
                .short('f')
                .long("force")
                .help("Ignore an existing PID file")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("debug")
                .short('d')
                .long("debug")
                .help("Verbose logging in foreground mode")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Same as --debug")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("pid-file")
                .long("pid-file")
                .value_name("FILE")
                .help("PID file path (default: /tmp/ws-server.pid)"),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value(DEFAULT_CONFIG_PATH),
        )
        .arg(
            Arg::new("bind")
                .short('b')
                .long("bind")
                .value_name("ADDRESS")
                .help("Bind address (e.g., 0.0.0.0)"),
        )
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .value_name("PORT")
                .help("Bind port")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (trace, debug, info, warn, error)"),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .help("Output logs in JSON format")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("daemonized")
                .long("daemonized")
                .hide(true)
                .action(ArgAction::SetTrue),
        )
}
