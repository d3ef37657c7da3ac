//! Configuration module for Flowbar Monitor.
//!
//! This module handles parsing configuration from environment variables.
//! Nothing is required; every variable has a default.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `FLOWBAR_CLI` | `makerflow` | CLI executable to run |
//! | `FLOWBAR_SOURCE` | `vscode` | Value passed as `--source=` |
//! | `FLOWBAR_STATE_PATH` | `~/.flowbar/state.json` | Persisted state file |
//! | `FLOWBAR_WATCH_DIR` | (unset) | Workspace directory whose file activity counts as productive |
//! | `FLOWBAR_SANITIZE_MODE` | `lenient` | `lenient` or `strict` stdout cleanup |
//! | `FLOWBAR_SUPPRESS_CLIENT_ONLY_DURING_TRANSITION` | `true` | Skip client-only signals while the opposite transition is in flight |
//! | `FLOWBAR_SHOW_STATUS` | `true` | Show the flow/break status item |
//! | `FLOWBAR_SHOW_TASKS` | `true` | Show the tasks status item |
//! | `FLOWBAR_SHOW_CALENDAR` | `true` | Show the calendar status item |
//! | `FLOWBAR_POLL_INTERVAL_SECS` | 10 | Flow, break, task and calendar polling |
//! | `FLOWBAR_ELAPSED_INTERVAL_SECS` | 60 | Elapsed-time refresh |
//! | `FLOWBAR_HEARTBEAT_INTERVAL_SECS` | 30 | Activity report flush |
//! | `FLOWBAR_INSTALL_COMMAND` | `npm install -g makerflow` | Command run by "Install now" |
//!
//! # Example
//!
//! ```no_run
//! use flowbar_monitor::config::Config;
//!
//! let config = Config::from_env().expect("Failed to load configuration");
//! println!("CLI: {}", config.cli_program);
//! ```

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use directories::BaseDirs;
use thiserror::Error;

use crate::cli::SanitizeMode;

/// Default CLI executable.
const DEFAULT_CLI: &str = "makerflow";

/// Default `--source` value.
const DEFAULT_SOURCE: &str = "vscode";

/// Default state directory name relative to home.
const DEFAULT_STATE_DIR: &str = ".flowbar";

/// State file name inside the state directory.
const STATE_FILE: &str = "state.json";

const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;
const DEFAULT_ELAPSED_INTERVAL_SECS: u64 = 60;
const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 30;

const DEFAULT_INSTALL_COMMAND: &str = "npm install -g makerflow";

/// Errors that can occur during configuration parsing.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Environment variable has an invalid value.
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Failed to determine home directory.
    #[error("failed to determine home directory")]
    NoHomeDirectory,
}

/// Which status items are shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Visibility {
    pub status: bool,
    pub tasks: bool,
    pub calendar: bool,
}

impl Default for Visibility {
    fn default() -> Self {
        Self {
            status: true,
            tasks: true,
            calendar: true,
        }
    }
}

/// Periods of the recurring jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Intervals {
    /// Flow, break, task and calendar polls.
    pub poll: Duration,
    /// Elapsed-time refresh of the status item.
    pub elapsed: Duration,
    /// Heartbeat flush.
    pub heartbeat: Duration,
}

impl Default for Intervals {
    fn default() -> Self {
        Self {
            poll: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            elapsed: Duration::from_secs(DEFAULT_ELAPSED_INTERVAL_SECS),
            heartbeat: Duration::from_secs(DEFAULT_HEARTBEAT_INTERVAL_SECS),
        }
    }
}

/// Configuration for the Flowbar Monitor.
#[derive(Debug, Clone)]
pub struct Config {
    /// CLI executable name or path.
    pub cli_program: String,

    /// Value of `--source=` on JSON commands.
    pub source: String,

    /// Persisted state file.
    pub state_path: PathBuf,

    /// Directory whose file changes are reported as activity. `None` disables
    /// the watcher.
    pub watch_dir: Option<PathBuf>,

    pub sanitize_mode: SanitizeMode,

    /// Suppress `--client-only` start/stop signals while the opposite
    /// transition is in flight.
    pub suppress_client_only_during_transition: bool,

    pub visibility: Visibility,

    pub intervals: Intervals,

    /// Shell command run by the "Install now" action.
    pub install_command: String,
}

impl Config {
    /// Creates a new `Config` by parsing environment variables.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if:
    /// - a boolean variable is not `true`/`false`/`1`/`0`/`yes`/`no`
    /// - an interval is not a positive integer
    /// - `FLOWBAR_SANITIZE_MODE` is not `lenient` or `strict`
    /// - `FLOWBAR_STATE_PATH` is unset and the home directory cannot be
    ///   determined
    pub fn from_env() -> Result<Self, ConfigError> {
        let cli_program = non_empty_var("FLOWBAR_CLI").unwrap_or_else(|| DEFAULT_CLI.to_string());
        let source = non_empty_var("FLOWBAR_SOURCE").unwrap_or_else(|| DEFAULT_SOURCE.to_string());

        let state_path = match non_empty_var("FLOWBAR_STATE_PATH") {
            Some(path) => PathBuf::from(path),
            None => {
                let base_dirs = BaseDirs::new().ok_or(ConfigError::NoHomeDirectory)?;
                base_dirs.home_dir().join(DEFAULT_STATE_DIR).join(STATE_FILE)
            }
        };

        let watch_dir = non_empty_var("FLOWBAR_WATCH_DIR").map(PathBuf::from);

        let sanitize_mode = match non_empty_var("FLOWBAR_SANITIZE_MODE") {
            Some(val) => val.parse().map_err(|message| ConfigError::InvalidValue {
                key: "FLOWBAR_SANITIZE_MODE".to_string(),
                message,
            })?,
            None => SanitizeMode::default(),
        };

        let suppress_client_only_during_transition =
            parse_bool("FLOWBAR_SUPPRESS_CLIENT_ONLY_DURING_TRANSITION", true)?;

        let visibility = Visibility {
            status: parse_bool("FLOWBAR_SHOW_STATUS", true)?,
            tasks: parse_bool("FLOWBAR_SHOW_TASKS", true)?,
            calendar: parse_bool("FLOWBAR_SHOW_CALENDAR", true)?,
        };

        let intervals = Intervals {
            poll: parse_secs("FLOWBAR_POLL_INTERVAL_SECS", DEFAULT_POLL_INTERVAL_SECS)?,
            elapsed: parse_secs("FLOWBAR_ELAPSED_INTERVAL_SECS", DEFAULT_ELAPSED_INTERVAL_SECS)?,
            heartbeat: parse_secs(
                "FLOWBAR_HEARTBEAT_INTERVAL_SECS",
                DEFAULT_HEARTBEAT_INTERVAL_SECS,
            )?,
        };

        let install_command = non_empty_var("FLOWBAR_INSTALL_COMMAND")
            .unwrap_or_else(|| DEFAULT_INSTALL_COMMAND.to_string());

        Ok(Self {
            cli_program,
            source,
            state_path,
            watch_dir,
            sanitize_mode,
            suppress_client_only_during_transition,
            visibility,
            intervals,
            install_command,
        })
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|val| val.trim().to_string())
        .filter(|val| !val.is_empty())
}

fn parse_bool(key: &str, default: bool) -> Result<bool, ConfigError> {
    let Some(val) = non_empty_var(key) else {
        return Ok(default);
    };
    match val.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected true or false, got '{val}'"),
        }),
    }
}

fn parse_secs(key: &str, default: u64) -> Result<Duration, ConfigError> {
    let Some(val) = non_empty_var(key) else {
        return Ok(Duration::from_secs(default));
    };
    let secs = val.parse::<u64>().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("expected positive integer, got '{val}'"),
    })?;
    if secs == 0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "interval must be at least 1 second".to_string(),
        });
    }
    Ok(Duration::from_secs(secs))
}
