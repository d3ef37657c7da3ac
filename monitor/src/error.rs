//! Error types for the Flowbar monitor.
//!
//! Each subsystem owns a focused error enum; [`MonitorError`] aggregates them
//! for callers that cross subsystem boundaries (mainly the binary).

use thiserror::Error;

use crate::activity::WatcherError;
use crate::cli::CliError;
use crate::config::ConfigError;
use crate::state::StateError;

/// Errors that can occur during monitor operations.
///
/// # Examples
///
/// ```
/// use flowbar_monitor::error::MonitorError;
///
/// fn read_settings(path: &str) -> Result<serde_json::Value, MonitorError> {
///     let contents = std::fs::read_to_string(path)?;
///     Ok(serde_json::from_str(&contents)?)
/// }
///
/// assert!(read_settings("/nonexistent/settings.json").is_err());
/// ```
#[derive(Error, Debug)]
pub enum MonitorError {
    /// Configuration-related error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// File system I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing or serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The makerflow CLI could not be run or its output not decoded.
    #[error("CLI error: {0}")]
    Cli(#[from] CliError),

    /// Persisted state could not be read or written.
    #[error("state error: {0}")]
    State(#[from] StateError),

    /// File activity watching failed.
    #[error("file watch error: {0}")]
    Watch(#[from] WatcherError),
}

/// A specialized `Result` type for monitor operations.
pub type Result<T> = std::result::Result<T, MonitorError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::path::PathBuf;

    #[test]
    fn test_config_error_display() {
        let err = MonitorError::from(ConfigError::InvalidValue {
            key: "FLOWBAR_POLL_INTERVAL_SECS".to_string(),
            message: "must be a positive number of seconds".to_string(),
        });
        let display = err.to_string();
        assert!(display.starts_with("configuration error:"));
        assert!(display.contains("FLOWBAR_POLL_INTERVAL_SECS"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err: MonitorError = io_err.into();
        assert!(matches!(err, MonitorError::Io(_)));
        assert_eq!(err.to_string(), "I/O error: file not found");
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("not valid json").unwrap_err();
        let err: MonitorError = json_err.into();
        assert!(matches!(err, MonitorError::Json(_)));
        assert!(err.to_string().starts_with("JSON error:"));
    }

    #[test]
    fn test_watch_error_display() {
        let err = MonitorError::from(WatcherError::DirectoryNotFound(PathBuf::from("/gone")));
        assert_eq!(
            err.to_string(),
            "file watch error: watch directory does not exist: /gone"
        );
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<MonitorError>();
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_ok() -> Result<i32> {
            Ok(42)
        }
        fn returns_err() -> Result<i32> {
            Err(io::Error::new(io::ErrorKind::Other, "boom").into())
        }
        assert_eq!(returns_ok().unwrap(), 42);
        assert!(returns_err().is_err());
    }
}
