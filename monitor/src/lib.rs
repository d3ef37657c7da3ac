//! Flowbar Monitor - status companion for the makerflow CLI.
//!
//! This crate keeps an editor-style status bar in sync with the user's
//! makerflow state: flow sessions, breaks, pending tasks and calendar events.
//! Everything it knows comes from running the `makerflow` command-line tool
//! and decoding its output.
//!
//! # Overview
//!
//! The monitor polls the CLI on a fixed schedule and reconciles what it sees
//! with the last state it persisted. Starting or ending a session on another
//! device shows up here within one poll; starting one here is signalled back
//! to the CLI. File activity in a workspace is batched into periodic
//! productive-activity reports.
//!
//! User interface operations go through the [`host::Host`] trait. The bundled
//! [`host::ConsoleHost`] prints status changes to the terminal and reads
//! commands from stdin.
//!
//! # Modules
//!
//! - [`cli`]: Running the CLI and decoding its output
//! - [`types`]: Session, break and calendar payloads
//! - [`state`]: Persisted state with atomic writes
//! - [`session`]: Flow and break reconciliation
//! - [`todo`]: Task classification, descriptions and actions
//! - [`calendar`]: Event phases and summaries
//! - [`heartbeat`]: Activity batching and reporting
//! - [`activity`]: File system activity watcher
//! - [`token`]: API token checks and prompts
//! - [`host`]: UI seam and the console host
//! - [`shell`]: Commands, startup and the polling schedule
//! - [`config`]: Configuration from environment variables
//! - [`error`]: Error types for monitor operations
//! - [`utils`]: Shared utilities (relative time, in-flight guards)

pub mod activity;
pub mod calendar;
pub mod cli;
pub mod config;
pub mod error;
pub mod heartbeat;
pub mod host;
pub mod session;
pub mod shell;
pub mod state;
pub mod todo;
pub mod token;
pub mod types;
pub mod utils;

pub use activity::{ActivityWatcher, WatcherError};
pub use cli::{CliBridge, CliCommand, CliError, CliReply, CliRunner, ProcessRunner, RawOutput};
pub use config::Config;
pub use error::{MonitorError, Result};
pub use host::{ConsoleHost, Host, Notice, StatusItem};
pub use session::{SessionReconciler, Snapshot};
pub use shell::{Command, Schedule, Shell};
pub use state::{AppState, PersistedState, StateError};
pub use todo::{TodoRecord, TodoView};
pub use types::{BreakReason, BreakSession, CalendarEvent, FlowSession};
pub use utils::{InFlight, InFlightPermit};
