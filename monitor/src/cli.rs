//! Bridge to the makerflow command-line tool.
//!
//! Every interaction with the backend goes through a single subprocess call:
//! the bridge renders a [`CliCommand`] into its fixed argument template, runs it
//! through a [`CliRunner`], and turns the captured output into a typed
//! [`CliReply`].
//!
//! # Output handling
//!
//! 1. Non-zero exit status or any bytes on stderr: [`CliError::Exec`].
//! 2. The sentinel `"API token not available"` anywhere on stdout:
//!    [`CliReply::AuthUnavailable`], checked before any decoding.
//! 3. JSON commands: stdout is sanitized (see [`sanitize`]) and decoded.
//!    `null` becomes [`CliReply::Empty`]; malformed text is [`CliError::Decode`].
//! 4. Plain-text commands: trimmed stdout as [`CliReply::Text`].
//!
//! Callers treat every error as "no data available". Errors are logged here
//! and never shown to the user.

use std::process::Stdio;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

/// Substring the CLI prints when no API token is configured.
pub const API_TOKEN_SENTINEL: &str = "API token not available";

/// Color-reset artifact the CLI leaves in its output.
const COLOR_RESET: &str = "[0m";

/// Escape character that precedes [`COLOR_RESET`].
const ESCAPE: char = '\u{1b}';

/// Errors from a single CLI invocation.
#[derive(Error, Debug)]
pub enum CliError {
    /// The process could not be started (typically: CLI not installed).
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The process exited unsuccessfully or wrote to stderr.
    #[error("command `{command}` failed (exit code {code:?}): {stderr}")]
    Exec {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    /// Stdout was expected to be JSON but could not be decoded.
    #[error("invalid JSON from `{command}`: {source}")]
    Decode {
        command: String,
        #[source]
        source: serde_json::Error,
    },
}

/// How aggressively stdout is cleaned before JSON decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SanitizeMode {
    /// Drop one stray leading character when the text does not start a JSON document.
    #[default]
    Lenient,
    /// Additionally drop one stray trailing character when the text does not
    /// end a JSON document.
    Strict,
}

impl std::str::FromStr for SanitizeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lenient" => Ok(Self::Lenient),
            "strict" => Ok(Self::Strict),
            other => Err(format!("expected 'lenient' or 'strict', got '{other}'")),
        }
    }
}

/// Typed result of a successful invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum CliReply {
    /// Decoded JSON document.
    Data(Value),
    /// The CLI printed `null` or nothing.
    Empty,
    /// The CLI reported that no API token is configured.
    AuthUnavailable,
    /// Trimmed stdout of a plain-text command.
    Text(String),
}

impl CliReply {
    /// Returns the decoded JSON, if any.
    #[must_use]
    pub fn into_data(self) -> Option<Value> {
        match self {
            Self::Data(value) => Some(value),
            _ => None,
        }
    }
}

/// The fixed set of CLI invocations.
#[derive(Debug, Clone, PartialEq)]
pub enum CliCommand {
    /// `config token --check`
    TokenCheck,
    /// `config token --value=<token>`
    SetToken(String),
    /// `start [--client-only] --json`
    StartFlow { client_only: bool },
    /// `stop [--client-only] --json`
    StopFlow { client_only: bool },
    /// `ongoing --json`
    OngoingFlow,
    /// `break start --json [--reason=<r>]`
    StartBreak { reason: Option<String> },
    /// `break stop --json`
    StopBreak,
    /// `break ongoing --json`
    OngoingBreak,
    /// `tasks todo --json`
    ListTasks,
    /// `todo done <json> --json`
    MarkTodoDone(Value),
    /// `events list --json`
    ListEvents,
    /// `productive-activity --min=<ms> --max=<ms>`
    ProductiveActivity { min: i64, max: i64 },
    /// `help`
    Help,
}

impl CliCommand {
    /// Renders the argument list, tagging JSON commands with `--source=<source>`.
    #[must_use]
    pub fn args(&self, source: &str) -> Vec<String> {
        let source_flag = format!("--source={source}");
        let mut args: Vec<String> = match self {
            Self::TokenCheck => return strings(&["config", "token", "--check"]),
            Self::SetToken(token) => {
                return vec![
                    "config".to_string(),
                    "token".to_string(),
                    format!("--value={token}"),
                ]
            }
            Self::ProductiveActivity { min, max } => {
                return vec![
                    "productive-activity".to_string(),
                    format!("--min={min}"),
                    format!("--max={max}"),
                ]
            }
            Self::Help => return strings(&["help"]),
            Self::StartFlow { client_only } => with_client_only("start", *client_only),
            Self::StopFlow { client_only } => with_client_only("stop", *client_only),
            Self::OngoingFlow => strings(&["ongoing", "--json"]),
            Self::StartBreak { reason } => {
                let mut args = strings(&["break", "start", "--json"]);
                if let Some(reason) = reason.as_deref().filter(|r| !r.is_empty()) {
                    args.push(format!("--reason={reason}"));
                }
                args
            }
            Self::StopBreak => strings(&["break", "stop", "--json"]),
            Self::OngoingBreak => strings(&["break", "ongoing", "--json"]),
            Self::ListTasks => strings(&["tasks", "todo", "--json"]),
            Self::MarkTodoDone(todo) => vec![
                "todo".to_string(),
                "done".to_string(),
                todo.to_string(),
                "--json".to_string(),
            ],
            Self::ListEvents => strings(&["events", "list", "--json"]),
        };
        args.push(source_flag);
        args
    }

    /// Whether stdout is a JSON document.
    #[must_use]
    pub fn expects_json(&self) -> bool {
        !matches!(
            self,
            Self::TokenCheck | Self::SetToken(_) | Self::ProductiveActivity { .. } | Self::Help
        )
    }

    /// Short label for logs; never includes the token.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::TokenCheck => "config token --check",
            Self::SetToken(_) => "config token --value",
            Self::StartFlow { client_only: false } => "start",
            Self::StartFlow { client_only: true } => "start --client-only",
            Self::StopFlow { client_only: false } => "stop",
            Self::StopFlow { client_only: true } => "stop --client-only",
            Self::OngoingFlow => "ongoing",
            Self::StartBreak { .. } => "break start",
            Self::StopBreak => "break stop",
            Self::OngoingBreak => "break ongoing",
            Self::ListTasks => "tasks todo",
            Self::MarkTodoDone(_) => "todo done",
            Self::ListEvents => "events list",
            Self::ProductiveActivity { .. } => "productive-activity",
            Self::Help => "help",
        }
    }
}

fn strings(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| (*s).to_string()).collect()
}

fn with_client_only(verb: &str, client_only: bool) -> Vec<String> {
    if client_only {
        strings(&[verb, "--client-only", "--json"])
    } else {
        strings(&[verb, "--json"])
    }
}

/// Captured output of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl RawOutput {
    /// A successful run that printed `stdout`.
    #[must_use]
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// A failed run with the given exit code and stderr.
    #[must_use]
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    fn succeeded(&self) -> bool {
        self.code == Some(0) && self.stderr.trim().is_empty()
    }
}

/// Runs the CLI with a list of arguments.
#[async_trait]
pub trait CliRunner: Send + Sync {
    /// Runs `program args...` to completion and captures its output.
    async fn run(&self, program: &str, args: &[String]) -> std::io::Result<RawOutput>;
}

/// [`CliRunner`] backed by real subprocesses.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

#[async_trait]
impl CliRunner for ProcessRunner {
    async fn run(&self, program: &str, args: &[String]) -> std::io::Result<RawOutput> {
        let output = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await?;

        Ok(RawOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Typed access to the CLI.
pub struct CliBridge {
    program: String,
    source: String,
    sanitize_mode: SanitizeMode,
    runner: Box<dyn CliRunner>,
}

impl std::fmt::Debug for CliBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CliBridge")
            .field("program", &self.program)
            .field("source", &self.source)
            .field("sanitize_mode", &self.sanitize_mode)
            .finish_non_exhaustive()
    }
}

impl CliBridge {
    /// Creates a bridge that runs `program` through `runner`.
    #[must_use]
    pub fn new(
        program: impl Into<String>,
        source: impl Into<String>,
        sanitize_mode: SanitizeMode,
        runner: Box<dyn CliRunner>,
    ) -> Self {
        Self {
            program: program.into(),
            source: source.into(),
            sanitize_mode,
            runner,
        }
    }

    /// The executable this bridge runs.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Runs one command and interprets its output.
    ///
    /// # Errors
    ///
    /// Returns [`CliError`] when the process cannot be started, fails, writes
    /// to stderr, or prints JSON that cannot be decoded. Errors are logged
    /// before being returned.
    pub async fn invoke(&self, command: CliCommand) -> Result<CliReply, CliError> {
        let result = self.invoke_inner(&command).await;
        if let Err(e) = &result {
            warn!(command = command.label(), error = %e, "CLI invocation failed");
        }
        result
    }

    /// Like [`invoke`](Self::invoke) but folds every failure into `None`.
    pub async fn fetch(&self, command: CliCommand) -> Option<CliReply> {
        self.invoke(command).await.ok()
    }

    async fn invoke_inner(&self, command: &CliCommand) -> Result<CliReply, CliError> {
        let args = command.args(&self.source);
        debug!(command = command.label(), "Invoking CLI");

        let output = self
            .runner
            .run(&self.program, &args)
            .await
            .map_err(|source| CliError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.succeeded() {
            return Err(CliError::Exec {
                command: command.label().to_string(),
                code: output.code,
                stderr: output.stderr.trim().to_string(),
            });
        }

        interpret(command, &output.stdout, self.sanitize_mode)
    }
}

/// Interprets the stdout of a successful run.
fn interpret(
    command: &CliCommand,
    stdout: &str,
    mode: SanitizeMode,
) -> Result<CliReply, CliError> {
    if stdout.contains(API_TOKEN_SENTINEL) {
        debug!(command = command.label(), "CLI reported missing API token");
        return Ok(CliReply::AuthUnavailable);
    }

    if !command.expects_json() {
        return Ok(CliReply::Text(stdout.trim().to_string()));
    }

    let cleaned = sanitize(stdout, true, mode);
    if cleaned.is_empty() {
        return Ok(CliReply::Empty);
    }

    match serde_json::from_str::<Value>(&cleaned) {
        Ok(Value::Null) => Ok(CliReply::Empty),
        Ok(value) => Ok(CliReply::Data(value)),
        Err(source) => Err(CliError::Decode {
            command: command.label().to_string(),
            source,
        }),
    }
}

/// Cleans CLI stdout before decoding.
///
/// Removes the color-reset artifact (with or without its escape character),
/// trims whitespace and, when `expect_json` is set, drops one stray leading
/// character if the text does not start with `{` or `[`. In
/// [`SanitizeMode::Strict`] one stray trailing character is dropped the same
/// way. `null` passes through unchanged.
///
/// Sanitizing text that is already a JSON object or array returns it unchanged.
#[must_use]
pub fn sanitize(stdout: &str, expect_json: bool, mode: SanitizeMode) -> String {
    let without_reset = stdout
        .replace(&format!("{ESCAPE}{COLOR_RESET}"), "")
        .replace(COLOR_RESET, "");
    let mut text = without_reset.trim();

    if text.is_empty() || text == "null" || !expect_json {
        return text.to_string();
    }

    if !text.starts_with(['{', '[']) {
        let mut chars = text.chars();
        chars.next();
        text = chars.as_str().trim_start();
    }

    if mode == SanitizeMode::Strict && !text.is_empty() && !text.ends_with(['}', ']']) {
        let mut chars = text.chars();
        chars.next_back();
        text = chars.as_str().trim_end();
    }

    text.to_string()
}
