//! The UI surface the monitor renders into.
//!
//! Everything user-visible goes through the [`Host`] trait: three status
//! items, notices with follow-up actions, pick lists, a text prompt, and
//! opening links or terminal commands. The binary ships [`ConsoleHost`],
//! which renders to stdout and reads choices from stdin; tests use a
//! recording implementation.
//!
//! Notices are fire-and-forget. An action attached to a notice is a
//! [`Command`]; when the user picks it the host feeds that command back into
//! the normal command dispatch, so no caller ever waits on a notice.

use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::debug;

use crate::shell::Command;

/// The three status indicators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusItem {
    /// Combined flow/break indicator. Clicking it runs [`Command::ClickStatusBar`].
    Session,
    /// Task count. Clicking it runs [`Command::ListTasks`].
    Tasks,
    /// Calendar summary. Clicking it runs [`Command::ListEvents`].
    Calendar,
}

impl StatusItem {
    pub const ALL: [StatusItem; 3] = [Self::Session, Self::Tasks, Self::Calendar];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Session => "flow",
            Self::Tasks => "tasks",
            Self::Calendar => "calendar",
        }
    }
}

impl fmt::Display for StatusItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
}

/// A button on a notice.
#[derive(Debug, Clone, PartialEq)]
pub struct NoticeAction {
    pub label: String,
    /// Command to dispatch when chosen; `None` just dismisses.
    pub command: Option<Command>,
}

impl NoticeAction {
    pub fn new(label: impl Into<String>, command: Command) -> Self {
        Self {
            label: label.into(),
            command: Some(command),
        }
    }

    pub fn dismiss(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            command: None,
        }
    }
}

/// A message shown to the user.
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
    pub detail: Option<String>,
    pub modal: bool,
    pub actions: Vec<NoticeAction>,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
            detail: None,
            modal: false,
            actions: Vec::new(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Warning,
            ..Self::info(message)
        }
    }

    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    #[must_use]
    pub fn modal(mut self) -> Self {
        self.modal = true;
        self
    }

    #[must_use]
    pub fn with_action(mut self, action: NoticeAction) -> Self {
        self.actions.push(action);
        self
    }
}

/// One row of a pick list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PickItem {
    pub label: String,
    pub description: Option<String>,
}

impl PickItem {
    pub fn new(label: impl Into<String>, description: Option<String>) -> Self {
        Self {
            label: label.into(),
            description,
        }
    }
}

/// A free-text prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputRequest {
    pub prompt: String,
    pub placeholder: String,
    /// Mask the typed value.
    pub password: bool,
}

/// UI operations the monitor needs.
#[async_trait]
pub trait Host: Send + Sync {
    /// Replaces the text of a status item.
    fn set_status(&self, item: StatusItem, text: &str);

    /// Shows or hides a status item.
    fn show_status_item(&self, item: StatusItem, visible: bool);

    /// Displays a notice without waiting for the user.
    fn notify(&self, notice: Notice);

    /// Lets the user choose one of `items`. Returns its index, or `None` when
    /// dismissed.
    async fn pick(&self, items: Vec<PickItem>, placeholder: &str) -> Option<usize>;

    /// Asks the user for text. `None` when dismissed.
    async fn input_box(&self, request: InputRequest) -> Option<String>;

    /// Opens a URL with the system handler.
    fn open_external(&self, url: &str);

    /// Runs `command` in a named terminal.
    fn run_in_terminal(&self, name: &str, command: &str);
}

/// Host wrapper that remembers the last text of each status item.
///
/// Reconciliation reads the current session text back (a break that ends
/// only resets the indicator if it still shows the break).
pub struct StatusBoard {
    host: Arc<dyn Host>,
    texts: Mutex<HashMap<StatusItem, String>>,
}

impl StatusBoard {
    pub fn new(host: Arc<dyn Host>) -> Self {
        Self {
            host,
            texts: Mutex::new(HashMap::new()),
        }
    }

    pub fn host(&self) -> &dyn Host {
        self.host.as_ref()
    }

    /// Sets the text of `item`, forwarding only actual changes to the host.
    pub fn set(&self, item: StatusItem, text: impl Into<String>) {
        let text = text.into();
        let mut texts = self.texts.lock().unwrap_or_else(PoisonError::into_inner);
        if texts.get(&item) == Some(&text) {
            return;
        }
        self.host.set_status(item, &text);
        texts.insert(item, text);
    }

    /// Last text set on `item`, or an empty string.
    pub fn text(&self, item: StatusItem) -> String {
        self.texts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&item)
            .cloned()
            .unwrap_or_default()
    }

    pub fn notify(&self, notice: Notice) {
        self.host.notify(notice);
    }
}

impl fmt::Debug for StatusBoard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusBoard")
            .field("texts", &self.texts)
            .finish_non_exhaustive()
    }
}

/// Terminal host: status changes and notices are printed to stdout, and
/// lines typed on stdin are commands, notice choices, or answers to prompts.
///
/// A notice's actions are listed with numbers; typing one of those numbers
/// at the command prompt runs the action. A newer notice replaces the
/// pending actions of an older one.
#[derive(Debug)]
pub struct ConsoleHost {
    lines: AsyncMutex<mpsc::Receiver<String>>,
    visible: Mutex<HashMap<StatusItem, bool>>,
    pending_actions: Mutex<Vec<NoticeAction>>,
    /// Lines come from the controlling terminal, so echo can be switched off.
    terminal: bool,
}

impl ConsoleHost {
    /// Creates a host reading lines from `lines`.
    pub fn new(lines: mpsc::Receiver<String>) -> Self {
        Self {
            lines: AsyncMutex::new(lines),
            visible: Mutex::new(HashMap::new()),
            pending_actions: Mutex::new(Vec::new()),
            terminal: false,
        }
    }

    /// Creates a host fed by the process's stdin.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn from_stdin() -> Self {
        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            let mut reader = BufReader::new(tokio::io::stdin()).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                if tx.send(line).await.is_err() {
                    break;
                }
            }
            debug!("stdin closed");
        });
        Self {
            terminal: true,
            ..Self::new(rx)
        }
    }

    /// Waits for the next non-empty input line. `None` once input is closed.
    pub async fn next_line(&self) -> Option<String> {
        let mut lines = self.lines.lock().await;
        loop {
            let line = lines.recv().await?;
            let line = line.trim();
            if !line.is_empty() {
                return Some(line.to_string());
            }
        }
    }

    /// Turns a command-prompt line into a command.
    ///
    /// A bare number selects an action of the most recent notice.
    ///
    /// # Errors
    ///
    /// Returns a message when the line is neither a pending action nor a
    /// known command.
    pub fn interpret(&self, line: &str) -> Result<Option<Command>, String> {
        if let Ok(choice) = line.parse::<usize>() {
            let mut pending = self
                .pending_actions
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let Some(index) = choice.checked_sub(1).filter(|i| *i < pending.len()) else {
                return Err(format!("no notice action {choice}"));
            };
            let action = std::mem::take(&mut *pending).swap_remove(index);
            return Ok(action.command);
        }
        line.parse::<Command>().map(Some)
    }

    fn print(&self, text: &str) {
        let mut out = std::io::stdout().lock();
        // best effort: a closed stdout only loses display output
        let _ = writeln!(out, "{text}");
        let _ = out.flush();
    }

    fn is_visible(&self, item: StatusItem) -> bool {
        self.visible
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&item)
            .copied()
            .unwrap_or(true)
    }
}

#[async_trait]
impl Host for ConsoleHost {
    fn set_status(&self, item: StatusItem, text: &str) {
        if self.is_visible(item) {
            self.print(&format!("[{item}] {text}"));
        }
    }

    fn show_status_item(&self, item: StatusItem, visible: bool) {
        self.visible
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(item, visible);
    }

    fn notify(&self, notice: Notice) {
        let marker = match notice.level {
            NoticeLevel::Info => "(i)",
            NoticeLevel::Warning => "(!)",
        };
        self.print(&format!("{marker} {}", notice.message));
        if let Some(detail) = &notice.detail {
            self.print(&format!("    {detail}"));
        }
        for (index, action) in notice.actions.iter().enumerate() {
            self.print(&format!("    {}) {}", index + 1, action.label));
        }
        *self
            .pending_actions
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = notice.actions;
    }

    async fn pick(&self, items: Vec<PickItem>, placeholder: &str) -> Option<usize> {
        if items.is_empty() {
            return None;
        }
        self.print(placeholder);
        for (index, item) in items.iter().enumerate() {
            match &item.description {
                Some(description) => {
                    self.print(&format!("  {}) {}  {}", index + 1, item.label, description));
                }
                None => self.print(&format!("  {}) {}", index + 1, item.label)),
            }
        }
        self.print("  (number, or anything else to cancel)");

        let answer = self.next_line().await?;
        answer
            .parse::<usize>()
            .ok()
            .and_then(|choice| choice.checked_sub(1))
            .filter(|index| *index < items.len())
    }

    async fn input_box(&self, request: InputRequest) -> Option<String> {
        self.print(&request.prompt);
        self.print(&format!("  {}:", request.placeholder));
        let _echo = (request.password && self.terminal).then(echo::EchoOff::new);
        let answer = self.next_line().await?;
        (!answer.is_empty()).then_some(answer)
    }

    fn open_external(&self, url: &str) {
        self.print(&format!("open: {url}"));
    }

    fn run_in_terminal(&self, name: &str, command: &str) {
        self.print(&format!("[{name}] run: {command}"));
    }
}

/// Keeps terminal echo off while a secret is typed.
#[cfg(unix)]
mod echo {
    use std::io::IsTerminal;

    use tracing::debug;

    /// Restores the saved terminal settings on drop.
    pub(super) struct EchoOff {
        saved: Option<libc::termios>,
    }

    impl EchoOff {
        pub(super) fn new() -> Self {
            if !std::io::stdin().is_terminal() {
                return Self { saved: None };
            }
            // SAFETY: termios is plain data and is fully written by tcgetattr
            // before it is read; stdin is a terminal.
            let saved = unsafe {
                let mut saved: libc::termios = std::mem::zeroed();
                if libc::tcgetattr(libc::STDIN_FILENO, &mut saved) != 0 {
                    debug!("Could not read terminal settings");
                    return Self { saved: None };
                }
                let mut quiet = saved;
                quiet.c_lflag &= !libc::ECHO;
                quiet.c_lflag |= libc::ECHONL;
                if libc::tcsetattr(libc::STDIN_FILENO, libc::TCSANOW, &quiet) != 0 {
                    debug!("Could not turn off terminal echo");
                    return Self { saved: None };
                }
                saved
            };
            Self { saved: Some(saved) }
        }
    }

    impl Drop for EchoOff {
        fn drop(&mut self) {
            if let Some(saved) = &self.saved {
                // SAFETY: restores settings read from the same descriptor.
                unsafe {
                    libc::tcsetattr(libc::STDIN_FILENO, libc::TCSANOW, saved);
                }
            }
        }
    }
}

#[cfg(not(unix))]
mod echo {
    pub(super) struct EchoOff;

    impl EchoOff {
        pub(super) fn new() -> Self {
            Self
        }
    }
}
