//! Persisted application state.
//!
//! [`AppState`] replaces a string-keyed global store with one typed struct that
//! every component receives at construction. Each mutation is written through
//! to a JSON file (camelCase keys) so a restart resumes with the last observed
//! sessions, task list and user opt-outs.
//!
//! Writes are last-writer-wins; there are no transactions. A failed write is
//! logged and the in-memory value stays authoritative.
//!
//! # File format
//!
//! ```json
//! {
//!   "ongoingFlowMode": { "start": "2024-03-01T09:00:00Z" },
//!   "ongoingBreakMode": null,
//!   "todos": [],
//!   "calendarEvents": [],
//!   "startingFlowMode": false,
//!   "stoppingFlowMode": false,
//!   "doNotAskForApiToken": false,
//!   "doNotShowFlowModeNotifications": false
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::todo::TodoRecord;
use crate::types::{BreakSession, CalendarEvent, FlowSession};

/// Errors reading or writing the state file.
#[derive(Error, Debug)]
pub enum StateError {
    /// The state file could not be read or written.
    #[error("state file I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The state could not be encoded.
    #[error("state serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Everything the monitor remembers between polls and restarts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersistedState {
    /// `None` exactly when the user is not in a flow session as last observed.
    pub ongoing_flow_mode: Option<FlowSession>,
    /// `None` exactly when the user is not on a break as last observed.
    pub ongoing_break_mode: Option<BreakSession>,
    pub todos: Vec<TodoRecord>,
    pub calendar_events: Vec<CalendarEvent>,
    pub starting_flow_mode: bool,
    pub stopping_flow_mode: bool,
    pub do_not_ask_for_api_token: bool,
    pub do_not_show_flow_mode_notifications: bool,
}

/// Shared, write-through application state.
#[derive(Debug)]
pub struct AppState {
    inner: Mutex<PersistedState>,
    path: Option<PathBuf>,
}

impl AppState {
    /// Creates state that lives only in memory.
    #[must_use]
    pub fn in_memory(initial: PersistedState) -> Self {
        Self {
            inner: Mutex::new(initial),
            path: None,
        }
    }

    /// Loads state from `path`, starting empty when the file is missing or
    /// unreadable.
    ///
    /// The starting/stopping flags describe an in-flight call of a previous
    /// process and are cleared on load.
    #[must_use]
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut state = match read_state(&path) {
            Ok(Some(state)) => {
                info!(path = %path.display(), "Loaded persisted state");
                state
            }
            Ok(None) => {
                debug!(path = %path.display(), "No persisted state, starting fresh");
                PersistedState::default()
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring unreadable state file");
                PersistedState::default()
            }
        };
        state.starting_flow_mode = false;
        state.stopping_flow_mode = false;

        Self {
            inner: Mutex::new(state),
            path: Some(path),
        }
    }

    /// Path of the backing file, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Copy of the whole state.
    #[must_use]
    pub fn snapshot(&self) -> PersistedState {
        self.lock().clone()
    }

    pub fn flow_session(&self) -> Option<FlowSession> {
        self.lock().ongoing_flow_mode.clone()
    }

    pub fn set_flow_session(&self, session: Option<FlowSession>) {
        self.update(|state| state.ongoing_flow_mode = session);
    }

    pub fn break_session(&self) -> Option<BreakSession> {
        self.lock().ongoing_break_mode.clone()
    }

    pub fn set_break_session(&self, session: Option<BreakSession>) {
        self.update(|state| state.ongoing_break_mode = session);
    }

    pub fn todos(&self) -> Vec<TodoRecord> {
        self.lock().todos.clone()
    }

    pub fn set_todos(&self, todos: Vec<TodoRecord>) {
        self.update(|state| state.todos = todos);
    }

    pub fn calendar_events(&self) -> Vec<CalendarEvent> {
        self.lock().calendar_events.clone()
    }

    pub fn set_calendar_events(&self, events: Vec<CalendarEvent>) {
        self.update(|state| state.calendar_events = events);
    }

    pub fn is_starting_flow(&self) -> bool {
        self.lock().starting_flow_mode
    }

    pub fn set_starting_flow(&self, starting: bool) {
        self.update(|state| state.starting_flow_mode = starting);
    }

    pub fn is_stopping_flow(&self) -> bool {
        self.lock().stopping_flow_mode
    }

    pub fn set_stopping_flow(&self, stopping: bool) {
        self.update(|state| state.stopping_flow_mode = stopping);
    }

    /// `true` while either a start or a stop call is in flight.
    pub fn flow_transition_in_flight(&self) -> bool {
        let state = self.lock();
        state.starting_flow_mode || state.stopping_flow_mode
    }

    pub fn do_not_ask_for_api_token(&self) -> bool {
        self.lock().do_not_ask_for_api_token
    }

    pub fn set_do_not_ask_for_api_token(&self, value: bool) {
        self.update(|state| state.do_not_ask_for_api_token = value);
    }

    pub fn do_not_show_flow_mode_notifications(&self) -> bool {
        self.lock().do_not_show_flow_mode_notifications
    }

    pub fn set_do_not_show_flow_mode_notifications(&self, value: bool) {
        self.update(|state| state.do_not_show_flow_mode_notifications = value);
    }

    /// Applies `change` and writes the result through to disk.
    ///
    /// The write happens under the lock so concurrent updates cannot reorder
    /// on disk.
    fn update(&self, change: impl FnOnce(&mut PersistedState)) {
        let mut state = self.lock();
        change(&mut state);

        let Some(path) = &self.path else {
            return;
        };
        let result = serde_json::to_vec_pretty(&*state)
            .map_err(StateError::from)
            .and_then(|bytes| write_atomically(path, &bytes));
        if let Err(e) = result {
            warn!(error = %e, "Failed to persist state");
        }
    }

    fn lock(&self) -> MutexGuard<'_, PersistedState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn read_state(path: &Path) -> Result<Option<PersistedState>, StateError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(StateError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Writes through a sibling temp file and renames it into place.
fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), StateError> {
    let io_err = |source| StateError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, bytes).map_err(io_err)?;
    fs::rename(&tmp, path).map_err(io_err)
}
