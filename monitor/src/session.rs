//! Flow and break reconciliation.
//!
//! The CLI is the source of truth for sessions; this module decides, from a
//! polled [`Snapshot`] and the locally persisted session, whether the status
//! item changes and whether a notice fires.
//!
//! # Flow lifecycle
//!
//! ```text
//!  Off ──begin──▶ Starting ──adopt──▶ Running ──end──▶ Stopping ──release──▶ Off
//!   ▲                                    │
//!   └──────────── poll: Absent ──────────┘
//! ```
//!
//! `Starting`/`Stopping` are the persisted transition flags; `Running` is a
//! persisted [`FlowSession`]. Breaks have no transition states.
//!
//! # Client-only mode
//!
//! Without a token (and after the user opted out of being asked), flow
//! sessions are synthesized locally and the CLI is told about them with
//! `--client-only` signals. A session reported by the server always replaces
//! a synthesized one.
//!
//! A poll that cannot reach the backend yields [`Snapshot::Unavailable`] and
//! never changes state, so a client-only session survives polls that run
//! without a token.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Map;
use tracing::{debug, info};

use crate::cli::{CliBridge, CliCommand, CliReply};
use crate::host::{Notice, NoticeAction, StatusBoard, StatusItem};
use crate::shell::Command;
use crate::state::AppState;
use crate::token::TokenGate;
use crate::types::{BreakSession, FlowSession};
use crate::utils::relative_time::distance_to_now_strict;

pub const FLOW_OFF: &str = "Flow Mode: Off";
pub const FLOW_STARTING: &str = "Flow Mode: Starting...";
pub const FLOW_STOPPING: &str = "Flow Mode: Stopping...";
pub const FLOW_TOGGLING: &str = "Flow Mode: Toggling...";
pub const TASKS_HIDDEN_DURING_FLOW: &str = "End flow mode to see tasks and notifications";

/// Result of polling the backend for a session.
#[derive(Debug, Clone, PartialEq)]
pub enum Snapshot<T> {
    /// No token, a failed call, or undecodable output.
    Unavailable,
    /// The backend reports no active session.
    Absent,
    Present(T),
}

/// Maps a decoded payload to a snapshot. A payload that is present but does
/// not decode says nothing about the session, so it is `Unavailable`.
fn decoded<T>(payload: Result<Option<T>, serde_json::Error>) -> Snapshot<T> {
    match payload {
        Ok(Some(session)) => Snapshot::Present(session),
        Ok(None) => Snapshot::Absent,
        Err(_) => Snapshot::Unavailable,
    }
}

/// Drives the flow/break status item from CLI state.
#[derive(Debug)]
pub struct SessionReconciler {
    bridge: Arc<CliBridge>,
    state: Arc<AppState>,
    gate: Arc<TokenGate>,
    board: Arc<StatusBoard>,
    suppress_client_only_during_transition: bool,
}

impl SessionReconciler {
    pub fn new(
        bridge: Arc<CliBridge>,
        state: Arc<AppState>,
        gate: Arc<TokenGate>,
        board: Arc<StatusBoard>,
        suppress_client_only_during_transition: bool,
    ) -> Self {
        Self {
            bridge,
            state,
            gate,
            board,
            suppress_client_only_during_transition,
        }
    }

    /// Asks the backend for the ongoing flow session.
    pub async fn fetch_flow(&self) -> Snapshot<FlowSession> {
        if !self.gate.is_available().await {
            return Snapshot::Unavailable;
        }
        match self.bridge.fetch(CliCommand::OngoingFlow).await {
            Some(CliReply::Data(response)) => match response.get("data") {
                Some(payload) => decoded(FlowSession::from_payload(payload)),
                None => Snapshot::Absent,
            },
            Some(CliReply::Empty) => Snapshot::Absent,
            _ => Snapshot::Unavailable,
        }
    }

    /// Asks the backend for the ongoing break.
    pub async fn fetch_break(&self) -> Snapshot<BreakSession> {
        if !self.gate.is_available().await {
            return Snapshot::Unavailable;
        }
        match self.bridge.fetch(CliCommand::OngoingBreak).await {
            Some(CliReply::Data(response)) => decoded(BreakSession::from_payload(&response)),
            Some(CliReply::Empty) => Snapshot::Absent,
            _ => Snapshot::Unavailable,
        }
    }

    /// Starts a flow session. No-op while one is running locally.
    pub async fn begin_flow(&self) {
        if self.state.flow_session().is_some() {
            return;
        }
        self.gate.warn_if_missing().await;
        let token = self.gate.is_available().await;

        self.board.set(StatusItem::Session, FLOW_STARTING);
        self.state.set_starting_flow(true);

        if token {
            match self
                .bridge
                .invoke(CliCommand::StartFlow { client_only: false })
                .await
            {
                Ok(CliReply::AuthUnavailable) => self.adopt_flow(None, true).await,
                Ok(CliReply::Data(response)) => {
                    let session = response
                        .get("data")
                        .and_then(|payload| FlowSession::from_payload(payload).ok().flatten());
                    self.adopt_flow(session, false).await;
                }
                Ok(_) | Err(_) => self.board.set(StatusItem::Session, FLOW_OFF),
            }
        } else if self.state.do_not_ask_for_api_token() {
            self.adopt_flow(None, true).await;
        } else {
            self.board.set(StatusItem::Session, FLOW_OFF);
        }

        self.state.set_starting_flow(false);
    }

    /// Ends the running flow session. No-op when none is running locally.
    pub async fn end_flow(&self) {
        if self.state.flow_session().is_none() {
            return;
        }
        self.gate.warn_if_missing().await;
        let token = self.gate.is_available().await;

        self.board.set(StatusItem::Session, FLOW_STOPPING);
        self.state.set_stopping_flow(true);

        if token {
            match self
                .bridge
                .invoke(CliCommand::StopFlow { client_only: false })
                .await
            {
                Ok(CliReply::AuthUnavailable) => self.release_flow(true).await,
                Ok(_) => self.release_flow(false).await,
                Err(_) => self.restore_display(),
            }
        } else if self.state.do_not_ask_for_api_token() {
            self.release_flow(true).await;
        } else {
            self.restore_display();
        }

        self.state.set_stopping_flow(false);
    }

    /// Reconciles local flow state with the backend.
    pub async fn poll_flow(&self) {
        match self.fetch_flow().await {
            Snapshot::Unavailable => {}
            Snapshot::Present(session) => match self.state.flow_session() {
                Some(saved) if !self.state.flow_transition_in_flight() => {
                    if saved.client_only && !session.client_only {
                        debug!("Replacing local flow session with server session");
                        self.state.set_flow_session(Some(session));
                    }
                    self.refresh_elapsed();
                }
                _ => self.adopt_flow(Some(session), true).await,
            },
            Snapshot::Absent => {
                if self.state.flow_session().is_some() {
                    self.release_flow(true).await;
                }
            }
        }
    }

    /// Reconciles local break state with the backend.
    pub async fn poll_break(&self) {
        match self.fetch_break().await {
            Snapshot::Unavailable => {}
            Snapshot::Present(session) => {
                if self.state.break_session().is_some() {
                    self.refresh_elapsed();
                } else {
                    self.adopt_break(Some(session));
                }
            }
            Snapshot::Absent => {
                if self.state.break_session().is_some() {
                    self.release_break();
                }
            }
        }
    }

    /// Starts or ends flow depending on what the backend reports.
    ///
    /// Falls back to local state when the backend cannot be asked.
    pub async fn toggle_flow(&self) {
        self.board.set(StatusItem::Session, FLOW_TOGGLING);

        let running = match self.fetch_flow().await {
            Snapshot::Present(_) => true,
            Snapshot::Absent => false,
            Snapshot::Unavailable => self.state.flow_session().is_some(),
        };
        let local = self.state.flow_session().is_some();

        match (running, local) {
            (true, true) => self.end_flow().await,
            (false, false) => self.begin_flow().await,
            // Local state disagrees with the server; the next poll reconciles it.
            _ => self.restore_display(),
        }
    }

    /// Starts a break, optionally tagged with `reason`.
    pub async fn start_break(&self, reason: Option<&str>) {
        self.gate.warn_if_missing().await;
        if !self.gate.is_available().await {
            debug!("Not starting break without API token");
            return;
        }

        self.board.set(StatusItem::Session, "Starting Break...");
        let command = CliCommand::StartBreak {
            reason: reason.map(str::to_string),
        };
        match self.bridge.invoke(command).await {
            Err(_) => self.board.set(StatusItem::Session, "Error when starting break"),
            Ok(CliReply::AuthUnavailable) => self
                .board
                .set(StatusItem::Session, "Cannot start break without API token"),
            Ok(CliReply::Data(response)) => {
                info!(reason = reason.unwrap_or("none"), "Break started");
                self.adopt_break(BreakSession::from_payload(&response).ok().flatten());
            }
            Ok(_) => self.adopt_break(None),
        }
    }

    /// Stops the current break.
    pub async fn stop_break(&self) {
        self.gate.warn_if_missing().await;
        if !self.gate.is_available().await {
            debug!("Not stopping break without API token");
            return;
        }

        self.board.set(StatusItem::Session, "Stopping Break...");
        match self.bridge.invoke(CliCommand::StopBreak).await {
            Err(_) => self.board.set(StatusItem::Session, "Error when stopping break"),
            Ok(CliReply::AuthUnavailable) => self
                .board
                .set(StatusItem::Session, "Cannot stop break without API token"),
            Ok(_) => {
                info!("Break stopped");
                self.release_break();
            }
        }
    }

    /// Stops the break if one is running, otherwise toggles flow.
    pub async fn click_status_bar(&self) {
        if self.state.break_session().is_some() {
            self.stop_break().await;
        } else {
            self.toggle_flow().await;
        }
    }

    /// Shows the elapsed time of the running flow session or break.
    ///
    /// Returns `false` (and leaves the text alone) when neither is running.
    pub fn refresh_elapsed(&self) -> bool {
        let now = Utc::now();
        if let Some(flow) = self.state.flow_session() {
            self.board.set(
                StatusItem::Session,
                format!("Flow Mode: {}", distance_to_now_strict(flow.start, now)),
            );
            true
        } else if let Some(on_break) = self.state.break_session() {
            self.board.set(
                StatusItem::Session,
                format!("On Break: {}", distance_to_now_strict(on_break.start, now)),
            );
            true
        } else {
            false
        }
    }

    /// Stops showing flow-mode notices.
    pub fn mute_notifications(&self) {
        self.state.set_do_not_show_flow_mode_notifications(true);
    }

    fn restore_display(&self) {
        if !self.refresh_elapsed() {
            self.board.set(StatusItem::Session, FLOW_OFF);
        }
    }

    fn client_only_allowed(&self, opposite_in_flight: bool) -> bool {
        !(self.suppress_client_only_during_transition && opposite_in_flight)
    }

    async fn adopt_flow(&self, session: Option<FlowSession>, client_only: bool) {
        if client_only && self.client_only_allowed(self.state.is_stopping_flow()) {
            self.bridge
                .fetch(CliCommand::StartFlow { client_only: true })
                .await;
        }

        let session = session.unwrap_or_else(|| FlowSession::synthesized(Utc::now()));
        info!(start = %session.start, client_only = session.client_only, "Flow mode running");
        self.notify_flow_running();
        self.state.set_flow_session(Some(session));
        self.refresh_elapsed();
        self.board.set(StatusItem::Tasks, TASKS_HIDDEN_DURING_FLOW);
    }

    async fn release_flow(&self, client_only: bool) {
        if client_only && self.client_only_allowed(self.state.is_starting_flow()) {
            self.bridge
                .fetch(CliCommand::StopFlow { client_only: true })
                .await;
        }

        info!("Flow mode ended");
        self.notify_flow_ended();
        self.state.set_flow_session(None);
        self.board.set(StatusItem::Session, FLOW_OFF);
    }

    fn adopt_break(&self, session: Option<BreakSession>) {
        let session = session.unwrap_or_else(|| BreakSession {
            start: Utc::now(),
            reason: None,
            extra: Map::new(),
        });
        self.state.set_break_session(Some(session));
        self.refresh_elapsed();
    }

    fn release_break(&self) {
        self.state.set_break_session(None);
        if self.board.text(StatusItem::Session).contains("Break") {
            self.board.set(StatusItem::Session, FLOW_OFF);
            self.refresh_elapsed();
        }
    }

    fn notify_flow_running(&self) {
        if self.state.do_not_show_flow_mode_notifications() {
            return;
        }
        self.board.notify(
            Notice::info("Flow Mode running")
                .with_action(NoticeAction::new("Stop", Command::StopFlow))
                .with_action(NoticeAction::new(
                    "Don't show again",
                    Command::MuteFlowNotifications,
                )),
        );
    }

    fn notify_flow_ended(&self) {
        if self.state.do_not_show_flow_mode_notifications() {
            return;
        }
        self.board.notify(
            Notice::info("Flow Mode ended").with_action(NoticeAction::new(
                "Don't show again",
                Command::MuteFlowNotifications,
            )),
        );
    }
}
