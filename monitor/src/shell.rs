//! Commands, startup, and the polling schedule.
//!
//! [`Shell`] wires the components together. It owns the command dispatch
//! (everything a user or a notice action can trigger), the startup check, the
//! task and calendar refresh jobs, and the periodic [`Schedule`].
//!
//! # Schedule
//!
//! | Job | Period (default) |
//! |-----|------------------|
//! | flow poll | 10 s |
//! | break poll | 10 s |
//! | elapsed-time refresh | 60 s |
//! | task refresh | 10 s |
//! | calendar refresh | 10 s |
//! | heartbeat flush | 30 s |
//!
//! Each job runs on its own Tokio task and owns an [`InFlight`] guard: when a
//! tick fires while the previous run of the same job is still waiting on the
//! CLI, the tick is skipped. Different jobs run concurrently.

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::calendar;
use crate::cli::{CliBridge, CliCommand, CliError, CliReply};
use crate::config::{Config, Intervals, Visibility};
use crate::heartbeat::HeartbeatAggregator;
use crate::host::{Host, Notice, NoticeAction, PickItem, StatusBoard, StatusItem};
use crate::session::{SessionReconciler, FLOW_OFF};
use crate::state::AppState;
use crate::todo::{self, TodoAction, TodoRecord};
use crate::token::TokenGate;
use crate::types::{BreakReason, CalendarEvent};
use crate::utils::InFlight;

pub const LOADING_TASKS: &str = "Loading tasks...";
pub const LOADING_EVENTS: &str = "Loading events...";

/// Everything a user (or a notice action) can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    ToggleFlow,
    StopFlow,
    StartBreak(Option<BreakReason>),
    StopBreak,
    ListTasks,
    ListEvents,
    ClickStatusBar,
    SetToken,
    DontAskForToken,
    MuteFlowNotifications,
    InstallCli,
}

impl Command {
    /// Names accepted by [`FromStr`], for help output.
    pub const NAMES: [&'static str; 11] = [
        "toggle-flow",
        "stop-flow",
        "start-break [lunch|coffee|tea|beverage|walk]",
        "stop-break",
        "list-tasks",
        "list-events",
        "click",
        "set-token",
        "dont-ask-for-token",
        "mute-flow-notifications",
        "install-cli",
    ];
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ToggleFlow => f.write_str("toggle-flow"),
            Self::StopFlow => f.write_str("stop-flow"),
            Self::StartBreak(None) => f.write_str("start-break"),
            Self::StartBreak(Some(reason)) => write!(f, "start-break {reason}"),
            Self::StopBreak => f.write_str("stop-break"),
            Self::ListTasks => f.write_str("list-tasks"),
            Self::ListEvents => f.write_str("list-events"),
            Self::ClickStatusBar => f.write_str("click"),
            Self::SetToken => f.write_str("set-token"),
            Self::DontAskForToken => f.write_str("dont-ask-for-token"),
            Self::MuteFlowNotifications => f.write_str("mute-flow-notifications"),
            Self::InstallCli => f.write_str("install-cli"),
        }
    }
}

impl FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut words = s.split_whitespace();
        let name = words.next().unwrap_or_default().to_ascii_lowercase();
        let argument = words.next();

        let command = match name.as_str() {
            "toggle-flow" | "toggle" => Self::ToggleFlow,
            "stop-flow" => Self::StopFlow,
            "start-break" | "break" => {
                Self::StartBreak(argument.map(str::parse::<BreakReason>).transpose()?)
            }
            "lunch" | "coffee" | "tea" | "beverage" | "walk" => {
                Self::StartBreak(Some(name.parse::<BreakReason>()?))
            }
            "stop-break" => Self::StopBreak,
            "list-tasks" | "tasks" => Self::ListTasks,
            "list-events" | "events" => Self::ListEvents,
            "click" | "click-status-bar" => Self::ClickStatusBar,
            "set-token" => Self::SetToken,
            "dont-ask-for-token" | "stop-asking-for-token" => Self::DontAskForToken,
            "mute-flow-notifications" => Self::MuteFlowNotifications,
            "install-cli" => Self::InstallCli,
            _ => return Err(format!("unknown command '{}'", s.trim())),
        };
        Ok(command)
    }
}

/// The running companion: components plus command dispatch.
#[derive(Debug)]
pub struct Shell {
    bridge: Arc<CliBridge>,
    state: Arc<AppState>,
    board: Arc<StatusBoard>,
    gate: Arc<TokenGate>,
    sessions: Arc<SessionReconciler>,
    heartbeats: Arc<HeartbeatAggregator>,
    visibility: Visibility,
    intervals: Intervals,
    install_command: String,
}

impl Shell {
    /// Assembles the components around `bridge`, `state` and `host`.
    pub fn new(config: &Config, bridge: CliBridge, state: AppState, host: Arc<dyn Host>) -> Self {
        let bridge = Arc::new(bridge);
        let state = Arc::new(state);
        let board = Arc::new(StatusBoard::new(host));
        let gate = Arc::new(TokenGate::new(
            Arc::clone(&bridge),
            Arc::clone(&state),
            Arc::clone(&board),
        ));
        let sessions = Arc::new(SessionReconciler::new(
            Arc::clone(&bridge),
            Arc::clone(&state),
            Arc::clone(&gate),
            Arc::clone(&board),
            config.suppress_client_only_during_transition,
        ));

        Self {
            bridge,
            state,
            board,
            gate,
            sessions,
            heartbeats: Arc::new(HeartbeatAggregator::new()),
            visibility: config.visibility,
            intervals: config.intervals,
            install_command: config.install_command.clone(),
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn board(&self) -> &StatusBoard {
        &self.board
    }

    pub fn sessions(&self) -> &SessionReconciler {
        &self.sessions
    }

    pub fn gate(&self) -> &TokenGate {
        &self.gate
    }

    pub fn heartbeats(&self) -> &Arc<HeartbeatAggregator> {
        &self.heartbeats
    }

    /// Probes the CLI, sets the initial status texts and reconciles flow once.
    pub async fn startup(&self) {
        let installed = match self.bridge.invoke(CliCommand::Help).await {
            Ok(_) => true,
            Err(CliError::Spawn { .. }) => false,
            // Exit 0 with chatter on stderr still means the CLI is there
            Err(CliError::Exec { code, .. }) => code == Some(0),
            Err(CliError::Decode { .. }) => true,
        };
        if !installed {
            warn!(program = self.bridge.program(), "makerflow CLI not found");
            self.board.notify(
                Notice::info("makerflow CLI is not installed.")
                    .modal()
                    .with_action(NoticeAction::new("Install now", Command::InstallCli))
                    .with_action(NoticeAction::dismiss("Later")),
            );
        }

        let host = self.board.host();
        host.show_status_item(StatusItem::Session, self.visibility.status);
        host.show_status_item(StatusItem::Tasks, self.visibility.tasks);
        host.show_status_item(StatusItem::Calendar, self.visibility.calendar);

        self.board.set(StatusItem::Session, FLOW_OFF);
        self.board.set(StatusItem::Tasks, LOADING_TASKS);
        self.board.set(StatusItem::Calendar, LOADING_EVENTS);

        self.sessions.poll_flow().await;
    }

    /// Runs `command` unless `cancel` completes first, as it does when a
    /// shutdown arrives while a prompt is waiting for input.
    ///
    /// Returns `false` when the command was cut short.
    pub async fn dispatch_until<F: Future>(&self, command: Command, cancel: F) -> bool {
        tokio::select! {
            () = self.dispatch(command) => true,
            _ = cancel => {
                debug!("Command interrupted");
                false
            }
        }
    }

    /// Runs one command to completion. Every command counts as activity.
    pub async fn dispatch(&self, command: Command) {
        debug!(%command, "Dispatching command");
        self.heartbeats.record();
        match command {
            Command::ToggleFlow => self.sessions.toggle_flow().await,
            Command::StopFlow => self.sessions.end_flow().await,
            Command::StartBreak(reason) => {
                self.sessions
                    .start_break(reason.map(BreakReason::as_str))
                    .await;
            }
            Command::StopBreak => self.sessions.stop_break().await,
            Command::ListTasks => self.list_tasks().await,
            Command::ListEvents => self.list_events().await,
            Command::ClickStatusBar => self.sessions.click_status_bar().await,
            Command::SetToken => self.gate.prompt_for_token().await,
            Command::DontAskForToken => self.gate.stop_asking(),
            Command::MuteFlowNotifications => self.sessions.mute_notifications(),
            Command::InstallCli => self.install_cli(),
        }
    }

    /// Reports any batched activity now instead of waiting for the next flush.
    pub async fn flush_activity(&self) {
        self.heartbeats.flush(&self.bridge, &self.gate).await;
    }

    /// Runs the install command in a host terminal.
    pub fn install_cli(&self) {
        info!(command = %self.install_command, "Installing CLI");
        self.board
            .host()
            .run_in_terminal("makerflow", &self.install_command);
    }

    /// Refreshes the task list and the tasks status item.
    pub async fn fetch_tasks(&self) {
        if !self.gate.is_available().await {
            return;
        }
        let records = match self.bridge.fetch(CliCommand::ListTasks).await {
            Some(CliReply::Data(Value::Array(items))) => decode_records(items),
            Some(CliReply::Empty) => Vec::new(),
            Some(other) => {
                debug!(reply = ?other, "Unexpected task list reply");
                return;
            }
            None => return,
        };

        let views: Vec<_> = todo::enrich_all(&records, Utc::now())
            .into_iter()
            .map(|(_, view)| view)
            .collect();
        debug!(records = records.len(), shown = views.len(), "Fetched tasks");
        self.state.set_todos(records);

        if self.state.flow_session().is_none() {
            self.board.set(StatusItem::Tasks, todo::summarize(&views));
        }
    }

    /// Refreshes the calendar events and the calendar status item.
    pub async fn fetch_events(&self) {
        if !self.gate.is_available().await {
            return;
        }
        let events = match self.bridge.fetch(CliCommand::ListEvents).await {
            Some(CliReply::Data(mut response)) => match response.get_mut("events").map(Value::take) {
                Some(Value::Array(items)) => decode_records::<CalendarEvent>(items),
                _ => Vec::new(),
            },
            Some(CliReply::Empty) => Vec::new(),
            Some(other) => {
                debug!(reply = ?other, "Unexpected event list reply");
                return;
            }
            None => return,
        };

        self.board.set(
            StatusItem::Calendar,
            calendar::summarize(&events, Utc::now()),
        );
        self.state.set_calendar_events(events);
    }

    /// Lets the user pick a task and act on it.
    pub async fn list_tasks(&self) {
        let records = self.state.todos();
        let views = todo::enrich_all(&records, Utc::now());
        if views.is_empty() {
            return;
        }

        let host = self.board.host();
        let items = views
            .iter()
            .map(|(_, view)| PickItem::new(&view.description, view.source_description.clone()))
            .collect();
        let Some(choice) = host.pick(items, "Select a task").await else {
            return;
        };
        let (index, view) = &views[choice];

        let actions = todo::actions_for(view);
        let items = actions
            .iter()
            .map(|action| PickItem::new(action.label(), Some(action.detail(view.source))))
            .collect();
        let Some(action) = host
            .pick(items, &todo::action_prompt(view))
            .await
            .map(|i| actions[i])
        else {
            return;
        };

        match action {
            TodoAction::MarkDone => self.mark_done(&records[*index]).await,
            TodoAction::Open => open_link(host, view.link.as_deref()),
            TodoAction::OpenInBrowser => open_link(host, view.browser_link.as_deref()),
        }
    }

    /// Lets the user pick a calendar event and opens its video link.
    pub async fn list_events(&self) {
        let events = self.state.calendar_events();
        if events.is_empty() {
            return;
        }

        let now = Utc::now();
        let items = events
            .iter()
            .map(|event| PickItem::new(&event.summary, Some(calendar::pick_description(event, now))))
            .collect();
        let host = self.board.host();
        if let Some(choice) = host.pick(items, "Select an event").await {
            let link = calendar::video_link(&events[choice]);
            open_link(host, (!link.is_empty()).then_some(link));
        }
    }

    /// Sends `record` back to the CLI as done and drops it locally.
    async fn mark_done(&self, record: &TodoRecord) {
        if !self.gate.is_available().await {
            return;
        }
        let payload = match serde_json::to_value(record) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Failed to encode todo");
                return;
            }
        };
        if self
            .bridge
            .fetch(CliCommand::MarkTodoDone(payload))
            .await
            .is_some()
        {
            info!(kind = %record.kind, "Marked todo as done");
            let remaining: Vec<TodoRecord> = self
                .state
                .todos()
                .into_iter()
                .filter(|other| other != record)
                .collect();
            self.state.set_todos(remaining);
        }
    }

    /// Starts every periodic job.
    ///
    /// Must be called inside a Tokio runtime. The jobs stop when the returned
    /// [`Schedule`] is shut down or dropped.
    pub fn start_schedule(self: &Arc<Self>) -> Schedule {
        let Intervals {
            poll,
            elapsed,
            heartbeat,
        } = self.intervals;

        let handles = vec![
            self.every("flow", poll, |shell| async move { shell.sessions.poll_flow().await }),
            self.every("break", poll, |shell| async move { shell.sessions.poll_break().await }),
            self.every("elapsed", elapsed, |shell| async move {
                shell.sessions.refresh_elapsed();
            }),
            self.every("tasks", poll, |shell| async move { shell.fetch_tasks().await }),
            self.every("calendar", poll, |shell| async move { shell.fetch_events().await }),
            self.every("heartbeat", heartbeat, |shell| async move {
                shell.heartbeats.flush(&shell.bridge, &shell.gate).await;
            }),
        ];
        info!(jobs = handles.len(), poll_secs = poll.as_secs(), "Schedule started");
        Schedule { handles }
    }

    /// Spawns a job that runs `job` every `period`, skipping ticks while the
    /// previous run is in flight.
    fn every<F, Fut>(self: &Arc<Self>, kind: &'static str, period: Duration, job: F) -> JoinHandle<()>
    where
        F: Fn(Arc<Self>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let shell = Arc::clone(self);
        let guard = Arc::new(InFlight::new());
        let job = Arc::new(job);

        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // the first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if guard.is_busy() {
                    debug!(kind, "Previous run still in flight, skipping tick");
                    continue;
                }

                let (shell, guard, job) = (Arc::clone(&shell), Arc::clone(&guard), Arc::clone(&job));
                tokio::spawn(async move {
                    let Some(_permit) = guard.try_enter() else {
                        return;
                    };
                    (*job)(shell).await;
                });
            }
        })
    }
}

/// Handles of the running periodic jobs.
#[derive(Debug)]
pub struct Schedule {
    handles: Vec<JoinHandle<()>>,
}

impl Schedule {
    /// Stops scheduling further ticks. Runs already in flight finish on their own.
    pub fn shutdown(mut self) {
        self.abort_all();
    }

    fn abort_all(&mut self) {
        for handle in self.handles.drain(..) {
            handle.abort();
        }
    }
}

impl Drop for Schedule {
    fn drop(&mut self) {
        self.abort_all();
    }
}

fn decode_records<T: serde::de::DeserializeOwned>(items: Vec<Value>) -> Vec<T> {
    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value(item) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(error = %e, "Skipping record with unexpected shape");
                None
            }
        })
        .collect()
}

fn open_link(host: &dyn Host, link: Option<&str>) {
    match link {
        Some(link) if !link.is_empty() => host.open_external(link),
        _ => debug!("Nothing to open"),
    }
}
