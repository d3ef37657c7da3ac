//! Integration tests for startup, command dispatch, task and calendar refresh,
//! activity reports and the polling schedule.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use flowbar_monitor::cli::RawOutput;
use flowbar_monitor::config::Intervals;
use flowbar_monitor::host::StatusItem;
use flowbar_monitor::session::TASKS_HIDDEN_DURING_FLOW;
use flowbar_monitor::shell::{Command, LOADING_EVENTS, LOADING_TASKS};
use flowbar_monitor::state::PersistedState;
use flowbar_monitor::todo::TodoRecord;
use flowbar_monitor::types::FlowSession;
use serde_json::json;

use common::{shell, shell_with, test_config, RecordingHost, ScriptedRunner};

// =============================================================================
// Test Helpers
// =============================================================================

fn github_todo() -> serde_json::Value {
    json!({
        "type": "github",
        "pr": {
            "repository_uuid": "r1",
            "pullrequest_id": 42,
            "pullrequest_title": "Fix bug",
            "link": "https://github.com/acme/repo/pull/42",
            "repository_name": "repo"
        },
        "meta": {"comments": 3, "approvals": 1}
    })
}

fn with_todos(todos: Vec<TodoRecord>) -> PersistedState {
    PersistedState {
        todos,
        ..PersistedState::default()
    }
}

// =============================================================================
// Startup
// =============================================================================

#[tokio::test]
async fn startup_offers_install_when_cli_is_missing() {
    let runner = ScriptedRunner::without_token();
    let host = RecordingHost::new();
    let shell = shell(&runner, &host);

    // "help" is unscripted and fails like a missing executable would
    shell.startup().await;

    let notices = host.notices.lock().unwrap().clone();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].message, "makerflow CLI is not installed.");
    assert!(notices[0].modal);
    assert_eq!(notices[0].actions[0].label, "Install now");
    assert_eq!(notices[0].actions[0].command, Some(Command::InstallCli));
    assert_eq!(notices[0].actions[1].command, None);

    assert_eq!(host.texts(StatusItem::Tasks), vec![LOADING_TASKS]);
    assert_eq!(host.texts(StatusItem::Calendar), vec![LOADING_EVENTS]);
    assert_eq!(host.visibility.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn startup_offers_install_when_cli_cannot_be_spawned() {
    let runner = ScriptedRunner::not_installed();
    let host = RecordingHost::new();
    let shell = shell(&runner, &host);

    shell.startup().await;

    assert_eq!(
        host.notice_messages(),
        vec!["makerflow CLI is not installed."]
    );
}

#[tokio::test]
async fn startup_ignores_stderr_when_help_exits_cleanly() {
    let runner = ScriptedRunner::without_token();
    runner.respond(
        "help",
        RawOutput {
            code: Some(0),
            stdout: "Usage: makerflow [options]".to_string(),
            stderr: "(node:4242) DeprecationWarning: punycode is deprecated".to_string(),
        },
    );
    let host = RecordingHost::new();
    let shell = shell(&runner, &host);

    shell.startup().await;

    assert!(host.notices.lock().unwrap().is_empty());
    assert_eq!(host.texts(StatusItem::Tasks), vec![LOADING_TASKS]);
}

#[tokio::test]
async fn startup_offers_install_when_help_exits_nonzero() {
    let runner = ScriptedRunner::without_token();
    runner.respond("help", RawOutput::failed(127, "makerflow: command not found"));
    let host = RecordingHost::new();
    let shell = shell(&runner, &host);

    shell.startup().await;

    assert_eq!(
        host.notice_messages(),
        vec!["makerflow CLI is not installed."]
    );
}

#[tokio::test]
async fn startup_with_cli_present_shows_no_notice() {
    let runner = ScriptedRunner::without_token();
    runner.respond("help", RawOutput::ok("Usage: makerflow [options]"));
    let host = RecordingHost::new();
    let mut config = test_config();
    config.visibility.calendar = false;
    let shell = shell_with(&config, &runner, &host, PersistedState::default());

    shell.startup().await;

    assert!(host.notices.lock().unwrap().is_empty());
    assert_eq!(
        host.visibility.lock().unwrap().get(&StatusItem::Calendar),
        Some(&false)
    );
}

#[tokio::test]
async fn install_command_runs_in_terminal() {
    let runner = ScriptedRunner::new();
    let host = RecordingHost::new();
    let shell = shell(&runner, &host);

    shell.dispatch(Command::InstallCli).await;

    assert_eq!(
        host.terminals.lock().unwrap().as_slice(),
        &[("makerflow".to_string(), "npm install -g makerflow".to_string())]
    );
}

// =============================================================================
// Tasks
// =============================================================================

#[tokio::test]
async fn fetch_tasks_skips_malformed_records() {
    let runner = ScriptedRunner::with_token();
    let body = json!([github_todo(), {"type": "slack_channel", "events": "nope"}]);
    runner.respond_json("tasks todo --json", &body.to_string());
    let host = RecordingHost::new();
    let shell = shell(&runner, &host);

    shell.fetch_tasks().await;

    assert_eq!(shell.state().todos().len(), 1);
    assert_eq!(
        host.last_text(StatusItem::Tasks).as_deref(),
        Some("1 new task - Github: 1")
    );
}

#[tokio::test]
async fn fetch_tasks_with_empty_reply() {
    let runner = ScriptedRunner::with_token();
    runner.respond_json("tasks todo --json", "");
    let host = RecordingHost::new();
    let shell = shell(&runner, &host);

    shell.fetch_tasks().await;

    assert!(shell.state().todos().is_empty());
    assert_eq!(host.last_text(StatusItem::Tasks).as_deref(), Some("No new tasks"));
}

#[tokio::test]
async fn fetch_tasks_leaves_flow_text_alone() {
    let runner = ScriptedRunner::with_token();
    runner.respond_json("tasks todo --json", &json!([github_todo()]).to_string());
    let host = RecordingHost::new();
    let state = PersistedState {
        ongoing_flow_mode: Some(FlowSession::synthesized(Utc::now())),
        ..PersistedState::default()
    };
    let shell = shell_with(&test_config(), &runner, &host, state);
    shell.board().set(StatusItem::Tasks, TASKS_HIDDEN_DURING_FLOW);

    shell.fetch_tasks().await;

    assert_eq!(shell.state().todos().len(), 1);
    assert_eq!(
        host.last_text(StatusItem::Tasks).as_deref(),
        Some(TASKS_HIDDEN_DURING_FLOW)
    );
}

#[tokio::test]
async fn fetch_tasks_without_token_keeps_previous_list() {
    let runner = ScriptedRunner::without_token();
    let host = RecordingHost::new();
    let todo: TodoRecord = serde_json::from_value(github_todo()).unwrap();
    let shell = shell_with(&test_config(), &runner, &host, with_todos(vec![todo]));

    shell.fetch_tasks().await;

    assert_eq!(shell.state().todos().len(), 1);
    assert!(runner.calls_starting_with("tasks").is_empty());
}

#[tokio::test]
async fn picked_task_can_be_marked_done() {
    let runner = ScriptedRunner::with_token();
    runner.respond("todo done", RawOutput::ok("{}"));
    let host = RecordingHost::new();
    let todo: TodoRecord = serde_json::from_value(github_todo()).unwrap();
    let shell = shell_with(&test_config(), &runner, &host, with_todos(vec![todo]));
    host.answer_picks([Some(0), Some(0)]);

    shell.dispatch(Command::ListTasks).await;

    let menus = host.pick_menus.lock().unwrap().clone();
    assert_eq!(menus[0][0].label, "PR #42: Fix bug");
    assert_eq!(menus[1][0].label, "Mark as done");

    let done_calls = runner.calls_starting_with("todo done");
    assert_eq!(done_calls.len(), 1);
    assert!(done_calls[0].contains(r#""pullrequest_id":42"#));
    assert!(shell.state().todos().is_empty());
}

#[tokio::test]
async fn picked_pull_request_opens_in_browser() {
    let runner = ScriptedRunner::with_token();
    let host = RecordingHost::new();
    let todo: TodoRecord = serde_json::from_value(github_todo()).unwrap();
    let shell = shell_with(&test_config(), &runner, &host, with_todos(vec![todo]));
    host.answer_picks([Some(0), Some(1)]);

    shell.list_tasks().await;

    assert_eq!(
        host.opened.lock().unwrap().as_slice(),
        &["https://github.com/acme/repo/pull/42".to_string()]
    );
    assert_eq!(shell.state().todos().len(), 1);
}

#[tokio::test]
async fn dismissed_task_menu_does_nothing() {
    let runner = ScriptedRunner::with_token();
    let host = RecordingHost::new();
    let todo: TodoRecord = serde_json::from_value(github_todo()).unwrap();
    let shell = shell_with(&test_config(), &runner, &host, with_todos(vec![todo]));
    host.answer_picks([None]);

    shell.list_tasks().await;

    assert_eq!(host.pick_menus.lock().unwrap().len(), 1);
    assert!(runner.calls().is_empty());
}

// =============================================================================
// Calendar
// =============================================================================

fn upcoming_event() -> serde_json::Value {
    let start = Utc::now() + chrono::Duration::minutes(30);
    json!({
        "summary": "Standup",
        "start": start.to_rfc3339(),
        "end": (start + chrono::Duration::minutes(15)).to_rfc3339(),
        "conference": {
            "entryPoints": [
                {"entryPointType": "phone", "uri": "tel:+100"},
                {"entryPointType": "video", "uri": "https://meet.example.com/abc"}
            ]
        }
    })
}

#[tokio::test]
async fn fetch_events_summarizes_by_phase() {
    let runner = ScriptedRunner::with_token();
    runner.respond_json(
        "events list --json",
        &json!({"events": [upcoming_event()]}).to_string(),
    );
    let host = RecordingHost::new();
    let shell = shell(&runner, &host);

    shell.fetch_events().await;

    assert_eq!(shell.state().calendar_events().len(), 1);
    assert_eq!(
        host.last_text(StatusItem::Calendar).as_deref(),
        Some("Calendar - Upcoming: 1")
    );
}

#[tokio::test]
async fn fetch_events_without_events_field() {
    let runner = ScriptedRunner::with_token();
    runner.respond_json("events list --json", "{}");
    let host = RecordingHost::new();
    let shell = shell(&runner, &host);

    shell.fetch_events().await;

    assert_eq!(
        host.last_text(StatusItem::Calendar).as_deref(),
        Some("No upcoming calendar events")
    );
}

#[tokio::test]
async fn picked_event_opens_video_link() {
    let runner = ScriptedRunner::with_token();
    runner.respond_json(
        "events list --json",
        &json!({"events": [upcoming_event()]}).to_string(),
    );
    let host = RecordingHost::new();
    let shell = shell(&runner, &host);
    shell.fetch_events().await;
    host.answer_picks([Some(0)]);

    shell.dispatch(Command::ListEvents).await;

    let menus = host.pick_menus.lock().unwrap().clone();
    assert_eq!(menus[0][0].label, "Standup");
    assert!(menus[0][0]
        .description
        .as_deref()
        .unwrap()
        .starts_with("Upcoming | starting in 30 minutes"));
    assert_eq!(
        host.opened.lock().unwrap().as_slice(),
        &["https://meet.example.com/abc".to_string()]
    );
}

// =============================================================================
// Token
// =============================================================================

#[tokio::test]
async fn set_token_command_forwards_input() {
    let runner = ScriptedRunner::new();
    runner.respond("config token --value=", RawOutput::ok("Token saved"));
    let host = RecordingHost::new();
    let shell = shell(&runner, &host);
    host.answer_input(Some("  mf_secret  "));

    shell.dispatch(Command::SetToken).await;

    assert_eq!(
        runner.calls_starting_with("config token --value"),
        vec!["config token --value=mf_secret"]
    );
}

#[tokio::test]
async fn dont_ask_for_token_is_persisted() {
    let runner = ScriptedRunner::new();
    let host = RecordingHost::new();
    let shell = shell(&runner, &host);

    shell.dispatch(Command::DontAskForToken).await;

    assert!(shell.state().do_not_ask_for_api_token());
}

// =============================================================================
// Interrupting a command
// =============================================================================

#[tokio::test]
async fn shutdown_interrupts_a_running_command() {
    let runner = ScriptedRunner::with_token().delayed(Duration::from_secs(60));
    let host = RecordingHost::new();
    let shell = shell(&runner, &host);

    let finished = tokio::time::timeout(
        Duration::from_secs(5),
        shell.dispatch_until(
            Command::ToggleFlow,
            tokio::time::sleep(Duration::from_millis(50)),
        ),
    )
    .await
    .expect("cancel wins over a stuck command");

    assert!(!finished);
    assert!(shell.state().flow_session().is_none());
}

#[tokio::test]
async fn command_completes_when_nothing_cancels_it() {
    let runner = ScriptedRunner::new();
    let host = RecordingHost::new();
    let shell = shell(&runner, &host);

    let finished = shell
        .dispatch_until(Command::InstallCli, std::future::pending::<()>())
        .await;

    assert!(finished);
    assert_eq!(host.terminals.lock().unwrap().len(), 1);
}

// =============================================================================
// Activity
// =============================================================================

#[tokio::test]
async fn flush_reports_activity_window() {
    let runner = ScriptedRunner::with_token();
    runner.respond("productive-activity", RawOutput::ok(""));
    let host = RecordingHost::new();
    let shell = shell(&runner, &host);

    for ts in [2_000, 1_000, 3_000] {
        shell.heartbeats().record_at(ts);
    }
    shell.flush_activity().await;

    assert_eq!(
        runner.calls_starting_with("productive-activity"),
        vec!["productive-activity --min=1000 --max=3000"]
    );
    assert_eq!(shell.heartbeats().pending(), 0);

    // Nothing recorded since: nothing reported
    shell.flush_activity().await;
    assert_eq!(runner.calls_starting_with("productive-activity").len(), 1);
}

#[tokio::test]
async fn activity_during_a_report_goes_into_the_next_window() {
    let runner = ScriptedRunner::with_token().delayed(Duration::from_millis(100));
    runner.respond("productive-activity", RawOutput::ok(""));
    let host = RecordingHost::new();
    let shell = Arc::new(shell(&runner, &host));

    shell.heartbeats().record_at(1_000);
    let first = tokio::spawn({
        let shell = Arc::clone(&shell);
        async move { shell.flush_activity().await }
    });

    // The report call is logged before the runner answers, so the window
    // has been taken by the time it shows up.
    while runner.calls_starting_with("productive-activity").is_empty() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    shell.heartbeats().record_at(5_000);
    assert_eq!(shell.heartbeats().pending(), 1);

    first.await.unwrap();
    shell.flush_activity().await;

    assert_eq!(
        runner.calls_starting_with("productive-activity"),
        vec![
            "productive-activity --min=1000 --max=1000",
            "productive-activity --min=5000 --max=5000",
        ]
    );
    assert_eq!(shell.heartbeats().pending(), 0);
}

#[tokio::test]
async fn flush_without_token_discards_window() {
    let runner = ScriptedRunner::without_token();
    let host = RecordingHost::new();
    let shell = shell(&runner, &host);

    shell.heartbeats().record_at(1_000);
    shell.flush_activity().await;

    assert!(runner.calls_starting_with("productive-activity").is_empty());
    assert_eq!(shell.heartbeats().pending(), 0);
    assert_eq!(host.notice_messages(), vec!["Makerflow API token missing"]);
}

// =============================================================================
// Schedule
// =============================================================================

#[tokio::test]
async fn schedule_polls_until_shut_down() {
    let runner = ScriptedRunner::with_token();
    runner.respond_json("ongoing --json", "null");
    let host = RecordingHost::new();
    let mut config = test_config();
    config.intervals = Intervals {
        poll: Duration::from_millis(20),
        elapsed: Duration::from_millis(20),
        heartbeat: Duration::from_millis(20),
    };
    let shell = Arc::new(shell_with(&config, &runner, &host, PersistedState::default()));

    let schedule = shell.start_schedule();
    tokio::time::sleep(Duration::from_millis(150)).await;
    schedule.shutdown();

    assert!(!runner.calls_starting_with("ongoing").is_empty());
    assert!(!runner.calls_starting_with("tasks todo").is_empty());
    assert!(!runner.calls_starting_with("events list").is_empty());

    tokio::time::sleep(Duration::from_millis(50)).await;
    let settled = runner.calls().len();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(runner.calls().len(), settled);
}

#[tokio::test]
async fn slow_poll_is_not_overlapped() {
    let runner = ScriptedRunner::with_token().delayed(Duration::from_millis(150));
    runner.respond_json("ongoing --json", "null");
    let host = RecordingHost::new();
    let mut config = test_config();
    config.intervals = Intervals {
        poll: Duration::from_millis(20),
        elapsed: Duration::from_secs(60),
        heartbeat: Duration::from_secs(60),
    };
    let shell = Arc::new(shell_with(&config, &runner, &host, PersistedState::default()));

    let schedule = shell.start_schedule();
    tokio::time::sleep(Duration::from_millis(400)).await;
    drop(schedule);

    // Each flow poll takes two slow calls; ticks in between are skipped
    let polls = runner.calls_starting_with("ongoing").len();
    assert!((1..=2).contains(&polls), "flow polled {polls} times");
}
