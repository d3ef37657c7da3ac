//! Task records and their display form.
//!
//! `tasks todo` returns heterogeneous records tagged by `type`. A
//! [`TodoRecord`] keeps the record exactly as received (it is sent back
//! verbatim to `todo done`); [`TodoRecord::classify`] views it as the closed
//! union [`Todo`], and [`enrich`] maps that to an immutable [`TodoView`].
//!
//! [`enrich`] is a pure function of the record and the current time, so
//! enriching the same list twice yields identical views.
//!
//! # Example
//!
//! ```
//! use chrono::Utc;
//! use flowbar_monitor::todo::{enrich, TodoRecord};
//!
//! let record: TodoRecord = serde_json::from_value(serde_json::json!({
//!     "type": "github",
//!     "pr": {
//!         "repository_uuid": "r1",
//!         "pullrequest_id": 42,
//!         "pullrequest_title": "Fix bug",
//!         "link": "https://x/42",
//!         "repository_name": "repo"
//!     },
//!     "meta": {"comments": 3, "approvals": 1}
//! }))
//! .unwrap();
//!
//! let view = enrich(&record, Utc::now()).unwrap();
//! assert_eq!(view.description, "PR #42: Fix bug");
//! assert_eq!(view.group, "r1_42");
//! assert_eq!(view.source_description.as_deref(), Some("repo | 3 comments | 1 approvals"));
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::parse_flexible_timestamp;
use crate::utils::relative_time::distance_to_now_strict;

/// `sourceType` of tasks created inside makerflow itself.
const MAKERFLOW_SOURCE: &str = "makerflow";

/// A task record as returned by `tasks todo`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TodoRecord {
    /// Source tag (`slack_channel`, `github`, `makerflow`, ...).
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(rename = "sourceType", default, skip_serializing_if = "Option::is_none")]
    pub source_type: Option<String>,

    /// Server-supplied grouping tag (used by Slack records).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events: Option<Vec<SlackEvent>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr: Option<PullRequest>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<TaskInfo>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<PullRequestMeta>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One Slack message that produced a todo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlackEvent {
    #[serde(default)]
    pub channel_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_name: Option<String>,
    #[serde(default)]
    pub team_id: String,
    /// Kept raw; the CLI sends either text or epoch numbers.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub created_at: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SlackEvent {
    #[must_use]
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        parse_flexible_timestamp(&self.created_at)
    }
}

/// Pull request details for GitHub and Bitbucket records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequest {
    #[serde(default)]
    pub repository_uuid: String,
    pub pullrequest_id: PullRequestId,
    #[serde(default)]
    pub pullrequest_title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(default)]
    pub repository_name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Pull request number; some sources send it as text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PullRequestId {
    Number(i64),
    Text(String),
}

impl fmt::Display for PullRequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// Review counters attached to pull request records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PullRequestMeta {
    #[serde(default)]
    pub comments: u64,
    #[serde(default)]
    pub approvals: u64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A task created in makerflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInfo {
    #[serde(default)]
    pub title: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Kind of Slack conversation a todo came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlackSource {
    Channel,
    DirectMessage,
    GroupDirectMessage,
}

impl SlackSource {
    fn noun(self, count: usize) -> &'static str {
        match (self, count == 1) {
            (Self::Channel, true) => "channel",
            (Self::Channel, false) => "channels",
            (Self::DirectMessage, true) => "DM",
            (Self::DirectMessage, false) => "DMs",
            (Self::GroupDirectMessage, true) => "group DM",
            (Self::GroupDirectMessage, false) => "group DMs",
        }
    }
}

/// Code host of a pull request todo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullRequestHost {
    Github,
    Bitbucket,
}

/// A classified task record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Todo<'a> {
    Slack {
        source: SlackSource,
        group: &'a str,
        events: &'a [SlackEvent],
    },
    PullRequest {
        host: PullRequestHost,
        pr: &'a PullRequest,
        meta: Option<&'a PullRequestMeta>,
    },
    Task(&'a TaskInfo),
    Onboarding,
}

impl TodoRecord {
    /// Views the record as a [`Todo`], or `None` when the type is unknown or
    /// its payload is missing.
    #[must_use]
    pub fn classify(&self) -> Option<Todo<'_>> {
        let kind = self.kind.as_str();
        let from_makerflow = self
            .source_type
            .as_deref()
            .map_or(true, |source| source == MAKERFLOW_SOURCE);

        if kind.contains("slack") {
            let source = match kind {
                "slack_channel" => SlackSource::Channel,
                "slack_im" => SlackSource::DirectMessage,
                "slack_mpim" => SlackSource::GroupDirectMessage,
                _ => return None,
            };
            return Some(Todo::Slack {
                source,
                group: self.group.as_deref().unwrap_or_default(),
                events: self.events.as_deref().unwrap_or_default(),
            });
        }

        match kind {
            "github" | "bitbucket" => Some(Todo::PullRequest {
                host: if kind == "github" {
                    PullRequestHost::Github
                } else {
                    PullRequestHost::Bitbucket
                },
                pr: self.pr.as_ref()?,
                meta: self.meta.as_ref(),
            }),
            "makerflow" if from_makerflow => self.task.as_ref().map(Todo::Task),
            "onboarding" if from_makerflow => Some(Todo::Onboarding),
            _ => None,
        }
    }
}

/// Where a displayed todo came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TodoSource {
    Slack,
    Github,
    Bitbucket,
    Makerflow,
}

/// Display form of a todo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TodoView {
    pub source: TodoSource,
    pub description: String,
    pub source_description: Option<String>,
    pub group: String,
    /// Deep link (Slack app) or web link (pull requests).
    pub link: Option<String>,
    /// Browser fallback for Slack todos.
    pub browser_link: Option<String>,
    pub done: bool,
}

/// Maps a record to its display form.
///
/// Returns `None` for onboarding records, unknown types, and Slack records
/// without events.
#[must_use]
pub fn enrich(record: &TodoRecord, now: DateTime<Utc>) -> Option<TodoView> {
    match record.classify()? {
        Todo::Slack {
            source,
            group,
            events,
        } => enrich_slack(source, group, events, now),
        Todo::PullRequest { host, pr, meta } => Some(enrich_pull_request(host, pr, meta)),
        Todo::Task(task) => Some(TodoView {
            source: TodoSource::Makerflow,
            description: task.title.clone(),
            source_description: None,
            group: format!("makerflow_{}", task.title),
            link: None,
            browser_link: None,
            done: false,
        }),
        Todo::Onboarding => None,
    }
}

fn enrich_slack(
    source: SlackSource,
    group: &str,
    events: &[SlackEvent],
    now: DateTime<Utc>,
) -> Option<TodoView> {
    let first = events.first()?;

    let mut channels: Vec<&str> = Vec::new();
    for event in events {
        if !channels.contains(&event.channel_id.as_str()) {
            channels.push(&event.channel_id);
        }
    }
    let source_count = channels.len();

    let description = format!(
        "{} in {}{}",
        count_noun(events.len(), "message", "messages"),
        if source_count == 1 { "a " } else { "multiple " },
        source.noun(source_count)
    );

    let mut source_description = if source_count > 1 {
        format!("{group} | {source_count} {}", source.noun(source_count))
    } else {
        group.to_string()
    };

    if source == SlackSource::Channel {
        let mut names: Vec<String> = Vec::new();
        for event in events {
            let name = format!("#{}", event.channel_name.as_deref().unwrap_or_default());
            if !names.contains(&name) {
                names.push(name);
            }
        }
        source_description.push_str(" | ");
        source_description.push_str(&names.join(", "));
    }

    if let Some(latest) = events.iter().filter_map(SlackEvent::created_at).max() {
        source_description.push_str(" | ");
        source_description.push_str(&distance_to_now_strict(latest, now));
    }

    Some(TodoView {
        source: TodoSource::Slack,
        description,
        source_description: Some(source_description),
        group: group.to_string(),
        link: Some(format!(
            "slack://channel?id={}&team={}",
            first.channel_id, first.team_id
        )),
        browser_link: Some(format!(
            "https://slack.com/app_redirect?channel={}&team={}",
            first.channel_id, first.team_id
        )),
        done: false,
    })
}

fn enrich_pull_request(
    host: PullRequestHost,
    pr: &PullRequest,
    meta: Option<&PullRequestMeta>,
) -> TodoView {
    let meta = meta.cloned().unwrap_or_default();
    TodoView {
        source: match host {
            PullRequestHost::Github => TodoSource::Github,
            PullRequestHost::Bitbucket => TodoSource::Bitbucket,
        },
        description: format!("PR #{}: {}", pr.pullrequest_id, pr.pullrequest_title),
        source_description: Some(format!(
            "{} | {} comments | {} approvals",
            pr.repository_name, meta.comments, meta.approvals
        )),
        group: format!("{}_{}", pr.repository_uuid, pr.pullrequest_id),
        link: pr.link.clone(),
        browser_link: None,
        done: false,
    }
}

fn count_noun(count: usize, singular: &str, plural: &str) -> String {
    if count == 1 {
        format!("{count} {singular}")
    } else {
        format!("{count} {plural}")
    }
}

/// Enriches a whole list, dropping records that do not display.
///
/// Each view is paired with the index of its record in `records`.
#[must_use]
pub fn enrich_all(records: &[TodoRecord], now: DateTime<Utc>) -> Vec<(usize, TodoView)> {
    records
        .iter()
        .enumerate()
        .filter_map(|(index, record)| enrich(record, now).map(|view| (index, view)))
        .collect()
}

/// Status text for the tasks item, e.g. `"3 new tasks - Slack: 1 | Github: 2"`.
#[must_use]
pub fn summarize<'a>(views: impl IntoIterator<Item = &'a TodoView>) -> String {
    let views: Vec<&TodoView> = views.into_iter().collect();
    if views.is_empty() {
        return "No new tasks".to_string();
    }

    let count = |source: TodoSource| views.iter().filter(|v| v.source == source).count();
    let parts: Vec<String> = [
        ("Slack", count(TodoSource::Slack)),
        ("Github", count(TodoSource::Github)),
        ("Bitbucket", count(TodoSource::Bitbucket)),
    ]
    .into_iter()
    .filter(|(_, n)| *n > 0)
    .map(|(label, n)| format!("{label}: {n}"))
    .collect();

    let headline = format!("{} new {}", views.len(), if views.len() == 1 { "task" } else { "tasks" });
    if parts.is_empty() {
        headline
    } else {
        format!("{headline} - {}", parts.join(" | "))
    }
}

/// Follow-up actions offered after a todo is picked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TodoAction {
    MarkDone,
    Open,
    OpenInBrowser,
}

impl TodoAction {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::MarkDone => "Mark as done",
            Self::Open => "Open",
            Self::OpenInBrowser => "Open in browser",
        }
    }

    /// Second line shown under the label.
    #[must_use]
    pub fn detail(self, source: TodoSource) -> String {
        match self {
            Self::MarkDone => "Mark this todo as done".to_string(),
            Self::Open => format!("Open {}", open_destination(source)),
            Self::OpenInBrowser => "Open this slack workspace in browser".to_string(),
        }
    }
}

fn open_destination(source: TodoSource) -> &'static str {
    if source == TodoSource::Slack {
        "in Slack app"
    } else {
        "in browser"
    }
}

/// Actions available for a view, in menu order.
#[must_use]
pub fn actions_for(view: &TodoView) -> Vec<TodoAction> {
    match view.source {
        TodoSource::Slack => vec![TodoAction::MarkDone, TodoAction::Open, TodoAction::OpenInBrowser],
        TodoSource::Github | TodoSource::Bitbucket => vec![TodoAction::MarkDone, TodoAction::Open],
        TodoSource::Makerflow => vec![TodoAction::MarkDone],
    }
}

/// Placeholder for the action menu.
#[must_use]
pub fn action_prompt(view: &TodoView) -> String {
    if view.source == TodoSource::Makerflow {
        "Mark as done".to_string()
    } else {
        format!("Mark as done or open {}", open_destination(view.source))
    }
}
