//! Shared fixtures for integration tests: a scripted CLI and a recording host.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use flowbar_monitor::cli::{CliBridge, CliRunner, RawOutput, SanitizeMode};
use flowbar_monitor::config::{Config, Intervals, Visibility};
use flowbar_monitor::host::{Host, InputRequest, Notice, PickItem, StatusItem};
use flowbar_monitor::shell::Shell;
use flowbar_monitor::state::{AppState, PersistedState};

pub const SOURCE: &str = "test";
pub const TOKEN_CHECK: &str = "config token --check";

// =============================================================================
// Scripted CLI
// =============================================================================

#[derive(Default)]
struct Script {
    responses: HashMap<String, RawOutput>,
    calls: Vec<String>,
}

/// A [`CliRunner`] that answers from a script keyed by the joined argument
/// list. The longest scripted key that prefixes the invocation wins; anything
/// unscripted fails with exit code 1.
#[derive(Clone, Default)]
pub struct ScriptedRunner {
    script: Arc<Mutex<Script>>,
    delay: Option<Duration>,
    missing: bool,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// A runner whose token check reports a configured token.
    pub fn with_token() -> Self {
        let runner = Self::new();
        runner.respond(TOKEN_CHECK, RawOutput::ok("true\n"));
        runner
    }

    /// A runner whose token check reports no token.
    pub fn without_token() -> Self {
        let runner = Self::new();
        runner.respond(TOKEN_CHECK, RawOutput::ok("false\n"));
        runner
    }

    /// A runner whose executable cannot be spawned at all.
    pub fn not_installed() -> Self {
        Self {
            missing: true,
            ..Self::default()
        }
    }

    /// Makes every invocation take `delay` before answering.
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn respond(&self, args: &str, output: RawOutput) {
        self.script
            .lock()
            .unwrap()
            .responses
            .insert(args.to_string(), output);
    }

    /// Scripts a JSON command; `--source=test` is appended to `args`.
    pub fn respond_json(&self, args: &str, body: &str) {
        self.respond(&format!("{args} --source={SOURCE}"), RawOutput::ok(body));
    }

    pub fn calls(&self) -> Vec<String> {
        self.script.lock().unwrap().calls.clone()
    }

    pub fn calls_starting_with(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| call.starts_with(prefix))
            .collect()
    }

    pub fn bridge(&self) -> CliBridge {
        CliBridge::new("makerflow", SOURCE, SanitizeMode::Lenient, Box::new(self.clone()))
    }
}

#[async_trait]
impl CliRunner for ScriptedRunner {
    async fn run(&self, program: &str, args: &[String]) -> std::io::Result<RawOutput> {
        assert_eq!(program, "makerflow");
        let key = args.join(" ");
        let output = {
            let mut script = self.script.lock().unwrap();
            script.calls.push(key.clone());
            script
                .responses
                .iter()
                .filter(|(scripted, _)| key.starts_with(scripted.as_str()))
                .max_by_key(|(scripted, _)| scripted.len())
                .map(|(_, output)| output.clone())
        };
        if self.missing {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "No such file or directory",
            ));
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(output.unwrap_or_else(|| RawOutput::failed(1, format!("unscripted: {key}"))))
    }
}

// =============================================================================
// Recording host
// =============================================================================

#[derive(Default)]
pub struct RecordingHost {
    pub statuses: Mutex<Vec<(StatusItem, String)>>,
    pub visibility: Mutex<HashMap<StatusItem, bool>>,
    pub notices: Mutex<Vec<Notice>>,
    pub picks: Mutex<VecDeque<Option<usize>>>,
    pub pick_menus: Mutex<Vec<Vec<PickItem>>>,
    pub inputs: Mutex<VecDeque<Option<String>>>,
    pub opened: Mutex<Vec<String>>,
    pub terminals: Mutex<Vec<(String, String)>>,
}

impl RecordingHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queues the answers to the next `pick` calls.
    pub fn answer_picks(&self, answers: impl IntoIterator<Item = Option<usize>>) {
        self.picks.lock().unwrap().extend(answers);
    }

    pub fn answer_input(&self, answer: Option<&str>) {
        self.inputs
            .lock()
            .unwrap()
            .push_back(answer.map(str::to_string));
    }

    pub fn texts(&self, item: StatusItem) -> Vec<String> {
        self.statuses
            .lock()
            .unwrap()
            .iter()
            .filter(|(i, _)| *i == item)
            .map(|(_, text)| text.clone())
            .collect()
    }

    pub fn last_text(&self, item: StatusItem) -> Option<String> {
        self.texts(item).pop()
    }

    pub fn notice_messages(&self) -> Vec<String> {
        self.notices
            .lock()
            .unwrap()
            .iter()
            .map(|notice| notice.message.clone())
            .collect()
    }
}

#[async_trait]
impl Host for RecordingHost {
    fn set_status(&self, item: StatusItem, text: &str) {
        self.statuses.lock().unwrap().push((item, text.to_string()));
    }

    fn show_status_item(&self, item: StatusItem, visible: bool) {
        self.visibility.lock().unwrap().insert(item, visible);
    }

    fn notify(&self, notice: Notice) {
        self.notices.lock().unwrap().push(notice);
    }

    async fn pick(&self, items: Vec<PickItem>, _placeholder: &str) -> Option<usize> {
        self.pick_menus.lock().unwrap().push(items);
        self.picks.lock().unwrap().pop_front().flatten()
    }

    async fn input_box(&self, _request: InputRequest) -> Option<String> {
        self.inputs.lock().unwrap().pop_front().flatten()
    }

    fn open_external(&self, url: &str) {
        self.opened.lock().unwrap().push(url.to_string());
    }

    fn run_in_terminal(&self, name: &str, command: &str) {
        self.terminals
            .lock()
            .unwrap()
            .push((name.to_string(), command.to_string()));
    }
}

// =============================================================================
// Assembly
// =============================================================================

pub fn test_config() -> Config {
    Config {
        cli_program: "makerflow".to_string(),
        source: SOURCE.to_string(),
        state_path: PathBuf::from("/nonexistent/state.json"),
        watch_dir: None,
        sanitize_mode: SanitizeMode::Lenient,
        suppress_client_only_during_transition: true,
        visibility: Visibility::default(),
        intervals: Intervals::default(),
        install_command: "npm install -g makerflow".to_string(),
    }
}

pub fn shell_with(
    config: &Config,
    runner: &ScriptedRunner,
    host: &Arc<RecordingHost>,
    state: PersistedState,
) -> Shell {
    let host: Arc<dyn Host> = Arc::clone(host) as Arc<dyn Host>;
    Shell::new(config, runner.bridge(), AppState::in_memory(state), host)
}

pub fn shell(runner: &ScriptedRunner, host: &Arc<RecordingHost>) -> Shell {
    shell_with(&test_config(), runner, host, PersistedState::default())
}
