//! Flowbar Monitor - status companion for the makerflow CLI.
//!
//! # Commands
//!
//! - `flowbar-monitor run`: Keep the status items in sync and accept commands on stdin
//! - `flowbar-monitor status`: Poll once and print the status items
//! - `flowbar-monitor token <value>`: Store an API token through the CLI
//!
//! # Environment Variables
//!
//! See the [`config`] module for available configuration options.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use flowbar_monitor::activity::ActivityWatcher;
use flowbar_monitor::cli::{CliBridge, ProcessRunner};
use flowbar_monitor::config::Config;
use flowbar_monitor::host::{ConsoleHost, StatusItem};
use flowbar_monitor::session::FLOW_OFF;
use flowbar_monitor::shell::{Command, Shell};
use flowbar_monitor::state::AppState;

/// Flowbar Monitor - status companion for the makerflow CLI.
///
/// Mirrors flow sessions, breaks, tasks and calendar events from the
/// makerflow CLI and reports workspace activity back to it.
#[derive(Parser, Debug)]
#[command(name = "flowbar-monitor")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "\
ENVIRONMENT VARIABLES:
    FLOWBAR_CLI                     CLI executable (default: makerflow)
    FLOWBAR_SOURCE                  Value of --source= (default: vscode)
    FLOWBAR_STATE_PATH              State file (default: ~/.flowbar/state.json)
    FLOWBAR_WATCH_DIR               Workspace whose file activity is reported
    FLOWBAR_SANITIZE_MODE           lenient or strict (default: lenient)
    FLOWBAR_SUPPRESS_CLIENT_ONLY_DURING_TRANSITION  (default: true)
    FLOWBAR_SHOW_STATUS / _TASKS / _CALENDAR        Status item visibility
    FLOWBAR_POLL_INTERVAL_SECS      Polling period (default: 10)
    FLOWBAR_ELAPSED_INTERVAL_SECS   Elapsed-time refresh (default: 60)
    FLOWBAR_HEARTBEAT_INTERVAL_SECS Activity report period (default: 30)
    FLOWBAR_INSTALL_COMMAND         Command run by \"Install now\"

EXAMPLES:
    # Run interactively, reporting activity in the current project
    FLOWBAR_WATCH_DIR=$PWD flowbar-monitor run

    # Print the current status once
    flowbar-monitor status

    # Store an API token
    flowbar-monitor token mf_xxxxxxxx
")]
struct Cli {
    #[command(subcommand)]
    command: Subcommands,
}

/// CLI subcommands.
#[derive(Subcommand, Debug)]
enum Subcommands {
    /// Keep the status items in sync and accept commands on stdin.
    ///
    /// Type `help` at the prompt for the list of commands.
    Run,

    /// Poll the CLI once and print the status items.
    Status,

    /// Store an API token through the CLI.
    Token {
        /// The token from https://app.makerflow.co/settings#api
        value: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();

    let config = Config::from_env().context("Failed to load configuration")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;

    match cli.command {
        Subcommands::Run => runtime.block_on(run_monitor(config)),
        Subcommands::Status => runtime.block_on(run_status(config)),
        Subcommands::Token { value } => runtime.block_on(run_token(config, value)),
    }
}

fn build_shell(config: &Config, host: Arc<ConsoleHost>) -> Arc<Shell> {
    let bridge = CliBridge::new(
        config.cli_program.clone(),
        config.source.clone(),
        config.sanitize_mode,
        Box::new(ProcessRunner),
    );
    let state = AppState::load(&config.state_path);
    Arc::new(Shell::new(config, bridge, state, host))
}

/// Runs the monitor until stdin closes, `quit` is typed, or a shutdown
/// signal arrives.
async fn run_monitor(config: Config) -> Result<()> {
    info!(
        cli = %config.cli_program,
        state_path = %config.state_path.display(),
        poll_secs = config.intervals.poll.as_secs(),
        "Starting Flowbar Monitor"
    );

    let host = Arc::new(ConsoleHost::from_stdin());
    let shell = build_shell(&config, Arc::clone(&host));

    shell.startup().await;
    let schedule = shell.start_schedule();

    let _watcher = match &config.watch_dir {
        Some(dir) => Some(
            ActivityWatcher::new(dir.clone(), Arc::clone(shell.heartbeats())).context(format!(
                "Failed to initialize activity watcher for {}",
                dir.display()
            ))?,
        ),
        None => None,
    };

    info!("Monitor running. Type 'help' for commands, Ctrl+C to stop.");

    let shutdown = wait_for_shutdown();
    tokio::pin!(shutdown);

    loop {
        let line = tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }
            line = host.next_line() => line,
        };

        let Some(line) = line else {
            info!("Input closed");
            break;
        };

        match line.as_str() {
            "quit" | "exit" => break,
            "help" => print_help(),
            _ => match host.interpret(&line) {
                Ok(Some(command)) => {
                    if !shell.dispatch_until(command, &mut shutdown).await {
                        info!("Shutdown signal received");
                        break;
                    }
                }
                Ok(None) => {}
                Err(message) => eprintln!("{message} (type 'help' for commands)"),
            },
        }
    }

    info!("Shutting down...");
    schedule.shutdown();
    shell.flush_activity().await;

    info!("Monitor stopped");
    Ok(())
}

/// Polls each source once and prints the resulting status items.
async fn run_status(config: Config) -> Result<()> {
    let (_tx, rx) = mpsc::channel(1);
    let host = Arc::new(ConsoleHost::new(rx));
    let shell = build_shell(&config, host);

    shell.board().set(StatusItem::Session, FLOW_OFF);
    shell.sessions().poll_flow().await;
    shell.sessions().poll_break().await;
    shell.sessions().refresh_elapsed();
    shell.fetch_tasks().await;
    shell.fetch_events().await;

    Ok(())
}

/// Stores `value` as the API token.
async fn run_token(config: Config, value: String) -> Result<()> {
    let (_tx, rx) = mpsc::channel(1);
    let shell = build_shell(&config, Arc::new(ConsoleHost::new(rx)));

    let token = value.trim();
    if token.is_empty() {
        bail!("API token cannot be empty");
    }
    if !shell.gate().set_token(token).await {
        bail!("{} did not accept the token", config.cli_program);
    }

    println!("API token updated.");
    Ok(())
}

fn print_help() {
    println!("Commands:");
    for name in Command::NAMES {
        println!("  {name}");
    }
    println!("  help");
    println!("  quit");
    println!("A number runs the matching action of the latest notice.");
}

/// Initializes the logging subsystem.
///
/// Logs go to stderr so they do not interleave with status output.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .init();
}

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
