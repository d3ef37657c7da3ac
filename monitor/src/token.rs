//! API token checks and prompts.
//!
//! The CLI owns the token; this module only asks whether one is configured,
//! warns once per process when it is not (unless the user opted out), and
//! forwards a token the user types to `config token --value`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use crate::cli::{CliBridge, CliCommand, CliReply};
use crate::host::{InputRequest, Notice, NoticeAction, StatusBoard};
use crate::shell::Command;
use crate::state::AppState;

const SETTINGS_URL: &str = "https://app.makerflow.co/settings#api";

/// Token availability checks and the missing-token warning.
#[derive(Debug)]
pub struct TokenGate {
    bridge: Arc<CliBridge>,
    state: Arc<AppState>,
    board: Arc<StatusBoard>,
    warned: AtomicBool,
}

impl TokenGate {
    pub fn new(bridge: Arc<CliBridge>, state: Arc<AppState>, board: Arc<StatusBoard>) -> Self {
        Self {
            bridge,
            state,
            board,
            warned: AtomicBool::new(false),
        }
    }

    /// Returns `true` when the CLI reports a configured token.
    ///
    /// Any failure of the check counts as "no token".
    pub async fn is_available(&self) -> bool {
        match self.bridge.fetch(CliCommand::TokenCheck).await {
            Some(CliReply::Text(text)) => text.contains("true"),
            _ => false,
        }
    }

    /// Shows the missing-token warning, at most once per process.
    ///
    /// Nothing is shown when a token is configured or the user chose
    /// "Don't ask again".
    pub async fn warn_if_missing(&self) {
        if self.state.do_not_ask_for_api_token() || self.warned.load(Ordering::Acquire) {
            return;
        }
        if self.is_available().await {
            return;
        }
        if self.warned.swap(true, Ordering::AcqRel) {
            return;
        }

        debug!("Warning about missing API token");
        self.board.notify(
            Notice::warning("Makerflow API token missing")
                .with_detail(format!("You can get a new token from {SETTINGS_URL}"))
                .modal()
                .with_action(NoticeAction::new("Set token", Command::SetToken))
                .with_action(NoticeAction::new(
                    "Don't ask again",
                    Command::DontAskForToken,
                )),
        );
    }

    /// Asks the user for a token and stores it through the CLI.
    pub async fn prompt_for_token(&self) {
        let request = InputRequest {
            prompt: format!(
                "Set API token for Makerflow. Go to {SETTINGS_URL} to create one."
            ),
            placeholder: "Your Makerflow API token".to_string(),
            password: true,
        };
        match self.board.host().input_box(request).await {
            Some(token) if !token.trim().is_empty() => {
                self.set_token(token.trim()).await;
            }
            _ => debug!("Token prompt dismissed"),
        }
    }

    /// Stores `token` through the CLI. Returns whether the CLI accepted it.
    pub async fn set_token(&self, token: &str) -> bool {
        let stored = self
            .bridge
            .invoke(CliCommand::SetToken(token.to_string()))
            .await
            .is_ok();
        if stored {
            info!("API token updated");
        }
        stored
    }

    /// Records that the user never wants to be asked for a token again.
    pub fn stop_asking(&self) {
        self.state.set_do_not_ask_for_api_token(true);
    }
}
