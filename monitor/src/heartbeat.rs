//! Productive-activity heartbeats.
//!
//! Activity signals (file changes, console commands) are appended to an
//! in-memory buffer. On each flush tick the buffer is swapped for an empty one
//! before anything is reported, so signals that arrive while the report is in
//! flight land in the fresh buffer and are picked up by the next flush.

use std::sync::{Mutex, PoisonError};

use chrono::Utc;
use tracing::debug;

use crate::cli::{CliBridge, CliCommand, CliReply};
use crate::token::TokenGate;

/// Earliest and latest activity timestamps (epoch milliseconds) in a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivityWindow {
    pub min: i64,
    pub max: i64,
}

/// Buffer of activity timestamps.
#[derive(Debug, Default)]
pub struct HeartbeatAggregator {
    timestamps: Mutex<Vec<i64>>,
}

impl HeartbeatAggregator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records activity at the current time.
    pub fn record(&self) {
        self.record_at(Utc::now().timestamp_millis());
    }

    /// Records activity at `millis` since the epoch.
    pub fn record_at(&self, millis: i64) {
        self.timestamps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(millis);
    }

    /// Number of buffered signals.
    pub fn pending(&self) -> usize {
        self.timestamps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Empties the buffer and returns its window, or `None` when it was empty.
    pub fn take_window(&self) -> Option<ActivityWindow> {
        let captured = std::mem::take(
            &mut *self
                .timestamps
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        let min = captured.iter().copied().min()?;
        let max = captured.iter().copied().max()?;
        Some(ActivityWindow { min, max })
    }

    /// Reports buffered activity as a single interval.
    ///
    /// The missing-token warning is checked first on every flush. The window
    /// is only reported when a token is configured; without one it is
    /// discarded.
    pub async fn flush(&self, bridge: &CliBridge, gate: &TokenGate) {
        gate.warn_if_missing().await;

        let Some(window) = self.take_window() else {
            return;
        };
        if !gate.is_available().await {
            debug!(min = window.min, max = window.max, "Dropping activity window without API token");
            return;
        }

        let reply = bridge
            .fetch(CliCommand::ProductiveActivity {
                min: window.min,
                max: window.max,
            })
            .await;
        if let Some(CliReply::AuthUnavailable) = reply {
            debug!("Activity report rejected: no API token");
        }
    }
}
