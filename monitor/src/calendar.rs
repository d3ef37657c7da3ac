//! Calendar event classification and display phrases.
//!
//! Every event falls in exactly one [`EventPhase`] relative to "now". The
//! minute in which an event starts counts as ongoing even if "now" is a few
//! seconds before the start instant, and the end instant itself is still
//! ongoing.
//!
//! # Example
//!
//! ```
//! use chrono::{Duration, Utc};
//! use flowbar_monitor::calendar::{classify, describe_timing, EventPhase};
//!
//! let now = Utc::now();
//! let start = now - Duration::minutes(5);
//! let end = now + Duration::minutes(10);
//!
//! assert_eq!(classify(start, end, now), EventPhase::Ongoing);
//! assert_eq!(
//!     describe_timing(start, end, now),
//!     "started 5 minutes, ending in 10 minutes"
//! );
//! ```

use std::fmt;

use chrono::{DateTime, Utc};

use crate::types::CalendarEvent;
use crate::utils::relative_time::distance_strict;

/// Where an event stands relative to now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventPhase {
    Ongoing,
    Upcoming,
    Ended,
}

impl EventPhase {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ongoing => "Ongoing",
            Self::Upcoming => "Upcoming",
            Self::Ended => "Ended",
        }
    }
}

impl fmt::Display for EventPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn same_minute(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    a.timestamp().div_euclid(60) == b.timestamp().div_euclid(60)
}

/// Classifies an event spanning `start..=end`.
#[must_use]
pub fn classify(start: DateTime<Utc>, end: DateTime<Utc>, now: DateTime<Utc>) -> EventPhase {
    if same_minute(start, now) {
        EventPhase::Ongoing
    } else if now < start {
        EventPhase::Upcoming
    } else if now <= end {
        EventPhase::Ongoing
    } else {
        EventPhase::Ended
    }
}

/// Human phrase describing the event's timing relative to now.
#[must_use]
pub fn describe_timing(start: DateTime<Utc>, end: DateTime<Utc>, now: DateTime<Utc>) -> String {
    if same_minute(start, now) {
        return format!("is starting now, ending in {}", distance_strict(now, end));
    }
    match classify(start, end, now) {
        EventPhase::Ongoing => format!(
            "started {}, ending in {}",
            distance_strict(start, now),
            distance_strict(now, end)
        ),
        EventPhase::Ended => format!("ended {} ago", distance_strict(end, now)),
        EventPhase::Upcoming => format!("starting in {}", distance_strict(now, start)),
    }
}

/// URI of the first video entry point, or an empty string.
#[must_use]
pub fn video_link(event: &CalendarEvent) -> &str {
    event
        .conference
        .as_ref()
        .and_then(|conference| {
            conference
                .entry_points
                .iter()
                .find(|entry| entry.entry_point_type == "video")
        })
        .map_or("", |entry| entry.uri.as_str())
}

impl CalendarEvent {
    #[must_use]
    pub fn phase(&self, now: DateTime<Utc>) -> EventPhase {
        classify(self.start, self.end, now)
    }
}

/// Second line of an event in the pick list.
#[must_use]
pub fn pick_description(event: &CalendarEvent, now: DateTime<Utc>) -> String {
    format!(
        "{} | {} | {} | {}",
        event.phase(now),
        describe_timing(event.start, event.end, now),
        event.summary,
        video_link(event)
    )
}

/// Status text for the calendar item.
///
/// Phases are listed in the order they first appear in `events`; ended
/// events count like any other.
#[must_use]
pub fn summarize(events: &[CalendarEvent], now: DateTime<Utc>) -> String {
    let mut counts: Vec<(EventPhase, usize)> = Vec::new();
    for event in events {
        let phase = event.phase(now);
        match counts.iter_mut().find(|(p, _)| *p == phase) {
            Some((_, n)) => *n += 1,
            None => counts.push((phase, 1)),
        }
    }

    if counts.is_empty() {
        return "No upcoming calendar events".to_string();
    }

    let parts: Vec<String> = counts
        .iter()
        .map(|(phase, n)| format!("{phase}: {n}"))
        .collect();
    format!("Calendar - {}", parts.join(" | "))
}
