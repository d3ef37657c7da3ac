//! Records exchanged with the makerflow CLI.
//!
//! Session and calendar records are decoded from the CLI's JSON output. Every
//! record keeps the fields it does not interpret in an `extra` map so nothing
//! the CLI sends is lost when the record is persisted and read back.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

/// An active flow (focused work) session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowSession {
    /// When the session started.
    #[serde(with = "flexible_timestamp")]
    pub start: DateTime<Utc>,

    /// Set when the session was synthesized locally because the backend was
    /// not reachable with a token. A server-reported session replaces it.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub client_only: bool,

    /// Opaque fields supplied by the CLI.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FlowSession {
    /// Creates a locally synthesized session starting at `now`.
    #[must_use]
    pub fn synthesized(now: DateTime<Utc>) -> Self {
        Self {
            start: now,
            client_only: true,
            extra: Map::new(),
        }
    }

    /// Decodes a session from a CLI payload.
    ///
    /// `null`, empty objects and empty arrays mean "no session" and decode to
    /// `Ok(None)`. Anything else must fit the session shape.
    ///
    /// # Errors
    ///
    /// Returns the decode error when a non-empty payload does not fit.
    pub fn from_payload(payload: &Value) -> Result<Option<Self>, serde_json::Error> {
        decode_session(payload, "flow")
    }
}

/// An active break.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakSession {
    /// When the break started.
    #[serde(with = "flexible_timestamp")]
    pub start: DateTime<Utc>,

    /// Optional reason the break was taken for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Opaque fields supplied by the CLI.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BreakSession {
    /// Decodes a break from a CLI payload. Same rules as [`FlowSession::from_payload`].
    ///
    /// # Errors
    ///
    /// Returns the decode error when a non-empty payload does not fit.
    pub fn from_payload(payload: &Value) -> Result<Option<Self>, serde_json::Error> {
        decode_session(payload, "break")
    }
}

fn decode_session<T: DeserializeOwned>(
    payload: &Value,
    kind: &str,
) -> Result<Option<T>, serde_json::Error> {
    match payload {
        Value::Null => Ok(None),
        Value::Object(map) if map.is_empty() => Ok(None),
        Value::Array(items) if items.is_empty() => Ok(None),
        _ => serde_json::from_value(payload.clone()).map(Some).map_err(|e| {
            warn!(kind, error = %e, "Session payload has unexpected shape");
            e
        }),
    }
}

/// Reasons a break can be tagged with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BreakReason {
    Lunch,
    Coffee,
    Tea,
    Walk,
    Beverage,
}

impl BreakReason {
    /// All reasons, in menu order.
    pub const ALL: [BreakReason; 5] = [
        Self::Lunch,
        Self::Coffee,
        Self::Tea,
        Self::Beverage,
        Self::Walk,
    ];

    /// The value passed to `--reason=`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lunch => "lunch",
            Self::Coffee => "coffee",
            Self::Tea => "tea",
            Self::Walk => "walk",
            Self::Beverage => "beverage",
        }
    }
}

impl fmt::Display for BreakReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BreakReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|reason| reason.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown break reason '{s}'"))
    }
}

/// A calendar event as listed by `events list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEvent {
    #[serde(default)]
    pub summary: String,
    #[serde(with = "flexible_timestamp")]
    pub start: DateTime<Utc>,
    #[serde(with = "flexible_timestamp")]
    pub end: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conference: Option<Conference>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Conference details attached to a calendar event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conference {
    #[serde(default)]
    pub entry_points: Vec<EntryPoint>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One way of joining a conference (video, phone, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryPoint {
    #[serde(default)]
    pub entry_point_type: String,
    #[serde(default)]
    pub uri: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Datetime layouts without an offset; these are read as UTC.
const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Parses a timestamp the CLI may send as RFC 3339 text, as a datetime with
/// no offset (taken as UTC), or as epoch seconds or milliseconds.
///
/// Numbers above `10^11` are treated as milliseconds.
#[must_use]
pub fn parse_flexible_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(text) => {
            let text = text.trim();
            DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|ts| ts.with_timezone(&Utc))
                .or_else(|| {
                    NAIVE_FORMATS.iter().find_map(|format| {
                        NaiveDateTime::parse_from_str(text, format)
                            .ok()
                            .map(|naive| naive.and_utc())
                    })
                })
                .or_else(|| text.parse::<f64>().ok().and_then(from_epoch_number))
        }
        Value::Number(number) => number.as_f64().and_then(from_epoch_number),
        _ => None,
    }
}

/// Serde adapter for timestamp fields: reads anything
/// [`parse_flexible_timestamp`] accepts, writes RFC 3339.
mod flexible_timestamp {
    use chrono::{DateTime, Utc};
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use serde_json::Value;

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        ts.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let value = Value::deserialize(deserializer)?;
        super::parse_flexible_timestamp(&value)
            .ok_or_else(|| D::Error::custom(format!("unrecognized timestamp: {value}")))
    }
}

fn from_epoch_number(number: f64) -> Option<DateTime<Utc>> {
    let millis = if number.abs() > 1e11 {
        number
    } else {
        number * 1_000.0
    };
    DateTime::from_timestamp_millis(millis as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn flow_session_keeps_opaque_fields() {
        let payload = json!({"start": "2024-03-01T09:00:00Z", "id": 7, "source": "cli"});
        let session = FlowSession::from_payload(&payload).unwrap().expect("session");

        assert_eq!(
            session.start,
            Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
        );
        assert!(!session.client_only);
        assert_eq!(session.extra.get("id"), Some(&json!(7)));

        let round = serde_json::to_value(&session).unwrap();
        assert_eq!(round, payload);
    }

    #[test]
    fn empty_or_null_payload_is_no_session() {
        assert!(FlowSession::from_payload(&json!({})).unwrap().is_none());
        assert!(FlowSession::from_payload(&Value::Null).unwrap().is_none());
        assert!(BreakSession::from_payload(&json!([])).unwrap().is_none());
    }

    #[test]
    fn payload_without_start_is_an_error() {
        assert!(FlowSession::from_payload(&json!({"id": 1})).is_err());
        assert!(FlowSession::from_payload(&json!({"start": "soon"})).is_err());
        assert!(BreakSession::from_payload(&json!("on break")).is_err());
    }

    #[test]
    fn session_start_without_offset_is_utc() {
        let payload = json!({"start": "2024-03-01T09:00:00.000000", "id": 11});
        let session = FlowSession::from_payload(&payload).unwrap().expect("session");
        assert_eq!(
            session.start,
            Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
        );
        assert_eq!(session.extra.get("id"), Some(&json!(11)));
    }

    #[test]
    fn session_start_as_epoch_number() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let on_break = BreakSession::from_payload(&json!({"start": expected.timestamp()}))
            .unwrap()
            .expect("break");
        assert_eq!(on_break.start, expected);
    }

    #[test]
    fn synthesized_session_serializes_client_only_flag() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let value = serde_json::to_value(FlowSession::synthesized(now)).unwrap();
        assert_eq!(value["clientOnly"], json!(true));
    }

    #[test]
    fn break_session_reason_is_optional() {
        let with_reason =
            BreakSession::from_payload(&json!({"start": "2024-03-01T12:00:00Z", "reason": "lunch"}))
                .unwrap()
                .unwrap();
        assert_eq!(with_reason.reason.as_deref(), Some("lunch"));

        let without = BreakSession::from_payload(&json!({"start": "2024-03-01T12:00:00Z"}))
            .unwrap()
            .unwrap();
        assert!(without.reason.is_none());
    }

    #[test]
    fn break_reason_parses_case_insensitively() {
        assert_eq!("Lunch".parse::<BreakReason>(), Ok(BreakReason::Lunch));
        assert_eq!(" walk ".parse::<BreakReason>(), Ok(BreakReason::Walk));
        assert!("nap".parse::<BreakReason>().is_err());
    }

    #[test]
    fn calendar_event_decodes_conference() {
        let event: CalendarEvent = serde_json::from_value(json!({
            "summary": "Standup",
            "start": "2024-03-01T09:00:00Z",
            "end": "2024-03-01T09:15:00Z",
            "conference": {"entryPoints": [
                {"entryPointType": "phone", "uri": "tel:+1"},
                {"entryPointType": "video", "uri": "https://meet.example/abc"}
            ]}
        }))
        .unwrap();

        let conference = event.conference.expect("conference");
        assert_eq!(conference.entry_points.len(), 2);
        assert_eq!(conference.entry_points[1].entry_point_type, "video");
    }

    #[test]
    fn calendar_event_accepts_naive_times() {
        let event: CalendarEvent = serde_json::from_value(json!({
            "summary": "Planning",
            "start": "2024-03-01 14:00:00",
            "end": "2024-03-01T15:00:00.000000"
        }))
        .unwrap();

        assert_eq!(event.start, Utc.with_ymd_and_hms(2024, 3, 1, 14, 0, 0).unwrap());
        assert_eq!(event.end, Utc.with_ymd_and_hms(2024, 3, 1, 15, 0, 0).unwrap());
    }

    #[test]
    fn flexible_timestamp_accepts_text_seconds_and_millis() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        assert_eq!(
            parse_flexible_timestamp(&json!("2024-03-01T09:00:00Z")),
            Some(expected)
        );
        assert_eq!(
            parse_flexible_timestamp(&json!(expected.timestamp())),
            Some(expected)
        );
        assert_eq!(
            parse_flexible_timestamp(&json!(expected.timestamp_millis())),
            Some(expected)
        );
        assert_eq!(
            parse_flexible_timestamp(&json!("2024-03-01T09:00:00")),
            Some(expected)
        );
        assert_eq!(parse_flexible_timestamp(&json!(null)), None);
    }
}
