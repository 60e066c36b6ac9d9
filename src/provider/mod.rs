//! Remote calendar provider port and the raw event shapes it speaks.

pub mod graph;
pub mod memory;

pub use graph::GraphCalendarProvider;
pub use memory::MemoryCalendarProvider;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::model::{AttendeeKind, Ms};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// 401/403: the token is missing, expired or lacks scope.
    Unauthorized(String),
    /// Network failure or a non-success status.
    Unavailable(String),
    InvalidResponse(String),
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderError::Unauthorized(msg) => write!(f, "unauthorized: {msg}"),
            ProviderError::Unavailable(msg) => write!(f, "unavailable: {msg}"),
            ProviderError::InvalidResponse(msg) => write!(f, "invalid response: {msg}"),
        }
    }
}

impl std::error::Error for ProviderError {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailAddress {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDateTime {
    pub date_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

impl EventDateTime {
    /// UTC wall time, the shape outgoing events use.
    pub fn utc(ms: Ms) -> Option<Self> {
        let dt = DateTime::<Utc>::from_timestamp_millis(ms)?;
        Some(Self {
            date_time: dt.format("%Y-%m-%dT%H:%M:%S").to_string(),
            time_zone: Some("UTC".into()),
        })
    }

    /// Resolve to Unix ms. Offsets in the string win; otherwise the value is
    /// wall time in `timeZone`, falling back to `fallback` for unknown zones.
    pub fn to_ms(&self, fallback: Tz) -> Option<Ms> {
        let raw = self.date_time.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.timestamp_millis());
        }
        let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M"))
            .ok()?;
        let tz = self
            .time_zone
            .as_deref()
            .and_then(|name| name.trim().parse::<Tz>().ok())
            .unwrap_or(fallback);
        // DST gaps have no local mapping; ambiguous times take the earlier instant.
        tz.from_local_datetime(&naive)
            .earliest()
            .map(|dt| dt.timestamp_millis())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLocation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_address: Option<EmailAddress>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAttendee {
    #[serde(default)]
    pub email_address: EmailAddress,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl RawAttendee {
    pub fn kind(&self) -> AttendeeKind {
        self.kind.as_deref().map_or(AttendeeKind::Required, AttendeeKind::parse)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawOrganizer {
    #[serde(default)]
    pub email_address: EmailAddress,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default)]
    pub content: String,
}

/// A provider event as the calendar API returns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEvent {
    pub id: String,
    #[serde(default)]
    pub subject: Option<String>,
    pub start: EventDateTime,
    pub end: EventDateTime,
    #[serde(default)]
    pub location: Option<RawLocation>,
    #[serde(default)]
    pub attendees: Vec<RawAttendee>,
    #[serde(default)]
    pub organizer: Option<RawOrganizer>,
    #[serde(default)]
    pub show_as: Option<String>,
    #[serde(default)]
    pub body: Option<ItemBody>,
    #[serde(default)]
    pub body_preview: Option<String>,
}

impl RawEvent {
    /// Free/busy semantics: a missing `showAs` counts as busy.
    pub fn is_busy(&self) -> bool {
        self.show_as
            .as_deref()
            .is_none_or(|s| !s.trim().eq_ignore_ascii_case("free"))
    }
}

/// Body sent on create/update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEventInput {
    pub subject: String,
    pub body: ItemBody,
    pub start: EventDateTime,
    pub end: EventDateTime,
    pub location: RawLocation,
    pub attendees: Vec<RawAttendee>,
    pub is_online_meeting: bool,
    pub is_reminder_on: bool,
    pub reminder_minutes_before_start: u32,
    pub categories: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFilter {
    /// Page size requested from the provider.
    pub top: u32,
    /// Only events starting at or after this instant.
    pub since: Option<Ms>,
}

impl Default for EventFilter {
    fn default() -> Self {
        Self {
            top: crate::limits::DEFAULT_LIST_TOP,
            since: None,
        }
    }
}

/// The calendar operations the core depends on. Every call carries the
/// bearer token obtained from the session provider.
#[async_trait]
pub trait CalendarProvider: Send + Sync {
    async fn list_events(&self, token: &str, filter: &EventFilter) -> Result<Vec<RawEvent>, ProviderError>;

    async fn create_event(&self, token: &str, input: &RawEventInput) -> Result<RawEvent, ProviderError>;

    async fn update_event(&self, token: &str, id: &str, input: &RawEventInput) -> Result<RawEvent, ProviderError>;

    async fn delete_event(&self, token: &str, id: &str) -> Result<(), ProviderError>;

    /// Everything on the user's calendar intersecting `[start, end)`.
    async fn list_events_in_range(&self, token: &str, start: Ms, end: Ms) -> Result<Vec<RawEvent>, ProviderError>;
}
