use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::limits::MINUTE_MS;

/// Unix milliseconds. The only time type inside the core.
pub type Ms = i64;

/// True iff `[a_start, a_end)` and `[b_start, b_end)` intersect.
/// Touching endpoints do not overlap.
pub fn overlaps(a_start: Ms, a_end: Ms, b_start: Ms, b_end: Ms) -> bool {
    a_start < b_end && b_start < a_end
}

/// Like [`overlaps`], with `b` widened by `buffer_minutes` on both sides.
pub fn overlaps_with_buffer(a_start: Ms, a_end: Ms, b_start: Ms, b_end: Ms, buffer_minutes: i64) -> bool {
    let buffer = buffer_minutes.saturating_mul(MINUTE_MS);
    Span { start: a_start, end: a_end }.overlaps_with_buffer(&Span { start: b_start, end: b_end }, buffer)
}

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// `None` unless `start < end`.
    pub fn try_new(start: Ms, end: Ms) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        overlaps(self.start, self.end, other.start, other.end)
    }

    /// `self` against `other` padded by `buffer_ms` on both boundaries.
    pub fn overlaps_with_buffer(&self, other: &Span, buffer_ms: Ms) -> bool {
        self.start < other.end.saturating_add(buffer_ms)
            && other.start.saturating_sub(buffer_ms) < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Intersection with `window`, if any time remains.
    pub fn clamp_to(&self, window: &Span) -> Option<Span> {
        Span::try_new(self.start.max(window.start), self.end.min(window.end))
    }
}

/// A bookable room. `email` is the resource mailbox the provider knows it by.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
    pub capacity: u32,
    #[serde(default)]
    pub features: BTreeSet<String>,
}

impl Room {
    pub fn new(id: impl Into<String>, name: impl Into<String>, email: Option<&str>, capacity: u32) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            email: email.map(str::to_owned),
            capacity,
            features: BTreeSet::new(),
        }
    }

    pub fn email_matches(&self, address: &str) -> bool {
        self.email
            .as_deref()
            .is_some_and(|e| e.trim().eq_ignore_ascii_case(address.trim()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendeeKind {
    Required,
    Optional,
    /// A physical resource such as a room.
    Resource,
}

impl AttendeeKind {
    /// Provider `type` strings; anything unknown counts as a person.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "resource" => AttendeeKind::Resource,
            "optional" => AttendeeKind::Optional,
            _ => AttendeeKind::Required,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AttendeeKind::Required => "required",
            AttendeeKind::Optional => "optional",
            AttendeeKind::Resource => "resource",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attendee {
    pub address: String,
    pub name: Option<String>,
    pub kind: AttendeeKind,
}

impl Attendee {
    pub fn required(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: None,
            kind: AttendeeKind::Required,
        }
    }

    pub fn resource(address: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: Some(name.into()),
            kind: AttendeeKind::Resource,
        }
    }
}

/// Where a canonical booking came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingSource {
    /// Created here and not (yet) confirmed by the provider.
    Local,
    /// Normalized from a provider event.
    Remote,
}

/// Per-booking synchronization state.
///
/// `LocalDraft` is a [`CandidateBooking`] that has not been accepted yet and
/// `Rejected` is terminal: the draft is discarded with an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncState {
    LocalDraft,
    LocalPendingSync,
    Synced,
    Rejected,
}

impl SyncState {
    pub fn can_transition_to(self, next: SyncState) -> bool {
        use SyncState::*;
        matches!(
            (self, next),
            (LocalDraft, LocalPendingSync)
                | (LocalDraft, Synced)
                | (LocalDraft, Rejected)
                | (LocalPendingSync, Synced)
                | (Synced, LocalPendingSync)
        )
    }
}

/// The canonical booking shape, regardless of origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: String,
    pub title: String,
    /// `None` while the provider event cannot be matched to a known room.
    pub room_id: Option<String>,
    /// Display name extracted from the event; kept even when unresolved.
    pub room_name: String,
    pub start: Ms,
    pub end: Ms,
    pub organizer: String,
    pub description: String,
    pub attendees: Vec<Attendee>,
    pub remote_event_id: Option<String>,
    pub source: BookingSource,
}

impl Booking {
    pub fn span(&self) -> Span {
        Span::new(self.start, self.end)
    }

    pub fn is_synced(&self) -> bool {
        self.remote_event_id.is_some()
    }

    pub fn sync_state(&self) -> SyncState {
        if self.is_synced() {
            SyncState::Synced
        } else {
            SyncState::LocalPendingSync
        }
    }

    /// The attendee entry standing for a room, if the event carries one.
    pub fn resource_attendee(&self) -> Option<&Attendee> {
        self.attendees.iter().find(|a| a.kind == AttendeeKind::Resource)
    }

    /// Turn an existing booking back into an editable candidate.
    pub fn to_candidate(&self) -> CandidateBooking {
        CandidateBooking {
            title: self.title.clone(),
            room_id: self.room_id.clone(),
            start: self.start,
            end: self.end,
            organizer: self.organizer.clone(),
            description: self.description.clone(),
            attendees: self
                .attendees
                .iter()
                .filter(|a| a.kind != AttendeeKind::Resource)
                .cloned()
                .collect(),
            exclude_id: Some(self.id.clone()),
        }
    }
}

/// Proposed booking handed to the conflict engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateBooking {
    pub title: String,
    pub room_id: Option<String>,
    pub start: Ms,
    pub end: Ms,
    pub organizer: String,
    pub description: String,
    pub attendees: Vec<Attendee>,
    /// Booking being edited; never conflicts with itself.
    pub exclude_id: Option<String>,
}

impl CandidateBooking {
    pub fn new(title: impl Into<String>, room_id: impl Into<String>, start: Ms, end: Ms) -> Self {
        Self {
            title: title.into(),
            room_id: Some(room_id.into()),
            start,
            end,
            ..Self::default()
        }
    }

    pub fn editing(mut self, id: impl Into<String>) -> Self {
        self.exclude_id = Some(id.into());
        self
    }

    pub fn span(&self) -> Option<Span> {
        Span::try_new(self.start, self.end)
    }
}

/// Room log record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoomEvent {
    Upserted(Room),
    Deleted { id: String },
}
