//! Provider events to canonical bookings.
//!
//! Room resolution runs [`MATCH_RULES`] in order over a [`RoomHints`] record;
//! the first rule that finds a room wins. Unresolved rooms are not an error:
//! the booking keeps its display name with `room_id = None`.

use chrono_tz::Tz;
use tracing::{debug, warn};

use crate::model::*;
use crate::observability::{EVENTS_SKIPPED_TOTAL, ROOMS_UNRESOLVED_TOTAL};
use crate::provider::RawEvent;

/// Location text the provider uses when an event has no room.
pub const NO_ROOM_PLACEHOLDER: &str = "Sin sala";
/// Display name of a booking with no usable room information.
pub const UNSPECIFIED_ROOM: &str = "unspecified room";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    MissingId,
    BadTime { field: &'static str, value: String },
    EmptyRange { start: Ms, end: Ms },
}

impl std::fmt::Display for NormalizeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NormalizeError::MissingId => write!(f, "event has no id"),
            NormalizeError::BadTime { field, value } => write!(f, "unparsable {field} time: {value}"),
            NormalizeError::EmptyRange { start, end } => write!(f, "end {end} is not after start {start}"),
        }
    }
}

impl std::error::Error for NormalizeError {}

fn non_empty(s: Option<&str>) -> Option<String> {
    s.map(str::trim).filter(|s| !s.is_empty()).map(str::to_owned)
}

/// Everything an event says about its room, with blanks folded to `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomHints {
    pub resource_email: Option<String>,
    pub resource_name: Option<String>,
    pub location_email: Option<String>,
    pub location_name: Option<String>,
}

impl RoomHints {
    pub fn from_event(raw: &RawEvent) -> Self {
        let resource = raw
            .attendees
            .iter()
            .find(|a| a.kind() == AttendeeKind::Resource);
        let location = raw.location.as_ref();
        Self {
            resource_email: non_empty(resource.and_then(|a| a.email_address.address.as_deref())),
            resource_name: non_empty(resource.and_then(|a| a.email_address.name.as_deref())),
            location_email: non_empty(
                location
                    .and_then(|l| l.email_address.as_ref())
                    .and_then(|e| e.address.as_deref()),
            ),
            location_name: non_empty(location.and_then(|l| l.display_name.as_deref())),
        }
    }

    /// Hints recovered from an already-canonical booking.
    pub fn from_booking(booking: &Booking) -> Self {
        let resource = booking.resource_attendee();
        Self {
            resource_email: non_empty(resource.map(|a| a.address.as_str())),
            resource_name: non_empty(resource.and_then(|a| a.name.as_deref())),
            location_email: None,
            location_name: non_empty(Some(booking.room_name.as_str())).filter(|n| n != UNSPECIFIED_ROOM),
        }
    }

    /// Resource attendee name, then the location unless it is the
    /// "no room" placeholder, then [`UNSPECIFIED_ROOM`].
    pub fn display_name(&self) -> String {
        self.resource_name
            .clone()
            .or_else(|| {
                self.location_name
                    .clone()
                    .filter(|n| n != NO_ROOM_PLACEHOLDER)
            })
            .unwrap_or_else(|| UNSPECIFIED_ROOM.to_owned())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchRule {
    ResourceEmail,
    LocationEmail,
    ExactName,
    NameContains,
}

pub const MATCH_RULES: [MatchRule; 4] = [
    MatchRule::ResourceEmail,
    MatchRule::LocationEmail,
    MatchRule::ExactName,
    MatchRule::NameContains,
];

impl MatchRule {
    pub fn apply<'a>(&self, hints: &RoomHints, rooms: &'a [Room]) -> Option<&'a Room> {
        match self {
            MatchRule::ResourceEmail => match_email(hints.resource_email.as_deref(), rooms),
            MatchRule::LocationEmail => match_email(hints.location_email.as_deref(), rooms),
            MatchRule::ExactName => match_exact_name(&hints.display_name(), rooms),
            MatchRule::NameContains => match_name_contains(&hints.display_name(), rooms),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MatchRule::ResourceEmail => "resource_email",
            MatchRule::LocationEmail => "location_email",
            MatchRule::ExactName => "exact_name",
            MatchRule::NameContains => "name_contains",
        }
    }
}

pub fn match_email<'a>(address: Option<&str>, rooms: &'a [Room]) -> Option<&'a Room> {
    let address = address?;
    rooms.iter().find(|r| r.email_matches(address))
}

fn matchable_name(name: &str) -> Option<&str> {
    let name = name.trim();
    (!name.is_empty() && name != UNSPECIFIED_ROOM && name != NO_ROOM_PLACEHOLDER).then_some(name)
}

pub fn match_exact_name<'a>(name: &str, rooms: &'a [Room]) -> Option<&'a Room> {
    let name = matchable_name(name)?;
    rooms.iter().find(|r| r.name == name)
}

pub fn match_name_contains<'a>(name: &str, rooms: &'a [Room]) -> Option<&'a Room> {
    let name = matchable_name(name)?;
    rooms.iter().find(|r| r.name.contains(name))
}

/// Run the rules in priority order.
pub fn resolve_room<'a>(hints: &RoomHints, rooms: &'a [Room]) -> Option<(&'a Room, MatchRule)> {
    MATCH_RULES
        .iter()
        .find_map(|rule| rule.apply(hints, rooms).map(|room| (room, *rule)))
}

/// One provider event to a canonical `Remote` booking.
pub fn normalize_event(raw: &RawEvent, rooms: &[Room], fallback_tz: Tz) -> Result<Booking, NormalizeError> {
    if raw.id.trim().is_empty() {
        return Err(NormalizeError::MissingId);
    }
    let start = raw.start.to_ms(fallback_tz).ok_or_else(|| NormalizeError::BadTime {
        field: "start",
        value: raw.start.date_time.clone(),
    })?;
    let end = raw.end.to_ms(fallback_tz).ok_or_else(|| NormalizeError::BadTime {
        field: "end",
        value: raw.end.date_time.clone(),
    })?;
    if end <= start {
        return Err(NormalizeError::EmptyRange { start, end });
    }

    let hints = RoomHints::from_event(raw);
    let room_id = match resolve_room(&hints, rooms) {
        Some((room, rule)) => {
            debug!(event = %raw.id, room = %room.id, rule = rule.as_str(), "room resolved");
            Some(room.id.clone())
        }
        None => {
            metrics::counter!(ROOMS_UNRESOLVED_TOTAL).increment(1);
            debug!(event = %raw.id, name = %hints.display_name(), "room unresolved");
            None
        }
    };

    let organizer = raw
        .organizer
        .as_ref()
        .and_then(|o| non_empty(o.email_address.name.as_deref()).or_else(|| non_empty(o.email_address.address.as_deref())))
        .unwrap_or_default();
    let description = raw
        .body
        .as_ref()
        .map(|b| b.content.clone())
        .filter(|c| !c.is_empty())
        .or_else(|| raw.body_preview.clone())
        .unwrap_or_default();
    let attendees = raw
        .attendees
        .iter()
        .filter_map(|a| {
            let address = non_empty(a.email_address.address.as_deref())?;
            Some(Attendee {
                address,
                name: non_empty(a.email_address.name.as_deref()),
                kind: a.kind(),
            })
        })
        .collect();

    Ok(Booking {
        id: raw.id.clone(),
        title: raw.subject.clone().unwrap_or_default(),
        room_id,
        room_name: hints.display_name(),
        start,
        end,
        organizer,
        description,
        attendees,
        remote_event_id: Some(raw.id.clone()),
        source: BookingSource::Remote,
    })
}

/// Normalize a listing, dropping events that cannot be placed in time.
pub fn normalize_all(raw: &[RawEvent], rooms: &[Room], fallback_tz: Tz) -> Vec<Booking> {
    raw.iter()
        .filter_map(|event| match normalize_event(event, rooms, fallback_tz) {
            Ok(booking) => Some(booking),
            Err(e) => {
                metrics::counter!(EVENTS_SKIPPED_TOTAL).increment(1);
                warn!(event = %event.id, error = %e, "skipping provider event");
                None
            }
        })
        .collect()
}

/// Re-resolve the room of a canonical booking against `rooms`.
///
/// A `room_id` that still names a known room is kept, so applying this twice
/// gives the same booking as applying it once.
pub fn renormalize(booking: &Booking, rooms: &[Room]) -> Booking {
    let still_valid = booking
        .room_id
        .as_deref()
        .is_some_and(|id| rooms.iter().any(|r| r.id == id));
    if still_valid {
        return booking.clone();
    }
    let hints = RoomHints::from_booking(booking);
    let mut out = booking.clone();
    out.room_id = resolve_room(&hints, rooms).map(|(room, _)| room.id.clone());
    out
}
