use crate::limits::*;
use crate::model::*;

use super::EngineError;

/// How much padding separates two bookings of the same room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConflictPolicy {
    pub buffer_ms: Ms,
}

impl Default for ConflictPolicy {
    fn default() -> Self {
        Self {
            buffer_ms: DEFAULT_BUFFER_MS,
        }
    }
}

impl ConflictPolicy {
    /// Back-to-back bookings allowed.
    pub fn strict() -> Self {
        Self { buffer_ms: 0 }
    }

    /// Clamped to `[0, MAX_BUFFER_MS]`.
    pub fn with_buffer_minutes(minutes: i64) -> Self {
        Self {
            buffer_ms: minutes.saturating_mul(MINUTE_MS).clamp(0, MAX_BUFFER_MS),
        }
    }

    pub fn buffer_minutes(&self) -> i64 {
        self.buffer_ms / MINUTE_MS
    }
}

/// First booking in `existing` that blocks `candidate`, if any.
///
/// Only bookings of the candidate's room take part; unresolved bookings and
/// room-less candidates never conflict, and the booking being edited is
/// skipped.
pub fn find_conflict<'a>(
    candidate: &CandidateBooking,
    existing: &'a [Booking],
    policy: &ConflictPolicy,
) -> Option<&'a Booking> {
    let room_id = candidate.room_id.as_deref()?;
    let span = candidate.span()?;
    existing.iter().find(|b| {
        b.room_id.as_deref() == Some(room_id)
            && candidate.exclude_id.as_deref() != Some(b.id.as_str())
            && span.overlaps_with_buffer(&b.span(), policy.buffer_ms)
    })
}

pub fn check_conflict(candidate: &CandidateBooking, existing: &[Booking], policy: &ConflictPolicy) -> bool {
    find_conflict(candidate, existing, policy).is_some()
}

/// Every pair of same-room bookings that violates `policy`, by id.
pub fn collisions(bookings: &[Booking], policy: &ConflictPolicy) -> Vec<(String, String)> {
    let mut by_room: Vec<&Booking> = bookings.iter().filter(|b| b.room_id.is_some()).collect();
    by_room.sort_by(|a, b| (&a.room_id, a.start, &a.id).cmp(&(&b.room_id, b.start, &b.id)));

    let mut pairs = Vec::new();
    for (i, a) in by_room.iter().enumerate() {
        for b in &by_room[i + 1..] {
            if b.room_id != a.room_id || b.start >= a.end.saturating_add(policy.buffer_ms) {
                break;
            }
            if a.span().overlaps_with_buffer(&b.span(), policy.buffer_ms) {
                pairs.push((a.id.clone(), b.id.clone()));
            }
        }
    }
    pairs
}

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_BOOKING_DURATION_MS {
        return Err(EngineError::LimitExceeded("booking longer than a day"));
    }
    Ok(())
}

/// Field checks run before any conflict or provider work.
pub fn validate_candidate(candidate: &CandidateBooking) -> Result<Span, EngineError> {
    if candidate.title.trim().is_empty() {
        return Err(EngineError::Validation("title is required".into()));
    }
    if candidate.title.len() > MAX_TITLE_LEN {
        return Err(EngineError::LimitExceeded("title too long"));
    }
    if candidate.room_id.as_deref().is_none_or(|r| r.trim().is_empty()) {
        return Err(EngineError::Validation("room is required".into()));
    }
    if candidate.description.len() > MAX_DESCRIPTION_LEN {
        return Err(EngineError::LimitExceeded("description too long"));
    }
    if candidate.attendees.len() > MAX_ATTENDEES {
        return Err(EngineError::LimitExceeded("too many attendees"));
    }
    if let Some(bad) = candidate.attendees.iter().find(|a| !a.address.contains('@')) {
        return Err(EngineError::Validation(format!("invalid attendee address: {}", bad.address)));
    }
    let span = candidate
        .span()
        .ok_or_else(|| EngineError::Validation("end must be after start".into()))?;
    validate_span(&span)?;
    Ok(span)
}
