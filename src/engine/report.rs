//! Admin views over a set of bookings: text/room/day search and usage totals.

use std::collections::BTreeMap;

use chrono::{NaiveDate, TimeZone};
use chrono_tz::Tz;
use serde::Serialize;

use crate::limits::HOUR_MS;
use crate::model::*;

use super::normalize::NO_ROOM_PLACEHOLDER;

pub const UNKNOWN_ORGANIZER: &str = "Anónimo";

/// Admin search. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingFilter {
    /// Case-insensitive substring of the title, organizer or room name.
    pub text: Option<String>,
    pub room_id: Option<String>,
    /// Local day the booking starts on.
    pub day: Option<NaiveDate>,
}

impl BookingFilter {
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn room(mut self, room_id: impl Into<String>) -> Self {
        self.room_id = Some(room_id.into());
        self
    }

    pub fn on(mut self, day: NaiveDate) -> Self {
        self.day = Some(day);
        self
    }

    pub fn matches(&self, booking: &Booking, tz: Tz) -> bool {
        if let Some(room_id) = &self.room_id
            && booking.room_id.as_ref() != Some(room_id)
        {
            return false;
        }
        if let Some(day) = self.day {
            let starts_on = tz.timestamp_millis_opt(booking.start).single().map(|dt| dt.date_naive());
            if starts_on != Some(day) {
                return false;
            }
        }
        let query = self.text.as_deref().map(str::trim).unwrap_or_default().to_lowercase();
        query.is_empty()
            || [&booking.title, &booking.organizer, &booking.room_name]
                .iter()
                .any(|field| field.to_lowercase().contains(&query))
    }
}

/// A name and how many bookings carry it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tally {
    pub name: String,
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UsageStats {
    pub total_bookings: usize,
    /// Most booked room by name; ties go to the name that sorts first.
    pub top_room: Option<Tally>,
    pub top_organizer: Option<Tally>,
    /// Sum of booking durations.
    pub booked_ms: Ms,
}

impl UsageStats {
    /// Booked time in whole hours, rounded half up.
    pub fn booked_hours(&self) -> i64 {
        (self.booked_ms + HOUR_MS / 2).div_euclid(HOUR_MS)
    }
}

fn top(counts: BTreeMap<&str, usize>) -> Option<Tally> {
    let mut best: Option<(&str, usize)> = None;
    for (name, count) in counts {
        if best.is_none_or(|(_, most)| count > most) {
            best = Some((name, count));
        }
    }
    best.map(|(name, count)| Tally {
        name: name.to_owned(),
        count,
    })
}

fn or_placeholder<'a>(value: &'a str, placeholder: &'static str) -> &'a str {
    let value = value.trim();
    if value.is_empty() { placeholder } else { value }
}

pub fn usage_stats(bookings: &[Booking]) -> UsageStats {
    let mut rooms: BTreeMap<&str, usize> = BTreeMap::new();
    let mut organizers: BTreeMap<&str, usize> = BTreeMap::new();
    let mut booked_ms: Ms = 0;
    for b in bookings {
        *rooms.entry(or_placeholder(&b.room_name, NO_ROOM_PLACEHOLDER)).or_default() += 1;
        *organizers.entry(or_placeholder(&b.organizer, UNKNOWN_ORGANIZER)).or_default() += 1;
        booked_ms = booked_ms.saturating_add(b.end - b.start);
    }
    UsageStats {
        total_bookings: bookings.len(),
        top_room: top(rooms),
        top_organizer: top(organizers),
        booked_ms,
    }
}
