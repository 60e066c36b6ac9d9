//! Day × room layout of bookings for a vertical timeline.

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use chrono_tz::Tz;
use serde::Serialize;

use crate::limits::MINUTE_MS;
use crate::model::*;

/// Grid geometry. Hours are local to `time_zone`; `end_hour` is exclusive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridLayout {
    pub time_zone: Tz,
    pub start_hour: u32,
    pub end_hour: u32,
    /// Vertical units per hour.
    pub hour_height: f64,
}

impl Default for GridLayout {
    fn default() -> Self {
        Self {
            time_zone: Tz::UTC,
            start_hour: 6,
            end_hour: 20,
            hour_height: 80.0,
        }
    }
}

const SLOT_MINUTES: i64 = 30;

fn local_to_utc_ms(tz: Tz, local: NaiveDateTime) -> Ms {
    tz.from_local_datetime(&local)
        .earliest()
        .unwrap_or_else(|| tz.from_utc_datetime(&local))
        .timestamp_millis()
}

impl GridLayout {
    /// `[start_hour, end_hour)` of `day`, as instants.
    pub fn visible_window(&self, day: NaiveDate) -> Option<Span> {
        let at = |hour: u32| {
            let midnight = day.and_time(NaiveTime::MIN);
            local_to_utc_ms(self.time_zone, midnight + Duration::hours(i64::from(hour)))
        };
        Span::try_new(at(self.start_hour), at(self.end_hour))
    }

    /// Total height of the visible window.
    pub fn total_height(&self) -> f64 {
        f64::from(self.end_hour.saturating_sub(self.start_hour)) * self.hour_height
    }

    /// Local calendar day an instant falls on.
    pub fn local_day(&self, t: Ms) -> Option<NaiveDate> {
        self.time_zone
            .timestamp_millis_opt(t)
            .single()
            .map(|dt| dt.date_naive())
    }

    fn offset_of(&self, window: &Span, t: Ms) -> f64 {
        (t - window.start) as f64 / MINUTE_MS as f64 / 60.0 * self.hour_height
    }

    /// Start instant for a click at `offset`, rounded to the nearest half hour
    /// and kept inside the window.
    pub fn slot_at(&self, day: NaiveDate, offset: f64) -> Option<Ms> {
        let window = self.visible_window(day)?;
        if !offset.is_finite() || self.hour_height <= 0.0 {
            return None;
        }
        let last_slot = (window.duration_ms() / MINUTE_MS - SLOT_MINUTES).max(0);
        // Clamp in float space: huge offsets would saturate the cast.
        let minutes = (offset / self.hour_height * 60.0).floor().clamp(0.0, last_slot as f64);
        let snapped = ((minutes / SLOT_MINUTES as f64).round() as i64) * SLOT_MINUTES;
        Some(window.start + snapped.min(last_slot) * MINUTE_MS)
    }
}

/// A booking placed in its room column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionedEvent {
    pub booking_id: String,
    pub title: String,
    pub organizer: String,
    pub start: Ms,
    pub end: Ms,
    pub top: f64,
    pub height: f64,
    /// Starts before the visible window.
    pub clipped_start: bool,
    /// Ends after the visible window.
    pub clipped_end: bool,
    /// Overlaps another event in the same column.
    pub collides: bool,
}

/// Lay out `bookings` for `day`. Every room gets a column, possibly empty.
/// Bookings without a room, on another local day or entirely outside the
/// visible hours are left out. Overlaps are flagged, never rearranged.
pub fn project(
    bookings: &[Booking],
    rooms: &[Room],
    day: NaiveDate,
    layout: &GridLayout,
) -> BTreeMap<String, Vec<PositionedEvent>> {
    let mut columns: BTreeMap<String, Vec<PositionedEvent>> =
        rooms.iter().map(|r| (r.id.clone(), Vec::new())).collect();
    let Some(window) = layout.visible_window(day) else {
        return columns;
    };

    let mut ordered: Vec<&Booking> = bookings.iter().collect();
    ordered.sort_by_key(|b| b.start);

    for booking in ordered {
        let Some(room_id) = booking.room_id.as_deref() else {
            continue;
        };
        let Some(column) = columns.get_mut(room_id) else {
            continue;
        };
        if layout.local_day(booking.start) != Some(day) {
            continue;
        }
        let Some(visible) = booking.span().clamp_to(&window) else {
            continue;
        };
        column.push(PositionedEvent {
            booking_id: booking.id.clone(),
            title: booking.title.clone(),
            organizer: booking.organizer.clone(),
            start: booking.start,
            end: booking.end,
            top: layout.offset_of(&window, visible.start),
            height: layout.offset_of(&window, visible.end) - layout.offset_of(&window, visible.start),
            clipped_start: booking.start < window.start,
            clipped_end: booking.end > window.end,
            collides: false,
        });
    }

    for column in columns.values_mut() {
        for i in 0..column.len() {
            for j in i + 1..column.len() {
                if column[j].start >= column[i].end {
                    break;
                }
                if overlaps(column[i].start, column[i].end, column[j].start, column[j].end) {
                    column[i].collides = true;
                    column[j].collides = true;
                }
            }
        }
    }
    columns
}
