//! Booking export: a single-event iCalendar file and a CSV listing.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::engine::EngineError;
use crate::model::*;

const PRODID: &str = "-//roomsync//ES";
const UID_DOMAIN: &str = "roomsync";
/// RFC 5545 content lines are folded at 75 octets.
const ICS_LINE_OCTETS: usize = 75;

pub const CSV_HEADERS: [&str; 9] = [
    "id",
    "title",
    "organizer",
    "room",
    "start",
    "end",
    "status",
    "attendees",
    "remote_event_id",
];

fn utc(ms: Ms) -> Result<DateTime<Utc>, EngineError> {
    DateTime::from_timestamp_millis(ms).ok_or(EngineError::LimitExceeded("timestamp out of range"))
}

fn ics_stamp(ms: Ms) -> Result<String, EngineError> {
    Ok(utc(ms)?.format("%Y%m%dT%H%M%SZ").to_string())
}

/// TEXT value escaping. Newlines survive as `\n`.
fn ics_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.push_str("\\\\"),
            ';' => out.push_str("\\;"),
            ',' => out.push_str("\\,"),
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                out.push_str("\\n");
            }
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out
}

/// Fold a content line, never splitting a UTF-8 sequence.
fn fold(line: &str, out: &mut String) {
    let mut width = 0;
    for c in line.chars() {
        let len = c.len_utf8();
        if width + len > ICS_LINE_OCTETS {
            out.push_str("\r\n ");
            // continuation lines start with the space
            width = 1;
        }
        out.push(c);
        width += len;
    }
    out.push_str("\r\n");
}

/// One booking as a `VCALENDAR` holding a single `VEVENT`, CRLF-terminated.
///
/// The UID prefers the provider's event id so re-exports of the same event
/// collapse in calendar clients. `now` is the `DTSTAMP`.
pub fn build_ics(booking: &Booking, now: Ms) -> Result<String, EngineError> {
    let uid = booking.remote_event_id.as_deref().unwrap_or(&booking.id);
    let room = match booking.room_name.trim() {
        "" => crate::engine::normalize::NO_ROOM_PLACEHOLDER,
        name => name,
    };

    let mut lines = vec![
        "BEGIN:VCALENDAR".to_owned(),
        "VERSION:2.0".to_owned(),
        format!("PRODID:{PRODID}"),
        "CALSCALE:GREGORIAN".to_owned(),
        "METHOD:PUBLISH".to_owned(),
        "BEGIN:VEVENT".to_owned(),
        format!("UID:{}@{UID_DOMAIN}", ics_escape(uid)),
        format!("DTSTAMP:{}", ics_stamp(now)?),
        format!("DTSTART:{}", ics_stamp(booking.start)?),
        format!("DTEND:{}", ics_stamp(booking.end)?),
        format!("SUMMARY:{}", ics_escape(&booking.title)),
        format!("LOCATION:{}", ics_escape(room)),
    ];
    if !booking.description.is_empty() {
        lines.push(format!("DESCRIPTION:{}", ics_escape(&booking.description)));
    }
    lines.push("END:VEVENT".to_owned());
    lines.push("END:VCALENDAR".to_owned());

    let mut out = String::new();
    for line in &lines {
        fold(line, &mut out);
    }
    Ok(out)
}

fn csv_field(s: &str) -> String {
    if s.contains([',', '"', '\r', '\n']) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_owned()
    }
}

fn csv_time(ms: Ms) -> String {
    match utc(ms) {
        Ok(t) => t.to_rfc3339_opts(SecondsFormat::Millis, true),
        Err(_) => ms.to_string(),
    }
}

fn status(booking: &Booking) -> &'static str {
    match booking.sync_state() {
        SyncState::Synced => "synced",
        SyncState::LocalPendingSync => "pending_sync",
        SyncState::LocalDraft => "draft",
        SyncState::Rejected => "rejected",
    }
}

/// Bookings as RFC 4180 CSV with a header row. Rows end in CRLF; newlines
/// inside fields are kept, quoted.
pub fn build_csv(bookings: &[Booking]) -> String {
    let mut out = CSV_HEADERS.join(",");
    out.push_str("\r\n");
    for b in bookings {
        let attendees = b
            .attendees
            .iter()
            .filter(|a| a.kind != AttendeeKind::Resource)
            .map(|a| a.address.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        let row = [
            b.id.clone(),
            b.title.clone(),
            b.organizer.clone(),
            b.room_name.clone(),
            csv_time(b.start),
            csv_time(b.end),
            status(b).to_owned(),
            attendees,
            b.remote_event_id.clone().unwrap_or_default(),
        ];
        let fields: Vec<String> = row.iter().map(|f| csv_field(f)).collect();
        out.push_str(&fields.join(","));
        out.push_str("\r\n");
    }
    out
}
