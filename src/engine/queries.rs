use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;

use crate::model::*;
use crate::observability::COLLISIONS_DETECTED;

use super::conflict::{check_conflict, collisions, validate_candidate};
use super::grid::{PositionedEvent, project};
use super::report::{BookingFilter, UsageStats, usage_stats};
use super::{Engine, EngineError, Notice, Snapshot};

impl Engine {
    /// The published snapshot. Cheap: readers share it.
    pub async fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&*self.snapshot.read().await)
    }

    pub async fn bookings(&self) -> Vec<Booking> {
        self.snapshot().await.bookings.clone()
    }

    pub async fn booking(&self, id: &str) -> Option<Booking> {
        self.snapshot().await.get(id).cloned()
    }

    pub async fn bookings_for_room(&self, room_id: &str) -> Vec<Booking> {
        self.snapshot()
            .await
            .bookings
            .iter()
            .filter(|b| b.room_id.as_deref() == Some(room_id))
            .cloned()
            .collect()
    }

    /// Bookings whose organizer matches `organizer`, ignoring case.
    pub async fn bookings_for_organizer(&self, organizer: &str) -> Vec<Booking> {
        let wanted = organizer.trim().to_lowercase();
        self.snapshot()
            .await
            .bookings
            .iter()
            .filter(|b| b.organizer.trim().to_lowercase() == wanted)
            .cloned()
            .collect()
    }

    /// Bookings matching `filter`, by start time. Days are local to the grid's time zone.
    pub async fn search(&self, filter: &BookingFilter) -> Vec<Booking> {
        let tz = self.options.layout.time_zone;
        let mut found: Vec<Booking> = self
            .snapshot()
            .await
            .bookings
            .iter()
            .filter(|b| filter.matches(b, tz))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.id.cmp(&b.id)));
        found
    }

    pub async fn stats(&self) -> UsageStats {
        usage_stats(&self.snapshot().await.bookings)
    }

    /// Whether the signed-in account may manage rooms.
    pub fn is_admin(&self) -> bool {
        self.session
            .active_identity()
            .is_some_and(|identity| self.options.is_admin(&identity.email))
    }

    /// Bookings not (yet) on the provider.
    pub async fn local_only(&self) -> Vec<Booking> {
        self.snapshot().await.local_only().cloned().collect()
    }

    /// Whether `candidate` could be booked right now.
    pub async fn is_room_free(&self, candidate: &CandidateBooking) -> Result<bool, EngineError> {
        validate_candidate(candidate)?;
        let snapshot = self.snapshot().await;
        Ok(!check_conflict(candidate, &snapshot.bookings, &self.options.policy))
    }

    /// Same-room pairs that break the buffer policy, provider-sourced ones included.
    pub async fn collisions(&self) -> Vec<(String, String)> {
        let found = collisions(&self.snapshot().await.bookings, &self.options.policy);
        metrics::gauge!(COLLISIONS_DETECTED).set(found.len() as f64);
        found
    }

    pub async fn day_grid(&self, day: NaiveDate) -> BTreeMap<String, Vec<PositionedEvent>> {
        let rooms = self.rooms.list();
        project(&self.snapshot().await.bookings, &rooms, day, &self.options.layout)
    }

    /// Most recent notices, oldest first.
    pub fn recent_notices(&self) -> Vec<Notice> {
        self.notices()
    }

    pub fn rooms(&self) -> Vec<Room> {
        self.rooms.list()
    }

    pub fn room(&self, id: &str) -> Option<Room> {
        self.rooms.get(id)
    }
}
