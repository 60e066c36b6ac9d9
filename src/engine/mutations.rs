use ulid::Ulid;
use tracing::{info, warn};

use crate::model::*;
use crate::observability::*;
use crate::provider::{EmailAddress, EventDateTime, ItemBody, RawAttendee, RawEvent, RawEventInput, RawLocation};
use crate::session::Identity;

use super::conflict::{find_conflict, validate_candidate};
use super::normalize::{normalize_event, renormalize};
use super::{Engine, EngineError, ErrorKind, Notice};

/// Result of [`Engine::remove`]. `notice` is set when only the local copy went away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoveOutcome {
    pub removed: Booking,
    pub notice: Option<Notice>,
}

/// Per-booking result of a bulk resync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResyncReport {
    pub id: String,
    pub result: Result<Booking, EngineError>,
}

fn written(op: &'static str, status: &'static str) {
    metrics::counter!(BOOKINGS_WRITTEN_TOTAL, "op" => op, "status" => status).increment(1);
}

fn conflict_rejected(reason: &'static str) {
    metrics::counter!(CONFLICTS_REJECTED_TOTAL, "reason" => reason).increment(1);
}

impl Engine {
    fn room_for(&self, candidate: &CandidateBooking) -> Result<Room, EngineError> {
        let room_id = candidate
            .room_id
            .as_deref()
            .ok_or_else(|| EngineError::Validation("room is required".into()))?;
        self.rooms
            .get(room_id)
            .ok_or_else(|| EngineError::Validation(format!("unknown room: {room_id}")))
    }

    /// Outgoing provider event: room as location and resource attendee.
    fn event_input(&self, candidate: &CandidateBooking, room: &Room) -> Result<RawEventInput, EngineError> {
        let start = EventDateTime::utc(candidate.start)
            .ok_or(EngineError::LimitExceeded("timestamp out of range"))?;
        let end = EventDateTime::utc(candidate.end)
            .ok_or(EngineError::LimitExceeded("timestamp out of range"))?;

        let mut attendees = Vec::with_capacity(candidate.attendees.len() + 1);
        if let Some(email) = &room.email {
            attendees.push(RawAttendee {
                email_address: EmailAddress {
                    address: Some(email.clone()),
                    name: Some(room.name.clone()),
                },
                kind: Some(AttendeeKind::Resource.as_str().into()),
            });
        }
        attendees.extend(
            candidate
                .attendees
                .iter()
                .filter(|a| a.kind != AttendeeKind::Resource)
                .map(|a| RawAttendee {
                    email_address: EmailAddress {
                        address: Some(a.address.trim().to_owned()),
                        name: a.name.clone(),
                    },
                    kind: Some(a.kind.as_str().into()),
                }),
        );

        Ok(RawEventInput {
            subject: candidate.title.trim().to_owned(),
            body: ItemBody {
                content_type: Some("HTML".into()),
                content: candidate.description.clone(),
            },
            start,
            end,
            location: RawLocation {
                display_name: Some(room.name.clone()),
                email_address: None,
            },
            attendees,
            is_online_meeting: false,
            is_reminder_on: true,
            reminder_minutes_before_start: 15,
            categories: self.options.category.iter().cloned().collect(),
        })
    }

    /// Canonical booking for a provider response about `room`.
    fn confirmed(&self, raw: &RawEvent, room: &Room) -> Result<Booking, EngineError> {
        let rooms = self.rooms.list();
        let mut booking = normalize_event(raw, &rooms, self.options.layout.time_zone)
            .map_err(|e| EngineError::RemoteUnavailable(format!("provider returned an unusable event: {e}")))?;
        if booking.room_id.is_none() {
            booking.room_id = Some(room.id.clone());
            booking.room_name = room.name.clone();
        }
        Ok(booking)
    }

    /// Create or update on the provider. Updates go to `remote_id` when set.
    async fn push(
        &self,
        token: &str,
        remote_id: Option<&str>,
        input: &RawEventInput,
    ) -> Result<RawEvent, EngineError> {
        let result = match remote_id {
            Some(id) => self.provider.update_event(token, id, input).await,
            None => self.provider.create_event(token, input).await,
        };
        Ok(result?)
    }

    /// Validate, conflict-check and write a booking through the provider.
    ///
    /// With `exclude_id` set the named booking is edited: updated in place on
    /// the provider when it is synced, otherwise created there and the local
    /// placeholder replaced. Nothing changes locally if the provider fails.
    pub async fn upsert(&self, candidate: CandidateBooking) -> Result<Booking, EngineError> {
        let result = self.upsert_inner(candidate).await;
        written("upsert", status_label(&result));
        result
    }

    async fn upsert_inner(&self, candidate: CandidateBooking) -> Result<Booking, EngineError> {
        validate_candidate(&candidate)?;
        let room = self.room_for(&candidate)?;

        let _write = self.write_gate.lock().await;
        let snapshot = self.snapshot().await;
        let editing = match candidate.exclude_id.as_deref() {
            Some(id) => Some(
                snapshot
                    .get(id)
                    .cloned()
                    .ok_or_else(|| EngineError::NotFound(format!("booking {id}")))?,
            ),
            None => None,
        };
        if let Some(blocker) = find_conflict(&candidate, &snapshot.bookings, &self.options.policy) {
            conflict_rejected("room");
            return Err(EngineError::Conflict {
                booking_id: blocker.id.clone(),
            });
        }

        let (_, token) = self.credentials().await?;
        let input = self.event_input(&candidate, &room)?;
        let remote_id = editing.as_ref().and_then(|b| b.remote_event_id.as_deref());
        let raw = self.push(&token, remote_id, &input).await?;
        let booking = self.confirmed(&raw, &room)?;

        let mut remove: Vec<&str> = vec![booking.id.as_str()];
        if let Some(edited) = &editing {
            remove.push(edited.id.as_str());
        }
        let version = self.next_sequence();
        self.publish(version, |current| current.merged(version, &remove, Some(booking.clone())))
            .await;
        info!(booking = %booking.id, room = %room.id, edited = editing.is_some(), "booking written");
        Ok(booking)
    }

    /// Keep a booking locally when the provider cannot take it right now.
    /// It gets a `local-` id and can be pushed later with [`Engine::resync`].
    pub async fn save_local(&self, candidate: CandidateBooking) -> Result<Booking, EngineError> {
        let result = self.save_local_inner(candidate).await;
        written("save_local", status_label(&result));
        result
    }

    async fn save_local_inner(&self, candidate: CandidateBooking) -> Result<Booking, EngineError> {
        validate_candidate(&candidate)?;
        let room = self.room_for(&candidate)?;

        let _write = self.write_gate.lock().await;
        let snapshot = self.snapshot().await;
        if let Some(id) = candidate.exclude_id.as_deref() {
            let edited = snapshot
                .get(id)
                .ok_or_else(|| EngineError::NotFound(format!("booking {id}")))?;
            if edited.is_synced() {
                return Err(EngineError::Validation(
                    "synced bookings can only be edited through the provider".into(),
                ));
            }
        }
        if let Some(blocker) = find_conflict(&candidate, &snapshot.bookings, &self.options.policy) {
            conflict_rejected("room");
            return Err(EngineError::Conflict {
                booking_id: blocker.id.clone(),
            });
        }

        let organizer = match candidate.organizer.trim() {
            "" => self
                .session
                .active_identity()
                .map(|i| i.display_name)
                .unwrap_or_default(),
            name => name.to_owned(),
        };
        let mut attendees: Vec<Attendee> = room
            .email
            .iter()
            .map(|email| Attendee::resource(email.clone(), room.name.clone()))
            .collect();
        attendees.extend(candidate.attendees.iter().filter(|a| a.kind != AttendeeKind::Resource).cloned());

        let booking = Booking {
            id: format!("local-{}", Ulid::new()),
            title: candidate.title.trim().to_owned(),
            room_id: Some(room.id.clone()),
            room_name: room.name.clone(),
            start: candidate.start,
            end: candidate.end,
            organizer,
            description: candidate.description.clone(),
            attendees,
            remote_event_id: None,
            source: BookingSource::Local,
        };

        let remove: Vec<&str> = candidate.exclude_id.as_deref().into_iter().collect();
        let version = self.next_sequence();
        self.publish(version, |current| current.merged(version, &remove, Some(booking.clone())))
            .await;
        info!(booking = %booking.id, room = %room.id, "booking kept local-only");
        Ok(booking)
    }

    /// Delete a booking. Synced bookings are deleted on the provider first;
    /// if the provider is unreachable the local copy still goes away and a
    /// [`Notice::RemoteDeleteFailed`] is recorded. Auth failures abort.
    pub async fn remove(&self, id: &str) -> Result<RemoveOutcome, EngineError> {
        let result = self.remove_inner(id).await;
        written("remove", status_label(&result));
        result
    }

    async fn remove_inner(&self, id: &str) -> Result<RemoveOutcome, EngineError> {
        let _write = self.write_gate.lock().await;
        let snapshot = self.snapshot().await;
        let booking = snapshot
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("booking {id}")))?;

        let mut notice = None;
        if let Some(remote_id) = booking.remote_event_id.as_deref() {
            let deleted = match self.credentials().await {
                Ok((_, token)) => self
                    .provider
                    .delete_event(&token, remote_id)
                    .await
                    .map_err(EngineError::from),
                Err(e) => Err(e),
            };
            match deleted {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::RemoteUnavailable => {
                    metrics::counter!(REMOTE_DELETE_FAILURES_TOTAL).increment(1);
                    warn!(booking = %booking.id, error = %e, "remote delete failed, removing locally");
                    notice = Some(Notice::RemoteDeleteFailed {
                        booking_id: booking.id.clone(),
                        reason: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }

        let version = self.next_sequence();
        self.publish(version, |current| current.merged(version, &[id], None))
            .await;
        if let Some(n) = &notice {
            self.record_notice(n.clone());
        }
        info!(booking = %booking.id, remote_failed = notice.is_some(), "booking removed");
        Ok(RemoveOutcome {
            removed: booking,
            notice,
        })
    }

    /// Push one booking to the provider again.
    ///
    /// The organizer's own calendar must be free in the booking's range
    /// (the booking's own event aside) and the room check must still pass.
    pub async fn resync(&self, id: &str) -> Result<Booking, EngineError> {
        let result = self.resync_inner(id).await;
        written("resync", status_label(&result));
        result
    }

    async fn resync_inner(&self, id: &str) -> Result<Booking, EngineError> {
        let _write = self.write_gate.lock().await;
        let snapshot = self.snapshot().await;
        let booking = snapshot
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("booking {id}")))?;
        let candidate = booking.to_candidate();
        validate_candidate(&candidate)?;
        let room = self.room_for(&candidate)?;

        let (_, token) = self.credentials().await?;
        let busy = self
            .provider
            .list_events_in_range(&token, booking.start, booking.end)
            .await?;
        let own = booking.remote_event_id.as_deref();
        if let Some(event) = busy.iter().find(|e| e.is_busy() && Some(e.id.as_str()) != own) {
            conflict_rejected("calendar");
            return Err(EngineError::CalendarBusy {
                event_id: event.id.clone(),
            });
        }
        if let Some(blocker) = find_conflict(&candidate, &snapshot.bookings, &self.options.policy) {
            conflict_rejected("room");
            return Err(EngineError::Conflict {
                booking_id: blocker.id.clone(),
            });
        }

        let input = self.event_input(&candidate, &room)?;
        let raw = self.push(&token, own, &input).await?;
        let synced = self.confirmed(&raw, &room)?;

        let remove = [booking.id.as_str(), synced.id.as_str()];
        let version = self.next_sequence();
        self.publish(version, |current| current.merged(version, &remove, Some(synced.clone())))
            .await;
        info!(from = %booking.id, to = %synced.id, "booking resynced");
        Ok(synced)
    }

    /// Resync each id in order. A failure is reported and the rest continue.
    pub async fn bulk_resync(&self, ids: &[String]) -> Vec<ResyncReport> {
        let mut reports = Vec::with_capacity(ids.len());
        for id in ids {
            let result = self.resync(id).await;
            if let Err(e) = &result {
                warn!(booking = %id, error = %e, "resync failed");
            }
            reports.push(ResyncReport {
                id: id.clone(),
                result,
            });
        }
        reports
    }

    /// Resync every local-only booking.
    pub async fn resync_all_local(&self) -> Vec<ResyncReport> {
        let ids: Vec<String> = self.snapshot().await.local_only().map(|b| b.id.clone()).collect();
        self.bulk_resync(&ids).await
    }

    // ── Rooms ────────────────────────────────────────────────────

    /// Room changes are reserved to the configured admin accounts.
    fn require_admin(&self) -> Result<Identity, EngineError> {
        let identity = self
            .session
            .active_identity()
            .ok_or_else(|| EngineError::AuthRequired("no active account".into()))?;
        if !self.options.is_admin(&identity.email) {
            warn!(account = %identity.account_id, "room change refused, not an admin");
            return Err(EngineError::Forbidden(format!("{} cannot manage rooms", identity.email)));
        }
        Ok(identity)
    }

    pub async fn upsert_room(&self, room: Room) -> Result<Room, EngineError> {
        let admin = self.require_admin()?;
        let room = self.rooms.upsert(room)?;
        info!(account = %admin.account_id, room = %room.id, "room saved");
        self.renormalize_all().await;
        Ok(room)
    }

    pub async fn delete_room(&self, id: &str) -> Result<Room, EngineError> {
        let admin = self.require_admin()?;
        let room = self.rooms.delete(id)?;
        info!(account = %admin.account_id, room = %room.id, "room deleted");
        self.renormalize_all().await;
        Ok(room)
    }

    /// Re-resolve every booking's room after the room list changed.
    async fn renormalize_all(&self) {
        let rooms = self.rooms.list();
        let version = self.next_sequence();
        self.publish(version, |current| current.mapped(version, |b| renormalize(b, &rooms)))
            .await;
    }
}
