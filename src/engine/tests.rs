use super::*;
use crate::provider::memory::ProviderOp;
use crate::provider::{EmailAddress, EventDateTime, MemoryCalendarProvider, ProviderError, RawAttendee, RawLocation};
use crate::rooms::InMemoryRoomRepository;
use crate::session::StaticSession;

use std::time::Duration;

use chrono::NaiveDate;
use tokio_test::{assert_err, assert_ok};

const H: Ms = 3_600_000; // 1 hour in ms
const M: Ms = 60_000; // 1 minute in ms
const DAY: Ms = 1_728_950_400_000; // 2024-10-15T00:00:00Z

struct Fixture {
    engine: Arc<Engine>,
    provider: Arc<MemoryCalendarProvider>,
    session: Arc<StaticSession>,
}

fn maira() -> Identity {
    Identity {
        account_id: "acc-1".into(),
        display_name: "Maira Quintero".into(),
        email: "maira@fycotelecom.com".into(),
    }
}

fn fixture_with(options: EngineOptions) -> Fixture {
    let provider = Arc::new(MemoryCalendarProvider::new().with_organizer("Maira Quintero", "maira@fycotelecom.com"));
    let session = Arc::new(StaticSession::signed_in(maira(), "tok"));
    let rooms = Arc::new(InMemoryRoomRepository::with_defaults());
    let engine = Arc::new(Engine::new(provider.clone(), session.clone(), rooms, options));
    Fixture {
        engine,
        provider,
        session,
    }
}

fn fixture() -> Fixture {
    fixture_with(EngineOptions::default())
}

/// Maira may manage rooms.
fn admin_fixture() -> Fixture {
    fixture_with(EngineOptions {
        admins: ["maira@fycotelecom.com".to_owned()].into(),
        ..EngineOptions::default()
    })
}

/// Provider event in room `room_email` (resource attendee) at `[start, end)`.
fn remote(id: &str, room_email: Option<&str>, location: Option<&str>, start: Ms, end: Ms) -> RawEvent {
    RawEvent {
        id: id.into(),
        subject: Some(format!("evt {id}")),
        start: EventDateTime::utc(start).unwrap(),
        end: EventDateTime::utc(end).unwrap(),
        location: location.map(|name| RawLocation {
            display_name: Some(name.into()),
            email_address: None,
        }),
        attendees: room_email
            .map(|email| RawAttendee {
                email_address: EmailAddress {
                    address: Some(email.into()),
                    name: None,
                },
                kind: Some("resource".into()),
            })
            .into_iter()
            .collect(),
        organizer: None,
        show_as: Some("busy".into()),
        body: None,
        body_preview: None,
    }
}

const CONSEJO: &str = "consejo.tribu@fycotelecom.com";

fn candidate(room: &str, start: Ms, end: Ms) -> CandidateBooking {
    CandidateBooking::new("Planning", room, start, end)
}

fn ids(bookings: &[Booking]) -> Vec<&str> {
    bookings.iter().map(|b| b.id.as_str()).collect()
}

// ── Refresh ──────────────────────────────────────────────

#[tokio::test]
async fn refresh_normalizes_provider_events() {
    let f = fixture();
    f.provider.insert(remote("e1", Some(CONSEJO), None, DAY + 9 * H, DAY + 10 * H));
    f.provider.insert(remote("e2", None, Some("Plaza"), DAY + 11 * H, DAY + 12 * H));
    f.provider.insert(remote("e3", None, Some("Auditorio"), DAY + 8 * H, DAY + 9 * H));

    let bookings = f.engine.refresh().await.unwrap();
    assert_eq!(ids(&bookings), vec!["e3", "e1", "e2"]);
    assert_eq!(bookings[0].room_id, None);
    assert_eq!(bookings[1].room_id.as_deref(), Some("4"));
    assert_eq!(bookings[2].room_id.as_deref(), Some("5"));
    assert!(bookings.iter().all(|b| b.source == BookingSource::Remote && b.is_synced()));
    assert_eq!(f.engine.snapshot().await.version, 1);
}

#[tokio::test]
async fn refresh_without_identity_requires_auth() {
    let f = fixture();
    f.session.sign_out();
    let err = f.engine.refresh().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AuthRequired);
    assert_eq!(f.provider.calls(ProviderOp::List), 0);
}

#[tokio::test]
async fn refresh_provider_unauthorized_is_auth_required() {
    let f = fixture();
    f.provider
        .fail(ProviderOp::List, ProviderError::Unauthorized("401".into()));
    let err = f.engine.refresh().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AuthRequired);
}

#[tokio::test]
async fn refresh_keeps_local_only_bookings() {
    let f = fixture();
    let local = f.engine.save_local(candidate("1", DAY + 9 * H, DAY + 10 * H)).await.unwrap();
    f.provider.insert(remote("e1", Some(CONSEJO), None, DAY + 9 * H, DAY + 10 * H));

    let bookings = f.engine.refresh().await.unwrap();
    assert_eq!(bookings.len(), 2);
    assert!(bookings.iter().any(|b| b.id == local.id));

    // a second refresh with the provider emptied drops only remote state
    f.provider.remove("e1");
    let bookings = f.engine.refresh().await.unwrap();
    assert_eq!(ids(&bookings), vec![local.id.as_str()]);
}

#[tokio::test]
async fn refresh_skips_unusable_events_with_notice() {
    let f = fixture();
    let mut bad = remote("bad", Some(CONSEJO), None, DAY + 9 * H, DAY + 10 * H);
    bad.end = bad.start.clone();
    f.provider.insert(bad);
    f.provider.insert(remote("ok", Some(CONSEJO), None, DAY + 11 * H, DAY + 12 * H));

    let bookings = f.engine.refresh().await.unwrap();
    assert_eq!(ids(&bookings), vec!["ok"]);
    assert_eq!(f.engine.recent_notices(), vec![Notice::EventsSkipped { count: 1 }]);
}

#[tokio::test]
async fn newer_refresh_wins_when_it_completes_first() {
    let f = fixture();
    let r1 = f.engine.begin_refresh();
    let r2 = f.engine.begin_refresh();
    assert!(r2 > r1);

    let r1_events = vec![remote("old", Some(CONSEJO), None, DAY + 9 * H, DAY + 10 * H)];
    let r2_events = vec![remote("new", Some(CONSEJO), None, DAY + 14 * H, DAY + 15 * H)];

    assert!(f.engine.apply_refresh(r2, r2_events).await);
    assert!(!f.engine.apply_refresh(r1, r1_events).await);

    let snapshot = f.engine.snapshot().await;
    assert_eq!(ids(&snapshot.bookings), vec!["new"]);
    assert_eq!(snapshot.version, r2.sequence());
}

#[tokio::test]
async fn refresh_started_before_a_write_cannot_clobber_it() {
    let f = fixture();
    let ticket = f.engine.begin_refresh();
    let stale_listing = f
        .provider
        .list_events("tok", &crate::provider::EventFilter::default())
        .await
        .unwrap();

    let created = f.engine.upsert(candidate("4", DAY + 9 * H, DAY + 10 * H)).await.unwrap();
    assert!(!f.engine.apply_refresh(ticket, stale_listing).await);
    assert!(f.engine.booking(&created.id).await.is_some());
}

#[tokio::test]
async fn concurrent_refreshes_coalesce() {
    let f = fixture();
    f.provider.insert(remote("e1", Some(CONSEJO), None, DAY + 9 * H, DAY + 10 * H));
    f.provider.set_list_delay(Some(Duration::from_millis(100)));

    let (a, b) = tokio::join!(f.engine.refresh(), f.engine.refresh());
    assert_eq!(assert_ok!(a), assert_ok!(b));
    assert_eq!(f.provider.calls(ProviderOp::List), 1);
}

#[tokio::test]
async fn cancelled_refresh_applies_nothing() {
    let f = fixture();
    f.provider.insert(remote("e1", Some(CONSEJO), None, DAY + 9 * H, DAY + 10 * H));
    f.provider.set_list_delay(Some(Duration::from_millis(200)));

    let interest = CancellationToken::new();
    let canceller = interest.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        canceller.cancel();
    });

    let outcome = f.engine.refresh_guarded(&interest).await.unwrap();
    assert_eq!(outcome, None);
    assert!(f.engine.snapshot().await.is_empty());
    assert_eq!(f.engine.snapshot().await.version, 0);
}

// ── Upsert ───────────────────────────────────────────────

#[tokio::test]
async fn upsert_creates_remote_event_and_merges() {
    let f = fixture();
    let mut events = f.engine.subscribe();
    let mut c = candidate("4", DAY + 9 * H, DAY + 10 * H);
    c.description = "Q4 plan".into();
    c.attendees = vec![Attendee::required("luis@fycotelecom.com")];

    let booking = f.engine.upsert(c).await.unwrap();
    assert!(booking.is_synced());
    assert_eq!(booking.room_id.as_deref(), Some("4"));
    assert_eq!(booking.organizer, "Maira Quintero");
    assert_eq!(booking.description, "Q4 plan");

    let raw = f.provider.get(&booking.id).unwrap();
    assert_eq!(raw.location.and_then(|l| l.display_name).as_deref(), Some("Consejo de la Tribu"));
    assert_eq!(raw.attendees[0].kind(), AttendeeKind::Resource);
    assert_eq!(raw.attendees[0].email_address.address.as_deref(), Some(CONSEJO));
    assert_eq!(raw.attendees[1].email_address.address.as_deref(), Some("luis@fycotelecom.com"));

    assert_eq!(f.engine.bookings().await, vec![booking]);
    assert!(matches!(events.recv().await, Some(EngineEvent::SnapshotReplaced { bookings: 1, .. })));
}

#[tokio::test]
async fn room_scenario_nine_to_ten() {
    let f = fixture_with(EngineOptions {
        policy: ConflictPolicy::strict(),
        ..EngineOptions::default()
    });
    f.provider.insert(remote("b1", Some(CONSEJO), None, DAY + 9 * H, DAY + 10 * H));
    f.engine.refresh().await.unwrap();

    let err = assert_err!(f.engine.upsert(candidate("4", DAY + 9 * H + 30 * M, DAY + 10 * H + 30 * M)).await);
    assert_eq!(err, EngineError::Conflict { booking_id: "b1".into() });
    assert_eq!(err.kind(), ErrorKind::SchedulingConflict);
    assert_eq!(f.provider.calls(ProviderOp::Create), 0);

    assert_ok!(f.engine.upsert(candidate("4", DAY + 10 * H, DAY + 11 * H)).await);
}

#[tokio::test]
async fn default_buffer_blocks_back_to_back() {
    let f = fixture();
    f.provider.insert(remote("b1", Some(CONSEJO), None, DAY + 9 * H, DAY + 10 * H));
    f.engine.refresh().await.unwrap();

    let tight = candidate("4", DAY + 10 * H, DAY + 10 * H + 30 * M);
    assert!(!f.engine.is_room_free(&tight).await.unwrap());
    assert!(matches!(f.engine.upsert(tight).await, Err(EngineError::Conflict { .. })));

    let spaced = candidate("4", DAY + 10 * H + 10 * M, DAY + 11 * H);
    assert!(f.engine.is_room_free(&spaced).await.unwrap());
    assert_ok!(f.engine.upsert(spaced).await);
}

#[tokio::test]
async fn editing_updates_in_place_without_self_conflict() {
    let f = fixture();
    let original = f.engine.upsert(candidate("4", DAY + 9 * H, DAY + 10 * H)).await.unwrap();

    let mut edit = original.to_candidate();
    edit.start += 15 * M;
    edit.end += 15 * M;
    edit.title = "Planning (moved)".into();
    let edited = f.engine.upsert(edit).await.unwrap();

    assert_eq!(edited.id, original.id);
    assert_eq!(edited.title, "Planning (moved)");
    assert_eq!(f.provider.calls(ProviderOp::Update), 1);
    assert_eq!(f.provider.calls(ProviderOp::Create), 1);
    assert_eq!(f.engine.bookings().await.len(), 1);
}

#[tokio::test]
async fn editing_missing_booking_is_not_found() {
    let f = fixture();
    let c = candidate("4", DAY + 9 * H, DAY + 10 * H).editing("ghost");
    assert!(matches!(f.engine.upsert(c).await, Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn validation_runs_before_anything_remote() {
    let f = fixture();
    let err = f.engine.upsert(candidate("99", DAY + 9 * H, DAY + 10 * H)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationError);

    let err = f.engine.upsert(candidate("4", DAY + 10 * H, DAY + 9 * H)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationError);
    assert_eq!(f.provider.calls(ProviderOp::Create), 0);
}

#[tokio::test]
async fn provider_failure_leaves_snapshot_untouched() {
    let f = fixture();
    f.provider
        .fail(ProviderOp::Create, ProviderError::Unavailable("503".into()));
    let err = f.engine.upsert(candidate("4", DAY + 9 * H, DAY + 10 * H)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RemoteUnavailable);
    let snapshot = f.engine.snapshot().await;
    assert!(snapshot.is_empty());
    assert_eq!(snapshot.version, 0);
}

#[tokio::test]
async fn expired_token_requires_auth() {
    let f = fixture();
    f.session.expire_token();
    let err = f.engine.upsert(candidate("4", DAY + 9 * H, DAY + 10 * H)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AuthRequired);
}

// ── Local-only + resync ──────────────────────────────────

#[tokio::test]
async fn save_local_then_resync_replaces_placeholder() {
    let f = fixture();
    let local = f.engine.save_local(candidate("4", DAY + 9 * H, DAY + 10 * H)).await.unwrap();
    assert!(local.id.starts_with("local-"));
    assert_eq!(local.source, BookingSource::Local);
    assert_eq!(local.sync_state(), SyncState::LocalPendingSync);
    assert_eq!(local.organizer, "Maira Quintero");
    assert_eq!(f.engine.local_only().await.len(), 1);

    let synced = f.engine.resync(&local.id).await.unwrap();
    assert_eq!(synced.sync_state(), SyncState::Synced);
    assert!(f.engine.booking(&local.id).await.is_none());
    assert_eq!(ids(&f.engine.bookings().await), vec![synced.id.as_str()]);
    assert!(f.engine.local_only().await.is_empty());
}

#[tokio::test]
async fn save_local_is_conflict_checked() {
    let f = fixture();
    f.engine.save_local(candidate("4", DAY + 9 * H, DAY + 10 * H)).await.unwrap();
    assert!(matches!(
        f.engine.save_local(candidate("4", DAY + 9 * H + 30 * M, DAY + 11 * H)).await,
        Err(EngineError::Conflict { .. })
    ));
}

#[tokio::test]
async fn save_local_refuses_to_fork_synced_booking() {
    let f = fixture();
    let synced = f.engine.upsert(candidate("4", DAY + 9 * H, DAY + 10 * H)).await.unwrap();
    let err = f.engine.save_local(synced.to_candidate()).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

#[tokio::test]
async fn resync_refuses_busy_calendar() {
    let f = fixture();
    let local = f.engine.save_local(candidate("4", DAY + 9 * H, DAY + 10 * H)).await.unwrap();
    // something in another room, but on the organizer's own calendar
    f.provider.insert(remote("dentist", None, Some("Downtown"), DAY + 9 * H + 30 * M, DAY + 10 * H + 30 * M));

    let err = f.engine.resync(&local.id).await.unwrap_err();
    assert_eq!(err, EngineError::CalendarBusy { event_id: "dentist".into() });
    assert_eq!(f.provider.calls(ProviderOp::Create), 0);

    // free time on the calendar does not block
    let mut free = f.provider.remove("dentist").unwrap();
    free.show_as = Some("free".into());
    f.provider.insert(free);
    assert_ok!(f.engine.resync(&local.id).await);
}

#[tokio::test]
async fn resync_of_synced_booking_updates_own_event() {
    let f = fixture();
    let synced = f.engine.upsert(candidate("4", DAY + 9 * H, DAY + 10 * H)).await.unwrap();
    let again = f.engine.resync(&synced.id).await.unwrap();
    assert_eq!(again.id, synced.id);
    assert_eq!(f.provider.calls(ProviderOp::Update), 1);
}

#[tokio::test]
async fn bulk_resync_reports_each_booking() {
    let f = fixture();
    let a = f.engine.save_local(candidate("1", DAY + 9 * H, DAY + 10 * H)).await.unwrap();
    let b = f.engine.save_local(candidate("2", DAY + 12 * H, DAY + 13 * H)).await.unwrap();
    f.provider.insert(remote("busy", None, None, DAY + 9 * H, DAY + 9 * H + 30 * M));

    let reports = f.engine.resync_all_local().await;
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].id, a.id);
    assert!(matches!(reports[0].result, Err(EngineError::CalendarBusy { .. })));
    assert_eq!(reports[1].id, b.id);
    assert!(reports[1].result.is_ok());

    let missing = f.engine.bulk_resync(&["nope".to_string()]).await;
    assert!(matches!(missing[0].result, Err(EngineError::NotFound(_))));
}

// ── Remove ───────────────────────────────────────────────

#[tokio::test]
async fn remove_synced_deletes_remote_event() {
    let f = fixture();
    let booking = f.engine.upsert(candidate("4", DAY + 9 * H, DAY + 10 * H)).await.unwrap();
    let outcome = f.engine.remove(&booking.id).await.unwrap();
    assert_eq!(outcome.notice, None);
    assert!(f.provider.is_empty());
    assert!(f.engine.bookings().await.is_empty());
}

#[tokio::test]
async fn remote_delete_failure_still_removes_locally() {
    let f = fixture();
    let booking = f.engine.upsert(candidate("4", DAY + 9 * H, DAY + 10 * H)).await.unwrap();
    let mut events = f.engine.subscribe();
    f.provider
        .fail(ProviderOp::Delete, ProviderError::Unavailable("network down".into()));

    let outcome = f.engine.remove(&booking.id).await.unwrap();
    assert!(matches!(
        &outcome.notice,
        Some(Notice::RemoteDeleteFailed { booking_id, .. }) if booking_id == &booking.id
    ));
    assert!(f.engine.booking(&booking.id).await.is_none());
    assert_eq!(f.engine.recent_notices().len(), 1);

    assert!(matches!(events.recv().await, Some(EngineEvent::SnapshotReplaced { bookings: 0, .. })));
    assert!(matches!(events.recv().await, Some(EngineEvent::Notice(Notice::RemoteDeleteFailed { .. }))));
}

#[tokio::test]
async fn remove_auth_failure_keeps_booking() {
    let f = fixture();
    let booking = f.engine.upsert(candidate("4", DAY + 9 * H, DAY + 10 * H)).await.unwrap();
    f.provider
        .fail(ProviderOp::Delete, ProviderError::Unauthorized("401".into()));

    let err = f.engine.remove(&booking.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AuthRequired);
    assert!(f.engine.booking(&booking.id).await.is_some());
}

#[tokio::test]
async fn remove_local_only_never_calls_provider() {
    let f = fixture();
    let local = f.engine.save_local(candidate("4", DAY + 9 * H, DAY + 10 * H)).await.unwrap();
    f.session.sign_out();
    assert_ok!(f.engine.remove(&local.id).await);
    assert_eq!(f.provider.calls(ProviderOp::Delete), 0);
    assert!(matches!(f.engine.remove(&local.id).await, Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn notices_are_bounded() {
    let f = fixture();
    f.provider
        .fail(ProviderOp::Delete, ProviderError::Unavailable("down".into()));
    for i in 0..(crate::limits::MAX_NOTICES as i64 + 3) {
        let start = DAY + 6 * H + i * 20 * M;
        let b = f.engine.upsert(candidate("1", start, start + 5 * M)).await.unwrap();
        f.engine.remove(&b.id).await.unwrap();
    }
    assert_eq!(f.engine.recent_notices().len(), crate::limits::MAX_NOTICES);
}

// ── Queries, grid, rooms ─────────────────────────────────

#[tokio::test]
async fn provider_overlaps_surface_as_collisions() {
    let f = fixture();
    f.provider.insert(remote("a", Some(CONSEJO), None, DAY + 9 * H, DAY + 10 * H));
    f.provider.insert(remote("b", Some(CONSEJO), None, DAY + 9 * H + 30 * M, DAY + 10 * H + 30 * M));
    f.provider.insert(remote("c", None, Some("Plaza"), DAY + 9 * H, DAY + 10 * H));
    f.engine.refresh().await.unwrap();

    assert_eq!(f.engine.collisions().await, vec![("a".to_string(), "b".to_string())]);

    let grid = f.engine.day_grid(NaiveDate::from_ymd_opt(2024, 10, 15).unwrap()).await;
    assert_eq!(grid.len(), 5);
    assert!(grid["4"].iter().all(|e| e.collides));
    assert_eq!(grid["5"].len(), 1);
    assert!(!grid["5"][0].collides);
}

#[tokio::test]
async fn filters_by_room_and_organizer() {
    let f = fixture();
    let mine = f.engine.upsert(candidate("4", DAY + 9 * H, DAY + 10 * H)).await.unwrap();
    let mut other = remote("other", None, Some("Plaza"), DAY + 9 * H, DAY + 10 * H);
    other.organizer = Some(crate::provider::RawOrganizer {
        email_address: EmailAddress {
            address: Some("luis@fycotelecom.com".into()),
            name: Some("Luis".into()),
        },
    });
    f.provider.insert(other);
    f.engine.refresh().await.unwrap();

    assert_eq!(ids(&f.engine.bookings_for_room("4").await), vec![mine.id.as_str()]);
    assert_eq!(ids(&f.engine.bookings_for_organizer("luis").await), vec!["other"]);
    assert_eq!(f.engine.bookings_for_organizer("MAIRA QUINTERO").await.len(), 1);
}

#[tokio::test]
async fn new_room_resolves_existing_bookings() {
    let f = admin_fixture();
    f.provider.insert(remote("e1", None, Some("Auditorio"), DAY + 9 * H, DAY + 10 * H));
    f.engine.refresh().await.unwrap();
    assert_eq!(f.engine.booking("e1").await.unwrap().room_id, None);

    let room = f
        .engine
        .upsert_room(Room::new("6", "Auditorio Central", Some("auditorio@fycotelecom.com"), 80))
        .await
        .unwrap();
    assert_eq!(f.engine.booking("e1").await.unwrap().room_id, Some(room.id.clone()));
    assert_eq!(f.engine.rooms().len(), 6);

    f.engine.delete_room(&room.id).await.unwrap();
    assert_eq!(f.engine.booking("e1").await.unwrap().room_id, None);
}

#[tokio::test]
async fn room_changes_need_an_admin() {
    let f = fixture();
    assert!(!f.engine.is_admin());
    let err = f
        .engine
        .upsert_room(Room::new("6", "Terraza", None, 10))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
    assert_err!(f.engine.delete_room("1").await);
    assert_eq!(f.engine.rooms().len(), 5);

    let f = admin_fixture();
    assert!(f.engine.is_admin());
    assert_ok!(f.engine.delete_room("1").await);

    // admin email matches regardless of case
    f.session.sign_in(
        Identity {
            email: "MAIRA@FycoTelecom.com".into(),
            ..maira()
        },
        "tok",
    );
    assert_ok!(f.engine.upsert_room(Room::new("6", "Terraza", None, 10)).await);

    f.session.sign_out();
    let err = f.engine.delete_room("6").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AuthRequired);
    assert_eq!(f.engine.rooms().len(), 5);
}

#[tokio::test]
async fn search_and_stats_over_the_snapshot() {
    let f = fixture();
    f.engine.upsert(candidate("4", DAY + 9 * H, DAY + 10 * H)).await.unwrap();
    f.engine.upsert(candidate("4", DAY + 14 * H, DAY + 15 * H + 30 * M)).await.unwrap();
    let mut retro = candidate("5", DAY + 33 * H, DAY + 34 * H);
    retro.title = "Retro".into();
    f.engine.save_local(retro).await.unwrap();

    let all = f.engine.search(&BookingFilter::default()).await;
    assert_eq!(all.len(), 3);
    assert!(all.windows(2).all(|w| w[0].start <= w[1].start));

    let today = NaiveDate::from_ymd_opt(2024, 10, 15).unwrap();
    assert_eq!(f.engine.search(&BookingFilter::default().on(today)).await.len(), 2);
    assert_eq!(f.engine.search(&BookingFilter::default().room("5")).await.len(), 1);
    let found = f.engine.search(&BookingFilter::default().text("consejo")).await;
    assert_eq!(found.len(), 2);
    assert!(found.iter().all(|b| b.room_id.as_deref() == Some("4")));
    assert!(f.engine.search(&BookingFilter::default().text("retro").on(today)).await.is_empty());

    let stats = f.engine.stats().await;
    assert_eq!(stats.total_bookings, 3);
    assert_eq!(stats.top_room.as_ref().map(|t| (t.name.as_str(), t.count)), Some(("Consejo de la Tribu", 2)));
    assert_eq!(stats.booked_ms, 3 * H + 30 * M);
    assert_eq!(stats.booked_hours(), 4);
}

// ── Session ──────────────────────────────────────────────

async fn next_snapshot(events: &mut crate::notify::Subscription<EngineEvent>) -> usize {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("engine event in time")
            .expect("hub alive");
        if let EngineEvent::SnapshotReplaced { bookings, .. } = event {
            return bookings;
        }
    }
}

#[tokio::test]
async fn session_events_drive_refresh_and_clear() {
    let f = fixture();
    f.session.sign_out();
    f.provider.insert(remote("e1", Some(CONSEJO), None, DAY + 9 * H, DAY + 10 * H));

    let mut events = f.engine.subscribe();
    let interest = CancellationToken::new();
    let watcher = f.engine.watch_session(interest.clone());
    assert_eq!(f.session.subscriber_count(), 1);

    f.session.sign_in(maira(), "tok");
    assert_eq!(next_snapshot(&mut events).await, 1);

    f.session.sign_out();
    assert_eq!(next_snapshot(&mut events).await, 0);

    interest.cancel();
    watcher.await.unwrap();
    assert_eq!(f.session.subscriber_count(), 0);
}
