use std::sync::Arc;

use chrono::NaiveDate;
use reqwest::{Client, Url};
use serde_json::{Value, json};
use wiremock::matchers::{body_partial_json, header, headers, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use roomsync::engine::{Engine, EngineError, EngineOptions, ErrorKind, Notice};
use roomsync::export::{build_csv, build_ics};
use roomsync::model::*;
use roomsync::provider::GraphCalendarProvider;
use roomsync::rooms::{RoomRepository, WalRoomRepository, default_rooms};
use roomsync::session::{Identity, StaticSession};

const H: Ms = 3_600_000;
const DAY: Ms = 1_728_950_400_000; // 2024-10-15T00:00:00Z

// ── Test infrastructure ──────────────────────────────────────

fn test_log_path(name: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join("roomsync_int_test");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn graph_event(id: &str, start: &str, end: &str, room: Option<(&str, &str)>) -> Value {
    let (location, attendees) = match room {
        Some((name, email)) => (
            json!({"displayName": name}),
            json!([{"emailAddress": {"address": email, "name": name}, "type": "resource"}]),
        ),
        None => (json!({"displayName": "Auditorio"}), json!([])),
    };
    json!({
        "id": id,
        "subject": format!("Meeting {id}"),
        "start": {"dateTime": start, "timeZone": "UTC"},
        "end": {"dateTime": end, "timeZone": "UTC"},
        "location": location,
        "attendees": attendees,
        "organizer": {"emailAddress": {"name": "Maira Quintero", "address": "maira@fycotelecom.com"}},
        "showAs": "busy",
        "bodyPreview": ""
    })
}

async fn start(name: &str) -> (MockServer, Arc<Engine>) {
    let server = MockServer::start().await;
    let base = Url::parse(&format!("{}/v1.0", server.uri())).unwrap();
    let provider = Arc::new(GraphCalendarProvider::new(Client::new(), base));
    let session = Arc::new(StaticSession::signed_in(
        Identity {
            account_id: "acc-1".into(),
            display_name: "Maira Quintero".into(),
            email: "maira@fycotelecom.com".into(),
        },
        "tok",
    ));
    let rooms = Arc::new(WalRoomRepository::open(&test_log_path(name), default_rooms()).unwrap());
    let engine = Arc::new(Engine::new(provider, session, rooms, EngineOptions::default()));
    (server, engine)
}

async fn mount_listing(server: &MockServer, events: Vec<Value>) {
    Mock::given(method("GET"))
        .and(path("/v1.0/me/events"))
        .and(header("authorization", "Bearer tok"))
        .and(headers("prefer", vec![r#"outlook.timezone="UTC""#, r#"outlook.body-content-type="text""#]))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "value": events })))
        .mount(server)
        .await;
}

async fn requests(server: &MockServer, verb: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.method.as_str() == verb)
        .count()
}

// ── Flows ────────────────────────────────────────────────────

#[tokio::test]
async fn refresh_book_and_cancel_against_graph() {
    let (server, engine) = start("flow_book_cancel.log").await;
    mount_listing(
        &server,
        vec![
            graph_event(
                "AAMk-1",
                "2024-10-15T09:00:00.0000000",
                "2024-10-15T10:00:00.0000000",
                Some(("Consejo", "consejo.tribu@fycotelecom.com")),
            ),
            graph_event("AAMk-2", "2024-10-15T11:00:00.0000000", "2024-10-15T12:00:00.0000000", None),
        ],
    )
    .await;

    // 1. refresh: resource attendee resolves the room, the other stays unresolved
    let bookings = engine.refresh().await.unwrap();
    assert_eq!(bookings.len(), 2);
    assert_eq!(bookings[0].room_id.as_deref(), Some("4"));
    assert_eq!(bookings[0].start, DAY + 9 * H);
    assert_eq!(bookings[1].room_id, None);

    // 2. overlapping candidate is refused before anything is sent
    let err = engine
        .upsert(CandidateBooking::new("Retro", "4", DAY + 9 * H + H / 2, DAY + 10 * H + H / 2))
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::Conflict { booking_id: "AAMk-1".into() });
    assert_eq!(requests(&server, "POST").await, 0);

    // 3. a free slot is created on the provider
    Mock::given(method("POST"))
        .and(path("/v1.0/me/events"))
        .and(body_partial_json(json!({
            "subject": "Retro",
            "location": {"displayName": "Consejo de la Tribu"},
            "attendees": [{"emailAddress": {"address": "consejo.tribu@fycotelecom.com"}, "type": "resource"}],
            "categories": ["Room booking"]
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(graph_event(
            "AAMk-3",
            "2024-10-15T14:00:00.0000000",
            "2024-10-15T15:00:00.0000000",
            Some(("Consejo de la Tribu", "consejo.tribu@fycotelecom.com")),
        )))
        .expect(1)
        .mount(&server)
        .await;

    let created = engine
        .upsert(CandidateBooking::new("Retro", "4", DAY + 14 * H, DAY + 15 * H))
        .await
        .unwrap();
    assert_eq!(created.id, "AAMk-3");
    assert_eq!(created.room_id.as_deref(), Some("4"));
    assert_eq!(engine.bookings().await.len(), 3);

    let grid = engine.day_grid(NaiveDate::from_ymd_opt(2024, 10, 15).unwrap()).await;
    let ids: Vec<_> = grid["4"].iter().map(|e| e.booking_id.as_str()).collect();
    assert_eq!(ids, vec!["AAMk-1", "AAMk-3"]);

    let ics = build_ics(&created, DAY).unwrap();
    assert!(ics.contains("UID:AAMk-3@roomsync\r\n"));
    assert!(ics.contains("DTSTART:20241015T140000Z\r\n"));

    // 4. the provider cannot delete: the booking still goes away locally
    Mock::given(method("DELETE"))
        .and(path("/v1.0/me/events/AAMk-3"))
        .respond_with(ResponseTemplate::new(503).set_body_string("try later"))
        .mount(&server)
        .await;
    let outcome = engine.remove("AAMk-3").await.unwrap();
    assert!(matches!(outcome.notice, Some(Notice::RemoteDeleteFailed { .. })));
    assert!(engine.booking("AAMk-3").await.is_none());

    // 5. an expired grant aborts the delete and keeps the booking
    Mock::given(method("DELETE"))
        .and(path("/v1.0/me/events/AAMk-1"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    let err = engine.remove("AAMk-1").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AuthRequired);
    assert!(engine.booking("AAMk-1").await.is_some());

    let csv = build_csv(&engine.bookings().await);
    assert_eq!(csv.lines().count(), 3);
}

#[tokio::test]
async fn offline_booking_is_pushed_later() {
    let (server, engine) = start("flow_offline.log").await;

    // provider is down: the write fails and nothing is kept
    Mock::given(method("POST"))
        .and(path("/v1.0/me/events"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    let candidate = CandidateBooking::new("Standup", "5", DAY + 8 * H, DAY + 9 * H);
    let err = engine.upsert(candidate.clone()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RemoteUnavailable);
    assert!(engine.bookings().await.is_empty());

    // kept locally instead
    let local = engine.save_local(candidate).await.unwrap();
    assert_eq!(local.sync_state(), SyncState::LocalPendingSync);

    // the organizer's calendar is busy at that time
    Mock::given(method("GET"))
        .and(path("/v1.0/me/calendar/calendarView"))
        .and(query_param("startDateTime", "2024-10-15T08:00:00Z"))
        .and(query_param("endDateTime", "2024-10-15T09:00:00Z"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [graph_event("AAMk-9", "2024-10-15T08:30:00.0000000", "2024-10-15T09:30:00.0000000", None)]
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    let err = engine.resync(&local.id).await.unwrap_err();
    assert_eq!(err, EngineError::CalendarBusy { event_id: "AAMk-9".into() });

    // once the calendar is clear the push goes through and replaces the placeholder
    Mock::given(method("GET"))
        .and(path("/v1.0/me/calendar/calendarView"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "value": [] })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1.0/me/events"))
        .respond_with(ResponseTemplate::new(201).set_body_json(graph_event(
            "AAMk-10",
            "2024-10-15T08:00:00.0000000",
            "2024-10-15T09:00:00.0000000",
            Some(("Plaza de Conexiones", "plaza.conexiones@fycotelecom.com")),
        )))
        .mount(&server)
        .await;

    let reports = engine.resync_all_local().await;
    assert_eq!(reports.len(), 1);
    let synced = reports[0].result.clone().unwrap();
    assert_eq!(synced.id, "AAMk-10");
    assert_eq!(synced.room_id.as_deref(), Some("5"));
    assert!(engine.local_only().await.is_empty());
    assert!(engine.booking(&local.id).await.is_none());
}

#[tokio::test]
async fn room_changes_survive_restart() {
    let path = test_log_path("flow_rooms_restart.log");
    {
        let repo = WalRoomRepository::open(&path, default_rooms()).unwrap();
        repo.upsert(Room::new("6", "Auditorio Central", Some("auditorio@fycotelecom.com"), 80))
            .unwrap();
        repo.delete("1").unwrap();
    }

    let repo = WalRoomRepository::open(&path, default_rooms()).unwrap();
    let ids: Vec<String> = repo.list().into_iter().map(|r| r.id).collect();
    assert_eq!(ids, vec!["2", "3", "4", "5", "6"]);
}
