//! Room list storage behind the [`RoomRepository`] port.

use std::path::Path;
use std::sync::{Mutex, PoisonError, RwLock};

use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::engine::EngineError;
use crate::limits::*;
use crate::model::{Room, RoomEvent};
use crate::observability::{ROOM_LOG_COMPACTION_FAILURES_TOTAL, ROOM_LOG_REPAIRS_TOTAL};
use crate::wal::RoomLog;

pub trait RoomRepository: Send + Sync {
    /// All rooms in insertion order.
    fn list(&self) -> Vec<Room>;

    fn get(&self, id: &str) -> Option<Room>;

    /// Insert or replace by id. An empty id gets a fresh one.
    fn upsert(&self, room: Room) -> Result<Room, EngineError>;

    fn delete(&self, id: &str) -> Result<Room, EngineError>;
}

/// The seed list used when nothing has been stored yet.
pub fn default_rooms() -> Vec<Room> {
    vec![
        Room::new("1", "Círculo de Sabios I", Some("circulo.sabios1@fycotelecom.com"), 8),
        Room::new("2", "Círculo de Sabios II", Some("circulo.sabios2@fycotelecom.com"), 6),
        Room::new("3", "Círculo de Sabios III", Some("circulo.sabios3@fycotelecom.com"), 4),
        Room::new("4", "Consejo de la Tribu", Some("consejo.tribu@fycotelecom.com"), 12),
        Room::new("5", "Plaza de Conexiones", Some("plaza.conexiones@fycotelecom.com"), 20),
    ]
}

/// Trim, assign an id if missing and check the room against its neighbours.
fn validate_room(mut room: Room, existing: &[Room]) -> Result<Room, EngineError> {
    room.id = room.id.trim().to_owned();
    if room.id.is_empty() {
        room.id = Ulid::new().to_string();
    }
    if room.id.len() > MAX_ROOM_ID_LEN {
        return Err(EngineError::LimitExceeded("room id too long"));
    }
    room.name = room.name.trim().to_owned();
    if room.name.is_empty() {
        return Err(EngineError::Validation("room name is required".into()));
    }
    if room.name.len() > MAX_ROOM_NAME_LEN {
        return Err(EngineError::LimitExceeded("room name too long"));
    }
    if room.features.len() > MAX_ROOM_FEATURES {
        return Err(EngineError::LimitExceeded("too many room features"));
    }
    if room.features.iter().any(|f| f.len() > MAX_ROOM_FEATURE_LEN) {
        return Err(EngineError::LimitExceeded("room feature too long"));
    }
    room.email = room
        .email
        .map(|e| e.trim().to_owned())
        .filter(|e| !e.is_empty());
    if let Some(email) = &room.email {
        if email.len() > MAX_EMAIL_LEN {
            return Err(EngineError::LimitExceeded("room email too long"));
        }
        if !email.contains('@') {
            return Err(EngineError::Validation(format!("invalid room email: {email}")));
        }
    }

    let others = existing.iter().filter(|r| r.id != room.id);
    for other in others {
        if other.name.eq_ignore_ascii_case(&room.name) {
            return Err(EngineError::AlreadyExists(format!("room name {}", room.name)));
        }
        if let Some(email) = &room.email
            && other.email_matches(email)
        {
            return Err(EngineError::AlreadyExists(format!("room email {email}")));
        }
    }
    let is_new = existing.iter().all(|r| r.id != room.id);
    if is_new && existing.len() >= MAX_ROOMS {
        return Err(EngineError::LimitExceeded("too many rooms"));
    }
    Ok(room)
}

fn apply(rooms: &mut Vec<Room>, event: &RoomEvent) {
    match event {
        RoomEvent::Upserted(room) => match rooms.iter_mut().find(|r| r.id == room.id) {
            Some(slot) => *slot = room.clone(),
            None => rooms.push(room.clone()),
        },
        RoomEvent::Deleted { id } => rooms.retain(|r| &r.id != id),
    }
}

/// Rooms held in memory only.
pub struct InMemoryRoomRepository {
    rooms: RwLock<Vec<Room>>,
}

impl Default for InMemoryRoomRepository {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl InMemoryRoomRepository {
    pub fn new(rooms: Vec<Room>) -> Self {
        Self {
            rooms: RwLock::new(rooms),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(default_rooms())
    }
}

impl RoomRepository for InMemoryRoomRepository {
    fn list(&self) -> Vec<Room> {
        self.rooms.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn get(&self, id: &str) -> Option<Room> {
        self.rooms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|r| r.id == id)
            .cloned()
    }

    fn upsert(&self, room: Room) -> Result<Room, EngineError> {
        let mut rooms = self.rooms.write().unwrap_or_else(PoisonError::into_inner);
        let room = validate_room(room, &rooms)?;
        apply(&mut rooms, &RoomEvent::Upserted(room.clone()));
        Ok(room)
    }

    fn delete(&self, id: &str) -> Result<Room, EngineError> {
        let mut rooms = self.rooms.write().unwrap_or_else(PoisonError::into_inner);
        let room = rooms
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("room {id}")))?;
        apply(&mut rooms, &RoomEvent::Deleted { id: id.to_owned() });
        Ok(room)
    }
}

struct Logged {
    rooms: Vec<Room>,
    log: RoomLog,
}

/// Rooms persisted to an append-only [`RoomLog`].
///
/// Every change is fsynced before it becomes visible. Once enough appends
/// pile up the log is rewritten with one `Upserted` record per live room.
pub struct WalRoomRepository {
    inner: Mutex<Logged>,
}

impl WalRoomRepository {
    /// Replay `path`. Only a log that was never initialized gets `seed`;
    /// an initialized log with every room deleted stays empty.
    pub fn open(path: &Path, seed: Vec<Room>) -> Result<Self, EngineError> {
        let replay = RoomLog::replay(path)?;
        let mut rooms = Vec::new();

        let log = if replay.initialized() {
            if let Some(damage) = replay.tail.damage() {
                metrics::counter!(ROOM_LOG_REPAIRS_TOTAL, "reason" => damage).increment(1);
                warn!(
                    path = %path.display(),
                    damage,
                    kept = replay.events.len(),
                    valid_len = replay.valid_len,
                    "room log tail discarded"
                );
            }
            for event in &replay.events {
                apply(&mut rooms, event);
            }
            info!(path = %path.display(), events = replay.events.len(), rooms = rooms.len(), "room log replayed");
            RoomLog::resume(path, &replay)?
        } else {
            for room in seed {
                apply(&mut rooms, &RoomEvent::Upserted(room));
            }
            info!(path = %path.display(), rooms = rooms.len(), "room log seeded");
            RoomLog::create(path, &rooms)?
        };

        Ok(Self {
            inner: Mutex::new(Logged { rooms, log }),
        })
    }

    /// Append, then apply. A failed compaction is only logged: the change is
    /// already durable in the longer log and the next commit retries.
    fn commit(inner: &mut Logged, event: RoomEvent) -> Result<(), EngineError> {
        inner.log.append(&event)?;
        apply(&mut inner.rooms, &event);
        if inner.log.appends_since_compact() >= ROOM_LOG_COMPACT_THRESHOLD {
            match inner.log.compact(&inner.rooms) {
                Ok(()) => debug!(path = %inner.log.path().display(), rooms = inner.rooms.len(), "room log compacted"),
                Err(e) => {
                    metrics::counter!(ROOM_LOG_COMPACTION_FAILURES_TOTAL).increment(1);
                    warn!(path = %inner.log.path().display(), error = %e, "room log compaction failed");
                }
            }
        }
        Ok(())
    }
}

impl RoomRepository for WalRoomRepository {
    fn list(&self) -> Vec<Room> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).rooms.clone()
    }

    fn get(&self, id: &str) -> Option<Room> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .rooms
            .iter()
            .find(|r| r.id == id)
            .cloned()
    }

    fn upsert(&self, room: Room) -> Result<Room, EngineError> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let room = validate_room(room, &inner.rooms)?;
        Self::commit(&mut inner, RoomEvent::Upserted(room.clone()))?;
        Ok(room)
    }

    fn delete(&self, id: &str) -> Result<Room, EngineError> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let room = inner
            .rooms
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("room {id}")))?;
        Self::commit(&mut inner, RoomEvent::Deleted { id: id.to_owned() })?;
        Ok(room)
    }
}
