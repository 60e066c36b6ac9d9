mod conflict;
mod error;
pub mod grid;
mod mutations;
pub mod normalize;
mod queries;
pub mod report;
mod snapshot;
#[cfg(test)]
mod tests;

pub use conflict::{ConflictPolicy, check_conflict, collisions, find_conflict, validate_candidate};
pub use error::{EngineError, ErrorKind};
pub use grid::{GridLayout, PositionedEvent, project};
pub use mutations::{RemoveOutcome, ResyncReport};
pub use normalize::{normalize_event, renormalize};
pub use report::{BookingFilter, Tally, UsageStats, usage_stats};
pub use snapshot::Snapshot;

use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Instant;

use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::limits::*;
use crate::model::*;
use crate::notify::{NotifyHub, Subscription};
use crate::observability::*;
use crate::provider::{CalendarProvider, EventFilter, RawEvent};
use crate::rooms::RoomRepository;
use crate::session::{AuthEvent, Identity, SessionProvider};

/// Non-fatal, user-visible conditions the engine records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// The booking was removed here but the provider still has the event.
    RemoteDeleteFailed { booking_id: String, reason: String },
    /// Provider events dropped during a refresh because their times were unusable.
    EventsSkipped { count: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    SnapshotReplaced { version: u64, bookings: usize },
    Notice(Notice),
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub policy: ConflictPolicy,
    /// Grid geometry; its time zone also resolves provider wall times.
    pub layout: GridLayout,
    pub list_top: u32,
    pub scopes: Vec<String>,
    /// Category stamped on events written to the provider.
    pub category: Option<String>,
    /// Lowercased emails allowed to manage rooms.
    pub admins: BTreeSet<String>,
}

impl EngineOptions {
    pub fn is_admin(&self, email: &str) -> bool {
        self.admins.contains(&email.trim().to_lowercase())
    }
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            policy: ConflictPolicy::default(),
            layout: GridLayout::default(),
            list_top: DEFAULT_LIST_TOP,
            scopes: vec!["Calendars.ReadWrite".into()],
            category: Some("Room booking".into()),
            admins: BTreeSet::new(),
        }
    }
}

/// Sequence number a refresh holds. Only a ticket newer than the published
/// snapshot's version may replace it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RefreshTicket(u64);

impl RefreshTicket {
    pub fn sequence(&self) -> u64 {
        self.0
    }
}

pub struct Engine {
    pub(super) provider: Arc<dyn CalendarProvider>,
    pub(super) session: Arc<dyn SessionProvider>,
    pub(super) rooms: Arc<dyn RoomRepository>,
    pub(super) options: EngineOptions,
    snapshot: RwLock<Arc<Snapshot>>,
    /// Last ticket handed out to a refresh or mutation.
    sequence: AtomicU64,
    /// One provider listing at a time.
    refresh_gate: Mutex<()>,
    /// Bumped after every successful refresh; waiters use it to join.
    refresh_generation: AtomicU64,
    /// Serializes check-then-write so two writers never pass the same check.
    pub(super) write_gate: Mutex<()>,
    notices: std::sync::Mutex<VecDeque<Notice>>,
    pub notify: NotifyHub<EngineEvent>,
}

impl Engine {
    pub fn new(
        provider: Arc<dyn CalendarProvider>,
        session: Arc<dyn SessionProvider>,
        rooms: Arc<dyn RoomRepository>,
        options: EngineOptions,
    ) -> Self {
        Self {
            provider,
            session,
            rooms,
            options,
            snapshot: RwLock::new(Arc::new(Snapshot::default())),
            sequence: AtomicU64::new(0),
            refresh_gate: Mutex::new(()),
            refresh_generation: AtomicU64::new(0),
            write_gate: Mutex::new(()),
            notices: std::sync::Mutex::new(VecDeque::new()),
            notify: NotifyHub::new(),
        }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn subscribe(&self) -> Subscription<EngineEvent> {
        self.notify.subscribe()
    }

    pub(super) fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Replace the snapshot with `build(current)` if `version` is newer.
    /// Returns the published snapshot, or `None` when `version` is stale.
    pub(super) async fn publish(
        &self,
        version: u64,
        build: impl FnOnce(&Snapshot) -> Snapshot,
    ) -> Option<Arc<Snapshot>> {
        let mut guard = self.snapshot.write().await;
        if version <= guard.version {
            return None;
        }
        let next = Arc::new(build(&guard));
        *guard = Arc::clone(&next);
        drop(guard);

        metrics::gauge!(SNAPSHOT_BOOKINGS).set(next.len() as f64);
        self.notify.send(&EngineEvent::SnapshotReplaced {
            version: next.version,
            bookings: next.len(),
        });
        Some(next)
    }

    pub(super) fn record_notice(&self, notice: Notice) {
        {
            let mut notices = self.notices.lock().unwrap_or_else(PoisonError::into_inner);
            if notices.len() == MAX_NOTICES {
                notices.pop_front();
            }
            notices.push_back(notice.clone());
        }
        self.notify.send(&EngineEvent::Notice(notice));
    }

    pub(super) fn notices(&self) -> Vec<Notice> {
        self.notices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Signed-in identity and a bearer token for the configured scopes.
    pub(super) async fn credentials(&self) -> Result<(Identity, String), EngineError> {
        let identity = self
            .session
            .active_identity()
            .ok_or_else(|| EngineError::AuthRequired("no active account".into()))?;
        let token = self.session.access_token(&self.options.scopes).await?;
        Ok((identity, token))
    }

    // ── Refresh ──────────────────────────────────────────────────

    /// Reserve a ticket before fetching. Pair with [`Engine::apply_refresh`].
    pub fn begin_refresh(&self) -> RefreshTicket {
        RefreshTicket(self.next_sequence())
    }

    /// Normalize `raw` and publish it as the new remote state, unless newer
    /// state was published after `ticket` was taken. Returns whether it was applied.
    pub async fn apply_refresh(&self, ticket: RefreshTicket, raw: Vec<RawEvent>) -> bool {
        let rooms = self.rooms.list();
        let remote = normalize::normalize_all(&raw, &rooms, self.options.layout.time_zone);
        let skipped = raw.len() - remote.len();

        let published = self
            .publish(ticket.0, |current| current.with_remote(ticket.0, remote))
            .await;
        match published {
            Some(snapshot) => {
                if skipped > 0 {
                    self.record_notice(Notice::EventsSkipped { count: skipped });
                }
                info!(
                    version = snapshot.version,
                    bookings = snapshot.len(),
                    skipped,
                    "snapshot refreshed"
                );
                true
            }
            None => {
                metrics::counter!(STALE_REFRESH_DISCARDED_TOTAL).increment(1);
                metrics::counter!(REFRESH_TOTAL, "status" => "stale").increment(1);
                debug!(ticket = ticket.0, "stale refresh discarded");
                false
            }
        }
    }

    /// Fetch the provider's events and replace the remote part of the snapshot.
    ///
    /// Concurrent callers coalesce: whoever arrives while a fetch is running
    /// waits for it and gets its result instead of starting another.
    pub async fn refresh(&self) -> Result<Vec<Booking>, EngineError> {
        let interest = CancellationToken::new();
        match self.refresh_inner(&interest).await? {
            Some(bookings) => Ok(bookings),
            None => Ok(self.snapshot().await.bookings.clone()),
        }
    }

    /// As [`Engine::refresh`], but gives up (and applies nothing) once
    /// `interest` is cancelled. `Ok(None)` means the result was discarded.
    pub async fn refresh_guarded(&self, interest: &CancellationToken) -> Result<Option<Vec<Booking>>, EngineError> {
        self.refresh_inner(interest).await
    }

    async fn refresh_inner(&self, interest: &CancellationToken) -> Result<Option<Vec<Booking>>, EngineError> {
        let observed = self.refresh_generation.load(Ordering::Acquire);
        let _gate = tokio::select! {
            _ = interest.cancelled() => return Ok(None),
            gate = self.refresh_gate.lock() => gate,
        };
        if self.refresh_generation.load(Ordering::Acquire) != observed {
            metrics::counter!(REFRESH_TOTAL, "status" => "joined").increment(1);
            return Ok(Some(self.snapshot().await.bookings.clone()));
        }

        let ticket = self.begin_refresh();
        let started = Instant::now();
        let fetched = tokio::select! {
            _ = interest.cancelled() => None,
            raw = self.fetch_remote() => Some(raw),
        };
        let raw = match fetched {
            Some(Ok(raw)) => raw,
            Some(Err(e)) => {
                metrics::counter!(REFRESH_TOTAL, "status" => "error").increment(1);
                warn!(error = %e, "refresh failed");
                return Err(e);
            }
            None => {
                metrics::counter!(REFRESH_TOTAL, "status" => "cancelled").increment(1);
                debug!(ticket = ticket.0, "refresh cancelled, result discarded");
                return Ok(None);
            }
        };
        if interest.is_cancelled() {
            metrics::counter!(REFRESH_TOTAL, "status" => "cancelled").increment(1);
            return Ok(None);
        }

        if self.apply_refresh(ticket, raw).await {
            metrics::counter!(REFRESH_TOTAL, "status" => "ok").increment(1);
        }
        metrics::histogram!(REFRESH_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        self.refresh_generation.fetch_add(1, Ordering::Release);
        Ok(Some(self.snapshot().await.bookings.clone()))
    }

    async fn fetch_remote(&self) -> Result<Vec<RawEvent>, EngineError> {
        let (identity, token) = self.credentials().await?;
        let filter = EventFilter {
            top: self.options.list_top,
            since: None,
        };
        let raw = self.provider.list_events(&token, &filter).await?;
        debug!(account = %identity.account_id, events = raw.len(), "provider events fetched");
        Ok(raw)
    }

    /// Drop provider-sourced bookings, keeping local-only ones.
    pub async fn clear_remote(&self) {
        let version = self.next_sequence();
        self.publish(version, |current| current.with_remote(version, Vec::new()))
            .await;
    }

    /// Follow the session's auth events until `interest` is cancelled:
    /// sign-in triggers a refresh, sign-out clears remote bookings.
    pub fn watch_session(self: &Arc<Self>, interest: CancellationToken) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        let mut events = self.session.subscribe();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = interest.cancelled() => break,
                    event = events.recv() => event,
                };
                match event {
                    Some(AuthEvent::SignedIn(identity)) => {
                        info!(account = %identity.account_id, "signed in, refreshing");
                        if let Err(e) = engine.refresh_guarded(&interest).await {
                            warn!(error = %e, "refresh after sign-in failed");
                        }
                    }
                    Some(AuthEvent::SignedOut) => {
                        info!("signed out, clearing remote bookings");
                        engine.clear_remote().await;
                    }
                    Some(AuthEvent::TokenExpired) => debug!("access token expired"),
                    None => break,
                }
            }
            events.unsubscribe();
        })
    }
}
