//! In-process calendar provider for tests, demos and offline runs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono_tz::Tz;
use dashmap::DashMap;

use super::{CalendarProvider, EmailAddress, EventFilter, ProviderError, RawEvent, RawEventInput, RawOrganizer};
use crate::model::{Ms, overlaps};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderOp {
    List,
    Create,
    Update,
    Delete,
    ListRange,
}

/// Calendar backed by a map. Failures can be injected per operation and
/// listings can be slowed down to stage refresh races.
pub struct MemoryCalendarProvider {
    events: DashMap<String, RawEvent>,
    next_id: AtomicU64,
    organizer: Option<EmailAddress>,
    failures: DashMap<ProviderOp, ProviderError>,
    calls: DashMap<ProviderOp, u64>,
    list_delay: Mutex<Option<Duration>>,
}

impl Default for MemoryCalendarProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCalendarProvider {
    pub fn new() -> Self {
        Self {
            events: DashMap::new(),
            next_id: AtomicU64::new(1),
            organizer: None,
            failures: DashMap::new(),
            calls: DashMap::new(),
            list_delay: Mutex::new(None),
        }
    }

    /// Organizer stamped on events this provider creates.
    pub fn with_organizer(mut self, name: &str, address: &str) -> Self {
        self.organizer = Some(EmailAddress {
            address: Some(address.into()),
            name: Some(name.into()),
        });
        self
    }

    pub fn insert(&self, event: RawEvent) {
        self.events.insert(event.id.clone(), event);
    }

    pub fn get(&self, id: &str) -> Option<RawEvent> {
        self.events.get(id).map(|e| e.value().clone())
    }

    pub fn remove(&self, id: &str) -> Option<RawEvent> {
        self.events.remove(id).map(|(_, e)| e)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Every call to `op` fails with `error` until [`clear_failure`](Self::clear_failure).
    pub fn fail(&self, op: ProviderOp, error: ProviderError) {
        self.failures.insert(op, error);
    }

    pub fn clear_failure(&self, op: ProviderOp) {
        self.failures.remove(&op);
    }

    pub fn set_list_delay(&self, delay: Option<Duration>) {
        *self.list_delay.lock().unwrap_or_else(PoisonError::into_inner) = delay;
    }

    pub fn calls(&self, op: ProviderOp) -> u64 {
        self.calls.get(&op).map_or(0, |c| *c)
    }

    fn enter(&self, op: ProviderOp) -> Result<(), ProviderError> {
        *self.calls.entry(op).or_insert(0) += 1;
        match self.failures.get(&op) {
            Some(err) => Err(err.value().clone()),
            None => Ok(()),
        }
    }

    fn sorted(&self, mut keep: impl FnMut(&RawEvent) -> bool) -> Vec<RawEvent> {
        let mut out: Vec<RawEvent> = self
            .events
            .iter()
            .filter(|e| keep(e.value()))
            .map(|e| e.value().clone())
            .collect();
        out.sort_by(|a, b| {
            (a.start.to_ms(Tz::UTC), &a.id).cmp(&(b.start.to_ms(Tz::UTC), &b.id))
        });
        out
    }

    fn materialize(&self, id: String, input: &RawEventInput) -> RawEvent {
        RawEvent {
            id,
            subject: Some(input.subject.clone()),
            start: input.start.clone(),
            end: input.end.clone(),
            location: Some(input.location.clone()),
            attendees: input.attendees.clone(),
            organizer: self.organizer.clone().map(|email_address| RawOrganizer { email_address }),
            show_as: Some("busy".into()),
            body: Some(input.body.clone()),
            body_preview: Some(input.body.content.clone()),
        }
    }
}

#[async_trait]
impl CalendarProvider for MemoryCalendarProvider {
    async fn list_events(&self, _token: &str, filter: &EventFilter) -> Result<Vec<RawEvent>, ProviderError> {
        self.enter(ProviderOp::List)?;
        let delay = *self.list_delay.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.sorted(|e| match filter.since {
            Some(since) => e.start.to_ms(Tz::UTC).is_some_and(|s| s >= since),
            None => true,
        }))
    }

    async fn create_event(&self, _token: &str, input: &RawEventInput) -> Result<RawEvent, ProviderError> {
        self.enter(ProviderOp::Create)?;
        let id = format!("mem-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        let event = self.materialize(id, input);
        self.insert(event.clone());
        Ok(event)
    }

    async fn update_event(&self, _token: &str, id: &str, input: &RawEventInput) -> Result<RawEvent, ProviderError> {
        self.enter(ProviderOp::Update)?;
        if !self.events.contains_key(id) {
            return Err(ProviderError::Unavailable(format!("Graph API error (404 Not Found): {id}")));
        }
        let event = self.materialize(id.to_owned(), input);
        self.insert(event.clone());
        Ok(event)
    }

    async fn delete_event(&self, _token: &str, id: &str) -> Result<(), ProviderError> {
        self.enter(ProviderOp::Delete)?;
        self.events
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| ProviderError::Unavailable(format!("Graph API error (404 Not Found): {id}")))
    }

    async fn list_events_in_range(&self, _token: &str, start: Ms, end: Ms) -> Result<Vec<RawEvent>, ProviderError> {
        self.enter(ProviderOp::ListRange)?;
        Ok(self.sorted(|e| {
            match (e.start.to_ms(Tz::UTC), e.end.to_ms(Tz::UTC)) {
                (Some(s), Some(en)) => overlaps(s, en, start, end),
                _ => false,
            }
        }))
    }
}
