use std::collections::HashSet;

use crate::model::*;

/// Immutable view of every booking the engine holds.
///
/// Bookings are sorted by `(start, id)` with unique ids. `version` is the
/// ticket of the refresh or mutation that published it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub version: u64,
    pub bookings: Vec<Booking>,
}

/// Sort by start and drop duplicate ids, later entries winning.
fn canonical(bookings: Vec<Booking>) -> Vec<Booking> {
    let mut seen = HashSet::new();
    let mut out: Vec<Booking> = bookings
        .into_iter()
        .rev()
        .filter(|b| seen.insert(b.id.clone()))
        .collect();
    out.sort_by(|a, b| (a.start, &a.id).cmp(&(b.start, &b.id)));
    out
}

impl Snapshot {
    pub fn new(version: u64, bookings: Vec<Booking>) -> Self {
        Self {
            version,
            bookings: canonical(bookings),
        }
    }

    pub fn get(&self, id: &str) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn len(&self) -> usize {
        self.bookings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bookings.is_empty()
    }

    pub fn local_only(&self) -> impl Iterator<Item = &Booking> {
        self.bookings.iter().filter(|b| b.source == BookingSource::Local)
    }

    /// New remote state; local-only bookings are carried over.
    pub fn with_remote(&self, version: u64, remote: Vec<Booking>) -> Self {
        let mut all: Vec<Booking> = self.local_only().cloned().collect();
        all.extend(remote);
        Self::new(version, all)
    }

    /// Drop `remove` ids, then add `insert`.
    pub fn merged(&self, version: u64, remove: &[&str], insert: Option<Booking>) -> Self {
        let mut all: Vec<Booking> = self
            .bookings
            .iter()
            .filter(|b| !remove.contains(&b.id.as_str()))
            .cloned()
            .collect();
        all.extend(insert);
        Self::new(version, all)
    }

    pub fn mapped(&self, version: u64, f: impl FnMut(&Booking) -> Booking) -> Self {
        Self::new(version, self.bookings.iter().map(f).collect())
    }
}
