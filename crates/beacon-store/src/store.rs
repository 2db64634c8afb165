//! The bounded in-memory event log.
//!
//! All mutation goes through [`EventStore::append`] and the sweep methods.
//! Readers always get owned copies or derived views, never a reference into
//! the live log. Appends, sweeps and reads are serialized through a single
//! `RwLock`, so a read that follows an append on the same task always
//! observes it.

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use beacon_types::{Event, ResourceSummary};
use chrono::{DateTime, Utc};

use crate::views::{cutoff, event_stats, in_window, presence_index, EventStats, Page, PresenceEntry};

/// Default maximum number of retained events.
pub const DEFAULT_MAX_EVENTS: usize = 1000;

/// Bounded, append-only presence history.
#[derive(Debug)]
pub struct EventStore {
    events: RwLock<VecDeque<Event>>,
    max_events: usize,
}

impl Default for EventStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_EVENTS)
    }
}

impl EventStore {
    /// Creates an empty store retaining at most `max_events` events.
    ///
    /// A capacity of zero is raised to one.
    pub fn new(max_events: usize) -> Self {
        let max_events = max_events.max(1);
        Self {
            events: RwLock::new(VecDeque::with_capacity(max_events.min(4096))),
            max_events,
        }
    }

    pub fn max_events(&self) -> usize {
        self.max_events
    }

    fn read(&self) -> RwLockReadGuard<'_, VecDeque<Event>> {
        self.events.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, VecDeque<Event>> {
        self.events.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends an event at the tail, evicting from the head past capacity.
    ///
    /// Returns the number of evicted events.
    pub fn append(&self, event: Event) -> usize {
        let mut events = self.write();
        events.push_back(event);

        let mut evicted = 0;
        while events.len() > self.max_events {
            events.pop_front();
            evicted += 1;
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Returns a copy of the whole log, oldest first.
    pub fn snapshot(&self) -> Vec<Event> {
        self.read().iter().cloned().collect()
    }

    /// Latest event per source, newest first.
    pub fn current_state(&self) -> Vec<PresenceEntry> {
        presence_index(self.read().iter())
    }

    /// Events that occurred within the trailing `duration`, oldest first.
    pub fn window(&self, duration: Duration) -> Vec<Event> {
        self.window_at(duration, Utc::now())
    }

    /// Events with `occurred_at` in `[now - duration, now]`, oldest first.
    pub fn window_at(&self, duration: Duration, now: DateTime<Utc>) -> Vec<Event> {
        let cutoff = cutoff(now, duration);
        self.read()
            .iter()
            .filter(|event| in_window(event, cutoff, now))
            .cloned()
            .collect()
    }

    /// The `limit` most recent events for one source, newest first.
    pub fn events_for(&self, source_id: &str, limit: usize) -> Vec<Event> {
        self.read()
            .iter()
            .rev()
            .filter(|event| event.source_id == source_id)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Newest-first page, skipping the `offset` most recent events.
    pub fn list(&self, limit: usize, offset: usize) -> Page {
        let events = self.read();
        Page {
            events: events.iter().rev().skip(offset).take(limit).cloned().collect(),
            total: events.len(),
        }
    }

    /// Counters over the whole log and over the trailing `window`.
    pub fn stats(&self, window: Duration) -> EventStats {
        self.stats_at(window, Utc::now())
    }

    pub fn stats_at(&self, window: Duration, now: DateTime<Utc>) -> EventStats {
        event_stats(self.read().iter(), cutoff(now, window), now)
    }

    /// Distinct entity IDs present in the log, sorted.
    pub fn entities(&self) -> Vec<String> {
        self.read()
            .iter()
            .map(|event| event.entity_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Backlog summary handed to new observers.
    pub fn summary(&self, resource: &str) -> ResourceSummary {
        let events = self.read();
        ResourceSummary {
            resource: resource.to_string(),
            events_count: events.len(),
            sources: events
                .iter()
                .map(|event| event.source_id.as_str())
                .collect::<HashSet<_>>()
                .len(),
        }
    }

    /// Removes events older than `max_age`. Returns how many were removed.
    pub fn sweep(&self, max_age: Duration) -> usize {
        self.sweep_before(cutoff(Utc::now(), max_age))
    }

    /// Removes every event that occurred strictly before `cutoff`.
    pub fn sweep_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut events = self.write();
        let before = events.len();
        events.retain(|event| event.occurred_at >= cutoff);
        let removed = before - events.len();
        if removed > 0 {
            tracing::debug!(removed, remaining = events.len(), "swept expired events");
        }
        removed
    }
}
