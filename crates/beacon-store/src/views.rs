//! Read-only views derived from the event log.
//!
//! Everything here is a pure function of a sequence of events. Nothing is
//! cached between calls, so a view can never drift from the log it was
//! computed from.

use std::collections::HashSet;

use beacon_types::{Event, EventKind};
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

/// The most recent event seen for one source.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEntry {
    pub source_id: String,
    pub last_event: Event,
}

impl PresenceEntry {
    /// A source is present when its latest event is an arrival.
    pub fn is_present(&self) -> bool {
        self.last_event.kind == EventKind::Arrival
    }
}

/// One page of events, newest first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page {
    pub events: Vec<Event>,
    /// Total number of events retained, independent of paging.
    pub total: usize,
}

/// Counters over the retained log and a trailing window of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventStats {
    pub total_events: usize,
    pub window_total: usize,
    pub arrivals: usize,
    pub departures: usize,
    pub unique_sources: usize,
}

/// Builds the presence index: the latest event per source.
///
/// Scans from newest to oldest and keeps the first event seen for each
/// `source_id`. Entries come back ordered by recency, newest first.
pub fn presence_index<'a, I>(events: I) -> Vec<PresenceEntry>
where
    I: IntoIterator<Item = &'a Event>,
    I::IntoIter: DoubleEndedIterator,
{
    let mut seen = HashSet::new();
    let mut entries = Vec::new();
    for event in events.into_iter().rev() {
        if seen.insert(event.source_id.as_str()) {
            entries.push(PresenceEntry {
                source_id: event.source_id.clone(),
                last_event: event.clone(),
            });
        }
    }
    entries
}

/// Computes [`EventStats`] for events inside `[cutoff, now]`.
pub fn event_stats<'a, I>(events: I, cutoff: DateTime<Utc>, now: DateTime<Utc>) -> EventStats
where
    I: IntoIterator<Item = &'a Event>,
{
    let mut stats = EventStats {
        total_events: 0,
        window_total: 0,
        arrivals: 0,
        departures: 0,
        unique_sources: 0,
    };
    let mut sources = HashSet::new();

    for event in events {
        stats.total_events += 1;
        if !in_window(event, cutoff, now) {
            continue;
        }
        stats.window_total += 1;
        match event.kind {
            EventKind::Arrival => stats.arrivals += 1,
            EventKind::Departure => stats.departures += 1,
        }
        sources.insert(event.source_id.as_str());
    }

    stats.unique_sources = sources.len();
    stats
}

pub(crate) fn in_window(event: &Event, cutoff: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    event.occurred_at >= cutoff && event.occurred_at <= now
}

/// Returns `now - age`, saturating at the earliest representable instant.
pub fn cutoff(now: DateTime<Utc>, age: std::time::Duration) -> DateTime<Utc> {
    TimeDelta::from_std(age)
        .ok()
        .and_then(|delta| now.checked_sub_signed(delta))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
