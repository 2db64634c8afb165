//! Unit tests for the bounded event log and its derived views.

use std::time::Duration;

use beacon_types::{Event, EventKind};
use chrono::{DateTime, TimeDelta, TimeZone, Utc};

use crate::store::EventStore;
use crate::views::presence_index;

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
}

/// Builds an event `secs` seconds after [`base`].
fn event_at(kind: EventKind, entity: &str, source: &str, secs: i64) -> Event {
    Event::new(kind, entity, source, base() + TimeDelta::seconds(secs))
}

// ── append / bounded log ─────────────────────────────────────────────

#[test]
fn append_never_exceeds_capacity_and_keeps_most_recent() {
    for max in [1usize, 2, 5, 17] {
        let store = EventStore::new(max);
        for i in 0..50i64 {
            store.append(event_at(EventKind::Arrival, &format!("e{i}"), "s", i));
            assert!(store.len() <= max, "size must stay bounded after every append");
        }

        let retained: Vec<String> = store.snapshot().into_iter().map(|e| e.entity_id).collect();
        let expected: Vec<String> = (50 - max as i64..50).map(|i| format!("e{i}")).collect();
        assert_eq!(retained, expected, "retained events must be the most recent {max}");
    }
}

#[test]
fn append_reports_evictions() {
    let store = EventStore::new(2);
    assert_eq!(store.append(event_at(EventKind::Arrival, "a", "s", 0)), 0);
    assert_eq!(store.append(event_at(EventKind::Arrival, "b", "s", 1)), 0);
    assert_eq!(store.append(event_at(EventKind::Arrival, "c", "s", 2)), 1);
    assert_eq!(store.len(), 2);
}

#[test]
fn zero_capacity_is_raised_to_one() {
    let store = EventStore::new(0);
    store.append(event_at(EventKind::Arrival, "a", "s", 0));
    store.append(event_at(EventKind::Arrival, "b", "s", 1));
    assert_eq!(store.max_events(), 1);
    assert_eq!(store.snapshot()[0].entity_id, "b");
}

// ── current_state / presence index ───────────────────────────────────

#[test]
fn arrival_then_departure_yields_single_departure_entry() {
    let store = EventStore::default();
    store.append(event_at(EventKind::Arrival, "phone-1", "beacon-A", 0));
    store.append(event_at(EventKind::Departure, "phone-1", "beacon-A", 5));

    let state = store.current_state();
    assert_eq!(state.len(), 1);
    assert_eq!(state[0].source_id, "beacon-A");
    assert_eq!(state[0].last_event.kind, EventKind::Departure);
    assert!(!state[0].is_present());
}

#[test]
fn current_state_always_matches_a_fresh_recompute() {
    let store = EventStore::new(7);
    let sources = ["beacon-A", "beacon-B", "beacon-C"];

    for i in 0..40i64 {
        let kind = if i % 3 == 0 { EventKind::Departure } else { EventKind::Arrival };
        let source = sources[(i as usize * 7) % sources.len()];
        store.append(event_at(kind, "phone", source, i));

        let recomputed = presence_index(store.snapshot().iter());
        assert_eq!(store.current_state(), recomputed);

        if i % 10 == 9 {
            store.sweep_before(base() + TimeDelta::seconds(i - 3));
            assert_eq!(store.current_state(), presence_index(store.snapshot().iter()));
        }
    }
}

#[test]
fn current_state_is_newest_first_one_entry_per_source() {
    let store = EventStore::default();
    store.append(event_at(EventKind::Arrival, "p1", "beacon-A", 0));
    store.append(event_at(EventKind::Arrival, "p2", "beacon-B", 1));
    store.append(event_at(EventKind::Departure, "p1", "beacon-A", 2));

    let state = store.current_state();
    let order: Vec<&str> = state.iter().map(|e| e.source_id.as_str()).collect();
    assert_eq!(order, vec!["beacon-A", "beacon-B"]);
    assert!(state[1].is_present());
}

#[test]
fn current_state_observes_evictions() {
    let store = EventStore::new(1);
    store.append(event_at(EventKind::Arrival, "p1", "beacon-A", 0));
    store.append(event_at(EventKind::Arrival, "p1", "beacon-B", 1));

    let state = store.current_state();
    assert_eq!(state.len(), 1);
    assert_eq!(state[0].source_id, "beacon-B");
}

// ── window / events_for / list ───────────────────────────────────────

#[test]
fn window_is_inclusive_and_ordered() {
    let store = EventStore::default();
    for secs in [0, 10, 20, 30, 40] {
        store.append(event_at(EventKind::Arrival, &format!("e{secs}"), "s", secs));
    }

    let now = base() + TimeDelta::seconds(30);
    let ids: Vec<String> = store
        .window_at(Duration::from_secs(20), now)
        .into_iter()
        .map(|e| e.entity_id)
        .collect();
    assert_eq!(ids, vec!["e10", "e20", "e30"]);
}

#[test]
fn window_with_huge_duration_covers_everything() {
    let store = EventStore::default();
    store.append(event_at(EventKind::Arrival, "a", "s", 0));
    let all = store.window_at(Duration::MAX, base() + TimeDelta::seconds(1));
    assert_eq!(all.len(), 1);
}

#[test]
fn events_for_returns_newest_first_and_respects_limit() {
    let store = EventStore::default();
    store.append(event_at(EventKind::Arrival, "a", "beacon-A", 0));
    store.append(event_at(EventKind::Arrival, "b", "beacon-B", 1));
    store.append(event_at(EventKind::Departure, "c", "beacon-A", 2));
    store.append(event_at(EventKind::Arrival, "d", "beacon-A", 3));

    let ids: Vec<String> = store
        .events_for("beacon-A", 2)
        .into_iter()
        .map(|e| e.entity_id)
        .collect();
    assert_eq!(ids, vec!["d", "c"]);
    assert!(store.events_for("beacon-Z", 10).is_empty());
    assert!(store.events_for("beacon-A", 0).is_empty());
}

#[test]
fn list_pages_from_the_newest_end() {
    let store = EventStore::default();
    for i in 0..5i64 {
        store.append(event_at(EventKind::Arrival, &format!("e{i}"), "s", i));
    }

    let page = store.list(2, 1);
    let ids: Vec<String> = page.events.into_iter().map(|e| e.entity_id).collect();
    assert_eq!(ids, vec!["e3", "e2"]);
    assert_eq!(page.total, 5);

    assert!(store.list(10, 5).events.is_empty());
}

// ── stats / entities / summary ───────────────────────────────────────

#[test]
fn stats_count_only_the_window() {
    let store = EventStore::default();
    store.append(event_at(EventKind::Arrival, "p1", "beacon-A", 0));
    store.append(event_at(EventKind::Arrival, "p1", "beacon-B", 100));
    store.append(event_at(EventKind::Departure, "p2", "beacon-B", 110));
    store.append(event_at(EventKind::Arrival, "p2", "beacon-C", 120));

    let stats = store.stats_at(Duration::from_secs(30), base() + TimeDelta::seconds(120));
    assert_eq!(stats.total_events, 4);
    assert_eq!(stats.window_total, 3);
    assert_eq!(stats.arrivals, 2);
    assert_eq!(stats.departures, 1);
    assert_eq!(stats.unique_sources, 2);
}

#[test]
fn entities_are_distinct_and_sorted() {
    let store = EventStore::default();
    store.append(event_at(EventKind::Arrival, "zeta", "s", 0));
    store.append(event_at(EventKind::Arrival, "alpha", "s", 1));
    store.append(event_at(EventKind::Departure, "zeta", "s", 2));
    assert_eq!(store.entities(), vec!["alpha".to_string(), "zeta".to_string()]);
}

#[test]
fn summary_counts_events_and_sources() {
    let store = EventStore::default();
    store.append(event_at(EventKind::Arrival, "p", "beacon-A", 0));
    store.append(event_at(EventKind::Arrival, "p", "beacon-B", 1));
    store.append(event_at(EventKind::Departure, "p", "beacon-A", 2));

    let summary = store.summary("/beacon/events");
    assert_eq!(summary.resource, "/beacon/events");
    assert_eq!(summary.events_count, 3);
    assert_eq!(summary.sources, 2);
}

// ── sweep ────────────────────────────────────────────────────────────

#[test]
fn sweep_before_removes_only_older_events() {
    let store = EventStore::default();
    for secs in [0, 10, 20] {
        store.append(event_at(EventKind::Arrival, &format!("e{secs}"), "s", secs));
    }

    let removed = store.sweep_before(base() + TimeDelta::seconds(10));
    assert_eq!(removed, 1);
    let ids: Vec<String> = store.snapshot().into_iter().map(|e| e.entity_id).collect();
    assert_eq!(ids, vec!["e10", "e20"]);

    assert_eq!(store.sweep_before(base()), 0, "sweeping again is a no-op");
}

#[test]
fn sweep_uses_wall_clock_age() {
    let store = EventStore::default();
    let now = Utc::now();
    store.append(Event::new(EventKind::Arrival, "old", "s", now - TimeDelta::days(8)));
    store.append(Event::new(EventKind::Arrival, "new", "s", now));

    assert_eq!(store.sweep(Duration::from_secs(7 * 24 * 60 * 60)), 1);
    assert_eq!(store.snapshot()[0].entity_id, "new");
}

#[test]
fn concurrent_appends_and_sweeps_stay_bounded() {
    let store = std::sync::Arc::new(EventStore::new(50));
    let handles: Vec<_> = (0..4)
        .map(|t| {
            let store = store.clone();
            std::thread::spawn(move || {
                for i in 0..500i64 {
                    store.append(event_at(EventKind::Arrival, &format!("t{t}"), "s", i));
                    if i % 50 == 0 {
                        store.sweep_before(base());
                        let _ = store.current_state();
                    }
                    assert!(store.len() <= 50);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("writer thread should not panic");
    }
    assert_eq!(store.len(), 50);
}

#[test]
fn presence_entry_serializes_camel_case() {
    let store = EventStore::default();
    store.append(event_at(EventKind::Arrival, "p", "beacon-A", 0));
    let json = serde_json::to_value(store.current_state()).unwrap();
    assert_eq!(json[0]["sourceId"], "beacon-A");
    assert_eq!(json[0]["lastEvent"]["kind"], "arrival");
}
