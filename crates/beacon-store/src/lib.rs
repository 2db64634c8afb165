//! Bounded presence history for the beacon relay.
//!
//! [`EventStore`] owns the canonical in-memory event log. It keeps at most
//! `max_events` events (oldest evicted first) and drops events older than a
//! retention age whenever it is swept. Every other view (the per-source
//! presence index, windowed statistics, per-source history) is derived
//! from the log on demand.
//!
//! # Usage
//!
//! ```rust,ignore
//! use beacon_store::EventStore;
//!
//! let store = EventStore::new(1000);
//! store.append(event);
//! for entry in store.current_state() {
//!     println!("{} -> {}", entry.source_id, entry.last_event.kind);
//! }
//! ```

mod store;
mod views;

pub use store::{EventStore, DEFAULT_MAX_EVENTS};
pub use views::{cutoff, event_stats, presence_index, EventStats, Page, PresenceEntry};

#[cfg(test)]
mod tests;
