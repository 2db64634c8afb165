//! Shared types for the beacon presence relay.
//!
//! Every crate in the workspace exchanges presence data through the types
//! defined here:
//!
//! - [`Event`]: an accepted arrival/departure record
//! - [`RawEvent`]: what a producer submits, before validation
//! - [`Envelope`]: one frame on an observation stream, either the initial
//!   [`ResourceSummary`] snapshot or an event
//!
//! # Wire format
//!
//! Events are JSON with camelCase keys:
//!
//! ```json
//! {"kind":"arrival","entityId":"phone-1","sourceId":"beacon-A",
//!  "signalStrength":-61.0,"occurredAt":"2025-01-01T12:00:00Z",
//!  "attributes":{"name":"Lobby"}}
//! ```

mod envelope;
mod error;
mod event;

pub use envelope::{Envelope, ResourceSummary};
pub use error::InvalidEvent;
pub use event::{
    AttributeValue, Attributes, Event, EventKind, ParseEventKindError, RawEvent,
};
