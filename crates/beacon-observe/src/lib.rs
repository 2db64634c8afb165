//! Observation for the beacon presence relay.
//!
//! Two halves of the same protocol live here:
//!
//! - [`ObservableResource`] is the server side. It keeps the set of
//!   registered observers, sends each a [`ResourceSummary`] snapshot on
//!   registration and pushes every accepted event to all of them. A failing
//!   observer is detached without disturbing the rest.
//! - [`ObservationClient`] is the subscriber side. It opens a session
//!   through an [`ObserveTransport`], forwards events to an [`EventSink`]
//!   and reconnects on failure according to a [`RetryPolicy`].
//!
//! # Frames
//!
//! Every frame is one line of JSON, tagged by `type`:
//!
//! | `type` | When |
//! |--------|------|
//! | `snapshot` | Exactly once, first, on registration |
//! | `event` | Once per event accepted while registered |
//!
//! # Usage
//!
//! ```rust,ignore
//! use beacon_observe::{HttpObserveTransport, ObservationClient, ObserveTarget, RetryPolicy};
//!
//! let target = ObserveTarget {
//!     base_url: "http://127.0.0.1:5683".into(),
//!     resource: "/beacon/events".into(),
//!     confirmable: true,
//! };
//! let transport = HttpObserveTransport::new(target, policy.connect_timeout)?;
//! let mut client = ObservationClient::new(Arc::new(transport), Arc::new(LogSink))
//!     .with_policy(RetryPolicy::default());
//! client.open();
//! ```
//!
//! [`ResourceSummary`]: beacon_types::ResourceSummary

mod client;
mod error;
mod resource;
mod sink;
mod transport;

pub use client::{ObservationClient, RetryPolicy, SessionState};
pub use error::ObserveError;
pub use resource::{
    NotifyReport, ObservableResource, Observer, ObserverId, ObserverInfo, ObserverState,
    DEFAULT_OBSERVER_BUFFER,
};
pub use sink::{EventSink, FanoutSink, LogSink};
pub use transport::{
    FrameReceiver, HttpObserveTransport, ObserveTarget, ObserveTransport, MAX_FRAME_BYTES,
    NDJSON_CONTENT_TYPE, OBSERVE_HEADER,
};
