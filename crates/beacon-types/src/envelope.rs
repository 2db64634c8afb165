//! Frames exchanged on an observation stream.

use serde::{Deserialize, Serialize};

use crate::event::Event;

/// Summary of the resource backlog sent to a new observer.
///
/// Deliberately small: observers get counts, never the full log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSummary {
    /// Path of the observed resource.
    pub resource: String,
    /// Number of events currently retained.
    pub events_count: usize,
    /// Number of distinct sources with at least one retained event.
    pub sources: usize,
}

/// One frame on an observation stream.
///
/// The `type` tag lets a receiver tell the initial snapshot apart from a
/// real event without inspecting the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    /// Sent exactly once, first, when an observer registers.
    Snapshot(ResourceSummary),
    /// A presence event accepted after the observer registered.
    Event(Event),
}

impl Envelope {
    pub fn is_snapshot(&self) -> bool {
        matches!(self, Self::Snapshot(_))
    }

    /// Encodes the envelope as a single newline-terminated JSON line.
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    /// Decodes one frame. Surrounding whitespace is ignored.
    pub fn from_frame(frame: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(frame.trim())
    }
}
