//! Presence event records and the raw ingestion shape they are built from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::error::InvalidEvent;

/// Whether an entity arrived at or departed from a beacon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// The entity came into range of the beacon.
    Arrival,
    /// The entity left the beacon's range.
    Departure,
}

impl EventKind {
    /// Returns the canonical string label for this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Arrival => "arrival",
            Self::Departure => "departure",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventKind {
    type Err = ParseEventKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "arrival" => Ok(Self::Arrival),
            "departure" => Ok(Self::Departure),
            _ => Err(ParseEventKindError(s.to_string())),
        }
    }
}

/// Error returned when parsing an unknown event kind string.
#[derive(Debug, Clone)]
pub struct ParseEventKindError(pub String);

impl std::fmt::Display for ParseEventKindError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown event kind: {}", self.0)
    }
}

impl std::error::Error for ParseEventKindError {}

/// A scalar attribute value carried through untouched from the producer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl AttributeValue {
    /// Converts a JSON value into a scalar attribute.
    ///
    /// Returns `None` for `null`, arrays and objects.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::Number(n) => n
                .as_i64()
                .map(Self::Integer)
                .or_else(|| n.as_f64().map(Self::Float)),
            Value::String(s) => Some(Self::Text(s.clone())),
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Passthrough attributes attached to an event.
pub type Attributes = BTreeMap<String, AttributeValue>;

/// An accepted, normalized presence event.
///
/// Events are immutable once accepted: every component receives its own
/// clone and never a reference into another component's state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Arrival or departure.
    pub kind: EventKind,
    /// The entity (phone, badge, tag holder) that moved.
    pub entity_id: String,
    /// The beacon or tag identifier the entity was detected at.
    pub source_id: String,
    /// Received signal strength, when the gateway reported one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal_strength: Option<f64>,
    /// Acceptance timestamp assigned by ingress.
    pub occurred_at: DateTime<Utc>,
    /// Producer-supplied scalar attributes.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: Attributes,
}

impl Event {
    pub fn new(
        kind: EventKind,
        entity_id: impl Into<String>,
        source_id: impl Into<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            entity_id: entity_id.into(),
            source_id: source_id.into(),
            signal_strength: None,
            occurred_at,
            attributes: Attributes::new(),
        }
    }

    pub fn with_signal_strength(mut self, signal_strength: f64) -> Self {
        self.signal_strength = Some(signal_strength);
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// An event as submitted by a producer, before validation.
///
/// Accepts both the current camelCase names and the legacy gateway names
/// (`eventType`, `deviceId`, `beaconId`, `rssi`, `timestamp`). Unknown
/// top-level fields are captured in `extra` and folded into the attributes
/// during [`RawEvent::normalize`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEvent {
    #[serde(default, alias = "eventType")]
    pub kind: Option<String>,
    #[serde(default, alias = "deviceId")]
    pub entity_id: Option<String>,
    #[serde(default, alias = "beaconId")]
    pub source_id: Option<String>,
    #[serde(default, alias = "rssi")]
    pub signal_strength: Option<f64>,
    #[serde(default, alias = "timestamp")]
    pub occurred_at: Option<Value>,
    #[serde(default)]
    pub attributes: Option<Map<String, Value>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RawEvent {
    /// Overrides the kind, e.g. when it is implied by the ingestion route.
    pub fn with_kind(mut self, kind: EventKind) -> Self {
        self.kind = Some(kind.as_str().to_string());
        self
    }

    /// Validates the raw event and builds an [`Event`].
    ///
    /// `now` is used as the timestamp when `occurredAt` is absent or cannot
    /// be parsed as RFC 3339. A supplied timestamp later than `now` is
    /// capped at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidEvent`] when `kind`, `entityId` or `sourceId` is
    /// missing or empty, the kind is unknown, or an explicit attribute is not
    /// a scalar.
    pub fn normalize(self, now: DateTime<Utc>) -> Result<Event, InvalidEvent> {
        let entity_id = required(self.entity_id, "entityId")?;
        let source_id = required(self.source_id, "sourceId")?;
        let kind_label = required(self.kind, "kind")?;
        let kind = kind_label
            .parse::<EventKind>()
            .map_err(|_| InvalidEvent::UnknownKind(kind_label))?;

        let occurred_at = self
            .occurred_at
            .as_ref()
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc).min(now))
            .unwrap_or(now);

        let mut attributes = Attributes::new();
        for (key, value) in self.attributes.unwrap_or_default() {
            let scalar = AttributeValue::from_json(&value)
                .ok_or_else(|| InvalidEvent::NonScalarAttribute(key.clone()))?;
            attributes.insert(key, scalar);
        }
        // Unknown top-level scalars (name, uuid, ...) ride along unless an
        // explicit attribute already claimed the key.
        for (key, value) in self.extra {
            if let Some(scalar) = AttributeValue::from_json(&value) {
                attributes.entry(key).or_insert(scalar);
            }
        }

        Ok(Event {
            kind,
            entity_id,
            source_id,
            signal_strength: self.signal_strength,
            occurred_at,
            attributes,
        })
    }
}

fn required(value: Option<String>, field: &'static str) -> Result<String, InvalidEvent> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(InvalidEvent::MissingField(field)),
    }
}
