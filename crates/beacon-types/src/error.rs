//! Validation errors for incoming events.

/// Reasons an event is rejected at ingress.
///
/// A rejected event is never stored or forwarded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidEvent {
    /// A required field was absent or blank.
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// The `kind` label is neither `arrival` nor `departure`.
    #[error("unknown event kind: {0}")]
    UnknownKind(String),

    /// An explicit attribute carried an array, object or null.
    #[error("attribute {0} must be a scalar value")]
    NonScalarAttribute(String),
}
