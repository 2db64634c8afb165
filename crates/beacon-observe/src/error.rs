//! Error types for observation sessions and observer delivery.

use std::time::Duration;

/// Errors raised while observing a resource.
#[derive(Debug, thiserror::Error)]
pub enum ObserveError {
    /// The network could not be reached, the peer refused the observe
    /// request, or the stream ended.
    #[error("observe transport unavailable: {0}")]
    TransportUnavailable(String),

    /// A frame could not be decoded. The frame is discarded and the session
    /// continues.
    #[error("observe decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// The observe request or its acknowledgment did not arrive in time.
    #[error("observe request timed out after {0:?}")]
    Timeout(Duration),

    /// The retry budget was spent before the first successful observation.
    /// Terminal until the client is explicitly reopened.
    #[error("observation subscription exhausted after {attempts} attempts")]
    SubscriptionExhausted { attempts: u32 },
}
