//! Background tasks for the beacon server.
//!
//! Includes:
//! - Sweeping events older than the retention age.

use std::sync::Arc;

use beacon_store::EventStore;
use tokio::time::{sleep, Duration};

/// Starts the retention sweep task.
///
/// Runs indefinitely, removing events older than `max_age` every
/// `interval`. An `interval` of zero disables the task.
pub async fn start_sweep_task(store: Arc<EventStore>, interval: Duration, max_age: Duration) {
    if interval.is_zero() {
        tracing::warn!("retention sweep disabled (interval=0)");
        return;
    }

    tracing::info!(
        interval_secs = interval.as_secs(),
        max_age_secs = max_age.as_secs(),
        "starting retention sweep task"
    );

    loop {
        sleep(interval).await;

        let removed = store.sweep(max_age);
        if removed > 0 {
            tracing::info!(removed, remaining = store.len(), "swept expired events");
        }
    }
}
