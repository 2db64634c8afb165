//! Long-lived observation client with bounded start-up retries.
//!
//! # Lifecycle
//!
//! ```text
//! Disconnected --open--> Connecting --snapshot--> Observing
//!                            |                        |
//!                            +-------failure----------+--> Retrying --delay--> Connecting
//!                                                                  |
//!                            (no success yet, budget spent) -------+--> Exhausted
//! ```
//!
//! Until the first session reaches `Observing`, failures count against
//! [`RetryPolicy::max_start_retries`]. Once any session has succeeded,
//! reconnection is unbounded with a fixed delay. `Exhausted` is terminal
//! until [`ObservationClient::open`] is called again.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use beacon_types::Envelope;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;

use crate::error::ObserveError;
use crate::sink::EventSink;
use crate::transport::ObserveTransport;

/// Observable state of an [`ObservationClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Observing,
    Retrying,
    Exhausted,
}

/// Reconnect timing and start-up budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Pause between a failure and the next attempt.
    pub delay: Duration,
    /// Failed attempts tolerated before the first success. Zero is treated
    /// as one.
    pub max_start_retries: u32,
    /// Bound on waiting for the observe request and, for confirmable
    /// sessions, its snapshot.
    pub connect_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(5),
            max_start_retries: 5,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based). Fixed.
    pub fn backoff(&self, _retry: u32) -> Duration {
        self.delay
    }

    fn start_budget(&self) -> u32 {
        self.max_start_retries.max(1)
    }
}

/// Subscribes to a remote observable resource and forwards its events to
/// an [`EventSink`].
pub struct ObservationClient {
    transport: Arc<dyn ObserveTransport>,
    sink: Arc<dyn EventSink>,
    policy: RetryPolicy,
    state: Arc<watch::Sender<SessionState>>,
    epoch: Arc<AtomicU64>,
    driver: Option<JoinHandle<Result<(), ObserveError>>>,
}

impl ObservationClient {
    pub fn new(transport: Arc<dyn ObserveTransport>, sink: Arc<dyn EventSink>) -> Self {
        let (state, _) = watch::channel(SessionState::Disconnected);
        Self {
            transport,
            sink,
            policy: RetryPolicy::default(),
            state: Arc::new(state),
            epoch: Arc::new(AtomicU64::new(0)),
            driver: None,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Receiver that sees every state transition.
    pub fn watch(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Starts a session. Only acts from `Disconnected` or `Exhausted`;
    /// returns `false` otherwise.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn open(&mut self) -> bool {
        let current = self.state();
        if !matches!(current, SessionState::Disconnected | SessionState::Exhausted) {
            tracing::debug!(state = ?current, "open ignored; session already running");
            return false;
        }

        if let Some(previous) = self.driver.take() {
            previous.abort();
        }

        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let session = Session {
            transport: self.transport.clone(),
            sink: self.sink.clone(),
            policy: self.policy,
            state: self.state.clone(),
            epoch: self.epoch.clone(),
            current_epoch: epoch,
        };
        session.set(SessionState::Connecting);
        self.driver = Some(tokio::spawn(session.drive()));
        true
    }

    /// Stops the session and cancels any pending retry. Idempotent.
    pub fn close(&mut self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
        let previous = self.state.send_replace(SessionState::Disconnected);
        if previous != SessionState::Disconnected {
            tracing::info!(from = ?previous, "observation session closed");
        }
    }

    /// Waits for the running session to end.
    ///
    /// Resolves with `Err(SubscriptionExhausted)` when the start-up budget
    /// was spent, and with `Ok(())` when the session was closed or never
    /// opened.
    pub async fn join(&mut self) -> Result<(), ObserveError> {
        match self.driver.take() {
            Some(driver) => match driver.await {
                Ok(outcome) => outcome,
                Err(e) if e.is_cancelled() => Ok(()),
                Err(e) => Err(ObserveError::TransportUnavailable(format!(
                    "observation driver failed: {e}"
                ))),
            },
            None => Ok(()),
        }
    }
}

impl Drop for ObservationClient {
    fn drop(&mut self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
    }
}

/// State owned by one driver task.
struct Session {
    transport: Arc<dyn ObserveTransport>,
    sink: Arc<dyn EventSink>,
    policy: RetryPolicy,
    state: Arc<watch::Sender<SessionState>>,
    epoch: Arc<AtomicU64>,
    current_epoch: u64,
}

impl Session {
    fn is_current(&self) -> bool {
        self.epoch.load(Ordering::SeqCst) == self.current_epoch
    }

    /// Publishes `next` unless this session has been superseded.
    fn set(&self, next: SessionState) {
        self.state.send_if_modified(|state| {
            if !self.is_current() || *state == next {
                return false;
            }
            *state = next;
            true
        });
    }

    async fn drive(self) -> Result<(), ObserveError> {
        let mut ever_observed = false;
        let mut start_failures: u32 = 0;
        let mut retries: u32 = 0;

        loop {
            self.set(SessionState::Connecting);
            let failure = self.observe_once(&mut ever_observed).await;
            if !self.is_current() {
                return Ok(());
            }

            self.set(SessionState::Retrying);

            if !ever_observed {
                start_failures += 1;
                if start_failures >= self.policy.start_budget() {
                    self.set(SessionState::Exhausted);
                    tracing::error!(
                        attempts = start_failures,
                        error = %failure,
                        "observation subscription failed before first success; giving up"
                    );
                    return Err(ObserveError::SubscriptionExhausted {
                        attempts: start_failures,
                    });
                }
            }

            retries = retries.saturating_add(1);
            let delay = self.policy.backoff(retries);
            tracing::warn!(
                error = %failure,
                retry = retries,
                delay_ms = delay.as_millis() as u64,
                "observation session lost; retrying"
            );
            time::sleep(delay).await;
        }
    }

    /// Runs one observe session until it fails. Returns the failure.
    async fn observe_once(&self, ever_observed: &mut bool) -> ObserveError {
        let timeout = self.policy.connect_timeout;
        let mut frames = match time::timeout(timeout, self.transport.subscribe()).await {
            Ok(Ok(frames)) => frames,
            Ok(Err(e)) => return e,
            Err(_) => return ObserveError::Timeout(timeout),
        };

        let mut observing = false;
        if !self.transport.confirmable() {
            observing = self.mark_observing(ever_observed);
        }

        loop {
            let next = if observing {
                frames.recv().await
            } else {
                match time::timeout(timeout, frames.recv()).await {
                    Ok(next) => next,
                    Err(_) => return ObserveError::Timeout(timeout),
                }
            };

            let frame = match next {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => return e,
                None => {
                    return ObserveError::TransportUnavailable(
                        "observation stream closed by peer".to_string(),
                    )
                }
            };

            match Envelope::from_frame(&frame) {
                Ok(Envelope::Snapshot(summary)) => {
                    if observing {
                        tracing::debug!("duplicate snapshot ignored");
                        continue;
                    }
                    observing = self.mark_observing(ever_observed);
                    tracing::info!(
                        resource = %summary.resource,
                        events_count = summary.events_count,
                        sources = summary.sources,
                        "observation established"
                    );
                }
                Ok(Envelope::Event(event)) => {
                    if !observing {
                        tracing::warn!(
                            source_id = %event.source_id,
                            "event received before observation was established; discarding"
                        );
                        continue;
                    }
                    if self.is_current() {
                        self.sink.deliver(event);
                    }
                }
                Err(e) => {
                    let error = ObserveError::Decode(e);
                    tracing::warn!(%error, %frame, "discarding undecodable frame");
                }
            }
        }
    }

    fn mark_observing(&self, ever_observed: &mut bool) -> bool {
        *ever_observed = true;
        self.set(SessionState::Observing);
        true
    }
}
