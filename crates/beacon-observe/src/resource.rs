//! Server-side registry of observers for one observable resource.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use beacon_types::{Envelope, Event, ResourceSummary};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

use crate::error::ObserveError;

/// Default per-observer delivery buffer.
pub const DEFAULT_OBSERVER_BUFFER: usize = 64;

pub type ObserverId = Uuid;

/// Lifecycle of one observer. `Detached` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ObserverState {
    Registering,
    Active,
    Detached,
}

/// Public description of a registered observer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObserverInfo {
    pub id: ObserverId,
    pub attached_at: DateTime<Utc>,
    pub state: ObserverState,
}

/// Outcome of one [`ObservableResource::notify`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotifyReport {
    pub delivered: usize,
    pub detached: usize,
}

struct Registration {
    attached_at: DateTime<Utc>,
    state: ObserverState,
    sender: mpsc::Sender<Envelope>,
}

/// Handle held by whoever consumes an observer's deliveries.
///
/// The first envelope is always the snapshot; every later one is an event.
#[derive(Debug)]
pub struct Observer {
    id: ObserverId,
    attached_at: DateTime<Utc>,
    receiver: mpsc::Receiver<Envelope>,
}

impl Observer {
    pub fn id(&self) -> ObserverId {
        self.id
    }

    pub fn attached_at(&self) -> DateTime<Utc> {
        self.attached_at
    }

    /// Waits for the next envelope. Returns `None` once detached and drained.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Envelope> {
        self.receiver.try_recv().ok()
    }

    pub fn into_receiver(self) -> mpsc::Receiver<Envelope> {
        self.receiver
    }
}

/// A named resource that pushes every new event to its observers.
///
/// Delivery never blocks: each observer has a bounded buffer, and an
/// observer whose buffer is full or whose receiver is gone is detached on
/// the spot without affecting the others.
pub struct ObservableResource {
    path: String,
    buffer: usize,
    observers: RwLock<HashMap<ObserverId, Registration>>,
}

impl std::fmt::Debug for ObservableResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservableResource")
            .field("path", &self.path)
            .field("observers", &self.observer_count())
            .finish()
    }
}

impl ObservableResource {
    pub fn new(path: impl Into<String>, buffer: usize) -> Self {
        Self {
            path: path.into(),
            buffer: buffer.max(1),
            observers: RwLock::new(HashMap::new()),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<ObserverId, Registration>> {
        self.observers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ObserverId, Registration>> {
        self.observers.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers an observer and delivers the initial snapshot.
    ///
    /// Registration, snapshot delivery and activation happen under one write
    /// lock, so no event can reach the observer ahead of its snapshot.
    ///
    /// # Errors
    ///
    /// Returns `ObserveError::TransportUnavailable` if the snapshot could not
    /// be queued; the observer is detached in that case.
    pub fn subscribe(&self, summary: ResourceSummary) -> Result<Observer, ObserveError> {
        let id = Uuid::new_v4();
        let attached_at = Utc::now();
        let (sender, receiver) = mpsc::channel(self.buffer);

        let mut observers = self.write();
        observers.insert(
            id,
            Registration {
                attached_at,
                state: ObserverState::Registering,
                sender: sender.clone(),
            },
        );

        if let Err(e) = sender.try_send(Envelope::Snapshot(summary)) {
            observers.remove(&id);
            return Err(ObserveError::TransportUnavailable(format!(
                "failed to deliver snapshot: {e}"
            )));
        }

        if let Some(registration) = observers.get_mut(&id) {
            registration.state = ObserverState::Active;
        }
        let total = observers.len();
        drop(observers);

        tracing::info!(resource = %self.path, observer = %id, total, "observer registered");
        Ok(Observer {
            id,
            attached_at,
            receiver,
        })
    }

    /// Delivers `event` to every active observer.
    ///
    /// Iterates over a copy of the observer set. Each send re-checks that
    /// the observer is still active, so an observer detached mid-notify is
    /// never written to afterwards.
    pub fn notify(&self, event: &Event) -> NotifyReport {
        let targets: Vec<(ObserverId, mpsc::Sender<Envelope>)> = self
            .read()
            .iter()
            .filter(|(_, registration)| registration.state == ObserverState::Active)
            .map(|(id, registration)| (*id, registration.sender.clone()))
            .collect();

        let mut report = NotifyReport::default();
        let mut failed = Vec::new();

        for (id, sender) in targets {
            let outcome = {
                let observers = self.read();
                let active = observers
                    .get(&id)
                    .is_some_and(|registration| registration.state == ObserverState::Active);
                if !active {
                    continue;
                }
                sender.try_send(Envelope::Event(event.clone()))
            };

            match outcome {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(resource = %self.path, observer = %id, "observer buffer full; detaching");
                    failed.push(id);
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(resource = %self.path, observer = %id, "observer receiver closed; detaching");
                    failed.push(id);
                }
            }
        }

        for id in failed {
            if self.detach(id) {
                report.detached += 1;
            }
        }

        report
    }

    /// Detaches an active observer. Safe to call any number of times.
    ///
    /// Returns `true` only for the call that actually detached it.
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        self.detach(id)
    }

    fn detach(&self, id: ObserverId) -> bool {
        let mut observers = self.write();
        let active = observers
            .get(&id)
            .is_some_and(|registration| registration.state == ObserverState::Active);
        if !active {
            return false;
        }
        observers.remove(&id);
        let remaining = observers.len();
        drop(observers);

        tracing::info!(resource = %self.path, observer = %id, remaining, "observer detached");
        true
    }

    pub fn is_active(&self, id: ObserverId) -> bool {
        self.read()
            .get(&id)
            .is_some_and(|registration| registration.state == ObserverState::Active)
    }

    pub fn observer_count(&self) -> usize {
        self.read().len()
    }

    pub fn observers(&self) -> Vec<ObserverInfo> {
        self.read()
            .iter()
            .map(|(id, registration)| ObserverInfo {
                id: *id,
                attached_at: registration.attached_at,
                state: registration.state,
            })
            .collect()
    }
}
