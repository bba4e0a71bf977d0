mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;
mod store;

pub use availability::{availability, first_uncovered_day, merge_windows, uncovered};
pub use conflict::{overlaps, point_in_interval};
pub use error::{Entity, EngineError};
pub use store::{APPOINTMENT_SLOT_CONSTRAINT, ClinicStore, Fixture, InMemoryStore, StoreError};

use std::hash::Hash;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::model::*;
use crate::notify::NotifyHub;
use crate::observability::{DECISIONS_TOTAL, DECISION_DURATION_SECONDS, LOCK_WAIT_SECONDS};

// ── Keyed serialization ──────────────────────────────────

/// One async mutex per key, created on demand and dropped when the last
/// holder releases it.
pub(super) struct KeyedLocks<K: Eq + Hash> {
    locks: DashMap<K, Arc<Mutex<()>>>,
}

pub(super) struct KeyedGuard<'a, K: Eq + Hash> {
    locks: &'a DashMap<K, Arc<Mutex<()>>>,
    key: K,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    fn new() -> Self {
        Self { locks: DashMap::new() }
    }

    pub(super) async fn lock(&self, key: K) -> KeyedGuard<'_, K> {
        let wait_start = Instant::now();
        // Clone the Arc out so no shard lock is held across the await.
        let mutex = self.locks.entry(key.clone()).or_default().clone();
        let guard = mutex.lock_owned().await;
        metrics::histogram!(LOCK_WAIT_SECONDS).record(wait_start.elapsed().as_secs_f64());
        KeyedGuard {
            locks: &self.locks,
            key,
            guard: Some(guard),
        }
    }

    /// Lock two keys in ascending order, or once when they are equal.
    pub(super) async fn lock_both(&self, a: K, b: K) -> (KeyedGuard<'_, K>, Option<KeyedGuard<'_, K>>)
    where
        K: Ord,
    {
        if a == b {
            return (self.lock(a).await, None);
        }
        let (first, second) = if a < b { (a, b) } else { (b, a) };
        let first = self.lock(first).await;
        let second = self.lock(second).await;
        (first, Some(second))
    }

    pub(super) fn len(&self) -> usize {
        self.locks.len()
    }
}

impl<K: Eq + Hash> Drop for KeyedGuard<'_, K> {
    fn drop(&mut self) {
        self.guard.take();
        // Only the map's own reference left: nobody holds or awaits this key.
        self.locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

// ── Engine ───────────────────────────────────────────────

/// Booking validator and vaccination window guard over an injected store.
///
/// Reads are always fresh from the store. Writes for one doctor (or one
/// animal + vaccine name) are serialized so check-then-write cannot race
/// in-process; the store's slot constraint covers other processes.
pub struct Engine {
    store: Arc<dyn ClinicStore>,
    pub notify: Arc<NotifyHub>,
    pub(super) doctor_locks: KeyedLocks<DoctorId>,
    pub(super) vaccine_locks: KeyedLocks<(AnimalId, String)>,
}

impl Engine {
    pub fn new(store: Arc<dyn ClinicStore>, notify: Arc<NotifyHub>) -> Self {
        Self {
            store,
            notify,
            doctor_locks: KeyedLocks::new(),
            vaccine_locks: KeyedLocks::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn ClinicStore> {
        &self.store
    }

    /// Number of lock entries currently alive. Zero when the engine is idle.
    pub fn held_locks(&self) -> usize {
        self.doctor_locks.len() + self.vaccine_locks.len()
    }

    pub(super) async fn require_doctor(&self, id: DoctorId) -> Result<Doctor, EngineError> {
        self.store
            .get_doctor(id)
            .await?
            .ok_or(EngineError::NotFound(Entity::Doctor, id))
    }

    pub(super) async fn require_animal(&self, id: AnimalId) -> Result<Animal, EngineError> {
        self.store
            .get_animal(id)
            .await?
            .ok_or(EngineError::NotFound(Entity::Animal, id))
    }

    pub(super) fn publish(&self, topics: &[Topic], event: Event) {
        for topic in topics {
            self.notify.send(*topic, &event);
        }
    }
}

/// Count and time a validate-and-commit call, and log its rejection.
pub(super) fn record_decision<T>(
    operation: &'static str,
    started: Instant,
    result: &Result<T, EngineError>,
) {
    let outcome = match result {
        Ok(_) => "accepted",
        Err(e) => e.code(),
    };
    metrics::counter!(DECISIONS_TOTAL, "operation" => operation, "outcome" => outcome)
        .increment(1);
    metrics::histogram!(DECISION_DURATION_SECONDS, "operation" => operation)
        .record(started.elapsed().as_secs_f64());
    match result {
        Err(e) if !e.is_rejection() => warn!("{operation} failed: {e}"),
        Err(e) => debug!("{operation} rejected: {e}"),
        Ok(_) => {}
    }
}
