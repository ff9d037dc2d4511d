use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use crate::reading::{InvalidReading, Reading};

/// In-memory store of the most recent `Reading` plus a bounded history ring
/// per device; the single source of truth for "current value".
///
/// Wrapped in `Arc` so it can be cheaply cloned and shared across tasks.
/// Written only by the update channel's dispatch path, read by arbitrary
/// consumers; all reads return owned snapshots.
#[derive(Clone)]
pub struct ReadingStore {
    inner: Arc<RwLock<HashMap<String, DeviceSlot>>>,
    capacity: usize,
}

struct DeviceSlot {
    latest: Reading,
    history: VecDeque<Reading>,
    /// Receipt time of the last accepted reading; feeds staleness checks.
    last_accepted: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Accepted,
    /// Discarded: producer timestamp not newer than the stored reading.
    Outdated,
}

impl ReadingStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    /// Apply the supersede rule: a strictly later producer timestamp replaces
    /// the stored reading, an equal or earlier one is discarded. Acceptance
    /// appends to the history ring (evicting the oldest entry at capacity)
    /// and stamps the last-accepted time.
    pub fn upsert(&self, reading: Reading) -> Result<UpsertOutcome, InvalidReading> {
        if reading.device_id.is_empty() {
            return Err(InvalidReading::MissingDeviceId);
        }

        let mut devices = self.write();
        match devices.get_mut(&reading.device_id) {
            Some(slot) => {
                if reading.timestamp <= slot.latest.timestamp {
                    return Ok(UpsertOutcome::Outdated);
                }
                if slot.history.len() >= self.capacity {
                    slot.history.pop_front();
                }
                slot.history.push_back(reading.clone());
                slot.latest = reading;
                slot.last_accepted = Instant::now();
            }
            None => {
                let mut history = VecDeque::with_capacity(self.capacity);
                history.push_back(reading.clone());
                devices.insert(
                    reading.device_id.clone(),
                    DeviceSlot {
                        latest: reading,
                        history,
                        last_accepted: Instant::now(),
                    },
                );
            }
        }
        Ok(UpsertOutcome::Accepted)
    }

    /// Latest accepted reading for a device, if any.
    pub fn latest(&self, device_id: &str) -> Option<Reading> {
        self.read().get(device_id).map(|slot| slot.latest.clone())
    }

    /// Owned snapshot of the history ring, oldest first. Concurrent upserts
    /// cannot affect an iteration over the returned vector.
    pub fn history(&self, device_id: &str) -> Vec<Reading> {
        self.read()
            .get(device_id)
            .map(|slot| slot.history.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop all state for a device (used when the actively-monitored device
    /// changes).
    pub fn clear(&self, device_id: &str) {
        self.write().remove(device_id);
    }

    /// Time since the last accepted reading, `None` if the device has never
    /// been seen.
    pub fn last_accepted_age(&self, device_id: &str) -> Option<Duration> {
        self.read()
            .get(device_id)
            .map(|slot| slot.last_accepted.elapsed())
    }

    /// All device ids with stored state, sorted for stable listings.
    pub fn device_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, DeviceSlot>> {
        self.inner.read().expect("reading store lock poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, DeviceSlot>> {
        self.inner.write().expect("reading store lock poisoned")
    }

    #[cfg(test)]
    pub(crate) fn backdate(&self, device_id: &str, age: Duration) {
        if let Some(slot) = self.write().get_mut(device_id) {
            slot.last_accepted = Instant::now() - age;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
