use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::Serialize;
use tokio::time;
use tracing::info;
use utoipa::ToSchema;

use crate::channel::TransportStatus;
use crate::store::ReadingStore;

/// Derived per-device health, recomputed on a fixed tick and on every
/// accepted reading (level-triggered, never edge-triggered).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DeviceHealth {
    /// A reading was accepted within the freshness window.
    Live,
    /// Transport connected, but no reading within the freshness window.
    Stale,
    /// Never heard from, or disconnected with nothing fresh.
    Offline,
}

type HealthCallback = Box<dyn Fn(&str, DeviceHealth) + Send + Sync>;

/// Computes device health from the time since the last accepted reading and
/// the transport connectivity flag — independent of whether the transport
/// itself claims to be healthy.
#[derive(Clone)]
pub struct StalenessMonitor {
    inner: Arc<Inner>,
}

struct Inner {
    store: ReadingStore,
    transport: TransportStatus,
    freshness_window: Duration,
    tick: Duration,
    devices: Vec<String>,
    subscribers: RwLock<Vec<HealthCallback>>,
}

impl StalenessMonitor {
    pub fn new(
        store: ReadingStore,
        transport: TransportStatus,
        freshness_window: Duration,
        tick: Duration,
        devices: Vec<String>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                transport,
                freshness_window,
                tick,
                devices,
                subscribers: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Pure function of current time, last-accepted time, and transport
    /// status; safe to call at any rate.
    pub fn evaluate(&self, device_id: &str) -> DeviceHealth {
        classify(
            self.inner.store.last_accepted_age(device_id),
            self.inner.transport.is_connected(),
            self.inner.freshness_window,
        )
    }

    /// Subscribe to health recomputation events: fired for each watched
    /// device on every tick, and immediately on every accepted reading.
    pub fn on_tick(&self, callback: impl Fn(&str, DeviceHealth) + Send + Sync + 'static) {
        self.inner
            .subscribers
            .write()
            .expect("monitor lock poisoned")
            .push(Box::new(callback));
    }

    /// Called by the dispatch path right after the store accepts a reading.
    pub fn reading_accepted(&self, device_id: &str) {
        let health = self.evaluate(device_id);
        self.notify(device_id, health);
    }

    /// Configured watchlist (devices monitored even before their first
    /// reading arrives).
    pub fn watched_devices(&self) -> Vec<String> {
        self.inner.devices.clone()
    }

    /// Tick loop; runs for the lifetime of the monitoring session.
    pub async fn run(self) {
        info!(
            tick_secs = self.inner.tick.as_secs(),
            freshness_secs = self.inner.freshness_window.as_secs(),
            "staleness monitor started"
        );
        let mut ticker = time::interval(self.inner.tick);
        let mut previous: HashMap<String, DeviceHealth> = HashMap::new();

        loop {
            ticker.tick().await;
            for device_id in self.watchlist() {
                let health = self.evaluate(&device_id);
                if previous.insert(device_id.clone(), health) != Some(health) {
                    info!(device_id = %device_id, health = ?health, "device health changed");
                }
                self.notify(&device_id, health);
            }
        }
    }

    fn notify(&self, device_id: &str, health: DeviceHealth) {
        let subscribers = self.inner.subscribers.read().expect("monitor lock poisoned");
        for callback in subscribers.iter() {
            callback(device_id, health);
        }
    }

    /// Configured devices plus anything push discovery has added to the
    /// store.
    fn watchlist(&self) -> Vec<String> {
        let mut ids = self.inner.devices.clone();
        ids.extend(self.inner.store.device_ids());
        ids.sort();
        ids.dedup();
        ids
    }
}

fn classify(age: Option<Duration>, connected: bool, freshness_window: Duration) -> DeviceHealth {
    match age {
        None => DeviceHealth::Offline,
        Some(age) if age <= freshness_window => DeviceHealth::Live,
        Some(_) if connected => DeviceHealth::Stale,
        Some(_) => DeviceHealth::Offline,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reading::Reading;
    use chrono::{TimeZone, Utc};
    use std::sync::Mutex;

    const FRESHNESS: Duration = Duration::from_secs(30);

    fn reading(device_id: &str, epoch_secs: i64) -> Reading {
        Reading {
            device_id: device_id.to_owned(),
            timestamp: Utc.timestamp_opt(epoch_secs, 0).unwrap(),
            voltage: Some(220.0),
            current: Some(2.0),
            power: Some(440.0),
            energy: None,
            pir_status: false,
            pump_status: false,
            auto_mode: false,
        }
    }

    fn monitor(devices: &[&str]) -> (StalenessMonitor, ReadingStore, TransportStatus) {
        let store = ReadingStore::new(8);
        let status = TransportStatus::new();
        let monitor = StalenessMonitor::new(
            store.clone(),
            status.clone(),
            FRESHNESS,
            Duration::from_secs(2),
            devices.iter().map(|s| s.to_string()).collect(),
        );
        (monitor, store, status)
    }

    // -- classify ------------------------------------------------------------

    #[test]
    fn never_seen_is_offline_regardless_of_transport() {
        assert_eq!(classify(None, true, FRESHNESS), DeviceHealth::Offline);
        assert_eq!(classify(None, false, FRESHNESS), DeviceHealth::Offline);
    }

    #[test]
    fn fresh_reading_is_live_even_when_disconnected() {
        let age = Some(Duration::from_secs(10));
        assert_eq!(classify(age, true, FRESHNESS), DeviceHealth::Live);
        assert_eq!(classify(age, false, FRESHNESS), DeviceHealth::Live);
    }

    #[test]
    fn aged_out_but_connected_is_stale() {
        let age = Some(Duration::from_secs(31));
        assert_eq!(classify(age, true, FRESHNESS), DeviceHealth::Stale);
    }

    #[test]
    fn aged_out_and_disconnected_is_offline() {
        let age = Some(Duration::from_secs(31));
        assert_eq!(classify(age, false, FRESHNESS), DeviceHealth::Offline);
    }

    #[test]
    fn freshness_boundary_is_still_live() {
        assert_eq!(classify(Some(FRESHNESS), true, FRESHNESS), DeviceHealth::Live);
    }

    // -- evaluate ------------------------------------------------------------

    #[test]
    fn evaluate_tracks_reading_age() {
        let (monitor, store, status) = monitor(&["d1"]);
        status.set_connected(true);

        assert_eq!(monitor.evaluate("d1"), DeviceHealth::Offline);

        store.upsert(reading("d1", 1_700_000_000)).unwrap();
        assert_eq!(monitor.evaluate("d1"), DeviceHealth::Live);

        store.backdate("d1", Duration::from_secs(31));
        assert_eq!(monitor.evaluate("d1"), DeviceHealth::Stale);

        status.set_connected(false);
        assert_eq!(monitor.evaluate("d1"), DeviceHealth::Offline);
    }

    #[test]
    fn clearing_a_device_returns_it_to_offline() {
        let (monitor, store, status) = monitor(&["d1"]);
        status.set_connected(true);
        store.upsert(reading("d1", 1_700_000_000)).unwrap();
        assert_eq!(monitor.evaluate("d1"), DeviceHealth::Live);

        store.clear("d1");
        assert_eq!(monitor.evaluate("d1"), DeviceHealth::Offline);
    }

    #[test]
    fn reading_accepted_notifies_subscribers() {
        let (monitor, store, status) = monitor(&["d1"]);
        status.set_connected(true);

        let events = Arc::new(Mutex::new(Vec::new()));
        {
            let events = Arc::clone(&events);
            monitor.on_tick(move |device_id, health| {
                events.lock().unwrap().push((device_id.to_owned(), health));
            });
        }

        store.upsert(reading("d1", 1_700_000_000)).unwrap();
        monitor.reading_accepted("d1");

        let events = events.lock().unwrap();
        assert_eq!(events.as_slice(), &[("d1".to_owned(), DeviceHealth::Live)]);
    }
}
