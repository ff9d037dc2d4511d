pub mod pull;
pub mod push;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::reading::Reading;

use self::pull::{PullError, PullSource};
use self::push::{PushEvent, PushTransport};

/// Transport-level connectivity, shared between the channel and consumers
/// that derive state from it (the staleness monitor reads it on every tick).
#[derive(Clone, Default)]
pub struct TransportStatus {
    connected: Arc<AtomicBool>,
}

impl TransportStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }
}

type ReadingCallback = Box<dyn Fn(&Reading) + Send + Sync>;
type ErrorCallback = Box<dyn Fn(&PullError) + Send + Sync>;

struct Subscribers {
    readings: RwLock<Vec<ReadingCallback>>,
    errors: RwLock<Vec<ErrorCallback>>,
    /// Cleared by `stop()` before the tasks wind down, so a result landing
    /// after teardown is discarded instead of delivered.
    active: AtomicBool,
}

impl Subscribers {
    fn new() -> Self {
        Self {
            readings: RwLock::new(Vec::new()),
            errors: RwLock::new(Vec::new()),
            active: AtomicBool::new(false),
        }
    }

    /// Normalize one wire payload and hand it to every reading callback, in
    /// receipt order. Ordering by producer timestamp is the store's job, not
    /// the channel's.
    fn dispatch_wire(&self, payload: &serde_json::Value, device_hint: Option<&str>) {
        if !self.active.load(Ordering::SeqCst) {
            return;
        }
        match Reading::from_wire(payload, device_hint) {
            Ok(reading) => {
                let callbacks = self.readings.read().expect("subscriber lock poisoned");
                for callback in callbacks.iter() {
                    callback(&reading);
                }
            }
            Err(e) => warn!(error = %e, "dropping malformed reading"),
        }
    }

    fn dispatch_error(&self, error: &PullError) {
        if !self.active.load(Ordering::SeqCst) {
            return;
        }
        let callbacks = self.errors.read().expect("subscriber lock poisoned");
        for callback in callbacks.iter() {
            callback(error);
        }
    }
}

/// Merges two heterogeneous update sources — an event-driven push
/// subscription and a timer-driven pull request — into one normalized stream
/// of readings delivered to registered callbacks.
///
/// Each instance owns its subscription and timer handles; constructing one
/// per monitoring session and calling [`UpdateChannel::stop`] on teardown
/// guarantees no orphaned timers or sockets.
pub struct UpdateChannel {
    devices: Vec<String>,
    poll_interval: Duration,
    pull: Arc<dyn PullSource>,
    push: Option<Box<dyn PushTransport>>,
    subs: Arc<Subscribers>,
    status: TransportStatus,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl UpdateChannel {
    pub fn new(
        pull: Arc<dyn PullSource>,
        push: Box<dyn PushTransport>,
        devices: Vec<String>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            devices,
            poll_interval,
            pull,
            push: Some(push),
            subs: Arc::new(Subscribers::new()),
            status: TransportStatus::new(),
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
        }
    }

    pub fn transport_status(&self) -> TransportStatus {
        self.status.clone()
    }

    /// Register a consumer; every accepted push message and successful pull
    /// result is delivered to all registered callbacks exactly once.
    pub fn on_reading(&self, callback: impl Fn(&Reading) + Send + Sync + 'static) {
        self.subs
            .readings
            .write()
            .expect("subscriber lock poisoned")
            .push(Box::new(callback));
    }

    /// Register a consumer for non-fatal pull failures.
    pub fn on_error(&self, callback: impl Fn(&PullError) + Send + Sync + 'static) {
        self.subs
            .errors
            .write()
            .expect("subscriber lock poisoned")
            .push(Box::new(callback));
    }

    /// Spawn the push loop and the fixed-interval pull loop.
    pub fn start(&mut self) {
        if !self.tasks.is_empty() {
            return;
        }
        self.subs.active.store(true, Ordering::SeqCst);

        self.tasks.push(tokio::spawn(pull_loop(
            Arc::clone(&self.pull),
            self.devices.clone(),
            self.poll_interval,
            Arc::clone(&self.subs),
            self.cancel.clone(),
        )));

        if let Some(transport) = self.push.take() {
            self.tasks.push(tokio::spawn(push_loop(
                transport,
                Arc::clone(&self.subs),
                self.status.clone(),
                self.cancel.clone(),
            )));
        }
    }

    /// Cancel the pull timer and release the push subscription. Safe to call
    /// while a pull request is in flight: the request future is dropped and
    /// its result, should it arrive, is never delivered.
    pub async fn stop(&mut self) {
        self.subs.active.store(false, Ordering::SeqCst);
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
    }
}

/// One tick per `poll_interval`; a failed fetch is logged, surfaced via
/// `on_error`, and retried on the next scheduled tick. No backoff.
async fn pull_loop(
    pull: Arc<dyn PullSource>,
    devices: Vec<String>,
    poll_interval: Duration,
    subs: Arc<Subscribers>,
    cancel: CancellationToken,
) {
    let mut ticker = time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        for device_id in &devices {
            let fetched = tokio::select! {
                _ = cancel.cancelled() => return,
                result = pull.latest(device_id) => result,
            };
            match fetched {
                Ok(payload) => subs.dispatch_wire(&payload, Some(device_id)),
                Err(e) => {
                    warn!(device_id = %device_id, error = %e, "pull request failed; retrying next tick");
                    subs.dispatch_error(&e);
                }
            }
        }
    }
}

/// Push disconnects only flip the connectivity flag; pull polling keeps
/// running as the degraded-mode fallback.
async fn push_loop(
    mut transport: Box<dyn PushTransport>,
    subs: Arc<Subscribers>,
    status: TransportStatus,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = transport.next_event() => event,
        };
        match event {
            PushEvent::Connected => {
                status.set_connected(true);
                info!("push transport connected");
            }
            PushEvent::Disconnected => {
                status.set_connected(false);
                warn!("push transport disconnected; pull polling continues");
            }
            PushEvent::Message {
                payload,
                device_hint,
            } => subs.dispatch_wire(&payload, device_hint.as_deref()),
        }
    }
    status.set_connected(false);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
