//! Session lifecycle, sensor watch loop, and subscriber fan-out.
//!
//! One [`LocationTracker`] owns at most one active session at a time. The
//! control flow calls `start`/`stop`/queries; the sensor delivers samples on
//! its own task. Session transitions are serialized by an async mutex held
//! across the whole of `start` and `stop`, so a torn state (active with no
//! route id, or a live watch with no writer) is never observable. The sync
//! reads `is_tracking`/`current_route_info` come from a snapshot written
//! only while that mutex is held.

use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use crate::identity::IdentityProvider;
use crate::sensor::{LocationSensor, SensorEvent, WatchConfig, WatchHandle};
use crate::store::RouteStore;
use crate::writer::{RemoteSyncWriter, WriterQueue};
use crate::{Coordinate, RouteInfo};

/// Handle for removing a registered observer. Closures have no identity of
/// their own, so registration hands one out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

type Observer = Arc<dyn Fn(&Coordinate) + Send + Sync>;
type SubscriberRegistry = Arc<StdMutex<HashMap<SubscriberId, Observer>>>;

/// Everything a live session owns. Dropped as one unit by `stop`.
struct SessionRuntime {
    user_id: String,
    route_id: String,
    route_name: String,
    /// Flipped false at the top of `stop`; gates late sensor callbacks.
    active: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
    sensor_handle: WatchHandle,
    watch_task: JoinHandle<()>,
    writer: RemoteSyncWriter,
}

#[derive(Default)]
struct Snapshot {
    active: bool,
    info: RouteInfo,
}

/// The process-wide tracking session coordinator.
pub struct LocationTracker {
    identity: Arc<dyn IdentityProvider>,
    sensor: Arc<dyn LocationSensor>,
    store: Arc<dyn RouteStore>,
    config: WatchConfig,
    runtime: Mutex<Option<SessionRuntime>>,
    snapshot: StdMutex<Snapshot>,
    subscribers: SubscriberRegistry,
    next_subscriber: AtomicU64,
}

impl LocationTracker {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        sensor: Arc<dyn LocationSensor>,
        store: Arc<dyn RouteStore>,
    ) -> Self {
        Self::with_config(identity, sensor, store, WatchConfig::default())
    }

    pub fn with_config(
        identity: Arc<dyn IdentityProvider>,
        sensor: Arc<dyn LocationSensor>,
        store: Arc<dyn RouteStore>,
        config: WatchConfig,
    ) -> Self {
        Self {
            identity,
            sensor,
            store,
            config,
            runtime: Mutex::new(None),
            snapshot: StdMutex::new(Snapshot::default()),
            subscribers: Arc::new(StdMutex::new(HashMap::new())),
            next_subscriber: AtomicU64::new(1),
        }
    }

    // ========================================================================
    // Subscriber registry
    // ========================================================================

    /// Register an observer invoked on every new sample. Registration is
    /// independent of the session lifecycle, but `stop` clears the registry.
    pub fn subscribe(&self, observer: impl Fn(&Coordinate) + Send + Sync + 'static) -> SubscriberId {
        let id = SubscriberId(self.next_subscriber.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::new(observer));
        id
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    // ========================================================================
    // Session lifecycle
    // ========================================================================

    /// Start a tracking session.
    ///
    /// Idempotent: when a session is already active this returns its
    /// `RouteInfo` without creating a second route or a duplicate watch.
    /// Returns `None` when no user is signed in or the remote record cannot
    /// be created; no partial session is left active in either case.
    pub async fn start(&self) -> Option<RouteInfo> {
        let mut runtime = self.runtime.lock().await;

        if let Some(session) = runtime.as_ref() {
            debug!(
                "[LocationTracker] start ignored, already tracking route {}",
                session.route_id
            );
            return Some(RouteInfo::new(
                session.route_id.clone(),
                session.route_name.clone(),
            ));
        }

        let user_id = match self.identity.current_user_id() {
            Some(user_id) => user_id,
            None => {
                warn!("[LocationTracker] cannot start tracking, no signed-in user");
                return None;
            }
        };

        let count = match self.store.route_count(&user_id).await {
            Ok(count) => count,
            Err(err) => {
                warn!("[LocationTracker] failed to count existing routes: {}", err);
                return None;
            }
        };
        // Count-then-increment naming: concurrent starts for one user may
        // collide on the display name, never on the route id.
        let route_name = format!("Route {}", count + 1);

        let route_id = match self.store.create_route(&user_id, &route_name).await {
            Ok(route_id) => route_id,
            Err(err) => {
                error!("[LocationTracker] failed to create route record: {}", err);
                return None;
            }
        };

        let sensor_watch = match self.sensor.watch(self.config).await {
            Ok(watch) => watch,
            Err(err) => {
                error!("[LocationTracker] failed to start location watch: {}", err);
                return None;
            }
        };

        let writer = RemoteSyncWriter::spawn(
            Arc::clone(&self.store),
            user_id.clone(),
            route_id.clone(),
        );
        let active = Arc::new(AtomicBool::new(true));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let watch_task = tokio::spawn(watch_loop(
            sensor_watch.events,
            shutdown_rx,
            Arc::clone(&active),
            Arc::clone(&self.subscribers),
            Arc::clone(&self.store),
            writer.queue(),
        ));

        *runtime = Some(SessionRuntime {
            user_id,
            route_id: route_id.clone(),
            route_name: route_name.clone(),
            active,
            shutdown: shutdown_tx,
            sensor_handle: sensor_watch.handle,
            watch_task,
            writer,
        });

        let info = RouteInfo::new(route_id.clone(), route_name.clone());
        {
            let mut snapshot = self
                .snapshot
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            snapshot.active = true;
            snapshot.info = info.clone();
        }

        info!(
            "[LocationTracker] tracking started on route {} ({})",
            route_id, route_name
        );
        Some(info)
    }

    /// As [`start`](Self::start), registering `observer` first. The
    /// registration happens even when a session is already active, so
    /// repeated starts from different contexts accumulate observers.
    pub async fn start_with_observer(
        &self,
        observer: impl Fn(&Coordinate) + Send + Sync + 'static,
    ) -> Option<RouteInfo> {
        self.subscribe(observer);
        self.start().await
    }

    /// Stop the active session. No-op when idle.
    ///
    /// Cancels the sensor watch, drains the writer, then best-effort marks
    /// the remote record inactive; a failure there is logged and local state
    /// is cleared regardless.
    pub async fn stop(&self) {
        let mut runtime = self.runtime.lock().await;
        let session = match runtime.take() {
            Some(session) => session,
            None => {
                debug!("[LocationTracker] stop ignored, no active session");
                return;
            }
        };

        // Gate late sensor callbacks before anything else; a sample arriving
        // between here and watch-loop exit is silently skipped.
        session.active.store(false, Ordering::SeqCst);
        let _ = session.shutdown.send(true);
        session.sensor_handle.cancel();

        if session.watch_task.await.is_err() {
            warn!("[LocationTracker] watch loop failed during shutdown");
        }
        session.writer.shutdown().await;

        if let Err(err) = self
            .store
            .set_inactive(&session.user_id, &session.route_id)
            .await
        {
            warn!(
                "[LocationTracker] failed to mark route {} inactive: {}",
                session.route_id, err
            );
        }

        {
            let mut snapshot = self
                .snapshot
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            snapshot.active = false;
            snapshot.info = RouteInfo::empty();
        }
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();

        info!(
            "[LocationTracker] tracking stopped on route {}",
            session.route_id
        );
    }

    // ========================================================================
    // State queries
    // ========================================================================

    pub fn is_tracking(&self) -> bool {
        self.snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .active
    }

    /// The active session's route info, or [`RouteInfo::empty`] when idle.
    pub fn current_route_info(&self) -> RouteInfo {
        self.snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .info
            .clone()
    }
}

// ============================================================================
// Watch loop
// ============================================================================

async fn watch_loop(
    mut events: mpsc::Receiver<SensorEvent>,
    mut shutdown: watch::Receiver<bool>,
    active: Arc<AtomicBool>,
    subscribers: SubscriberRegistry,
    store: Arc<dyn RouteStore>,
    queue: WriterQueue,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            event = events.recv() => match event {
                Some(SensorEvent::Sample(sample)) => {
                    if !active.load(Ordering::SeqCst) {
                        // Late callback after stop was requested.
                        continue;
                    }
                    let coord =
                        Coordinate::new(sample.latitude, sample.longitude, store.server_time());
                    if !coord.is_valid() {
                        warn!(
                            "[LocationTracker] discarding implausible fix {:.5},{:.5}",
                            sample.latitude, sample.longitude
                        );
                        continue;
                    }
                    fan_out(&subscribers, &coord);
                    queue.enqueue(coord);
                }
                Some(SensorEvent::Error(message)) => {
                    // Signal loss and friends are non-terminal.
                    warn!("[LocationTracker] sensor error: {}", message);
                }
                None => {
                    debug!("[LocationTracker] sensor stream ended");
                    break;
                }
            }
        }
    }
}

/// Invoke every registered observer with the new coordinate. A panicking
/// observer is logged and skipped; the rest still run. No ordering guarantee.
fn fan_out(subscribers: &SubscriberRegistry, coord: &Coordinate) {
    let observers: Vec<(SubscriberId, Observer)> = subscribers
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .iter()
        .map(|(id, observer)| (*id, Arc::clone(observer)))
        .collect();

    for (id, observer) in observers {
        if panic::catch_unwind(AssertUnwindSafe(|| observer(coord))).is_err() {
            warn!("[LocationTracker] subscriber {:?} panicked on update", id);
        }
    }
}
