//! Remote sync writer: decouples sensor-callback latency from network
//! latency.
//!
//! The watch loop pushes stamped coordinates onto a bounded queue; a
//! dedicated drain task performs the remote appends. Appends are best-effort
//! with no retry or buffering beyond the queue itself: a failed append is
//! logged and the point is lost (accepted-loss policy). Overflow drops the
//! newest sample so the writer stays caught up and already-queued points
//! keep their slots.

use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

use crate::store::RouteStore;
use crate::Coordinate;

/// Samples buffered ahead of the remote store. At one sample per poll
/// interval this is several minutes of backlog before anything is dropped.
const QUEUE_CAPACITY: usize = 64;

/// Cheap clonable enqueue side of a writer's queue.
#[derive(Clone)]
pub struct WriterQueue {
    tx: mpsc::Sender<Coordinate>,
}

impl WriterQueue {
    /// Hand a stamped coordinate to the drain task. Never blocks: when the
    /// queue is full the incoming sample is dropped and logged.
    pub fn enqueue(&self, point: Coordinate) {
        match self.tx.try_send(point) {
            Ok(()) => {}
            Err(TrySendError::Full(point)) => {
                warn!(
                    "[RemoteSyncWriter] queue full, dropping sample at {:.5},{:.5}",
                    point.latitude, point.longitude
                );
            }
            Err(TrySendError::Closed(_)) => {
                debug!("[RemoteSyncWriter] queue closed, sample ignored");
            }
        }
    }
}

/// Incremental writer for one session's route record.
pub struct RemoteSyncWriter {
    queue: WriterQueue,
    task: JoinHandle<()>,
}

impl RemoteSyncWriter {
    /// Spawn the drain task for an active session's route.
    pub fn spawn(store: Arc<dyn RouteStore>, user_id: String, route_id: String) -> Self {
        Self::with_capacity(store, user_id, route_id, QUEUE_CAPACITY)
    }

    /// As [`spawn`](Self::spawn) with an explicit queue capacity.
    pub fn with_capacity(
        store: Arc<dyn RouteStore>,
        user_id: String,
        route_id: String,
        capacity: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        let task = tokio::spawn(drain(store, user_id, route_id, rx));
        Self {
            queue: WriterQueue { tx },
            task,
        }
    }

    pub fn queue(&self) -> WriterQueue {
        self.queue.clone()
    }

    /// Close the queue and wait for the drain task to finish the backlog.
    /// Any other [`WriterQueue`] clones must already be gone for the channel
    /// to close.
    pub async fn shutdown(self) {
        let Self { queue, task } = self;
        drop(queue);
        if task.await.is_err() {
            warn!("[RemoteSyncWriter] drain task failed during shutdown");
        }
    }
}

async fn drain(
    store: Arc<dyn RouteStore>,
    user_id: String,
    route_id: String,
    mut rx: mpsc::Receiver<Coordinate>,
) {
    let mut appended = 0u64;
    let mut failed = 0u64;

    while let Some(point) = rx.recv().await {
        match store.append_point(&user_id, &route_id, point).await {
            Ok(()) => appended += 1,
            Err(err) => {
                failed += 1;
                warn!(
                    "[RemoteSyncWriter] append to route {} failed, dropping sample: {}",
                    route_id, err
                );
            }
        }
    }

    info!(
        "[RemoteSyncWriter] route {} writer finished: {} appended, {} dropped",
        route_id, appended, failed
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryRouteStore, StoreError};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Semaphore;

    const USER: &str = "rider@example.com";

    fn point(n: i64) -> Coordinate {
        let stamp = Utc.timestamp_opt(1_700_000_000 + n, 0).unwrap();
        Coordinate::new(51.5074 + n as f64 * 0.0001, -0.1278, stamp)
    }

    /// Store whose appends block until a permit is released, so tests can
    /// control exactly how far the drain task has progressed.
    struct GatedStore {
        inner: MemoryRouteStore,
        gate: Semaphore,
        started: AtomicUsize,
    }

    impl GatedStore {
        fn new() -> Self {
            Self {
                inner: MemoryRouteStore::new(),
                gate: Semaphore::new(0),
                started: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl RouteStore for GatedStore {
        async fn route_count(&self, user_id: &str) -> Result<usize, StoreError> {
            self.inner.route_count(user_id).await
        }

        async fn create_route(&self, user_id: &str, name: &str) -> Result<String, StoreError> {
            self.inner.create_route(user_id, name).await
        }

        async fn append_point(
            &self,
            user_id: &str,
            route_id: &str,
            point: Coordinate,
        ) -> Result<(), StoreError> {
            self.started.fetch_add(1, Ordering::SeqCst);
            let permit = self
                .gate
                .acquire()
                .await
                .map_err(|_| StoreError::Unavailable("gate closed".to_string()))?;
            permit.forget();
            self.inner.append_point(user_id, route_id, point).await
        }

        async fn set_inactive(&self, user_id: &str, route_id: &str) -> Result<(), StoreError> {
            self.inner.set_inactive(user_id, route_id).await
        }
    }

    struct FailingStore;

    #[async_trait]
    impl RouteStore for FailingStore {
        async fn route_count(&self, _user_id: &str) -> Result<usize, StoreError> {
            Ok(0)
        }

        async fn create_route(&self, _user_id: &str, _name: &str) -> Result<String, StoreError> {
            Err(StoreError::Unavailable("offline".to_string()))
        }

        async fn append_point(
            &self,
            _user_id: &str,
            _route_id: &str,
            _point: Coordinate,
        ) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("offline".to_string()))
        }

        async fn set_inactive(&self, _user_id: &str, _route_id: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("offline".to_string()))
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        panic!("condition not met within timeout");
    }

    #[tokio::test]
    async fn test_writer_appends_enqueued_points() {
        let store = Arc::new(MemoryRouteStore::new());
        let route_id = store.create_route(USER, "Route 1").await.unwrap();

        let writer = RemoteSyncWriter::spawn(
            store.clone() as Arc<dyn RouteStore>,
            USER.to_string(),
            route_id.clone(),
        );
        let queue = writer.queue();
        queue.enqueue(point(1));
        queue.enqueue(point(2));
        queue.enqueue(point(3));
        drop(queue);
        writer.shutdown().await;

        let doc = store.route(USER, &route_id).unwrap();
        assert_eq!(doc.path, vec![point(1), point(2), point(3)]);
    }

    #[tokio::test]
    async fn test_writer_drops_newest_on_overflow() {
        let store = Arc::new(GatedStore::new());
        let route_id = store.inner.create_route(USER, "Route 1").await.unwrap();

        let writer = RemoteSyncWriter::with_capacity(
            store.clone() as Arc<dyn RouteStore>,
            USER.to_string(),
            route_id.clone(),
            1,
        );
        let queue = writer.queue();

        // First point is taken by the drain task and parks on the gate.
        queue.enqueue(point(1));
        wait_until(|| store.started.load(Ordering::SeqCst) == 1).await;
        // Second point occupies the single queue slot; the third must be
        // dropped, not block the caller.
        queue.enqueue(point(2));
        queue.enqueue(point(3));

        store.gate.add_permits(2);
        drop(queue);
        writer.shutdown().await;

        let doc = store.inner.route(USER, &route_id).unwrap();
        assert_eq!(doc.path, vec![point(1), point(2)]);
    }

    #[tokio::test]
    async fn test_failed_appends_are_logged_and_lost() {
        let writer = RemoteSyncWriter::spawn(
            Arc::new(FailingStore),
            USER.to_string(),
            "route-000001".to_string(),
        );
        let queue = writer.queue();
        queue.enqueue(point(1));
        queue.enqueue(point(2));
        drop(queue);
        // Shutdown completes normally; the failures were swallowed.
        writer.shutdown().await;
    }
}
