//! Remote route store seam and the in-process reference implementation.
//!
//! The store is an append-capable document store keyed by user id → route
//! id. It is also the time authority: samples are stamped with
//! [`RouteStore::server_time`] so ordering stays consistent with the store's
//! own timestamps rather than the device clock.
//!
//! `append_point` must behave like an atomic array-union: commutative under
//! reordering and idempotent under retry, so concurrent appends from the
//! same session never lose or duplicate a point.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use thiserror::Error;

use crate::Coordinate;

/// The remote record for one tracking session's path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteDocument {
    pub name: String,
    /// Append-only; grows monotonically while the session is active.
    pub path: Vec<Coordinate>,
    pub started_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub is_active: bool,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("remote store unavailable: {0}")]
    Unavailable(String),
    #[error("route {0} not found")]
    RouteNotFound(String),
}

/// User-scoped collection of append-only route records.
#[async_trait]
pub trait RouteStore: Send + Sync {
    /// Number of routes the user already has. Drives the `"Route N"`
    /// display-name derivation.
    async fn route_count(&self, user_id: &str) -> Result<usize, StoreError>;

    /// Create a new route record with an empty path, `started_at` at server
    /// time, and `is_active = true`. Returns the generated route id.
    async fn create_route(&self, user_id: &str, name: &str) -> Result<String, StoreError>;

    /// Atomic array-union append plus a `last_updated` refresh. A point
    /// already present in the path (by value equality) is not duplicated.
    async fn append_point(
        &self,
        user_id: &str,
        route_id: &str,
        point: Coordinate,
    ) -> Result<(), StoreError>;

    /// Flip the record's `is_active` flag to false.
    async fn set_inactive(&self, user_id: &str, route_id: &str) -> Result<(), StoreError>;

    /// The store's time authority, used to stamp every sample.
    fn server_time(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

// ============================================================================
// In-memory reference store
// ============================================================================

/// In-process [`RouteStore`] with the same union/refresh semantics the trait
/// demands of a real backend. Backs demos and tests.
#[derive(Default)]
pub struct MemoryRouteStore {
    routes: Mutex<HashMap<String, HashMap<String, RouteDocument>>>,
    next_id: AtomicU64,
}

impl MemoryRouteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of one route record, if it exists.
    pub fn route(&self, user_id: &str, route_id: &str) -> Option<RouteDocument> {
        self.routes
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(user_id)
            .and_then(|routes| routes.get(route_id))
            .cloned()
    }
}

#[async_trait]
impl RouteStore for MemoryRouteStore {
    async fn route_count(&self, user_id: &str) -> Result<usize, StoreError> {
        let routes = self
            .routes
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(routes.get(user_id).map_or(0, HashMap::len))
    }

    async fn create_route(&self, user_id: &str, name: &str) -> Result<String, StoreError> {
        let id = format!("route-{:06}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let now = self.server_time();
        let document = RouteDocument {
            name: name.to_string(),
            path: Vec::new(),
            started_at: now,
            last_updated: now,
            is_active: true,
        };
        self.routes
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .entry(user_id.to_string())
            .or_default()
            .insert(id.clone(), document);
        Ok(id)
    }

    async fn append_point(
        &self,
        user_id: &str,
        route_id: &str,
        point: Coordinate,
    ) -> Result<(), StoreError> {
        let now = self.server_time();
        let mut routes = self
            .routes
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let document = routes
            .get_mut(user_id)
            .and_then(|routes| routes.get_mut(route_id))
            .ok_or_else(|| StoreError::RouteNotFound(route_id.to_string()))?;

        // Array-union: value-identical points collapse, so retries and
        // reordered acknowledgements cannot duplicate the path.
        if !document.path.contains(&point) {
            document.path.push(point);
        }
        document.last_updated = now;
        Ok(())
    }

    async fn set_inactive(&self, user_id: &str, route_id: &str) -> Result<(), StoreError> {
        let mut routes = self
            .routes
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let document = routes
            .get_mut(user_id)
            .and_then(|routes| routes.get_mut(route_id))
            .ok_or_else(|| StoreError::RouteNotFound(route_id.to_string()))?;
        document.is_active = false;
        Ok(())
    }
}
