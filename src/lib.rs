//! # Location Tracker
//!
//! Live-location tracking core: samples a moving device's position, streams
//! updates to local observers, and incrementally appends the path to a remote
//! append-only route record.
//!
//! This library provides:
//! - A start/stop session lifecycle with idempotent `start`
//! - Subscriber fan-out with per-observer failure isolation
//! - A fire-and-forget remote sync writer (accepted-loss appends)
//!
//! The hardware sensor, the signed-in identity, and the remote document store
//! are injected behind traits ([`LocationSensor`], [`IdentityProvider`],
//! [`RouteStore`]), so the core runs identically against a platform sensor or
//! the bundled [`SimulatedSensor`] / [`MemoryRouteStore`].
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use location_tracker::{
//!     FixedIdentity, LocationTracker, MemoryRouteStore, PositionSample, SimulatedSensor,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let tracker = LocationTracker::new(
//!         Arc::new(FixedIdentity::new("rider@example.com")),
//!         Arc::new(SimulatedSensor::with_path(vec![
//!             PositionSample::new(51.5074, -0.1278),
//!             PositionSample::new(51.5080, -0.1290),
//!         ])),
//!         Arc::new(MemoryRouteStore::new()),
//!     );
//!
//!     let info = tracker
//!         .start_with_observer(|c| println!("at {:.5},{:.5}", c.latitude, c.longitude))
//!         .await
//!         .expect("tracking should start");
//!     println!("recording {}", info.route_name);
//!
//!     tokio::time::sleep(std::time::Duration::from_secs(12)).await;
//!     tracker.stop().await;
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod identity;
pub mod sensor;
pub mod store;
pub mod tracker;
pub mod writer;

pub use identity::{FixedIdentity, IdentityProvider};
pub use sensor::{
    LocationSensor, PositionSample, SensorError, SensorEvent, SensorWatch, SimulatedSensor,
    WatchConfig, WatchHandle,
};
pub use store::{MemoryRouteStore, RouteDocument, RouteStore, StoreError};
pub use tracker::{LocationTracker, SubscriberId};
pub use writer::{RemoteSyncWriter, WriterQueue};

// ============================================================================
// Core Types
// ============================================================================

/// One recorded position sample: a GPS fix stamped with the remote store's
/// time authority (not the device clock).
///
/// Immutable once created; appended to the remote path, never mutated or
/// removed. Value equality (including the timestamp) is what the store's
/// array-union append deduplicates on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            latitude,
            longitude,
            timestamp,
        }
    }

    /// Check if the coordinate is a plausible WGS84 fix.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

/// Identifier pair for the route a session records into.
///
/// `route_id` is the store-generated document id; `route_name` is the
/// human-readable display name derived at start time (`"Route N"`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteInfo {
    pub route_id: Option<String>,
    pub route_name: String,
}

impl RouteInfo {
    pub fn new(route_id: impl Into<String>, route_name: impl Into<String>) -> Self {
        Self {
            route_id: Some(route_id.into()),
            route_name: route_name.into(),
        }
    }

    /// The cleared state reported when no session is active.
    pub fn empty() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinate_validation() {
        let now = Utc::now();
        assert!(Coordinate::new(51.5074, -0.1278, now).is_valid());
        assert!(!Coordinate::new(91.0, 0.0, now).is_valid());
        assert!(!Coordinate::new(0.0, 181.0, now).is_valid());
        assert!(!Coordinate::new(f64::NAN, 0.0, now).is_valid());
    }

    #[test]
    fn test_route_info_empty() {
        let info = RouteInfo::empty();
        assert!(info.route_id.is_none());
        assert!(info.route_name.is_empty());
    }

    #[test]
    fn test_coordinate_serde_round_trip() {
        let coord = Coordinate::new(51.5074, -0.1278, Utc::now());
        let json = serde_json::to_string(&coord).unwrap();
        let back: Coordinate = serde_json::from_str(&json).unwrap();
        assert_eq!(coord, back);
    }
}
