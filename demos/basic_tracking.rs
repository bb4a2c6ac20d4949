//! Basic example of a full tracking session against the simulated sensor
//! and the in-memory store.
//!
//! Run with: cargo run --example basic_tracking

use std::sync::Arc;
use std::time::Duration;

use location_tracker::{
    FixedIdentity, LocationTracker, MemoryRouteStore, PositionSample, SimulatedSensor, WatchConfig,
};

#[tokio::main]
async fn main() {
    // A short loop around central London.
    let path = vec![
        PositionSample::new(51.5074, -0.1278), // Start
        PositionSample::new(51.5080, -0.1290),
        PositionSample::new(51.5090, -0.1300),
        PositionSample::new(51.5100, -0.1310),
        PositionSample::new(51.5110, -0.1320), // End
    ];

    let store = Arc::new(MemoryRouteStore::new());
    let config = WatchConfig {
        poll_interval_ms: 200, // sped up so the demo finishes quickly
        ..WatchConfig::default()
    };
    let tracker = LocationTracker::with_config(
        Arc::new(FixedIdentity::new("rider@example.com")),
        Arc::new(SimulatedSensor::with_path(path)),
        store.clone(),
        config,
    );

    let info = tracker
        .start_with_observer(|c| {
            println!("  sample {:.5},{:.5} at {}", c.latitude, c.longitude, c.timestamp);
        })
        .await
        .expect("tracking should start");
    println!("Recording '{}' ({})", info.route_name, info.route_id.as_deref().unwrap());

    tokio::time::sleep(Duration::from_secs(2)).await;
    tracker.stop().await;

    let route_id = info.route_id.unwrap();
    let doc = store.route("rider@example.com", &route_id).unwrap();
    println!(
        "\nStopped. Remote record '{}': {} points, active={}",
        doc.name,
        doc.path.len(),
        doc.is_active
    );
}
