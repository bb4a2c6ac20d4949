//! Location sensor seam and watch configuration.
//!
//! A sensor implementation pushes [`SensorEvent`]s onto a channel until the
//! returned [`WatchHandle`] is cancelled. Sensor errors (signal loss, fix
//! timeouts) travel in-band and never terminate the watch; only an explicit
//! cancel does. Events already buffered when cancellation is requested may
//! still be delivered, and consumers must tolerate that.

use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

// Watch tuning. Fixed constants, not tunable per call: 10m movement or the
// 5s/2s interval pair, whichever the platform honors first.
const MIN_DISTANCE_METERS: f64 = 10.0;
const POLL_INTERVAL_MS: u64 = 5_000;
const FASTEST_INTERVAL_MS: u64 = 2_000;

/// Capacity of the event channel between a sensor and the watch loop.
const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Continuous-watch configuration handed to the platform sensor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WatchConfig {
    pub high_accuracy: bool,
    pub min_distance_meters: f64,
    pub poll_interval_ms: u64,
    pub fastest_interval_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            high_accuracy: true,
            min_distance_meters: MIN_DISTANCE_METERS,
            poll_interval_ms: POLL_INTERVAL_MS,
            fastest_interval_ms: FASTEST_INTERVAL_MS,
        }
    }
}

/// A raw position fix as delivered by the sensor, before the tracker stamps
/// it with the store's server time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionSample {
    pub latitude: f64,
    pub longitude: f64,
}

impl PositionSample {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// One delivery from an active watch.
#[derive(Debug, Clone)]
pub enum SensorEvent {
    Sample(PositionSample),
    /// Non-terminal sensor fault (e.g. signal loss). The watch continues.
    Error(String),
}

#[derive(Debug, Error)]
pub enum SensorError {
    #[error("location sensor unavailable: {0}")]
    Unavailable(String),
}

/// Cancellation handle for an active watch.
///
/// Consuming `cancel` (or dropping the handle) asks the sensor to stop
/// producing. Cancellation is asynchronous on the sensor side: events that
/// were already in flight may still arrive afterwards.
pub struct WatchHandle {
    cancel: Option<oneshot::Sender<()>>,
}

impl WatchHandle {
    pub fn new(cancel: oneshot::Sender<()>) -> Self {
        Self {
            cancel: Some(cancel),
        }
    }

    pub fn cancel(mut self) {
        if let Some(tx) = self.cancel.take() {
            let _ = tx.send(());
        }
    }
}

/// An active subscription to the sensor: the event stream plus its
/// cancellation handle.
pub struct SensorWatch {
    pub events: mpsc::Receiver<SensorEvent>,
    pub handle: WatchHandle,
}

/// A source of continuous high-accuracy position updates.
#[async_trait]
pub trait LocationSensor: Send + Sync {
    async fn watch(&self, config: WatchConfig) -> Result<SensorWatch, SensorError>;
}

// ============================================================================
// Simulated sensor
// ============================================================================

/// Sensor that replays a fixed path at the configured poll interval, cycling
/// when it reaches the end. Stands in for the platform sensor in demos and
/// anywhere tracking needs to run without hardware.
pub struct SimulatedSensor {
    path: Vec<PositionSample>,
}

impl SimulatedSensor {
    pub fn with_path(path: Vec<PositionSample>) -> Self {
        Self { path }
    }
}

#[async_trait]
impl LocationSensor for SimulatedSensor {
    async fn watch(&self, config: WatchConfig) -> Result<SensorWatch, SensorError> {
        if self.path.is_empty() {
            return Err(SensorError::Unavailable(
                "simulated sensor has no path to replay".to_string(),
            ));
        }

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (cancel_tx, mut cancel_rx) = oneshot::channel();
        let path = self.path.clone();
        let interval = Duration::from_millis(config.poll_interval_ms);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            let mut index = 0usize;
            loop {
                tokio::select! {
                    _ = &mut cancel_rx => {
                        debug!("[SimulatedSensor] watch cancelled after {} samples", index);
                        break;
                    }
                    _ = ticker.tick() => {
                        let sample = path[index % path.len()];
                        index += 1;
                        if tx.send(SensorEvent::Sample(sample)).await.is_err() {
                            // Receiver gone; nothing left to feed.
                            break;
                        }
                    }
                }
            }
        });

        Ok(SensorWatch {
            events: rx,
            handle: WatchHandle::new(cancel_tx),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> WatchConfig {
        WatchConfig {
            poll_interval_ms: 5,
            fastest_interval_ms: 1,
            ..WatchConfig::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = WatchConfig::default();
        assert!(config.high_accuracy);
        assert_eq!(config.min_distance_meters, 10.0);
        assert!(config.fastest_interval_ms <= config.poll_interval_ms);
    }

    #[tokio::test]
    async fn test_simulated_sensor_replays_path() {
        let sensor = SimulatedSensor::with_path(vec![
            PositionSample::new(51.5074, -0.1278),
            PositionSample::new(51.5080, -0.1290),
        ]);

        let mut watch = sensor.watch(fast_config()).await.unwrap();
        let mut samples = Vec::new();
        for _ in 0..3 {
            match watch.events.recv().await {
                Some(SensorEvent::Sample(sample)) => samples.push(sample),
                other => panic!("expected sample, got {:?}", other),
            }
        }

        // Cycles back to the start of the path.
        assert_eq!(samples[0], samples[2]);
        assert_ne!(samples[0], samples[1]);
        watch.handle.cancel();
    }

    #[tokio::test]
    async fn test_simulated_sensor_cancel_ends_stream() {
        let sensor = SimulatedSensor::with_path(vec![PositionSample::new(51.5074, -0.1278)]);
        let mut watch = sensor.watch(fast_config()).await.unwrap();

        assert!(watch.events.recv().await.is_some());
        watch.handle.cancel();

        // Drain anything in flight; the channel must close shortly after.
        loop {
            match tokio::time::timeout(Duration::from_secs(1), watch.events.recv()).await {
                Ok(Some(_)) => continue,
                Ok(None) => break,
                Err(_) => panic!("sensor stream did not close after cancel"),
            }
        }
    }

    #[tokio::test]
    async fn test_simulated_sensor_requires_path() {
        let sensor = SimulatedSensor::with_path(Vec::new());
        assert!(matches!(
            sensor.watch(fast_config()).await,
            Err(SensorError::Unavailable(_))
        ));
    }
}
