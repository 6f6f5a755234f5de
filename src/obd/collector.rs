// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/smartobd-rs

//! Periodic data collection with batched persistence.
//!
//! One loop polls the adapter every `interval_seconds`, tags each snapshot
//! with the vehicle id and appends it to an in-memory buffer. Once the buffer
//! reaches `batch_size` it is swapped out and persisted in a single
//! transaction. A failed write puts the batch back at the front of the buffer
//! so nothing is lost and order is preserved.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::connection::ObdConnection;
use crate::config::CollectionSettings;
use crate::core::{EventBus, Worker};
use crate::db::{Reading, ReadingStore, StorageError, VehicleInfo};

/// Vehicle id used while no VIN is known
pub const UNKNOWN_VEHICLE: &str = "unknown_vehicle";

#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("OBD adapter is not connected")]
    NotConnected,

    #[error("data collection is already running")]
    AlreadyRunning,

    #[error("failed to persist readings: {0}")]
    Storage(#[from] StorageError),
}

/// Collector status snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionStats {
    pub is_running: bool,
    pub buffer_size: usize,
    pub collection_interval: f64,
    pub batch_size: usize,
    pub storage_format: String,
    pub vehicle_id: Option<String>,
    pub total_collected: u64,
    pub total_flushed: u64,
    pub failed_polls: u64,
    pub failed_flushes: u64,
}

pub struct DataCollector {
    connection: Arc<ObdConnection>,
    store: Arc<dyn ReadingStore>,
    bus: Arc<EventBus>,
    settings: CollectionSettings,
    buffer: Mutex<Vec<Reading>>,
    vehicle_id: RwLock<Option<String>>,
    worker: Mutex<Option<Worker>>,
    running: AtomicBool,
    collected: AtomicU64,
    flushed: AtomicU64,
    failed_polls: AtomicU64,
    failed_flushes: AtomicU64,
}

impl DataCollector {
    pub fn new(
        connection: Arc<ObdConnection>,
        store: Arc<dyn ReadingStore>,
        bus: Arc<EventBus>,
        settings: CollectionSettings,
    ) -> Self {
        Self {
            connection,
            store,
            bus,
            settings,
            buffer: Mutex::new(Vec::new()),
            vehicle_id: RwLock::new(None),
            worker: Mutex::new(None),
            running: AtomicBool::new(false),
            collected: AtomicU64::new(0),
            flushed: AtomicU64::new(0),
            failed_polls: AtomicU64::new(0),
            failed_flushes: AtomicU64::new(0),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Start the background collection loop
    pub fn start(self: &Arc<Self>) -> Result<(), CollectorError> {
        if !self.connection.is_connected() {
            return Err(CollectorError::NotConnected);
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(CollectorError::AlreadyRunning);
        }

        let collector = Arc::clone(self);
        let interval = self.settings.interval();
        let worker = Worker::spawn("data-collector", move |mut shutdown| async move {
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    result = collector.collect_once() => {
                        if let Err(e) = result {
                            error!("Collection step failed: {}", e);
                        }
                    }
                }

                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            debug!("Collection loop exited");
        });

        *self.worker.lock() = Some(worker);
        self.bus.publish_status("collector", "running");
        info!(
            "Data collection started (interval {:.1}s, batch {})",
            self.settings.interval_seconds, self.settings.batch_size
        );
        Ok(())
    }

    /// Stop the loop and flush whatever is still buffered
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            worker.stop(self.settings.stop_timeout()).await;
        }

        if let Err(e) = self.flush() {
            error!("Final flush failed, {} readings kept in memory: {}", self.buffer_len(), e);
        }
        self.bus.publish_status("collector", "stopped");
        info!("Data collection stopped");
    }

    /// One loop step: poll, tag, buffer, flush when the batch is full.
    /// Returns whether a snapshot was collected.
    pub async fn collect_once(&self) -> Result<bool, CollectorError> {
        let Some(snapshot) = self.connection.get_current_data().await else {
            self.failed_polls.fetch_add(1, Ordering::Relaxed);
            warn!("No data received from adapter");
            return Ok(false);
        };

        let vehicle_id = self.resolve_vehicle_id().await;
        let reading = Reading::from_snapshot(&snapshot, &vehicle_id);

        let buffered = {
            let mut buffer = self.buffer.lock();
            buffer.push(reading.clone());
            buffer.len()
        };
        self.collected.fetch_add(1, Ordering::Relaxed);
        self.bus.publish_reading(reading);

        if buffered >= self.settings.batch_size.max(1) {
            self.flush()?;
        }
        Ok(true)
    }

    async fn resolve_vehicle_id(&self) -> String {
        if let Some(id) = self.vehicle_id.read().clone() {
            return id;
        }

        let vin = self
            .connection
            .get_vehicle_info()
            .await
            .and_then(|info| info.vin);

        match vin {
            Some(vin) => {
                if let Err(e) = self.store.store_vehicle(&VehicleInfo::from_vin(&vin)) {
                    warn!("Could not record vehicle {}: {}", vin, e);
                }
                info!("Collecting for vehicle {}", vin);
                *self.vehicle_id.write() = Some(vin.clone());
                vin
            }
            None => UNKNOWN_VEHICLE.to_string(),
        }
    }

    /// Persist the buffer as one batch. On failure the batch goes back to
    /// the front of the buffer.
    pub fn flush(&self) -> Result<usize, CollectorError> {
        let batch = std::mem::take(&mut *self.buffer.lock());
        if batch.is_empty() {
            return Ok(0);
        }

        match self.store.store_readings(&batch) {
            Ok(count) => {
                self.flushed.fetch_add(count as u64, Ordering::Relaxed);
                debug!("Flushed {} readings", count);
                Ok(count)
            }
            Err(e) => {
                self.failed_flushes.fetch_add(1, Ordering::Relaxed);
                let mut buffer = self.buffer.lock();
                let newer = std::mem::replace(&mut *buffer, batch);
                buffer.extend(newer);
                Err(e.into())
            }
        }
    }

    pub fn stats(&self) -> CollectionStats {
        CollectionStats {
            is_running: self.is_running(),
            buffer_size: self.buffer_len(),
            collection_interval: self.settings.interval_seconds,
            batch_size: self.settings.batch_size,
            storage_format: self.settings.storage_format.clone(),
            vehicle_id: self.vehicle_id.read().clone(),
            total_collected: self.collected.load(Ordering::Relaxed),
            total_flushed: self.flushed.load(Ordering::Relaxed),
            failed_polls: self.failed_polls.load(Ordering::Relaxed),
            failed_flushes: self.failed_flushes.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConnectionType, ObdSettings};
    use crate::db::Database;
    use crate::obd::{ObdTransport, SimulatedTransport, SimulatorControl, TransportFactory};
    use std::time::Duration;

    struct FlakyStore {
        inner: Database,
        failing: AtomicBool,
        batches: Mutex<Vec<usize>>,
    }

    impl ReadingStore for FlakyStore {
        fn store_readings(&self, readings: &[Reading]) -> Result<usize, StorageError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(StorageError::UnsupportedBackend("offline".into()));
            }
            self.batches.lock().push(readings.len());
            self.inner.save_readings(readings)
        }

        fn store_vehicle(&self, info: &VehicleInfo) -> Result<(), StorageError> {
            self.inner.upsert_vehicle_info(info)
        }
    }

    async fn connected() -> Arc<ObdConnection> {
        let control = SimulatorControl::shared();
        let settings = ObdSettings {
            connection_type: ConnectionType::Simulator,
            retry_attempts: 1,
            ..ObdSettings::default()
        };
        let factory: TransportFactory = Arc::new(move || {
            Ok(Box::new(SimulatedTransport::new(control.clone())) as Box<dyn ObdTransport>)
        });
        let conn = Arc::new(ObdConnection::with_transport_factory(settings, factory));
        assert!(conn.connect().await);
        conn
    }

    fn collector(conn: Arc<ObdConnection>, store: Arc<FlakyStore>, batch_size: usize) -> Arc<DataCollector> {
        let settings = CollectionSettings {
            interval_seconds: 0.01,
            batch_size,
            ..CollectionSettings::default()
        };
        Arc::new(DataCollector::new(conn, store, Arc::new(EventBus::new(64)), settings))
    }

    fn flaky() -> Arc<FlakyStore> {
        Arc::new(FlakyStore {
            inner: Database::open_in_memory().unwrap(),
            failing: AtomicBool::new(false),
            batches: Mutex::new(Vec::new()),
        })
    }

    #[tokio::test]
    async fn test_batches_of_three() {
        let store = flaky();
        let collector = collector(connected().await, store.clone(), 3);

        for _ in 0..7 {
            assert!(collector.collect_once().await.unwrap());
            assert!(collector.buffer_len() < 3);
        }

        assert_eq!(*store.batches.lock(), vec![3, 3]);
        assert_eq!(collector.buffer_len(), 1);

        let stats = collector.stats();
        assert_eq!(stats.total_collected, 7);
        assert_eq!(stats.total_flushed, 6);
        assert_eq!(stats.vehicle_id.as_deref(), Some("1HGCM82633A004352"));

        let stored = store.inner.recent_readings(10, None).unwrap();
        assert_eq!(stored.len(), 6);
        assert!(stored.iter().all(|r| r.vehicle_id == "1HGCM82633A004352"));
        assert!(store.inner.vehicle_info("1HGCM82633A004352").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_failed_flush_keeps_readings_in_order() {
        let store = flaky();
        let collector = collector(connected().await, store.clone(), 10);

        collector.collect_once().await.unwrap();
        collector.collect_once().await.unwrap();
        let before: Vec<_> = collector.buffer.lock().iter().map(|r| r.timestamp).collect();

        store.failing.store(true, Ordering::SeqCst);
        assert!(matches!(collector.flush(), Err(CollectorError::Storage(_))));
        assert_eq!(collector.buffer_len(), 2);

        collector.collect_once().await.unwrap();
        let after: Vec<_> = collector.buffer.lock().iter().map(|r| r.timestamp).collect();
        assert_eq!(&after[..2], &before[..]);
        assert!(after[1] <= after[2]);

        store.failing.store(false, Ordering::SeqCst);
        assert_eq!(collector.flush().unwrap(), 3);
        assert_eq!(collector.buffer_len(), 0);
        assert_eq!(collector.stats().failed_flushes, 1);
    }

    #[tokio::test]
    async fn test_start_requires_connection() {
        let conn = connected().await;
        conn.disconnect().await;
        let collector = collector(conn, flaky(), 3);
        assert!(matches!(collector.start(), Err(CollectorError::NotConnected)));
        assert!(!collector.collect_once().await.unwrap());
        assert_eq!(collector.stats().failed_polls, 1);
    }

    #[tokio::test]
    async fn test_start_stop_flushes_remainder() {
        let store = flaky();
        let collector = collector(connected().await, store.clone(), 1000);

        collector.start().unwrap();
        assert!(matches!(collector.start(), Err(CollectorError::AlreadyRunning)));
        tokio::time::sleep(Duration::from_millis(100)).await;
        collector.stop().await;

        assert!(!collector.is_running());
        assert_eq!(collector.buffer_len(), 0);
        assert!(!store.inner.recent_readings(1000, None).unwrap().is_empty());
        // stopping twice is harmless
        collector.stop().await;
    }
}
