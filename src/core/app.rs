// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/smartobd-rs

//! Application orchestrator
//!
//! Owns every long-lived component and the background units that drive
//! them: the collector loop, the monitoring loop, and the dashboard servers.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use super::{EventBus, Worker};
use crate::config::{Config, Settings};
use crate::db::{Database, DatabaseStats, MaintenanceAlert, Reading, ReadingStore, StorageError};
use crate::ml::{ModelStatus, PredictionReport, Predictor, TrainingReport};
use crate::notify::{ChannelStatus, DispatchReport, NotificationManager};
use crate::obd::{CollectionStats, CollectorError, DataCollector, ObdConnection, SensorSnapshot, VehicleMetadata};
use crate::streaming::{export_readings, PushContext, PushServer};

const DASHBOARD_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Snapshot reported by `status`, the dashboard and the push channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppStatus {
    pub is_running: bool,
    pub obd_connected: bool,
    pub data_collection_active: bool,
    pub dashboard_running: bool,
    pub database_connected: bool,
    pub last_prediction: Option<DateTime<Utc>>,
    pub pending_alerts: usize,
    pub collection: CollectionStats,
}

/// Outcome of one monitoring cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleReport {
    pub predictions: PredictionReport,
    pub pending_alerts: usize,
    pub dispatch: DispatchReport,
}

struct Dashboard {
    http: Worker,
    push: Worker,
    addr: SocketAddr,
}

pub struct App {
    config: Config,
    db: Arc<Database>,
    bus: Arc<EventBus>,
    connection: Arc<ObdConnection>,
    collector: Arc<DataCollector>,
    predictor: Arc<Mutex<Predictor>>,
    notifier: Arc<NotificationManager>,
    running: AtomicBool,
    last_prediction: RwLock<Option<DateTime<Utc>>>,
    monitor: Mutex<Option<Worker>>,
    dashboard: Mutex<Option<Dashboard>>,
}

impl App {
    /// Wire every component from configuration
    pub fn new(config: Config) -> Result<Arc<Self>> {
        let settings = config.settings().clone();
        info!("Initializing {} v{}", settings.app.name, settings.app.version);

        let db = Arc::new(Database::open(&settings.database).context("failed to open database")?);
        let bus = Arc::new(EventBus::default());
        let connection = Arc::new(ObdConnection::new(settings.obd.clone()));
        let store: Arc<dyn ReadingStore> = db.clone();
        let collector = Arc::new(DataCollector::new(
            connection.clone(),
            store,
            bus.clone(),
            settings.data_collection.clone(),
        ));
        let predictor = Predictor::new(settings.ml.clone(), db.clone());
        let last_prediction = predictor.last_prediction();
        let notifier = Arc::new(NotificationManager::new(&settings.notifications));

        info!("Application initialized");
        Ok(Arc::new(Self {
            config,
            db,
            bus,
            connection,
            collector,
            predictor: Arc::new(Mutex::new(predictor)),
            notifier,
            running: AtomicBool::new(false),
            last_prediction: RwLock::new(last_prediction),
            monitor: Mutex::new(None),
            dashboard: Mutex::new(None),
        }))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn settings(&self) -> &Settings {
        self.config.settings()
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    // --- adapter ---

    pub async fn connect_obd(&self) -> bool {
        info!("Connecting to OBD-II device...");
        let connected = self.connection.connect().await;
        if connected {
            info!("Connected to OBD-II device");
        } else {
            error!("Failed to connect to OBD-II device");
        }
        self.bus.publish_status("obd", if connected { "connected" } else { "disconnected" });
        connected
    }

    pub async fn disconnect_obd(&self) {
        self.collector.stop().await;
        self.connection.disconnect().await;
        self.bus.publish_status("obd", "disconnected");
        info!("Disconnected from OBD-II device");
    }

    pub fn is_obd_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub async fn current_data(&self) -> Option<SensorSnapshot> {
        if !self.connection.is_connected() {
            return None;
        }
        self.connection.get_current_data().await
    }

    /// Current snapshot as one flat object (`timestamp` plus each signal)
    pub async fn current_data_json(&self) -> Option<Value> {
        let snapshot = self.current_data().await?;
        let mut value = serde_json::to_value(&snapshot.sensors).ok()?;
        if let Value::Object(map) = &mut value {
            map.insert("timestamp".to_string(), Value::String(snapshot.timestamp.to_rfc3339()));
        }
        Some(value)
    }

    pub async fn vehicle_info(&self) -> Option<VehicleMetadata> {
        if !self.connection.is_connected() {
            return None;
        }
        self.connection.get_vehicle_info().await
    }

    pub async fn dtc_codes(&self) -> Result<Vec<String>> {
        Ok(self.connection.get_dtc_codes().await?)
    }

    pub async fn clear_dtc_codes(&self) -> Result<bool> {
        Ok(self.connection.clear_dtc_codes().await?)
    }

    // --- collection ---

    pub fn start_data_collection(&self) -> Result<(), CollectorError> {
        self.collector.start()
    }

    pub async fn stop_data_collection(&self) {
        self.collector.stop().await;
    }

    pub fn collection_stats(&self) -> CollectionStats {
        self.collector.stats()
    }

    // --- monitoring ---

    /// Connect, start collection and spawn the monitoring loop. Any failure
    /// rolls back what was started.
    pub async fn start_monitoring(self: &Arc<Self>) -> Result<()> {
        if self.is_running() {
            warn!("Monitoring is already running");
            return Ok(());
        }
        info!("Starting monitoring mode...");

        if !self.connection.is_connected() && !self.connect_obd().await {
            self.stop_monitoring().await;
            anyhow::bail!("failed to connect to OBD-II device");
        }

        match self.collector.start() {
            Ok(()) | Err(CollectorError::AlreadyRunning) => {}
            Err(e) => {
                self.stop_monitoring().await;
                return Err(e).context("failed to start data collection");
            }
        }

        self.running.store(true, Ordering::SeqCst);
        let app = Arc::clone(self);
        let worker = Worker::spawn("monitor", move |mut shutdown| async move {
            info!("Monitoring loop started");
            let interval = app.settings().ml.prediction_interval();
            let cooldown = app.settings().monitoring.error_cooldown();

            loop {
                let pause = tokio::select! {
                    _ = shutdown.recv() => break,
                    result = app.monitoring_cycle() => match result {
                        Ok(report) => {
                            info!(
                                "Monitoring cycle: {} prediction(s), {} pending alert(s), {} notification(s) sent",
                                report.predictions.predictions.len(),
                                report.pending_alerts,
                                report.dispatch.sent()
                            );
                            interval
                        }
                        Err(e) => {
                            error!("Error in monitoring loop: {:#}", e);
                            app.bus.publish_error(&format!("{:#}", e));
                            cooldown
                        }
                    },
                };

                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = tokio::time::sleep(pause) => {}
                }
            }
            info!("Monitoring loop stopped");
        });
        *self.monitor.lock() = Some(worker);

        self.bus.publish_status("monitoring", "running");
        info!("Monitoring mode started successfully");
        Ok(())
    }

    pub async fn stop_monitoring(&self) {
        info!("Stopping monitoring mode...");
        self.running.store(false, Ordering::SeqCst);

        self.collector.stop().await;
        self.connection.disconnect().await;

        let worker = self.monitor.lock().take();
        if let Some(worker) = worker {
            if !worker.stop(self.settings().monitoring.stop_timeout()).await {
                warn!("Monitoring loop abandoned after timeout");
            }
        }

        self.bus.publish_status("monitoring", "stopped");
        info!("Monitoring mode stopped");
    }

    /// Predict, then dispatch every unresolved alert
    pub async fn monitoring_cycle(&self) -> Result<CycleReport> {
        let predictions = self.run_predictions().await?;

        let pending = self.with_db(|db| db.alerts(None, Some(false))).await?;
        for alert in pending.iter().filter(|a| predictions.alert_ids.contains(&a.id)) {
            self.bus.publish_alert(alert.clone());
        }

        let dispatch = self.notifier.send_alerts(&pending).await;

        Ok(CycleReport {
            predictions,
            pending_alerts: pending.len(),
            dispatch,
        })
    }

    // --- predictor ---

    pub async fn run_predictions(&self) -> Result<PredictionReport> {
        let predictor = self.predictor.clone();
        let (report, last) = tokio::task::spawn_blocking(move || {
            let mut predictor = predictor.lock();
            (predictor.run_predictions(None), predictor.last_prediction())
        })
        .await
        .context("prediction task panicked")?;
        *self.last_prediction.write() = last;
        Ok(report?)
    }

    pub async fn train_models(&self, vehicle_id: Option<String>) -> Result<TrainingReport> {
        let predictor = self.predictor.clone();
        let report = tokio::task::spawn_blocking(move || predictor.lock().train_models(vehicle_id.as_deref()))
            .await
            .context("training task panicked")??;
        Ok(report)
    }

    pub async fn predictions(&self) -> Result<BTreeMap<String, ModelStatus>> {
        let predictor = self.predictor.clone();
        tokio::task::spawn_blocking(move || predictor.lock().get_predictions())
            .await
            .context("predictor task panicked")
    }

    // --- storage ---

    /// Run a storage call on the blocking pool
    async fn with_db<T, F>(&self, call: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T, StorageError> + Send + 'static,
    {
        let db = self.db.clone();
        let value = tokio::task::spawn_blocking(move || call(&db))
            .await
            .context("storage task panicked")??;
        Ok(value)
    }

    pub async fn recent_readings(&self, limit: usize) -> Result<Vec<Reading>> {
        self.with_db(move |db| db.recent_readings(limit, None)).await
    }

    pub async fn alerts(&self, resolved: bool) -> Result<Vec<MaintenanceAlert>> {
        self.with_db(move |db| db.alerts(None, Some(resolved))).await
    }

    pub async fn database_stats(&self) -> Result<DatabaseStats> {
        self.with_db(|db| db.stats()).await
    }

    pub async fn clear_old_data(&self, days: u32) -> Result<usize> {
        let deleted = self.with_db(move |db| db.clear_old_readings(days)).await?;
        info!("Cleared {} readings older than {} days", deleted, days);
        Ok(deleted)
    }

    /// Export into the configured export directory
    pub async fn export_data(&self, start: &str, end: &str, format: &str) -> Result<Option<PathBuf>> {
        let db = self.db.clone();
        let dir = self.settings().monitoring.export_dir.clone();
        let (start, end, format) = (start.to_string(), end.to_string(), format.to_string());
        let path = tokio::task::spawn_blocking(move || export_readings(&db, &start, &end, &format, &dir))
            .await
            .context("export task panicked")??;
        Ok(path)
    }

    // --- notifications ---

    pub async fn test_notifications(&self) -> BTreeMap<String, bool> {
        self.notifier.test_notifications().await
    }

    pub fn notification_status(&self) -> BTreeMap<String, ChannelStatus> {
        self.notifier.status()
    }

    // --- dashboard ---

    /// Serve the HTTP dashboard on `host:port` and the push channel on the
    /// configured push port. Returns the bound HTTP address.
    pub async fn start_dashboard(self: &Arc<Self>, host: &str, port: u16) -> Result<SocketAddr> {
        if let Some(addr) = self.dashboard_addr() {
            warn!("Dashboard server is already running on {}", addr);
            return Ok(addr);
        }

        let listener = TcpListener::bind((host, port))
            .await
            .with_context(|| format!("failed to bind dashboard on {}:{}", host, port))?;
        let push_port = self.settings().app.push_port;
        let push_listener = TcpListener::bind((host, push_port))
            .await
            .with_context(|| format!("failed to bind push channel on {}:{}", host, push_port))?;
        let addr = listener.local_addr()?;
        let push_addr = push_listener.local_addr()?;

        let router = crate::web::router(self.clone(), push_addr.port());
        let http = Worker::spawn("dashboard", move |mut shutdown| async move {
            let server = axum::serve(listener, router).with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            });
            if let Err(e) = server.await {
                error!("Dashboard server error: {}", e);
            }
        });

        let context: Arc<dyn PushContext> = self.clone();
        let push = Arc::new(PushServer::new(context, self.bus.clone())).serve(push_listener);

        *self.dashboard.lock() = Some(Dashboard { http, push, addr });
        self.bus.publish_status("dashboard", "running");
        info!("Web dashboard available at http://{}", addr);
        Ok(addr)
    }

    pub async fn stop_dashboard(&self) {
        let dashboard = self.dashboard.lock().take();
        if let Some(dashboard) = dashboard {
            info!("Stopping web dashboard...");
            dashboard.push.stop(DASHBOARD_STOP_TIMEOUT).await;
            dashboard.http.stop(DASHBOARD_STOP_TIMEOUT).await;
            self.bus.publish_status("dashboard", "stopped");
            info!("Web dashboard stopped");
        }
    }

    pub fn dashboard_addr(&self) -> Option<SocketAddr> {
        self.dashboard.lock().as_ref().map(|d| d.addr)
    }

    // --- status ---

    pub async fn status(&self) -> AppStatus {
        let pending_alerts = match self.with_db(|db| db.alerts(None, Some(false))).await {
            Ok(alerts) => alerts.len(),
            Err(e) => {
                warn!("Could not count pending alerts: {:#}", e);
                0
            }
        };

        AppStatus {
            is_running: self.is_running(),
            obd_connected: self.connection.is_connected(),
            data_collection_active: self.collector.is_running(),
            dashboard_running: self.dashboard_addr().is_some(),
            database_connected: self.db.is_connected(),
            last_prediction: *self.last_prediction.read(),
            pending_alerts,
            collection: self.collector.stats(),
        }
    }

    /// Stop every background unit
    pub async fn shutdown(&self) {
        info!("Shutting down SmartOBD application...");
        if self.is_running() || self.collector.is_running() || self.connection.is_connected() {
            self.stop_monitoring().await;
        }
        self.stop_dashboard().await;
        info!("SmartOBD application shutdown complete");
    }
}

#[async_trait]
impl PushContext for App {
    async fn status(&self) -> Value {
        serde_json::to_value(App::status(self).await).unwrap_or(Value::Null)
    }

    async fn current_data(&self) -> Option<Value> {
        self.current_data_json().await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::{NewAlert, Severity};
    use std::path::Path;

    /// Application over a simulated adapter and throwaway storage
    pub(crate) fn test_app(dir: &Path) -> Arc<App> {
        let toml = format!(
            r#"
[app]
name = "SmartOBD"
version = "1.0.0"
push_port = 0

[database]
type = "sqlite"
path = "{db}"

[obd]
connection_type = "simulator"
timeout = 2
retry_attempts = 1
retry_backoff_secs = 0

[data_collection]
interval_seconds = 0.05
batch_size = 2

[ml]
model_path = "{models}"
prediction_interval_hours = 1.0

[logging]
level = "INFO"

[monitoring]
error_cooldown_secs = 1
stop_timeout_secs = 2
export_dir = "{exports}"
"#,
            db = dir.join("smartobd.db").display(),
            models = dir.join("models").display(),
            exports = dir.join("exports").display(),
        );
        App::new(Config::from_toml_str(&toml).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_connect_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(dir.path());

        assert!(app.current_data().await.is_none());
        assert!(app.connect_obd().await);
        assert!(app.status().await.obd_connected);

        let data = app.current_data_json().await.unwrap();
        assert!(data.get("rpm").is_some());
        assert!(data.get("timestamp").is_some());

        let info = app.vehicle_info().await.unwrap();
        assert_eq!(info.vin.as_deref(), Some("1HGCM82633A004352"));

        app.disconnect_obd().await;
        assert!(!app.status().await.obd_connected);
    }

    #[tokio::test]
    async fn test_monitoring_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(dir.path());

        app.start_monitoring().await.unwrap();
        let status = app.status().await;
        assert!(status.is_running);
        assert!(status.data_collection_active);

        tokio::time::sleep(Duration::from_millis(300)).await;
        app.stop_monitoring().await;

        let status = app.status().await;
        assert!(!status.is_running);
        assert!(!status.obd_connected);
        assert!(!status.data_collection_active);
        assert!(app.database_stats().await.unwrap().total_obd_records > 0);
    }

    #[tokio::test]
    async fn test_cycle_counts_pending_alerts() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(dir.path());

        app.database()
            .save_alert(&NewAlert {
                vehicle_id: "VIN1".to_string(),
                alert_type: "brake_check".to_string(),
                severity: Severity::Medium,
                message: "Brake Check maintenance needed".to_string(),
                predicted_date: None,
                confidence: 0.9,
            })
            .unwrap();

        let report = app.monitoring_cycle().await.unwrap();
        assert!(report.predictions.predictions.is_empty());
        assert_eq!(report.pending_alerts, 1);
        assert_eq!(report.dispatch.alerts, 1);
        assert_eq!(report.dispatch.sent(), 0);
        assert!(app.status().await.last_prediction.is_some());
        assert_eq!(app.status().await.pending_alerts, 1);
    }

    #[tokio::test]
    async fn test_dashboard_start_stop() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(dir.path());

        let addr = app.start_dashboard("127.0.0.1", 0).await.unwrap();
        assert!(app.status().await.dashboard_running);
        assert_eq!(app.dashboard_addr(), Some(addr));

        app.stop_dashboard().await;
        assert!(!app.status().await.dashboard_running);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_storage_calls_leave_runtime_free() {
        use std::sync::atomic::AtomicUsize;

        let dir = tempfile::tempdir().unwrap();
        let app = test_app(dir.path());

        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        let ticker = tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(10)).await;
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        let stats = app
            .with_db(|db| {
                std::thread::sleep(Duration::from_millis(200));
                db.stats()
            })
            .await
            .unwrap();
        assert_eq!(stats.total_obd_records, 0);
        assert!(ticks.load(Ordering::SeqCst) >= 5);
        ticker.abort();
    }
}
