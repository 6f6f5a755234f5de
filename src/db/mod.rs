// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/smartobd-rs

//! Database module for persistent storage

mod models;

pub use models::{
    format_timestamp, parse_timestamp, title_case, DatabaseStats, MaintenanceAlert, NewAlert, Reading,
    Severity, VehicleInfo,
};

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::DatabaseSettings;
use crate::obd::SensorValues;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported database backend '{0}'")]
    UnsupportedBackend(String),
}

/// Sink for collected readings
pub trait ReadingStore: Send + Sync {
    fn store_readings(&self, readings: &[Reading]) -> Result<usize, StorageError>;

    fn store_vehicle(&self, info: &VehicleInfo) -> Result<(), StorageError>;
}

const READING_COLUMNS: &str = "id, timestamp, vehicle_id, rpm, speed, engine_load, coolant_temp, \
     intake_temp, fuel_level, throttle_position, maf, fuel_pressure, engine_oil_temp, \
     engine_runtime, distance_w_mil, distance_since_dtc_clear, raw_data";

const ALERT_COLUMNS: &str = "id, vehicle_id, alert_type, severity, message, predicted_date, \
     confidence, is_resolved, resolved_at, created_at, updated_at";

/// Database manager
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl Database {
    /// Open or create the database described by `settings`
    pub fn open(settings: &DatabaseSettings) -> Result<Self, StorageError> {
        if settings.kind != "sqlite" {
            return Err(StorageError::UnsupportedBackend(settings.kind.clone()));
        }
        Self::open_path(&settings.path)
    }

    pub fn open_path(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            "#,
        )?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path.to_path_buf()),
        };
        db.create_tables()?;

        info!("Database opened at {:?}", path);
        Ok(db)
    }

    /// Private in-memory database
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let db = Self {
            conn: Arc::new(Mutex::new(Connection::open_in_memory()?)),
            path: None,
        };
        db.create_tables()?;
        Ok(db)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn create_tables(&self) -> Result<(), StorageError> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS obd_data (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                vehicle_id TEXT NOT NULL,
                rpm REAL,
                speed REAL,
                engine_load REAL,
                coolant_temp REAL,
                intake_temp REAL,
                fuel_level REAL,
                throttle_position REAL,
                maf REAL,
                fuel_pressure REAL,
                engine_oil_temp REAL,
                engine_runtime REAL,
                distance_w_mil REAL,
                distance_since_dtc_clear REAL,
                raw_data TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_obd_data_timestamp ON obd_data(timestamp);
            CREATE INDEX IF NOT EXISTS idx_obd_data_vehicle ON obd_data(vehicle_id);

            CREATE TABLE IF NOT EXISTS maintenance_alerts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                vehicle_id TEXT NOT NULL,
                alert_type TEXT NOT NULL,
                severity TEXT NOT NULL DEFAULT 'medium',
                message TEXT NOT NULL,
                predicted_date TEXT,
                confidence REAL NOT NULL,
                is_resolved INTEGER NOT NULL DEFAULT 0,
                resolved_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_alerts_created ON maintenance_alerts(created_at);

            CREATE TABLE IF NOT EXISTS vehicle_info (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                vehicle_id TEXT NOT NULL UNIQUE,
                vin TEXT,
                make TEXT,
                model TEXT,
                year INTEGER,
                engine_type TEXT,
                transmission_type TEXT,
                fuel_type TEXT,
                mileage REAL,
                last_service_date TEXT,
                service_history TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )?;

        Ok(())
    }

    /// Liveness probe
    pub fn is_connected(&self) -> bool {
        let conn = self.conn.lock();
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)).is_ok()
    }

    /// Store readings in one transaction
    pub fn save_readings(&self, readings: &[Reading]) -> Result<usize, StorageError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO obd_data (timestamp, vehicle_id, rpm, speed, engine_load, coolant_temp, \
                 intake_temp, fuel_level, throttle_position, maf, fuel_pressure, engine_oil_temp, \
                 engine_runtime, distance_w_mil, distance_since_dtc_clear, raw_data) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            )?;

            for reading in readings {
                let s = &reading.sensors;
                stmt.execute(params![
                    format_timestamp(&reading.timestamp),
                    reading.vehicle_id,
                    s.rpm,
                    s.speed,
                    s.engine_load,
                    s.coolant_temp,
                    s.intake_temp,
                    s.fuel_level,
                    s.throttle_position,
                    s.maf,
                    s.fuel_pressure,
                    s.engine_oil_temp,
                    s.engine_runtime,
                    s.distance_w_mil,
                    s.distance_since_dtc_clear,
                    reading.raw_data,
                ])?;
            }
        }

        tx.commit()?;
        debug!("Saved {} readings", readings.len());
        Ok(readings.len())
    }

    /// Most recent readings, newest first
    pub fn recent_readings(&self, limit: usize, vehicle_id: Option<&str>) -> Result<Vec<Reading>, StorageError> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM obd_data WHERE (?1 IS NULL OR vehicle_id = ?1) \
             ORDER BY timestamp DESC, id DESC LIMIT ?2",
            READING_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![vehicle_id, limit as i64], reading_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Readings with `start <= timestamp <= end`, oldest first
    pub fn readings_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        vehicle_id: Option<&str>,
    ) -> Result<Vec<Reading>, StorageError> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM obd_data WHERE timestamp >= ?1 AND timestamp <= ?2 \
             AND (?3 IS NULL OR vehicle_id = ?3) ORDER BY timestamp ASC, id ASC",
            READING_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![format_timestamp(&start), format_timestamp(&end), vehicle_id],
            reading_from_row,
        )?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Store an alert, returning its id
    pub fn save_alert(&self, alert: &NewAlert) -> Result<i64, StorageError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let now = format_timestamp(&Utc::now());

        tx.execute(
            "INSERT INTO maintenance_alerts (vehicle_id, alert_type, severity, message, predicted_date, \
             confidence, is_resolved, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?7)",
            params![
                alert.vehicle_id,
                alert.alert_type,
                alert.severity.as_str(),
                alert.message,
                alert.predicted_date.as_ref().map(format_timestamp),
                alert.confidence,
                now,
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        info!("Saved {} alert #{} for {}", alert.alert_type, id, alert.vehicle_id);
        Ok(id)
    }

    /// Alerts, newest first, optionally filtered by vehicle and resolved flag
    pub fn alerts(&self, vehicle_id: Option<&str>, resolved: Option<bool>) -> Result<Vec<MaintenanceAlert>, StorageError> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM maintenance_alerts WHERE (?1 IS NULL OR vehicle_id = ?1) \
             AND (?2 IS NULL OR is_resolved = ?2) ORDER BY created_at DESC, id DESC",
            ALERT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![vehicle_id, resolved], alert_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Mark an alert resolved or reopen it. Returns whether it exists.
    pub fn set_alert_resolved(&self, id: i64, resolved: bool) -> Result<bool, StorageError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let now = Utc::now();

        let changed = tx.execute(
            "UPDATE maintenance_alerts SET is_resolved = ?1, resolved_at = ?2, updated_at = ?3 WHERE id = ?4",
            params![
                resolved,
                resolved.then(|| format_timestamp(&now)),
                format_timestamp(&now),
                id
            ],
        )?;
        tx.commit()?;
        Ok(changed > 0)
    }

    /// Delete readings strictly older than `cutoff`
    pub fn delete_readings_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StorageError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let deleted = tx.execute(
            "DELETE FROM obd_data WHERE timestamp < ?1",
            params![format_timestamp(&cutoff)],
        )?;
        tx.commit()?;

        info!("Deleted {} readings older than {}", deleted, cutoff);
        Ok(deleted)
    }

    /// Retention sweep: delete readings older than `days`
    pub fn clear_old_readings(&self, days: u32) -> Result<usize, StorageError> {
        let cutoff = Duration::try_days(i64::from(days)).and_then(|age| Utc::now().checked_sub_signed(age));
        match cutoff {
            Some(cutoff) => self.delete_readings_before(cutoff),
            None => {
                debug!("Retention of {} days predates any representable time, nothing to delete", days);
                Ok(0)
            }
        }
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DatabaseStats, StorageError> {
        let conn = self.conn.lock();

        let total_obd_records: i64 = conn.query_row("SELECT COUNT(*) FROM obd_data", [], |row| row.get(0))?;
        let total_alerts: i64 = conn.query_row("SELECT COUNT(*) FROM maintenance_alerts", [], |row| row.get(0))?;
        let unresolved_alerts: i64 = conn.query_row(
            "SELECT COUNT(*) FROM maintenance_alerts WHERE is_resolved = 0",
            [],
            |row| row.get(0),
        )?;
        let (first, last): (Option<String>, Option<String>) = conn.query_row(
            "SELECT MIN(timestamp), MAX(timestamp) FROM obd_data",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let size_bytes: i64 = conn
            .query_row(
                "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        Ok(DatabaseStats {
            total_obd_records: total_obd_records as u64,
            total_alerts: total_alerts as u64,
            unresolved_alerts: unresolved_alerts as u64,
            first_record_date: first.and_then(|s| parse_timestamp(&s).ok()),
            last_record_date: last.and_then(|s| parse_timestamp(&s).ok()),
            size_bytes: size_bytes as u64,
            database_size_mb: ((size_bytes as f64 / (1024.0 * 1024.0)) * 100.0).round() / 100.0,
        })
    }

    /// Insert or update a vehicle record by `vehicle_id`
    pub fn upsert_vehicle_info(&self, info: &VehicleInfo) -> Result<(), StorageError> {
        let history = serde_json::to_string(&info.service_history)?;
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let now = format_timestamp(&Utc::now());

        tx.execute(
            "INSERT INTO vehicle_info (vehicle_id, vin, make, model, year, engine_type, transmission_type, \
             fuel_type, mileage, last_service_date, service_history, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12) \
             ON CONFLICT(vehicle_id) DO UPDATE SET \
             vin = excluded.vin, make = excluded.make, model = excluded.model, year = excluded.year, \
             engine_type = excluded.engine_type, transmission_type = excluded.transmission_type, \
             fuel_type = excluded.fuel_type, mileage = excluded.mileage, \
             last_service_date = excluded.last_service_date, service_history = excluded.service_history, \
             updated_at = excluded.updated_at",
            params![
                info.vehicle_id,
                info.vin,
                info.make,
                info.model,
                info.year,
                info.engine_type,
                info.transmission_type,
                info.fuel_type,
                info.mileage,
                info.last_service_date.as_ref().map(format_timestamp),
                history,
                now,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn vehicle_info(&self, vehicle_id: &str) -> Result<Option<VehicleInfo>, StorageError> {
        let conn = self.conn.lock();
        let info = conn
            .query_row(
                "SELECT vehicle_id, vin, make, model, year, engine_type, transmission_type, fuel_type, \
                 mileage, last_service_date, service_history FROM vehicle_info WHERE vehicle_id = ?1",
                params![vehicle_id],
                |row| {
                    let history: String = row.get(10)?;
                    Ok(VehicleInfo {
                        vehicle_id: row.get(0)?,
                        vin: row.get(1)?,
                        make: row.get(2)?,
                        model: row.get(3)?,
                        year: row.get(4)?,
                        engine_type: row.get(5)?,
                        transmission_type: row.get(6)?,
                        fuel_type: row.get(7)?,
                        mileage: row.get(8)?,
                        last_service_date: optional_timestamp(row, 9)?,
                        service_history: serde_json::from_str(&history)
                            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(10, Type::Text, Box::new(e)))?,
                    })
                },
            )
            .optional()?;
        Ok(info)
    }
}

impl ReadingStore for Database {
    fn store_readings(&self, readings: &[Reading]) -> Result<usize, StorageError> {
        self.save_readings(readings)
    }

    fn store_vehicle(&self, info: &VehicleInfo) -> Result<(), StorageError> {
        self.upsert_vehicle_info(info)
    }
}

fn timestamp_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    parse_timestamp(&text).map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn optional_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| {
        parse_timestamp(&t).map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

fn reading_from_row(row: &Row<'_>) -> rusqlite::Result<Reading> {
    Ok(Reading {
        id: row.get(0)?,
        timestamp: timestamp_at(row, 1)?,
        vehicle_id: row.get(2)?,
        sensors: SensorValues {
            rpm: row.get(3)?,
            speed: row.get(4)?,
            engine_load: row.get(5)?,
            coolant_temp: row.get(6)?,
            intake_temp: row.get(7)?,
            fuel_level: row.get(8)?,
            throttle_position: row.get(9)?,
            maf: row.get(10)?,
            fuel_pressure: row.get(11)?,
            engine_oil_temp: row.get(12)?,
            engine_runtime: row.get(13)?,
            distance_w_mil: row.get(14)?,
            distance_since_dtc_clear: row.get(15)?,
        },
        raw_data: row.get(16)?,
    })
}

fn alert_from_row(row: &Row<'_>) -> rusqlite::Result<MaintenanceAlert> {
    let severity: String = row.get(3)?;
    Ok(MaintenanceAlert {
        id: row.get(0)?,
        vehicle_id: row.get(1)?,
        alert_type: row.get(2)?,
        severity: severity
            .parse::<Severity>()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, e.into()))?,
        message: row.get(4)?,
        predicted_date: optional_timestamp(row, 5)?,
        confidence: row.get(6)?,
        is_resolved: row.get(7)?,
        resolved_at: optional_timestamp(row, 8)?,
        created_at: timestamp_at(row, 9)?,
        updated_at: timestamp_at(row, 10)?,
    })
}
