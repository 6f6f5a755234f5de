// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/smartobd-rs

//! Stored record types

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::obd::{Pid, SensorSnapshot, SensorValues};

/// Fixed-width RFC 3339 so that text order is chronological order
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}

/// One stored vehicle reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub vehicle_id: String,
    #[serde(flatten)]
    pub sensors: SensorValues,
    pub raw_data: Option<String>,
}

impl Reading {
    /// Column order used by storage and CSV export
    pub const FIELDS: [&'static str; 17] = [
        "id",
        "timestamp",
        "vehicle_id",
        "rpm",
        "speed",
        "engine_load",
        "coolant_temp",
        "intake_temp",
        "fuel_level",
        "throttle_position",
        "maf",
        "fuel_pressure",
        "engine_oil_temp",
        "engine_runtime",
        "distance_w_mil",
        "distance_since_dtc_clear",
        "raw_data",
    ];

    /// Tag a snapshot with the vehicle it came from, keeping the full
    /// snapshot as the raw payload
    pub fn from_snapshot(snapshot: &SensorSnapshot, vehicle_id: &str) -> Self {
        let collected_at = Utc::now();
        let raw = serde_json::json!({
            "timestamp": snapshot.timestamp,
            "sensors": snapshot.sensors,
            "collection_timestamp": collected_at,
            "vehicle_id": vehicle_id,
        });

        Self {
            id: None,
            timestamp: collected_at,
            vehicle_id: vehicle_id.to_string(),
            sensors: snapshot.sensors.clone(),
            raw_data: Some(raw.to_string()),
        }
    }

    /// Text value of a column, empty when missing
    pub fn field_text(&self, field: &str) -> String {
        let number = |v: Option<f64>| v.map(|x| x.to_string()).unwrap_or_default();
        match field {
            "id" => self.id.map(|id| id.to_string()).unwrap_or_default(),
            "timestamp" => format_timestamp(&self.timestamp),
            "vehicle_id" => self.vehicle_id.clone(),
            "raw_data" => self.raw_data.clone().unwrap_or_default(),
            other => Pid::ALL
                .into_iter()
                .find(|pid| pid.field() == other)
                .map(|pid| number(self.sensors.get(pid)))
                .unwrap_or_default(),
        }
    }
}

/// Alert severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// Display colour used in e-mail bodies
    pub fn color(self) -> &'static str {
        match self {
            Self::Low => "#28a745",
            Self::Medium => "#ffc107",
            Self::High => "#fd7e14",
            Self::Critical => "#dc3545",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown severity '{}'", other)),
        }
    }
}

/// Alert about to be stored
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAlert {
    pub vehicle_id: String,
    pub alert_type: String,
    pub severity: Severity,
    pub message: String,
    pub predicted_date: Option<DateTime<Utc>>,
    pub confidence: f64,
}

/// Stored maintenance alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceAlert {
    pub id: i64,
    pub vehicle_id: String,
    pub alert_type: String,
    pub severity: Severity,
    pub message: String,
    pub predicted_date: Option<DateTime<Utc>>,
    pub confidence: f64,
    pub is_resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MaintenanceAlert {
    /// Synthetic alert sent by notification self-tests, never stored
    pub fn test_alert() -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            vehicle_id: "test".to_string(),
            alert_type: "test_alert".to_string(),
            severity: Severity::Medium,
            message: "This is a test notification from SmartOBD".to_string(),
            predicted_date: None,
            confidence: 0.95,
            is_resolved: false,
            resolved_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// `oil_change` -> `Oil Change`
    pub fn title(&self) -> String {
        title_case(&self.alert_type)
    }
}

pub fn title_case(snake: &str) -> String {
    snake
        .split('_')
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// Vehicle identity and service record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleInfo {
    pub vehicle_id: String,
    pub vin: Option<String>,
    pub make: Option<String>,
    pub model: Option<String>,
    pub year: Option<i32>,
    pub engine_type: Option<String>,
    pub transmission_type: Option<String>,
    pub fuel_type: Option<String>,
    pub mileage: Option<f64>,
    pub last_service_date: Option<DateTime<Utc>>,
    pub service_history: Vec<serde_json::Value>,
}

impl VehicleInfo {
    pub fn from_vin(vin: &str) -> Self {
        Self {
            vehicle_id: vin.to_string(),
            vin: Some(vin.to_string()),
            make: None,
            model: None,
            year: None,
            engine_type: None,
            transmission_type: None,
            fuel_type: None,
            mileage: None,
            last_service_date: None,
            service_history: Vec::new(),
        }
    }
}

/// Storage summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseStats {
    pub total_obd_records: u64,
    pub total_alerts: u64,
    pub unresolved_alerts: u64,
    pub first_record_date: Option<DateTime<Utc>>,
    pub last_record_date: Option<DateTime<Utc>>,
    pub size_bytes: u64,
    pub database_size_mb: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("oil_change"), "Oil Change");
        assert_eq!(title_case("air_filter"), "Air Filter");
        assert_eq!(title_case("test_alert"), "Test Alert");
    }

    #[test]
    fn test_timestamp_text_orders_chronologically() {
        let early = parse_timestamp("2024-01-01T09:00:00Z").unwrap();
        let late = parse_timestamp("2024-01-01T10:00:00.5Z").unwrap();
        assert!(format_timestamp(&early) < format_timestamp(&late));
        assert_eq!(format_timestamp(&early), "2024-01-01T09:00:00.000000Z");
    }

    #[test]
    fn test_reading_json_is_flat() {
        let snapshot = SensorSnapshot {
            timestamp: Utc::now(),
            sensors: SensorValues {
                rpm: Some(900.0),
                ..SensorValues::default()
            },
        };
        let reading = Reading::from_snapshot(&snapshot, "VIN123");
        let json = serde_json::to_value(&reading).unwrap();
        assert_eq!(json["rpm"], 900.0);
        assert!(json["speed"].is_null());
        assert_eq!(json["vehicle_id"], "VIN123");

        let raw: serde_json::Value = serde_json::from_str(reading.raw_data.as_deref().unwrap()).unwrap();
        assert_eq!(raw["sensors"]["rpm"], 900.0);
        assert_eq!(raw["vehicle_id"], "VIN123");
    }

    #[test]
    fn test_field_text() {
        let reading = Reading {
            id: Some(7),
            timestamp: parse_timestamp("2024-03-01T00:00:00Z").unwrap(),
            vehicle_id: "car".to_string(),
            sensors: SensorValues {
                speed: Some(55.5),
                ..SensorValues::default()
            },
            raw_data: None,
        };
        assert_eq!(reading.field_text("id"), "7");
        assert_eq!(reading.field_text("speed"), "55.5");
        assert_eq!(reading.field_text("rpm"), "");
        assert_eq!(reading.field_text("raw_data"), "");
    }

    #[test]
    fn test_severity_round_trip() {
        assert_eq!("HIGH".parse::<Severity>(), Ok(Severity::High));
        assert!("urgent".parse::<Severity>().is_err());
        assert_eq!(Severity::Medium.to_string(), "medium");
    }
}
