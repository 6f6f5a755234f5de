// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/smartobd-rs

//! Date-range export of stored readings to CSV or JSON files

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::{info, warn};

use crate::db::{Database, Reading, StorageError};

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("unsupported export format: {0}")]
    UnsupportedFormat(String),

    #[error("invalid date '{0}', expected YYYY-MM-DD or an ISO 8601 timestamp")]
    InvalidDate(String),

    #[error("export I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("export serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Export format
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            other => Err(ExportError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// Parse a user-supplied date bound. A bare date expands to the start of the
/// day, or to its last microsecond when `end_of_day` is set.
pub fn parse_datetime(input: &str, end_of_day: bool) -> Result<DateTime<Utc>, ExportError> {
    let input = input.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, fmt) {
            return Ok(naive.and_utc());
        }
    }

    let date = NaiveDate::parse_from_str(input, "%Y-%m-%d").map_err(|_| ExportError::InvalidDate(input.to_string()))?;
    let time = if end_of_day {
        NaiveTime::from_hms_micro_opt(23, 59, 59, 999_999)
    } else {
        NaiveTime::from_hms_opt(0, 0, 0)
    }
    .ok_or_else(|| ExportError::InvalidDate(input.to_string()))?;

    Ok(date.and_time(time).and_utc())
}

/// Export readings between `start` and `end` into `dir`.
///
/// Returns `Ok(None)` when the range holds no readings.
pub fn export_readings(
    db: &Database,
    start: &str,
    end: &str,
    format: &str,
    dir: &Path,
) -> Result<Option<PathBuf>, ExportError> {
    let format = ExportFormat::from_str(format)?;
    let from = parse_datetime(start, false)?;
    let to = parse_datetime(end, true)?;

    let readings = db.readings_range(from, to, None)?;
    if readings.is_empty() {
        warn!("No data found for export between {} and {}", start, end);
        return Ok(None);
    }

    std::fs::create_dir_all(dir)?;
    let filename = format!(
        "obd_data_{}_{}_{}.{}",
        date_prefix(start),
        date_prefix(end),
        Local::now().format("%Y%m%d_%H%M%S"),
        format.extension()
    );
    let path = dir.join(filename);

    let mut writer = BufWriter::new(File::create(&path)?);
    match format {
        ExportFormat::Csv => write_csv(&mut writer, &readings)?,
        ExportFormat::Json => serde_json::to_writer_pretty(&mut writer, &readings)?,
    }
    writer.flush()?;

    info!("Exported {} readings to {}", readings.len(), path.display());
    Ok(Some(path))
}

fn date_prefix(s: &str) -> &str {
    s.get(..10).unwrap_or(s)
}

fn write_csv<W: Write>(writer: &mut W, readings: &[Reading]) -> std::io::Result<()> {
    writeln!(writer, "{}", Reading::FIELDS.join(","))?;
    for reading in readings {
        let row: Vec<String> = Reading::FIELDS
            .iter()
            .map(|field| csv_escape(&reading.field_text(field)))
            .collect();
        writeln!(writer, "{}", row.join(","))?;
    }
    Ok(())
}

/// RFC 4180 field quoting
fn csv_escape(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::parse_timestamp;
    use crate::obd::SensorValues;

    fn reading(ts: &str, rpm: f64) -> Reading {
        Reading {
            id: None,
            timestamp: parse_timestamp(ts).unwrap(),
            vehicle_id: "VIN1".to_string(),
            sensors: SensorValues {
                rpm: Some(rpm),
                speed: Some(42.0),
                ..SensorValues::default()
            },
            raw_data: Some(r#"{"note":"a, b"}"#.to_string()),
        }
    }

    fn seeded() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.save_readings(&[
            reading("2024-03-01T08:00:00Z", 900.0),
            reading("2024-03-01T23:30:00Z", 2100.0),
            reading("2024-03-03T10:00:00Z", 1500.0),
        ])
        .unwrap();
        db
    }

    #[test]
    fn test_parse_datetime() {
        let start = parse_datetime("2024-03-01", false).unwrap();
        assert_eq!(start, parse_timestamp("2024-03-01T00:00:00Z").unwrap());

        let end = parse_datetime("2024-03-01", true).unwrap();
        assert!(end > parse_timestamp("2024-03-01T23:59:59Z").unwrap());
        assert!(end < parse_timestamp("2024-03-02T00:00:00Z").unwrap());

        let explicit = parse_datetime("2024-03-01T12:30:00", true).unwrap();
        assert_eq!(explicit, parse_timestamp("2024-03-01T12:30:00Z").unwrap());

        assert!(matches!(parse_datetime("March 1st", false), Err(ExportError::InvalidDate(_))));
    }

    #[test]
    fn test_csv_export_covers_whole_end_day() {
        let db = seeded();
        let dir = tempfile::tempdir().unwrap();

        let path = export_readings(&db, "2024-03-01", "2024-03-01", "csv", dir.path())
            .unwrap()
            .unwrap();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("obd_data_2024-03-01_2024-03-01_"));
        assert!(name.ends_with(".csv"));

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], Reading::FIELDS.join(","));
        assert!(lines[2].contains(",2100,"));
        assert!(lines[1].ends_with(r#""{""note"":""a, b""}""#));
    }

    #[test]
    fn test_json_export() {
        let db = seeded();
        let dir = tempfile::tempdir().unwrap();

        let path = export_readings(&db, "2024-03-01", "2024-03-31", "JSON", dir.path())
            .unwrap()
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        let rows = value.as_array().unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0]["rpm"], 900.0);
        assert_eq!(rows[2]["vehicle_id"], "VIN1");
    }

    #[test]
    fn test_empty_range_and_bad_format() {
        let db = seeded();
        let dir = tempfile::tempdir().unwrap();

        assert!(export_readings(&db, "2023-01-01", "2023-01-31", "csv", dir.path())
            .unwrap()
            .is_none());
        assert!(matches!(
            export_readings(&db, "2024-03-01", "2024-03-31", "xlsx", dir.path()),
            Err(ExportError::UnsupportedFormat(f)) if f == "xlsx"
        ));
    }

    #[test]
    fn test_csv_escape() {
        assert_eq!(csv_escape("plain"), "plain");
        assert_eq!(csv_escape("a,b"), "\"a,b\"");
        assert_eq!(csv_escape("say \"hi\""), "\"say \"\"hi\"\"\"");
    }
}
