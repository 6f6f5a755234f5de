// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/smartobd-rs

//! Feature engineering over chronologically ordered readings

use chrono::{Datelike, Timelike};

use super::MaintenanceKind;
use crate::db::Reading;
use crate::obd::Pid;

/// Base signals copied straight from each reading
const BASE_SIGNALS: [Pid; 11] = [
    Pid::Rpm,
    Pid::Speed,
    Pid::EngineLoad,
    Pid::CoolantTemp,
    Pid::IntakeTemp,
    Pid::FuelLevel,
    Pid::ThrottlePosition,
    Pid::Maf,
    Pid::FuelPressure,
    Pid::EngineOilTemp,
    Pid::EngineRuntime,
];

const ROLLING_SIGNALS: [Pid; 3] = [Pid::Rpm, Pid::Speed, Pid::EngineLoad];

pub const FEATURE_NAMES: [&str; 24] = [
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
    "rpm_mean_1h",
    "rpm_std_1h",
    "rpm_max_1h",
    "speed_mean_1h",
    "speed_std_1h",
    "speed_max_1h",
    "engine_load_mean_1h",
    "engine_load_std_1h",
    "engine_load_max_1h",
    "hour",
    "day_of_week",
    "month",
    "distance_since_dtc_clear",
];

/// Column holding the distance signal
pub const DISTANCE_COLUMN: usize = 23;

/// Mean, sample std and max of a full window; missing when the window is
/// not yet full or any value in it is missing
fn window_stats(window: &[Option<f64>]) -> [Option<f64>; 3] {
    let values: Option<Vec<f64>> = window.iter().copied().collect();
    let Some(values) = values else {
        return [None; 3];
    };

    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let std = if values.len() > 1 {
        Some((values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt())
    } else {
        None
    };
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    [Some(mean), std, Some(max)]
}

/// Build the feature matrix. `readings` must be sorted oldest first.
pub fn build_features(readings: &[Reading], window: usize) -> Vec<Vec<f64>> {
    let window = window.max(1);
    let series: Vec<Vec<Option<f64>>> = ROLLING_SIGNALS
        .iter()
        .map(|pid| readings.iter().map(|r| r.sensors.get(*pid)).collect())
        .collect();

    let mut raw: Vec<Vec<Option<f64>>> = Vec::with_capacity(readings.len());
    for (i, reading) in readings.iter().enumerate() {
        let mut row: Vec<Option<f64>> = BASE_SIGNALS.iter().map(|pid| reading.sensors.get(*pid)).collect();

        for column in &series {
            if i + 1 >= window {
                row.extend(window_stats(&column[i + 1 - window..=i]));
            } else {
                row.extend([None; 3]);
            }
        }

        let ts = reading.timestamp;
        row.push(Some(ts.hour() as f64));
        row.push(Some(ts.weekday().num_days_from_monday() as f64));
        row.push(Some(ts.month() as f64));
        row.push(reading.sensors.distance_since_dtc_clear);

        raw.push(row);
    }

    fill_missing(raw)
}

/// Forward-fill each column, then zero whatever is still missing
fn fill_missing(raw: Vec<Vec<Option<f64>>>) -> Vec<Vec<f64>> {
    let mut last = vec![None; FEATURE_NAMES.len()];
    raw.into_iter()
        .map(|row| {
            row.into_iter()
                .enumerate()
                .map(|(col, value)| {
                    if value.is_some() {
                        last[col] = value;
                    }
                    last[col].unwrap_or(0.0)
                })
                .collect()
        })
        .collect()
}

/// Per-row ground truth for `kind`, from the filled distance column
pub fn labels(features: &[Vec<f64>], kind: MaintenanceKind) -> Vec<bool> {
    features
        .iter()
        .map(|row| kind.needs_maintenance(row[DISTANCE_COLUMN]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::parse_timestamp;
    use crate::obd::SensorValues;

    fn reading(ts: &str, rpm: Option<f64>, distance: Option<f64>) -> Reading {
        Reading {
            id: None,
            timestamp: parse_timestamp(ts).unwrap(),
            vehicle_id: "v".into(),
            sensors: SensorValues {
                rpm,
                speed: Some(50.0),
                engine_load: Some(20.0),
                distance_since_dtc_clear: distance,
                ..SensorValues::default()
            },
            raw_data: None,
        }
    }

    #[test]
    fn test_shape_and_calendar_columns() {
        // 2024-03-06 is a Wednesday
        let rows = build_features(&[reading("2024-03-06T14:30:00Z", Some(800.0), Some(12.0))], 720);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].len(), FEATURE_NAMES.len());
        assert_eq!(rows[0][0], 800.0);
        assert_eq!(rows[0][20], 14.0);
        assert_eq!(rows[0][21], 2.0);
        assert_eq!(rows[0][22], 3.0);
        assert_eq!(rows[0][DISTANCE_COLUMN], 12.0);
        // window never filled
        assert_eq!(rows[0][11], 0.0);
    }

    #[test]
    fn test_rolling_window() {
        let readings = vec![
            reading("2024-01-01T00:00:00Z", Some(1000.0), Some(1.0)),
            reading("2024-01-01T00:00:05Z", Some(2000.0), Some(2.0)),
            reading("2024-01-01T00:00:10Z", Some(3000.0), Some(3.0)),
            reading("2024-01-01T00:00:15Z", None, Some(4.0)),
            reading("2024-01-01T00:00:20Z", Some(5000.0), Some(5.0)),
        ];
        let rows = build_features(&readings, 3);

        // rpm_mean/std/max
        assert_eq!(&rows[1][11..14], &[0.0, 0.0, 0.0]);
        assert_eq!(rows[2][11], 2000.0);
        assert!((rows[2][12] - 1000.0).abs() < 1e-9);
        assert_eq!(rows[2][13], 3000.0);

        // a gap in the window carries the previous value forward
        assert_eq!(rows[3][11], 2000.0);
        assert_eq!(rows[4][11], 2000.0);
        assert_eq!(rows[3][0], 3000.0);
    }

    #[test]
    fn test_forward_fill_then_zero() {
        let readings = vec![
            reading("2024-01-01T00:00:00Z", None, None),
            reading("2024-01-01T00:00:05Z", Some(900.0), Some(5050.0)),
            reading("2024-01-01T00:00:10Z", None, None),
        ];
        let rows = build_features(&readings, 720);
        assert_eq!(rows[0][0], 0.0);
        assert_eq!(rows[2][0], 900.0);
        assert_eq!(rows[2][DISTANCE_COLUMN], 5050.0);

        let oil = labels(&rows, MaintenanceKind::OilChange);
        assert_eq!(oil, vec![true, true, true]);
    }
}
