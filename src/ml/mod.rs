// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/smartobd-rs

//! Predictive maintenance models.
//!
//! Readings become a 24-column feature matrix ([`features`]); each
//! maintenance kind gets a standardiser plus a random forest classifier
//! persisted as a pair of versioned JSON artifacts ([`bundle`]). An isolation
//! forest trained on the same matrix flags unusual driving rows.

pub mod bundle;
pub mod features;
pub mod forest;
pub mod isolation;
pub mod predictor;
pub mod scaler;

pub use bundle::{AnomalyArtifact, ModelBundle, ScalerArtifact, FORMAT_VERSION};
pub use features::{build_features, labels, FEATURE_NAMES};
pub use forest::{ForestParams, RandomForest};
pub use isolation::IsolationForest;
pub use predictor::{
    evaluate_probabilities, AnomalyScore, ModelStatus, Prediction, PredictionReport, Predictor, TrainingReport,
};
pub use scaler::StandardScaler;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::db::StorageError;

/// Distance window after each service interval that counts as "due"
pub const LABEL_WINDOW_KM: f64 = 100.0;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("not enough training rows: {rows} < {required}")]
    InsufficientData { rows: usize, required: usize },

    #[error("feature width mismatch: expected {expected}, got {got}")]
    Dimension { expected: usize, got: usize },

    #[error("artifact {path:?}: {reason}")]
    Artifact { path: PathBuf, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Closed set of predicted maintenance kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaintenanceKind {
    OilChange,
    TireRotation,
    BrakeCheck,
    AirFilter,
}

impl MaintenanceKind {
    pub const ALL: [MaintenanceKind; 4] = [
        MaintenanceKind::OilChange,
        MaintenanceKind::TireRotation,
        MaintenanceKind::BrakeCheck,
        MaintenanceKind::AirFilter,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::OilChange => "oil_change",
            Self::TireRotation => "tire_rotation",
            Self::BrakeCheck => "brake_check",
            Self::AirFilter => "air_filter",
        }
    }

    /// Service interval in km
    pub fn interval_km(self) -> f64 {
        match self {
            Self::OilChange => 5000.0,
            Self::TireRotation => 7500.0,
            Self::BrakeCheck => 15000.0,
            Self::AirFilter => 30000.0,
        }
    }

    /// Synthetic ground truth: due for the first 100 km after each
    /// multiple of the interval. Placeholder until real service history is
    /// available.
    pub fn needs_maintenance(self, distance_km: f64) -> bool {
        distance_km.rem_euclid(self.interval_km()) < LABEL_WINDOW_KM
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == name)
    }
}

impl std::fmt::Display for MaintenanceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_rule() {
        let oil = MaintenanceKind::OilChange;
        assert!(!oil.needs_maintenance(4950.0));
        assert!(oil.needs_maintenance(5050.0));
        assert!(oil.needs_maintenance(0.0));
        assert!(!oil.needs_maintenance(5100.0));

        assert!(MaintenanceKind::TireRotation.needs_maintenance(15020.0));
        assert!(!MaintenanceKind::AirFilter.needs_maintenance(15020.0));
    }

    #[test]
    fn test_kind_names() {
        for kind in MaintenanceKind::ALL {
            assert_eq!(MaintenanceKind::from_name(kind.as_str()), Some(kind));
        }
        assert_eq!(MaintenanceKind::from_name("wipers"), None);
    }
}
