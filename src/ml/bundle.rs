// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/smartobd-rs

//! Versioned JSON model artifacts.
//!
//! Each maintenance kind is stored as `<kind>_model.json` plus
//! `<kind>_scaler.json`. A kind counts as trained only when both files load
//! and agree on format version and feature layout.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::features::FEATURE_NAMES;
use super::{IsolationForest, MaintenanceKind, ModelError, RandomForest, StandardScaler};

pub const FORMAT_VERSION: u32 = 1;

const ANOMALY_FILE: &str = "anomaly_model.json";

/// Trained classifier with its training metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelBundle {
    pub format_version: u32,
    pub kind: MaintenanceKind,
    pub trained_at: DateTime<Utc>,
    pub accuracy: f64,
    pub train_rows: usize,
    pub test_rows: usize,
    pub feature_names: Vec<String>,
    pub forest: RandomForest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalerArtifact {
    pub format_version: u32,
    pub kind: MaintenanceKind,
    pub scaler: StandardScaler,
}

/// Isolation forest plus the scaler its input was fitted with
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyArtifact {
    pub format_version: u32,
    pub trained_at: DateTime<Utc>,
    pub scaler: StandardScaler,
    pub forest: IsolationForest,
}

pub fn model_path(dir: &Path, kind: MaintenanceKind) -> PathBuf {
    dir.join(format!("{}_model.json", kind))
}

pub fn scaler_path(dir: &Path, kind: MaintenanceKind) -> PathBuf {
    dir.join(format!("{}_scaler.json", kind))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), ModelError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    // atomic replace
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec(value)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, ModelError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn artifact_error(path: &Path, reason: impl Into<String>) -> ModelError {
    ModelError::Artifact {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

/// Persist a classifier/scaler pair
pub fn save_pair(dir: &Path, bundle: &ModelBundle, scaler: &StandardScaler) -> Result<(), ModelError> {
    write_json(
        &scaler_path(dir, bundle.kind),
        &ScalerArtifact {
            format_version: FORMAT_VERSION,
            kind: bundle.kind,
            scaler: scaler.clone(),
        },
    )?;
    write_json(&model_path(dir, bundle.kind), bundle)?;
    debug!("Saved {} model to {:?}", bundle.kind, dir);
    Ok(())
}

/// Load a classifier/scaler pair. `Ok(None)` when neither file exists.
pub fn load_pair(dir: &Path, kind: MaintenanceKind) -> Result<Option<(ModelBundle, StandardScaler)>, ModelError> {
    let model_file = model_path(dir, kind);
    let scaler_file = scaler_path(dir, kind);

    let model: Option<ModelBundle> = read_json(&model_file)?;
    let scaler: Option<ScalerArtifact> = read_json(&scaler_file)?;

    let (model, scaler) = match (model, scaler) {
        (None, None) => return Ok(None),
        (Some(_), None) => return Err(artifact_error(&scaler_file, "scaler missing for stored model")),
        (None, Some(_)) => return Err(artifact_error(&model_file, "model missing for stored scaler")),
        (Some(m), Some(s)) => (m, s),
    };

    if model.format_version != FORMAT_VERSION || scaler.format_version != FORMAT_VERSION {
        return Err(artifact_error(
            &model_file,
            format!("unsupported format version {}", model.format_version),
        ));
    }
    if model.kind != kind || scaler.kind != kind {
        return Err(artifact_error(&model_file, "artifact belongs to another maintenance kind"));
    }
    if model.feature_names != FEATURE_NAMES
        || model.forest.n_features() != FEATURE_NAMES.len()
        || scaler.scaler.width() != FEATURE_NAMES.len()
    {
        return Err(artifact_error(&model_file, "feature layout differs from this build"));
    }

    Ok(Some((model, scaler.scaler)))
}

pub fn save_anomaly(dir: &Path, artifact: &AnomalyArtifact) -> Result<(), ModelError> {
    write_json(&dir.join(ANOMALY_FILE), artifact)
}

pub fn load_anomaly(dir: &Path) -> Option<AnomalyArtifact> {
    let path = dir.join(ANOMALY_FILE);
    match read_json::<AnomalyArtifact>(&path) {
        Ok(Some(a)) if a.format_version == FORMAT_VERSION && a.scaler.width() == FEATURE_NAMES.len() => Some(a),
        Ok(Some(_)) => {
            warn!("Ignoring incompatible anomaly model at {:?}", path);
            None
        }
        Ok(None) => None,
        Err(e) => {
            warn!("Could not load anomaly model: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::ForestParams;

    fn pair(kind: MaintenanceKind) -> (ModelBundle, StandardScaler) {
        let x: Vec<Vec<f64>> = (0..20)
            .map(|i| (0..FEATURE_NAMES.len()).map(|j| (i * j) as f64).collect())
            .collect();
        let y: Vec<bool> = (0..20).map(|i| i % 2 == 0).collect();
        let forest = RandomForest::fit(
            &x,
            &y,
            ForestParams {
                n_estimators: 3,
                ..ForestParams::default()
            },
        )
        .unwrap();
        let bundle = ModelBundle {
            format_version: FORMAT_VERSION,
            kind,
            trained_at: Utc::now(),
            accuracy: 0.9,
            train_rows: 16,
            test_rows: 4,
            feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
            forest,
        };
        (bundle, StandardScaler::fit(&x).unwrap())
    }

    #[test]
    fn test_save_and_load_pair() {
        let dir = tempfile::tempdir().unwrap();
        let (bundle, scaler) = pair(MaintenanceKind::OilChange);
        save_pair(dir.path(), &bundle, &scaler).unwrap();

        assert!(dir.path().join("oil_change_model.json").exists());
        assert!(dir.path().join("oil_change_scaler.json").exists());

        let (loaded, loaded_scaler) = load_pair(dir.path(), MaintenanceKind::OilChange).unwrap().unwrap();
        assert_eq!(loaded.accuracy, 0.9);
        assert_eq!(loaded_scaler.width(), scaler.width());
        for (a, b) in loaded_scaler.scale.iter().zip(&scaler.scale) {
            assert!((a - b).abs() < 1e-9);
        }
        assert!(load_pair(dir.path(), MaintenanceKind::BrakeCheck).unwrap().is_none());
    }

    #[test]
    fn test_partial_pair_is_untrained() {
        let dir = tempfile::tempdir().unwrap();
        let (bundle, scaler) = pair(MaintenanceKind::AirFilter);
        save_pair(dir.path(), &bundle, &scaler).unwrap();
        fs::remove_file(scaler_path(dir.path(), MaintenanceKind::AirFilter)).unwrap();

        assert!(matches!(
            load_pair(dir.path(), MaintenanceKind::AirFilter),
            Err(ModelError::Artifact { .. })
        ));
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (mut bundle, scaler) = pair(MaintenanceKind::TireRotation);
        bundle.format_version = 99;
        save_pair(dir.path(), &bundle, &scaler).unwrap();
        assert!(load_pair(dir.path(), MaintenanceKind::TireRotation).is_err());
    }
}
