// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/smartobd-rs

//! Maintenance predictor - training, scoring and alert creation

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::bundle::{self, AnomalyArtifact, ModelBundle, FORMAT_VERSION};
use super::features::{build_features, labels, FEATURE_NAMES};
use super::{ForestParams, IsolationForest, MaintenanceKind, ModelError, RandomForest, StandardScaler};
use crate::config::MlSettings;
use crate::db::{title_case, Database, NewAlert, Reading, Severity};

const SPLIT_SEED: u64 = 42;
const TEST_FRACTION: f64 = 0.2;

/// Outcome for one maintenance kind
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub maintenance_type: MaintenanceKind,
    pub needs_maintenance: bool,
    pub confidence: f64,
    pub probabilities: [f64; 2],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyScore {
    pub score: f64,
    pub threshold: f64,
    pub is_anomaly: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PredictionReport {
    pub generated_at: Option<DateTime<Utc>>,
    pub vehicle_id: Option<String>,
    pub rows_used: usize,
    /// Predictions that cleared the confidence threshold
    pub predictions: Vec<Prediction>,
    pub alert_ids: Vec<i64>,
    pub anomaly: Option<AnomalyScore>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingReport {
    pub rows: usize,
    /// Kind -> test accuracy
    pub trained: BTreeMap<String, f64>,
    /// Kind -> reason
    pub skipped: BTreeMap<String, String>,
    pub anomaly_trained: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelStatus {
    pub model_loaded: bool,
    pub last_training: Option<DateTime<Utc>>,
    pub accuracy: Option<f64>,
}

/// Gate a probability pair: `Some((positive, confidence))` when the top
/// class probability reaches `threshold`
pub fn evaluate_probabilities(probabilities: [f64; 2], threshold: f64) -> Option<(bool, f64)> {
    let [no, yes] = probabilities;
    let (positive, confidence) = if yes > no { (true, yes) } else { (false, no) };
    (confidence >= threshold).then_some((positive, confidence))
}

struct LoadedModel {
    bundle: ModelBundle,
    scaler: StandardScaler,
}

pub struct Predictor {
    settings: MlSettings,
    db: Arc<Database>,
    models: HashMap<MaintenanceKind, LoadedModel>,
    anomaly: Option<AnomalyArtifact>,
    last_prediction: Option<DateTime<Utc>>,
}

impl Predictor {
    /// Create a predictor and load whatever models exist on disk
    pub fn new(settings: MlSettings, db: Arc<Database>) -> Self {
        let mut predictor = Self {
            settings,
            db,
            models: HashMap::new(),
            anomaly: None,
            last_prediction: None,
        };
        predictor.load_models();
        predictor
    }

    pub fn model_dir(&self) -> &Path {
        &self.settings.model_path
    }

    /// (Re)load every stored pair. Returns the number of kinds loaded.
    pub fn load_models(&mut self) -> usize {
        self.models.clear();

        for kind in MaintenanceKind::ALL {
            match bundle::load_pair(&self.settings.model_path, kind) {
                Ok(Some((bundle, scaler))) => {
                    info!("Loaded {} model (accuracy {:.3})", kind, bundle.accuracy);
                    self.models.insert(kind, LoadedModel { bundle, scaler });
                }
                Ok(None) => debug!("No stored model for {}", kind),
                Err(e) => warn!("Treating {} as untrained: {}", kind, e),
            }
        }
        self.anomaly = bundle::load_anomaly(&self.settings.model_path);

        self.models.len()
    }

    pub fn is_trained(&self, kind: MaintenanceKind) -> bool {
        self.models.contains_key(&kind)
    }

    pub fn last_prediction(&self) -> Option<DateTime<Utc>> {
        self.last_prediction
    }

    fn forest_params(&self) -> ForestParams {
        ForestParams {
            n_estimators: self.settings.n_estimators,
            max_depth: self.settings.max_depth,
            min_samples_split: 2,
            seed: SPLIT_SEED,
        }
    }

    /// Most recent `limit` readings, oldest first
    fn recent_ascending(&self, limit: usize, vehicle_id: Option<&str>) -> Result<Vec<Reading>, ModelError> {
        let mut readings = self.db.recent_readings(limit, vehicle_id)?;
        readings.reverse();
        Ok(readings)
    }

    /// Train one classifier per maintenance kind plus the anomaly model
    pub fn train_models(&mut self, vehicle_id: Option<&str>) -> Result<TrainingReport, ModelError> {
        info!("Training maintenance models...");
        let readings = self.recent_ascending(self.settings.training_limit, vehicle_id)?;
        let mut report = TrainingReport {
            rows: readings.len(),
            ..TrainingReport::default()
        };

        if readings.len() < self.settings.min_training_rows {
            let reason = ModelError::InsufficientData {
                rows: readings.len(),
                required: self.settings.min_training_rows,
            }
            .to_string();
            warn!("Insufficient training data: {}", reason);
            for kind in MaintenanceKind::ALL {
                report.skipped.insert(kind.to_string(), reason.clone());
            }
            return Ok(report);
        }

        let features = build_features(&readings, self.settings.rolling_window);
        let (train_idx, test_idx) = split_indices(features.len());

        for kind in MaintenanceKind::ALL {
            match self.train_kind(kind, &features, &train_idx, &test_idx) {
                Ok(accuracy) => {
                    report.trained.insert(kind.to_string(), accuracy);
                }
                Err(e) => {
                    error!("Error training model for {}: {}", kind, e);
                    report.skipped.insert(kind.to_string(), e.to_string());
                }
            }
        }

        match self.train_anomaly(&features) {
            Ok(()) => report.anomaly_trained = true,
            Err(e) => error!("Error training anomaly model: {}", e),
        }

        info!(
            "Model training completed: {} trained, {} skipped",
            report.trained.len(),
            report.skipped.len()
        );
        Ok(report)
    }

    fn train_kind(
        &mut self,
        kind: MaintenanceKind,
        features: &[Vec<f64>],
        train_idx: &[usize],
        test_idx: &[usize],
    ) -> Result<f64, ModelError> {
        let y = labels(features, kind);
        let pick = |idx: &[usize]| -> (Vec<Vec<f64>>, Vec<bool>) {
            (idx.iter().map(|&i| features[i].clone()).collect(), idx.iter().map(|&i| y[i]).collect())
        };
        let (x_train, y_train) = pick(train_idx);
        let (x_test, y_test) = pick(test_idx);

        let scaler = StandardScaler::fit(&x_train)?;
        let forest = RandomForest::fit(&scaler.transform(&x_train)?, &y_train, self.forest_params())?;
        let accuracy = forest.accuracy(&scaler.transform(&x_test)?, &y_test)?;
        info!("Model for {} - Accuracy: {:.3}", kind, accuracy);

        let bundle = ModelBundle {
            format_version: FORMAT_VERSION,
            kind,
            trained_at: Utc::now(),
            accuracy,
            train_rows: x_train.len(),
            test_rows: x_test.len(),
            feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
            forest,
        };
        bundle::save_pair(&self.settings.model_path, &bundle, &scaler)?;
        self.models.insert(kind, LoadedModel { bundle, scaler });
        Ok(accuracy)
    }

    fn train_anomaly(&mut self, features: &[Vec<f64>]) -> Result<(), ModelError> {
        let scaler = StandardScaler::fit(features)?;
        let forest = IsolationForest::fit(
            &scaler.transform(features)?,
            IsolationForest::DEFAULT_TREES,
            IsolationForest::DEFAULT_SAMPLE,
            IsolationForest::DEFAULT_CONTAMINATION,
            SPLIT_SEED,
        )?;
        let artifact = AnomalyArtifact {
            format_version: FORMAT_VERSION,
            trained_at: Utc::now(),
            scaler,
            forest,
        };
        bundle::save_anomaly(&self.settings.model_path, &artifact)?;
        self.anomaly = Some(artifact);
        Ok(())
    }

    /// Score the latest reading with every trained model and persist an
    /// alert for each confident positive
    pub fn run_predictions(&mut self, vehicle_id: Option<&str>) -> Result<PredictionReport, ModelError> {
        debug!("Running maintenance predictions...");
        let readings = self.recent_ascending(self.settings.prediction_limit, vehicle_id)?;
        let now = Utc::now();
        self.last_prediction = Some(now);

        let Some(latest) = readings.last() else {
            debug!("No recent data available for predictions");
            return Ok(PredictionReport {
                generated_at: Some(now),
                ..PredictionReport::default()
            });
        };

        let features = build_features(&readings, self.settings.rolling_window);
        let Some(row) = features.last() else {
            return Ok(PredictionReport::default());
        };

        let mut report = PredictionReport {
            generated_at: Some(now),
            vehicle_id: Some(latest.vehicle_id.clone()),
            rows_used: readings.len(),
            ..PredictionReport::default()
        };

        for kind in MaintenanceKind::ALL {
            let Some(model) = self.models.get(&kind) else {
                continue;
            };
            let probabilities = model.bundle.forest.predict_proba(&model.scaler.transform_row(row)?)?;

            let Some((positive, confidence)) = evaluate_probabilities(probabilities, self.settings.confidence_threshold)
            else {
                debug!("{} below confidence threshold ({:?})", kind, probabilities);
                continue;
            };

            if positive {
                let id = self.db.save_alert(&NewAlert {
                    vehicle_id: latest.vehicle_id.clone(),
                    alert_type: kind.to_string(),
                    severity: Severity::Medium,
                    message: format!("{} maintenance needed", title_case(kind.as_str())),
                    predicted_date: Some(now),
                    confidence,
                })?;
                report.alert_ids.push(id);
            }

            report.predictions.push(Prediction {
                maintenance_type: kind,
                needs_maintenance: positive,
                confidence,
                probabilities,
            });
        }

        if let Some(anomaly) = &self.anomaly {
            let scaled = anomaly.scaler.transform_row(row)?;
            let score = anomaly.forest.score(&scaled)?;
            let is_anomaly = score > anomaly.forest.threshold();
            if is_anomaly {
                warn!("Latest reading for {} looks anomalous (score {:.3})", latest.vehicle_id, score);
            }
            report.anomaly = Some(AnomalyScore {
                score,
                threshold: anomaly.forest.threshold(),
                is_anomaly,
            });
        }

        debug!(
            "Completed predictions: {} maintenance types, {} alerts",
            report.predictions.len(),
            report.alert_ids.len()
        );
        Ok(report)
    }

    /// Model state per maintenance kind
    pub fn get_predictions(&self) -> BTreeMap<String, ModelStatus> {
        MaintenanceKind::ALL
            .into_iter()
            .map(|kind| {
                let model = self.models.get(&kind);
                (
                    kind.to_string(),
                    ModelStatus {
                        model_loaded: model.is_some(),
                        last_training: model.map(|m| m.bundle.trained_at),
                        accuracy: model.map(|m| m.bundle.accuracy),
                    },
                )
            })
            .collect()
    }
}

/// Shuffled 80/20 split with a fixed seed
fn split_indices(n: usize) -> (Vec<usize>, Vec<usize>) {
    let mut idx: Vec<usize> = (0..n).collect();
    idx.shuffle(&mut ChaCha8Rng::seed_from_u64(SPLIT_SEED));
    let n_test = ((n as f64 * TEST_FRACTION).ceil() as usize).min(n.saturating_sub(1));
    let train = idx.split_off(n_test);
    (train, idx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::parse_timestamp;
    use crate::obd::SensorValues;
    use chrono::Duration;

    fn settings(dir: &Path) -> MlSettings {
        MlSettings {
            model_path: dir.to_path_buf(),
            n_estimators: 20,
            confidence_threshold: 0.6,
            ..MlSettings::default()
        }
    }

    /// Distances cover 4800..5300 once each in scrambled order, all within
    /// one hour, followed by a final reading at 5050 km
    fn seed_readings(db: &Database, count: usize) {
        let base = parse_timestamp("2024-05-06T10:00:00Z").unwrap();
        let reading = |i: usize, distance: f64| Reading {
            id: None,
            timestamp: base + Duration::seconds(i as i64),
            vehicle_id: "TESTVIN".into(),
            sensors: SensorValues {
                rpm: Some(2000.0),
                speed: Some(60.0),
                engine_load: Some(30.0),
                distance_since_dtc_clear: Some(distance),
                ..SensorValues::default()
            },
            raw_data: None,
        };

        let mut rows: Vec<Reading> = (0..count)
            .map(|i| reading(i, 4800.0 + ((i * 37) % 500) as f64))
            .collect();
        rows.push(reading(count, 5050.0));
        db.save_readings(&rows).unwrap();
    }

    #[test]
    fn test_confidence_gate() {
        assert_eq!(evaluate_probabilities([0.1, 0.9], 0.8), Some((true, 0.9)));
        assert_eq!(evaluate_probabilities([0.85, 0.15], 0.8), Some((false, 0.85)));
        assert_eq!(evaluate_probabilities([0.3, 0.7], 0.8), None);
        assert_eq!(evaluate_probabilities([0.2, 0.8], 0.8), Some((true, 0.8)));
    }

    #[test]
    fn test_split_is_80_20() {
        let (train, test) = split_indices(100);
        assert_eq!(train.len(), 80);
        assert_eq!(test.len(), 20);
        assert_eq!(split_indices(100), (train, test));
    }

    #[test]
    fn test_insufficient_data_skips_every_kind() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::open_in_memory().unwrap());
        seed_readings(&db, 50);

        let mut predictor = Predictor::new(settings(dir.path()), db);
        let report = predictor.train_models(None).unwrap();
        assert!(report.trained.is_empty());
        assert_eq!(report.skipped.len(), 4);
        assert!(!predictor.is_trained(MaintenanceKind::OilChange));

        let predictions = predictor.run_predictions(None).unwrap();
        assert!(predictions.predictions.is_empty());
        assert!(predictions.alert_ids.is_empty());
    }

    #[test]
    fn test_train_predict_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::open_in_memory().unwrap());
        seed_readings(&db, 500);

        let mut predictor = Predictor::new(settings(dir.path()), db.clone());
        let status = predictor.get_predictions();
        assert!(!status["oil_change"].model_loaded);

        let report = predictor.train_models(Some("TESTVIN")).unwrap();
        assert_eq!(report.rows, 501);
        assert_eq!(report.trained.len(), 4);
        assert!(report.anomaly_trained);
        assert!(report.trained["oil_change"] > 0.9);

        let result = predictor.run_predictions(None).unwrap();
        assert_eq!(result.vehicle_id.as_deref(), Some("TESTVIN"));
        assert_eq!(result.alert_ids.len(), 1);
        assert!(result.anomaly.is_some());

        let alerts = db.alerts(None, Some(false)).unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, "oil_change");
        assert_eq!(alerts[0].message, "Oil Change maintenance needed");
        assert_eq!(alerts[0].severity, Severity::Medium);
        assert!(alerts[0].confidence >= 0.6);

        let reloaded = Predictor::new(settings(dir.path()), db);
        let status = reloaded.get_predictions();
        assert!(status.values().all(|s| s.model_loaded && s.accuracy.is_some()));
    }

    #[test]
    fn test_no_readings_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::open_in_memory().unwrap());
        let mut predictor = Predictor::new(settings(dir.path()), db);
        let report = predictor.run_predictions(None).unwrap();
        assert_eq!(report.rows_used, 0);
        assert!(predictor.last_prediction().is_some());
    }
}
