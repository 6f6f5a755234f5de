// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/smartobd-rs

//! Isolation Forest over feature rows

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use super::ModelError;

/// Average path length of an unsuccessful BST search over `n` points
fn expected_path_length(n: usize) -> f64 {
    if n <= 1 {
        return 0.0;
    }
    let n = n as f64;
    2.0 * (n.ln() + 0.5772156649) - 2.0 * (n - 1.0) / n
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IsolationNode {
    feature: usize,
    split_value: f64,
    left: Option<Box<IsolationNode>>,
    right: Option<Box<IsolationNode>>,
    size: usize,
}

/// Isolation Tree for Isolation Forest
#[derive(Debug, Clone, Serialize, Deserialize)]
struct IsolationTree {
    root: Option<Box<IsolationNode>>,
}

impl IsolationTree {
    fn build(data: &[&[f64]], max_depth: usize, rng: &mut ChaCha8Rng) -> Self {
        Self {
            root: Self::build_node(data, 0, max_depth, rng),
        }
    }

    fn build_node(data: &[&[f64]], depth: usize, max_depth: usize, rng: &mut ChaCha8Rng) -> Option<Box<IsolationNode>> {
        if data.is_empty() {
            return None;
        }

        let leaf = |size: usize| {
            Some(Box::new(IsolationNode {
                feature: 0,
                split_value: 0.0,
                left: None,
                right: None,
                size,
            }))
        };
        if data.len() == 1 || depth >= max_depth {
            return leaf(data.len());
        }

        // pick a feature that is not constant in this partition
        let width = data[0].len();
        let mut features: Vec<usize> = (0..width).collect();
        features.shuffle(rng);

        for feature in features {
            let min = data.iter().map(|row| row[feature]).fold(f64::MAX, f64::min);
            let max = data.iter().map(|row| row[feature]).fold(f64::MIN, f64::max);
            if (max - min).abs() < 1e-10 {
                continue;
            }

            let split_value = rng.gen_range(min..max);
            let (left_data, right_data): (Vec<&[f64]>, Vec<&[f64]>) =
                data.iter().copied().partition(|row| row[feature] < split_value);

            return Some(Box::new(IsolationNode {
                feature,
                split_value,
                left: Self::build_node(&left_data, depth + 1, max_depth, rng),
                right: Self::build_node(&right_data, depth + 1, max_depth, rng),
                size: data.len(),
            }));
        }

        leaf(data.len())
    }

    fn path_length(&self, row: &[f64]) -> f64 {
        let mut node = self.root.as_deref();
        let mut depth = 0.0;
        while let Some(n) = node {
            if n.left.is_none() && n.right.is_none() {
                return depth + expected_path_length(n.size);
            }
            node = if row[n.feature] < n.split_value {
                n.left.as_deref()
            } else {
                n.right.as_deref()
            };
            depth += 1.0;
        }
        depth
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationForest {
    trees: Vec<IsolationTree>,
    sample_size: usize,
    width: usize,
    /// Scores above this are anomalous
    threshold: f64,
}

impl IsolationForest {
    pub const DEFAULT_TREES: usize = 100;
    pub const DEFAULT_SAMPLE: usize = 256;
    pub const DEFAULT_CONTAMINATION: f64 = 0.1;

    /// Fit on `rows`; the threshold is placed so that roughly
    /// `contamination` of the training rows score as anomalies
    pub fn fit(
        rows: &[Vec<f64>],
        n_trees: usize,
        sample_size: usize,
        contamination: f64,
        seed: u64,
    ) -> Result<Self, ModelError> {
        let Some(first) = rows.first() else {
            return Err(ModelError::InsufficientData { rows: 0, required: 2 });
        };
        let width = first.len();
        let sample_size = sample_size.min(rows.len()).max(1);
        let max_depth = (sample_size as f64).log2().ceil() as usize;

        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let trees = (0..n_trees.max(1))
            .map(|_| {
                let sample: Vec<&[f64]> = rows
                    .choose_multiple(&mut rng, sample_size)
                    .map(|row| row.as_slice())
                    .collect();
                IsolationTree::build(&sample, max_depth, &mut rng)
            })
            .collect();

        let mut forest = Self {
            trees,
            sample_size,
            width,
            threshold: f64::INFINITY,
        };

        let mut scores = rows
            .iter()
            .map(|row| forest.score(row))
            .collect::<Result<Vec<f64>, _>>()?;
        scores.sort_by(|a, b| b.total_cmp(a));
        let cut = ((rows.len() as f64 * contamination.clamp(0.0, 1.0)).ceil() as usize).min(rows.len());
        forest.threshold = if cut == 0 { f64::INFINITY } else { scores[cut - 1] - 1e-12 };

        Ok(forest)
    }

    /// Anomaly score in (0, 1): `2^(-avg_depth / c(sample_size))`
    pub fn score(&self, row: &[f64]) -> Result<f64, ModelError> {
        if row.len() != self.width {
            return Err(ModelError::Dimension {
                expected: self.width,
                got: row.len(),
            });
        }
        let avg_depth = self.trees.iter().map(|t| t.path_length(row)).sum::<f64>() / self.trees.len().max(1) as f64;
        let c = expected_path_length(self.sample_size).max(f64::EPSILON);
        Ok(2.0_f64.powf(-avg_depth / c))
    }

    pub fn is_anomaly(&self, row: &[f64]) -> Result<bool, ModelError> {
        Ok(self.score(row)? > self.threshold)
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_distr::{Distribution, Normal};

    fn cluster() -> Vec<Vec<f64>> {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let normal = Normal::new(0.0, 1.0).unwrap();
        (0..400)
            .map(|_| vec![normal.sample(&mut rng), normal.sample(&mut rng)])
            .collect()
    }

    #[test]
    fn test_outlier_scores_higher() {
        let rows = cluster();
        let forest = IsolationForest::fit(&rows, 100, 256, 0.1, 42).unwrap();

        let inlier = forest.score(&[0.0, 0.0]).unwrap();
        let outlier = forest.score(&[8.0, -8.0]).unwrap();
        assert!(outlier > inlier);
        assert!(forest.is_anomaly(&[8.0, -8.0]).unwrap());
        assert!(!forest.is_anomaly(&[0.0, 0.0]).unwrap());
    }

    #[test]
    fn test_contamination_fraction() {
        let rows = cluster();
        let forest = IsolationForest::fit(&rows, 50, 128, 0.1, 7).unwrap();
        let flagged = rows.iter().filter(|r| forest.is_anomaly(r).unwrap()).count();
        assert!(flagged >= 40 && flagged <= 80, "flagged {}", flagged);
    }

    #[test]
    fn test_expected_path_length() {
        assert_eq!(expected_path_length(1), 0.0);
        assert!((expected_path_length(2) - 1.5407257).abs() < 1e-6);
    }
}
