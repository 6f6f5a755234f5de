// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/smartobd-rs

//! Random forest binary classifier (CART trees, gini impurity, bootstrap
//! samples, sqrt(n_features) candidates per split)

use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::ModelError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: 24,
            min_samples_split: 2,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
enum Node {
    Leaf {
        /// Fraction of positive samples
        positive: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DecisionTree {
    nodes: Vec<Node>,
}

struct TreeBuilder<'a> {
    x: &'a [Vec<f64>],
    y: &'a [bool],
    params: &'a ForestParams,
    max_features: usize,
    nodes: Vec<Node>,
    importances: Vec<f64>,
    rng: ChaCha8Rng,
}

fn gini(positive: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let p = positive as f64 / total as f64;
    2.0 * p * (1.0 - p)
}

impl<'a> TreeBuilder<'a> {
    fn build(&mut self, idx: &mut [usize], depth: usize) -> usize {
        let total = idx.len();
        let positive = idx.iter().filter(|&&i| self.y[i]).count();
        let impurity = gini(positive, total);

        let leaf = Node::Leaf {
            positive: positive as f64 / total.max(1) as f64,
        };
        if depth >= self.params.max_depth
            || total < self.params.min_samples_split
            || positive == 0
            || positive == total
        {
            self.nodes.push(leaf);
            return self.nodes.len() - 1;
        }

        let Some((feature, threshold, child_impurity)) = self.best_split(idx, impurity) else {
            self.nodes.push(leaf);
            return self.nodes.len() - 1;
        };

        self.importances[feature] += total as f64 * (impurity - child_impurity);

        let id = self.nodes.len();
        self.nodes.push(leaf);

        let mut split = 0;
        for i in 0..idx.len() {
            if self.x[idx[i]][feature] <= threshold {
                idx.swap(i, split);
                split += 1;
            }
        }
        let (left_idx, right_idx) = idx.split_at_mut(split);
        let left = self.build(left_idx, depth + 1);
        let right = self.build(right_idx, depth + 1);

        self.nodes[id] = Node::Split {
            feature,
            threshold,
            left,
            right,
        };
        id
    }

    /// Best (feature, threshold, weighted child impurity) among a random
    /// subset of `max_features` features
    fn best_split(&mut self, idx: &[usize], parent: f64) -> Option<(usize, f64, f64)> {
        let n_features = self.x[idx[0]].len();
        let order = sample(&mut self.rng, n_features, n_features);
        let total = idx.len();
        let total_positive = idx.iter().filter(|&&i| self.y[i]).count();

        let mut best: Option<(usize, f64, f64)> = None;
        let mut column: Vec<(f64, bool)> = Vec::with_capacity(total);

        // keep looking past max_features until some feature can split
        for (visited, feature) in order.iter().enumerate() {
            if visited >= self.max_features && best.is_some() {
                break;
            }
            column.clear();
            column.extend(idx.iter().map(|&i| (self.x[i][feature], self.y[i])));
            column.sort_by(|a, b| a.0.total_cmp(&b.0));

            let mut left_positive = 0;
            for k in 0..total - 1 {
                if column[k].1 {
                    left_positive += 1;
                }
                if column[k].0 == column[k + 1].0 {
                    continue;
                }
                let left_n = k + 1;
                let right_n = total - left_n;
                let weighted = (left_n as f64 * gini(left_positive, left_n)
                    + right_n as f64 * gini(total_positive - left_positive, right_n))
                    / total as f64;

                if weighted < parent - 1e-12 && best.map_or(true, |(_, _, b)| weighted < b) {
                    let threshold = (column[k].0 + column[k + 1].0) / 2.0;
                    best = Some((feature, threshold, weighted));
                }
            }
        }

        best
    }
}

impl DecisionTree {
    fn positive(&self, row: &[f64]) -> f64 {
        let mut id = 0;
        loop {
            match &self.nodes[id] {
                Node::Leaf { positive } => return *positive,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => id = if row[*feature] <= *threshold { *left } else { *right },
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    params: ForestParams,
    n_features: usize,
    trees: Vec<DecisionTree>,
    importances: Vec<f64>,
}

impl RandomForest {
    pub fn fit(x: &[Vec<f64>], y: &[bool], params: ForestParams) -> Result<Self, ModelError> {
        if x.is_empty() || x.len() != y.len() {
            return Err(ModelError::InsufficientData {
                rows: x.len().min(y.len()),
                required: 1,
            });
        }
        let n_features = x[0].len();
        if let Some(bad) = x.iter().find(|row| row.len() != n_features) {
            return Err(ModelError::Dimension {
                expected: n_features,
                got: bad.len(),
            });
        }

        let max_features = ((n_features as f64).sqrt() as usize).max(1);
        let n = x.len();

        let fitted: Vec<(DecisionTree, Vec<f64>)> = (0..params.n_estimators.max(1))
            .into_par_iter()
            .map(|i| {
                let mut rng = ChaCha8Rng::seed_from_u64(params.seed.wrapping_add(i as u64));
                let mut idx: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();

                let mut builder = TreeBuilder {
                    x,
                    y,
                    params: &params,
                    max_features,
                    nodes: Vec::new(),
                    importances: vec![0.0; n_features],
                    rng,
                };
                builder.build(&mut idx, 0);
                (DecisionTree { nodes: builder.nodes }, builder.importances)
            })
            .collect();

        let mut importances = vec![0.0; n_features];
        let mut trees = Vec::with_capacity(fitted.len());
        for (tree, imp) in fitted {
            let sum: f64 = imp.iter().sum();
            if sum > 0.0 {
                for (acc, v) in importances.iter_mut().zip(&imp) {
                    *acc += v / sum;
                }
            }
            trees.push(tree);
        }
        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            importances.iter_mut().for_each(|v| *v /= total);
        }

        Ok(Self {
            params,
            n_features,
            trees,
            importances,
        })
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn params(&self) -> &ForestParams {
        &self.params
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// `[P(no), P(yes)]`
    pub fn predict_proba(&self, row: &[f64]) -> Result<[f64; 2], ModelError> {
        if row.len() != self.n_features {
            return Err(ModelError::Dimension {
                expected: self.n_features,
                got: row.len(),
            });
        }
        let positive = self.trees.iter().map(|t| t.positive(row)).sum::<f64>() / self.trees.len().max(1) as f64;
        Ok([1.0 - positive, positive])
    }

    pub fn predict(&self, row: &[f64]) -> Result<bool, ModelError> {
        let [no, yes] = self.predict_proba(row)?;
        Ok(yes > no)
    }

    /// Fraction of rows classified correctly
    pub fn accuracy(&self, x: &[Vec<f64>], y: &[bool]) -> Result<f64, ModelError> {
        if x.is_empty() {
            return Ok(0.0);
        }
        let mut correct = 0;
        for (row, label) in x.iter().zip(y) {
            if self.predict(row)? == *label {
                correct += 1;
            }
        }
        Ok(correct as f64 / x.len() as f64)
    }

    /// Mean decrease in impurity per feature, summing to 1
    pub fn feature_importances(&self) -> &[f64] {
        &self.importances
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn band_data() -> (Vec<Vec<f64>>, Vec<bool>) {
        // label depends only on feature 1 lying in [40, 60)
        let mut x = Vec::new();
        let mut y = Vec::new();
        for i in 0..300 {
            let noise = ((i * 7919) % 97) as f64;
            let signal = ((i * 37) % 100) as f64;
            x.push(vec![noise, signal, 1.0]);
            y.push((40.0..60.0).contains(&signal));
        }
        (x, y)
    }

    fn params() -> ForestParams {
        ForestParams {
            n_estimators: 25,
            ..ForestParams::default()
        }
    }

    #[test]
    fn test_learns_band() {
        let (x, y) = band_data();
        let forest = RandomForest::fit(&x, &y, params()).unwrap();
        assert_eq!(forest.n_trees(), 25);
        assert!(forest.accuracy(&x, &y).unwrap() > 0.95);

        let inside = x.iter().find(|row| row[1] == 50.0).unwrap();
        let [no, yes] = forest.predict_proba(inside).unwrap();
        assert!(yes > 0.8);
        assert!((no + yes - 1.0).abs() < 1e-9);
        let outside = x.iter().find(|row| row[1] == 90.0).unwrap();
        assert!(!forest.predict(outside).unwrap());

        let imp = forest.feature_importances();
        assert!(imp[1] > imp[0]);
        assert_eq!(imp[2], 0.0);
    }

    #[test]
    fn test_deterministic_for_seed() {
        let (x, y) = band_data();
        let a = RandomForest::fit(&x, &y, params()).unwrap();
        let b = RandomForest::fit(&x, &y, params()).unwrap();
        for row in &x {
            assert_eq!(a.predict_proba(row).unwrap(), b.predict_proba(row).unwrap());
        }
    }

    #[test]
    fn test_single_class_is_certain() {
        let x = vec![vec![1.0], vec![2.0], vec![3.0]];
        let y = vec![false; 3];
        let forest = RandomForest::fit(&x, &y, params()).unwrap();
        assert_eq!(forest.predict_proba(&[2.5]).unwrap(), [1.0, 0.0]);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(RandomForest::fit(&[], &[], params()).is_err());
        let forest = RandomForest::fit(&[vec![1.0, 2.0]], &[true], params()).unwrap();
        assert!(matches!(
            forest.predict_proba(&[1.0]),
            Err(ModelError::Dimension { expected: 2, got: 1 })
        ));
    }
}
