use crate::models::tree::{RegressionTree, TreeParams};
use crate::models::{check_training_input, sigmoid, Classifier};
use anyhow::Result;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

fn clamped_log_odds(y: &[u8]) -> f64 {
    let mean = (y.iter().map(|&l| l as f64).sum::<f64>() / y.len() as f64).clamp(1e-6, 1.0 - 1e-6);
    (mean / (1.0 - mean)).ln()
}

fn log_loss(scores: &[f64], y: &[u8]) -> f64 {
    let mut loss = 0.0;
    for (&score, &label) in scores.iter().zip(y) {
        let p = sigmoid(score).clamp(1e-12, 1.0 - 1e-12);
        loss -= if label == 1 { p.ln() } else { (1.0 - p).ln() };
    }
    loss / y.len() as f64
}

/// One boosting round: fit a tree to the residuals, replace its leaves with
/// Newton-step values, and return it. `scores` is updated in place.
fn boost_round(
    x: &[Vec<f64>],
    y: &[u8],
    scores: &mut [f64],
    params: &TreeParams,
    learning_rate: f64,
    rng: &mut StdRng,
) -> RegressionTree {
    let probs: Vec<f64> = scores.iter().map(|&s| sigmoid(s)).collect();
    let residuals: Vec<f64> = y
        .iter()
        .zip(&probs)
        .map(|(&label, &p)| label as f64 - p)
        .collect();

    let rows: Vec<usize> = (0..x.len()).collect();
    let mut tree = RegressionTree::fit(x, &residuals, &rows, params, rng);

    // Newton step per leaf: sum(residual) / (sum(p * (1 - p)) + lambda),
    // with an L2 term of 1.0 keeping saturated leaves bounded.
    let mut leaf_stats: HashMap<usize, (f64, f64)> = HashMap::new();
    for (i, row) in x.iter().enumerate() {
        if let Some(leaf) = tree.leaf_for(row) {
            let entry = leaf_stats.entry(leaf).or_insert((0.0, 0.0));
            entry.0 += residuals[i];
            entry.1 += probs[i] * (1.0 - probs[i]);
        }
    }
    for (leaf, (numerator, denominator)) in leaf_stats {
        tree.set_leaf_value(leaf, numerator / (denominator + 1.0));
    }

    for (score, row) in scores.iter_mut().zip(x) {
        *score += learning_rate * tree.predict_row(row);
    }
    tree
}

/// Depth-wise gradient-boosted trees on logistic loss, fixed round count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientBoost {
    pub n_rounds: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    pub seed: u64,
    base_score: f64,
    trees: Vec<RegressionTree>,
}

impl GradientBoost {
    pub fn new(seed: u64) -> Self {
        Self {
            n_rounds: 100,
            learning_rate: 0.1,
            max_depth: 3,
            min_samples_leaf: 2,
            seed,
            base_score: 0.0,
            trees: Vec::new(),
        }
    }
}

impl Classifier for GradientBoost {
    fn fit(
        &mut self,
        x: &[Vec<f64>],
        y: &[u8],
        _val: Option<(&[Vec<f64>], &[u8])>,
    ) -> Result<()> {
        check_training_input(x, y)?;
        self.base_score = clamped_log_odds(y);
        self.trees.clear();

        let params = TreeParams {
            max_depth: self.max_depth,
            min_samples_leaf: self.min_samples_leaf,
            feature_subsample: None,
        };
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut scores = vec![self.base_score; x.len()];
        for _ in 0..self.n_rounds {
            let tree = boost_round(x, y, &mut scores, &params, self.learning_rate, &mut rng);
            self.trees.push(tree);
        }
        Ok(())
    }

    fn predict_proba(&self, x: &[Vec<f64>]) -> Vec<f64> {
        x.iter()
            .map(|row| {
                let score = self.base_score
                    + self.learning_rate
                        * self.trees.iter().map(|t| t.predict_row(row)).sum::<f64>();
                sigmoid(score)
            })
            .collect()
    }
}

/// Histogram-binned gradient boosting with early stopping against the
/// validation split (and only the validation split). Feature values are
/// quantized into at most `max_bins` per-feature bins before fitting; the
/// bin edges are part of the fitted state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistGradientBoost {
    pub max_rounds: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    pub max_bins: usize,
    pub early_stopping_rounds: usize,
    pub seed: u64,
    base_score: f64,
    bin_edges: Vec<Vec<f64>>,
    trees: Vec<RegressionTree>,
}

impl HistGradientBoost {
    pub fn new(seed: u64) -> Self {
        Self {
            max_rounds: 200,
            learning_rate: 0.1,
            max_depth: 4,
            min_samples_leaf: 2,
            max_bins: 64,
            early_stopping_rounds: 10,
            seed,
            base_score: 0.0,
            bin_edges: Vec::new(),
            trees: Vec::new(),
        }
    }

    fn compute_edges(&self, x: &[Vec<f64>], width: usize) -> Vec<Vec<f64>> {
        (0..width)
            .map(|j| {
                let mut values: Vec<f64> = x.iter().map(|row| row[j]).collect();
                values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
                values.dedup();
                if values.len() <= self.max_bins {
                    values.windows(2).map(|w| (w[0] + w[1]) / 2.0).collect()
                } else {
                    let mut edges: Vec<f64> = (1..self.max_bins)
                        .map(|q| values[q * values.len() / self.max_bins])
                        .collect();
                    edges.dedup();
                    edges
                }
            })
            .collect()
    }

    fn bin_row(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .enumerate()
            .map(|(j, v)| match self.bin_edges.get(j) {
                Some(edges) => edges.partition_point(|e| e <= v) as f64,
                None => 0.0,
            })
            .collect()
    }
}

impl Classifier for HistGradientBoost {
    fn fit(&mut self, x: &[Vec<f64>], y: &[u8], val: Option<(&[Vec<f64>], &[u8])>) -> Result<()> {
        let width = check_training_input(x, y)?;
        self.base_score = clamped_log_odds(y);
        self.trees.clear();
        self.bin_edges = self.compute_edges(x, width);

        let binned: Vec<Vec<f64>> = x.iter().map(|row| self.bin_row(row)).collect();
        let binned_val: Option<(Vec<Vec<f64>>, &[u8])> = val
            .map(|(vx, vy)| (vx.iter().map(|row| self.bin_row(row)).collect(), vy));

        let params = TreeParams {
            max_depth: self.max_depth,
            min_samples_leaf: self.min_samples_leaf,
            feature_subsample: None,
        };
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut scores = vec![self.base_score; x.len()];
        let mut val_scores = binned_val
            .as_ref()
            .map(|(vx, _)| vec![self.base_score; vx.len()]);

        let mut best_loss = f64::INFINITY;
        let mut best_round = 0;
        for round in 1..=self.max_rounds {
            let tree = boost_round(&binned, y, &mut scores, &params, self.learning_rate, &mut rng);

            if let (Some((vx, vy)), Some(vs)) = (&binned_val, val_scores.as_mut()) {
                for (score, row) in vs.iter_mut().zip(vx) {
                    *score += self.learning_rate * tree.predict_row(row);
                }
                self.trees.push(tree);
                let loss = log_loss(vs, vy);
                if loss < best_loss - 1e-9 {
                    best_loss = loss;
                    best_round = round;
                } else if round - best_round >= self.early_stopping_rounds {
                    log::debug!(
                        "early stopping at round {round} (best validation loss at {best_round})"
                    );
                    break;
                }
            } else {
                self.trees.push(tree);
                best_round = round;
            }
        }
        self.trees.truncate(best_round);
        Ok(())
    }

    fn predict_proba(&self, x: &[Vec<f64>]) -> Vec<f64> {
        x.iter()
            .map(|row| {
                let binned = self.bin_row(row);
                let score = self.base_score
                    + self.learning_rate
                        * self
                            .trees
                            .iter()
                            .map(|t| t.predict_row(&binned))
                            .sum::<f64>();
                sigmoid(score)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blobs() -> (Vec<Vec<f64>>, Vec<u8>) {
        let mut x = Vec::new();
        let mut y = Vec::new();
        for i in 0..40 {
            let jitter = (i % 5) as f64 * 0.1;
            x.push(vec![jitter, 1.0 + jitter]);
            y.push(0);
            x.push(vec![4.0 + jitter, 6.0 - jitter]);
            y.push(1);
        }
        (x, y)
    }

    #[test]
    fn test_gradient_boost_separates_blobs() {
        let (x, y) = blobs();
        let mut model = GradientBoost::new(3);
        model.fit(&x, &y, None).unwrap();
        assert_eq!(model.predict(&[vec![0.1, 1.1]]), vec![0]);
        assert_eq!(model.predict(&[vec![4.2, 5.8]]), vec![1]);
    }

    #[test]
    fn test_gradient_boost_deterministic() {
        let (x, y) = blobs();
        let probe = vec![vec![2.0, 3.5]];
        let mut a = GradientBoost::new(9);
        a.fit(&x, &y, None).unwrap();
        let mut b = GradientBoost::new(9);
        b.fit(&x, &y, None).unwrap();
        assert_eq!(a.predict_proba(&probe), b.predict_proba(&probe));
    }

    #[test]
    fn test_hist_boost_separates_blobs() {
        let (x, y) = blobs();
        let mut model = HistGradientBoost::new(5);
        model.fit(&x, &y, None).unwrap();
        assert_eq!(model.predict(&[vec![0.1, 1.1]]), vec![0]);
        assert_eq!(model.predict(&[vec![4.2, 5.8]]), vec![1]);
    }

    #[test]
    fn test_hist_boost_early_stops_on_worsening_validation() {
        let (x, y) = blobs();
        // Adversarial validation labels: the validation loss can only get
        // worse, so the model must stop long before max_rounds.
        let flipped: Vec<u8> = y.iter().map(|&l| 1 - l).collect();
        let mut model = HistGradientBoost::new(5);
        model.fit(&x, &y, Some((&x, &flipped))).unwrap();
        assert!(model.trees.len() < model.max_rounds);
    }

    #[test]
    fn test_hist_boost_binning_is_stable_across_predicts() {
        let (x, y) = blobs();
        let mut model = HistGradientBoost::new(5);
        model.fit(&x, &y, None).unwrap();
        let probe = vec![vec![3.3, 4.4]];
        assert_eq!(model.predict_proba(&probe), model.predict_proba(&probe));
    }
}
