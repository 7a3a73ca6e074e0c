use crate::models::tree::{RegressionTree, TreeParams};
use crate::models::{check_training_input, Classifier};
use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Bagged ensemble of CART trees: each tree sees a bootstrap sample of the
/// rows and a sqrt-sized random feature subset per split; probabilities are
/// the mean of the trees' leaf values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    pub n_trees: usize,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    pub seed: u64,
    trees: Vec<RegressionTree>,
}

impl RandomForest {
    pub fn new(n_trees: usize, seed: u64) -> Self {
        Self {
            n_trees,
            max_depth: 12,
            min_samples_leaf: 2,
            seed,
            trees: Vec::new(),
        }
    }
}

impl Classifier for RandomForest {
    fn fit(
        &mut self,
        x: &[Vec<f64>],
        y: &[u8],
        _val: Option<(&[Vec<f64>], &[u8])>,
    ) -> Result<()> {
        let width = check_training_input(x, y)?;
        let targets: Vec<f64> = y.iter().map(|&l| l as f64).collect();
        let params = TreeParams {
            max_depth: self.max_depth,
            min_samples_leaf: self.min_samples_leaf,
            feature_subsample: Some(((width as f64).sqrt().ceil() as usize).max(1)),
        };

        let mut rng = StdRng::seed_from_u64(self.seed);
        self.trees = (0..self.n_trees)
            .map(|_| {
                let sample: Vec<usize> =
                    (0..x.len()).map(|_| rng.gen_range(0..x.len())).collect();
                RegressionTree::fit(x, &targets, &sample, &params, &mut rng)
            })
            .collect();
        Ok(())
    }

    fn predict_proba(&self, x: &[Vec<f64>]) -> Vec<f64> {
        x.iter()
            .map(|row| {
                let sum: f64 = self.trees.iter().map(|t| t.predict_row(row)).sum();
                (sum / self.trees.len().max(1) as f64).clamp(0.0, 1.0)
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
        for i in 0..30 {
            let jitter = (i % 7) as f64 * 0.05;
            x.push(vec![0.0 + jitter, 0.0 - jitter]);
            y.push(0);
            x.push(vec![5.0 - jitter, 5.0 + jitter]);
            y.push(1);
        }
        (x, y)
    }

    #[test]
    fn test_forest_separates_blobs() {
        let (x, y) = blobs();
        let mut forest = RandomForest::new(25, 42);
        forest.fit(&x, &y, None).unwrap();
        assert_eq!(forest.predict(&[vec![0.1, 0.1]]), vec![0]);
        assert_eq!(forest.predict(&[vec![4.9, 4.9]]), vec![1]);
    }

    #[test]
    fn test_forest_fit_is_deterministic() {
        let (x, y) = blobs();
        let probe = vec![vec![2.4, 2.6], vec![0.2, 0.1]];
        let mut a = RandomForest::new(25, 7);
        a.fit(&x, &y, None).unwrap();
        let mut b = RandomForest::new(25, 7);
        b.fit(&x, &y, None).unwrap();
        assert_eq!(a.predict_proba(&probe), b.predict_proba(&probe));
    }

    #[test]
    fn test_probabilities_bounded() {
        let (x, y) = blobs();
        let mut forest = RandomForest::new(10, 1);
        forest.fit(&x, &y, None).unwrap();
        for p in forest.predict_proba(&x) {
            assert!((0.0..=1.0).contains(&p));
        }
    }
}
