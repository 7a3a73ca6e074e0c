use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

/// Growth limits for a single CART tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeParams {
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    /// Number of features considered per split; `None` means all.
    pub feature_subsample: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// Least-squares regression tree over an arena of nodes. Fitting 0/1 labels
/// gives class-probability leaves (variance reduction coincides with Gini
/// for binary targets); fitting gradients gives boosting base learners.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

impl RegressionTree {
    /// Fit on the given subset of rows. `rng` drives feature subsampling
    /// only; with `feature_subsample: None` the fit is fully deterministic.
    pub fn fit(
        x: &[Vec<f64>],
        targets: &[f64],
        rows: &[usize],
        params: &TreeParams,
        rng: &mut StdRng,
    ) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        let mut rows = rows.to_vec();
        tree.grow(x, targets, &mut rows, params, params.max_depth, rng);
        tree
    }

    fn grow(
        &mut self,
        x: &[Vec<f64>],
        targets: &[f64],
        rows: &mut [usize],
        params: &TreeParams,
        depth_left: usize,
        rng: &mut StdRng,
    ) -> usize {
        let mean = mean_of(targets, rows);

        if depth_left == 0 || rows.len() < 2 * params.min_samples_leaf {
            return self.push_leaf(mean);
        }
        let Some((feature, threshold)) = best_split(x, targets, rows, params, rng) else {
            return self.push_leaf(mean);
        };

        // Partition rows in place around the chosen split.
        let mid = partition_rows(x, rows, feature, threshold);
        if mid == 0 || mid == rows.len() {
            return self.push_leaf(mean);
        }

        let index = self.nodes.len();
        self.nodes.push(Node::Split {
            feature,
            threshold,
            left: 0,
            right: 0,
        });
        let (left_rows, right_rows) = rows.split_at_mut(mid);
        let left = self.grow(x, targets, left_rows, params, depth_left - 1, rng);
        let right = self.grow(x, targets, right_rows, params, depth_left - 1, rng);
        if let Node::Split {
            left: l, right: r, ..
        } = &mut self.nodes[index]
        {
            *l = left;
            *r = right;
        }
        index
    }

    fn push_leaf(&mut self, value: f64) -> usize {
        self.nodes.push(Node::Leaf { value });
        self.nodes.len() - 1
    }

    fn root(&self) -> usize {
        // grow() pushes the root's split node (or sole leaf) first.
        0
    }

    pub fn predict_row(&self, row: &[f64]) -> f64 {
        match self.leaf_for(row) {
            Some(idx) => match self.nodes[idx] {
                Node::Leaf { value } => value,
                Node::Split { .. } => unreachable!("leaf_for returns leaves"),
            },
            None => 0.0,
        }
    }

    /// Arena index of the leaf this row lands in.
    pub fn leaf_for(&self, row: &[f64]) -> Option<usize> {
        if self.nodes.is_empty() {
            return None;
        }
        let mut index = self.root();
        loop {
            match &self.nodes[index] {
                Node::Leaf { .. } => return Some(index),
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    index = if row.get(*feature).copied().unwrap_or(0.0) <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }

    /// Overwrite a leaf's value (boosting replaces mean-residual leaves with
    /// Newton-step values).
    pub fn set_leaf_value(&mut self, leaf: usize, value: f64) {
        if let Node::Leaf { value: v } = &mut self.nodes[leaf] {
            *v = value;
        }
    }

    pub fn leaf_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n, Node::Leaf { .. }))
            .count()
    }
}

fn mean_of(targets: &[f64], rows: &[usize]) -> f64 {
    if rows.is_empty() {
        return 0.0;
    }
    rows.iter().map(|&i| targets[i]).sum::<f64>() / rows.len() as f64
}

fn partition_rows(x: &[Vec<f64>], rows: &mut [usize], feature: usize, threshold: f64) -> usize {
    let mut mid = 0;
    for i in 0..rows.len() {
        if x[rows[i]][feature] <= threshold {
            rows.swap(i, mid);
            mid += 1;
        }
    }
    mid
}

/// Exhaustive best split by sum-of-squared-error reduction over the chosen
/// feature subset. Returns `None` when no split separates the rows.
fn best_split(
    x: &[Vec<f64>],
    targets: &[f64],
    rows: &[usize],
    params: &TreeParams,
    rng: &mut StdRng,
) -> Option<(usize, f64)> {
    let width = x[rows[0]].len();
    let mut candidates: Vec<usize> = (0..width).collect();
    if let Some(k) = params.feature_subsample {
        candidates.shuffle(rng);
        candidates.truncate(k.clamp(1, width));
        candidates.sort_unstable();
    }

    let total_sum: f64 = rows.iter().map(|&i| targets[i]).sum();
    let total_sq: f64 = rows.iter().map(|&i| targets[i] * targets[i]).sum();
    let n = rows.len() as f64;
    let parent_sse = total_sq - total_sum * total_sum / n;
    if parent_sse <= 1e-12 {
        return None;
    }

    let mut best: Option<(f64, usize, f64)> = None;
    let mut sorted: Vec<(f64, f64)> = Vec::with_capacity(rows.len());
    for &feature in &candidates {
        sorted.clear();
        sorted.extend(rows.iter().map(|&i| (x[i][feature], targets[i])));
        sorted.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        let mut left_sum = 0.0;
        let mut left_sq = 0.0;
        for i in 0..sorted.len() - 1 {
            left_sum += sorted[i].1;
            left_sq += sorted[i].1 * sorted[i].1;
            let left_n = (i + 1) as f64;
            if (i + 1) < params.min_samples_leaf
                || (sorted.len() - i - 1) < params.min_samples_leaf
            {
                continue;
            }
            if sorted[i].0 == sorted[i + 1].0 {
                continue;
            }
            let right_n = n - left_n;
            let right_sum = total_sum - left_sum;
            let right_sq = total_sq - left_sq;
            let sse = (left_sq - left_sum * left_sum / left_n)
                + (right_sq - right_sum * right_sum / right_n);
            if best.map_or(true, |(b, _, _)| sse < b) {
                let threshold = (sorted[i].0 + sorted[i + 1].0) / 2.0;
                best = Some((sse, feature, threshold));
            }
        }
    }

    best.and_then(|(sse, feature, threshold)| {
        if sse < parent_sse - 1e-12 {
            Some((feature, threshold))
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn params() -> TreeParams {
        TreeParams {
            max_depth: 4,
            min_samples_leaf: 1,
            feature_subsample: None,
        }
    }

    #[test]
    fn test_tree_learns_simple_threshold() {
        let x: Vec<Vec<f64>> = (0..20).map(|i| vec![i as f64]).collect();
        let targets: Vec<f64> = (0..20).map(|i| if i < 10 { 0.0 } else { 1.0 }).collect();
        let rows: Vec<usize> = (0..20).collect();
        let mut rng = StdRng::seed_from_u64(0);
        let tree = RegressionTree::fit(&x, &targets, &rows, &params(), &mut rng);

        assert_eq!(tree.predict_row(&[3.0]), 0.0);
        assert_eq!(tree.predict_row(&[15.0]), 1.0);
    }

    #[test]
    fn test_pure_targets_become_single_leaf() {
        let x = vec![vec![1.0], vec![2.0], vec![3.0]];
        let targets = vec![0.5, 0.5, 0.5];
        let rows = vec![0, 1, 2];
        let mut rng = StdRng::seed_from_u64(0);
        let tree = RegressionTree::fit(&x, &targets, &rows, &params(), &mut rng);
        assert_eq!(tree.leaf_count(), 1);
        assert_eq!(tree.predict_row(&[99.0]), 0.5);
    }

    #[test]
    fn test_min_samples_leaf_respected() {
        let x: Vec<Vec<f64>> = (0..6).map(|i| vec![i as f64]).collect();
        let targets = vec![0.0, 0.0, 0.0, 1.0, 1.0, 1.0];
        let rows: Vec<usize> = (0..6).collect();
        let strict = TreeParams {
            max_depth: 8,
            min_samples_leaf: 3,
            feature_subsample: None,
        };
        let mut rng = StdRng::seed_from_u64(0);
        let tree = RegressionTree::fit(&x, &targets, &rows, &strict, &mut rng);
        // Only one split (3 | 3) is permitted.
        assert_eq!(tree.leaf_count(), 2);
    }

    #[test]
    fn test_leaf_value_override() {
        let x = vec![vec![0.0], vec![1.0]];
        let targets = vec![0.0, 1.0];
        let rows = vec![0, 1];
        let mut rng = StdRng::seed_from_u64(0);
        let mut tree = RegressionTree::fit(&x, &targets, &rows, &params(), &mut rng);
        let leaf = tree.leaf_for(&[0.0]).unwrap();
        tree.set_leaf_value(leaf, -2.5);
        assert_eq!(tree.predict_row(&[0.0]), -2.5);
    }
}
