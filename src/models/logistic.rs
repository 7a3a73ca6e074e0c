use crate::models::{check_training_input, sigmoid, Classifier};
use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Logistic regression fit by full-batch gradient descent on standardized
/// features, with a small L2 penalty. Standardization statistics are part of
/// the fitted state so serving applies the identical transform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticRegression {
    pub learning_rate: f64,
    pub iterations: usize,
    pub l2: f64,
    weights: Vec<f64>,
    bias: f64,
    means: Vec<f64>,
    stds: Vec<f64>,
}

impl Default for LogisticRegression {
    fn default() -> Self {
        Self::new()
    }
}

impl LogisticRegression {
    pub fn new() -> Self {
        Self {
            learning_rate: 0.1,
            iterations: 1000,
            l2: 1e-4,
            weights: Vec::new(),
            bias: 0.0,
            means: Vec::new(),
            stds: Vec::new(),
        }
    }

    fn standardize(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .enumerate()
            .map(|(j, v)| (v - self.means[j]) / self.stds[j])
            .collect()
    }
}

impl Classifier for LogisticRegression {
    fn fit(
        &mut self,
        x: &[Vec<f64>],
        y: &[u8],
        _val: Option<(&[Vec<f64>], &[u8])>,
    ) -> Result<()> {
        let width = check_training_input(x, y)?;
        let n = x.len() as f64;

        self.means = vec![0.0; width];
        self.stds = vec![0.0; width];
        for row in x {
            for (j, v) in row.iter().enumerate() {
                self.means[j] += v;
            }
        }
        for m in &mut self.means {
            *m /= n;
        }
        for row in x {
            for (j, v) in row.iter().enumerate() {
                let d = v - self.means[j];
                self.stds[j] += d * d;
            }
        }
        for s in &mut self.stds {
            *s = (*s / n).sqrt();
            if *s < 1e-12 {
                *s = 1.0; // constant column, leave it centered at zero
            }
        }

        let standardized: Vec<Vec<f64>> = x.iter().map(|row| self.standardize(row)).collect();

        self.weights = vec![0.0; width];
        self.bias = 0.0;
        let mut gradient = vec![0.0; width];
        for _ in 0..self.iterations {
            gradient.iter_mut().for_each(|g| *g = 0.0);
            let mut bias_gradient = 0.0;
            for (row, &label) in standardized.iter().zip(y) {
                let z = self.bias
                    + row
                        .iter()
                        .zip(&self.weights)
                        .map(|(v, w)| v * w)
                        .sum::<f64>();
                let error = sigmoid(z) - label as f64;
                for (g, v) in gradient.iter_mut().zip(row) {
                    *g += error * v;
                }
                bias_gradient += error;
            }
            for (w, g) in self.weights.iter_mut().zip(&gradient) {
                *w -= self.learning_rate * (g / n + self.l2 * *w);
            }
            self.bias -= self.learning_rate * bias_gradient / n;
        }
        Ok(())
    }

    fn predict_proba(&self, x: &[Vec<f64>]) -> Vec<f64> {
        x.iter()
            .map(|row| {
                let row = self.standardize(row);
                let z = self.bias
                    + row
                        .iter()
                        .zip(&self.weights)
                        .map(|(v, w)| v * w)
                        .sum::<f64>();
                sigmoid(z)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn separable() -> (Vec<Vec<f64>>, Vec<u8>) {
        let mut x = Vec::new();
        let mut y = Vec::new();
        for i in 0..40 {
            let offset = (i % 10) as f64 * 0.1;
            if i % 2 == 0 {
                x.push(vec![1.0 + offset, 10.0 - offset]);
                y.push(0);
            } else {
                x.push(vec![8.0 + offset, 2.0 + offset]);
                y.push(1);
            }
        }
        (x, y)
    }

    #[test]
    fn test_learns_separable_data() {
        let (x, y) = separable();
        let mut model = LogisticRegression::new();
        model.fit(&x, &y, None).unwrap();
        let predictions = model.predict(&x);
        let correct = predictions
            .iter()
            .zip(&y)
            .filter(|(p, l)| p == l)
            .count();
        assert_eq!(correct, y.len());
    }

    #[test]
    fn test_probabilities_are_ordered() {
        let (x, y) = separable();
        let mut model = LogisticRegression::new();
        model.fit(&x, &y, None).unwrap();
        let probas = model.predict_proba(&[vec![1.0, 10.0], vec![8.0, 2.0]]);
        assert!(probas[0] < 0.5);
        assert!(probas[1] > 0.5);
    }

    #[test]
    fn test_constant_column_does_not_break_fit() {
        let x = vec![vec![1.0, 5.0], vec![2.0, 5.0], vec![3.0, 5.0], vec![4.0, 5.0]];
        let y = vec![0, 0, 1, 1];
        let mut model = LogisticRegression::new();
        model.fit(&x, &y, None).unwrap();
        let probas = model.predict_proba(&x);
        assert!(probas.iter().all(|p| p.is_finite()));
    }

    #[test]
    fn test_empty_input_is_error() {
        let mut model = LogisticRegression::new();
        assert!(model.fit(&[], &[], None).is_err());
    }
}
