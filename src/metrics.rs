use crate::artifacts::write_atomic;
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Binary confusion matrix, rows = actual class, columns = predicted class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub true_negative: usize,
    pub false_positive: usize,
    pub false_negative: usize,
    pub true_positive: usize,
}

impl ConfusionMatrix {
    pub fn from_predictions(actual: &[u8], predicted: &[u8]) -> Result<Self> {
        if actual.len() != predicted.len() {
            bail!(
                "actual ({}) and predicted ({}) lengths disagree",
                actual.len(),
                predicted.len()
            );
        }
        if actual.is_empty() {
            bail!("cannot evaluate on an empty set");
        }
        let mut matrix = Self {
            true_negative: 0,
            false_positive: 0,
            false_negative: 0,
            true_positive: 0,
        };
        for (&a, &p) in actual.iter().zip(predicted) {
            match (a, p) {
                (0, 0) => matrix.true_negative += 1,
                (0, _) => matrix.false_positive += 1,
                (_, 0) => matrix.false_negative += 1,
                _ => matrix.true_positive += 1,
            }
        }
        Ok(matrix)
    }

    pub fn total(&self) -> usize {
        self.true_negative + self.false_positive + self.false_negative + self.true_positive
    }

    pub fn accuracy(&self) -> f64 {
        (self.true_negative + self.true_positive) as f64 / self.total() as f64
    }

    fn class_counts(&self, class: u8) -> (usize, usize, usize) {
        // (true positives for the class, predicted count, actual count)
        match class {
            0 => (
                self.true_negative,
                self.true_negative + self.false_negative,
                self.true_negative + self.false_positive,
            ),
            _ => (
                self.true_positive,
                self.true_positive + self.false_positive,
                self.true_positive + self.false_negative,
            ),
        }
    }

    pub fn precision(&self, class: u8) -> f64 {
        let (hits, predicted, _) = self.class_counts(class);
        if predicted == 0 {
            0.0
        } else {
            hits as f64 / predicted as f64
        }
    }

    pub fn recall(&self, class: u8) -> f64 {
        let (hits, _, actual) = self.class_counts(class);
        if actual == 0 {
            0.0
        } else {
            hits as f64 / actual as f64
        }
    }

    pub fn f1(&self, class: u8) -> f64 {
        let p = self.precision(class);
        let r = self.recall(class);
        if p + r == 0.0 {
            0.0
        } else {
            2.0 * p * r / (p + r)
        }
    }

    fn weighted<F: Fn(u8) -> f64>(&self, metric: F) -> f64 {
        let total = self.total() as f64;
        [0u8, 1u8]
            .iter()
            .map(|&class| {
                let (_, _, actual) = self.class_counts(class);
                metric(class) * actual as f64 / total
            })
            .sum()
    }

    pub fn weighted_precision(&self) -> f64 {
        self.weighted(|c| self.precision(c))
    }

    pub fn weighted_recall(&self) -> f64 {
        self.weighted(|c| self.recall(c))
    }

    pub fn weighted_f1(&self) -> f64 {
        self.weighted(|c| self.f1(c))
    }

    /// Persist as a small CSV (rows = actual, columns = predicted).
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(["", "predicted_0", "predicted_1"])?;
        writer.write_record([
            "actual_0".to_string(),
            self.true_negative.to_string(),
            self.false_positive.to_string(),
        ])?;
        writer.write_record([
            "actual_1".to_string(),
            self.false_negative.to_string(),
            self.true_positive.to_string(),
        ])?;
        let bytes = writer
            .into_inner()
            .map_err(|e| anyhow::anyhow!("failed to flush confusion matrix CSV: {e}"))?;
        write_atomic(path, &bytes)
    }
}

/// One row of the results table: a model evaluated on one dataset, or a
/// fit-failure marker for that pairing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub dataset: String,
    pub model: String,
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub error: Option<String>,
}

impl EvaluationRecord {
    pub fn from_matrix(dataset: &str, model: &str, matrix: &ConfusionMatrix) -> Self {
        Self {
            dataset: dataset.to_string(),
            model: model.to_string(),
            accuracy: matrix.accuracy(),
            precision: matrix.weighted_precision(),
            recall: matrix.weighted_recall(),
            f1: matrix.weighted_f1(),
            error: None,
        }
    }

    pub fn fit_failure(dataset: &str, model: &str, error: &str) -> Self {
        Self {
            dataset: dataset.to_string(),
            model: model.to_string(),
            accuracy: 0.0,
            precision: 0.0,
            recall: 0.0,
            f1: 0.0,
            error: Some(error.to_string()),
        }
    }
}

/// Write the per-variant results table (one row per model family plus the
/// ensemble) atomically.
pub fn write_results_csv(records: &[EvaluationRecord], path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record([
        "dataset", "model", "accuracy", "precision", "recall", "f1", "error",
    ])?;
    for record in records {
        writer.write_record([
            record.dataset.clone(),
            record.model.clone(),
            format!("{:.6}", record.accuracy),
            format!("{:.6}", record.precision),
            format!("{:.6}", record.recall),
            format!("{:.6}", record.f1),
            record.error.clone().unwrap_or_default(),
        ])?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("failed to flush results CSV: {e}"))?;
    write_atomic(path, &bytes)
}
