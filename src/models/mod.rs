pub mod boost;
pub mod ensemble;
pub mod forest;
pub mod logistic;
pub mod tree;

use crate::features::FeatureSchema;
use anyhow::Result;
use serde::{Deserialize, Serialize};

pub use boost::{GradientBoost, HistGradientBoost};
pub use ensemble::SoftVotingEnsemble;
pub use forest::RandomForest;
pub use logistic::LogisticRegression;

/// The base model families the harness trains on every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    LogisticRegression,
    RandomForest,
    GradientBoost,
    HistGradientBoost,
}

impl ModelFamily {
    pub const ALL: [ModelFamily; 4] = [
        ModelFamily::LogisticRegression,
        ModelFamily::RandomForest,
        ModelFamily::GradientBoost,
        ModelFamily::HistGradientBoost,
    ];

    /// Stable key used in artifact names and results tables.
    pub fn key(self) -> &'static str {
        match self {
            ModelFamily::LogisticRegression => "logistic_regression",
            ModelFamily::RandomForest => "random_forest",
            ModelFamily::GradientBoost => "gradient_boost",
            ModelFamily::HistGradientBoost => "hist_gradient_boost",
        }
    }

    /// Fresh unfitted model with family defaults, seeded for determinism.
    pub fn build(self, seed: u64) -> FittedModel {
        match self {
            ModelFamily::LogisticRegression => {
                FittedModel::LogisticRegression(LogisticRegression::new())
            }
            ModelFamily::RandomForest => FittedModel::RandomForest(RandomForest::new(100, seed)),
            ModelFamily::GradientBoost => FittedModel::GradientBoost(GradientBoost::new(seed)),
            ModelFamily::HistGradientBoost => {
                FittedModel::HistGradientBoost(HistGradientBoost::new(seed))
            }
        }
    }
}

/// Binary classifier contract shared by every family. `predict_proba`
/// returns P(phishing) per row; `fit` may use the validation split for
/// early stopping but never sees test data.
pub trait Classifier {
    fn fit(
        &mut self,
        x: &[Vec<f64>],
        y: &[u8],
        val: Option<(&[Vec<f64>], &[u8])>,
    ) -> Result<()>;

    fn predict_proba(&self, x: &[Vec<f64>]) -> Vec<f64>;

    fn predict(&self, x: &[Vec<f64>]) -> Vec<u8> {
        self.predict_proba(x)
            .into_iter()
            .map(|p| u8::from(p >= 0.5))
            .collect()
    }
}

/// Serde-serializable wrapper over every fitted model kind, so one artifact
/// format covers all families and the ensemble.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum FittedModel {
    LogisticRegression(LogisticRegression),
    RandomForest(RandomForest),
    GradientBoost(GradientBoost),
    HistGradientBoost(HistGradientBoost),
    Ensemble(SoftVotingEnsemble),
}

impl FittedModel {
    pub fn fit(
        &mut self,
        x: &[Vec<f64>],
        y: &[u8],
        val: Option<(&[Vec<f64>], &[u8])>,
    ) -> Result<()> {
        match self {
            FittedModel::LogisticRegression(m) => m.fit(x, y, val),
            FittedModel::RandomForest(m) => m.fit(x, y, val),
            FittedModel::GradientBoost(m) => m.fit(x, y, val),
            FittedModel::HistGradientBoost(m) => m.fit(x, y, val),
            FittedModel::Ensemble(m) => m.fit(x, y, val),
        }
    }

    pub fn predict_proba(&self, x: &[Vec<f64>]) -> Vec<f64> {
        match self {
            FittedModel::LogisticRegression(m) => m.predict_proba(x),
            FittedModel::RandomForest(m) => m.predict_proba(x),
            FittedModel::GradientBoost(m) => m.predict_proba(x),
            FittedModel::HistGradientBoost(m) => m.predict_proba(x),
            FittedModel::Ensemble(m) => m.predict_proba(x),
        }
    }

    pub fn predict(&self, x: &[Vec<f64>]) -> Vec<u8> {
        self.predict_proba(x)
            .into_iter()
            .map(|p| u8::from(p >= 0.5))
            .collect()
    }
}

/// A persisted model: the fitted parameters plus everything needed to use
/// them safely — which variant produced it and the exact feature schema it
/// expects. Consumers must check the schema before predicting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainedModelArtifact {
    pub model_key: String,
    pub dataset_suffix: String,
    pub feature_schema: FeatureSchema,
    pub model: FittedModel,
}

impl TrainedModelArtifact {
    /// Store key for a (variant, model) pair, e.g.
    /// `embed_smote_30_random_forest`.
    pub fn store_key(dataset_suffix: &str, model_key: &str) -> String {
        format!("{dataset_suffix}_{model_key}")
    }
}

pub(crate) fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// Validate a feature matrix / label pairing before fitting.
pub(crate) fn check_training_input(x: &[Vec<f64>], y: &[u8]) -> Result<usize> {
    use anyhow::bail;
    if x.is_empty() {
        bail!("cannot fit on an empty feature matrix");
    }
    if x.len() != y.len() {
        bail!("feature rows ({}) and labels ({}) disagree", x.len(), y.len());
    }
    let width = x[0].len();
    if width == 0 {
        bail!("cannot fit on zero-width feature rows");
    }
    for (i, row) in x.iter().enumerate() {
        if row.len() != width {
            bail!("row {i} has {} columns, expected {width}", row.len());
        }
        if row.iter().any(|v| !v.is_finite()) {
            bail!("row {i} contains a non-finite feature value");
        }
    }
    Ok(width)
}
