use crate::corpus::SourceSpec;
use crate::features::embedding::{EmbeddingStrategy, HashingEncoder, HttpEmbeddingEncoder};
use crate::features::lexical::{LexicalExtractor, ReferenceLists};
use crate::features::FeatureStrategy;
use crate::record::Label;
use crate::split::{ResampleMethod, ResamplingSpec, SplitConfig};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_model_dir")]
    pub model_dir: PathBuf,
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,
    #[serde(default = "default_seed")]
    pub seed: u64,
    pub sources: Vec<SourceEntry>,
    #[serde(default)]
    pub features: FeaturesConfig,
    #[serde(default)]
    pub split: SplitSection,
    #[serde(default)]
    pub resampling: ResamplingSection,
    #[serde(default)]
    pub serving: ServingConfig,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data/preprocessed")
}
fn default_model_dir() -> PathBuf {
    PathBuf::from("data/saved_models")
}
fn default_results_dir() -> PathBuf {
    PathBuf::from("data/results")
}
fn default_seed() -> u64 {
    42
}

/// One input corpus plus its provenance label. The label is declared here,
/// per source, never inferred from the filename.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceEntry {
    pub path: PathBuf,
    pub label: Label,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Lexical,
    Embedding,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_strategy")]
    pub strategy: StrategyKind,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    /// Optional substitute for the built-in keyword/domain reference lists.
    #[serde(default)]
    pub reference_lists: Option<ReferenceLists>,
}

fn default_strategy() -> StrategyKind {
    StrategyKind::Lexical
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            embedding: EmbeddingConfig::default(),
            reference_lists: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    Hash,
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_backend")]
    pub backend: EmbeddingBackend,
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
}

fn default_backend() -> EmbeddingBackend {
    EmbeddingBackend::Hash
}
fn default_dimensions() -> usize {
    384
}
fn default_batch_size() -> usize {
    64
}
fn default_endpoint() -> String {
    "http://127.0.0.1:8001/embed".to_string()
}
fn default_embedding_model() -> String {
    "all-MiniLM-L6-v2".to_string()
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            dimensions: default_dimensions(),
            batch_size: default_batch_size(),
            endpoint: default_endpoint(),
            model: default_embedding_model(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitSection {
    #[serde(default = "default_val_fraction")]
    pub val_fraction: f64,
    #[serde(default = "default_test_fraction")]
    pub test_fraction: f64,
    #[serde(default = "default_realistic_fraction")]
    pub realistic_test_phishing_fraction: f64,
    #[serde(default = "default_prevalence")]
    pub test_phishing_prevalence: f64,
}

fn default_val_fraction() -> f64 {
    0.15
}
fn default_test_fraction() -> f64 {
    0.15
}
fn default_realistic_fraction() -> f64 {
    0.02
}
fn default_prevalence() -> f64 {
    0.02
}

impl Default for SplitSection {
    fn default() -> Self {
        Self {
            val_fraction: default_val_fraction(),
            test_fraction: default_test_fraction(),
            realistic_test_phishing_fraction: default_realistic_fraction(),
            test_phishing_prevalence: default_prevalence(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResamplingSection {
    #[serde(default = "default_ratios")]
    pub ratios: Vec<f64>,
    #[serde(default = "default_methods")]
    pub methods: Vec<ResampleMethod>,
}

fn default_ratios() -> Vec<f64> {
    vec![0.1, 0.3, 0.5]
}
fn default_methods() -> Vec<ResampleMethod> {
    vec![ResampleMethod::Oversample, ResampleMethod::Undersample]
}

impl Default for ResamplingSection {
    fn default() -> Self {
        Self {
            ratios: default_ratios(),
            methods: default_methods(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServingConfig {
    /// Artifact key of the model the predict command serves.
    #[serde(default = "default_serving_model")]
    pub model: String,
}

fn default_serving_model() -> String {
    "lexical_smote_30_ensemble".to_string()
}

impl Default for ServingConfig {
    fn default() -> Self {
        Self {
            model: default_serving_model(),
        }
    }
}

impl PipelineConfig {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {path}"))?;
        let config: PipelineConfig =
            serde_yaml::from_str(&content).with_context(|| format!("invalid config {path}"))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sources.is_empty() {
            bail!("config declares no corpus sources");
        }
        if self.resampling.ratios.is_empty() || self.resampling.methods.is_empty() {
            bail!("config declares no resampling ratios or methods");
        }
        for &ratio in &self.resampling.ratios {
            if ratio <= 0.0 || ratio >= 1.0 {
                bail!("resampling ratio {ratio} is outside (0, 1)");
            }
        }
        let split = &self.split;
        for (name, value) in [
            ("val_fraction", split.val_fraction),
            ("test_fraction", split.test_fraction),
            (
                "realistic_test_phishing_fraction",
                split.realistic_test_phishing_fraction,
            ),
            ("test_phishing_prevalence", split.test_phishing_prevalence),
        ] {
            if value <= 0.0 || value >= 1.0 {
                bail!("{name} {value} is outside (0, 1)");
            }
        }
        if split.val_fraction + split.test_fraction >= 1.0 {
            bail!("val_fraction + test_fraction leave no training data");
        }
        if self.features.embedding.dimensions == 0 {
            bail!("embedding dimensions must be positive");
        }
        if self.features.embedding.batch_size == 0 {
            bail!("embedding batch_size must be positive");
        }
        Ok(())
    }

    pub fn source_specs(&self) -> Vec<SourceSpec> {
        self.sources
            .iter()
            .map(|s| SourceSpec {
                path: s.path.clone(),
                label: s.label,
            })
            .collect()
    }

    pub fn split_config(&self) -> SplitConfig {
        SplitConfig {
            val_fraction: self.split.val_fraction,
            test_fraction: self.split.test_fraction,
            realistic_test_phishing_fraction: self.split.realistic_test_phishing_fraction,
            test_phishing_prevalence: self.split.test_phishing_prevalence,
            seed: self.seed,
        }
    }

    /// Cross product of configured ratios and methods, all sharing the
    /// global seed so reruns are reproducible.
    pub fn resampling_specs(&self) -> Vec<ResamplingSpec> {
        let mut specs = Vec::new();
        for &method in &self.resampling.methods {
            for &ratio in &self.resampling.ratios {
                specs.push(ResamplingSpec {
                    target_phishing_ratio: ratio,
                    method,
                    seed: self.seed,
                });
            }
        }
        specs
    }

    pub fn build_strategy(&self) -> Box<dyn FeatureStrategy> {
        match self.features.strategy {
            StrategyKind::Lexical => {
                let lists = self.features.reference_lists.clone().unwrap_or_default();
                Box::new(LexicalExtractor::new(lists))
            }
            StrategyKind::Embedding => {
                let embedding = &self.features.embedding;
                let encoder: Box<dyn crate::features::embedding::EmbeddingEncoder> =
                    match embedding.backend {
                        EmbeddingBackend::Hash => {
                            Box::new(HashingEncoder::new(embedding.dimensions, self.seed))
                        }
                        EmbeddingBackend::Http => Box::new(HttpEmbeddingEncoder::new(
                            embedding.endpoint.clone(),
                            embedding.model.clone(),
                            embedding.dimensions,
                        )),
                    };
                Box::new(EmbeddingStrategy::new(encoder, embedding.batch_size))
            }
        }
    }
}

/// Default configuration document written by `--generate-config`.
pub fn default_config_yaml() -> &'static str {
    r#"# phishguard pipeline configuration

# Where stage checkpoints, models, and metrics land.
data_dir: data/preprocessed
model_dir: data/saved_models
results_dir: data/results

# Seed for every sampling step; identical inputs + seed reproduce the
# partition and resampled rows bit for bit.
seed: 42

# Input corpora. Each source carries its provenance label explicitly.
sources:
  - path: data/extracted/phishing_emails.csv
    label: phishing
  - path: data/extracted/legitimate_emails.csv
    label: legitimate

features:
  # lexical: ~20 structural/keyword features. embedding: dense vectors from
  # a sentence encoder.
  strategy: lexical
  embedding:
    # hash: seeded offline feature hashing. http: remote encoder service.
    backend: hash
    dimensions: 384
    batch_size: 64
    endpoint: http://127.0.0.1:8001/embed
    model: all-MiniLM-L6-v2

split:
  val_fraction: 0.15
  test_fraction: 0.15
  # Fraction of phishing rows sampled into the realistic test set.
  realistic_test_phishing_fraction: 0.02
  # Phishing prevalence the test set is skewed to (0.02 = 1 in 50).
  test_phishing_prevalence: 0.02

resampling:
  ratios: [0.1, 0.3, 0.5]
  methods: [oversample, undersample]

serving:
  # Artifact key served by --predict-email.
  model: lexical_smote_30_ensemble
"#
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_parses_and_validates() {
        let config: PipelineConfig = serde_yaml::from_str(default_config_yaml()).unwrap();
        config.validate().unwrap();
        assert_eq!(config.seed, 42);
        assert_eq!(config.sources.len(), 2);
        assert_eq!(config.sources[0].label, Label::Phishing);
        assert_eq!(config.features.strategy, StrategyKind::Lexical);
    }

    #[test]
    fn test_resampling_specs_cross_product() {
        let config: PipelineConfig = serde_yaml::from_str(default_config_yaml()).unwrap();
        let specs = config.resampling_specs();
        assert_eq!(specs.len(), 6); // 3 ratios x 2 methods
        assert!(specs.iter().all(|s| s.seed == 42));
    }

    #[test]
    fn test_invalid_ratio_rejected() {
        let mut config: PipelineConfig = serde_yaml::from_str(default_config_yaml()).unwrap();
        config.resampling.ratios = vec![1.5];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_no_sources_rejected() {
        let mut config: PipelineConfig = serde_yaml::from_str(default_config_yaml()).unwrap();
        config.sources.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_build_strategy_respects_kind() {
        let mut config: PipelineConfig = serde_yaml::from_str(default_config_yaml()).unwrap();
        assert_eq!(config.build_strategy().name(), "lexical");
        config.features.strategy = StrategyKind::Embedding;
        let strategy = config.build_strategy();
        assert_eq!(strategy.name(), "embed");
        assert_eq!(strategy.schema().len(), 384);
    }

    #[test]
    fn test_infeasible_fractions_rejected() {
        let mut config: PipelineConfig = serde_yaml::from_str(default_config_yaml()).unwrap();
        config.split.val_fraction = 0.6;
        config.split.test_fraction = 0.5;
        assert!(config.validate().is_err());
    }
}
