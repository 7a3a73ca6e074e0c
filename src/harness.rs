use crate::artifacts::ArtifactStore;
use crate::dataset::LabeledDataset;
use crate::metrics::{write_results_csv, ConfusionMatrix, EvaluationRecord};
use crate::models::{FittedModel, ModelFamily, SoftVotingEnsemble, TrainedModelArtifact};
use crate::split::SplitArtifacts;
use anyhow::{bail, Context, Result};
use std::fmt;
use std::path::PathBuf;

/// Lifecycle of one (variant, family) pairing.
#[derive(Debug, Clone, PartialEq)]
pub enum FitState {
    Pending,
    Fitting,
    FitOk,
    FitFailed(String),
    Evaluated,
}

impl fmt::Display for FitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FitState::Pending => write!(f, "pending"),
            FitState::Fitting => write!(f, "fitting"),
            FitState::FitOk => write!(f, "fit_ok"),
            FitState::FitFailed(e) => write!(f, "fit_failed: {e}"),
            FitState::Evaluated => write!(f, "evaluated"),
        }
    }
}

pub const ENSEMBLE_KEY: &str = "ensemble";

/// Trains every model family on each train variant, evaluates on the
/// validation split, and evaluates the soft-voting ensemble — and only it —
/// on the held-out test split. Persisted artifacts are reused instead of
/// refit, so a rerun against a populated store performs zero fits.
pub struct TrainingHarness<'a> {
    store: &'a ArtifactStore,
    results_dir: PathBuf,
    seed: u64,
}

impl<'a> TrainingHarness<'a> {
    pub fn new(store: &'a ArtifactStore, results_dir: impl Into<PathBuf>, seed: u64) -> Result<Self> {
        let results_dir = results_dir.into();
        std::fs::create_dir_all(results_dir.join("confusion_matrices"))
            .with_context(|| format!("failed to create {}", results_dir.display()))?;
        Ok(Self {
            store,
            results_dir,
            seed,
        })
    }

    fn confusion_path(&self, suffix: &str, model: &str, split: &str) -> PathBuf {
        self.results_dir
            .join("confusion_matrices")
            .join(format!("{suffix}_{model}_{split}_cm.csv"))
    }

    fn results_path(&self, suffix: &str) -> PathBuf {
        self.results_dir.join(format!("{suffix}_results.csv"))
    }

    /// Train/evaluate one variant. Returns the records written to its
    /// results table, base families first, ensemble last.
    pub fn run_variant(
        &self,
        suffix: &str,
        train: &LabeledDataset,
        val: &LabeledDataset,
        test: &LabeledDataset,
    ) -> Result<Vec<EvaluationRecord>> {
        train
            .schema
            .ensure_matches(&val.schema)
            .context("train and validation schemas diverge")?;
        train
            .schema
            .ensure_matches(&test.schema)
            .context("train and test schemas diverge")?;

        log::info!(
            "=== training on {suffix}: {} rows, phishing ratio {:.3} ===",
            train.len(),
            train.phishing_ratio()
        );

        let mut records = Vec::new();
        let mut members: Vec<(String, FittedModel)> = Vec::new();

        for family in ModelFamily::ALL {
            let key = TrainedModelArtifact::store_key(suffix, family.key());
            let transition = |state: &FitState| log::debug!("{key}: {state}");
            transition(&FitState::Pending);

            let artifact = if self.store.contains(&key) {
                let artifact: TrainedModelArtifact = self
                    .store
                    .load(&key)
                    .with_context(|| format!("failed to load cached model {key}"))?;
                artifact
                    .feature_schema
                    .ensure_matches(&train.schema)
                    .with_context(|| format!("cached model {key} was trained on a different schema"))?;
                log::info!("{key}: reusing persisted model");
                transition(&FitState::FitOk);
                artifact
            } else {
                transition(&FitState::Fitting);
                let mut model = family.build(self.seed);
                match model.fit(
                    &train.features,
                    &train.labels,
                    Some((&val.features, &val.labels)),
                ) {
                    Ok(()) => {
                        transition(&FitState::FitOk);
                        let artifact = TrainedModelArtifact {
                            model_key: family.key().to_string(),
                            dataset_suffix: suffix.to_string(),
                            feature_schema: train.schema.clone(),
                            model,
                        };
                        self.store.store(&key, &artifact)?;
                        artifact
                    }
                    Err(e) => {
                        let state = FitState::FitFailed(format!("{e:#}"));
                        log::warn!("{key}: {state}");
                        records.push(EvaluationRecord::fit_failure(
                            suffix,
                            family.key(),
                            &format!("{e:#}"),
                        ));
                        continue;
                    }
                }
            };

            let predicted = artifact.model.predict(&val.features);
            let matrix = ConfusionMatrix::from_predictions(&val.labels, &predicted)?;
            matrix.write_csv(&self.confusion_path(suffix, family.key(), "val"))?;
            let record = EvaluationRecord::from_matrix(suffix, family.key(), &matrix);
            transition(&FitState::Evaluated);
            log::info!(
                "{key}: val accuracy {:.4}, f1 {:.4}",
                record.accuracy,
                record.f1
            );
            records.push(record);
            members.push((family.key().to_string(), artifact.model));
        }

        if members.is_empty() {
            // Keep the failure markers on disk before giving up.
            write_results_csv(&records, &self.results_path(suffix))?;
            bail!("every model family failed to fit for variant {suffix}");
        }

        let ensemble_record = self.evaluate_ensemble(suffix, &train.schema, members, test)?;
        records.push(ensemble_record);

        write_results_csv(&records, &self.results_path(suffix))?;
        log::info!(
            "results for {suffix} written to {}",
            self.results_path(suffix).display()
        );
        Ok(records)
    }

    /// Build (or reload) the soft-voting ensemble and evaluate it on TEST.
    /// Base models never see test data; this is the only test-set touch in
    /// the whole pipeline.
    fn evaluate_ensemble(
        &self,
        suffix: &str,
        schema: &crate::features::FeatureSchema,
        members: Vec<(String, FittedModel)>,
        test: &LabeledDataset,
    ) -> Result<EvaluationRecord> {
        let key = TrainedModelArtifact::store_key(suffix, ENSEMBLE_KEY);
        if self.store.contains(&key) {
            log::info!("{key}: reusing persisted ensemble");
        } else {
            let names: Vec<&str> = members.iter().map(|(n, _)| n.as_str()).collect();
            log::info!("{key}: soft-voting over [{}]", names.join(", "));
        }
        let artifact: TrainedModelArtifact = self.store.get_or_compute(&key, || {
            let ensemble = SoftVotingEnsemble::new(members)?;
            Ok(TrainedModelArtifact {
                model_key: ENSEMBLE_KEY.to_string(),
                dataset_suffix: suffix.to_string(),
                feature_schema: schema.clone(),
                model: FittedModel::Ensemble(ensemble),
            })
        })?;
        artifact
            .feature_schema
            .ensure_matches(schema)
            .with_context(|| format!("cached ensemble {key} was trained on a different schema"))?;

        let predicted = artifact.model.predict(&test.features);
        let matrix = ConfusionMatrix::from_predictions(&test.labels, &predicted)?;
        matrix.write_csv(&self.confusion_path(suffix, ENSEMBLE_KEY, "test"))?;
        let record = EvaluationRecord::from_matrix(suffix, ENSEMBLE_KEY, &matrix);
        log::info!(
            "{key}: evaluated on test (accuracy {:.4}, f1 {:.4})",
            record.accuracy,
            record.f1
        );
        Ok(record)
    }

    /// Run every variant produced by the split stage.
    pub fn run_all(&self, split: &SplitArtifacts) -> Result<()> {
        let val = LabeledDataset::read_csv(&split.val_path)?;
        let test = LabeledDataset::read_csv(&split.test_path)?;
        for variant in &split.variants {
            let train = LabeledDataset::read_csv(&variant.path)?;
            self.run_variant(&variant.suffix, &train, &val, &test)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureSchema;
    use std::path::Path;

    fn schema() -> FeatureSchema {
        FeatureSchema::new(vec!["x0".into(), "x1".into()])
    }

    /// Two well-separated clusters with a little structure in both columns.
    fn dataset(n_per_class: usize, offset: f64) -> LabeledDataset {
        let mut features = Vec::new();
        let mut labels = Vec::new();
        for i in 0..n_per_class {
            let jitter = (i % 9) as f64 * 0.07 + offset;
            features.push(vec![jitter, 1.0 + jitter]);
            labels.push(0);
            features.push(vec![5.0 + jitter, 7.0 - jitter]);
            labels.push(1);
        }
        LabeledDataset::new(schema(), features, labels).unwrap()
    }

    fn harness_dirs(root: &Path) -> (ArtifactStore, PathBuf) {
        let store = ArtifactStore::new(root.join("models")).unwrap();
        (store, root.join("results"))
    }

    #[test]
    fn test_run_variant_produces_all_records() {
        let dir = tempfile::tempdir().unwrap();
        let (store, results_dir) = harness_dirs(dir.path());
        let harness = TrainingHarness::new(&store, &results_dir, 42).unwrap();

        let records = harness
            .run_variant("lex_under_30", &dataset(30, 0.0), &dataset(8, 0.01), &dataset(8, 0.02))
            .unwrap();

        // Four families plus the ensemble, in order.
        assert_eq!(records.len(), 5);
        assert_eq!(records[4].model, ENSEMBLE_KEY);
        assert!(records.iter().all(|r| r.error.is_none()));
        // Separable data: every family should be essentially perfect.
        assert!(records.iter().all(|r| r.accuracy > 0.9), "{records:?}");

        assert!(results_dir.join("lex_under_30_results.csv").exists());
        assert!(results_dir
            .join("confusion_matrices")
            .join("lex_under_30_logistic_regression_val_cm.csv")
            .exists());
        assert!(results_dir
            .join("confusion_matrices")
            .join("lex_under_30_ensemble_test_cm.csv")
            .exists());
    }

    #[test]
    fn test_rerun_reuses_artifacts_and_reproduces_records() {
        let dir = tempfile::tempdir().unwrap();
        let (store, results_dir) = harness_dirs(dir.path());
        let harness = TrainingHarness::new(&store, &results_dir, 7).unwrap();

        let train = dataset(25, 0.0);
        let val = dataset(6, 0.01);
        let test = dataset(6, 0.02);

        let first = harness.run_variant("lex_smote_50", &train, &val, &test).unwrap();
        let key = TrainedModelArtifact::store_key("lex_smote_50", "random_forest");
        let model_bytes = std::fs::read(store.path_for(&key)).unwrap();

        let second = harness.run_variant("lex_smote_50", &train, &val, &test).unwrap();
        assert_eq!(first, second);
        // The persisted model was reused, not rewritten.
        assert_eq!(std::fs::read(store.path_for(&key)).unwrap(), model_bytes);
    }

    #[test]
    fn test_all_families_failing_is_fatal_but_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let (store, results_dir) = harness_dirs(dir.path());
        let harness = TrainingHarness::new(&store, &results_dir, 1).unwrap();

        // A non-finite feature value makes every family refuse to fit.
        let train = LabeledDataset::new(
            schema(),
            vec![vec![f64::NAN, 1.0], vec![2.0, 3.0]],
            vec![0, 1],
        )
        .unwrap();
        let val = dataset(4, 0.0);
        let test = dataset(4, 0.0);

        let result = harness.run_variant("lex_bad", &train, &val, &test);
        assert!(result.is_err());

        let content =
            std::fs::read_to_string(results_dir.join("lex_bad_results.csv")).unwrap();
        assert!(content.contains("non-finite"));
        // No model artifacts were persisted for the failed variant.
        assert!(!store.contains(&TrainedModelArtifact::store_key("lex_bad", "logistic_regression")));
    }

    #[test]
    fn test_schema_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (store, results_dir) = harness_dirs(dir.path());
        let harness = TrainingHarness::new(&store, &results_dir, 1).unwrap();

        let train = dataset(5, 0.0);
        let mut val = dataset(5, 0.0);
        val.schema = FeatureSchema::new(vec!["x1".into(), "x0".into()]);
        let test = dataset(5, 0.0);
        assert!(harness.run_variant("lex_bad_schema", &train, &val, &test).is_err());
    }
}
