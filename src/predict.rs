use crate::artifacts::ArtifactStore;
use crate::features::FeatureStrategy;
use crate::models::TrainedModelArtifact;
use crate::record::{EmailRecord, Label};
use anyhow::{Context, Result};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct Prediction {
    pub label: Label,
    pub probability: f64,
}

/// Serving boundary: one persisted model plus the feature strategy that
/// re-derives the identical representation for incoming emails. The
/// artifact's schema is validated against the strategy's schema up front,
/// so a column mismatch is an immediate error instead of a silently wrong
/// prediction.
pub struct EmailPredictor {
    artifact: TrainedModelArtifact,
    strategy: Box<dyn FeatureStrategy>,
}

impl EmailPredictor {
    pub fn new(artifact: TrainedModelArtifact, strategy: Box<dyn FeatureStrategy>) -> Result<Self> {
        strategy
            .schema()
            .ensure_matches(&artifact.feature_schema)
            .with_context(|| {
                format!(
                    "model '{}' does not match the configured '{}' feature strategy",
                    TrainedModelArtifact::store_key(&artifact.dataset_suffix, &artifact.model_key),
                    strategy.name()
                )
            })?;
        Ok(Self { artifact, strategy })
    }

    pub fn from_store(
        store: &ArtifactStore,
        key: &str,
        strategy: Box<dyn FeatureStrategy>,
    ) -> Result<Self> {
        let artifact: TrainedModelArtifact = store
            .load(key)
            .with_context(|| format!("no persisted model under key '{key}'"))?;
        Self::new(artifact, strategy)
    }

    pub fn predict(&self, email: &EmailRecord) -> Result<Prediction> {
        Ok(self
            .predict_batch(std::slice::from_ref(email))?
            .remove(0))
    }

    pub fn predict_batch(&self, emails: &[EmailRecord]) -> Result<Vec<Prediction>> {
        let vectors = self.strategy.extract_batch(emails)?;
        let features: Vec<Vec<f64>> = vectors.into_iter().map(|v| v.values).collect();
        let probabilities = self.artifact.model.predict_proba(&features);
        Ok(probabilities
            .into_iter()
            .map(|probability| Prediction {
                label: if probability >= 0.5 {
                    Label::Phishing
                } else {
                    Label::Legitimate
                },
                probability,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::lexical::LexicalExtractor;
    use crate::features::{FeatureSchema, FeatureStrategy};
    use crate::models::{Classifier, FittedModel, LogisticRegression};

    fn email(sender: &str, subject: &str, body: &str) -> EmailRecord {
        EmailRecord {
            sender: sender.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
            date: None,
            reply_to: None,
            message_id: None,
            content_type: String::new(),
            has_attachment: false,
            urls: Vec::new(),
            label: None,
        }
    }

    fn training_emails() -> (Vec<EmailRecord>, Vec<u8>) {
        let mut emails = Vec::new();
        let mut labels = Vec::new();
        for i in 0..15 {
            emails.push(email(
                &format!("colleague{i}@corp.example"),
                "weekly status",
                &format!("please find the project update number {i} attached, thanks"),
            ));
            labels.push(0);
            emails.push(email(
                &format!("alert{i}@win-now{i}.ru"),
                "URGENT verify your account",
                &format!(
                    "urgent!!! verify your account now at http://bit.ly/claim{i} or lose access, \
                     click here to login and confirm your password"
                ),
            ));
            labels.push(1);
        }
        (emails, labels)
    }

    fn fitted_artifact(suffix: &str) -> TrainedModelArtifact {
        let strategy = LexicalExtractor::default();
        let (emails, labels) = training_emails();
        let vectors = strategy.extract_batch(&emails).unwrap();
        let features: Vec<Vec<f64>> = vectors.into_iter().map(|v| v.values).collect();
        let mut model = LogisticRegression::new();
        model.fit(&features, &labels, None).unwrap();
        TrainedModelArtifact {
            model_key: "logistic_regression".to_string(),
            dataset_suffix: suffix.to_string(),
            feature_schema: strategy.schema(),
            model: FittedModel::LogisticRegression(model),
        }
    }

    #[test]
    fn test_predictor_separates_obvious_cases() {
        let predictor = EmailPredictor::new(
            fitted_artifact("lexical_under_30"),
            Box::new(LexicalExtractor::default()),
        )
        .unwrap();

        let phishing = predictor
            .predict(&email(
                "alarm9@win-now.ru",
                "URGENT verify your account",
                "urgent!!! verify your account at http://bit.ly/x now, click here to login",
            ))
            .unwrap();
        assert_eq!(phishing.label, Label::Phishing);

        let legitimate = predictor
            .predict(&email(
                "colleague@corp.example",
                "weekly status",
                "please find the project update attached, thanks",
            ))
            .unwrap();
        assert_eq!(legitimate.label, Label::Legitimate);
        assert!(legitimate.probability < phishing.probability);
    }

    #[test]
    fn test_schema_mismatch_fails_fast() {
        let mut artifact = fitted_artifact("lexical_under_30");
        artifact.feature_schema = FeatureSchema::indexed(7);
        let result = EmailPredictor::new(artifact, Box::new(LexicalExtractor::default()));
        assert!(result.is_err());
    }

    #[test]
    fn test_from_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path()).unwrap();
        let artifact = fitted_artifact("lexical_smote_10");
        store.store("lexical_smote_10_logistic_regression", &artifact).unwrap();

        let predictor = EmailPredictor::from_store(
            &store,
            "lexical_smote_10_logistic_regression",
            Box::new(LexicalExtractor::default()),
        )
        .unwrap();
        let prediction = predictor
            .predict(&email("a@b.com", "hello", "a perfectly ordinary message"))
            .unwrap();
        assert!(prediction.probability.is_finite());

        assert!(EmailPredictor::from_store(
            &store,
            "missing_key",
            Box::new(LexicalExtractor::default())
        )
        .is_err());
    }
}
