pub mod embedding;
pub mod lexical;

use crate::record::EmailRecord;
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Explicit, ordered feature naming. The schema used at training time must
/// match the one used at serving time exactly; a silent column shuffle
/// produces wrong predictions instead of an error, so every persisted model
/// and dataset carries its schema and callers compare them before use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    names: Vec<String>,
}

impl FeatureSchema {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    /// Schema for a dense embedding of the given dimension: "0".."N-1".
    pub fn indexed(dimensions: usize) -> Self {
        Self {
            names: (0..dimensions).map(|i| i.to_string()).collect(),
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Fail-fast equality check, reporting the first divergence.
    pub fn ensure_matches(&self, other: &FeatureSchema) -> Result<()> {
        if self.names.len() != other.names.len() {
            bail!(
                "feature schema mismatch: {} columns vs {}",
                self.names.len(),
                other.names.len()
            );
        }
        for (i, (a, b)) in self.names.iter().zip(other.names.iter()).enumerate() {
            if a != b {
                bail!("feature schema mismatch at column {i}: '{a}' vs '{b}'");
            }
        }
        Ok(())
    }
}

/// A single row of features, ordered to match its schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub values: Vec<f64>,
}

impl FeatureVector {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }
}

/// A way of turning emails into fixed-width numeric rows. Implementations
/// must be deterministic and order-preserving across a batch, and must treat
/// missing optional fields the same way at training and serving time.
pub trait FeatureStrategy: Send + Sync {
    fn name(&self) -> &str;

    fn schema(&self) -> FeatureSchema;

    /// Batch extraction. Infallible for the lexical strategy; the embedding
    /// strategy propagates encoder failures as fatal errors rather than
    /// inventing a vector.
    fn extract_batch(&self, emails: &[EmailRecord]) -> Result<Vec<FeatureVector>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indexed_schema_names() {
        let schema = FeatureSchema::indexed(3);
        assert_eq!(schema.names(), &["0", "1", "2"]);
    }

    #[test]
    fn test_schema_mismatch_is_error() {
        let a = FeatureSchema::new(vec!["x".into(), "y".into()]);
        let b = FeatureSchema::new(vec!["y".into(), "x".into()]);
        let c = FeatureSchema::new(vec!["x".into()]);
        assert!(a.ensure_matches(&a.clone()).is_ok());
        assert!(a.ensure_matches(&b).is_err());
        assert!(a.ensure_matches(&c).is_err());
    }
}
