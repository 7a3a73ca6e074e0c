use crate::artifacts::write_atomic;
use crate::features::{FeatureSchema, FeatureVector};
use anyhow::{bail, Context, Result};
use std::path::Path;

/// A feature matrix with labels and the schema describing its columns.
/// On disk this is a CSV whose header is the schema's names followed by a
/// final `label` column, matching the layout the training stage consumes.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledDataset {
    pub schema: FeatureSchema,
    pub features: Vec<Vec<f64>>,
    pub labels: Vec<u8>,
}

impl LabeledDataset {
    pub fn new(schema: FeatureSchema, features: Vec<Vec<f64>>, labels: Vec<u8>) -> Result<Self> {
        if features.len() != labels.len() {
            bail!(
                "feature rows ({}) and labels ({}) disagree",
                features.len(),
                labels.len()
            );
        }
        for (i, row) in features.iter().enumerate() {
            if row.len() != schema.len() {
                bail!(
                    "row {i} has {} columns, schema expects {}",
                    row.len(),
                    schema.len()
                );
            }
        }
        Ok(Self {
            schema,
            features,
            labels,
        })
    }

    pub fn from_vectors(
        schema: FeatureSchema,
        vectors: Vec<FeatureVector>,
        labels: Vec<u8>,
    ) -> Result<Self> {
        let features = vectors.into_iter().map(|v| v.values).collect();
        Self::new(schema, features, labels)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn phishing_count(&self) -> usize {
        self.labels.iter().filter(|&&l| l == 1).count()
    }

    pub fn phishing_ratio(&self) -> f64 {
        if self.labels.is_empty() {
            0.0
        } else {
            self.phishing_count() as f64 / self.labels.len() as f64
        }
    }

    /// Write the dataset as CSV (schema header + `label`), atomically.
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        let mut header: Vec<&str> = self.schema.names().iter().map(|s| s.as_str()).collect();
        header.push("label");
        writer.write_record(&header)?;

        for (row, label) in self.features.iter().zip(&self.labels) {
            let mut record: Vec<String> = row.iter().map(|v| v.to_string()).collect();
            record.push(label.to_string());
            writer.write_record(&record)?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| anyhow::anyhow!("failed to flush CSV buffer: {e}"))?;
        write_atomic(path, &bytes)
    }

    /// Read a dataset written by `write_csv`, reconstructing the schema from
    /// the header.
    pub fn read_csv(path: &Path) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("failed to open dataset {}", path.display()))?;

        let header = reader.headers()?.clone();
        if header.is_empty() || header.iter().last() != Some("label") {
            bail!(
                "dataset {} is missing the trailing 'label' column",
                path.display()
            );
        }
        let names: Vec<String> = header
            .iter()
            .take(header.len() - 1)
            .map(|s| s.to_string())
            .collect();
        let schema = FeatureSchema::new(names);

        let mut features = Vec::new();
        let mut labels = Vec::new();
        for (i, record) in reader.records().enumerate() {
            let record = record?;
            if record.len() != schema.len() + 1 {
                bail!(
                    "dataset {} row {} has {} fields, expected {}",
                    path.display(),
                    i + 1,
                    record.len(),
                    schema.len() + 1
                );
            }
            let mut row = Vec::with_capacity(schema.len());
            for field in record.iter().take(schema.len()) {
                row.push(
                    field
                        .parse::<f64>()
                        .with_context(|| format!("non-numeric feature value '{field}'"))?,
                );
            }
            let label: u8 = record
                .iter()
                .last()
                .unwrap()
                .parse()
                .with_context(|| format!("invalid label in row {}", i + 1))?;
            if label > 1 {
                bail!("label must be 0 or 1, found {label}");
            }
            features.push(row);
            labels.push(label);
        }

        Self::new(schema, features, labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> LabeledDataset {
        LabeledDataset::new(
            FeatureSchema::new(vec!["a".into(), "b".into()]),
            vec![vec![1.0, 2.5], vec![0.0, -3.25], vec![4.0, 0.5]],
            vec![0, 1, 0],
        )
        .unwrap()
    }

    #[test]
    fn test_csv_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("set.csv");
        let dataset = sample();
        dataset.write_csv(&path).unwrap();
        let loaded = LabeledDataset::read_csv(&path).unwrap();
        assert_eq!(loaded, dataset);
    }

    #[test]
    fn test_phishing_ratio() {
        let dataset = sample();
        assert_eq!(dataset.phishing_count(), 1);
        assert!((dataset.phishing_ratio() - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_mismatched_rows_rejected() {
        let result = LabeledDataset::new(
            FeatureSchema::new(vec!["a".into()]),
            vec![vec![1.0, 2.0]],
            vec![0],
        );
        assert!(result.is_err());
    }
}
