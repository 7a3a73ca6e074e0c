use crate::features::{FeatureSchema, FeatureStrategy, FeatureVector};
use crate::record::EmailRecord;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};

/// Black-box sentence encoder. The pipeline only requires it to be
/// deterministic for a given input and to preserve input ordering across a
/// batch. Failures are fatal to the caller: a silent zero vector would
/// corrupt training invisibly.
pub trait EmbeddingEncoder: Send + Sync {
    fn name(&self) -> &str;
    fn dimensions(&self) -> usize;
    fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f64>>>;
}

/// Remote encoder speaking a minimal JSON protocol:
/// POST {"model": ..., "input": [...]} -> {"embeddings": [[...], ...]}.
pub struct HttpEmbeddingEncoder {
    client: reqwest::blocking::Client,
    endpoint: String,
    model: String,
    dimensions: usize,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embeddings: Vec<Vec<f64>>,
}

impl HttpEmbeddingEncoder {
    pub fn new(endpoint: String, model: String, dimensions: usize) -> Self {
        Self {
            client: reqwest::blocking::Client::new(),
            endpoint,
            model,
            dimensions,
        }
    }
}

impl EmbeddingEncoder for HttpEmbeddingEncoder {
    fn name(&self) -> &str {
        "http"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f64>>> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "model": self.model, "input": texts }))
            .send()
            .with_context(|| format!("embedding request to {} failed", self.endpoint))?
            .error_for_status()
            .context("embedding service returned an error status")?;

        let parsed: EmbeddingResponse = response
            .json()
            .context("embedding service returned malformed JSON")?;

        if parsed.embeddings.len() != texts.len() {
            bail!(
                "embedding service returned {} vectors for {} inputs",
                parsed.embeddings.len(),
                texts.len()
            );
        }
        for vector in &parsed.embeddings {
            if vector.len() != self.dimensions {
                bail!(
                    "embedding service returned dimension {} (expected {})",
                    vector.len(),
                    self.dimensions
                );
            }
        }
        Ok(parsed.embeddings)
    }
}

/// Seeded feature-hashing encoder: every token is hashed into a bucket with
/// a sign bit and the result is L2-normalized. Cheap, offline, and exactly
/// reproducible, which makes it the default for tests and air-gapped runs.
pub struct HashingEncoder {
    dimensions: usize,
    seed: u64,
}

impl HashingEncoder {
    pub fn new(dimensions: usize, seed: u64) -> Self {
        Self { dimensions, seed }
    }

    fn encode_one(&self, text: &str) -> Vec<f64> {
        let mut vector = vec![0.0f64; self.dimensions];
        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let mut hasher = Sha256::new();
            hasher.update(self.seed.to_le_bytes());
            hasher.update(token.as_bytes());
            let digest = hasher.finalize();
            let hash = u64::from_le_bytes(digest[..8].try_into().unwrap());
            let bucket = (hash % self.dimensions as u64) as usize;
            let sign = if hash & (1 << 63) == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f64>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

impl EmbeddingEncoder for HashingEncoder {
    fn name(&self) -> &str {
        "hash"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f64>>> {
        Ok(texts.iter().map(|t| self.encode_one(t)).collect())
    }
}

/// Feature strategy backed by an embedding encoder. The encoded text is the
/// lowercased subject + body, built identically at training and serving
/// time.
pub struct EmbeddingStrategy {
    encoder: Box<dyn EmbeddingEncoder>,
    batch_size: usize,
}

impl EmbeddingStrategy {
    pub fn new(encoder: Box<dyn EmbeddingEncoder>, batch_size: usize) -> Self {
        Self {
            encoder,
            batch_size: batch_size.max(1),
        }
    }

    fn text_for(email: &EmailRecord) -> String {
        format!("{} {}", email.subject, email.body).to_lowercase()
    }
}

impl FeatureStrategy for EmbeddingStrategy {
    fn name(&self) -> &str {
        "embed"
    }

    fn schema(&self) -> FeatureSchema {
        FeatureSchema::indexed(self.encoder.dimensions())
    }

    fn extract_batch(&self, emails: &[EmailRecord]) -> Result<Vec<FeatureVector>> {
        let texts: Vec<String> = emails.iter().map(Self::text_for).collect();
        let mut vectors = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            let encoded = self.encoder.encode_batch(chunk)?;
            vectors.extend(encoded.into_iter().map(FeatureVector::new));
        }
        Ok(vectors)
    }
}
