use crate::models::{Classifier, FittedModel};
use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Soft-voting ensemble: average the member models' predicted phishing
/// probabilities and take the arg-max class. Members are already-fitted
/// base models; `fit` is a no-op kept for trait uniformity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoftVotingEnsemble {
    members: Vec<(String, FittedModel)>,
}

impl SoftVotingEnsemble {
    pub fn new(members: Vec<(String, FittedModel)>) -> Result<Self> {
        if members.is_empty() {
            anyhow::bail!("soft-voting ensemble needs at least one member");
        }
        Ok(Self { members })
    }

    pub fn member_names(&self) -> Vec<&str> {
        self.members.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl Classifier for SoftVotingEnsemble {
    fn fit(
        &mut self,
        _x: &[Vec<f64>],
        _y: &[u8],
        _val: Option<(&[Vec<f64>], &[u8])>,
    ) -> Result<()> {
        Ok(())
    }

    fn predict_proba(&self, x: &[Vec<f64>]) -> Vec<f64> {
        let mut totals = vec![0.0f64; x.len()];
        for (_, model) in &self.members {
            for (total, p) in totals.iter_mut().zip(model.predict_proba(x)) {
                *total += p;
            }
        }
        let count = self.members.len() as f64;
        totals.into_iter().map(|t| t / count).collect()
    }
}
