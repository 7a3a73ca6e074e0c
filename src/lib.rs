pub mod artifacts;
pub mod config;
pub mod corpus;
pub mod dataset;
pub mod features;
pub mod harness;
pub mod metrics;
pub mod models;
pub mod predict;
pub mod record;
pub mod split;

pub use config::PipelineConfig;
pub use dataset::LabeledDataset;
pub use features::{FeatureSchema, FeatureStrategy, FeatureVector};
pub use harness::TrainingHarness;
pub use predict::EmailPredictor;
pub use record::{EmailRecord, Label};
