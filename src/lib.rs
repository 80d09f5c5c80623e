//! Defect Sentinel: manufacturing defect early-warning service.
//!
//! Modular structure:
//! - [`record`]: Sensor record validation
//! - [`artifacts`]: Training artifact bundle loading and cross-validation
//! - [`features`]: Core selection, imputation/dampening, derived feature synthesis
//! - [`model`]: Scaler and classifier evaluation
//! - [`scoring`]: Alignment, scaling, classification and thresholding
//! - [`service`]: Prediction service composing the stages
//! - [`storage`]: SQLite alert store
//! - [`replay`]: NDJSON replay runner
//! - [`logging`]: Structured JSON logging

pub mod artifacts;
pub mod config;
pub mod features;
pub mod logging;
pub mod model;
pub mod record;
pub mod replay;
pub mod scoring;
pub mod service;
pub mod storage;

pub use artifacts::{ArtifactBundle, ArtifactLoadError, ArtifactStore};
pub use config::ServiceConfig;
pub use features::{FeatureBuilder, FeatureVector};
pub use logging::StructuredLogger;
pub use record::{RecordValidator, SensorRecord};
pub use replay::ReplayRunner;
pub use scoring::{ScoredPrediction, Scorer};
pub use service::{ErrorClass, PredictionError, PredictionResult, PredictionService};
pub use storage::AlertStore;
