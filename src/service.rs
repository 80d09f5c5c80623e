//! Prediction service: validation → features → scoring, the only surface callers use.

use crate::artifacts::{ArtifactBundle, ArtifactLoadError, ArtifactStore};
use crate::features::{FeatureBuilder, FeatureSynthesisError};
use crate::record::{RecordValidator, SensorRecord, ValidationError};
use crate::scoring::{ScoredPrediction, Scorer, ScoringError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

pub const DEFAULT_TOP_SENSORS: usize = 3;

const UNAVAILABLE_MESSAGE: &str = "prediction service unavailable";

#[derive(Debug, Error)]
pub enum PredictionError {
    #[error(transparent)]
    Input(#[from] ValidationError),
    #[error(transparent)]
    Artifact(#[from] ArtifactLoadError),
    #[error(transparent)]
    Features(#[from] FeatureSynthesisError),
    #[error(transparent)]
    Scoring(#[from] ScoringError),
}

/// Who is at fault: the caller, or the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    BadInput,
    Unavailable,
}

impl PredictionError {
    pub fn class(&self) -> ErrorClass {
        match self {
            PredictionError::Input(_) => ErrorClass::BadInput,
            _ => ErrorClass::Unavailable,
        }
    }

    /// Message safe to return to a caller. Service-side failures stay opaque so no
    /// artifact path or internal shape leaks.
    pub fn public_message(&self) -> String {
        match self {
            PredictionError::Input(e) => e.to_string(),
            _ => UNAVAILABLE_MESSAGE.to_string(),
        }
    }
}

/// Result returned for one inspection record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub probability: f64,
    pub predicted_label: u8,
    pub threshold: f64,
    pub top_sensors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_fingerprint: Option<String>,
}

pub struct PredictionService {
    bundle: Arc<ArtifactBundle>,
    validator: RecordValidator,
    top_sensors: usize,
}

impl PredictionService {
    pub fn new(bundle: Arc<ArtifactBundle>) -> Self {
        Self {
            bundle,
            validator: RecordValidator::new(),
            top_sensors: DEFAULT_TOP_SENSORS,
        }
    }

    /// Build from a store, loading the bundle if it is not loaded yet.
    pub fn from_store(store: &ArtifactStore) -> Result<Self, PredictionError> {
        Ok(Self::new(store.load()?))
    }

    pub fn with_top_sensors(mut self, k: usize) -> Self {
        self.top_sensors = k;
        self
    }

    pub fn bundle(&self) -> &Arc<ArtifactBundle> {
        &self.bundle
    }

    fn result(&self, scored: ScoredPrediction) -> PredictionResult {
        PredictionResult {
            probability: scored.probability,
            predicted_label: scored.label,
            threshold: scored.threshold,
            top_sensors: self.bundle.top_sensors(self.top_sensors).to_vec(),
            model_fingerprint: self.bundle.fingerprint().map(str::to_string),
        }
    }

    /// Parse a raw record into validated sensor readings.
    pub fn parse(&self, raw: &Value) -> Result<SensorRecord, PredictionError> {
        self.validator.parse(raw).map_err(|e| {
            debug!(error = %e, "record rejected");
            PredictionError::from(e)
        })
    }

    /// Score one raw record.
    pub fn predict(&self, raw: &Value) -> Result<PredictionResult, PredictionError> {
        let record = self.parse(raw)?;
        self.predict_record(&record)
    }

    /// Score one already validated record.
    pub fn predict_record(&self, record: &SensorRecord) -> Result<PredictionResult, PredictionError> {
        let vector = FeatureBuilder::from_bundle(&self.bundle).build(record)?;
        let scored = Scorer::new(&self.bundle).score(&vector)?;
        info!(
            probability = scored.probability,
            label = scored.label,
            threshold = scored.threshold,
            sensors = record.len(),
            "prediction"
        );
        Ok(self.result(scored))
    }

    /// Score records as one batch. Quantile flags are computed across the batch, so a
    /// row may score differently here than on its own.
    pub fn predict_batch(&self, raws: &[Value]) -> Result<Vec<PredictionResult>, PredictionError> {
        let records = raws
            .iter()
            .map(|r| self.parse(r))
            .collect::<Result<Vec<_>, _>>()?;
        let vector = FeatureBuilder::from_bundle(&self.bundle).build_batch(&records)?;
        let scored = Scorer::new(&self.bundle).score_batch(&vector)?;
        let positives = scored.iter().filter(|p| p.label == 1).count();
        info!(rows = scored.len(), positives, "batch prediction");
        Ok(scored.into_iter().map(|s| self.result(s)).collect())
    }
}
