//! Combines the scaled, aligned feature row with the classifier and the decision threshold.

use crate::artifacts::ArtifactBundle;
use crate::features::{FeatureVector, MISSING};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ScoringError {
    #[error("aligned feature count {actual} does not match the scaler width {expected}")]
    WidthMismatch { expected: usize, actual: usize },
    #[error("classifier produced a non-finite output ({value}) for row {row}")]
    NonFinite { row: usize, value: f64 },
    #[error("expected a single-row feature vector, got {0} rows")]
    NotSingleRow(usize),
}

/// Probability, label and the threshold that produced the label.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoredPrediction {
    pub probability: f64,
    pub label: u8,
    pub threshold: f64,
}

impl ScoredPrediction {
    /// Label is 1 iff `probability >= threshold`, inclusive at equality.
    pub fn from_probability(probability: f64, threshold: f64) -> Self {
        Self {
            probability,
            label: u8::from(probability >= threshold),
            threshold,
        }
    }
}

/// A feature matrix reindexed to the full feature list.
#[derive(Debug, Clone)]
pub struct Alignment {
    pub matrix: Array2<f32>,
    /// Full-list names the built vector did not contain; filled with missing.
    pub missing: Vec<String>,
    /// Built columns that are not in the full list.
    pub dropped: usize,
}

/// Reindex `vector` to exactly `full` by name. Absent names are filled with missing
/// values and reported, extra built columns are dropped.
pub fn align(vector: &FeatureVector, full: &[String]) -> Alignment {
    let mut by_name: HashMap<&str, &[f32]> = HashMap::with_capacity(vector.width());
    for c in vector.columns() {
        by_name.entry(c.name.as_str()).or_insert(c.values.as_slice());
    }

    let rows = vector.rows();
    let mut matrix = Array2::<f32>::from_elem((rows, full.len()), MISSING);
    let mut missing = Vec::new();
    let mut used = 0usize;
    for (j, name) in full.iter().enumerate() {
        match by_name.get(name.as_str()) {
            Some(values) => {
                used += 1;
                for (i, &v) in values.iter().enumerate() {
                    matrix[[i, j]] = v;
                }
            }
            None => missing.push(name.clone()),
        }
    }

    Alignment {
        matrix,
        missing,
        dropped: by_name.len() - used,
    }
}

/// Scores feature vectors against one artifact bundle.
pub struct Scorer<'a> {
    bundle: &'a ArtifactBundle,
}

impl<'a> Scorer<'a> {
    pub fn new(bundle: &'a ArtifactBundle) -> Self {
        Self { bundle }
    }

    /// Score every row of `vector`, in row order.
    pub fn score_batch(&self, vector: &FeatureVector) -> Result<Vec<ScoredPrediction>, ScoringError> {
        let full = self.bundle.full_features();
        let aligned = align(vector, full);
        if !aligned.missing.is_empty() {
            warn!(
                missing = aligned.missing.len(),
                sample = ?&aligned.missing[..aligned.missing.len().min(5)],
                "built features lack columns of the trained layout; filling with missing values"
            );
        }

        let scaler = self.bundle.scaler();
        let width = aligned.matrix.ncols();
        if width != scaler.n_features() {
            return Err(ScoringError::WidthMismatch {
                expected: scaler.n_features(),
                actual: width,
            });
        }
        let scaled = scaler.transform(&aligned.matrix);

        let classifier = self.bundle.classifier();
        let threshold = self.bundle.threshold();
        let mut out = Vec::with_capacity(scaled.nrows());
        for (row, x) in scaled.outer_iter().enumerate() {
            let probability = classifier.positive_probability(x);
            if !probability.is_finite() {
                return Err(ScoringError::NonFinite {
                    row,
                    value: probability,
                });
            }
            out.push(ScoredPrediction::from_probability(probability, threshold));
        }

        debug!(
            rows = out.len(),
            width,
            dropped = aligned.dropped,
            classifier = classifier.kind().as_str(),
            "feature rows scored"
        );
        Ok(out)
    }

    /// Score a one-row vector.
    pub fn score(&self, vector: &FeatureVector) -> Result<ScoredPrediction, ScoringError> {
        if vector.rows() != 1 {
            return Err(ScoringError::NotSingleRow(vector.rows()));
        }
        self.score_batch(vector)?
            .pop()
            .ok_or(ScoringError::NotSingleRow(0))
    }

    pub fn bundle(&self) -> &ArtifactBundle {
        self.bundle
    }
}

/// Score a one-row vector against `bundle`.
pub fn score(vector: &FeatureVector, bundle: &ArtifactBundle) -> Result<ScoredPrediction, ScoringError> {
    Scorer::new(bundle).score(vector)
}
