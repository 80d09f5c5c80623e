//! Training-time artifact bundle: feature lists, statistics, scaler, classifier, threshold.
//!
//! A bundle is validated as a whole when it is built. Any disagreement between two
//! artifacts is an [`ArtifactLoadError`], never a per-request failure.

mod store;

pub use store::{load_bundle, write_threshold, ArtifactStore, DEFAULT_THRESHOLD};

use crate::model::{rank_sensors, Classifier, ClassifierArtifact, Scaler};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArtifactLoadError {
    #[error("{name} artifact not found at {path}")]
    Missing { name: &'static str, path: PathBuf },
    #[error("failed to read {name} artifact: {source}")]
    Io {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed {name} artifact: {reason}")]
    Malformed { name: &'static str, reason: String },
    #[error("artifact mismatch: {0}")]
    Mismatch(String),
}

/// Training-time statistics of one core feature. Any field may be absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorStats {
    #[serde(default)]
    pub mean: Option<f64>,
    #[serde(default)]
    pub std: Option<f64>,
    #[serde(default)]
    pub median: Option<f64>,
}

impl SensorStats {
    pub fn new(mean: f64, std: f64, median: f64) -> Self {
        Self {
            mean: Some(mean),
            std: Some(std),
            median: Some(median),
        }
    }
}

pub type FeatureStatistics = HashMap<String, SensorStats>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdSource {
    Artifact,
    Default,
}

/// The complete, immutable contract between training and inference.
#[derive(Debug)]
pub struct ArtifactBundle {
    core_features: Vec<String>,
    full_features: Vec<String>,
    statistics: FeatureStatistics,
    scaler: Scaler,
    classifier: Classifier,
    threshold: f64,
    threshold_source: ThresholdSource,
    sensor_ranking: Vec<String>,
    fingerprint: Option<String>,
}

/// Loggable overview of a bundle.
#[derive(Debug, Clone, Serialize)]
pub struct BundleSummary {
    pub core_features: usize,
    pub full_features: usize,
    pub statistics: usize,
    pub scaler: &'static str,
    pub classifier: &'static str,
    pub threshold: f64,
    pub threshold_source: ThresholdSource,
    pub top_sensors: Vec<String>,
    pub fingerprint: Option<String>,
}

fn ensure_unique(name: &'static str, list: &[String]) -> Result<(), ArtifactLoadError> {
    if list.is_empty() {
        return Err(ArtifactLoadError::Malformed {
            name,
            reason: "feature list is empty".to_string(),
        });
    }
    let mut seen = HashSet::with_capacity(list.len());
    if let Some(dup) = list.iter().find(|f| !seen.insert(f.as_str())) {
        return Err(ArtifactLoadError::Malformed {
            name,
            reason: format!("duplicate feature {dup:?}"),
        });
    }
    Ok(())
}

pub(crate) fn check_threshold(value: f64) -> Result<f64, String> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(format!("threshold {value} is not a finite number in [0, 1]"))
    }
}

impl ArtifactBundle {
    /// Assemble and cross-validate a bundle from already-parsed artifacts.
    pub fn from_parts(
        core_features: Vec<String>,
        full_features: Vec<String>,
        statistics: FeatureStatistics,
        scaler: Scaler,
        classifier: ClassifierArtifact,
        threshold: f64,
    ) -> Result<Self, ArtifactLoadError> {
        Self::assemble(
            core_features,
            full_features,
            statistics,
            scaler,
            classifier,
            threshold,
            ThresholdSource::Artifact,
            None,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn assemble(
        core_features: Vec<String>,
        full_features: Vec<String>,
        statistics: FeatureStatistics,
        scaler: Scaler,
        classifier: ClassifierArtifact,
        threshold: f64,
        threshold_source: ThresholdSource,
        fingerprint: Option<String>,
    ) -> Result<Self, ArtifactLoadError> {
        ensure_unique("core feature list", &core_features)?;
        ensure_unique("full feature list", &full_features)?;

        for (name, s) in &statistics {
            if let Some(std) = s.std {
                if std < 0.0 || std.is_nan() {
                    return Err(ArtifactLoadError::Malformed {
                        name: "feature statistics",
                        reason: format!("negative std for {name}"),
                    });
                }
            }
        }
        let unstated: Vec<&str> = core_features
            .iter()
            .filter(|f| !statistics.contains_key(f.as_str()))
            .map(String::as_str)
            .collect();
        if !unstated.is_empty() {
            tracing::warn!(
                count = unstated.len(),
                sample = ?&unstated[..unstated.len().min(5)],
                "core features without stored statistics; batch statistics will be used"
            );
        }

        scaler
            .validate()
            .map_err(|reason| ArtifactLoadError::Malformed {
                name: "scaler",
                reason,
            })?;
        if scaler.n_features() != full_features.len() {
            return Err(ArtifactLoadError::Mismatch(format!(
                "scaler was fit on {} columns, full feature list has {}",
                scaler.n_features(),
                full_features.len()
            )));
        }

        classifier
            .validate(full_features.len())
            .map_err(ArtifactLoadError::Mismatch)?;
        let classifier = Classifier::from_artifact(classifier);

        let threshold = check_threshold(threshold).map_err(|reason| ArtifactLoadError::Malformed {
            name: "threshold",
            reason,
        })?;

        let sensor_ranking = rank_sensors(&full_features, &classifier.feature_importances());

        Ok(Self {
            core_features,
            full_features,
            statistics,
            scaler,
            classifier,
            threshold,
            threshold_source,
            sensor_ranking,
            fingerprint,
        })
    }

    pub fn core_features(&self) -> &[String] {
        &self.core_features
    }

    pub fn full_features(&self) -> &[String] {
        &self.full_features
    }

    pub fn statistics(&self) -> &FeatureStatistics {
        &self.statistics
    }

    pub fn scaler(&self) -> &Scaler {
        &self.scaler
    }

    /// Swap the scaler without re-running cross-validation.
    #[cfg(test)]
    pub(crate) fn with_scaler_unchecked(mut self, scaler: Scaler) -> Self {
        self.scaler = scaler;
        self
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn threshold_source(&self) -> ThresholdSource {
        self.threshold_source
    }

    /// Sensors ordered by attributed model importance.
    pub fn top_sensors(&self, k: usize) -> &[String] {
        &self.sensor_ranking[..k.min(self.sensor_ranking.len())]
    }

    pub fn fingerprint(&self) -> Option<&str> {
        self.fingerprint.as_deref()
    }

    pub fn summary(&self) -> BundleSummary {
        BundleSummary {
            core_features: self.core_features.len(),
            full_features: self.full_features.len(),
            statistics: self.statistics.len(),
            scaler: self.scaler.kind(),
            classifier: self.classifier.kind().as_str(),
            threshold: self.threshold,
            threshold_source: self.threshold_source,
            top_sensors: self.top_sensors(3).to_vec(),
            fingerprint: self.fingerprint.clone(),
        }
    }
}
