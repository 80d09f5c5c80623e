//! Loads the artifact bundle from disk once and hands out shared handles to it.

use super::{
    check_threshold, ArtifactBundle, ArtifactLoadError, FeatureStatistics, ThresholdSource,
};
use crate::config::ArtifactPaths;
use crate::model::{ClassifierArtifact, Scaler};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::{Arc, OnceLock};
use tracing::{info, warn};

/// Used when no threshold artifact ships with the bundle.
pub const DEFAULT_THRESHOLD: f64 = 0.5;

/// Load-once cache around [`load_bundle`].
pub struct ArtifactStore {
    paths: ArtifactPaths,
    cache: OnceLock<Arc<ArtifactBundle>>,
}

impl ArtifactStore {
    pub fn new(paths: ArtifactPaths) -> Self {
        Self {
            paths,
            cache: OnceLock::new(),
        }
    }

    pub fn paths(&self) -> &ArtifactPaths {
        &self.paths
    }

    pub fn is_loaded(&self) -> bool {
        self.cache.get().is_some()
    }

    /// Load the bundle on first call; later calls return the cached handle. A failed
    /// load is not cached, so a corrected artifact directory can be retried.
    pub fn load(&self) -> Result<Arc<ArtifactBundle>, ArtifactLoadError> {
        if let Some(bundle) = self.cache.get() {
            return Ok(Arc::clone(bundle));
        }
        let bundle = Arc::new(load_bundle(&self.paths)?);
        // a concurrent loader may have won; keep whichever landed first
        let _ = self.cache.set(Arc::clone(&bundle));
        Ok(self.cache.get().map(Arc::clone).unwrap_or(bundle))
    }
}

struct Fingerprint(Sha256);

impl Fingerprint {
    fn new() -> Self {
        Self(Sha256::new())
    }

    fn add(&mut self, name: &str, bytes: &[u8]) {
        self.0.update(name.as_bytes());
        self.0.update((bytes.len() as u64).to_le_bytes());
        self.0.update(bytes);
    }

    fn finish(self) -> String {
        hex::encode(self.0.finalize())
    }
}

fn read_artifact(
    name: &'static str,
    path: &Path,
    fingerprint: &mut Fingerprint,
) -> Result<Value, ArtifactLoadError> {
    if !path.exists() {
        return Err(ArtifactLoadError::Missing {
            name,
            path: path.to_path_buf(),
        });
    }
    let bytes = std::fs::read(path).map_err(|source| ArtifactLoadError::Io { name, source })?;
    fingerprint.add(name, &bytes);
    serde_json::from_slice(&bytes).map_err(|e| ArtifactLoadError::Malformed {
        name,
        reason: e.to_string(),
    })
}

fn parse_as<T: serde::de::DeserializeOwned>(
    name: &'static str,
    value: Value,
) -> Result<T, ArtifactLoadError> {
    serde_json::from_value(value).map_err(|e| ArtifactLoadError::Malformed {
        name,
        reason: e.to_string(),
    })
}

/// Accepts a bare list or an object carrying the list under `features` or
/// `feature_list`.
fn parse_feature_list(name: &'static str, value: Value) -> Result<Vec<String>, ArtifactLoadError> {
    let list = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map
            .remove("features")
            .or_else(|| map.remove("feature_list"))
        {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(ArtifactLoadError::Malformed {
                    name,
                    reason: "expected a list under \"features\" or \"feature_list\"".to_string(),
                })
            }
        },
        _ => {
            return Err(ArtifactLoadError::Malformed {
                name,
                reason: "expected a list of feature names".to_string(),
            })
        }
    };
    list.into_iter()
        .enumerate()
        .map(|(i, item)| match item {
            Value::String(s) => Ok(s),
            other => Err(ArtifactLoadError::Malformed {
                name,
                reason: format!("entry {i} is not a string: {other}"),
            }),
        })
        .collect()
}

fn parse_threshold(value: &Value) -> Result<f64, ArtifactLoadError> {
    let raw = match value {
        Value::Number(n) => n.as_f64(),
        Value::Object(map) => map.get("threshold_value").and_then(Value::as_f64),
        _ => None,
    };
    let raw = raw.ok_or_else(|| ArtifactLoadError::Malformed {
        name: "threshold",
        reason: "expected a number or {\"threshold_value\": <number>}".to_string(),
    })?;
    check_threshold(raw).map_err(|reason| ArtifactLoadError::Malformed {
        name: "threshold",
        reason,
    })
}

fn load_threshold(
    path: &Path,
    fingerprint: &mut Fingerprint,
) -> Result<(f64, ThresholdSource), ArtifactLoadError> {
    if !path.exists() {
        warn!(
            default = DEFAULT_THRESHOLD,
            "threshold artifact not found; using default threshold"
        );
        fingerprint.add("threshold", b"default");
        return Ok((DEFAULT_THRESHOLD, ThresholdSource::Default));
    }
    let value = read_artifact("threshold", path, fingerprint)?;
    Ok((parse_threshold(&value)?, ThresholdSource::Artifact))
}

/// Read, parse and cross-validate every artifact under `paths`.
pub fn load_bundle(paths: &ArtifactPaths) -> Result<ArtifactBundle, ArtifactLoadError> {
    let mut fingerprint = Fingerprint::new();

    let core = parse_feature_list(
        "core feature list",
        read_artifact("core feature list", &paths.core_features_path(), &mut fingerprint)?,
    )?;
    let full = parse_feature_list(
        "full feature list",
        read_artifact("full feature list", &paths.full_features_path(), &mut fingerprint)?,
    )?;
    let statistics: FeatureStatistics = parse_as(
        "feature statistics",
        read_artifact("feature statistics", &paths.statistics_path(), &mut fingerprint)?,
    )?;
    let scaler: Scaler = parse_as(
        "scaler",
        read_artifact("scaler", &paths.scaler_path(), &mut fingerprint)?,
    )?;
    let classifier: ClassifierArtifact = parse_as(
        "classifier",
        read_artifact("classifier", &paths.classifier_path(), &mut fingerprint)?,
    )?;
    let (threshold, threshold_source) = load_threshold(&paths.threshold_path(), &mut fingerprint)?;

    let bundle = ArtifactBundle::assemble(
        core,
        full,
        statistics,
        scaler,
        classifier,
        threshold,
        threshold_source,
        Some(fingerprint.finish()),
    )?;

    let summary = bundle.summary();
    info!(
        core_features = summary.core_features,
        full_features = summary.full_features,
        scaler = summary.scaler,
        classifier = summary.classifier,
        threshold = summary.threshold,
        threshold_source = ?summary.threshold_source,
        fingerprint = summary.fingerprint.as_deref().unwrap_or(""),
        "artifacts loaded"
    );
    Ok(bundle)
}

/// Persist a tuned decision threshold. Loaded bundles are immutable, so the new value
/// applies from the next load.
pub fn write_threshold(path: &Path, value: f64) -> Result<(), ArtifactLoadError> {
    let value = check_threshold(value).map_err(|reason| ArtifactLoadError::Malformed {
        name: "threshold",
        reason,
    })?;
    let body = serde_json::to_string_pretty(&serde_json::json!({ "threshold_value": value }))
        .map_err(|e| ArtifactLoadError::Malformed {
            name: "threshold",
            reason: e.to_string(),
        })?;
    std::fs::write(path, body).map_err(|source| ArtifactLoadError::Io {
        name: "threshold",
        source,
    })?;
    info!(threshold = value, "threshold written");
    Ok(())
}
