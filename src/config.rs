//! Service configuration. Only paths and operational knobs live here; the feature
//! pipeline itself is fixed by the shipped artifacts.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Where the training-time artifacts live
    pub artifacts: ArtifactPaths,
    /// Alert persistence for defect predictions
    pub alerts: AlertsConfig,
    /// NDJSON replay input
    pub replay: ReplayConfig,
    /// Logging
    pub log: LogConfig,
}

/// File layout of the artifact bundle. File names are relative to `dir`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactPaths {
    pub dir: PathBuf,
    pub core_features: String,
    pub full_features: String,
    pub statistics: String,
    pub scaler: String,
    pub classifier: String,
    pub threshold: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    pub enabled: bool,
    pub db_path: PathBuf,
    /// Sensors attached to each alert, ranked by model importance
    pub top_sensor_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// NDJSON file; stdin when absent
    pub input: Option<PathBuf>,
    /// Pause between records (0 = as fast as possible)
    pub interval_ms: u64,
    /// Records scored concurrently on the blocking pool
    pub max_in_flight: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub json: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            artifacts: ArtifactPaths::default(),
            alerts: AlertsConfig::default(),
            replay: ReplayConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Default for ArtifactPaths {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("models"),
            core_features: "core_features.json".to_string(),
            full_features: "full_features.json".to_string(),
            statistics: "feature_stats.json".to_string(),
            scaler: "scaler.json".to_string(),
            classifier: "classifier.json".to_string(),
            threshold: "threshold.json".to_string(),
        }
    }
}

impl ArtifactPaths {
    /// All files under one directory with the default names.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Self::default()
        }
    }

    pub fn core_features_path(&self) -> PathBuf {
        self.dir.join(&self.core_features)
    }

    pub fn full_features_path(&self) -> PathBuf {
        self.dir.join(&self.full_features)
    }

    pub fn statistics_path(&self) -> PathBuf {
        self.dir.join(&self.statistics)
    }

    pub fn scaler_path(&self) -> PathBuf {
        self.dir.join(&self.scaler)
    }

    pub fn classifier_path(&self) -> PathBuf {
        self.dir.join(&self.classifier)
    }

    pub fn threshold_path(&self) -> PathBuf {
        self.dir.join(&self.threshold)
    }
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            db_path: PathBuf::from(".sentinel/alerts.db"),
            top_sensor_count: 3,
        }
    }
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            input: None,
            interval_ms: 0,
            max_in_flight: 4,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: true,
        }
    }
}

impl ServiceConfig {
    /// Load from a JSON file. A missing file yields the defaults; a present but
    /// unreadable or malformed one is an error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"artifacts": {"dir": "/opt/models"}, "log": {"json": false}}"#)
            .unwrap();

        let c = ServiceConfig::load(&path).unwrap();
        assert_eq!(c.artifacts.dir, PathBuf::from("/opt/models"));
        assert_eq!(c.artifacts.scaler, "scaler.json");
        assert_eq!(c.log.level, "info");
        assert!(!c.log.json);
        assert_eq!(c.alerts.top_sensor_count, 3);
    }

    #[test]
    fn malformed_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            ServiceConfig::load(&path),
            Err(ConfigError::Parse { .. })
        ));
    }
}
