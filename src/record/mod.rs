//! Sensor records: untyped request payloads parsed into named numeric readings.

mod validator;

pub use validator::{RawValue, RecordValidator, ValidationError, ENVELOPE_KEYS, SENSOR_PREFIX};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Readings for one produced unit. `None` marks a missing reading, never zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorRecord {
    readings: BTreeMap<String, Option<f64>>,
}

impl SensorRecord {
    pub fn new(readings: BTreeMap<String, Option<f64>>) -> Self {
        Self { readings }
    }

    /// Reading for `key`; `None` when the key is absent or its value is missing.
    pub fn get(&self, key: &str) -> Option<f64> {
        self.readings.get(key).copied().flatten()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.readings.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.readings.keys().map(String::as_str)
    }

    /// Fraction of keys whose reading is missing.
    pub fn missing_ratio(&self) -> f64 {
        if self.readings.is_empty() {
            return 0.0;
        }
        let missing = self.readings.values().filter(|v| v.is_none()).count();
        missing as f64 / self.readings.len() as f64
    }
}

impl<K: Into<String>> FromIterator<(K, Option<f64>)> for SensorRecord {
    fn from_iter<I: IntoIterator<Item = (K, Option<f64>)>>(iter: I) -> Self {
        Self {
            readings: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}
