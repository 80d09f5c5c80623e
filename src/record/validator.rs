//! Payload validation: envelope unwrapping, sensor-key filtering, numeric coercion.

use super::SensorRecord;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

/// Namespace token every sensor key starts with.
pub const SENSOR_PREFIX: &str = "sensor_";

/// Keys under which a payload may be wrapped one level deep.
pub const ENVELOPE_KEYS: [&str; 2] = ["payload", "sensors"];

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("record must be a JSON object, got {0}")]
    MalformedRecord(&'static str),
    #[error("no sensor readings found (expected keys starting with {prefix:?})")]
    NoSensorData { prefix: &'static str },
    #[error("invalid value for {key}: {detail}")]
    InvalidSensorValue { key: String, detail: String },
}

/// A JSON value as seen by coercion.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue<'a> {
    Number(f64),
    Null,
    Text(&'a str),
    Other(&'static str),
}

impl<'a> RawValue<'a> {
    pub fn classify(value: &'a Value) -> Self {
        match value {
            Value::Null => RawValue::Null,
            Value::Number(n) => match n.as_f64() {
                Some(f) => RawValue::Number(f),
                None => RawValue::Other("number"),
            },
            Value::String(s) => RawValue::Text(s),
            Value::Bool(_) => RawValue::Other("boolean"),
            Value::Array(_) => RawValue::Other("array"),
            Value::Object(_) => RawValue::Other("object"),
        }
    }

    /// Coerce to a reading. `Ok(None)` is a missing reading.
    fn coerce(&self, key: &str) -> Result<Option<f64>, ValidationError> {
        match *self {
            RawValue::Null => Ok(None),
            RawValue::Number(f) => Ok(Some(f)),
            RawValue::Text(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return Ok(None);
                }
                trimmed
                    .parse::<f64>()
                    .map(Some)
                    .map_err(|_| ValidationError::InvalidSensorValue {
                        key: key.to_string(),
                        detail: format!("not a number: {s:?}"),
                    })
            }
            RawValue::Other(kind) => Err(ValidationError::InvalidSensorValue {
                key: key.to_string(),
                detail: format!("unsupported type {kind}"),
            }),
        }
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RecordValidator;

impl RecordValidator {
    pub fn new() -> Self {
        Self
    }

    /// Parse an untyped payload into a [`SensorRecord`].
    pub fn parse(&self, raw: &Value) -> Result<SensorRecord, ValidationError> {
        let Value::Object(map) = raw else {
            return Err(ValidationError::MalformedRecord(kind_of(raw)));
        };
        self.parse_map(map)
    }

    pub fn parse_map(&self, map: &Map<String, Value>) -> Result<SensorRecord, ValidationError> {
        let data = unwrap_envelope(map);

        let mut readings = BTreeMap::new();
        for (key, value) in data.iter().filter(|(k, _)| k.starts_with(SENSOR_PREFIX)) {
            let reading = RawValue::classify(value).coerce(key)?;
            readings.insert(key.clone(), reading);
        }

        if readings.is_empty() {
            return Err(ValidationError::NoSensorData {
                prefix: SENSOR_PREFIX,
            });
        }

        let record = SensorRecord::new(readings);
        tracing::debug!(
            sensors = record.len(),
            missing_ratio = record.missing_ratio(),
            "record parsed"
        );
        Ok(record)
    }
}

fn unwrap_envelope(map: &Map<String, Value>) -> &Map<String, Value> {
    ENVELOPE_KEYS
        .iter()
        .find_map(|k| match map.get(*k) {
            Some(Value::Object(inner)) => Some(inner),
            _ => None,
        })
        .unwrap_or(map)
}
