//! Feature construction: sensor records → cleaned core columns → derived columns.

mod derived;
mod pipeline;
mod selection;

pub use derived::{derived_width, quantile, synthesize, IQR_MULTIPLIER, P95_QUANTILE, PAIRWISE_TOP_K, RATIO_EPSILON};
pub use pipeline::{FeatureBuilder, FeaturePipeline};
pub use selection::{impute_and_dampen, select_core, CleaningReport, Z_THRESHOLD};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Marker for a missing value in any feature column.
pub const MISSING: f32 = f32::NAN;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FeatureSynthesisError {
    #[error("empty batch: at least one record is required")]
    EmptyBatch,
    #[error("derived features need at least 2 core columns, got {0}")]
    TooFewColumns(usize),
    #[error("core columns do not match the core feature list: expected {expected}, got {actual}")]
    WidthMismatch { expected: usize, actual: usize },
    #[error("column {name} has {actual} rows, batch has {expected}")]
    RaggedColumn {
        name: String,
        expected: usize,
        actual: usize,
    },
}

/// One named column, one value per batch row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureColumn {
    pub name: String,
    pub values: Vec<f32>,
}

/// Ordered named columns over a batch of rows. A single request is a one-row batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    rows: usize,
    columns: Vec<FeatureColumn>,
}

impl FeatureVector {
    pub fn new(rows: usize) -> Self {
        Self {
            rows,
            columns: Vec::new(),
        }
    }

    pub fn with_capacity(rows: usize, columns: usize) -> Self {
        Self {
            rows,
            columns: Vec::with_capacity(columns),
        }
    }

    /// Append a column. Existing columns are never overwritten.
    pub fn push(&mut self, name: impl Into<String>, values: Vec<f32>) -> Result<(), FeatureSynthesisError> {
        let name = name.into();
        if values.len() != self.rows {
            return Err(FeatureSynthesisError::RaggedColumn {
                name,
                expected: self.rows,
                actual: values.len(),
            });
        }
        self.columns.push(FeatureColumn { name, values });
        Ok(())
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[FeatureColumn] {
        &self.columns
    }

    pub(crate) fn columns_mut(&mut self) -> &mut [FeatureColumn] {
        &mut self.columns
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// First column with this name.
    pub fn column(&self, name: &str) -> Option<&[f32]> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.values.as_slice())
    }

    /// Value at (`row`, `name`), if both exist.
    pub fn value(&self, row: usize, name: &str) -> Option<f32> {
        self.column(name).and_then(|v| v.get(row).copied())
    }

    /// Count of missing cells across the whole vector.
    pub fn missing_count(&self) -> usize {
        self.columns
            .iter()
            .map(|c| c.values.iter().filter(|v| v.is_nan()).count())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_rejects_ragged_columns() {
        let mut v = FeatureVector::new(2);
        v.push("sensor_001", vec![1.0, 2.0]).unwrap();
        let err = v.push("sensor_002", vec![1.0]).unwrap_err();
        assert!(matches!(err, FeatureSynthesisError::RaggedColumn { expected: 2, actual: 1, .. }));
        assert_eq!(v.width(), 1);
        assert_eq!(v.value(1, "sensor_001"), Some(2.0));
        assert_eq!(v.value(0, "sensor_002"), None);
    }

    #[test]
    fn missing_cells_are_counted() {
        let mut v = FeatureVector::new(3);
        v.push("a", vec![MISSING, 1.0, MISSING]).unwrap();
        v.push("b", vec![0.0, MISSING, 2.0]).unwrap();
        assert_eq!(v.missing_count(), 3);
    }
}
