//! Core selection, then mean imputation and z-score dampening against training statistics.

use super::{FeatureSynthesisError, FeatureVector, MISSING};
use crate::artifacts::FeatureStatistics;
use crate::record::SensorRecord;
use tracing::debug;

/// Readings further than this many training standard deviations from the mean are
/// replaced by the training median.
pub const Z_THRESHOLD: f64 = 3.0;

/// What cleaning changed, for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleaningReport {
    pub missing_before: usize,
    pub missing_after: usize,
    pub dampened: usize,
}

fn narrow(value: Option<f64>) -> f32 {
    match value {
        Some(v) if v.is_finite() => {
            let x = v as f32;
            if x.is_finite() {
                x
            } else {
                MISSING
            }
        }
        _ => MISSING,
    }
}

/// Project records onto the core list, in core-list order. Absent and non-finite
/// readings become missing.
pub fn select_core(records: &[SensorRecord], core: &[String]) -> Result<FeatureVector, FeatureSynthesisError> {
    if records.is_empty() {
        return Err(FeatureSynthesisError::EmptyBatch);
    }
    let mut vector = FeatureVector::with_capacity(records.len(), core.len());
    for name in core {
        let values = records.iter().map(|r| narrow(r.get(name))).collect();
        vector.push(name.as_str(), values)?;
    }

    let cells = vector.rows() * vector.width();
    let missing = vector.missing_count();
    debug!(
        rows = vector.rows(),
        width = vector.width(),
        missing,
        nan_ratio = if cells == 0 { 0.0 } else { missing as f64 / cells as f64 },
        "core features selected"
    );
    Ok(vector)
}

fn batch_mean(values: &[f32]) -> Option<f64> {
    let (sum, n) = values
        .iter()
        .filter(|v| !v.is_nan())
        .fold((0.0f64, 0usize), |(s, n), &v| (s + f64::from(v), n + 1));
    (n > 0).then(|| sum / n as f64)
}

fn batch_median(values: &[f32]) -> Option<f64> {
    super::quantile(values, 0.5)
}

fn usable(v: Option<f64>) -> Option<f64> {
    v.filter(|x| x.is_finite())
}

/// Fill missing cells with the stored mean and pull outliers back to the stored median.
///
/// Falls back to batch statistics when a stored mean or median is absent. Dampening is
/// skipped for a column when its stored std is absent or zero, or when it has no
/// stored mean to measure from.
pub fn impute_and_dampen(
    vector: &mut FeatureVector,
    core: &[String],
    stats: &FeatureStatistics,
) -> Result<CleaningReport, FeatureSynthesisError> {
    let matches = vector.width() == core.len() && vector.names().zip(core).all(|(a, b)| a == b);
    if !matches {
        return Err(FeatureSynthesisError::WidthMismatch {
            expected: core.len(),
            actual: vector.width(),
        });
    }

    let mut report = CleaningReport {
        missing_before: vector.missing_count(),
        ..CleaningReport::default()
    };

    for column in vector.columns_mut() {
        let stored = stats.get(&column.name).copied().unwrap_or_default();

        if column.values.iter().any(|v| v.is_nan()) {
            if let Some(fill) = usable(stored.mean).or_else(|| batch_mean(&column.values)) {
                let fill = fill as f32;
                for v in column.values.iter_mut().filter(|v| v.is_nan()) {
                    *v = fill;
                }
            }
        }

        let (Some(mean), Some(std)) = (usable(stored.mean), usable(stored.std)) else {
            continue;
        };
        if std == 0.0 {
            continue;
        }
        let outliers: Vec<usize> = column
            .values
            .iter()
            .enumerate()
            .filter(|&(_, &v)| ((f64::from(v) - mean) / std).abs() > Z_THRESHOLD)
            .map(|(i, _)| i)
            .collect();
        if outliers.is_empty() {
            continue;
        }
        let Some(median) = usable(stored.median).or_else(|| batch_median(&column.values)) else {
            continue;
        };
        let median = median as f32;
        for &i in &outliers {
            column.values[i] = median;
        }
        report.dampened += outliers.len();
    }

    report.missing_after = vector.missing_count();
    debug!(
        missing_before = report.missing_before,
        missing_after = report.missing_after,
        dampened = report.dampened,
        z_threshold = Z_THRESHOLD,
        "core features imputed and dampened"
    );
    Ok(report)
}
