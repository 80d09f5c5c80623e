//! Derived feature synthesis over cleaned core columns.
//!
//! Columns are appended in a fixed order and never overwrite a core column:
//! `_abs`, `_sq`, `_log` for every core column, pairwise `_minus_`/`_ratio_` over the
//! leading core columns, then the batch-relative `_iqr_flag` and `_p95_flag`.

use super::{FeatureSynthesisError, FeatureVector};
use tracing::debug;

/// Pairwise features are built over this many leading core columns.
pub const PAIRWISE_TOP_K: usize = 10;
/// Added to the denominator of ratio features.
pub const RATIO_EPSILON: f32 = 1e-5;
pub const IQR_MULTIPLIER: f64 = 1.5;
pub const P95_QUANTILE: f64 = 0.95;

/// Quantile with linear interpolation between closest ranks, over the non-missing values.
pub fn quantile(values: &[f32], q: f64) -> Option<f64> {
    let mut present: Vec<f64> = values
        .iter()
        .filter(|v| !v.is_nan())
        .map(|&v| f64::from(v))
        .collect();
    if present.is_empty() {
        return None;
    }
    present.sort_by(|a, b| a.total_cmp(b));
    let pos = q.clamp(0.0, 1.0) * (present.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    Some(present[lo] + (present[hi] - present[lo]) * frac)
}

fn flag(hit: bool) -> f32 {
    if hit {
        1.0
    } else {
        0.0
    }
}

fn iqr_flags(values: &[f32]) -> Vec<f32> {
    let (Some(q1), Some(q3)) = (quantile(values, 0.25), quantile(values, 0.75)) else {
        return vec![0.0; values.len()];
    };
    let iqr = q3 - q1;
    let lower = q1 - IQR_MULTIPLIER * iqr;
    let upper = q3 + IQR_MULTIPLIER * iqr;
    values
        .iter()
        .map(|&v| {
            let x = f64::from(v);
            flag(x < lower || x > upper)
        })
        .collect()
}

fn p95_flags(values: &[f32]) -> Vec<f32> {
    let Some(p95) = quantile(values, P95_QUANTILE) else {
        return vec![0.0; values.len()];
    };
    values.iter().map(|&v| flag(f64::from(v) >= p95)).collect()
}

fn map(values: &[f32], f: impl Fn(f32) -> f32) -> Vec<f32> {
    values.iter().map(|&v| f(v)).collect()
}

/// Number of derived columns produced for `n` core columns.
pub fn derived_width(n: usize) -> usize {
    let k = n.min(PAIRWISE_TOP_K);
    5 * n + k * (k - k.min(1))
}

/// Core columns followed by every derived column.
pub fn synthesize(core: &FeatureVector) -> Result<FeatureVector, FeatureSynthesisError> {
    if core.rows() == 0 {
        return Err(FeatureSynthesisError::EmptyBatch);
    }
    if core.width() < 2 {
        return Err(FeatureSynthesisError::TooFewColumns(core.width()));
    }

    let n = core.width();
    let columns = core.columns();
    let mut out = FeatureVector::with_capacity(core.rows(), n + derived_width(n));
    for c in columns {
        out.push(c.name.as_str(), c.values.clone())?;
    }

    for c in columns {
        out.push(format!("{}_abs", c.name), map(&c.values, f32::abs))?;
    }
    for c in columns {
        out.push(format!("{}_sq", c.name), map(&c.values, |x| x * x))?;
    }
    for c in columns {
        out.push(format!("{}_log", c.name), map(&c.values, |x| {
            if x.is_nan() {
                x
            } else {
                x.max(0.0).ln_1p()
            }
        }))?;
    }

    let top = &columns[..n.min(PAIRWISE_TOP_K)];
    for (i, c1) in top.iter().enumerate() {
        for c2 in &top[i + 1..] {
            let pairs = || c1.values.iter().zip(&c2.values);
            out.push(
                format!("{}_minus_{}", c1.name, c2.name),
                pairs().map(|(&a, &b)| a - b).collect(),
            )?;
            out.push(
                format!("{}_ratio_{}", c1.name, c2.name),
                pairs().map(|(&a, &b)| a / (b + RATIO_EPSILON)).collect(),
            )?;
        }
    }

    for c in columns {
        out.push(format!("{}_iqr_flag", c.name), iqr_flags(&c.values))?;
    }
    for c in columns {
        out.push(format!("{}_p95_flag", c.name), p95_flags(&c.values))?;
    }

    debug!(
        rows = out.rows(),
        core = n,
        derived = out.width() - n,
        width = out.width(),
        "derived features synthesized"
    );
    Ok(out)
}
