//! Fitted feature scalers. Parameters come from training; NaN passes through untouched.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Scaler {
    /// (x - mean) / scale
    Standard { mean: Vec<f64>, scale: Vec<f64> },
    /// x * scale + min
    MinMax { min: Vec<f64>, scale: Vec<f64> },
    /// (x - center) / scale
    Robust { center: Vec<f64>, scale: Vec<f64> },
}

impl Scaler {
    /// Number of columns the scaler was fit on.
    pub fn n_features(&self) -> usize {
        match self {
            Scaler::Standard { scale, .. }
            | Scaler::MinMax { scale, .. }
            | Scaler::Robust { scale, .. } => scale.len(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Scaler::Standard { .. } => "standard",
            Scaler::MinMax { .. } => "min_max",
            Scaler::Robust { .. } => "robust",
        }
    }

    fn params(&self) -> (&[f64], &[f64]) {
        match self {
            Scaler::Standard { mean, scale } => (mean, scale),
            Scaler::MinMax { min, scale } => (min, scale),
            Scaler::Robust { center, scale } => (center, scale),
        }
    }

    /// Structural check run once at artifact load.
    pub fn validate(&self) -> Result<(), String> {
        let (offset, scale) = self.params();
        if scale.is_empty() {
            return Err("scaler has no columns".to_string());
        }
        if offset.len() != scale.len() {
            return Err(format!(
                "scaler parameter lengths differ ({} vs {})",
                offset.len(),
                scale.len()
            ));
        }
        if let Some(i) = offset
            .iter()
            .chain(scale.iter())
            .position(|v| !v.is_finite())
        {
            return Err(format!("scaler parameter {i} is not finite"));
        }
        Ok(())
    }

    /// Forward transform. Callers guarantee `x.ncols() == self.n_features()`.
    pub fn transform(&self, x: &Array2<f32>) -> Array2<f32> {
        let (offset, scale) = self.params();
        let mut out = x.clone();
        for mut row in out.rows_mut() {
            for (j, v) in row.iter_mut().enumerate() {
                *v = self.apply(f64::from(*v), offset[j], scale[j]) as f32;
            }
        }
        out
    }

    fn apply(&self, v: f64, offset: f64, scale: f64) -> f64 {
        match self {
            Scaler::MinMax { .. } => v * scale + offset,
            Scaler::Standard { .. } | Scaler::Robust { .. } => {
                // zero-variance columns were fit with scale 1
                let s = if scale == 0.0 { 1.0 } else { scale };
                (v - offset) / s
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn standard_transform_passes_nan_through() {
        let s = Scaler::Standard {
            mean: vec![1.0, 2.0, 0.0],
            scale: vec![2.0, 0.0, 1.0],
        };
        let out = s.transform(&array![[3.0f32, 5.0, f32::NAN]]);
        assert_eq!(out[[0, 0]], 1.0);
        assert_eq!(out[[0, 1]], 3.0);
        assert!(out[[0, 2]].is_nan());
    }

    #[test]
    fn min_max_transform() {
        let s = Scaler::MinMax {
            min: vec![-1.0],
            scale: vec![0.5],
        };
        let out = s.transform(&array![[4.0f32], [0.0]]);
        assert_eq!(out[[0, 0]], 1.0);
        assert_eq!(out[[1, 0]], -1.0);
    }

    #[test]
    fn parses_tagged_json() {
        let s: Scaler =
            serde_json::from_str(r#"{"kind": "robust", "center": [0.5], "scale": [2.0]}"#).unwrap();
        assert_eq!(s.n_features(), 1);
        assert_eq!(s.kind(), "robust");
        assert!(s.validate().is_ok());
    }

    #[test]
    fn mismatched_lengths_are_invalid() {
        let s = Scaler::Standard {
            mean: vec![0.0],
            scale: vec![1.0, 1.0],
        };
        assert!(s.validate().is_err());
    }
}
