//! Linear classifiers: decision = coef · x + intercept.

use super::classifier::{
    logistic, LabelOnlyClassifier, Model, ProbabilisticClassifier, ScoringClassifier,
};
use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};

/// Which output the fitted model exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinearLink {
    /// Logistic regression: calibrated probability
    Logistic,
    /// Margin classifier: decision score only
    Identity,
    /// Perceptron-style: hard label only
    Step,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearModel {
    pub coef: Vec<f64>,
    #[serde(default)]
    pub intercept: f64,
    pub link: LinearLink,
}

impl LinearModel {
    pub fn decision(&self, row: ArrayView1<'_, f32>) -> f64 {
        self.coef
            .iter()
            .zip(row.iter())
            .map(|(c, x)| c * f64::from(*x))
            .sum::<f64>()
            + self.intercept
    }

    pub fn validate(&self, n_features: usize) -> Result<(), String> {
        if self.coef.len() != n_features {
            return Err(format!(
                "model has {} coefficients, feature list has {}",
                self.coef.len(),
                n_features
            ));
        }
        if !self.intercept.is_finite() || self.coef.iter().any(|c| !c.is_finite()) {
            return Err("model coefficients must be finite".to_string());
        }
        Ok(())
    }
}

impl Model for LinearModel {
    fn n_features(&self) -> usize {
        self.coef.len()
    }

    fn feature_importances(&self) -> Vec<f64> {
        self.coef.iter().map(|c| c.abs()).collect()
    }
}

impl ProbabilisticClassifier for LinearModel {
    fn predict_proba(&self, row: ArrayView1<'_, f32>) -> f64 {
        logistic(self.decision(row))
    }
}

impl ScoringClassifier for LinearModel {
    fn decision_function(&self, row: ArrayView1<'_, f32>) -> f64 {
        self.decision(row)
    }
}

impl LabelOnlyClassifier for LinearModel {
    fn predict(&self, row: ArrayView1<'_, f32>) -> u8 {
        u8::from(self.decision(row) > 0.0)
    }
}
