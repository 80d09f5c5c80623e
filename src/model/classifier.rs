//! Classifier capabilities and the once-per-load dispatch between them.
//!
//! Model families expose different native outputs. The artifact is inspected when it
//! is loaded and wrapped in exactly one [`Classifier`] variant; requests never
//! re-check capabilities.

use super::gbdt::GbdtModel;
use super::linear::{LinearLink, LinearModel};
use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};
use std::fmt;

pub trait Model: Send + Sync + fmt::Debug {
    /// Number of input columns the model was trained on.
    fn n_features(&self) -> usize;
    /// Global importance per input column, in column order.
    fn feature_importances(&self) -> Vec<f64>;
}

/// Exposes the probability of the positive (defect) class.
pub trait ProbabilisticClassifier: Model {
    fn predict_proba(&self, row: ArrayView1<'_, f32>) -> f64;
}

/// Exposes an unbounded decision score.
pub trait ScoringClassifier: Model {
    fn decision_function(&self, row: ArrayView1<'_, f32>) -> f64;
}

/// Exposes only a hard 0/1 prediction.
pub trait LabelOnlyClassifier: Model {
    fn predict(&self, row: ArrayView1<'_, f32>) -> u8;
}

/// Serialized classifier artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "model_type", rename_all = "snake_case")]
pub enum ClassifierArtifact {
    Gbdt(GbdtModel),
    Linear(LinearModel),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierKind {
    Probabilistic,
    Scoring,
    LabelOnly,
}

impl ClassifierKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassifierKind::Probabilistic => "probabilistic",
            ClassifierKind::Scoring => "scoring",
            ClassifierKind::LabelOnly => "label_only",
        }
    }
}

#[derive(Debug)]
pub enum Classifier {
    Probabilistic(Box<dyn ProbabilisticClassifier>),
    Scoring(Box<dyn ScoringClassifier>),
    LabelOnly(Box<dyn LabelOnlyClassifier>),
}

pub fn logistic(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

impl Classifier {
    /// Pick the richest interface the artifact supports.
    pub fn from_artifact(artifact: ClassifierArtifact) -> Self {
        match artifact {
            ClassifierArtifact::Gbdt(m) if m.is_binary() => Classifier::Probabilistic(Box::new(m)),
            ClassifierArtifact::Gbdt(m) => Classifier::Scoring(Box::new(m)),
            ClassifierArtifact::Linear(m) => match m.link {
                LinearLink::Logistic => Classifier::Probabilistic(Box::new(m)),
                LinearLink::Identity => Classifier::Scoring(Box::new(m)),
                LinearLink::Step => Classifier::LabelOnly(Box::new(m)),
            },
        }
    }

    pub fn kind(&self) -> ClassifierKind {
        match self {
            Classifier::Probabilistic(_) => ClassifierKind::Probabilistic,
            Classifier::Scoring(_) => ClassifierKind::Scoring,
            Classifier::LabelOnly(_) => ClassifierKind::LabelOnly,
        }
    }

    pub fn n_features(&self) -> usize {
        match self {
            Classifier::Probabilistic(m) => m.n_features(),
            Classifier::Scoring(m) => m.n_features(),
            Classifier::LabelOnly(m) => m.n_features(),
        }
    }

    pub fn feature_importances(&self) -> Vec<f64> {
        match self {
            Classifier::Probabilistic(m) => m.feature_importances(),
            Classifier::Scoring(m) => m.feature_importances(),
            Classifier::LabelOnly(m) => m.feature_importances(),
        }
    }

    /// Positive-class probability for one scaled row. Decision scores are squashed
    /// through the logistic function; hard labels become 0.0 or 1.0.
    pub fn positive_probability(&self, row: ArrayView1<'_, f32>) -> f64 {
        match self {
            Classifier::Probabilistic(m) => m.predict_proba(row),
            Classifier::Scoring(m) => logistic(m.decision_function(row)),
            Classifier::LabelOnly(m) => f64::from(m.predict(row)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn linear(link: &str) -> Classifier {
        let json = format!(
            r#"{{"model_type": "linear", "coef": [1.0, -1.0], "intercept": 0.5, "link": "{link}"}}"#
        );
        Classifier::from_artifact(serde_json::from_str(&json).unwrap())
    }

    #[test]
    fn link_selects_variant() {
        assert_eq!(linear("logistic").kind(), ClassifierKind::Probabilistic);
        assert_eq!(linear("identity").kind(), ClassifierKind::Scoring);
        assert_eq!(linear("step").kind(), ClassifierKind::LabelOnly);
    }

    #[test]
    fn three_tier_probability() {
        let row = array![2.0f32, 1.0];
        // decision = 2 - 1 + 0.5 = 1.5
        let expected = logistic(1.5);
        assert!((linear("logistic").positive_probability(row.view()) - expected).abs() < 1e-12);
        assert!((linear("identity").positive_probability(row.view()) - expected).abs() < 1e-12);
        assert_eq!(linear("step").positive_probability(row.view()), 1.0);
        assert_eq!(
            linear("step").positive_probability(array![0.0f32, 1.0].view()),
            0.0
        );
    }

    #[test]
    fn non_binary_gbdt_is_scoring() {
        let json = r#"{"model_type": "gbdt", "objective": "regression",
            "tree_info": [{"tree_structure": {"leaf_value": 0.0}}]}"#;
        let c = Classifier::from_artifact(serde_json::from_str(json).unwrap());
        assert_eq!(c.kind(), ClassifierKind::Scoring);
        assert_eq!(c.positive_probability(array![1.0f32].view()), 0.5);
    }

    #[test]
    fn logistic_saturates_without_nan() {
        assert_eq!(logistic(-1000.0), 0.0);
        assert_eq!(logistic(1000.0), 1.0);
    }
}
