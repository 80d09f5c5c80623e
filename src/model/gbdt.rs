//! Gradient-boosted tree ensemble read from a LightGBM-style model dump.
//!
//! Only numerical `<=` splits are supported. Missing-value routing follows the
//! per-node `missing_type`:
//! - `None`: NaN is treated as 0.0 and compared normally
//! - `Zero`: NaN and (near) zero take the default direction
//! - `NaN`: NaN takes the default direction

use super::classifier::{Model, ProbabilisticClassifier, ScoringClassifier};
use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};

const ZERO_THRESHOLD: f64 = 1e-35;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MissingType {
    #[default]
    #[serde(rename = "None")]
    Absent,
    Zero,
    NaN,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitNode {
    pub split_feature: usize,
    pub threshold: f64,
    #[serde(default = "default_decision_type")]
    pub decision_type: String,
    #[serde(default)]
    pub default_left: bool,
    #[serde(default)]
    pub missing_type: MissingType,
    pub left_child: TreeNode,
    pub right_child: TreeNode,
}

fn default_decision_type() -> String {
    "<=".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TreeNode {
    Split(Box<SplitNode>),
    Leaf { leaf_value: f64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeInfo {
    #[serde(default)]
    pub tree_index: usize,
    pub tree_structure: TreeNode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GbdtModel {
    /// e.g. `"binary sigmoid:1"`
    #[serde(default)]
    pub objective: String,
    #[serde(default)]
    pub max_feature_idx: Option<usize>,
    #[serde(default)]
    pub feature_names: Vec<String>,
    pub tree_info: Vec<TreeInfo>,
}

impl SplitNode {
    fn goes_left(&self, fval: f32) -> bool {
        let mut v = f64::from(fval);
        if v.is_nan() && self.missing_type != MissingType::NaN {
            v = 0.0;
        }
        match self.missing_type {
            MissingType::Zero if v > -ZERO_THRESHOLD && v <= ZERO_THRESHOLD => self.default_left,
            MissingType::NaN if v.is_nan() => self.default_left,
            _ => v <= self.threshold,
        }
    }
}

impl TreeNode {
    fn leaf_value(&self, row: ArrayView1<'_, f32>) -> f64 {
        let mut node = self;
        loop {
            match node {
                TreeNode::Leaf { leaf_value } => return *leaf_value,
                TreeNode::Split(split) => {
                    let fval = row.get(split.split_feature).copied().unwrap_or(f32::NAN);
                    node = if split.goes_left(fval) {
                        &split.left_child
                    } else {
                        &split.right_child
                    };
                }
            }
        }
    }

    fn visit_splits<'a>(&'a self, f: &mut impl FnMut(&'a SplitNode)) {
        if let TreeNode::Split(split) = self {
            f(split);
            split.left_child.visit_splits(f);
            split.right_child.visit_splits(f);
        }
    }
}

impl GbdtModel {
    pub fn num_trees(&self) -> usize {
        self.tree_info.len()
    }

    /// True for binary-logloss objectives whose raw margin maps to a probability.
    pub fn is_binary(&self) -> bool {
        self.objective.split_whitespace().next() == Some("binary")
    }

    /// `sigmoid:<k>` parameter of a binary objective (LightGBM default 1).
    pub fn sigmoid(&self) -> f64 {
        self.objective
            .split_whitespace()
            .find_map(|tok| tok.strip_prefix("sigmoid:"))
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(1.0)
    }

    /// Sum of leaf outputs across all trees.
    pub fn raw_margin(&self, row: ArrayView1<'_, f32>) -> f64 {
        self.tree_info
            .iter()
            .map(|t| t.tree_structure.leaf_value(row))
            .sum()
    }

    /// Structural check against the width of the full feature list.
    pub fn validate(&self, n_features: usize) -> Result<(), String> {
        if self.tree_info.is_empty() {
            return Err("model has no trees".to_string());
        }
        if let Some(max_idx) = self.max_feature_idx {
            if max_idx + 1 != n_features {
                return Err(format!(
                    "model was trained on {} features, feature list has {}",
                    max_idx + 1,
                    n_features
                ));
            }
        }
        let mut problem = None;
        for tree in &self.tree_info {
            tree.tree_structure.visit_splits(&mut |split| {
                if problem.is_some() {
                    return;
                }
                if split.decision_type != "<=" {
                    problem = Some(format!(
                        "tree {}: unsupported decision type {:?}",
                        tree.tree_index, split.decision_type
                    ));
                } else if split.split_feature >= n_features {
                    problem = Some(format!(
                        "tree {}: split feature {} out of range",
                        tree.tree_index, split.split_feature
                    ));
                }
            });
        }
        problem.map_or(Ok(()), Err)
    }

    fn width(&self) -> usize {
        if let Some(max_idx) = self.max_feature_idx {
            return max_idx + 1;
        }
        let mut max_seen = None::<usize>;
        for tree in &self.tree_info {
            tree.tree_structure.visit_splits(&mut |split| {
                max_seen = Some(max_seen.map_or(split.split_feature, |m| m.max(split.split_feature)));
            });
        }
        max_seen.map_or(self.feature_names.len(), |m| (m + 1).max(self.feature_names.len()))
    }
}

impl Model for GbdtModel {
    fn n_features(&self) -> usize {
        self.width()
    }

    /// Split counts per feature.
    fn feature_importances(&self) -> Vec<f64> {
        let mut counts = vec![0.0; self.width()];
        for tree in &self.tree_info {
            tree.tree_structure.visit_splits(&mut |split| {
                if let Some(c) = counts.get_mut(split.split_feature) {
                    *c += 1.0;
                }
            });
        }
        counts
    }
}

impl ProbabilisticClassifier for GbdtModel {
    fn predict_proba(&self, row: ArrayView1<'_, f32>) -> f64 {
        super::classifier::logistic(self.sigmoid() * self.raw_margin(row))
    }
}

impl ScoringClassifier for GbdtModel {
    fn decision_function(&self, row: ArrayView1<'_, f32>) -> f64 {
        self.raw_margin(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    const DUMP: &str = r#"{
        "objective": "binary sigmoid:1",
        "max_feature_idx": 1,
        "feature_names": ["sensor_001", "sensor_002"],
        "tree_info": [
            {"tree_index": 0, "tree_structure": {
                "split_index": 0, "split_feature": 0, "threshold": 0.5,
                "decision_type": "<=", "default_left": false, "missing_type": "NaN",
                "left_child": {"leaf_index": 0, "leaf_value": -1.0},
                "right_child": {"leaf_index": 1, "leaf_value": 1.0}
            }},
            {"tree_index": 1, "tree_structure": {
                "split_index": 0, "split_feature": 1, "threshold": 2.0,
                "decision_type": "<=", "default_left": true, "missing_type": "None",
                "left_child": {"leaf_value": 0.25},
                "right_child": {"leaf_value": -0.25}
            }}
        ]
    }"#;

    fn model() -> GbdtModel {
        serde_json::from_str(DUMP).unwrap()
    }

    #[test]
    fn parses_dump_and_sums_leaves() {
        let m = model();
        assert_eq!(m.num_trees(), 2);
        assert!(m.is_binary());
        assert_eq!(m.sigmoid(), 1.0);
        assert_eq!(m.n_features(), 2);
        assert_eq!(m.raw_margin(array![1.0f32, 1.0].view()), 1.25);
        assert_eq!(m.raw_margin(array![0.0f32, 3.0].view()), -1.25);
    }

    #[test]
    fn missing_values_follow_missing_type() {
        let m = model();
        // tree 0: NaN -> default right (+1.0); tree 1: NaN -> 0.0 <= 2.0 -> left (+0.25)
        assert_eq!(m.raw_margin(array![f32::NAN, f32::NAN].view()), 1.25);
    }

    #[test]
    fn zero_missing_type_routes_zero_to_default() {
        let node = SplitNode {
            split_feature: 0,
            threshold: 1.0,
            decision_type: "<=".into(),
            default_left: false,
            missing_type: MissingType::Zero,
            left_child: TreeNode::Leaf { leaf_value: 1.0 },
            right_child: TreeNode::Leaf { leaf_value: 2.0 },
        };
        assert!(!node.goes_left(0.0));
        assert!(!node.goes_left(f32::NAN));
        assert!(node.goes_left(0.5));
    }

    #[test]
    fn probability_is_logistic_of_margin() {
        let m = model();
        let p = m.predict_proba(array![1.0f32, 1.0].view());
        assert!((p - 1.0 / (1.0 + (-1.25f64).exp())).abs() < 1e-12);
    }

    #[test]
    fn validate_rejects_width_mismatch_and_categorical() {
        let m = model();
        assert!(m.validate(2).is_ok());
        assert!(m.validate(3).is_err());

        let mut cat = model();
        cat.max_feature_idx = None;
        if let TreeNode::Split(s) = &mut cat.tree_info[0].tree_structure {
            s.decision_type = "==".into();
        }
        assert!(cat.validate(2).unwrap_err().contains("decision type"));
    }

    #[test]
    fn split_counts_as_importances() {
        assert_eq!(model().feature_importances(), vec![1.0, 1.0]);
    }
}
