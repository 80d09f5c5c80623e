//! Fitted training artifacts evaluated at inference time: scaler and classifier.

mod attribution;
mod classifier;
mod gbdt;
mod linear;
mod scaler;

pub use attribution::rank_sensors;
pub use classifier::{
    logistic, Classifier, ClassifierArtifact, ClassifierKind, LabelOnlyClassifier, Model,
    ProbabilisticClassifier, ScoringClassifier,
};
pub use gbdt::{GbdtModel, MissingType, SplitNode, TreeInfo, TreeNode};
pub use linear::{LinearLink, LinearModel};
pub use scaler::Scaler;

impl ClassifierArtifact {
    /// Structural check against the width of the full feature list.
    pub fn validate(&self, n_features: usize) -> Result<(), String> {
        match self {
            ClassifierArtifact::Gbdt(m) => m.validate(n_features),
            ClassifierArtifact::Linear(m) => m.validate(n_features),
        }
    }
}
