//! Scoring: align built features to the trained layout, scale, classify, threshold.

mod engine;

pub use engine::{align, score, Alignment, ScoredPrediction, Scorer, ScoringError};
