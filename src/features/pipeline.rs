//! Feature pipeline: records → core selection → imputation/dampening → derived columns.

use super::{impute_and_dampen, select_core, synthesize, FeatureSynthesisError, FeatureVector};
use crate::artifacts::{ArtifactBundle, FeatureStatistics};
use crate::record::SensorRecord;
use tracing::debug;

/// Stateless builder bound to one core list and its training statistics.
#[derive(Debug, Clone, Copy)]
pub struct FeatureBuilder<'a> {
    core: &'a [String],
    stats: &'a FeatureStatistics,
}

impl<'a> FeatureBuilder<'a> {
    pub fn new(core: &'a [String], stats: &'a FeatureStatistics) -> Self {
        Self { core, stats }
    }

    pub fn from_bundle(bundle: &'a ArtifactBundle) -> Self {
        Self::new(bundle.core_features(), bundle.statistics())
    }

    /// Build the one-row feature vector for a single record.
    pub fn build(&self, record: &SensorRecord) -> Result<FeatureVector, FeatureSynthesisError> {
        self.build_batch(std::slice::from_ref(record))
    }

    /// Build over a batch. Quantile flags are relative to the rows of this batch.
    pub fn build_batch(&self, records: &[SensorRecord]) -> Result<FeatureVector, FeatureSynthesisError> {
        let mut core = select_core(records, self.core)?;
        let report = impute_and_dampen(&mut core, self.core, self.stats)?;
        let vector = synthesize(&core)?;
        debug!(
            rows = vector.rows(),
            width = vector.width(),
            imputed = report.missing_before - report.missing_after,
            dampened = report.dampened,
            "feature vector built"
        );
        Ok(vector)
    }
}

/// Alias for the builder that runs: records → features
pub type FeaturePipeline<'a> = FeatureBuilder<'a>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::SensorStats;

    #[test]
    fn build_is_one_row_batch() {
        let core: Vec<String> = vec!["sensor_001".into(), "sensor_002".into()];
        let stats = FeatureStatistics::from([("sensor_001".to_string(), SensorStats::new(1.0, 1.0, 1.0))]);
        let record: SensorRecord = [("sensor_001", None), ("sensor_002", Some(4.0))].into_iter().collect();
        let builder = FeatureBuilder::new(&core, &stats);
        let single = builder.build(&record).unwrap();
        let batch = builder.build_batch(&[record]).unwrap();
        assert_eq!(single.rows(), 1);
        assert_eq!(single.value(0, "sensor_001"), Some(1.0));
        assert_eq!(single.value(0, "sensor_001_minus_sensor_002"), Some(-3.0));
        assert_eq!(single.names().collect::<Vec<_>>(), batch.names().collect::<Vec<_>>());
    }

    #[test]
    fn one_core_column_is_structural_error() {
        let core: Vec<String> = vec!["sensor_001".into()];
        let stats = FeatureStatistics::new();
        let record: SensorRecord = [("sensor_001", Some(1.0))].into_iter().collect();
        assert_eq!(
            FeatureBuilder::new(&core, &stats).build(&record).unwrap_err(),
            FeatureSynthesisError::TooFewColumns(1)
        );
    }
}
