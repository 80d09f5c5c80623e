//! Attribute model feature importances back to the sensors they were derived from.

use regex::Regex;

const SENSOR_ID_PATTERN: &str = r"sensor_\d+";

/// Rank sensors by the summed importance of every feature that mentions them.
///
/// Features are visited in descending importance; sensors keep that first-seen order
/// on ties. A pairwise feature such as `sensor_001_minus_sensor_002` credits both.
pub fn rank_sensors(feature_names: &[String], importances: &[f64]) -> Vec<String> {
    let Ok(sensor_id) = Regex::new(SENSOR_ID_PATTERN) else {
        return Vec::new();
    };

    let mut by_importance: Vec<(&str, f64)> = feature_names
        .iter()
        .map(String::as_str)
        .zip(importances.iter().copied())
        .collect();
    by_importance.sort_by(|a, b| b.1.total_cmp(&a.1));

    let mut scores: Vec<(String, f64)> = Vec::new();
    for (feature, importance) in by_importance {
        for m in sensor_id.find_iter(feature) {
            match scores.iter_mut().find(|(s, _)| s == m.as_str()) {
                Some((_, total)) => *total += importance,
                None => scores.push((m.as_str().to_string(), importance)),
            }
        }
    }
    scores.sort_by(|a, b| b.1.total_cmp(&a.1));
    scores.into_iter().map(|(s, _)| s).collect()
}
