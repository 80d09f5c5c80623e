//! Integration test: artifacts on disk, record parsing, feature building, scoring, alerts.

use defect_sentinel::{
    artifacts::{load_bundle, ArtifactLoadError, ArtifactStore, SensorStats, ThresholdSource},
    config::{ArtifactPaths, ReplayConfig, ServiceConfig},
    features::FeatureBuilder,
    record::{SensorRecord, ValidationError},
    replay::ReplayRunner,
    service::{ErrorClass, PredictionError, PredictionService},
    storage::AlertStore,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;

fn sensors(n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("sensor_{i:03}")).collect()
}

fn unit_stats(core: &[String]) -> HashMap<String, SensorStats> {
    core.iter()
        .map(|c| (c.clone(), SensorStats::new(0.0, 1.0, 0.0)))
        .collect()
}

/// Full list as the builder produces it for `core`.
fn built_names(core: &[String]) -> Vec<String> {
    let stats = unit_stats(core);
    let record: SensorRecord = core.iter().map(|c| (c.clone(), Some(0.0))).collect();
    FeatureBuilder::new(core, &stats)
        .build(&record)
        .unwrap()
        .names()
        .map(str::to_string)
        .collect()
}

/// Two stumps: `sensor_001 > 0.5` adds 1.0, `sensor_003 > 0.0` adds 0.5.
fn classifier(width: usize) -> Value {
    json!({
        "model_type": "gbdt",
        "objective": "binary sigmoid:1",
        "max_feature_idx": width - 1,
        "tree_info": [
            {"tree_index": 0, "tree_structure": {
                "split_feature": 0, "threshold": 0.5, "decision_type": "<=",
                "default_left": true, "missing_type": "None",
                "left_child": {"leaf_value": -1.0}, "right_child": {"leaf_value": 1.0}}},
            {"tree_index": 1, "tree_structure": {
                "split_feature": 2, "threshold": 0.0, "decision_type": "<=",
                "default_left": true, "missing_type": "None",
                "left_child": {"leaf_value": -0.5}, "right_child": {"leaf_value": 0.5}}}
        ]
    })
}

fn write(dir: &Path, name: &str, value: &Value) {
    std::fs::write(dir.join(name), serde_json::to_vec_pretty(value).unwrap()).unwrap();
}

/// Artifact directory for ten core sensors; `full` defaults to the built layout.
fn artifact_dir(full: Option<Vec<String>>, threshold: Option<Value>) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let core = sensors(10);
    let full = full.unwrap_or_else(|| built_names(&core));
    let n = full.len();
    write(dir.path(), "core_features.json", &json!({ "features": core }));
    write(dir.path(), "full_features.json", &json!(full));
    write(dir.path(), "feature_stats.json", &json!(unit_stats(&core)));
    write(
        dir.path(),
        "scaler.json",
        &json!({"kind": "standard", "mean": vec![0.0; n], "scale": vec![1.0; n]}),
    );
    write(dir.path(), "classifier.json", &classifier(n));
    if let Some(t) = threshold {
        write(dir.path(), "threshold.json", &t);
    }
    dir
}

fn service_for(dir: &Path) -> PredictionService {
    let bundle = load_bundle(&ArtifactPaths::in_dir(dir)).unwrap();
    PredictionService::new(Arc::new(bundle))
}

#[derive(Clone, Default)]
struct WarnCounter(Arc<AtomicUsize>);

impl<S: tracing::Subscriber> Layer<S> for WarnCounter {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() == tracing::Level::WARN {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[test]
fn config_load_default() {
    let c = ServiceConfig::load(Path::new("nonexistent.json")).unwrap();
    assert_eq!(c.artifacts.dir, Path::new("models"));
    assert!(c.alerts.enabled);
    assert_eq!(c.replay.max_in_flight, 4);
}

#[test]
fn dampened_values_flow_into_derived_columns() {
    let core: Vec<String> = (1..=10).map(|i| format!("s{i}")).collect();
    let stats = unit_stats(&core);
    let mut pairs: Vec<(String, Option<f64>)> = vec![("s1".into(), Some(5.0)), ("s2".into(), None)];
    pairs.extend((3..=9).map(|i| (format!("s{i}"), Some(0.5))));
    pairs.push(("s10".into(), Some(-100.0)));
    let record: SensorRecord = pairs.into_iter().collect();

    let v = FeatureBuilder::new(&core, &stats).build(&record).unwrap();
    assert_eq!(v.width(), 10 + 5 * 10 + 90);

    assert_eq!(v.value(0, "s2"), Some(0.0));
    assert_eq!(v.value(0, "s10"), Some(0.0));
    // s1 = 5.0 is also beyond three standard deviations
    assert_eq!(v.value(0, "s1"), Some(0.0));
    assert_eq!(v.value(0, "s3"), Some(0.5));

    for name in ["s10_abs", "s10_sq", "s10_log", "s2_abs", "s2_sq", "s2_log", "s2_minus_s10"] {
        assert_eq!(v.value(0, name), Some(0.0), "{name}");
    }
    assert_eq!(v.value(0, "s3_minus_s10"), Some(0.5));
    assert_eq!(v.value(0, "s3_ratio_s10"), Some(0.5f32 / 1e-5f32));
    assert_eq!(v.value(0, "s10_iqr_flag"), Some(0.0));
    assert_eq!(v.value(0, "s10_p95_flag"), Some(1.0));
}

#[test]
fn loads_bundle_and_predicts() {
    let dir = artifact_dir(None, Some(json!({"threshold_value": 0.64})));
    let svc = service_for(dir.path());
    let bundle = svc.bundle();
    assert_eq!(bundle.full_features().len(), 150);
    assert_eq!(bundle.threshold_source(), ThresholdSource::Artifact);

    let out = svc
        .predict(&json!({"payload": {"sensor_001": 2.0, "sensor_003": 1.0, "sensor_002": null}}))
        .unwrap();
    let expected = 1.0 / (1.0 + (-1.5f64).exp());
    assert!((out.probability - expected).abs() < 1e-12);
    assert_eq!(out.predicted_label, 1);
    assert_eq!(out.threshold, 0.64);
    assert_eq!(out.top_sensors, vec!["sensor_001", "sensor_003", "sensor_002"]);
    let fp = out.model_fingerprint.unwrap();
    assert_eq!(fp.len(), 64);
    assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));

    let low = svc.predict(&json!({"sensor_001": 0.0, "sensor_003": -1.0})).unwrap();
    assert_eq!(low.predicted_label, 0);
}

#[test]
fn missing_threshold_defaults_to_half() {
    let dir = artifact_dir(None, None);
    let svc = service_for(dir.path());
    assert_eq!(svc.bundle().threshold(), 0.5);
    assert_eq!(svc.bundle().threshold_source(), ThresholdSource::Default);
}

#[test]
fn artifact_problems_fail_the_load() {
    let dir = artifact_dir(None, Some(json!("high")));
    let paths = ArtifactPaths::in_dir(dir.path());
    assert!(matches!(
        load_bundle(&paths),
        Err(ArtifactLoadError::Malformed { name: "threshold", .. })
    ));

    write(dir.path(), "threshold.json", &json!(0.5));
    std::fs::remove_file(dir.path().join("scaler.json")).unwrap();
    assert!(matches!(load_bundle(&paths), Err(ArtifactLoadError::Missing { name: "scaler", .. })));

    write(dir.path(), "scaler.json", &json!({"kind": "standard", "mean": [0.0], "scale": [1.0]}));
    assert!(matches!(load_bundle(&paths), Err(ArtifactLoadError::Mismatch(_))));

    write(dir.path(), "core_features.json", &json!(["sensor_001", 7]));
    assert!(matches!(
        load_bundle(&paths),
        Err(ArtifactLoadError::Malformed { name: "core feature list", .. })
    ));
}

#[test]
fn store_loads_once() {
    let dir = artifact_dir(None, Some(json!(0.5)));
    let store = ArtifactStore::new(ArtifactPaths::in_dir(dir.path()));
    assert!(!store.is_loaded());
    let a = store.load().unwrap();
    let b = store.load().unwrap();
    assert!(Arc::ptr_eq(&a, &b));
}

#[test]
fn invalid_records_are_bad_input() {
    let dir = artifact_dir(None, None);
    let svc = service_for(dir.path());

    let err = svc.predict(&json!({"temperature": 20})).unwrap_err();
    assert!(matches!(err, PredictionError::Input(ValidationError::NoSensorData { .. })));
    assert_eq!(err.class(), ErrorClass::BadInput);

    let err = svc.predict(&json!({"sensor_001": "not-a-number"})).unwrap_err();
    match &err {
        PredictionError::Input(ValidationError::InvalidSensorValue { key, .. }) => {
            assert_eq!(key, "sensor_001")
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.public_message().contains("sensor_001"));
}

#[test]
fn absent_trained_columns_are_filled_with_a_warning() {
    let mut full = built_names(&sensors(10));
    full.push("sensor_011_custom".to_string());
    let dir = artifact_dir(Some(full), Some(json!(0.5)));
    let svc = service_for(dir.path());

    let warnings = WarnCounter::default();
    let subscriber = tracing_subscriber::registry().with(warnings.clone());
    let out = tracing::subscriber::with_default(subscriber, || {
        svc.predict(&json!({"sensor_001": 1.0, "sensor_003": 1.0}))
    })
    .unwrap();
    assert_eq!(out.predicted_label, 1);
    assert!(warnings.0.load(Ordering::SeqCst) >= 1);
}

#[test]
fn identical_input_gives_identical_probability() {
    let dir = artifact_dir(None, Some(json!(0.5)));
    let a = service_for(dir.path());
    let b = service_for(dir.path());
    let record = json!({"sensor_001": 0.7, "sensor_002": -1.2, "sensor_003": null, "sensor_009": 3.3});
    let p1 = a.predict(&record).unwrap();
    let p2 = a.predict(&record).unwrap();
    let p3 = b.predict(&record).unwrap();
    assert_eq!(p1.probability.to_bits(), p2.probability.to_bits());
    assert_eq!(p1.probability.to_bits(), p3.probability.to_bits());
    assert_eq!(p1.model_fingerprint, p3.model_fingerprint);
}

#[tokio::test]
async fn replay_scores_lines_and_records_alerts() {
    let dir = artifact_dir(None, Some(json!(0.5)));
    let svc = Arc::new(service_for(dir.path()));
    let alerts = Arc::new(AlertStore::open_in_memory().unwrap());
    let runner = ReplayRunner::new(svc, &ReplayConfig::default()).with_alerts(Arc::clone(&alerts));

    let input = [
        r#"{"product_id": "P-1", "timestamp": "2024-03-01T08:00:00Z", "sensors": {"sensor_001": 2.0, "sensor_003": 1.0}}"#,
        "",
        "{broken",
        r#"{"product_id": "P-2", "temperature": 20}"#,
        r#"{"product_id": "P-3", "sensor_001": 0.0, "sensor_003": -1.0}"#,
    ]
    .join("\n");
    let mut out = Vec::new();
    let stats = runner.run(input.as_bytes(), &mut out).await.unwrap();

    assert_eq!(stats.read, 4);
    assert_eq!(stats.scored, 2);
    assert_eq!(stats.rejected, 2);
    assert_eq!(stats.positives, 1);
    assert_eq!(stats.alerts, 1);

    let lines: Vec<Value> = String::from_utf8(out)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["product_id"], "P-1");
    assert_eq!(lines[0]["predicted_label"], 1);
    assert!(lines[0]["alert_id"].is_i64());
    assert_eq!(lines[1]["product_id"], "P-3");
    assert!(lines[1].get("alert_id").is_none());

    let stored = alerts.list_alerts(10).unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].product_id.as_deref(), Some("P-1"));
    assert_eq!(stored[0].ts.timestamp(), 1_709_280_000);
}

#[tokio::test]
async fn replay_skips_non_utf8_lines_and_keeps_going() {
    let dir = artifact_dir(None, Some(json!(0.5)));
    let svc = Arc::new(service_for(dir.path()));
    let alerts = Arc::new(AlertStore::open_in_memory().unwrap());
    let runner = ReplayRunner::new(svc, &ReplayConfig::default()).with_alerts(Arc::clone(&alerts));

    let mut input = Vec::new();
    input.extend_from_slice(br#"{"product_id": "P-1", "sensor_001": 2.0, "sensor_003": 1.0}"#);
    input.extend_from_slice(b"\n{\"sensor_001\": \"\xff\"}\n");
    input.extend_from_slice(br#"{"product_id": "P-3", "sensor_001": 0.0, "sensor_003": -1.0}"#);
    input.push(b'\n');

    let mut out = Vec::new();
    let stats = runner.run(input.as_slice(), &mut out).await.unwrap();
    assert_eq!(stats.read, 3);
    assert_eq!(stats.rejected, 1);
    assert_eq!(stats.scored, 2);
    assert_eq!(stats.alerts, 1);

    let lines: Vec<Value> = String::from_utf8(out)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["product_id"], "P-1");
    assert_eq!(lines[1]["product_id"], "P-3");

    let stored = alerts.list_alerts(10).unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(lines[0]["alert_id"], stored[0].id);
}

#[tokio::test]
async fn replay_stops_while_waiting_for_input() {
    use tokio::io::AsyncWriteExt;

    let dir = artifact_dir(None, Some(json!(0.5)));
    let svc = Arc::new(service_for(dir.path()));
    let runner = ReplayRunner::new(svc, &ReplayConfig::default());

    let (reader, mut writer) = tokio::io::duplex(4096);
    writer
        .write_all(b"{\"product_id\": \"P-1\", \"sensor_001\": 2.0, \"sensor_003\": 1.0}\n")
        .await
        .unwrap();

    let stop = runner.stop_signal();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        stop.stop();
    });

    let mut out = Vec::new();
    let stats = tokio::time::timeout(
        std::time::Duration::from_secs(5),
        runner.run(tokio::io::BufReader::new(reader), &mut out),
    )
    .await
    .expect("runner should return once stopped")
    .unwrap();
    drop(writer);

    assert_eq!(stats.read, 1);
    assert_eq!(stats.scored, 1);
    assert_eq!(String::from_utf8(out).unwrap().lines().count(), 1);
}
