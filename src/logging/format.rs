//! JSON log lines: one JSON object per line (ndjson) for ingestion and audit.

use crate::service::PredictionResult;
use serde::Serialize;
use std::io::Write;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::EnvFilter;

/// One scored inspection record, as written to stdout.
#[derive(Debug, Serialize)]
pub struct PredictionLine<'a> {
    pub ts: String,
    pub request_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_id: Option<&'a str>,
    pub probability: f64,
    pub predicted_label: u8,
    pub threshold: f64,
    pub top_sensors: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_fingerprint: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert_id: Option<i64>,
}

impl<'a> PredictionLine<'a> {
    pub fn new(request_id: &'a str, product_id: Option<&'a str>, result: &'a PredictionResult) -> Self {
        Self {
            ts: chrono::Utc::now().to_rfc3339(),
            request_id,
            product_id,
            probability: result.probability,
            predicted_label: result.predicted_label,
            threshold: result.threshold,
            top_sensors: &result.top_sensors,
            model_fingerprint: result.model_fingerprint.as_deref(),
            alert_id: None,
        }
    }
}

/// Initialize tracing with JSON format (one JSON object per line)
pub struct StructuredLogger;

impl StructuredLogger {
    /// Install the global subscriber writing to stderr; RUST_LOG overrides `default_level`.
    pub fn init(json: bool, default_level: &str) -> Result<(), TryInitError> {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
        if json {
            let fmt = tracing_subscriber::fmt::layer()
                .json()
                .with_span_events(FmtSpan::NONE)
                .with_writer(std::io::stderr);
            tracing_subscriber::registry().with(filter).with(fmt).try_init()
        } else {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .try_init()
        }
    }

    /// Write one NDJSON line without going through tracing.
    pub fn emit_json(event: &impl Serialize, w: &mut impl Write) -> std::io::Result<()> {
        let line = serde_json::to_string(event)?;
        writeln!(w, "{}", line)
    }
}
