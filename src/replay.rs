//! Replay runner: NDJSON inspection records in, one prediction line out per scored record.
//!
//! Scoring and alert writes run on the blocking pool with a bounded number in flight.
//! Output keeps input order.

use crate::config::ReplayConfig;
use crate::logging::{PredictionLine, StructuredLogger};
use crate::service::{ErrorClass, PredictionError, PredictionResult, PredictionService};
use crate::storage::{AlertStore, NewAlert, StoreError};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::VecDeque;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::Notify;
use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("failed to read or write records: {0}")]
    Io(#[from] std::io::Error),
    #[error("scoring task failed: {0}")]
    Join(#[from] JoinError),
}

/// One line of replay input.
#[derive(Debug, Clone)]
pub struct InspectionRequest {
    pub request_id: String,
    pub product_id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub record: Value,
}

impl InspectionRequest {
    /// Parse one NDJSON line. `product_id` may be a string or a number; an unparsable
    /// `timestamp` is ignored and the alert is stamped with the scoring time.
    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        let record: Value = serde_json::from_str(line)?;
        let product_id = match record.get("product_id") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };
        let timestamp = record
            .get("timestamp")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc));
        Ok(Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            product_id,
            timestamp,
            record,
        })
    }
}

/// Counters for one replay run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub read: u64,
    pub scored: u64,
    pub positives: u64,
    pub rejected: u64,
    pub failed: u64,
    pub alerts: u64,
}

/// Stop request shared with a signal handler. Wakes a runner blocked on input.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl StopSignal {
    pub fn stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    async fn stopped(&self) {
        if !self.is_stopped() {
            self.notify.notified().await;
        }
    }
}

struct Outcome {
    request: InspectionRequest,
    result: Result<PredictionResult, PredictionError>,
    alert: Option<Result<i64, StoreError>>,
}

pub struct ReplayRunner {
    service: Arc<PredictionService>,
    alerts: Option<Arc<AlertStore>>,
    interval: Duration,
    max_in_flight: usize,
    stop: StopSignal,
}

impl ReplayRunner {
    pub fn new(service: Arc<PredictionService>, config: &ReplayConfig) -> Self {
        Self {
            service,
            alerts: None,
            interval: Duration::from_millis(config.interval_ms),
            max_in_flight: config.max_in_flight.max(1),
            stop: StopSignal::default(),
        }
    }

    /// Record an alert for every label-1 prediction.
    pub fn with_alerts(mut self, store: Arc<AlertStore>) -> Self {
        self.alerts = Some(store);
        self
    }

    /// Stop reading; records already in flight are still written out.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    fn spawn(&self, request: InspectionRequest) -> JoinHandle<Outcome> {
        let service = Arc::clone(&self.service);
        let alerts = self.alerts.clone();
        tokio::task::spawn_blocking(move || {
            let result = service.predict(&request.record);
            let alert = match (&result, alerts) {
                (Ok(r), Some(store)) if r.predicted_label == 1 => Some(store.insert_alert(&NewAlert {
                    ts: request.timestamp.unwrap_or_else(Utc::now),
                    product_id: request.product_id.clone(),
                    top_sensors: r.top_sensors.clone(),
                    probability: r.probability,
                })),
                _ => None,
            };
            Outcome {
                request,
                result,
                alert,
            }
        })
    }

    fn emit(outcome: Outcome, out: &mut impl Write, stats: &mut ReplayStats) -> std::io::Result<()> {
        let Outcome {
            request,
            result,
            alert,
        } = outcome;
        match result {
            Ok(result) => {
                stats.scored += 1;
                if result.predicted_label == 1 {
                    stats.positives += 1;
                }
                let mut line = PredictionLine::new(&request.request_id, request.product_id.as_deref(), &result);
                match alert {
                    Some(Ok(id)) => {
                        stats.alerts += 1;
                        line.alert_id = Some(id);
                    }
                    Some(Err(e)) => {
                        warn!(request_id = %request.request_id, error = %e, "failed to record alert");
                    }
                    None => {}
                }
                StructuredLogger::emit_json(&line, out)
            }
            Err(e) if e.class() == ErrorClass::BadInput => {
                stats.rejected += 1;
                info!(request_id = %request.request_id, reason = %e, "record skipped");
                Ok(())
            }
            Err(e) => {
                stats.failed += 1;
                error!(request_id = %request.request_id, error = %e, "record could not be scored");
                Ok(())
            }
        }
    }

    async fn settle(
        handle: JoinHandle<Outcome>,
        out: &mut impl Write,
        stats: &mut ReplayStats,
    ) -> Result<(), ReplayError> {
        let outcome = handle.await?;
        Self::emit(outcome, out, stats)?;
        Ok(())
    }

    /// Score every line of `input`, writing prediction lines to `out`.
    ///
    /// Every record handed to the blocking pool gets its output line before this
    /// returns, including when reading or writing fails part way.
    pub async fn run<R, W>(&self, mut input: R, out: &mut W) -> Result<ReplayStats, ReplayError>
    where
        R: AsyncBufRead + Unpin,
        W: Write,
    {
        let mut stats = ReplayStats::default();
        let mut in_flight: VecDeque<JoinHandle<Outcome>> = VecDeque::new();
        let mut failure: Option<ReplayError> = None;
        let mut buf = Vec::new();

        loop {
            if self.stop.is_stopped() {
                info!("stop requested; draining in-flight records");
                break;
            }
            buf.clear();
            let read = tokio::select! {
                biased;
                _ = self.stop.stopped() => {
                    info!("stop requested; draining in-flight records");
                    break;
                }
                read = input.read_until(b'\n', &mut buf) => read,
            };
            match read {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    failure = Some(e.into());
                    break;
                }
            }

            let line = match std::str::from_utf8(&buf) {
                Ok(line) => line.trim(),
                Err(e) => {
                    stats.read += 1;
                    stats.rejected += 1;
                    info!(line = stats.read, error = %e, "non UTF-8 record skipped");
                    continue;
                }
            };
            if line.is_empty() {
                continue;
            }
            stats.read += 1;
            let request = match InspectionRequest::from_line(line) {
                Ok(r) => r,
                Err(e) => {
                    stats.rejected += 1;
                    info!(line = stats.read, error = %e, "unparsable record skipped");
                    continue;
                }
            };

            if in_flight.len() >= self.max_in_flight {
                if let Some(handle) = in_flight.pop_front() {
                    if let Err(e) = Self::settle(handle, out, &mut stats).await {
                        failure = Some(e);
                        break;
                    }
                }
            }
            in_flight.push_back(self.spawn(request));

            if !self.interval.is_zero() {
                tokio::select! {
                    _ = self.stop.stopped() => {}
                    _ = tokio::time::sleep(self.interval) => {}
                }
            }
        }

        while let Some(handle) = in_flight.pop_front() {
            if let Err(e) = Self::settle(handle, out, &mut stats).await {
                failure.get_or_insert(e);
            }
        }
        if let Err(e) = out.flush() {
            failure.get_or_insert(e.into());
        }

        info!(
            read = stats.read,
            scored = stats.scored,
            positives = stats.positives,
            rejected = stats.rejected,
            failed = stats.failed,
            alerts = stats.alerts,
            "replay finished"
        );
        match failure {
            Some(e) => {
                error!(error = %e, "replay stopped early");
                Err(e)
            }
            None => Ok(stats),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_envelope_fields() {
        let r = InspectionRequest::from_line(
            r#"{"product_id": 42, "timestamp": "2024-03-01T08:00:00Z", "sensors": {"sensor_001": 1.0}}"#,
        )
        .unwrap();
        assert_eq!(r.product_id.as_deref(), Some("42"));
        assert_eq!(r.timestamp.map(|t| t.timestamp()), Some(1_709_280_000));
        assert_eq!(r.request_id.len(), 36);

        let r = InspectionRequest::from_line(r#"{"timestamp": "yesterday", "sensor_001": 1.0}"#).unwrap();
        assert!(r.product_id.is_none());
        assert!(r.timestamp.is_none());
        assert!(InspectionRequest::from_line("{not json").is_err());
    }
}
