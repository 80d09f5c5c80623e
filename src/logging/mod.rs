//! Structured logging to stderr and NDJSON prediction lines to stdout.

mod format;

pub use format::{PredictionLine, StructuredLogger};
