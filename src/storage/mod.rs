//! Local persistence for defect alerts and operator settings.

mod alerts;

pub use alerts::{Alert, AlertStore, AlertSummary, NewAlert, StoreError};
