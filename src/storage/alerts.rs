//! SQLite-backed store for defect alerts and operator settings.

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to encode alert field: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to prepare database directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("database connection lock poisoned")]
    Poisoned,
}

/// A label-1 prediction kept for operator follow-up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: i64,
    pub ts: DateTime<Utc>,
    pub product_id: Option<String>,
    pub top_sensors: Vec<String>,
    pub probability: f64,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Fields of an alert before it is stored.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAlert {
    pub ts: DateTime<Utc>,
    pub product_id: Option<String>,
    pub top_sensors: Vec<String>,
    pub probability: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AlertSummary {
    pub total: u64,
    pub resolved: u64,
    pub unresolved: u64,
    /// resolved / total; 0 when there are no alerts.
    pub resolution_rate: f64,
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

pub struct AlertStore {
    conn: Mutex<Connection>,
}

impl AlertStore {
    /// Open or create the database at `path`, creating parent directories.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS alerts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ts INTEGER NOT NULL,
                product_id TEXT,
                top_sensors TEXT NOT NULL,
                prob REAL NOT NULL,
                resolved INTEGER NOT NULL DEFAULT 0,
                resolved_at INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_alerts_ts ON alerts(ts);
            CREATE TABLE IF NOT EXISTS settings (key TEXT PRIMARY KEY, value TEXT NOT NULL);
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn alert_from_row(row: &Row<'_>) -> rusqlite::Result<(Alert, String)> {
        let sensors: String = row.get(3)?;
        let resolved_at: Option<i64> = row.get(6)?;
        Ok((
            Alert {
                id: row.get(0)?,
                ts: from_millis(row.get(1)?),
                product_id: row.get(2)?,
                top_sensors: Vec::new(),
                probability: row.get(4)?,
                resolved: row.get::<_, i64>(5)? != 0,
                resolved_at: resolved_at.map(from_millis),
            },
            sensors,
        ))
    }

    fn finish(parts: (Alert, String)) -> Result<Alert, StoreError> {
        let (mut alert, sensors) = parts;
        alert.top_sensors = serde_json::from_str(&sensors)?;
        Ok(alert)
    }

    /// Insert an alert; returns its id.
    pub fn insert_alert(&self, alert: &NewAlert) -> Result<i64, StoreError> {
        let sensors = serde_json::to_string(&alert.top_sensors)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO alerts (ts, product_id, top_sensors, prob) VALUES (?1, ?2, ?3, ?4)",
            params![alert.ts.timestamp_millis(), alert.product_id, sensors, alert.probability],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_alert(&self, id: i64) -> Result<Option<Alert>, StoreError> {
        let conn = self.conn()?;
        let parts = conn
            .query_row(
                "SELECT id, ts, product_id, top_sensors, prob, resolved, resolved_at FROM alerts WHERE id = ?1",
                params![id],
                Self::alert_from_row,
            )
            .optional()?;
        parts.map(Self::finish).transpose()
    }

    /// Newest first.
    pub fn list_alerts(&self, limit: usize) -> Result<Vec<Alert>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, ts, product_id, top_sensors, prob, resolved, resolved_at FROM alerts ORDER BY ts DESC, id DESC LIMIT ?1",
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![limit], Self::alert_from_row)?;
        let alerts = rows
            .map(|r| Self::finish(r?))
            .collect::<Result<Vec<_>, StoreError>>()?;
        Ok(alerts)
    }

    /// Mark an alert resolved. Resolving twice keeps the first resolution time; an
    /// unknown id returns `None`.
    pub fn resolve_alert(&self, id: i64) -> Result<Option<Alert>, StoreError> {
        {
            let conn = self.conn()?;
            conn.execute(
                "UPDATE alerts SET resolved = 1, resolved_at = ?2 WHERE id = ?1 AND resolved = 0",
                params![id, Utc::now().timestamp_millis()],
            )?;
        }
        self.get_alert(id)
    }

    pub fn summary(&self) -> Result<AlertSummary, StoreError> {
        let conn = self.conn()?;
        let (total, resolved): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(resolved), 0) FROM alerts",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let total = total.max(0) as u64;
        let resolved = resolved.max(0) as u64;
        Ok(AlertSummary {
            total,
            resolved,
            unresolved: total.saturating_sub(resolved),
            resolution_rate: if total == 0 {
                0.0
            } else {
                resolved as f64 / total as f64
            },
        })
    }

    /// Retention: delete alerts raised before `ts`. Returns the number deleted.
    pub fn prune_before(&self, ts: DateTime<Utc>) -> Result<u64, StoreError> {
        let n = self
            .conn()?
            .execute("DELETE FROM alerts WHERE ts < ?1", params![ts.timestamp_millis()])?;
        Ok(n as u64)
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value: Option<String> = self
            .conn()?
            .query_row("SELECT value FROM settings WHERE key = ?1", params![key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    pub fn put_setting(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.conn()?.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }
}
