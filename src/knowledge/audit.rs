//! Append-only audit trail.
//!
//! [`AuditRecorder::record`] is best-effort: a failed append is logged and
//! counted, never surfaced to the caller whose operation is being recorded.
//! The read side ([`activity_since`], [`recent_entries`]) feeds metrics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rusqlite::{params, Connection, Row};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::db::Store;
use crate::error::Result;
use crate::knowledge::now_timestamp;
use crate::knowledge::types::{AuditEntry, Channel};

/// Login recorded for callers without an identity.
pub const ANONYMOUS_LOGIN: &str = "anonymous";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    Error,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Error => "error",
        }
    }
}

/// One operation to be recorded.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub login: Option<String>,
    pub operation: &'static str,
    pub args_fingerprint: String,
    pub match_count: u64,
    pub elapsed_ms: Option<u64>,
    pub channel: Channel,
    pub outcome: Outcome,
}

/// SHA-256 hex of the canonical JSON of `args`.
///
/// `serde_json` maps keep keys sorted, so equal arguments always serialize
/// to the same bytes regardless of construction order.
pub fn args_fingerprint(args: &serde_json::Value) -> String {
    let canonical = args.to_string();
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

/// Insert one row; returns its id.
pub fn append(conn: &Connection, login: &str, event: &AuditEvent) -> Result<i64> {
    conn.execute(
        "INSERT INTO audit_log \
             (timestamp, login, operation, args_fingerprint, match_count, elapsed_ms, channel, outcome) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            now_timestamp(),
            login,
            event.operation,
            event.args_fingerprint,
            event.match_count as i64,
            event.elapsed_ms.map(|ms| ms as i64),
            event.channel.as_str(),
            event.outcome.as_str(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Best-effort recorder shared by every service operation.
#[derive(Debug, Clone)]
pub struct AuditRecorder {
    failures: Arc<AtomicU64>,
    record_anonymous: bool,
}

impl AuditRecorder {
    pub fn new(record_anonymous: bool) -> Self {
        Self {
            failures: Arc::new(AtomicU64::new(0)),
            record_anonymous,
        }
    }

    /// Append `event`. Returns whether a row was written.
    pub async fn record(&self, store: &Store, event: AuditEvent) -> bool {
        let login = match event.login.as_deref().map(str::trim).filter(|l| !l.is_empty()) {
            Some(login) => login.to_string(),
            None if self.record_anonymous => ANONYMOUS_LOGIN.to_string(),
            None => return false,
        };

        let operation = event.operation;
        match store.run(move |conn| append(conn, &login, &event)).await {
            Ok(_) => true,
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(operation, error = %e, "audit append failed");
                false
            }
        }
    }

    /// Number of appends that failed since startup.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

/// Per-operation activity over a window.
#[derive(Debug, Clone, Serialize)]
pub struct OperationActivity {
    pub operation: String,
    pub count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_elapsed_ms: Option<f64>,
}

/// Activity since `since` (an RFC 3339 timestamp), busiest operation first.
pub fn activity_since(conn: &Connection, since: &str) -> Result<Vec<OperationActivity>> {
    let mut stmt = conn.prepare(
        "SELECT operation, COUNT(*) AS n, AVG(elapsed_ms) \
         FROM audit_log WHERE timestamp >= ?1 \
         GROUP BY operation ORDER BY n DESC, operation ASC",
    )?;
    let rows = stmt
        .query_map(params![since], |row| {
            Ok(OperationActivity {
                operation: row.get(0)?,
                count: row.get::<_, i64>(1)? as u64,
                avg_elapsed_ms: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Activity within the last `window`.
pub fn activity_within(conn: &Connection, window: chrono::Duration) -> Result<Vec<OperationActivity>> {
    let since = (chrono::Utc::now() - window).to_rfc3339_opts(chrono::SecondsFormat::Micros, true);
    activity_since(conn, &since)
}

/// Newest entries first.
pub fn recent_entries(conn: &Connection, limit: usize) -> Result<Vec<AuditEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, timestamp, login, operation, args_fingerprint, match_count, elapsed_ms, channel, outcome \
         FROM audit_log ORDER BY id DESC LIMIT ?1",
    )?;
    let entries = stmt
        .query_map(params![limit as i64], read_entry)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(entries)
}

fn read_entry(row: &Row<'_>) -> rusqlite::Result<AuditEntry> {
    Ok(AuditEntry {
        id: row.get(0)?,
        timestamp: row.get(1)?,
        login: row.get(2)?,
        operation: row.get(3)?,
        args_fingerprint: row.get(4)?,
        match_count: row.get::<_, i64>(5)? as u64,
        elapsed_ms: row.get::<_, Option<i64>>(6)?.map(|ms| ms as u64),
        channel: row.get(7)?,
        outcome: row.get(8)?,
    })
}
