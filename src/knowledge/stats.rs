use rusqlite::Connection;
use serde::Serialize;

use crate::db::migrations::{get_embedding_model, get_schema_version};
use crate::error::Result;
use crate::knowledge::audit::{activity_within, recent_entries, OperationActivity};
use crate::knowledge::types::AuditEntry;

/// Audit entries included in a metrics snapshot.
pub const RECENT_AUDIT_ENTRIES: usize = 20;

/// Administrative snapshot of the store.
#[derive(Debug, Serialize)]
pub struct Metrics {
    pub timestamp: String,
    pub counts: TableCounts,
    pub activity: Activity,
    pub database: DatabaseInfo,
    pub audit_failures: u64,
}

#[derive(Debug, Serialize)]
pub struct TableCounts {
    pub rules: u64,
    pub project_docs: u64,
    pub projects: u64,
    pub refs: u64,
    pub grants: u64,
    pub audit_entries: u64,
}

#[derive(Debug, Serialize)]
pub struct Activity {
    pub last_hour: Vec<OperationActivity>,
    pub last_day: Vec<OperationActivity>,
    /// Newest audit entries first.
    pub recent: Vec<AuditEntry>,
}

#[derive(Debug, Serialize)]
pub struct DatabaseInfo {
    pub size_bytes: u64,
    pub schema_version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
}

/// Collect counts, recent activity and database size.
///
/// `audit_failures` comes from the in-process recorder, not the database.
pub fn metrics(conn: &Connection, audit_failures: u64) -> Result<Metrics> {
    let counts = TableCounts {
        rules: count(conn, "SELECT COUNT(*) FROM rules")?,
        project_docs: count(conn, "SELECT COUNT(*) FROM project_docs")?,
        projects: count(conn, "SELECT COUNT(DISTINCT project) FROM project_docs")?,
        refs: count(conn, "SELECT COUNT(*) FROM refs")?,
        grants: count(conn, "SELECT COUNT(*) FROM access_tiers")?,
        audit_entries: count(conn, "SELECT COUNT(*) FROM audit_log")?,
    };

    let activity = Activity {
        last_hour: activity_within(conn, chrono::Duration::hours(1))?,
        last_day: activity_within(conn, chrono::Duration::hours(24))?,
        recent: recent_entries(conn, RECENT_AUDIT_ENTRIES)?,
    };

    let size_bytes = count(
        conn,
        "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
    )?;

    Ok(Metrics {
        timestamp: crate::knowledge::now_timestamp(),
        counts,
        activity,
        database: DatabaseInfo {
            size_bytes,
            schema_version: get_schema_version(conn)?,
            embedding_model: get_embedding_model(conn)?,
        },
        audit_failures,
    })
}

fn count(conn: &Connection, sql: &str) -> Result<u64> {
    let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
    Ok(n.max(0) as u64)
}
