//! Write path: fingerprinting, deduplicating upsert, same-path supersession.
//!
//! The fingerprint is the upsert key: identical content lands on the same row
//! (same `id`, refreshed `updated_at`), distinct content gets a new row. The
//! caller must already hold a valid embedding; each upsert is one transaction.

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::embedding::vec_to_blob;
use crate::error::Result;
use crate::knowledge::now_timestamp;
use crate::knowledge::types::{DocKind, ProjectDocInput, RuleInput};

/// Result returned from an ingestion.
#[derive(Debug, Clone, Serialize)]
pub struct IngestResult {
    pub id: String,
    pub kind: DocKind,
    pub fingerprint: String,
    /// `true` if a row with this fingerprint already existed and was replaced.
    pub replaced: bool,
    /// Stale project-doc rows at the same path removed by this ingestion.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub superseded: Vec<String>,
}

/// SHA-256 over length-framed fields, hex encoded.
///
/// Each field is followed by a 0x1F separator so that shifting characters
/// between adjacent fields always changes the digest.
pub fn fingerprint(fields: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for field in fields {
        hasher.update(field.as_bytes());
        hasher.update([0x1f]);
    }
    hex::encode(hasher.finalize())
}

pub fn rule_fingerprint(input: &RuleInput) -> String {
    fingerprint(&[&input.title, &input.body])
}

pub fn project_doc_fingerprint(input: &ProjectDocInput) -> String {
    fingerprint(&[&input.project, &input.path, &input.body])
}

/// Text handed to the embedding provider for a rule.
pub fn rule_embedding_text(input: &RuleInput) -> String {
    format!("{}\n\n{}", input.title, input.body)
}

/// Text handed to the embedding provider for a project document.
pub fn project_doc_embedding_text(input: &ProjectDocInput) -> String {
    format!("Project: {}\nPath: {}\n\n{}", input.project, input.path, input.body)
}

/// Insert or replace a rule keyed by its fingerprint.
pub fn upsert_rule(conn: &mut Connection, input: &RuleInput, embedding: &[f32]) -> Result<IngestResult> {
    let fingerprint = rule_fingerprint(input);
    let now = now_timestamp();
    let tx = conn.transaction()?;

    let existing: Option<String> = tx
        .query_row(
            "SELECT id FROM rules WHERE fingerprint = ?1",
            params![fingerprint],
            |row| row.get(0),
        )
        .optional()?;
    let id = existing
        .clone()
        .unwrap_or_else(|| uuid::Uuid::now_v7().to_string());

    tx.execute(
        "INSERT INTO rules (id, title, body, tags_csv, tier, fingerprint, embedding, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
         ON CONFLICT(fingerprint) DO UPDATE SET \
             title = excluded.title, body = excluded.body, tags_csv = excluded.tags_csv, \
             tier = excluded.tier, embedding = excluded.embedding, updated_at = excluded.updated_at",
        params![
            id,
            input.title,
            input.body,
            input.tags.to_csv(),
            input.tier,
            fingerprint,
            vec_to_blob(embedding),
            now,
        ],
    )?;

    tx.commit()?;

    tracing::debug!(id = %id, replaced = existing.is_some(), "rule upserted");
    Ok(IngestResult {
        id,
        kind: DocKind::Rule,
        fingerprint,
        replaced: existing.is_some(),
        superseded: Vec::new(),
    })
}

/// Insert or replace a project document keyed by its fingerprint.
///
/// With `supersede_same_path`, other rows at the same `(project, path)` are
/// deleted in the same transaction, so a path holds only its latest content.
pub fn upsert_project_doc(
    conn: &mut Connection,
    input: &ProjectDocInput,
    embedding: &[f32],
    supersede_same_path: bool,
) -> Result<IngestResult> {
    let fingerprint = project_doc_fingerprint(input);
    let now = now_timestamp();
    let tx = conn.transaction()?;

    let existing: Option<String> = tx
        .query_row(
            "SELECT id FROM project_docs WHERE fingerprint = ?1",
            params![fingerprint],
            |row| row.get(0),
        )
        .optional()?;
    let id = existing
        .clone()
        .unwrap_or_else(|| uuid::Uuid::now_v7().to_string());

    tx.execute(
        "INSERT INTO project_docs (id, project, path, kind, body, tags_csv, fingerprint, embedding, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) \
         ON CONFLICT(fingerprint) DO UPDATE SET \
             kind = excluded.kind, body = excluded.body, tags_csv = excluded.tags_csv, \
             embedding = excluded.embedding, updated_at = excluded.updated_at",
        params![
            id,
            input.project,
            input.path,
            input.kind.as_str(),
            input.body,
            input.tags.to_csv(),
            fingerprint,
            vec_to_blob(embedding),
            now,
        ],
    )?;

    let superseded = if supersede_same_path {
        let stale: Vec<String> = {
            let mut stmt = tx.prepare(
                "SELECT id FROM project_docs WHERE project = ?1 AND path = ?2 AND fingerprint != ?3",
            )?;
            let rows = stmt
                .query_map(params![input.project, input.path, fingerprint], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            rows
        };
        for stale_id in &stale {
            tx.execute("DELETE FROM project_docs WHERE id = ?1", params![stale_id])?;
        }
        stale
    } else {
        Vec::new()
    };

    tx.commit()?;

    tracing::debug!(
        id = %id,
        replaced = existing.is_some(),
        superseded = superseded.len(),
        "project doc upserted"
    );
    Ok(IngestResult {
        id,
        kind: DocKind::ProjectDoc,
        fingerprint,
        replaced: existing.is_some(),
        superseded,
    })
}
