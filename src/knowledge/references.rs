//! Curated reference links. Plain rows, no embedding; newest first.

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row};

use crate::config::TagMatch;
use crate::error::{KnowledgeError, Result};
use crate::knowledge::types::{Reference, ReferenceInput, Tags};
use crate::knowledge::{now_timestamp, tag_clause};

/// Upper bound for a reference listing.
pub const MAX_REFERENCE_LIMIT: usize = 500;

pub fn resolve_limit(limit: Option<usize>, default: usize) -> Result<usize> {
    let limit = limit.unwrap_or(default);
    if limit < 1 || limit > MAX_REFERENCE_LIMIT {
        return Err(KnowledgeError::InvalidArgument(format!(
            "limit must be between 1 and {MAX_REFERENCE_LIMIT} (got {limit})"
        )));
    }
    Ok(limit)
}

/// References visible at `caller_tier` sharing any of `tags`, newest first.
pub fn list_references(
    conn: &Connection,
    tags: &Tags,
    mode: TagMatch,
    limit: usize,
    caller_tier: u32,
) -> Result<Vec<Reference>> {
    let mut params: Vec<Value> = vec![Value::Integer(i64::from(caller_tier))];
    let mut sql = String::from(
        "SELECT id, title, url, note, tags_csv, tier, created_at, updated_at \
         FROM refs WHERE tier <= ?1",
    );
    if let Some(clause) = tag_clause("tags_csv", tags, mode, &mut params) {
        sql.push_str(" AND ");
        sql.push_str(&clause);
    }
    params.push(Value::Integer(limit as i64));
    sql.push_str(&format!(
        " ORDER BY updated_at DESC, id DESC LIMIT ?{}",
        params.len()
    ));

    let mut stmt = conn.prepare(&sql)?;
    let refs = stmt
        .query_map(params_from_iter(params.iter()), read_reference)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(refs)
}

/// Single-tag listing, capped at [`MAX_REFERENCE_LIMIT`].
pub fn find_references_by_tag(
    conn: &Connection,
    tag: &str,
    mode: TagMatch,
    caller_tier: u32,
) -> Result<Vec<Reference>> {
    let tags = Tags::new([tag]);
    if tags.is_empty() {
        return Err(KnowledgeError::invalid_field("tag must not be empty"));
    }
    list_references(conn, &tags, mode, MAX_REFERENCE_LIMIT, caller_tier)
}

pub fn add_reference(conn: &Connection, input: &ReferenceInput) -> Result<Reference> {
    let id = uuid::Uuid::now_v7().to_string();
    let now = now_timestamp();

    conn.execute(
        "INSERT INTO refs (id, title, url, note, tags_csv, tier, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
        params![
            id,
            input.title,
            input.url,
            input.note,
            input.tags.to_csv(),
            input.tier,
            now,
        ],
    )?;

    tracing::debug!(id = %id, url = %input.url, "reference added");
    Ok(Reference {
        id,
        title: input.title.clone(),
        url: input.url.clone(),
        note: input.note.clone(),
        tags: input.tags.clone(),
        tier: input.tier,
        created_at: now.clone(),
        updated_at: now,
    })
}

fn read_reference(row: &Row<'_>) -> rusqlite::Result<Reference> {
    Ok(Reference {
        id: row.get(0)?,
        title: row.get(1)?,
        url: row.get(2)?,
        note: row.get(3)?,
        tags: Tags::from_csv(&row.get::<_, String>(4)?),
        tier: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}
