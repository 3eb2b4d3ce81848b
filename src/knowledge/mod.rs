//! The retrieval-and-ingestion engine.
//!
//! Everything here is synchronous and takes a `&Connection` (or `&mut` when a
//! transaction is needed); [`crate::service`] runs it on the blocking pool.

pub mod access;
pub mod audit;
pub mod ingest;
pub mod references;
pub mod search;
pub mod stats;
pub mod types;

use rusqlite::types::Value;

use crate::config::TagMatch;
use types::Tags;

/// Current time in the fixed-width RFC 3339 form used by every timestamp
/// column, so string comparison orders chronologically.
pub fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

/// Escape `%`, `_` and `\` for a `LIKE … ESCAPE '\'` pattern.
pub(crate) fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Build an `(a OR b …)` predicate matching any of `tags` against a
/// comma-joined column, appending the bound patterns to `params`.
///
/// Returns `None` when `tags` is empty (no filter).
pub(crate) fn tag_clause(
    column: &str,
    tags: &Tags,
    mode: TagMatch,
    params: &mut Vec<Value>,
) -> Option<String> {
    if tags.is_empty() {
        return None;
    }

    let mut conditions = Vec::with_capacity(tags.len());
    for tag in tags.iter() {
        params.push(Value::Text(match mode {
            TagMatch::Exact => format!("%,{},%", escape_like(tag)),
            TagMatch::Substring => format!("%{}%", escape_like(tag)),
        }));
        let idx = params.len();
        conditions.push(match mode {
            TagMatch::Exact => format!("(',' || {column} || ',') LIKE ?{idx} ESCAPE '\\'"),
            TagMatch::Substring => format!("{column} LIKE ?{idx} ESCAPE '\\'"),
        });
    }

    Some(format!("({})", conditions.join(" OR ")))
}

/// Clip `content` to at most `max_chars` characters on a char boundary.
pub(crate) fn clip_chars(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => content[..byte_idx].to_string(),
        None => content.to_string(),
    }
}
