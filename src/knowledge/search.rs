//! Read path: scored vector search, browse, context packs, lookups.
//!
//! Scoring is `vec_distance_cosine` evaluated by SQLite against the stored
//! embedding BLOBs. Tier gating and tag filtering sit in the `WHERE` clause,
//! so `LIMIT k` only ever truncates rows the caller is allowed to see.

use std::collections::BTreeSet;

use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::Serialize;

use crate::config::{RetrievalConfig, TagMatch};
use crate::embedding::vec_to_blob;
use crate::error::{KnowledgeError, Result};
use crate::knowledge::types::{ProjectDoc, ProjectDocKind, Rule, Tags};
use crate::knowledge::{clip_chars, escape_like, tag_clause};

/// A search hit. Lower `score` is closer.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredResult<T> {
    #[serde(flatten)]
    pub item: T,
    pub score: f64,
}

/// A project document listed by browse, without its body.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectDocSummary {
    pub id: String,
    pub project: String,
    pub path: String,
    pub kind: ProjectDocKind,
    pub tags: Tags,
    pub updated_at: String,
}

/// A named section of a context pack.
#[derive(Debug, Clone, Serialize)]
pub struct ContextFacet {
    pub name: String,
    pub docs: Vec<ProjectDoc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContextPack {
    pub project: String,
    pub facets: Vec<ContextFacet>,
}

/// Built-in context pack facets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Facet {
    Readme,
    Api,
    Recent,
}

impl Facet {
    pub const DEFAULT: [&'static str; 2] = ["readme", "api"];

    /// `None` for unknown facet names; callers skip those.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "readme" => Some(Self::Readme),
            "api" => Some(Self::Api),
            "recent" => Some(Self::Recent),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Readme => "readme",
            Self::Api => "api",
            Self::Recent => "recent",
        }
    }

    fn kind(&self) -> Option<ProjectDocKind> {
        match self {
            Self::Readme => Some(ProjectDocKind::Readme),
            Self::Api => Some(ProjectDocKind::Api),
            Self::Recent => None,
        }
    }

    fn limit(&self) -> usize {
        match self {
            Self::Readme => 3,
            Self::Api => 5,
            Self::Recent => 10,
        }
    }
}

/// Resolve a requested `k` against the configured default and ceiling.
pub fn resolve_k(k: Option<usize>, config: &RetrievalConfig) -> Result<usize> {
    let k = k.unwrap_or(config.default_k);
    if k < 1 || k > config.max_k {
        return Err(KnowledgeError::InvalidArgument(format!(
            "k must be between 1 and {} (got {k})",
            config.max_k
        )));
    }
    Ok(k)
}

/// Top-`k` rules visible at `caller_tier`, closest first.
pub fn search_rules(
    conn: &Connection,
    query_vector: &[f32],
    k: usize,
    tags: &Tags,
    mode: TagMatch,
    caller_tier: u32,
) -> Result<Vec<ScoredResult<Rule>>> {
    let mut params: Vec<Value> = vec![
        Value::Blob(vec_to_blob(query_vector)),
        Value::Integer(i64::from(caller_tier)),
    ];
    let mut sql = String::from(
        "SELECT id, title, body, tags_csv, tier, fingerprint, updated_at, \
                vec_distance_cosine(embedding, ?1) AS score \
         FROM rules WHERE tier <= ?2",
    );
    if let Some(clause) = tag_clause("tags_csv", tags, mode, &mut params) {
        sql.push_str(" AND ");
        sql.push_str(&clause);
    }
    params.push(Value::Integer(k as i64));
    sql.push_str(&format!(" ORDER BY score ASC, id ASC LIMIT ?{}", params.len()));

    let mut stmt = conn.prepare(&sql)?;
    let results = stmt
        .query_map(params_from_iter(params.iter()), |row| {
            Ok(ScoredResult {
                item: read_rule(row)?,
                score: row.get(7)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(results)
}

/// Top-`k` documents of one project, closest first. Project docs carry no tier.
pub fn search_project_docs(
    conn: &Connection,
    project: &str,
    query_vector: &[f32],
    k: usize,
    tags: &Tags,
    mode: TagMatch,
) -> Result<Vec<ScoredResult<ProjectDoc>>> {
    let mut params: Vec<Value> = vec![
        Value::Blob(vec_to_blob(query_vector)),
        Value::Text(project.to_string()),
    ];
    let mut sql = String::from(
        "SELECT id, project, path, kind, body, tags_csv, fingerprint, updated_at, \
                vec_distance_cosine(embedding, ?1) AS score \
         FROM project_docs WHERE project = ?2",
    );
    if let Some(clause) = tag_clause("tags_csv", tags, mode, &mut params) {
        sql.push_str(" AND ");
        sql.push_str(&clause);
    }
    params.push(Value::Integer(k as i64));
    sql.push_str(&format!(" ORDER BY score ASC, id ASC LIMIT ?{}", params.len()));

    let mut stmt = conn.prepare(&sql)?;
    let results = stmt
        .query_map(params_from_iter(params.iter()), |row| {
            Ok(ScoredResult {
                item: read_project_doc(row)?,
                score: row.get(8)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(results)
}

/// List a project's documents by path, optionally under a literal prefix.
pub fn browse_project_docs(
    conn: &Connection,
    project: &str,
    path_prefix: Option<&str>,
) -> Result<Vec<ProjectDocSummary>> {
    let mut params: Vec<Value> = vec![Value::Text(project.to_string())];
    let mut sql = String::from(
        "SELECT id, project, path, kind, tags_csv, updated_at FROM project_docs WHERE project = ?1",
    );
    if let Some(prefix) = path_prefix.filter(|p| !p.is_empty()) {
        params.push(Value::Text(format!("{}%", escape_like(prefix))));
        sql.push_str(" AND path LIKE ?2 ESCAPE '\\'");
    }
    sql.push_str(" ORDER BY path ASC, id ASC");

    let mut stmt = conn.prepare(&sql)?;
    let docs = stmt
        .query_map(params_from_iter(params.iter()), |row| {
            Ok(ProjectDocSummary {
                id: row.get(0)?,
                project: row.get(1)?,
                path: row.get(2)?,
                kind: parse_kind(row, 3)?,
                tags: Tags::from_csv(&row.get::<_, String>(4)?),
                updated_at: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    // LIKE is case-insensitive for ASCII; the prefix must match exactly.
    Ok(match path_prefix.filter(|p| !p.is_empty()) {
        Some(prefix) => docs.into_iter().filter(|d| d.path.starts_with(prefix)).collect(),
        None => docs,
    })
}

/// Assemble a bounded context pack. Unknown facet names are skipped.
pub fn get_context_pack(
    conn: &Connection,
    project: &str,
    facets: &[String],
    body_chars: usize,
) -> Result<ContextPack> {
    let mut sections = Vec::new();

    for name in facets {
        let Some(facet) = Facet::parse(name) else {
            tracing::debug!(facet = %name, "skipping unknown context facet");
            continue;
        };
        if sections.iter().any(|s: &ContextFacet| s.name == facet.name()) {
            continue;
        }

        let mut stmt = conn.prepare(
            "SELECT id, project, path, kind, body, tags_csv, fingerprint, updated_at \
             FROM project_docs \
             WHERE project = ?1 AND (?2 IS NULL OR kind = ?2) \
             ORDER BY updated_at DESC, id DESC LIMIT ?3",
        )?;
        let docs = stmt
            .query_map(
                params![project, facet.kind().map(|k| k.as_str()), facet.limit() as i64],
                |row| {
                    let mut doc = read_project_doc(row)?;
                    doc.body = clip_chars(&doc.body, body_chars);
                    Ok(doc)
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;

        sections.push(ContextFacet {
            name: facet.name().to_string(),
            docs,
        });
    }

    Ok(ContextPack {
        project: project.to_string(),
        facets: sections,
    })
}

/// Fetch one rule. Rows above `caller_tier` are reported exactly like
/// missing rows.
pub fn get_rule_by_id(conn: &Connection, id: &str, caller_tier: u32) -> Result<Rule> {
    conn.query_row(
        "SELECT id, title, body, tags_csv, tier, fingerprint, updated_at \
         FROM rules WHERE id = ?1 AND tier <= ?2",
        params![id, caller_tier],
        read_rule,
    )
    .optional()?
    .ok_or_else(|| KnowledgeError::NotFound(format!("rule {id}")))
}

/// Sorted distinct tags across rules visible at `caller_tier`.
pub fn list_distinct_tags(conn: &Connection, caller_tier: u32) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT tags_csv FROM rules WHERE tier <= ?1 AND tags_csv != ''")?;
    let rows = stmt
        .query_map(params![caller_tier], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    let tags: BTreeSet<String> = rows
        .iter()
        .flat_map(|csv| Tags::from_csv(csv).iter().cloned().collect::<Vec<_>>())
        .collect();
    Ok(tags.into_iter().collect())
}

pub fn list_projects(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT DISTINCT project FROM project_docs ORDER BY project")?;
    let projects = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(projects)
}

fn read_rule(row: &Row<'_>) -> rusqlite::Result<Rule> {
    Ok(Rule {
        id: row.get(0)?,
        title: row.get(1)?,
        body: row.get(2)?,
        tags: Tags::from_csv(&row.get::<_, String>(3)?),
        tier: row.get(4)?,
        fingerprint: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn read_project_doc(row: &Row<'_>) -> rusqlite::Result<ProjectDoc> {
    Ok(ProjectDoc {
        id: row.get(0)?,
        project: row.get(1)?,
        path: row.get(2)?,
        kind: parse_kind(row, 3)?,
        body: row.get(4)?,
        tags: Tags::from_csv(&row.get::<_, String>(5)?),
        fingerprint: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

fn parse_kind(row: &Row<'_>, idx: usize) -> rusqlite::Result<ProjectDocKind> {
    row.get::<_, String>(idx)?
        .parse()
        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::ingest::{upsert_project_doc, upsert_rule};
    use crate::knowledge::types::{ProjectDocInput, RuleInput};

    fn test_db() -> Connection {
        crate::db::open_memory_database().unwrap()
    }

    fn axis(i: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; 8];
        v[i] = 1.0;
        v
    }

    fn blend(i: usize, j: usize, w: f32) -> Vec<f32> {
        let mut v = vec![0.0f32; 8];
        v[i] = 1.0 - w;
        v[j] = w;
        v
    }

    fn add_rule(conn: &mut Connection, title: &str, tags: &[&str], tier: u32, emb: &[f32]) -> String {
        let input = RuleInput::new(title, &format!("{title} body"), Tags::new(tags), tier).unwrap();
        upsert_rule(conn, &input, emb).unwrap().id
    }

    fn add_doc(conn: &mut Connection, project: &str, path: &str, kind: &str, body: &str) -> String {
        let input = ProjectDocInput::new(project, path, kind, body, Tags::default()).unwrap();
        upsert_project_doc(conn, &input, &axis(0), true).unwrap().id
    }

    #[test]
    fn results_are_ordered_by_ascending_distance() {
        let mut conn = test_db();
        let far = add_rule(&mut conn, "far", &[], 0, &axis(1));
        let near = add_rule(&mut conn, "near", &[], 0, &axis(0));
        let mid = add_rule(&mut conn, "mid", &[], 0, &blend(0, 1, 0.5));

        let results = search_rules(&conn, &axis(0), 10, &Tags::default(), TagMatch::Exact, 0).unwrap();
        let ids: Vec<_> = results.iter().map(|r| r.item.id.clone()).collect();
        assert_eq!(ids, vec![near, mid, far]);
        assert!(results.windows(2).all(|w| w[0].score <= w[1].score));
    }

    #[test]
    fn k_truncates_after_tier_gating() {
        let mut conn = test_db();
        // Closest rule is hidden at tier 2.
        add_rule(&mut conn, "secret", &[], 2, &axis(0));
        let visible = add_rule(&mut conn, "visible", &[], 0, &blend(0, 1, 0.2));
        add_rule(&mut conn, "other", &[], 0, &axis(1));

        let results = search_rules(&conn, &axis(0), 1, &Tags::default(), TagMatch::Exact, 0).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].item.id, visible);

        let admin = search_rules(&conn, &axis(0), 1, &Tags::default(), TagMatch::Exact, 2).unwrap();
        assert_eq!(admin[0].item.title, "secret");
    }

    #[test]
    fn exact_tags_do_not_match_superstrings() {
        let mut conn = test_db();
        add_rule(&mut conn, "graphics", &["graphics-api"], 0, &axis(0));
        let api = add_rule(&mut conn, "rest", &["api"], 0, &axis(1));

        let exact = search_rules(&conn, &axis(0), 10, &Tags::new(["api"]), TagMatch::Exact, 0).unwrap();
        assert_eq!(exact.len(), 1);
        assert_eq!(exact[0].item.id, api);

        let loose = search_rules(&conn, &axis(0), 10, &Tags::new(["api"]), TagMatch::Substring, 0).unwrap();
        assert_eq!(loose.len(), 2);
    }

    #[test]
    fn resolve_k_bounds() {
        let config = RetrievalConfig::default();
        assert_eq!(resolve_k(None, &config).unwrap(), 10);
        assert_eq!(resolve_k(Some(100), &config).unwrap(), 100);
        assert!(matches!(resolve_k(Some(0), &config), Err(KnowledgeError::InvalidArgument(_))));
        assert!(matches!(resolve_k(Some(101), &config), Err(KnowledgeError::InvalidArgument(_))));
    }

    #[test]
    fn project_search_is_scoped() {
        let mut conn = test_db();
        add_doc(&mut conn, "atlas", "README.md", "readme", "Atlas");
        add_doc(&mut conn, "borealis", "README.md", "readme", "Borealis");

        let results =
            search_project_docs(&conn, "atlas", &axis(0), 10, &Tags::default(), TagMatch::Exact).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].item.project, "atlas");
    }

    #[test]
    fn browse_prefix_is_literal_and_sorted() {
        let mut conn = test_db();
        add_doc(&mut conn, "atlas", "src/z.rs", "code", "z");
        add_doc(&mut conn, "atlas", "src/a.rs", "code", "a");
        add_doc(&mut conn, "atlas", "src_old/b.rs", "code", "b");
        add_doc(&mut conn, "atlas", "docs/x.md", "doc", "x");

        let all = browse_project_docs(&conn, "atlas", None).unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all[0].path, "docs/x.md");

        // `_` must not act as a wildcard.
        let under = browse_project_docs(&conn, "atlas", Some("src_")).unwrap();
        assert_eq!(under.len(), 1);
        assert_eq!(under[0].path, "src_old/b.rs");

        let src: Vec<_> = browse_project_docs(&conn, "atlas", Some("src/"))
            .unwrap()
            .into_iter()
            .map(|d| d.path)
            .collect();
        assert_eq!(src, vec!["src/a.rs", "src/z.rs"]);
    }

    #[test]
    fn context_pack_is_bounded() {
        let mut conn = test_db();
        for i in 0..8 {
            add_doc(&mut conn, "atlas", &format!("api/{i}.md"), "api", &"x".repeat(1500 + i));
        }
        add_doc(&mut conn, "atlas", "README.md", "readme", "Atlas readme");

        let facets = vec!["api".to_string(), "bogus".to_string(), "readme".to_string()];
        let pack = get_context_pack(&conn, "atlas", &facets, 1000).unwrap();

        assert_eq!(pack.facets.len(), 2);
        let api = &pack.facets[0];
        assert_eq!(api.name, "api");
        assert_eq!(api.docs.len(), 5);
        assert!(api.docs.iter().all(|d| d.body.chars().count() <= 1000));
        assert_eq!(pack.facets[1].docs.len(), 1);
    }

    #[test]
    fn hidden_rule_is_not_found() {
        let mut conn = test_db();
        let id = add_rule(&mut conn, "secret", &[], 2, &axis(0));
        assert!(matches!(get_rule_by_id(&conn, &id, 1), Err(KnowledgeError::NotFound(_))));
        assert!(matches!(get_rule_by_id(&conn, "missing", 5), Err(KnowledgeError::NotFound(_))));
        assert_eq!(get_rule_by_id(&conn, &id, 2).unwrap().title, "secret");
    }

    #[test]
    fn distinct_tags_respect_tier() {
        let mut conn = test_db();
        add_rule(&mut conn, "a", &["security", "api"], 0, &axis(0));
        add_rule(&mut conn, "b", &["internal"], 3, &axis(1));
        assert_eq!(list_distinct_tags(&conn, 0).unwrap(), vec!["api", "security"]);
        assert_eq!(list_distinct_tags(&conn, 3).unwrap().len(), 3);
    }

    #[test]
    fn projects_are_distinct_and_sorted() {
        let mut conn = test_db();
        add_doc(&mut conn, "zeta", "a.md", "doc", "a");
        add_doc(&mut conn, "alpha", "a.md", "doc", "a");
        add_doc(&mut conn, "alpha", "b.md", "doc", "b");
        assert_eq!(list_projects(&conn).unwrap(), vec!["alpha", "zeta"]);
    }
}
