//! Core type definitions for the knowledge store.
//!
//! Contains the document kinds, the [`Tags`] set type, caller identity, the
//! stored record shapes, and the validated input types the engine accepts.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::{KnowledgeError, Result};

/// Searchable document kinds (the ones carrying an embedding).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocKind {
    Rule,
    ProjectDoc,
}

impl DocKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rule => "rule",
            Self::ProjectDoc => "project_doc",
        }
    }

    /// Audit operation name for an ingestion of this kind.
    pub fn ingest_operation(&self) -> &'static str {
        match self {
            Self::Rule => "ingest_rule",
            Self::ProjectDoc => "ingest_project_doc",
        }
    }
}

impl std::fmt::Display for DocKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a project document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectDocKind {
    Readme,
    Doc,
    Code,
    Api,
    Todo,
    Comment,
}

impl ProjectDocKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Readme => "readme",
            Self::Doc => "doc",
            Self::Code => "code",
            Self::Api => "api",
            Self::Todo => "todo",
            Self::Comment => "comment",
        }
    }
}

impl std::fmt::Display for ProjectDocKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProjectDocKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "readme" => Ok(Self::Readme),
            "doc" => Ok(Self::Doc),
            "code" => Ok(Self::Code),
            "api" => Ok(Self::Api),
            "todo" => Ok(Self::Todo),
            "comment" => Ok(Self::Comment),
            _ => Err(format!(
                "kind must be one of readme, doc, code, api, todo, comment (got '{s}')"
            )),
        }
    }
}

/// A normalized set of tags: trimmed, lower-cased, no empties, no duplicates.
/// A tag containing commas is split, so the stored form always round-trips.
///
/// Serialized as a JSON array; stored comma-joined.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tags(BTreeSet<String>);

impl Tags {
    pub fn new<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            tags.into_iter()
                .flat_map(|t| {
                    t.as_ref()
                        .split(',')
                        .map(|part| part.trim().to_lowercase())
                        .collect::<Vec<_>>()
                })
                .filter(|t| !t.is_empty())
                .collect(),
        )
    }

    /// Parse the comma-joined storage form.
    pub fn from_csv(csv: &str) -> Self {
        Self::new(csv.split(','))
    }

    /// Comma-joined storage form.
    pub fn to_csv(&self) -> String {
        self.0.iter().cloned().collect::<Vec<_>>().join(",")
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.0.contains(tag)
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.0.iter()
    }
}

/// Front-end surface that carried a call, recorded for audit grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Mcp,
    Http,
    Cli,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mcp => "mcp",
            Self::Http => "http",
            Self::Cli => "cli",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An already-authenticated caller. Identity extraction happens in the
/// front-ends; the engine only sees the result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub login: Option<String>,
    pub display_name: Option<String>,
    pub channel: Channel,
}

impl Caller {
    pub fn anonymous(channel: Channel) -> Self {
        Self {
            login: None,
            display_name: None,
            channel,
        }
    }

    pub fn identified(login: impl Into<String>, channel: Channel) -> Self {
        Self {
            login: Some(login.into()),
            display_name: None,
            channel,
        }
    }

    /// Login with blank values treated as absent.
    pub fn login(&self) -> Option<&str> {
        self.login.as_deref().map(str::trim).filter(|l| !l.is_empty())
    }
}

/// A stored rule (embedding omitted).
#[derive(Debug, Clone, Serialize)]
pub struct Rule {
    pub id: String,
    pub title: String,
    pub body: String,
    pub tags: Tags,
    pub tier: u32,
    pub fingerprint: String,
    pub updated_at: String,
}

/// A stored project document (embedding omitted).
#[derive(Debug, Clone, Serialize)]
pub struct ProjectDoc {
    pub id: String,
    pub project: String,
    pub path: String,
    pub kind: ProjectDocKind,
    pub body: String,
    pub tags: Tags,
    pub fingerprint: String,
    pub updated_at: String,
}

/// A curated reference link.
#[derive(Debug, Clone, Serialize)]
pub struct Reference {
    pub id: String,
    pub title: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub tags: Tags,
    pub tier: u32,
    pub created_at: String,
    pub updated_at: String,
}

/// A row of `access_tiers`.
#[derive(Debug, Clone, Serialize)]
pub struct AccessGrant {
    pub login: String,
    pub tier: u32,
    pub channels: Tags,
    pub created_at: String,
    pub updated_at: String,
}

/// A row of `audit_log`.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub id: i64,
    pub timestamp: String,
    pub login: String,
    pub operation: String,
    pub args_fingerprint: String,
    pub match_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
    pub channel: String,
    pub outcome: String,
}

// ── Validated inputs ──────────────────────────────────────────────────────────

/// A rule payload that passed validation.
#[derive(Debug, Clone)]
pub struct RuleInput {
    pub title: String,
    pub body: String,
    pub tags: Tags,
    pub tier: u32,
}

impl RuleInput {
    /// Validate raw fields, reporting every violation at once.
    pub fn new(title: &str, body: &str, tags: Tags, tier: u32) -> Result<Self> {
        let mut errors = Vec::new();
        require_non_blank(&mut errors, "title", title);
        require_non_blank(&mut errors, "body", body);
        finish(errors)?;

        Ok(Self {
            title: title.trim().to_string(),
            body: body.to_string(),
            tags,
            tier,
        })
    }
}

/// A project document payload that passed validation.
#[derive(Debug, Clone)]
pub struct ProjectDocInput {
    pub project: String,
    pub path: String,
    pub kind: ProjectDocKind,
    pub body: String,
    pub tags: Tags,
}

impl ProjectDocInput {
    pub fn new(project: &str, path: &str, kind: &str, body: &str, tags: Tags) -> Result<Self> {
        let mut errors = Vec::new();
        require_non_blank(&mut errors, "project", project);
        require_non_blank(&mut errors, "path", path);
        let kind = match kind.trim().parse::<ProjectDocKind>() {
            Ok(k) => Some(k),
            Err(e) => {
                errors.push(e);
                None
            }
        };
        require_non_blank(&mut errors, "body", body);
        finish(errors)?;

        Ok(Self {
            project: project.trim().to_string(),
            path: path.trim().to_string(),
            kind: kind.unwrap_or(ProjectDocKind::Doc),
            body: body.to_string(),
            tags,
        })
    }
}

/// A reference payload that passed validation.
#[derive(Debug, Clone)]
pub struct ReferenceInput {
    pub title: String,
    pub url: String,
    pub note: Option<String>,
    pub tags: Tags,
    pub tier: u32,
}

impl ReferenceInput {
    pub fn new(title: &str, url: &str, note: Option<&str>, tags: Tags, tier: u32) -> Result<Self> {
        let mut errors = Vec::new();
        require_non_blank(&mut errors, "title", title);
        let url = match url::Url::parse(url.trim()) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") && parsed.has_host() => {
                Some(url.trim().to_string())
            }
            Ok(parsed) => {
                errors.push(format!("url must be http(s) with a host (got scheme '{}')", parsed.scheme()));
                None
            }
            Err(e) => {
                errors.push(format!("url is malformed: {e}"));
                None
            }
        };
        finish(errors)?;

        Ok(Self {
            title: title.trim().to_string(),
            url: url.unwrap_or_default(),
            note: note.map(str::trim).filter(|n| !n.is_empty()).map(String::from),
            tags,
            tier,
        })
    }
}

fn require_non_blank(errors: &mut Vec<String>, field: &str, value: &str) {
    if value.trim().is_empty() {
        errors.push(format!("{field} must not be empty"));
    }
}

fn finish(errors: Vec<String>) -> Result<()> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(KnowledgeError::Validation { fields: errors })
    }
}
