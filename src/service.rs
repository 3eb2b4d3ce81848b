//! Operation facade shared by the MCP tools, the REST routes and the CLI.
//!
//! Every public operation follows the same shape: resolve the caller's grant,
//! authorize, execute against the store (embedding first where needed), then
//! hand one [`AuditEvent`] to the recorder whether the operation succeeded or
//! not. Front-ends only convert their wire types into the request structs
//! below and render the result.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::config::KnowledgeConfig;
use crate::db::{self, HealthReport, Store};
use crate::embedding::{create_provider, EmbeddingAdapter};
use crate::error::{KnowledgeError, Result};
use crate::knowledge::access;
use crate::knowledge::audit::{args_fingerprint, AuditEvent, AuditRecorder, Outcome};
use crate::knowledge::ingest::{self, IngestResult};
use crate::knowledge::references;
use crate::knowledge::search::{self, ContextPack, Facet, ProjectDocSummary, ScoredResult};
use crate::knowledge::stats::{self, Metrics};
use crate::knowledge::types::{
    AccessGrant, Caller, Channel, DocKind, ProjectDoc, ProjectDocInput, Reference, ReferenceInput, Rule,
    RuleInput, Tags,
};

// ── Requests ──────────────────────────────────────────────────────────────────
//
// Missing text fields deserialize as empty so that validation, not the wire
// decoder, reports them (and the attempt is audited).

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRule {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub tier: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProjectDoc {
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewReference {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub tier: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleSearch {
    pub query: String,
    #[serde(default)]
    pub k: Option<usize>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectSearch {
    pub project: String,
    pub query: String,
    #[serde(default)]
    pub k: Option<usize>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReferenceQuery {
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

// ── Service ───────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct KnowledgeService {
    store: Store,
    embedder: EmbeddingAdapter,
    config: Arc<KnowledgeConfig>,
    audit: AuditRecorder,
}

impl KnowledgeService {
    pub fn new(store: Store, embedder: EmbeddingAdapter, config: Arc<KnowledgeConfig>) -> Self {
        let audit = AuditRecorder::new(config.audit.record_anonymous);
        Self {
            store,
            embedder,
            config,
            audit,
        }
    }

    /// Open the configured database and embedding provider.
    pub fn open(config: KnowledgeConfig) -> anyhow::Result<Self> {
        let db_path = config.resolved_db_path();
        let store = Store::open(&db_path, Duration::from_secs(config.storage.timeout_secs))
            .with_context(|| format!("failed to open database at {}", db_path.display()))?;

        let provider = create_provider(&config.embedding)?;
        let embedder = EmbeddingAdapter::from_config(provider, &config.embedding);

        store.with_conn(|conn| {
            match db::migrations::get_embedding_model(conn)? {
                Some(stored) if stored != embedder.model_name() => {
                    tracing::warn!(
                        stored = %stored,
                        configured = %embedder.model_name(),
                        "embedding model changed; existing vectors were produced by a different model"
                    );
                }
                Some(_) => {}
                None => db::migrations::set_embedding_model(conn, embedder.model_name())?,
            }
            Ok(())
        })?;

        tracing::info!(
            db = %db_path.display(),
            model = %embedder.model_name(),
            dimensions = embedder.dimensions(),
            "knowledge service ready"
        );
        Ok(Self::new(store, embedder, Arc::new(config)))
    }

    pub fn config(&self) -> &KnowledgeConfig {
        &self.config
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn audit_failures(&self) -> u64 {
        self.audit.failures()
    }

    /// Consume the service and close the database.
    pub fn shutdown(self) -> anyhow::Result<()> {
        let Self { store, .. } = self;
        store.close()
    }

    // ── Ingestion ─────────────────────────────────────────────────────────────

    pub async fn ingest_rule(&self, caller: &Caller, req: NewRule) -> Result<IngestResult> {
        let args = to_args(&req);
        self.audited(caller, DocKind::Rule.ingest_operation(), args, |_| 1, async {
            let input = RuleInput::new(
                &req.title,
                &req.body,
                Tags::new(&req.tags),
                req.tier.unwrap_or(0),
            )?;
            self.require_ingest_identity(caller)?;
            let required = self.config.access.ingest_min_tier.max(input.tier);
            self.authorize(caller, required).await?;

            let embedding = self.embedder.embed(&ingest::rule_embedding_text(&input)).await?;
            self.store
                .run(move |conn| ingest::upsert_rule(conn, &input, &embedding))
                .await
        })
        .await
    }

    pub async fn ingest_project_doc(&self, caller: &Caller, req: NewProjectDoc) -> Result<IngestResult> {
        let args = to_args(&req);
        let supersede = self.config.storage.supersede_same_path;
        self.audited(caller, DocKind::ProjectDoc.ingest_operation(), args, |_| 1, async {
            let input = ProjectDocInput::new(
                &req.project,
                &req.path,
                &req.kind,
                &req.body,
                Tags::new(&req.tags),
            )?;
            self.require_ingest_identity(caller)?;
            self.authorize(caller, self.config.access.ingest_min_tier).await?;

            let embedding = self
                .embedder
                .embed(&ingest::project_doc_embedding_text(&input))
                .await?;
            self.store
                .run(move |conn| ingest::upsert_project_doc(conn, &input, &embedding, supersede))
                .await
        })
        .await
    }

    // ── Retrieval ─────────────────────────────────────────────────────────────

    pub async fn search_rules(&self, caller: &Caller, req: RuleSearch) -> Result<Vec<ScoredResult<Rule>>> {
        let args = to_args(&req);
        self.audited(caller, "search_rules", args, |r: &Vec<_>| r.len() as u64, async {
            let query = require_query(&req.query)?;
            let k = search::resolve_k(req.k, &self.config.retrieval)?;
            let tags = Tags::new(&req.tags);
            let tier = self.authorize(caller, 0).await?;

            let vector = self.embedder.embed(query).await?;
            let mode = self.config.retrieval.tag_match;
            self.store
                .run(move |conn| search::search_rules(conn, &vector, k, &tags, mode, tier))
                .await
        })
        .await
    }

    pub async fn search_project_docs(
        &self,
        caller: &Caller,
        req: ProjectSearch,
    ) -> Result<Vec<ScoredResult<ProjectDoc>>> {
        let args = to_args(&req);
        self.audited(caller, "search_project_docs", args, |r: &Vec<_>| r.len() as u64, async {
            let project = require_project(&req.project)?;
            let query = require_query(&req.query)?;
            let k = search::resolve_k(req.k, &self.config.retrieval)?;
            let tags = Tags::new(&req.tags);
            self.authorize(caller, 0).await?;

            let vector = self.embedder.embed(query).await?;
            let mode = self.config.retrieval.tag_match;
            self.store
                .run(move |conn| search::search_project_docs(conn, &project, &vector, k, &tags, mode))
                .await
        })
        .await
    }

    pub async fn browse_project_docs(
        &self,
        caller: &Caller,
        project: &str,
        path_prefix: Option<&str>,
    ) -> Result<Vec<ProjectDocSummary>> {
        let args = serde_json::json!({ "project": project, "path_prefix": path_prefix });
        self.audited(caller, "browse_project_docs", args, |r: &Vec<_>| r.len() as u64, async {
            let project = require_project(project)?;
            let prefix = path_prefix.map(String::from);
            self.authorize(caller, 0).await?;
            self.store
                .run(move |conn| search::browse_project_docs(conn, &project, prefix.as_deref()))
                .await
        })
        .await
    }

    /// Bounded per-project context. An empty `facets` list means the default
    /// `readme` + `api` pair.
    pub async fn get_context_pack(&self, caller: &Caller, project: &str, facets: &[String]) -> Result<ContextPack> {
        let args = serde_json::json!({ "project": project, "facets": facets });
        let count = |pack: &ContextPack| pack.facets.iter().map(|f| f.docs.len() as u64).sum::<u64>();
        self.audited(caller, "get_context_pack", args, count, async {
            let project = require_project(project)?;
            let facets: Vec<String> = if facets.is_empty() {
                Facet::DEFAULT.iter().map(|f| f.to_string()).collect()
            } else {
                facets.to_vec()
            };
            self.authorize(caller, 0).await?;

            let body_chars = self.config.retrieval.context_body_chars;
            self.store
                .run(move |conn| search::get_context_pack(conn, &project, &facets, body_chars))
                .await
        })
        .await
    }

    pub async fn get_rule_by_id(&self, caller: &Caller, id: &str) -> Result<Rule> {
        let args = serde_json::json!({ "id": id });
        self.audited(caller, "get_rule_by_id", args, |_| 1, async {
            let id = id.trim().to_string();
            if id.is_empty() {
                return Err(KnowledgeError::invalid_field("id must not be empty"));
            }
            let tier = self.authorize(caller, 0).await?;
            self.store
                .run(move |conn| search::get_rule_by_id(conn, &id, tier))
                .await
        })
        .await
    }

    pub async fn list_distinct_tags(&self, caller: &Caller) -> Result<Vec<String>> {
        self.audited(caller, "list_distinct_tags", serde_json::json!({}), |r: &Vec<_>| r.len() as u64, async {
            let tier = self.authorize(caller, 0).await?;
            self.store
                .run(move |conn| search::list_distinct_tags(conn, tier))
                .await
        })
        .await
    }

    pub async fn list_projects(&self, caller: &Caller) -> Result<Vec<String>> {
        self.audited(caller, "list_projects", serde_json::json!({}), |r: &Vec<_>| r.len() as u64, async {
            self.authorize(caller, 0).await?;
            self.store.run(|conn| search::list_projects(conn)).await
        })
        .await
    }

    // ── References ────────────────────────────────────────────────────────────

    pub async fn list_references(&self, caller: &Caller, req: ReferenceQuery) -> Result<Vec<Reference>> {
        let args = to_args(&req);
        self.audited(caller, "list_references", args, |r: &Vec<_>| r.len() as u64, async {
            let limit = references::resolve_limit(req.limit, self.config.retrieval.default_reference_limit)?;
            let tags = Tags::new(&req.tags);
            let tier = self.authorize(caller, 0).await?;
            let mode = self.config.retrieval.tag_match;
            self.store
                .run(move |conn| references::list_references(conn, &tags, mode, limit, tier))
                .await
        })
        .await
    }

    pub async fn add_reference(&self, caller: &Caller, req: NewReference) -> Result<Reference> {
        let args = to_args(&req);
        self.audited(caller, "add_reference", args, |_| 1, async {
            let input = ReferenceInput::new(
                &req.title,
                &req.url,
                req.note.as_deref(),
                Tags::new(&req.tags),
                req.tier.unwrap_or(0),
            )?;
            let required = self.config.access.reference_min_tier.max(input.tier);
            self.authorize(caller, required).await?;
            self.store
                .run(move |conn| references::add_reference(conn, &input))
                .await
        })
        .await
    }

    pub async fn find_references_by_tag(&self, caller: &Caller, tag: &str) -> Result<Vec<Reference>> {
        let args = serde_json::json!({ "tag": tag });
        self.audited(caller, "find_references_by_tag", args, |r: &Vec<_>| r.len() as u64, async {
            let tag = tag.to_string();
            let tier = self.authorize(caller, 0).await?;
            let mode = self.config.retrieval.tag_match;
            self.store
                .run(move |conn| references::find_references_by_tag(conn, &tag, mode, tier))
                .await
        })
        .await
    }

    // ── Administration ────────────────────────────────────────────────────────

    pub async fn metrics(&self, caller: &Caller) -> Result<Metrics> {
        self.audited(caller, "metrics", serde_json::json!({}), |_| 1, async {
            self.authorize(caller, self.config.access.admin_min_tier).await?;
            let failures = self.audit.failures();
            self.store.run(move |conn| stats::metrics(conn, failures)).await
        })
        .await
    }

    /// Liveness check. Not audited, so load balancers do not flood the log.
    pub async fn health(&self) -> Result<HealthReport> {
        self.store.run(|conn| db::check_health(conn)).await
    }

    /// Create or replace a login's grant. Only the local operator CLI may do
    /// this; it already has direct access to the database file.
    pub async fn grant_tier(
        &self,
        caller: &Caller,
        login: &str,
        tier: u32,
        channels: &[String],
    ) -> Result<AccessGrant> {
        let args = serde_json::json!({ "login": login, "tier": tier, "channels": channels });
        self.audited(caller, "grant_tier", args, |_| 1, async {
            self.require_cli(caller)?;
            let login = login.to_string();
            let channels = Tags::new(channels);
            self.store
                .run(move |conn| access::grant(conn, &login, tier, &channels))
                .await
        })
        .await
    }

    pub async fn list_grants(&self, caller: &Caller) -> Result<Vec<AccessGrant>> {
        self.audited(caller, "list_grants", serde_json::json!({}), |r: &Vec<_>| r.len() as u64, async {
            self.require_cli(caller)?;
            self.store.run(|conn| access::list_grants(conn)).await
        })
        .await
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    /// Check the caller against `required` and return the tier to gate
    /// reads with.
    async fn authorize(&self, caller: &Caller, required: u32) -> Result<u32> {
        let login = caller.login().map(String::from);
        let channel = caller.channel;
        let admitted = self
            .store
            .run(move |conn| access::admit(conn, login.as_deref(), required, channel))
            .await;
        if let Err(KnowledgeError::Forbidden { actual, .. }) = &admitted {
            tracing::info!(
                login = caller.login().unwrap_or("-"),
                channel = %caller.channel,
                required,
                tier = *actual,
                "access denied"
            );
        }
        admitted
    }

    fn require_ingest_identity(&self, caller: &Caller) -> Result<()> {
        if self.config.access.require_identity_for_ingest && caller.login().is_none() {
            return Err(KnowledgeError::Unauthenticated(
                "ingestion requires an identified caller".into(),
            ));
        }
        Ok(())
    }

    /// Grant management is reserved for the CLI; elsewhere the caller's
    /// effective tier is 0.
    fn require_cli(&self, caller: &Caller) -> Result<()> {
        if caller.channel != Channel::Cli {
            return Err(KnowledgeError::Forbidden {
                required: self.config.access.admin_min_tier,
                actual: 0,
            });
        }
        Ok(())
    }

    /// Run `op`, then record exactly one audit entry for it.
    async fn audited<T, F, C>(
        &self,
        caller: &Caller,
        operation: &'static str,
        args: serde_json::Value,
        count: C,
        op: F,
    ) -> Result<T>
    where
        F: Future<Output = Result<T>>,
        C: FnOnce(&T) -> u64,
    {
        let started = Instant::now();
        let result = op.await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let (outcome, match_count) = match &result {
            Ok(value) => (Outcome::Ok, count(value)),
            Err(e) => {
                tracing::debug!(operation, error = %e, "operation failed");
                (Outcome::Error, 0)
            }
        };

        tracing::info!(
            operation,
            login = caller.login().unwrap_or("-"),
            channel = %caller.channel,
            outcome = outcome.as_str(),
            match_count,
            elapsed_ms,
            "operation complete"
        );

        let event = AuditEvent {
            login: caller.login().map(String::from),
            operation,
            args_fingerprint: args_fingerprint(&args),
            match_count,
            elapsed_ms: Some(elapsed_ms),
            channel: caller.channel,
            outcome,
        };
        self.audit.record(&self.store, event).await;

        result
    }
}

fn to_args<T: Serialize>(req: &T) -> serde_json::Value {
    serde_json::to_value(req).unwrap_or(serde_json::Value::Null)
}

fn require_query(query: &str) -> Result<&str> {
    let query = query.trim();
    if query.is_empty() {
        return Err(KnowledgeError::invalid_field("query must not be empty"));
    }
    Ok(query)
}

fn require_project(project: &str) -> Result<String> {
    let project = project.trim();
    if project.is_empty() {
        return Err(KnowledgeError::invalid_field("project must not be empty"));
    }
    Ok(project.to_string())
}

