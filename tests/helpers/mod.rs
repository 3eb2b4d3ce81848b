#![allow(dead_code)]

use async_trait::async_trait;
use knowledge_service::config::KnowledgeConfig;
use knowledge_service::db::Store;
use knowledge_service::embedding::{EmbeddingAdapter, EmbeddingProvider};
use knowledge_service::error::{KnowledgeError, Result};
use knowledge_service::knowledge::types::{Caller, Channel};
use knowledge_service::service::KnowledgeService;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const DIMS: usize = 8;

/// Words that light up one axis each in [`KeywordProvider`].
pub const KEYWORDS: [&str; DIMS] = [
    "sql", "cache", "auth", "logging", "deploy", "render", "queue", "misc",
];

/// Deterministic embedder: one axis per keyword present in the text, so
/// tests can predict the ranking exactly. Text with no keyword maps to the
/// last axis.
pub struct KeywordProvider {
    pub calls: AtomicUsize,
}

impl KeywordProvider {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }
}

pub fn keyword_embedding(text: &str) -> Vec<f32> {
    let lower = text.to_lowercase();
    let mut v = vec![0.0f32; DIMS];
    for (i, word) in KEYWORDS.iter().enumerate() {
        if lower.contains(word) {
            v[i] = 1.0;
        }
    }
    if v.iter().all(|x| *x == 0.0) {
        v[DIMS - 1] = 1.0;
    }
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    v.iter().map(|x| x / norm).collect()
}

#[async_trait]
impl EmbeddingProvider for KeywordProvider {
    fn model_name(&self) -> &str {
        "keyword-test"
    }

    fn dimensions(&self) -> usize {
        DIMS
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| keyword_embedding(t)).collect())
    }
}

/// Always fails, like a provider that is down.
pub struct FailingProvider;

#[async_trait]
impl EmbeddingProvider for FailingProvider {
    fn model_name(&self) -> &str {
        "failing-test"
    }

    fn dimensions(&self) -> usize {
        DIMS
    }

    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(KnowledgeError::EmbeddingUnavailable("provider is down".into()))
    }
}

pub fn test_store() -> Store {
    Store::open_in_memory(Duration::from_secs(5)).unwrap()
}

/// Generate a deterministic embedding with a spike at position `seed`.
pub fn test_embedding(seed: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMS];
    v[seed % DIMS] = 1.0;
    v
}

pub fn service_with(provider: Arc<dyn EmbeddingProvider>, config: KnowledgeConfig) -> KnowledgeService {
    service_on(test_store(), provider, config)
}

/// A service over an existing store, e.g. to swap the embedder mid-test.
pub fn service_on(
    store: Store,
    provider: Arc<dyn EmbeddingProvider>,
    config: KnowledgeConfig,
) -> KnowledgeService {
    let embedder = EmbeddingAdapter::new(provider, 16, Duration::from_secs(5));
    KnowledgeService::new(store, embedder, Arc::new(config))
}

pub fn test_service() -> KnowledgeService {
    service_with(Arc::new(KeywordProvider::new()), KnowledgeConfig::default())
}

pub fn http_caller(login: &str) -> Caller {
    Caller::identified(login, Channel::Http)
}

pub fn cli_caller(login: &str) -> Caller {
    Caller::identified(login, Channel::Cli)
}

/// Give `login` a tier through the operator path.
pub async fn grant(service: &KnowledgeService, login: &str, tier: u32) {
    service
        .grant_tier(&cli_caller("operator"), login, tier, &[])
        .await
        .unwrap();
}

/// Count rows in `table`.
pub fn count(service: &KnowledgeService, table: &str) -> i64 {
    let sql = format!("SELECT COUNT(*) FROM {table}");
    service
        .store()
        .with_conn(|conn| Ok(conn.query_row(&sql, [], |row| row.get(0))?))
        .unwrap()
}

/// (operation, login, outcome, match_count) of every audit row, oldest first.
pub fn audit_rows(service: &KnowledgeService) -> Vec<(String, String, String, i64)> {
    service
        .store()
        .with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT operation, login, outcome, match_count FROM audit_log ORDER BY id",
            )?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .unwrap()
}
