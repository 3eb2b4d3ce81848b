//! OpenAI-compatible embeddings provider.
//!
//! Calls `POST {api_base}/embeddings`. The API key is read from the
//! environment variable named in config at call time, so a missing key fails
//! the call with `EmbeddingUnavailable` instead of failing startup.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use super::EmbeddingProvider;
use crate::config::EmbeddingConfig;
use crate::error::{KnowledgeError, Result};

pub struct OpenAiProvider {
    client: reqwest::Client,
    model: String,
    dims: usize,
    endpoint: String,
    api_key_env: String,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiProvider {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        if std::env::var(&config.api_key_env).is_err() {
            tracing::warn!(
                env = %config.api_key_env,
                "embedding API key not set; embedding calls will fail until it is"
            );
        }

        Ok(Self {
            client,
            model: config.model.clone(),
            dims: config.dimensions,
            endpoint: format!("{}/embeddings", config.api_base.trim_end_matches('/')),
            api_key_env: config.api_key_env.clone(),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let api_key = std::env::var(&self.api_key_env).map_err(|_| {
            KnowledgeError::EmbeddingUnavailable(format!("{} is not set", self.api_key_env))
        })?;

        let input: Vec<&str> = texts.iter().map(|t| t.trim()).collect();
        let body = serde_json::json!({
            "model": self.model,
            "input": input,
            "encoding_format": "float",
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| KnowledgeError::EmbeddingUnavailable(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, "embedding provider returned an error");
            return Err(KnowledgeError::EmbeddingUnavailable(format!(
                "provider error {status}: {text}"
            )));
        }

        let parsed: EmbeddingResponse = response.json().await.map_err(|e| {
            KnowledgeError::EmbeddingUnavailable(format!("invalid provider response: {e}"))
        })?;

        Ok(order_by_index(parsed.data))
    }
}

/// Providers may return data out of order; `index` is authoritative.
fn order_by_index(mut data: Vec<EmbeddingDatum>) -> Vec<Vec<f32>> {
    data.sort_by_key(|d| d.index);
    data.into_iter().map(|d| d.embedding).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_is_reordered_by_index() {
        let json = r#"{"data":[{"index":1,"embedding":[0.5,0.5]},{"index":0,"embedding":[1.0,0.0]}]}"#;
        let parsed: EmbeddingResponse = serde_json::from_str(json).unwrap();
        let vectors = order_by_index(parsed.data);
        assert_eq!(vectors[0], vec![1.0, 0.0]);
        assert_eq!(vectors[1], vec![0.5, 0.5]);
    }

    #[tokio::test]
    async fn missing_key_is_unavailable() {
        let config = EmbeddingConfig {
            api_key_env: "KNOWLEDGE_TEST_MISSING_KEY".into(),
            ..Default::default()
        };
        let provider = OpenAiProvider::new(&config).unwrap();
        let err = provider.embed("hello").await.unwrap_err();
        assert!(matches!(err, KnowledgeError::EmbeddingUnavailable(ref m) if m.contains("KNOWLEDGE_TEST_MISSING_KEY")));
    }
}
