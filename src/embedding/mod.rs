//! Text-to-vector embedding pipeline.
//!
//! Provides the [`EmbeddingProvider`] trait, the [`EmbeddingAdapter`] that the
//! service routes every embedding request through (batch chunking, timeout,
//! dimension check), and two providers:
//! - [`openai::OpenAiProvider`]: OpenAI-compatible `/embeddings` HTTP API
//! - [`hashed::HashedProvider`]: deterministic offline feature hashing
//!
//! Providers are created via [`create_provider`] from configuration.

pub mod hashed;
pub mod openai;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::{KnowledgeError, Result};

/// Trait for embedding text into vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier recorded in `schema_meta`.
    fn model_name(&self) -> &str;

    /// Number of dimensions this provider produces.
    fn dimensions(&self) -> usize;

    /// Embed one batch. The adapter never passes more than its batch size.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text string.
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| KnowledgeError::EmbeddingUnavailable("empty embedding response".into()))
    }
}

/// Create an embedding provider from config.
///
/// Supported: `"openai"` (default) and `"hashed"`.
pub fn create_provider(config: &EmbeddingConfig) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(openai::OpenAiProvider::new(config)?)),
        "hashed" => Ok(Arc::new(hashed::HashedProvider::new(config.dimensions))),
        other => anyhow::bail!("unknown embedding provider: {other}. Supported: openai, hashed"),
    }
}

/// Wraps a provider with chunked batching, a per-call timeout, and a
/// dimension check. Every failure surfaces as
/// [`KnowledgeError::EmbeddingUnavailable`].
#[derive(Clone)]
pub struct EmbeddingAdapter {
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    timeout: Duration,
}

impl EmbeddingAdapter {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, batch_size: usize, timeout: Duration) -> Self {
        Self {
            provider,
            batch_size: batch_size.max(1),
            timeout,
        }
    }

    pub fn from_config(provider: Arc<dyn EmbeddingProvider>, config: &EmbeddingConfig) -> Self {
        Self::new(
            provider,
            config.batch_size,
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    pub fn dimensions(&self) -> usize {
        self.provider.dimensions()
    }

    /// Embed one text.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let vector = match tokio::time::timeout(self.timeout, self.provider.embed(text)).await {
            Ok(result) => result.map_err(into_unavailable)?,
            Err(_) => return Err(self.timed_out()),
        };
        self.check_dimensions(&vector)?;
        Ok(vector)
    }

    /// Embed many texts, chunked at the batch size. Output order matches input.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());

        for (i, chunk) in texts.chunks(self.batch_size).enumerate() {
            let vectors =
                match tokio::time::timeout(self.timeout, self.provider.embed_batch(chunk)).await {
                    Ok(result) => result.map_err(into_unavailable)?,
                    Err(_) => return Err(self.timed_out()),
                };
            if vectors.len() != chunk.len() {
                return Err(KnowledgeError::EmbeddingUnavailable(format!(
                    "batch {} returned {} vectors for {} inputs",
                    i + 1,
                    vectors.len(),
                    chunk.len()
                )));
            }
            for v in &vectors {
                self.check_dimensions(v)?;
            }
            tracing::debug!(batch = i + 1, size = chunk.len(), "embedded batch");
            results.extend(vectors);
        }

        Ok(results)
    }

    fn check_dimensions(&self, vector: &[f32]) -> Result<()> {
        let expected = self.provider.dimensions();
        if vector.is_empty() || vector.len() != expected {
            return Err(KnowledgeError::EmbeddingUnavailable(format!(
                "expected {expected}-dimensional vector, got {}",
                vector.len()
            )));
        }
        Ok(())
    }

    fn timed_out(&self) -> KnowledgeError {
        KnowledgeError::EmbeddingUnavailable(format!(
            "provider did not respond within {}s",
            self.timeout.as_secs_f32()
        ))
    }
}

fn into_unavailable(e: KnowledgeError) -> KnowledgeError {
    match e {
        KnowledgeError::EmbeddingUnavailable(_) => e,
        other => KnowledgeError::EmbeddingUnavailable(other.to_string()),
    }
}

/// Encode a vector as little-endian f32 bytes, the BLOB layout sqlite-vec reads.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Reverse of [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        calls: AtomicUsize,
        dims: usize,
    }

    #[async_trait]
    impl EmbeddingProvider for CountingProvider {
        fn model_name(&self) -> &str {
            "counting"
        }
        fn dimensions(&self) -> usize {
            self.dims
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts.iter().map(|_| vec![1.0; self.dims]).collect())
        }
    }

    struct SlowProvider;

    #[async_trait]
    impl EmbeddingProvider for SlowProvider {
        fn model_name(&self) -> &str {
            "slow"
        }
        fn dimensions(&self) -> usize {
            4
        }
        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn batches_are_chunked() {
        let provider = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
            dims: 4,
        });
        let adapter = EmbeddingAdapter::new(provider.clone(), 2, Duration::from_secs(1));
        let texts: Vec<String> = (0..5).map(|i| format!("text {i}")).collect();

        let vectors = adapter.embed_batch(&texts).await.unwrap();
        assert_eq!(vectors.len(), 5);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn timeout_maps_to_unavailable() {
        let adapter = EmbeddingAdapter::new(Arc::new(SlowProvider), 10, Duration::from_millis(20));
        let err = adapter.embed("hello").await.unwrap_err();
        assert!(matches!(err, KnowledgeError::EmbeddingUnavailable(_)));
    }

    #[tokio::test]
    async fn wrong_dimension_is_rejected() {
        struct Short;
        #[async_trait]
        impl EmbeddingProvider for Short {
            fn model_name(&self) -> &str {
                "short"
            }
            fn dimensions(&self) -> usize {
                8
            }
            async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
                Ok(texts.iter().map(|_| vec![1.0; 3]).collect())
            }
        }

        let adapter = EmbeddingAdapter::new(Arc::new(Short), 10, Duration::from_secs(1));
        let err = adapter.embed("hello").await.unwrap_err();
        assert!(err.to_string().contains("expected 8-dimensional"));
    }

    #[test]
    fn blob_roundtrip() {
        let v = vec![1.0f32, -2.5, 0.125];
        let blob = vec_to_blob(&v);
        assert_eq!(blob.len(), 12);
        assert_eq!(blob_to_vec(&blob), v);
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let config = EmbeddingConfig {
            provider: "nope".into(),
            ..Default::default()
        };
        assert!(create_provider(&config).is_err());
    }
}
