//! Content-addressed embedding cache.
//!
//! Wraps any provider so repeated ingestion of identical chunk text
//! skips the embedding service. Keys are sha-256 digests of the text.
//! There is no per-entry eviction: the orchestrator's resource policy
//! clears the whole map when its threshold fires.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::debug;

use super::{EmbeddingProvider, ModelInfo};
use crate::core::errors::RagError;
use crate::types::EmbeddingResult;

#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Requests actually sent to the underlying provider.
    pub provider_calls: u64,
}

pub struct CachedEmbedder {
    inner: Arc<dyn EmbeddingProvider>,
    cache: RwLock<HashMap<String, Vec<f32>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    provider_calls: AtomicU64,
    approx_bytes: AtomicU64,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            inner,
            cache: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            provider_calls: AtomicU64::new(0),
            approx_bytes: AtomicU64::new(0),
        }
    }

    fn hash_text(text: &str) -> String {
        let digest = Sha256::digest(text.as_bytes());
        hex::encode(digest)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            provider_calls: self.provider_calls.load(Ordering::Relaxed),
        }
    }

    pub async fn len(&self) -> usize {
        self.cache.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.cache.read().await.is_empty()
    }

    /// Approximate memory held by cached vectors.
    pub fn approx_bytes(&self) -> u64 {
        self.approx_bytes.load(Ordering::Relaxed)
    }

    /// Wholesale invalidation; the only eviction this cache knows.
    pub async fn clear(&self) {
        let mut cache = self.cache.write().await;
        let dropped = cache.len();
        cache.clear();
        self.approx_bytes.store(0, Ordering::Relaxed);
        debug!("embedding cache cleared ({dropped} entries)");
    }

    async fn insert(&self, key: String, embedding: &[f32]) {
        let bytes = (embedding.len() * std::mem::size_of::<f32>() + key.len()) as u64;
        let mut cache = self.cache.write().await;
        if cache.insert(key, embedding.to_vec()).is_none() {
            self.approx_bytes.fetch_add(bytes, Ordering::Relaxed);
        }
    }
}

#[async_trait]
impl EmbeddingProvider for CachedEmbedder {
    async fn embed(&self, text: &str) -> Result<Option<Vec<f32>>, RagError> {
        let key = Self::hash_text(text);

        if let Some(cached) = self.cache.read().await.get(&key).cloned() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(cached));
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        self.provider_calls.fetch_add(1, Ordering::Relaxed);
        let embedding = self.inner.embed(text).await?;
        if let Some(embedding) = &embedding {
            self.insert(key, embedding).await;
        }
        Ok(embedding)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<EmbeddingResult, RagError> {
        let mut embeddings: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut miss_texts = Vec::new();
        let mut miss_indices = Vec::new();

        {
            let cache = self.cache.read().await;
            for (idx, text) in texts.iter().enumerate() {
                let key = Self::hash_text(text);
                if let Some(cached) = cache.get(&key) {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    embeddings[idx] = Some(cached.clone());
                } else {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    miss_texts.push(text.clone());
                    miss_indices.push(idx);
                }
            }
        }

        let mut token_count = 0;
        if !miss_texts.is_empty() {
            debug!("embedding {} uncached texts", miss_texts.len());
            self.provider_calls
                .fetch_add(miss_texts.len() as u64, Ordering::Relaxed);
            let result = self.inner.embed_batch(&miss_texts).await?;
            token_count = result.token_count;

            for ((idx, text), embedding) in miss_indices
                .iter()
                .zip(miss_texts.iter())
                .zip(result.embeddings.into_iter())
            {
                self.insert(Self::hash_text(text), &embedding).await;
                embeddings[*idx] = Some(embedding);
            }
        }

        Ok(EmbeddingResult {
            embeddings: embeddings.into_iter().flatten().collect(),
            token_count,
            model_id: self.inner.model_info().name,
        })
    }

    async fn is_available(&self) -> bool {
        self.inner.is_available().await
    }

    fn model_info(&self) -> ModelInfo {
        self.inner.model_info()
    }
}
