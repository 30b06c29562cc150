//! Embedding generation: the provider abstraction plus the networked
//! Ollama implementation and a content-addressed cache wrapper.

mod cache;
mod ollama;

use async_trait::async_trait;

pub use cache::{CacheStats, CachedEmbedder};
pub use ollama::OllamaEmbedder;

use crate::core::errors::RagError;
use crate::types::EmbeddingResult;

#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub name: String,
    pub dimension: usize,
    pub max_tokens: usize,
}

/// Turns text into vectors. Implementations may embed sequentially
/// behind the batch interface but must preserve input order.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed one text. `Ok(None)` means the service answered but
    /// produced no vector for this input.
    async fn embed(&self, text: &str) -> Result<Option<Vec<f32>>, RagError>;

    /// Embed a batch; output is index-aligned with the input.
    async fn embed_batch(&self, texts: &[String]) -> Result<EmbeddingResult, RagError>;

    /// Cheap connectivity/model-presence probe. Never errors; any
    /// network or timeout failure reads as unavailable.
    async fn is_available(&self) -> bool;

    fn model_info(&self) -> ModelInfo;
}

/// Rough token estimate: a token is about four characters of English
/// text; never less than the whitespace word count.
pub fn estimate_tokens(text: &str) -> usize {
    let by_chars = text.chars().count() / 4;
    let by_words = text.split_whitespace().count();
    by_chars.max(by_words)
}

/// Deterministic in-process embedder for unit tests: the vector is
/// derived from the text's sha-256 digest, and every text embedded via
/// the service path increments a call counter.
#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use sha2::{Digest, Sha256};

    use super::{estimate_tokens, EmbeddingProvider, ModelInfo};
    use crate::core::errors::RagError;
    use crate::types::EmbeddingResult;

    pub(crate) struct MockEmbedder {
        calls: AtomicUsize,
        fail: bool,
    }

    impl MockEmbedder {
        pub(crate) fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail: false,
            }
        }

        pub(crate) fn failing() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail: true,
            }
        }

        pub(crate) fn call_count(&self) -> usize {
            self.calls.load(Ordering::Relaxed)
        }

        pub(crate) fn vector_for(text: &str) -> Vec<f32> {
            let digest = Sha256::digest(text.as_bytes());
            digest.iter().map(|b| f32::from(*b) / 255.0).collect()
        }
    }

    #[async_trait]
    impl EmbeddingProvider for MockEmbedder {
        async fn embed(&self, text: &str) -> Result<Option<Vec<f32>>, RagError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            if self.fail {
                return Err(RagError::EmbeddingUnavailable("mock down".to_string()));
            }
            Ok(Some(Self::vector_for(text)))
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<EmbeddingResult, RagError> {
            self.calls.fetch_add(texts.len(), Ordering::Relaxed);
            if self.fail {
                return Err(RagError::EmbeddingUnavailable("mock down".to_string()));
            }
            Ok(EmbeddingResult {
                embeddings: texts.iter().map(|t| Self::vector_for(t)).collect(),
                token_count: texts.iter().map(|t| estimate_tokens(t)).sum(),
                model_id: "mock-embed".to_string(),
            })
        }

        async fn is_available(&self) -> bool {
            !self.fail
        }

        fn model_info(&self) -> ModelInfo {
            ModelInfo {
                name: "mock-embed".to_string(),
                dimension: 32,
                max_tokens: 512,
            }
        }
    }
}
