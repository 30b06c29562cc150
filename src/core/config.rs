//! Engine configuration.
//!
//! All knobs live in one serde struct so the host application can load
//! them from a TOML file or construct them in code. Every field has a
//! default tuned for a local desktop-scale deployment.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::errors::RagError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    /// Maximum chunk size in characters (soft bound, oversized atomic
    /// sections are kept whole).
    pub chunk_size: usize,
    /// Overlap carried between consecutive chunks.
    pub chunk_overlap: usize,
    /// Default result count for searches.
    pub top_k: usize,
    /// Minimum similarity score for a result to be returned.
    pub score_threshold: f32,
    /// Documents per embedding batch.
    pub embedding_batch_size: usize,
    /// Pause between embedding batches, in milliseconds. Backpressure
    /// against the embedding service, not a performance knob.
    pub embedding_batch_pause_ms: u64,
    /// Tracked-memory limit before the embedding cache is dropped.
    pub memory_limit_bytes: u64,
    /// Seconds between forced cache cleanups.
    pub cleanup_interval_secs: u64,
    /// Upper bound on the context block fed to the generator.
    pub max_context_chars: usize,
    pub embedding: EmbeddingConfig,
    pub generation: GenerationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub model: String,
    pub dimension: usize,
    pub max_tokens: usize,
    pub timeout_secs: u64,
    pub probe_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub base_url: String,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            top_k: 5,
            score_threshold: 0.15,
            embedding_batch_size: 3,
            embedding_batch_pause_ms: 50,
            memory_limit_bytes: 512 * 1024 * 1024,
            cleanup_interval_secs: 300,
            max_context_chars: 6000,
            embedding: EmbeddingConfig::default(),
            generation: GenerationConfig::default(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "nomic-embed-text".to_string(),
            dimension: 768,
            max_tokens: 8192,
            timeout_secs: 30,
            probe_timeout_secs: 5,
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "llama3.2".to_string(),
            temperature: 0.3,
            max_tokens: 1024,
            timeout_secs: 120,
        }
    }
}

impl RagConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, RagError> {
        let raw = std::fs::read_to_string(path)?;
        let config: RagConfig =
            toml::from_str(&raw).map_err(|e| RagError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), RagError> {
        if self.chunk_size == 0 {
            return Err(RagError::Config("chunk_size must be > 0".to_string()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(RagError::Config(
                "chunk_overlap must be smaller than chunk_size".to_string(),
            ));
        }
        if self.embedding_batch_size == 0 {
            return Err(RagError::Config(
                "embedding_batch_size must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}
