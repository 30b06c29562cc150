//! Vector storage: persists documents with their embeddings and ranks
//! them by cosine similarity against query embeddings.
//!
//! Two backends implement the same trait: an in-memory arena for
//! desktop-scale corpora and tests, and a SQLite-backed store for
//! on-disk persistence. The orchestrator only ever sees the trait.

mod memory;
mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use memory::MemoryVectorStore;
pub use sqlite::SqliteVectorStore;

use crate::core::errors::RagError;
use crate::types::{Document, SearchQuery, SearchResult};

/// Minimum similarity for a result when the query sets no threshold.
pub const DEFAULT_SCORE_THRESHOLD: f32 = 0.15;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStats {
    /// Distinct source files.
    pub total_documents: usize,
    /// Stored chunks.
    pub total_chunks: usize,
    /// Sum of stored content bytes.
    pub total_size_bytes: u64,
    pub last_updated: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Must be called before any other operation; using the store
    /// first is a programmer error and fails fast.
    async fn initialize(&self) -> Result<(), RagError>;

    /// Persist documents, generating missing embeddings through the
    /// store's embedding provider. A document whose embedding cannot
    /// be produced is skipped with a warning, not a batch failure.
    /// Returns the number of documents actually stored.
    async fn add_documents(&self, documents: Vec<Document>) -> Result<usize, RagError>;

    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>, RagError>;

    /// Delete by id; returns how many existed.
    async fn delete_documents(&self, ids: &[String]) -> Result<usize, RagError>;

    async fn get_stats(&self) -> Result<StoreStats, RagError>;

    async fn count(&self) -> Result<usize, RagError>;

    async fn clear(&self) -> Result<(), RagError>;
}

/// Whether a document satisfies every exact-match metadata constraint.
pub(crate) fn matches_filters(
    document: &Document,
    filters: &std::collections::BTreeMap<String, String>,
) -> bool {
    filters.iter().all(|(key, expected)| {
        if key == "tag" || key == "tags" {
            return document.metadata.tags.contains(expected);
        }
        document.metadata.filter_value(key).as_deref() == Some(expected.as_str())
    })
}

/// Up to two sentence-level fragments of the content that contain a
/// query term.
pub(crate) fn build_highlights(content: &str, query: &str) -> Vec<String> {
    let terms: Vec<String> = query
        .split_whitespace()
        .filter(|t| t.len() > 2)
        .map(str::to_lowercase)
        .collect();
    if terms.is_empty() {
        return Vec::new();
    }

    content
        .split_inclusive(['.', '!', '?', '\n'])
        .filter(|sentence| {
            let lower = sentence.to_lowercase();
            terms.iter().any(|term| lower.contains(term))
        })
        .take(2)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
