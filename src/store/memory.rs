//! In-memory vector store: a document arena behind an RwLock with
//! brute-force cosine ranking. Insertion order is preserved, which
//! makes score ties deterministic.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::warn;

use super::{
    build_highlights, matches_filters, StoreStats, VectorStore, DEFAULT_SCORE_THRESHOLD,
};
use crate::core::errors::RagError;
use crate::embedding::EmbeddingProvider;
use crate::types::{Document, SearchQuery, SearchResult};
use crate::vector_math::rank_descending_by_cosine;

#[derive(Default)]
struct Arena {
    documents: Vec<Document>,
    last_updated: Option<DateTime<Utc>>,
}

pub struct MemoryVectorStore {
    embedder: Arc<dyn EmbeddingProvider>,
    arena: RwLock<Arena>,
    initialized: AtomicBool,
}

impl MemoryVectorStore {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            embedder,
            arena: RwLock::new(Arena::default()),
            initialized: AtomicBool::new(false),
        }
    }

    fn ensure_initialized(&self) -> Result<(), RagError> {
        if self.initialized.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(RagError::StoreUninitialized)
        }
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>, RagError> {
        self.embedder.embed(query).await?.ok_or_else(|| {
            RagError::EmbeddingUnavailable("no embedding produced for query".to_string())
        })
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn initialize(&self) -> Result<(), RagError> {
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    async fn add_documents(&self, documents: Vec<Document>) -> Result<usize, RagError> {
        self.ensure_initialized()?;

        let mut prepared = Vec::with_capacity(documents.len());
        for mut document in documents {
            if document.embedding.is_none() {
                match self.embedder.embed(&document.content).await {
                    Ok(Some(embedding)) => document.embedding = Some(embedding),
                    Ok(None) => {
                        warn!(
                            "skipping document {} ({}): empty embedding",
                            document.id, document.metadata.source
                        );
                        continue;
                    }
                    Err(e) => {
                        warn!(
                            "skipping document {} ({}): {e}",
                            document.id, document.metadata.source
                        );
                        continue;
                    }
                }
            }
            prepared.push(document);
        }

        let stored = prepared.len();
        let mut arena = self.arena.write().await;
        for document in prepared {
            // Last write wins on duplicate ids; position is kept so
            // re-indexing does not reshuffle tie-breaks.
            match arena.documents.iter_mut().find(|d| d.id == document.id) {
                Some(existing) => *existing = document,
                None => arena.documents.push(document),
            }
        }
        arena.last_updated = Some(Utc::now());

        Ok(stored)
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>, RagError> {
        self.ensure_initialized()?;

        let query_embedding = self.embed_query(&query.query).await?;
        let threshold = query.threshold.unwrap_or(DEFAULT_SCORE_THRESHOLD);

        let arena = self.arena.read().await;
        let candidates: Vec<&Document> = arena
            .documents
            .iter()
            .filter(|d| d.embedding.is_some() && matches_filters(d, &query.filters))
            .collect();

        let embeddings: Vec<Vec<f32>> = candidates
            .iter()
            .map(|d| d.embedding.clone().unwrap_or_default())
            .collect();

        let results = rank_descending_by_cosine(&query_embedding, &embeddings)
            .into_iter()
            .filter(|(_, score)| *score >= threshold)
            .take(query.k)
            .map(|(idx, score)| SearchResult {
                document: candidates[idx].clone(),
                score,
                highlights: build_highlights(&candidates[idx].content, &query.query),
            })
            .collect();

        Ok(results)
    }

    async fn delete_documents(&self, ids: &[String]) -> Result<usize, RagError> {
        self.ensure_initialized()?;

        let mut arena = self.arena.write().await;
        let before = arena.documents.len();
        arena.documents.retain(|d| !ids.contains(&d.id));
        let deleted = before - arena.documents.len();
        if deleted > 0 {
            arena.last_updated = Some(Utc::now());
        }
        Ok(deleted)
    }

    async fn get_stats(&self) -> Result<StoreStats, RagError> {
        self.ensure_initialized()?;

        let arena = self.arena.read().await;
        let sources: std::collections::BTreeSet<&str> = arena
            .documents
            .iter()
            .map(|d| d.metadata.source.as_str())
            .collect();

        Ok(StoreStats {
            total_documents: sources.len(),
            total_chunks: arena.documents.len(),
            total_size_bytes: arena.documents.iter().map(|d| d.content.len() as u64).sum(),
            last_updated: arena.last_updated,
        })
    }

    async fn count(&self) -> Result<usize, RagError> {
        self.ensure_initialized()?;
        Ok(self.arena.read().await.documents.len())
    }

    async fn clear(&self) -> Result<(), RagError> {
        self.ensure_initialized()?;
        let mut arena = self.arena.write().await;
        arena.documents.clear();
        arena.last_updated = Some(Utc::now());
        Ok(())
    }
}
