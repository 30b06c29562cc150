//! SQLite-backed vector store.
//!
//! Metadata lives as JSON, embeddings as little-endian f32 blobs, and
//! similarity is brute-force cosine over all candidate rows. Suitable
//! for local/desktop-scale corpora that need to survive restarts.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use tracing::warn;

use super::{
    build_highlights, matches_filters, StoreStats, VectorStore, DEFAULT_SCORE_THRESHOLD,
};
use crate::core::errors::RagError;
use crate::embedding::EmbeddingProvider;
use crate::types::{Document, DocumentMetadata, SearchQuery, SearchResult};
use crate::vector_math::rank_descending_by_cosine;

pub struct SqliteVectorStore {
    pool: SqlitePool,
    embedder: Arc<dyn EmbeddingProvider>,
    initialized: AtomicBool,
    #[allow(dead_code)]
    db_path: PathBuf,
}

impl SqliteVectorStore {
    pub async fn new(
        db_path: PathBuf,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self, RagError> {
        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(RagError::internal)?;

        Ok(Self {
            pool,
            embedder,
            initialized: AtomicBool::new(false),
            db_path,
        })
    }

    fn ensure_initialized(&self) -> Result<(), RagError> {
        if self.initialized.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(RagError::StoreUninitialized)
        }
    }

    fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
        embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    fn deserialize_embedding(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect()
    }

    fn row_to_document(row: &sqlx::sqlite::SqliteRow) -> Option<Document> {
        let id: String = row.get("id");
        let metadata_str: String = row.get("metadata");
        let metadata: DocumentMetadata = match serde_json::from_str(&metadata_str) {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!("dropping row {id}: bad metadata json: {e}");
                return None;
            }
        };

        let embedding_bytes: Vec<u8> = row.get("embedding");
        let embedding = if embedding_bytes.is_empty() {
            None
        } else {
            Some(Self::deserialize_embedding(&embedding_bytes))
        };

        Some(Document {
            id,
            content: row.get("content"),
            metadata,
            embedding,
        })
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>, RagError> {
        self.embedder.embed(query).await?.ok_or_else(|| {
            RagError::EmbeddingUnavailable("no embedding produced for query".to_string())
        })
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn initialize(&self) -> Result<(), RagError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                source TEXT NOT NULL DEFAULT '',
                metadata TEXT NOT NULL DEFAULT '{}',
                embedding BLOB,
                updated_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(RagError::internal)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_source ON documents(source)")
            .execute(&self.pool)
            .await
            .map_err(RagError::internal)?;

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

        if prepared.is_empty() {
            return Ok(0);
        }

        let stored = prepared.len();
        let mut tx = self.pool.begin().await.map_err(RagError::internal)?;

        for document in &prepared {
            let metadata_str =
                serde_json::to_string(&document.metadata).map_err(RagError::internal)?;
            let blob = document
                .embedding
                .as_deref()
                .map(Self::serialize_embedding)
                .unwrap_or_default();

            // INSERT OR REPLACE: last write wins on duplicate ids.
            sqlx::query(
                "INSERT OR REPLACE INTO documents (id, content, source, metadata, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .bind(&document.id)
            .bind(&document.content)
            .bind(&document.metadata.source)
            .bind(&metadata_str)
            .bind(&blob)
            .execute(&mut *tx)
            .await
            .map_err(RagError::internal)?;
        }

        tx.commit().await.map_err(RagError::internal)?;
        Ok(stored)
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>, RagError> {
        self.ensure_initialized()?;

        let query_embedding = self.embed_query(&query.query).await?;
        let threshold = query.threshold.unwrap_or(DEFAULT_SCORE_THRESHOLD);

        let rows = sqlx::query("SELECT id, content, metadata, embedding FROM documents")
            .fetch_all(&self.pool)
            .await
            .map_err(RagError::internal)?;

        let candidates: Vec<Document> = rows
            .iter()
            .filter_map(Self::row_to_document)
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

        let mut deleted = 0usize;
        for id in ids {
            let result = sqlx::query("DELETE FROM documents WHERE id = ?1")
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(RagError::internal)?;
            deleted += result.rows_affected() as usize;
        }
        Ok(deleted)
    }

    async fn get_stats(&self) -> Result<StoreStats, RagError> {
        self.ensure_initialized()?;

        let row = sqlx::query(
            "SELECT COUNT(*) AS chunks,
                    COUNT(DISTINCT source) AS sources,
                    COALESCE(SUM(LENGTH(content)), 0) AS bytes,
                    MAX(updated_at) AS updated
             FROM documents",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(RagError::internal)?;

        let chunks: i64 = row.get("chunks");
        let sources: i64 = row.get("sources");
        let bytes: i64 = row.get("bytes");
        let updated: Option<String> = row.get("updated");

        let last_updated = updated
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        Ok(StoreStats {
            total_documents: sources as usize,
            total_chunks: chunks as usize,
            total_size_bytes: bytes as u64,
            last_updated,
        })
    }

    async fn count(&self) -> Result<usize, RagError> {
        self.ensure_initialized()?;
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await
            .map_err(RagError::internal)?;
        Ok(count as usize)
    }

    async fn clear(&self) -> Result<(), RagError> {
        self.ensure_initialized()?;
        sqlx::query("DELETE FROM documents")
            .execute(&self.pool)
            .await
            .map_err(RagError::internal)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::testing::MockEmbedder;
    use crate::types::DocumentMetadata;

    async fn test_store(dir: &tempfile::TempDir) -> SqliteVectorStore {
        let path = dir.path().join("ragcore-test.db");
        let store = SqliteVectorStore::new(path, Arc::new(MockEmbedder::new()))
            .await
            .unwrap();
        store.initialize().await.unwrap();
        store
    }

    fn make_doc(content: &str, source: &str) -> Document {
        Document::new(content.to_string(), DocumentMetadata::new(source))
    }

    #[tokio::test]
    async fn uninitialized_store_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("uninit.db");
        let store = SqliteVectorStore::new(path, Arc::new(MockEmbedder::new()))
            .await
            .unwrap();

        let err = store.count().await.unwrap_err();
        assert!(matches!(err, RagError::StoreUninitialized));
    }

    #[tokio::test]
    async fn round_trip_and_self_similarity() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir).await;

        store
            .add_documents(vec![
                make_doc("tokio runtime internals", "a.md"),
                make_doc("bread baking basics", "b.md"),
            ])
            .await
            .unwrap();
        assert_eq!(store.count().await.unwrap(), 2);

        let query = SearchQuery::new("tokio runtime internals", 5).with_threshold(0.0);
        let results = store.search(&query).await.unwrap();
        assert_eq!(results[0].document.metadata.source, "a.md");
        assert!(results[0].score > 0.999);
    }

    #[tokio::test]
    async fn metadata_survives_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir).await;

        let mut doc = make_doc("persisted text", "c.txt");
        doc.metadata.title = Some("A Title".to_string());
        doc.metadata.chunk_index = Some(2);
        doc.metadata.total_chunks = Some(7);
        doc.metadata.tags.insert("txt".to_string());
        store.add_documents(vec![doc]).await.unwrap();

        let query = SearchQuery::new("persisted text", 1).with_threshold(0.0);
        let results = store.search(&query).await.unwrap();
        let metadata = &results[0].document.metadata;
        assert_eq!(metadata.title.as_deref(), Some("A Title"));
        assert_eq!(metadata.chunk_index, Some(2));
        assert_eq!(metadata.total_chunks, Some(7));
        assert!(metadata.tags.contains("txt"));
    }

    #[tokio::test]
    async fn delete_stats_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir).await;

        let doc_a = make_doc("first", "a.txt");
        let id_a = doc_a.id.clone();
        store
            .add_documents(vec![doc_a, make_doc("second", "b.txt")])
            .await
            .unwrap();

        let stats = store.get_stats().await.unwrap();
        assert_eq!(stats.total_chunks, 2);
        assert_eq!(stats.total_documents, 2);
        assert!(stats.last_updated.is_some());

        assert_eq!(store.delete_documents(&[id_a]).await.unwrap(), 1);
        assert_eq!(store.count().await.unwrap(), 1);

        store.clear().await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
    }
}
