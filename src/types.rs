//! Core data model: documents, metadata, knowledge packs, queries.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single indexed text unit (one chunk of a source file).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Unique id, assigned at creation.
    pub id: String,
    pub content: String,
    pub metadata: DocumentMetadata,
    /// Embedding vector; filled in by the store if missing at insert.
    pub embedding: Option<Vec<f32>>,
}

impl Document {
    pub fn new(content: String, metadata: DocumentMetadata) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content,
            metadata,
            embedding: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Source path or URI the document was extracted from.
    pub source: String,
    pub title: Option<String>,
    pub author: Option<String>,
    pub page: Option<u32>,
    pub chunk_index: Option<usize>,
    pub total_chunks: Option<usize>,
    pub language: Option<String>,
    pub tags: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Caller-supplied key/value metadata; searchable via query filters.
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl DocumentMetadata {
    pub fn new(source: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            source: source.into(),
            title: None,
            author: None,
            page: None,
            chunk_index: None,
            total_chunks: None,
            language: None,
            tags: BTreeSet::new(),
            created_at: now,
            updated_at: now,
            extra: BTreeMap::new(),
        }
    }

    /// Look up a metadata value by filter key. Named fields take
    /// precedence over `extra` entries of the same name.
    pub fn filter_value(&self, key: &str) -> Option<String> {
        match key {
            "source" => Some(self.source.clone()),
            "title" => self.title.clone(),
            "author" => self.author.clone(),
            "language" => self.language.clone(),
            "page" => self.page.map(|p| p.to_string()),
            "chunk_index" => self.chunk_index.map(|i| i.to_string()),
            "total_chunks" => self.total_chunks.map(|t| t.to_string()),
            _ => self.extra.get(key).cloned(),
        }
    }
}

/// A named, addressable collection of indexed documents.
///
/// Packs hold document ids, never the documents themselves; a document
/// may belong to any number of packs and dropping a pack leaves the
/// underlying documents in the store unless a cascade is requested.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgePack {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Source path this pack was built from, if any.
    pub path: Option<String>,
    pub document_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl KnowledgePack {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            description: description.into(),
            path: None,
            document_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// A similarity search request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    pub query: String,
    /// Maximum number of results.
    pub k: usize,
    /// Exact-match constraints on document metadata.
    #[serde(default)]
    pub filters: BTreeMap<String, String>,
    /// Minimum score; the store default applies when unset.
    pub threshold: Option<f32>,
}

impl SearchQuery {
    pub fn new(query: impl Into<String>, k: usize) -> Self {
        Self {
            query: query.into(),
            k,
            filters: BTreeMap::new(),
            threshold: None,
        }
    }

    pub fn with_filters(mut self, filters: BTreeMap<String, String>) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = Some(threshold);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub document: Document,
    /// Cosine similarity against the query (higher is better).
    pub score: f32,
    /// Sentence-level fragments containing query terms.
    #[serde(default)]
    pub highlights: Vec<String>,
}

/// Batch embedding output, index-aligned with the input batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingResult {
    pub embeddings: Vec<Vec<f32>>,
    pub token_count: usize,
    pub model_id: String,
}

/// Snapshot reported to the progress callback after every file of a
/// directory ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexProgress {
    pub total_files: usize,
    pub processed_files: usize,
    pub total_documents: usize,
    pub processed_documents: usize,
    pub current_file: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Every discovered file was ingested.
    Done,
    /// The job completed but at least one file failed.
    Partial,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileFailure {
    pub path: String,
    pub error: String,
}

/// Summary of a directory ingestion job. Individual file failures are
/// listed here; they never abort the job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexReport {
    pub pack: KnowledgePack,
    pub status: JobStatus,
    pub total_files: usize,
    pub indexed_documents: usize,
    pub failures: Vec<FileFailure>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_filter_value_prefers_named_fields() {
        let mut metadata = DocumentMetadata::new("a.txt");
        metadata.title = Some("Named".to_string());
        metadata
            .extra
            .insert("title".to_string(), "Extra".to_string());

        assert_eq!(metadata.filter_value("title").as_deref(), Some("Named"));
        assert_eq!(metadata.filter_value("source").as_deref(), Some("a.txt"));
        assert_eq!(metadata.filter_value("missing"), None);
    }

    #[test]
    fn documents_get_unique_ids() {
        let a = Document::new("x".to_string(), DocumentMetadata::new("a"));
        let b = Document::new("x".to_string(), DocumentMetadata::new("a"));
        assert_ne!(a.id, b.id);
    }
}
