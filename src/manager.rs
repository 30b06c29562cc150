//! RAG orchestrator: wires the processor registry, embedding provider,
//! vector store, and text generator into the indexing and
//! retrieve-then-generate pipelines.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::core::config::RagConfig;
use crate::core::errors::RagError;
use crate::embedding::{estimate_tokens, CachedEmbedder, EmbeddingProvider};
use crate::llm::{ChatMessage, GenerationOptions, TextGenerator};
use crate::processors::ProcessorRegistry;
use crate::resource::ResourceTracker;
use crate::store::{StoreStats, VectorStore};
use crate::types::{
    Document, FileFailure, IndexProgress, IndexReport, JobStatus, KnowledgePack, SearchQuery,
    SearchResult,
};

/// Invoked after every file of a directory ingestion.
pub type ProgressFn = Box<dyn Fn(&IndexProgress) + Send + Sync>;

#[derive(Debug, Clone, Default)]
pub struct AnswerOptions {
    pub k: Option<usize>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct AnswerResult {
    pub search_results: Vec<SearchResult>,
    pub answer: String,
    pub search_time_ms: u64,
    pub generation_time_ms: u64,
    pub token_estimate: usize,
}

const NO_CONTEXT_ANSWER: &str =
    "I could not find any relevant information in the indexed documents for this question.";

pub struct RagManager {
    registry: ProcessorRegistry,
    embedder: Arc<CachedEmbedder>,
    store: Arc<dyn VectorStore>,
    generator: Arc<dyn TextGenerator>,
    packs: RwLock<HashMap<String, KnowledgePack>>,
    tracker: Mutex<ResourceTracker>,
    config: RagConfig,
}

impl RagManager {
    pub fn new(
        registry: ProcessorRegistry,
        embedder: Arc<CachedEmbedder>,
        store: Arc<dyn VectorStore>,
        generator: Arc<dyn TextGenerator>,
        config: RagConfig,
    ) -> Self {
        let tracker = ResourceTracker::new(
            config.memory_limit_bytes,
            Duration::from_secs(config.cleanup_interval_secs),
        );

        Self {
            registry,
            embedder,
            store,
            generator,
            packs: RwLock::new(HashMap::new()),
            tracker: Mutex::new(tracker),
            config,
        }
    }

    /// Initialize the store and probe the embedding service. A failed
    /// probe is logged, not fatal; ingestion will surface the real
    /// error per chunk.
    pub async fn initialize(&self) -> Result<(), RagError> {
        self.store.initialize().await?;

        if !self.embedder.is_available().await {
            warn!(
                "embedding model '{}' not reachable; ingestion will fail until it is",
                self.embedder.model_info().name
            );
        }
        Ok(())
    }

    pub fn get_supported_extensions(&self) -> Vec<String> {
        self.registry.supported_extensions()
    }

    /// Index a single file and return the documents produced from it.
    pub async fn index_file(
        &self,
        path: &Path,
        overrides: &BTreeMap<String, String>,
    ) -> Result<Vec<Document>, RagError> {
        let mut documents = self.registry.process_file(path, overrides).await?;
        self.embed_in_batches(&mut documents).await;

        let stored = self.store.add_documents(documents.clone()).await?;
        info!(
            "indexed {:?}: {} chunks ({} stored)",
            path,
            documents.len(),
            stored
        );
        Ok(documents)
    }

    /// Recursively index a directory.
    ///
    /// Individual file failures never abort the job; they are reported
    /// through the progress callback and collected into the returned
    /// summary. The job is `Partial` if any file failed.
    pub async fn index_directory(
        &self,
        path: &Path,
        overrides: &BTreeMap<String, String>,
        progress: Option<ProgressFn>,
    ) -> Result<IndexReport, RagError> {
        let files = discover_files(path)?;
        let total_files = files.len();
        info!("indexing directory {:?}: {total_files} files", path);

        let mut documents: Vec<Document> = Vec::new();
        let mut failures: Vec<FileFailure> = Vec::new();

        for (processed_files, file) in files.iter().enumerate() {
            let error = match self.registry.process_file(file, overrides).await {
                Ok(docs) => {
                    debug!("processed {:?}: {} chunks", file, docs.len());
                    documents.extend(docs);
                    None
                }
                // Recoverable per-file errors are recorded and the job
                // moves on; anything else aborts.
                Err(e) if e.is_per_file() => {
                    warn!("skipping {:?}: {e}", file);
                    failures.push(FileFailure {
                        path: file.to_string_lossy().to_string(),
                        error: e.to_string(),
                    });
                    Some(e.to_string())
                }
                Err(e) => return Err(e),
            };

            if let Some(progress) = &progress {
                progress(&IndexProgress {
                    total_files,
                    processed_files: processed_files + 1,
                    total_documents: documents.len(),
                    processed_documents: documents.len(),
                    current_file: file.to_string_lossy().to_string(),
                    error,
                });
            }
        }

        self.embed_in_batches(&mut documents).await;
        let stored = self.store.add_documents(documents.clone()).await?;

        let mut pack = KnowledgePack::new(
            path.file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| path.to_string_lossy().to_string()),
            format!("indexed from {}", path.display()),
        );
        pack.path = Some(path.to_string_lossy().to_string());
        pack.document_ids = documents.iter().map(|d| d.id.clone()).collect();
        self.packs
            .write()
            .await
            .insert(pack.id.clone(), pack.clone());

        let status = if failures.is_empty() {
            JobStatus::Done
        } else {
            JobStatus::Partial
        };
        info!(
            "directory job for {:?} finished: {stored} documents stored, {} failures",
            path,
            failures.len()
        );

        Ok(IndexReport {
            pack,
            status,
            total_files,
            indexed_documents: stored,
            failures,
        })
    }

    /// Generate embeddings in bounded batches with a pause between
    /// them. This is backpressure against the embedding service and
    /// host memory, not parallelism: one batch is in flight at a time.
    async fn embed_in_batches(&self, documents: &mut [Document]) {
        let batch_size = self.config.embedding_batch_size.max(1);
        let pause = Duration::from_millis(self.config.embedding_batch_pause_ms);
        let batch_count = documents.len().div_ceil(batch_size);

        for (batch_index, batch) in documents.chunks_mut(batch_size).enumerate() {
            let texts: Vec<String> = batch
                .iter()
                .filter(|d| d.embedding.is_none())
                .map(|d| d.content.clone())
                .collect();

            if !texts.is_empty() {
                match self.embedder.embed_batch(&texts).await {
                    Ok(result) if result.embeddings.len() == texts.len() => {
                        let mut vectors = result.embeddings.into_iter();
                        for document in batch.iter_mut().filter(|d| d.embedding.is_none()) {
                            document.embedding = vectors.next();
                        }
                    }
                    Ok(result) => {
                        // Misaligned batch; drop it and let the store
                        // retry per document.
                        warn!(
                            "embedding batch returned {} vectors for {} texts, discarding",
                            result.embeddings.len(),
                            texts.len()
                        );
                    }
                    Err(e) => {
                        warn!("embedding batch failed: {e}");
                    }
                }
            }

            let batch_bytes: u64 = batch
                .iter()
                .map(|d| {
                    d.content.len() as u64
                        + d.embedding.as_ref().map_or(0, |e| (e.len() * 4) as u64)
                })
                .sum();
            self.track_and_maybe_cleanup(batch_bytes).await;

            if batch_index + 1 < batch_count {
                tokio::time::sleep(pause).await;
            }
        }
    }

    async fn track_and_maybe_cleanup(&self, bytes: u64) {
        let mut tracker = self.tracker.lock().await;
        tracker.record(bytes);
        if tracker.should_cleanup() {
            debug!(
                "resource policy fired at {} tracked bytes, clearing embedding cache",
                tracker.tracked_bytes()
            );
            self.embedder.clear().await;
            tracker.reset();
        }
    }

    pub async fn search(&self, query: &str) -> Result<Vec<SearchResult>, RagError> {
        self.store
            .search(
                &SearchQuery::new(query, self.config.top_k)
                    .with_threshold(self.config.score_threshold),
            )
            .await
    }

    pub async fn search_with_filters(
        &self,
        query: &str,
        filters: BTreeMap<String, String>,
        k: usize,
    ) -> Result<Vec<SearchResult>, RagError> {
        self.store
            .search(
                &SearchQuery::new(query, k)
                    .with_filters(filters)
                    .with_threshold(self.config.score_threshold),
            )
            .await
    }

    /// Retrieve-then-generate. Zero search results short-circuit to a
    /// canned answer without touching the generation service; a
    /// generation failure surfaces inside the answer string while the
    /// search results are still returned.
    pub async fn search_and_answer(
        &self,
        query: &str,
        options: &AnswerOptions,
    ) -> Result<AnswerResult, RagError> {
        let search_start = Instant::now();
        let k = options.k.unwrap_or(self.config.top_k);
        let search_results = self
            .store
            .search(&SearchQuery::new(query, k).with_threshold(self.config.score_threshold))
            .await?;
        let search_time_ms = search_start.elapsed().as_millis() as u64;

        if search_results.is_empty() {
            return Ok(AnswerResult {
                search_results,
                answer: NO_CONTEXT_ANSWER.to_string(),
                search_time_ms,
                generation_time_ms: 0,
                token_estimate: 0,
            });
        }

        let context = build_context_block(&search_results, self.config.max_context_chars);
        let token_estimate = estimate_tokens(&context) + estimate_tokens(query);

        let messages = vec![
            ChatMessage::system(
                "You are a retrieval assistant. Answer using only the numbered context \
                 passages provided by the user. If the context does not contain the \
                 answer, say so explicitly instead of guessing.",
            ),
            ChatMessage::user(format!("Context:\n{context}\nQuestion: {query}")),
        ];
        let generation_options = GenerationOptions {
            temperature: options
                .temperature
                .unwrap_or(self.config.generation.temperature),
            max_tokens: options.max_tokens.unwrap_or(self.config.generation.max_tokens),
        };

        let generation_start = Instant::now();
        let answer = match self.generator.generate(&messages, &generation_options).await {
            Ok(response) => response.content,
            Err(e) => {
                warn!("answer generation failed: {e}");
                format!("The search found relevant passages, but answer generation failed: {e}")
            }
        };

        Ok(AnswerResult {
            search_results,
            answer,
            search_time_ms,
            generation_time_ms: generation_start.elapsed().as_millis() as u64,
            token_estimate,
        })
    }

    pub async fn create_knowledge_pack(
        &self,
        name: &str,
        description: &str,
    ) -> Result<KnowledgePack, RagError> {
        let pack = KnowledgePack::new(name, description);
        self.packs
            .write()
            .await
            .insert(pack.id.clone(), pack.clone());
        Ok(pack)
    }

    pub async fn add_to_knowledge_pack(
        &self,
        pack_id: &str,
        document_ids: Vec<String>,
    ) -> Result<(), RagError> {
        let mut packs = self.packs.write().await;
        let pack = packs
            .get_mut(pack_id)
            .ok_or_else(|| RagError::Internal(format!("unknown knowledge pack: {pack_id}")))?;

        for id in document_ids {
            if !pack.document_ids.contains(&id) {
                pack.document_ids.push(id);
            }
        }
        pack.updated_at = chrono::Utc::now();
        Ok(())
    }

    pub async fn list_knowledge_packs(&self) -> Vec<KnowledgePack> {
        let mut packs: Vec<KnowledgePack> = self.packs.read().await.values().cloned().collect();
        packs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        packs
    }

    /// Drop a pack. Documents are shared between packs, so the
    /// underlying store entries are only deleted on request.
    pub async fn remove_knowledge_pack(
        &self,
        pack_id: &str,
        delete_documents: bool,
    ) -> Result<(), RagError> {
        let pack = self
            .packs
            .write()
            .await
            .remove(pack_id)
            .ok_or_else(|| RagError::Internal(format!("unknown knowledge pack: {pack_id}")))?;

        if delete_documents {
            self.store.delete_documents(&pack.document_ids).await?;
        }
        Ok(())
    }

    pub async fn get_stats(&self) -> Result<StoreStats, RagError> {
        self.store.get_stats().await
    }

    /// Wipe everything: store contents, embedding cache, and packs.
    pub async fn clear(&self) -> Result<(), RagError> {
        self.store.clear().await?;
        self.embedder.clear().await;
        self.packs.write().await.clear();
        self.tracker.lock().await.reset();
        Ok(())
    }

    pub fn embedding_cache_stats(&self) -> crate::embedding::CacheStats {
        self.embedder.stats()
    }
}

/// All regular files under the root, in deterministic order.
/// Unsupported extensions are included on purpose: the per-file loop
/// reports them as failures instead of silently ignoring them.
fn discover_files(root: &Path) -> Result<Vec<std::path::PathBuf>, RagError> {
    if !root.is_dir() {
        return Err(RagError::Config(format!(
            "not a directory: {}",
            root.display()
        )));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(RagError::internal)?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// Concatenate ranked hits into a bounded, citation-style context block.
fn build_context_block(results: &[SearchResult], max_chars: usize) -> String {
    let mut context = String::new();
    for (i, result) in results.iter().enumerate() {
        let entry = format!(
            "[{}] Source: {}\n{}\n\n",
            i + 1,
            result.document.metadata.source,
            result.document.content
        );
        if context.chars().count() + entry.chars().count() > max_chars {
            break;
        }
        context.push_str(&entry);
    }
    context
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::ChunkOptions;
    use crate::core::errors::RagError;
    use crate::embedding::testing::MockEmbedder;
    use crate::llm::GenerationResponse;
    use crate::store::MemoryVectorStore;
    use async_trait::async_trait;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockGenerator {
        calls: AtomicUsize,
    }

    impl MockGenerator {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::Relaxed)
        }
    }

    #[async_trait]
    impl TextGenerator for MockGenerator {
        async fn generate(
            &self,
            messages: &[ChatMessage],
            _options: &GenerationOptions,
        ) -> Result<GenerationResponse, RagError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            let context_len = messages.last().map_or(0, |m| m.content.len());
            Ok(GenerationResponse {
                content: format!("answer based on {context_len} context chars"),
                tokens_used: 42,
            })
        }

        async fn is_available(&self) -> bool {
            true
        }
    }

    struct Harness {
        manager: RagManager,
        embedder: Arc<MockEmbedder>,
        generator: Arc<MockGenerator>,
    }

    async fn harness() -> Harness {
        harness_with_config(RagConfig {
            chunk_size: 200,
            chunk_overlap: 40,
            embedding_batch_pause_ms: 0,
            ..Default::default()
        })
        .await
    }

    async fn harness_with_config(config: RagConfig) -> Harness {
        let embedder = Arc::new(MockEmbedder::new());
        let cached = Arc::new(CachedEmbedder::new(
            embedder.clone() as Arc<dyn EmbeddingProvider>
        ));
        let store = Arc::new(MemoryVectorStore::new(
            cached.clone() as Arc<dyn EmbeddingProvider>
        ));
        let generator = Arc::new(MockGenerator::new());

        let registry = ProcessorRegistry::with_defaults(ChunkOptions {
            chunk_size: config.chunk_size,
            chunk_overlap: config.chunk_overlap,
            separator: "\n".to_string(),
        });

        let manager = RagManager::new(
            registry,
            cached,
            store,
            generator.clone() as Arc<dyn TextGenerator>,
            config,
        );
        manager.initialize().await.unwrap();

        Harness {
            manager,
            embedder,
            generator,
        }
    }

    fn write_file(dir: &Path, name: &str, content: &str) {
        let mut file = std::fs::File::create(dir.join(name)).unwrap();
        file.write_all(content.as_bytes()).unwrap();
    }

    #[tokio::test]
    async fn index_file_produces_searchable_documents() {
        let h = harness().await;
        let dir = tempfile::tempdir().unwrap();
        write_file(
            dir.path(),
            "oven.txt",
            "Preheat the oven to 200 degrees.\nBake the sourdough for forty minutes.",
        );

        let docs = h
            .manager
            .index_file(&dir.path().join("oven.txt"), &BTreeMap::new())
            .await
            .unwrap();
        assert!(!docs.is_empty());
        assert!(docs.iter().all(|d| d.embedding.is_some()));

        let results = h.manager.search("Preheat the oven").await.unwrap();
        assert!(!results.is_empty());
    }

    #[tokio::test]
    async fn directory_job_isolates_unsupported_files() {
        let h = harness().await;
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "a.txt", "Pasta needs salted boiling water.");
        write_file(dir.path(), "b.md", "# Soup\nSimmer the broth gently.");
        write_file(dir.path(), "c.xyz", "binary-ish payload");

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let report = h
            .manager
            .index_directory(
                dir.path(),
                &BTreeMap::new(),
                Some(Box::new(move |p: &IndexProgress| {
                    seen_clone.lock().unwrap().push(p.clone());
                })),
            )
            .await
            .unwrap();

        assert_eq!(report.total_files, 3);
        assert_eq!(report.status, JobStatus::Partial);
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].path.ends_with("c.xyz"));
        assert!(report.indexed_documents >= 2);

        let progress = seen.lock().unwrap();
        assert_eq!(progress.len(), 3);
        assert_eq!(progress.last().unwrap().processed_files, 3);
        assert_eq!(progress.iter().filter(|p| p.error.is_some()).count(), 1);

        // The two good files are searchable.
        let results = h.manager.search("salted boiling water").await.unwrap();
        assert!(!results.is_empty());
        let results = h.manager.search("Simmer the broth").await.unwrap();
        assert!(!results.is_empty());
    }

    #[tokio::test]
    async fn directory_job_registers_a_pack() {
        let h = harness().await;
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "note.txt", "A short indexed note.");

        let report = h
            .manager
            .index_directory(dir.path(), &BTreeMap::new(), None)
            .await
            .unwrap();

        assert_eq!(report.status, JobStatus::Done);
        assert!(!report.pack.document_ids.is_empty());

        let packs = h.manager.list_knowledge_packs().await;
        assert_eq!(packs.len(), 1);
        assert_eq!(packs[0].id, report.pack.id);
    }

    #[tokio::test]
    async fn duplicate_ingestion_is_a_cache_hit() {
        let h = harness().await;
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "same.txt", "Identical content both times.");

        h.manager
            .index_file(&dir.path().join("same.txt"), &BTreeMap::new())
            .await
            .unwrap();
        let calls_after_first = h.embedder.call_count();

        h.manager
            .index_file(&dir.path().join("same.txt"), &BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(h.embedder.call_count(), calls_after_first);

        let stats = h.manager.embedding_cache_stats();
        assert!(stats.hits >= 1);
    }

    #[tokio::test]
    async fn configured_score_threshold_reaches_the_store() {
        let h = harness_with_config(RagConfig {
            chunk_size: 200,
            chunk_overlap: 40,
            embedding_batch_pause_ms: 0,
            score_threshold: 0.99,
            ..Default::default()
        })
        .await;

        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "fox.txt", "The quick brown fox jumps over the dog.");
        h.manager
            .index_file(&dir.path().join("fox.txt"), &BTreeMap::new())
            .await
            .unwrap();

        // Identical text scores 1.0 and clears the bar.
        let results = h
            .manager
            .search("The quick brown fox jumps over the dog.")
            .await
            .unwrap();
        assert_eq!(results.len(), 1);

        // A merely-related query does not.
        let results = h.manager.search("a slow red tortoise").await.unwrap();
        assert!(results.is_empty());

        let answer = h
            .manager
            .search_and_answer("a slow red tortoise", &AnswerOptions::default())
            .await
            .unwrap();
        assert!(answer.search_results.is_empty());
        assert_eq!(h.generator.call_count(), 0);
    }

    #[tokio::test]
    async fn no_results_means_canned_answer_and_no_generation() {
        let h = harness().await;

        // Nothing indexed, so retrieval comes back empty.
        let result = h
            .manager
            .search_and_answer("how do I bake bread", &AnswerOptions::default())
            .await
            .unwrap();

        assert!(result.search_results.is_empty());
        assert_eq!(result.answer, NO_CONTEXT_ANSWER);
        assert_eq!(result.generation_time_ms, 0);
        assert_eq!(h.generator.call_count(), 0);
    }

    #[tokio::test]
    async fn answer_uses_retrieved_context() {
        let h = harness().await;
        let dir = tempfile::tempdir().unwrap();
        write_file(
            dir.path(),
            "rust.txt",
            "The borrow checker enforces aliasing rules at compile time.",
        );
        h.manager
            .index_file(&dir.path().join("rust.txt"), &BTreeMap::new())
            .await
            .unwrap();

        let result = h
            .manager
            .search_and_answer(
                "The borrow checker enforces aliasing rules at compile time.",
                &AnswerOptions::default(),
            )
            .await
            .unwrap();

        assert!(!result.search_results.is_empty());
        assert!(result.answer.starts_with("answer based on"));
        assert!(result.token_estimate > 0);
        assert_eq!(h.generator.call_count(), 1);
    }

    #[tokio::test]
    async fn pack_bookkeeping_add_list_remove() {
        let h = harness().await;
        let pack = h
            .manager
            .create_knowledge_pack("manuals", "device manuals")
            .await
            .unwrap();

        h.manager
            .add_to_knowledge_pack(&pack.id, vec!["doc-1".to_string(), "doc-1".to_string()])
            .await
            .unwrap();

        let packs = h.manager.list_knowledge_packs().await;
        assert_eq!(packs.len(), 1);
        assert_eq!(packs[0].document_ids, vec!["doc-1".to_string()]);

        h.manager.remove_knowledge_pack(&pack.id, false).await.unwrap();
        assert!(h.manager.list_knowledge_packs().await.is_empty());

        let err = h
            .manager
            .add_to_knowledge_pack("missing", vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Internal(_)));
    }

    #[tokio::test]
    async fn clear_resets_store_cache_and_packs() {
        let h = harness().await;
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "x.txt", "Some content to index.");
        h.manager
            .index_directory(dir.path(), &BTreeMap::new(), None)
            .await
            .unwrap();

        h.manager.clear().await.unwrap();
        assert_eq!(h.manager.get_stats().await.unwrap().total_chunks, 0);
        assert!(h.manager.list_knowledge_packs().await.is_empty());
    }

    #[test]
    fn context_block_is_bounded() {
        use crate::types::DocumentMetadata;
        let results: Vec<SearchResult> = (0..20)
            .map(|i| SearchResult {
                document: Document::new(
                    "word ".repeat(100),
                    DocumentMetadata::new(format!("doc{i}.txt")),
                ),
                score: 0.9,
                highlights: Vec::new(),
            })
            .collect();

        let block = build_context_block(&results, 1500);
        assert!(block.chars().count() <= 1500);
        assert!(block.contains("[1] Source: doc0.txt"));
    }
}
