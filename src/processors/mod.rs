//! Format-specific document processors.
//!
//! Each processor declares the file extensions it supports, extracts
//! normalized text plus metadata, and delegates chunking to the shared
//! `TextChunker`. The registry dispatches a path to the first processor
//! that claims it.

mod docx;
mod text;
mod pdf;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

pub use docx::DocxProcessor;
pub use pdf::PdfProcessor;
pub use text::TextProcessor;

use crate::chunker::{ChunkOptions, TextChunker};
use crate::core::errors::RagError;
use crate::types::{Document, DocumentMetadata};

#[async_trait]
pub trait DocumentProcessor: Send + Sync {
    /// Supported extensions, lowercase, without the dot.
    fn extensions(&self) -> &[&str];

    /// Extension-based, case-insensitive support check.
    fn can_process(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .is_some_and(|ext| self.extensions().contains(&ext.as_str()))
    }

    /// Extract, normalize, and chunk the file into documents.
    async fn process(
        &self,
        path: &Path,
        overrides: &BTreeMap<String, String>,
    ) -> Result<Vec<Document>, RagError>;
}

/// Raw extraction output a processor feeds into `build_documents`.
pub(crate) struct Extracted {
    pub text: String,
    pub title: Option<String>,
    pub author: Option<String>,
}

/// Turn extracted text into chunked documents with uniform metadata:
/// every chunk of a source carries `chunk_index`/`total_chunks`, the
/// extension as a tag, and caller overrides.
pub(crate) fn build_documents(
    path: &Path,
    extracted: Extracted,
    chunker: &TextChunker,
    overrides: &BTreeMap<String, String>,
) -> Vec<Document> {
    let chunks = chunker.chunk(&extracted.text);
    let total = chunks.len();
    let source = path.to_string_lossy().to_string();
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();

    chunks
        .into_iter()
        .enumerate()
        .map(|(index, content)| {
            let mut metadata = DocumentMetadata::new(source.clone());
            metadata.title = extracted.title.clone();
            metadata.author = extracted.author.clone();
            metadata.chunk_index = Some(index);
            metadata.total_chunks = Some(total);
            if !extension.is_empty() {
                metadata.tags.insert(extension.clone());
            }
            apply_overrides(&mut metadata, overrides);
            Document::new(content, metadata)
        })
        .collect()
}

/// Caller-supplied metadata: recognized keys override the named fields,
/// everything else lands in `extra`.
fn apply_overrides(metadata: &mut DocumentMetadata, overrides: &BTreeMap<String, String>) {
    for (key, value) in overrides {
        match key.as_str() {
            "title" => metadata.title = Some(value.clone()),
            "author" => metadata.author = Some(value.clone()),
            "language" => metadata.language = Some(value.clone()),
            "tags" => {
                for tag in value.split(',') {
                    let tag = tag.trim();
                    if !tag.is_empty() {
                        metadata.tags.insert(tag.to_string());
                    }
                }
            }
            _ => {
                metadata.extra.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Dispatches file paths to the processor that claims their extension.
pub struct ProcessorRegistry {
    processors: Vec<Arc<dyn DocumentProcessor>>,
}

impl ProcessorRegistry {
    pub fn new(processors: Vec<Arc<dyn DocumentProcessor>>) -> Self {
        Self { processors }
    }

    /// Registry with the built-in processors (text/markdown/html, PDF,
    /// DOCX), all sharing the same chunk options.
    pub fn with_defaults(options: ChunkOptions) -> Self {
        Self::new(vec![
            Arc::new(TextProcessor::new(options.clone())),
            Arc::new(PdfProcessor::new(options.clone())),
            Arc::new(DocxProcessor::new(options)),
        ])
    }

    pub fn supported_extensions(&self) -> Vec<String> {
        let mut extensions: Vec<String> = self
            .processors
            .iter()
            .flat_map(|p| p.extensions().iter().map(|e| e.to_string()))
            .collect();
        extensions.sort();
        extensions.dedup();
        extensions
    }

    pub fn processor_for(&self, path: &Path) -> Option<&Arc<dyn DocumentProcessor>> {
        self.processors.iter().find(|p| p.can_process(path))
    }

    pub fn can_process(&self, path: &Path) -> bool {
        self.processor_for(path).is_some()
    }

    pub async fn process_file(
        &self,
        path: &Path,
        overrides: &BTreeMap<String, String>,
    ) -> Result<Vec<Document>, RagError> {
        let processor = self
            .processor_for(path)
            .ok_or_else(|| RagError::UnsupportedFormat {
                path: path.to_path_buf(),
            })?;
        processor.process(path, overrides).await
    }
}
