//! PDF processor: text via pdf-extract, document info via lopdf.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use tracing::debug;

use super::{build_documents, DocumentProcessor, Extracted};
use crate::chunker::{ChunkOptions, TextChunker};
use crate::core::errors::RagError;
use crate::types::Document;

pub struct PdfProcessor {
    chunker: TextChunker,
}

impl PdfProcessor {
    pub fn new(options: ChunkOptions) -> Self {
        Self {
            chunker: TextChunker::new(options),
        }
    }
}

#[async_trait]
impl DocumentProcessor for PdfProcessor {
    fn extensions(&self) -> &[&str] {
        &["pdf"]
    }

    async fn process(
        &self,
        path: &Path,
        overrides: &BTreeMap<String, String>,
    ) -> Result<Vec<Document>, RagError> {
        debug!("extracting pdf {:?}", path);
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| RagError::extraction(path, e))?;

        // Both decoders are CPU-bound.
        let owned_path = path.to_path_buf();
        let extracted = tokio::task::spawn_blocking(move || -> Result<Extracted, RagError> {
            let text = pdf_extract::extract_text_from_mem(&bytes)
                .map_err(|e| RagError::extraction(&owned_path, e))?;

            let (title, author) = match lopdf::Document::load_mem(&bytes) {
                Ok(doc) => (info_field(&doc, b"Title"), info_field(&doc, b"Author")),
                Err(_) => (None, None),
            };

            Ok(Extracted {
                text,
                title,
                author,
            })
        })
        .await
        .map_err(RagError::internal)??;

        Ok(build_documents(path, extracted, &self.chunker, overrides))
    }
}

/// Read a string field from the PDF Info dictionary, following an
/// indirect reference when present.
fn info_field(doc: &lopdf::Document, key: &[u8]) -> Option<String> {
    let info = doc.trailer.get(b"Info").ok()?;
    let dict = match info {
        lopdf::Object::Reference(id) => doc.get_dictionary(*id).ok()?,
        lopdf::Object::Dictionary(dict) => dict,
        _ => return None,
    };

    let bytes = dict.get(key).ok()?.as_str().ok()?;
    let text = decode_pdf_string(bytes);
    let text = text.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

/// PDF text strings are either UTF-16BE with a BOM or PDFDocEncoding
/// (latin-1-ish); fall back to lossy UTF-8 for the latter.
fn decode_pdf_string(bytes: &[u8]) -> String {
    if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
        let utf16: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16_lossy(&utf16)
    } else {
        String::from_utf8_lossy(bytes).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_utf16be_strings() {
        let mut bytes = vec![0xFE, 0xFF];
        for c in "Häuser".encode_utf16() {
            bytes.extend_from_slice(&c.to_be_bytes());
        }
        assert_eq!(decode_pdf_string(&bytes), "Häuser");
    }

    #[test]
    fn decodes_plain_strings() {
        assert_eq!(decode_pdf_string(b"A Report"), "A Report");
    }

    #[tokio::test]
    async fn corrupt_pdf_is_an_extraction_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.pdf");
        std::fs::write(&path, b"not a pdf at all").unwrap();

        let processor = PdfProcessor::new(ChunkOptions::default());
        let err = processor
            .process(&path, &BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Extraction { .. }));
    }
}
