//! DOCX processor.
//!
//! A .docx file is a zip container; body text lives in
//! `word/document.xml` and author/title metadata in
//! `docProps/core.xml`.

use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use std::path::Path;

use async_trait::async_trait;
use regex::Regex;

use super::{build_documents, DocumentProcessor, Extracted};
use crate::chunker::{ChunkOptions, TextChunker};
use crate::core::errors::RagError;
use crate::types::Document;

pub struct DocxProcessor {
    chunker: TextChunker,
}

impl DocxProcessor {
    pub fn new(options: ChunkOptions) -> Self {
        Self {
            chunker: TextChunker::new(options),
        }
    }
}

#[async_trait]
impl DocumentProcessor for DocxProcessor {
    fn extensions(&self) -> &[&str] {
        &["docx"]
    }

    async fn process(
        &self,
        path: &Path,
        overrides: &BTreeMap<String, String>,
    ) -> Result<Vec<Document>, RagError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| RagError::extraction(path, e))?;

        let owned_path = path.to_path_buf();
        let extracted = tokio::task::spawn_blocking(move || -> Result<Extracted, RagError> {
            let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
                .map_err(|e| RagError::extraction(&owned_path, e))?;

            let document_xml = read_archive_file(&mut archive, "word/document.xml")
                .map_err(|e| RagError::extraction(&owned_path, e))?;
            let core_xml = read_archive_file(&mut archive, "docProps/core.xml").ok();

            let text = document_xml_to_text(&document_xml);
            let (title, author) = core_xml
                .map(|xml| (core_field(&xml, "dc:title"), core_field(&xml, "dc:creator")))
                .unwrap_or((None, None));

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

fn read_archive_file(
    archive: &mut zip::ZipArchive<Cursor<Vec<u8>>>,
    name: &str,
) -> Result<String, String> {
    let mut file = archive.by_name(name).map_err(|e| e.to_string())?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)
        .map_err(|e| e.to_string())?;
    Ok(contents)
}

/// Flatten WordprocessingML to plain text: paragraph ends and line
/// breaks become newlines, tabs become tabs, all other tags vanish.
fn document_xml_to_text(xml: &str) -> String {
    let with_breaks = xml
        .replace("</w:p>", "\n")
        .replace("<w:br/>", "\n")
        .replace("<w:tab/>", "\t");

    let mut result = String::new();
    let mut in_tag = false;
    for c in with_breaks.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(c),
            _ => {}
        }
    }

    let text = result
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'");

    let lines: Vec<&str> = text
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.trim().is_empty())
        .collect();
    lines.join("\n")
}

/// Pull a single element's text out of `docProps/core.xml`.
fn core_field(xml: &str, element: &str) -> Option<String> {
    let pattern = format!("<{element}[^>]*>([^<]*)</{element}>");
    let re = Regex::new(&pattern).ok()?;
    let value = re.captures(xml)?.get(1)?.as_str().trim().to_string();
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const DOCUMENT_XML: &str = r#"<?xml version="1.0"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
  <w:body>
    <w:p><w:r><w:t>First paragraph of the document.</w:t></w:r></w:p>
    <w:p><w:r><w:t>Second paragraph with &amp; entity.</w:t></w:r></w:p>
  </w:body>
</w:document>"#;

    const CORE_XML: &str = r#"<?xml version="1.0"?>
<cp:coreProperties xmlns:cp="http://schemas.openxmlformats.org/package/2006/metadata/core-properties" xmlns:dc="http://purl.org/dc/elements/1.1/">
  <dc:title>Quarterly Report</dc:title>
  <dc:creator>Grace Hopper</dc:creator>
</cp:coreProperties>"#;

    fn write_docx(path: &Path) {
        let file = std::fs::File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();

        writer.start_file("word/document.xml", options).unwrap();
        writer.write_all(DOCUMENT_XML.as_bytes()).unwrap();
        writer.start_file("docProps/core.xml", options).unwrap();
        writer.write_all(CORE_XML.as_bytes()).unwrap();
        writer.finish().unwrap();
    }

    #[test]
    fn xml_flattening_keeps_paragraphs_and_entities() {
        let text = document_xml_to_text(DOCUMENT_XML);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "First paragraph of the document.");
        assert!(lines[1].contains("with & entity"));
    }

    #[test]
    fn core_fields_are_extracted() {
        assert_eq!(
            core_field(CORE_XML, "dc:title").as_deref(),
            Some("Quarterly Report")
        );
        assert_eq!(
            core_field(CORE_XML, "dc:creator").as_deref(),
            Some("Grace Hopper")
        );
    }

    #[tokio::test]
    async fn processes_a_docx_container() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.docx");
        write_docx(&path);

        let processor = DocxProcessor::new(ChunkOptions::default());
        let docs = processor.process(&path, &BTreeMap::new()).await.unwrap();

        assert_eq!(docs.len(), 1);
        assert!(docs[0].content.contains("First paragraph"));
        assert_eq!(docs[0].metadata.title.as_deref(), Some("Quarterly Report"));
        assert_eq!(docs[0].metadata.author.as_deref(), Some("Grace Hopper"));
        assert!(docs[0].metadata.tags.contains("docx"));
    }

    #[tokio::test]
    async fn truncated_container_is_an_extraction_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.docx");
        std::fs::write(&path, b"PK\x03\x04 truncated").unwrap();

        let processor = DocxProcessor::new(ChunkOptions::default());
        let err = processor
            .process(&path, &BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Extraction { .. }));
    }
}
