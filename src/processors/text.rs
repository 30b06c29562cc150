//! Plain-text, Markdown, and HTML processor.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;

use super::{build_documents, DocumentProcessor, Extracted};
use crate::chunker::{ChunkOptions, TextChunker};
use crate::core::errors::RagError;
use crate::types::Document;

pub struct TextProcessor {
    chunker: TextChunker,
}

impl TextProcessor {
    pub fn new(options: ChunkOptions) -> Self {
        Self {
            chunker: TextChunker::new(options),
        }
    }
}

#[async_trait]
impl DocumentProcessor for TextProcessor {
    fn extensions(&self) -> &[&str] {
        &["txt", "text", "md", "markdown", "html", "htm"]
    }

    async fn process(
        &self,
        path: &Path,
        overrides: &BTreeMap<String, String>,
    ) -> Result<Vec<Document>, RagError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| RagError::extraction(path, e))?;

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .unwrap_or_default();

        let extracted = match extension.as_str() {
            "md" | "markdown" => extract_markdown(&raw),
            "html" | "htm" => extract_html(&raw),
            _ => Extracted {
                text: raw,
                title: None,
                author: None,
            },
        };

        Ok(build_documents(path, extracted, &self.chunker, overrides))
    }
}

/// Markdown: title from a leading `---` front-matter block or the first
/// level-1 heading. Front matter is removed from the indexed text.
fn extract_markdown(raw: &str) -> Extracted {
    let (front_matter, body) = split_front_matter(raw);

    let mut title = None;
    let mut author = None;
    if let Some(block) = front_matter {
        for line in block.lines() {
            if let Some((key, value)) = line.split_once(':') {
                let value = value.trim().trim_matches('"').trim_matches('\'');
                match key.trim() {
                    "title" => title = Some(value.to_string()),
                    "author" => author = Some(value.to_string()),
                    _ => {}
                }
            }
        }
    }

    if title.is_none() {
        title = body
            .lines()
            .find_map(|line| line.strip_prefix("# "))
            .map(|heading| heading.trim().to_string());
    }

    Extracted {
        text: body.to_string(),
        title,
        author,
    }
}

/// Split a leading `--- ... ---` front-matter fence off the body.
fn split_front_matter(raw: &str) -> (Option<&str>, &str) {
    let rest = match raw.strip_prefix("---") {
        Some(rest) => rest,
        None => return (None, raw),
    };
    let rest = rest.strip_prefix('\n').unwrap_or(rest);

    match rest.find("\n---") {
        Some(end) => {
            let block = &rest[..end];
            let body = &rest[end + 4..];
            (Some(block), body.trim_start_matches('\n'))
        }
        None => (None, raw),
    }
}

/// HTML: title from `<title>` else the first `<h1>`, then scripts,
/// styles, and all remaining tags stripped before chunking.
fn extract_html(raw: &str) -> Extracted {
    let title = find_tag_text(raw, "title").or_else(|| find_tag_text(raw, "h1"));
    Extracted {
        text: strip_html_tags(raw),
        title,
        author: None,
    }
}

/// First occurrence of `<tag ...>text</tag>`, case-insensitive.
fn find_tag_text(html: &str, tag: &str) -> Option<String> {
    // ASCII lowercasing keeps byte offsets valid in the original; full
    // Unicode lowercasing can change byte length and misalign slices.
    let lower = html.to_ascii_lowercase();
    let open = format!("<{tag}");
    let close = format!("</{tag}>");

    let open_at = lower.find(&open)?;
    let content_at = open_at + lower[open_at..].find('>')? + 1;
    let close_at = content_at + lower[content_at..].find(&close)?;

    let text = strip_html_tags(&html[content_at..close_at]);
    let text = text.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

/// Tag stripper: drops `<script>`/`<style>` blocks wholesale, removes
/// remaining tags, and collapses blank lines.
fn strip_html_tags(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    let mut in_script = false;
    let mut in_style = false;

    let chars: Vec<char> = html.chars().collect();
    // Per-char ASCII lowercasing stays index-aligned with `chars`;
    // str::to_lowercase() may emit a different number of chars.
    let chars_lower: Vec<char> = chars.iter().map(|c| c.to_ascii_lowercase()).collect();

    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];

        if i + 7 < chars_lower.len() {
            let tag: String = chars_lower[i..i + 7].iter().collect();
            if tag == "<script" {
                in_script = true;
            } else if tag.starts_with("<style") {
                in_style = true;
            }
        }

        if in_script && i + 9 <= chars_lower.len() {
            let tag: String = chars_lower[i..i + 9].iter().collect();
            if tag == "</script>" {
                in_script = false;
                i += 9;
                continue;
            }
        }
        if in_style && i + 8 <= chars_lower.len() {
            let tag: String = chars_lower[i..i + 8].iter().collect();
            if tag == "</style>" {
                in_style = false;
                i += 8;
                continue;
            }
        }

        if in_script || in_style {
            i += 1;
            continue;
        }

        if c == '<' {
            in_tag = true;
        } else if c == '>' {
            in_tag = false;
            // Keep a separator so adjacent elements don't fuse.
            if !result.ends_with('\n') && !result.is_empty() {
                result.push('\n');
            }
        } else if !in_tag {
            result.push(c);
        }

        i += 1;
    }

    let lines: Vec<&str> = result
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markdown_title_from_front_matter() {
        let raw = "---\ntitle: My Notes\nauthor: Ada\n---\n\nBody text here.";
        let extracted = extract_markdown(raw);
        assert_eq!(extracted.title.as_deref(), Some("My Notes"));
        assert_eq!(extracted.author.as_deref(), Some("Ada"));
        assert_eq!(extracted.text.trim(), "Body text here.");
    }

    #[test]
    fn markdown_title_falls_back_to_heading() {
        let raw = "# The Heading\n\nSome body.";
        let extracted = extract_markdown(raw);
        assert_eq!(extracted.title.as_deref(), Some("The Heading"));
    }

    #[test]
    fn unterminated_front_matter_is_kept_as_body() {
        let raw = "--- not really front matter\ntext";
        let extracted = extract_markdown(raw);
        assert!(extracted.text.contains("not really front matter"));
    }

    #[test]
    fn html_title_from_title_tag() {
        let raw = "<html><head><title>Page Title</title></head><body><h1>H</h1></body></html>";
        let extracted = extract_html(raw);
        assert_eq!(extracted.title.as_deref(), Some("Page Title"));
    }

    #[test]
    fn html_title_falls_back_to_h1() {
        let raw = "<html><body><h1>Only Heading</h1><p>text</p></body></html>";
        let extracted = extract_html(raw);
        assert_eq!(extracted.title.as_deref(), Some("Only Heading"));
    }

    #[test]
    fn multibyte_html_keeps_title_offsets_aligned() {
        // Characters whose Unicode lowercase form has a different byte
        // length ('İ' is 2 bytes, its lowercase is 3) must not shift
        // the title slice.
        let raw = "<p>İİİİİİİİİİ</p><title>Başlık</title>";
        let extracted = extract_html(raw);
        assert_eq!(extracted.title.as_deref(), Some("Başlık"));
        assert!(extracted.text.contains("İİİİİİİİİİ"));

        let raw = "<p>İ</p><title>şşşş</title>";
        let extracted = extract_html(raw);
        assert_eq!(extracted.title.as_deref(), Some("şşşş"));
    }

    #[test]
    fn multibyte_text_before_script_still_strips_it() {
        let raw = "<p>İİİ önce</p><SCRIPT>var ş = 1;</SCRIPT><p>sonra</p>";
        let text = strip_html_tags(raw);
        assert!(!text.contains("var"));
        assert!(text.contains("önce"));
        assert!(text.contains("sonra"));
    }

    #[test]
    fn html_stripping_drops_scripts_and_styles() {
        let raw = r#"
            <html>
            <head><script>var x = 1;</script><style>body { color: red; }</style></head>
            <body><h1>Hello</h1><p>World</p></body>
            </html>
        "#;
        let text = strip_html_tags(raw);
        assert!(text.contains("Hello"));
        assert!(text.contains("World"));
        assert!(!text.contains('<'));
        assert!(!text.contains("var x"));
        assert!(!text.contains("color: red"));
    }

    #[tokio::test]
    async fn processing_sets_chunk_numbering_and_extension_tag() {
        use std::io::Write;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.md");
        let mut file = std::fs::File::create(&path).unwrap();
        for i in 0..50 {
            writeln!(file, "# Heading\nline {i} of the markdown body padding padding").unwrap();
        }

        let processor = TextProcessor::new(crate::chunker::ChunkOptions {
            chunk_size: 200,
            chunk_overlap: 40,
            separator: "\n".to_string(),
        });
        let docs = processor.process(&path, &BTreeMap::new()).await.unwrap();

        assert!(docs.len() > 1);
        let total = docs.len();
        for (i, doc) in docs.iter().enumerate() {
            assert_eq!(doc.metadata.chunk_index, Some(i));
            assert_eq!(doc.metadata.total_chunks, Some(total));
            assert!(doc.metadata.tags.contains("md"));
        }
    }

    #[tokio::test]
    async fn missing_file_is_an_extraction_error() {
        let processor = TextProcessor::new(Default::default());
        let err = processor
            .process(Path::new("/nonexistent/nope.txt"), &BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Extraction { .. }));
    }
}
