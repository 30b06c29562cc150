//! Text chunking for embedding and indexing.
//!
//! Splits raw text into overlapping segments under a size constraint.
//! Three strategies share one greedy merge rule: accumulate elementary
//! units (separator sections, paragraphs, or sentences) into a chunk
//! until the next unit would overflow `chunk_size`, close the chunk,
//! and seed the next one with the tail of the closed chunk.
//!
//! A single unit longer than `chunk_size` is emitted whole; content is
//! never dropped or truncated, so `chunk_size` is a soft bound.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkOptions {
    /// Maximum chunk size in characters (soft bound).
    pub chunk_size: usize,
    /// Characters carried from the end of one chunk into the next.
    pub chunk_overlap: usize,
    /// Separator for the default strategy.
    pub separator: String,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            separator: "\n".to_string(),
        }
    }
}

pub struct TextChunker {
    options: ChunkOptions,
}

impl TextChunker {
    pub fn new(options: ChunkOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ChunkOptions {
        &self.options
    }

    /// Split on the configured separator and merge greedily.
    pub fn chunk(&self, text: &str) -> Vec<String> {
        let units: Vec<&str> = text.split(self.options.separator.as_str()).collect();
        self.merge_units(text, &units, &self.options.separator)
    }

    /// Paragraph strategy: elementary unit is a blank-line separated block.
    pub fn chunk_paragraphs(&self, text: &str) -> Vec<String> {
        let units = split_paragraphs(text);
        self.merge_units(text, &units, "\n\n")
    }

    /// Sentence strategy: elementary unit is a single sentence.
    pub fn chunk_sentences(&self, text: &str) -> Vec<String> {
        let units = split_sentences(text);
        let refs: Vec<&str> = units.iter().map(String::as_str).collect();
        self.merge_units(text, &refs, " ")
    }

    /// Greedy accumulate-with-overlap over pre-split units.
    fn merge_units(&self, original: &str, units: &[&str], joiner: &str) -> Vec<String> {
        let trimmed = original.trim();
        if trimmed.is_empty() {
            return Vec::new();
        }
        if char_len(trimmed) <= self.options.chunk_size {
            return vec![trimmed.to_string()];
        }

        let mut chunks = Vec::new();
        let mut current = String::new();

        for unit in units {
            if unit.trim().is_empty() {
                continue;
            }

            let unit_len = char_len(unit);
            let current_len = char_len(&current);

            if !current.is_empty()
                && current_len + char_len(joiner) + unit_len > self.options.chunk_size
            {
                chunks.push(current.trim().to_string());
                current = self.overlap_seed(&current);
            }

            if !current.is_empty() {
                current.push_str(joiner);
            }
            current.push_str(unit);
        }

        let tail = current.trim();
        if !tail.is_empty() {
            chunks.push(tail.to_string());
        }

        chunks.retain(|c| !c.is_empty());
        chunks
    }

    /// Tail of a closed chunk that seeds the next one.
    ///
    /// The cut is moved to the first sentence-ending period or newline
    /// found past 30% of the overlap window, so the carried text starts
    /// at a sentence boundary when one is available.
    fn overlap_seed(&self, closed: &str) -> String {
        if self.options.chunk_overlap == 0 {
            return String::new();
        }

        let chars: Vec<char> = closed.chars().collect();
        let overlap = self.options.chunk_overlap.min(chars.len());
        let window_start = chars.len() - overlap;
        let window = &chars[window_start..];

        let min_boundary = (overlap * 3) / 10;
        let boundary = window
            .iter()
            .enumerate()
            .skip(min_boundary)
            .find(|(_, c)| **c == '.' || **c == '\n')
            .map(|(idx, _)| idx);

        let seed_start = match boundary {
            // Cut just after the boundary so the seed starts clean.
            Some(idx) if idx + 1 < window.len() => idx + 1,
            _ => 0,
        };

        window[seed_start..]
            .iter()
            .collect::<String>()
            .trim_start()
            .to_string()
    }
}

impl Default for TextChunker {
    fn default() -> Self {
        Self::new(ChunkOptions::default())
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Split into paragraphs on runs of blank lines.
fn split_paragraphs(text: &str) -> Vec<&str> {
    let mut paragraphs = Vec::new();
    let mut rest = text;

    while let Some(pos) = find_blank_line(rest) {
        let (head, tail) = rest.split_at(pos.0);
        if !head.trim().is_empty() {
            paragraphs.push(head);
        }
        rest = &tail[pos.1..];
    }
    if !rest.trim().is_empty() {
        paragraphs.push(rest);
    }
    paragraphs
}

/// Find the byte offset and length of the next blank-line run.
fn find_blank_line(text: &str) -> Option<(usize, usize)> {
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\n' {
            let mut j = i + 1;
            let mut saw_second = false;
            while j < bytes.len() && (bytes[j] == b'\n' || bytes[j] == b'\r' || bytes[j] == b' ') {
                if bytes[j] == b'\n' {
                    saw_second = true;
                }
                j += 1;
            }
            if saw_second {
                return Some((i, j - i));
            }
            i = j;
        } else {
            i += 1;
        }
    }
    None
}

/// Split into sentences on `.`, `!`, `?` followed by whitespace.
fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        if matches!(c, '.' | '!' | '?') {
            let at_break = chars.peek().map_or(true, |next| next.is_whitespace());
            if at_break {
                let sentence = current.trim();
                if !sentence.is_empty() {
                    sentences.push(sentence.to_string());
                }
                current.clear();
            }
        }
    }

    let tail = current.trim();
    if !tail.is_empty() {
        sentences.push(tail.to_string());
    }
    sentences
}
