//! Overlapping window chunker.
//!
//! Splits a document's normalized text into [`Chunk`]s of at most
//! `max_chars` characters, where each chunk repeats the last
//! `overlap_chars` characters of its predecessor. Cut points prefer the
//! coarsest separator available inside the window:
//!
//! 1. paragraph break (`\n\n`)
//! 2. line break (`\n`)
//! 3. sentence end (`. `, `! `, `? `)
//! 4. word boundary (` `)
//! 5. hard cut at the window limit
//!
//! Chunks are exact character slices of the normalized text, so dropping
//! the first `overlap_chars` characters of every chunk after the first and
//! concatenating reproduces the input.
//!
//! # Example
//!
//! ```rust
//! use qa_harness_core::chunk::Chunker;
//!
//! let chunker = Chunker::default();
//! let chunks = chunker
//!     .split_text("doc-1", "notes.md", "Hello world.\n\nSecond paragraph.")
//!     .unwrap();
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].chunk_id, "doc-1#0000");
//! ```

use crate::error::{QaError, Result};
use crate::models::{sha256_hex, Chunk, Document};

pub const DEFAULT_MAX_CHARS: usize = 1000;
pub const DEFAULT_OVERLAP_CHARS: usize = 200;

/// Separator groups, coarsest first. Within a group the latest occurrence wins.
const SEPARATOR_GROUPS: &[&[&str]] = &[&["\n\n"], &["\n"], &[". ", "! ", "? "], &[" "]];

/// Normalize document text before chunking: CRLF becomes LF and leading /
/// trailing whitespace is trimmed.
pub fn normalize(text: &str) -> String {
    text.replace("\r\n", "\n").trim().to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    max_chars: usize,
    overlap_chars: usize,
}

impl Default for Chunker {
    fn default() -> Self {
        Self {
            max_chars: DEFAULT_MAX_CHARS,
            overlap_chars: DEFAULT_OVERLAP_CHARS,
        }
    }
}

impl Chunker {
    /// Build a chunker, requiring `0 < overlap_chars < max_chars`.
    pub fn new(max_chars: usize, overlap_chars: usize) -> Result<Self> {
        if overlap_chars == 0 || overlap_chars >= max_chars {
            return Err(QaError::InvalidRequest(format!(
                "chunk overlap must be within (0, {max_chars}), got {overlap_chars}"
            )));
        }
        Ok(Self {
            max_chars,
            overlap_chars,
        })
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    pub fn overlap_chars(&self) -> usize {
        self.overlap_chars
    }

    /// Split a stored document's content.
    pub fn split(&self, document: &Document) -> Result<Vec<Chunk>> {
        self.split_text(&document.id, &document.source_name, &document.content)
    }

    /// Split raw text belonging to `document_id`.
    ///
    /// Fails with [`QaError::EmptyDocument`] when nothing but whitespace
    /// remains after normalization.
    pub fn split_text(
        &self,
        document_id: &str,
        source_name: &str,
        text: &str,
    ) -> Result<Vec<Chunk>> {
        let text = normalize(text);
        if text.is_empty() {
            return Err(QaError::EmptyDocument {
                source_name: source_name.to_string(),
            });
        }

        // Byte index of every char position, plus the end of the string.
        let bounds: Vec<usize> = text
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(text.len()))
            .collect();
        let total = bounds.len() - 1;

        let mut chunks = Vec::new();
        let mut start = 0usize;
        loop {
            let limit = start + self.max_chars;
            let end = if limit >= total {
                total
            } else {
                self.find_break(&text, &bounds, start, limit)
            };

            let slice = &text[bounds[start]..bounds[end]];
            chunks.push(make_chunk(
                document_id,
                source_name,
                chunks.len(),
                slice,
                start,
                end,
            ));

            if end >= total {
                break;
            }
            start = end - self.overlap_chars;
        }

        Ok(chunks)
    }

    /// Pick the cut position (in chars) for the window `[start, limit)`.
    ///
    /// The cut must land after `start + overlap_chars` so the next window
    /// always advances.
    fn find_break(&self, text: &str, bounds: &[usize], start: usize, limit: usize) -> usize {
        let window = &text[bounds[start]..bounds[limit]];
        let floor = start + self.overlap_chars;

        for group in SEPARATOR_GROUPS {
            let best = group
                .iter()
                .filter_map(|sep| window.rfind(sep).map(|at| at + sep.len()))
                .max();
            if let Some(cut_byte) = best {
                let absolute = bounds[start] + cut_byte;
                let cut = bounds
                    .binary_search(&absolute)
                    .unwrap_or_else(|insert_at| insert_at);
                if cut > floor {
                    return cut;
                }
            }
        }

        limit
    }
}

fn make_chunk(
    document_id: &str,
    source_name: &str,
    sequence_index: usize,
    text: &str,
    start_offset: usize,
    end_offset: usize,
) -> Chunk {
    Chunk {
        chunk_id: format!("{document_id}#{sequence_index:04}"),
        document_id: document_id.to_string(),
        source_name: source_name.to_string(),
        text: text.to_string(),
        start_offset,
        end_offset,
        sequence_index,
        hash: sha256_hex(text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn long_document() -> String {
        (0..40)
            .map(|i| {
                format!(
                    "Section {i}. The checkout form validates the discount code before payment. \
                     Users must fill name, email and address.\nExpress shipping costs $10."
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    fn reconstruct(chunks: &[Chunk], overlap: usize) -> String {
        let mut out = String::new();
        for (i, chunk) in chunks.iter().enumerate() {
            if i == 0 {
                out.push_str(&chunk.text);
            } else {
                out.extend(chunk.text.chars().skip(overlap));
            }
        }
        out
    }

    #[test]
    fn test_short_text_single_chunk() {
        let chunks = Chunker::default()
            .split_text("doc-1", "a.md", "Hello, world!")
            .unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Hello, world!");
        assert_eq!(chunks[0].start_offset, 0);
        assert_eq!(chunks[0].end_offset, 13);
        assert_eq!(chunks[0].sequence_index, 0);
    }

    #[test]
    fn test_blank_text_is_empty_document() {
        let err = Chunker::default()
            .split_text("doc-1", "blank.md", "  \r\n\n\t ")
            .unwrap_err();
        match err {
            QaError::EmptyDocument { source_name } => assert_eq!(source_name, "blank.md"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_round_trip_reconstructs_normalized_text() {
        let text = long_document();
        let chunks = Chunker::default()
            .split_text("doc-1", "spec.md", &text)
            .unwrap();
        assert!(chunks.len() > 3);
        assert_eq!(reconstruct(&chunks, DEFAULT_OVERLAP_CHARS), normalize(&text));
    }

    #[test]
    fn test_length_and_overlap_bounds() {
        let text = long_document();
        let chunks = Chunker::default()
            .split_text("doc-1", "spec.md", &text)
            .unwrap();
        for chunk in &chunks {
            assert!(chunk.text.chars().count() <= DEFAULT_MAX_CHARS);
            assert_eq!(chunk.text.chars().count(), chunk.end_offset - chunk.start_offset);
        }
        for pair in chunks.windows(2) {
            let overlap = pair[0].end_offset - pair[1].start_offset;
            assert!(overlap >= DEFAULT_OVERLAP_CHARS);
            let tail: String = pair[0]
                .text
                .chars()
                .skip(pair[0].text.chars().count() - overlap)
                .collect();
            assert!(pair[1].text.starts_with(&tail));
        }
    }

    #[test]
    fn test_prefers_paragraph_boundary() {
        let text = format!("{}\n\n{}", "a".repeat(600), "b".repeat(600));
        let chunks = Chunker::default().split_text("doc-1", "p.md", &text).unwrap();
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].text.ends_with("\n\n"));
        assert_eq!(chunks[0].end_offset, 602);
        assert_eq!(chunks[1].start_offset, 402);
        assert_eq!(chunks[1].end_offset, 1202);
    }

    #[test]
    fn test_hard_cut_without_separators() {
        let text = "x".repeat(2500);
        let chunks = Chunker::default().split_text("doc-1", "x.txt", &text).unwrap();
        assert_eq!(chunks[0].text.len(), 1000);
        assert_eq!(chunks[1].start_offset, 800);
        assert_eq!(reconstruct(&chunks, DEFAULT_OVERLAP_CHARS), text);
    }

    #[test]
    fn test_crlf_normalized_and_offsets_in_chars() {
        let text = "  ┌──┐ line one\r\nline two ünïcödé  ";
        let chunks = Chunker::default().split_text("doc-1", "u.txt", text).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "┌──┐ line one\nline two ünïcödé");
        assert_eq!(chunks[0].end_offset, chunks[0].text.chars().count());
    }

    #[test]
    fn test_multibyte_round_trip_with_small_windows() {
        let text = "│ Grüße aus Köln │ ".repeat(40);
        let chunker = Chunker::new(50, 10).unwrap();
        let chunks = chunker.split_text("doc-1", "k.txt", &text).unwrap();
        assert!(chunks.len() > 5);
        assert_eq!(reconstruct(&chunks, 10), normalize(&text));
    }

    #[test]
    fn test_ids_and_hashes_deterministic() {
        let text = long_document();
        let a = Chunker::default().split_text("doc-9", "s.md", &text).unwrap();
        let b = Chunker::default().split_text("doc-9", "s.md", &text).unwrap();
        assert_eq!(a, b);
        assert_eq!(a[1].chunk_id, "doc-9#0001");
        assert_eq!(a[0].hash, sha256_hex(&a[0].text));
    }

    #[test]
    fn test_invalid_configuration_rejected() {
        assert!(Chunker::new(100, 0).is_err());
        assert!(Chunker::new(100, 100).is_err());
        assert!(Chunker::new(100, 20).is_ok());
    }
}
