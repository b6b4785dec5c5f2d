//! Recursive character text splitter.
//!
//! Splits text by trying progressively smaller separators until every piece
//! fits within the chunk size, then merges neighbouring pieces back together
//! with a trailing overlap.

use std::collections::VecDeque;

use rag_core::{ChunkConfig, ChunkData, Chunker, RagError, Result};
use tracing::debug;

/// Separators tried in order:
/// 1. Double newline (paragraph breaks)
/// 2. Single newline
/// 3. Sentence boundaries
/// 4. Word boundaries (space)
/// 5. Character (last resort)
const SEPARATORS: &[&str] = &["\n\n", "\n", ". ", " ", ""];

/// Recursive chunker measuring chunk size in characters.
#[derive(Debug, Default)]
pub struct RecursiveChunker;

impl RecursiveChunker {
    /// Create a new recursive chunker.
    pub fn new() -> Self {
        Self
    }

    /// Split text into pieces no longer than the chunk size.
    fn split_text(&self, text: &str, separators: &[&str], config: &ChunkConfig) -> Vec<String> {
        let (sep_idx, separator) = separators
            .iter()
            .enumerate()
            .find(|(_, s)| s.is_empty() || text.contains(**s))
            .map(|(i, s)| (i, *s))
            .unwrap_or((separators.len(), ""));

        let pieces: Vec<&str> = if separator.is_empty() {
            text.char_indices()
                .map(|(i, c)| &text[i..i + c.len_utf8()])
                .collect()
        } else {
            // keep the separator on the piece it ends
            text.split_inclusive(separator).collect()
        };

        let remaining = separators.get(sep_idx + 1..).unwrap_or(&[]);
        let mut chunks = Vec::new();
        let mut fitting: Vec<&str> = Vec::new();

        for piece in pieces {
            if char_len(piece) <= config.chunk_size {
                fitting.push(piece);
                continue;
            }

            if !fitting.is_empty() {
                chunks.extend(self.merge_pieces(&fitting, config));
                fitting.clear();
            }
            chunks.extend(self.split_text(piece, remaining, config));
        }

        if !fitting.is_empty() {
            chunks.extend(self.merge_pieces(&fitting, config));
        }
        chunks
    }

    /// Merge small pieces into chunks, carrying up to `chunk_overlap`
    /// characters of whole pieces into the next chunk.
    fn merge_pieces(&self, pieces: &[&str], config: &ChunkConfig) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut current: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for piece in pieces {
            let len = char_len(piece);

            if total + len > config.chunk_size && !current.is_empty() {
                push_joined(&mut chunks, &current);

                while total > config.chunk_overlap
                    || (total + len > config.chunk_size && total > 0)
                {
                    match current.pop_front() {
                        Some(front) => total -= char_len(front),
                        None => break,
                    }
                }
            }

            current.push_back(piece);
            total += len;
        }

        push_joined(&mut chunks, &current);
        chunks
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn push_joined(chunks: &mut Vec<String>, pieces: &VecDeque<&str>) {
    let joined: String = pieces.iter().copied().collect();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

impl Chunker for RecursiveChunker {
    fn chunk(&self, content: &str, config: &ChunkConfig) -> Result<Vec<ChunkData>> {
        if config.chunk_size == 0 {
            return Err(RagError::invalid_input("chunk_size must be > 0"));
        }
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        let chunks: Vec<ChunkData> = self
            .split_text(content, SEPARATORS, config)
            .into_iter()
            .enumerate()
            .map(|(i, content)| ChunkData {
                content,
                index: i as u32,
            })
            .collect();

        debug!(
            "Split {} chars into {} chunks",
            content.chars().count(),
            chunks.len()
        );
        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(chunk_size: usize, chunk_overlap: usize) -> ChunkConfig {
        ChunkConfig {
            chunk_size,
            chunk_overlap,
        }
    }

    fn contents(chunks: &[ChunkData]) -> Vec<&str> {
        chunks.iter().map(|c| c.content.as_str()).collect()
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunker = RecursiveChunker::new();
        let chunks = chunker
            .chunk("Dogs are mammals.", &ChunkConfig::default())
            .unwrap();

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "Dogs are mammals.");
        assert_eq!(chunks[0].index, 0);
    }

    #[test]
    fn test_empty_text() {
        let chunker = RecursiveChunker::new();
        assert!(chunker.chunk("  \n ", &ChunkConfig::default()).unwrap().is_empty());
    }

    #[test]
    fn test_sentences_respect_chunk_size() {
        let chunker = RecursiveChunker::new();
        let text = "Dogs are mammals. Cats are mammals too. The sky is blue.";
        let chunks = chunker.chunk(text, &config(20, 0)).unwrap();

        assert_eq!(chunks[0].content, "Dogs are mammals.");
        assert!(chunks.iter().all(|c| c.content.chars().count() <= 20));
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i as u32);
        }
    }

    #[test]
    fn test_paragraphs_split_first() {
        let chunker = RecursiveChunker::new();
        let text = "First paragraph here.\n\nSecond paragraph here.";
        let chunks = chunker.chunk(text, &config(25, 0)).unwrap();

        assert_eq!(
            contents(&chunks),
            vec!["First paragraph here.", "Second paragraph here."]
        );
    }

    #[test]
    fn test_overlap_carries_trailing_words() {
        let chunker = RecursiveChunker::new();
        let text = "one two three four five six seven eight nine ten";
        let chunks = chunker.chunk(text, &config(15, 5)).unwrap();

        assert_eq!(
            contents(&chunks),
            vec!["one two three", "four five six", "six seven", "eight nine ten"]
        );
    }

    #[test]
    fn test_long_word_falls_back_to_characters() {
        let chunker = RecursiveChunker::new();
        let chunks = chunker.chunk("abcdefghij", &config(4, 0)).unwrap();
        assert_eq!(contents(&chunks), vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn test_multibyte_text() {
        let chunker = RecursiveChunker::new();
        let chunks = chunker.chunk("żółw ćma źrebię", &config(5, 0)).unwrap();
        assert!(chunks.iter().all(|c| c.content.chars().count() <= 5));
        assert_eq!(chunks[0].content, "żółw");
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let chunker = RecursiveChunker::new();
        assert!(chunker.chunk("text", &config(0, 0)).is_err());
    }
}
