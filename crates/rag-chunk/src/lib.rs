//! rag-chunk - Chunking strategies
//!
//! This crate splits documents into appropriately-sized pieces for embedding.
//!
//! # Chunkers
//!
//! - [`RecursiveChunker`]: Recursively splits text using progressively smaller
//!   separators (paragraphs, lines, sentences, words, characters) and merges
//!   the pieces back with a configurable overlap.
//!
//! # Example
//!
//! ```rust
//! use rag_chunk::{ChunkConfig, Chunker, RecursiveChunker};
//!
//! let chunker = RecursiveChunker::new();
//! let chunks = chunker.chunk("Hello world", &ChunkConfig::default()).unwrap();
//! assert_eq!(chunks[0].content, "Hello world");
//! ```

mod recursive;

pub use recursive::RecursiveChunker;

// Re-export types for convenience
pub use rag_core::{ChunkConfig, ChunkData, Chunker};
