//! rag-query - Retrieval and context construction
//!
//! This crate turns a query vector into the context a generation call is
//! allowed to use.
//!
//! # Features
//!
//! - Similarity gating: a weak best match switches the turn to guard mode
//! - Adaptive top-k expansion when the similarity curve is flat
//! - One retry on index failure, then graceful degradation
//! - Id-tagged context entries grouped by source document
//!
//! # Example
//!
//! ```rust,ignore
//! use rag_query::{ContextBuilder, VectorRetriever};
//!
//! let retriever = VectorRetriever::new(index, config.retrieval.clone());
//! let retrieval = retriever.retrieve(&query_vector).await;
//! let context = ContextBuilder::new(store, 160).build(&retrieval.matches).await?;
//! ```

mod context;
mod retriever;

pub use context::{format_context, preview, BuiltContext, ContextBuilder, NO_CONTEXT_BLOCK};
pub use retriever::{Retrieval, VectorRetriever};
