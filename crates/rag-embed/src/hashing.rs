//! Deterministic feature-hashing embedder.
//!
//! Needs no model files or network access. Texts that share content words
//! land close together, which is enough for local runs and tests.

use async_trait::async_trait;
use tracing::debug;

use rag_core::{Embedder, RagError, Result};

use crate::l2_normalize;

const MODEL_NAME: &str = "feature-hashing-v1";

const STOP_WORDS: &[&str] = &[
    "a", "about", "an", "and", "are", "as", "at", "be", "been", "being", "but", "by", "can",
    "could", "did", "do", "does", "for", "from", "had", "has", "have", "he", "her", "here", "his",
    "how", "i", "if", "in", "into", "is", "it", "its", "me", "my", "no", "not", "of", "on", "or",
    "our", "she", "should", "so", "than", "that", "the", "their", "them", "then", "there", "these",
    "they", "this", "those", "to", "was", "we", "were", "what", "when", "where", "which", "who",
    "whom", "whose", "why", "will", "with", "would", "you", "your",
];

/// Bag-of-words embedder using blake3 bucket hashing.
///
/// Bucket counts are damped to `1 + ln(count)` so a term repeated across a
/// chunk does not drown out the others.
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    /// Create an embedder producing vectors of `dimension` floats.
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(RagError::config("embedding dimension must be > 0"));
        }
        Ok(Self { dimension })
    }

    /// Embed a single text.
    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimension];
        for term in terms(text) {
            let hash = blake3::hash(term.as_bytes());
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&hash.as_bytes()[..8]);
            let bucket = (u64::from_le_bytes(bytes) % self.dimension as u64) as usize;
            v[bucket] += 1.0;
        }
        for x in v.iter_mut().filter(|x| **x > 0.0) {
            *x = 1.0 + x.ln();
        }
        l2_normalize(v)
    }
}

/// Lowercased content words with plural endings folded.
pub fn terms(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .filter(|w| !STOP_WORDS.contains(&w.as_str()))
        .map(|w| stem(&w))
        .collect()
}

fn stem(word: &str) -> String {
    if word.len() > 4 && word.ends_with("ies") {
        return format!("{}y", &word[..word.len() - 3]);
    }
    if word.len() > 3 && word.ends_with('s') && !word.ends_with("ss") && !word.ends_with("us") {
        return word[..word.len() - 1].to_string();
    }
    word.to_string()
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        debug!("Hashing {} texts", texts.len());
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        MODEL_NAME
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rag_core::RetrievalConfig;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn test_terms() {
        assert_eq!(terms("What is a dog?"), vec!["dog"]);
        assert_eq!(terms("Dogs are mammals."), vec!["dog", "mammal"]);
        assert_eq!(terms("The class of berries"), vec!["class", "berry"]);
    }

    #[tokio::test]
    async fn test_related_texts_are_similar() {
        let embedder = HashingEmbedder::new(768).unwrap();
        let vectors = embedder
            .embed(&["What is a dog?", "Dogs are mammals.", "Quarterly revenue grew"])
            .await
            .unwrap();

        assert_eq!(vectors.len(), 3);
        assert!(vectors.iter().all(|v| v.len() == 768));
        assert!(cosine(&vectors[0], &vectors[1]) >= 0.65);
        assert!(cosine(&vectors[0], &vectors[2]) < cosine(&vectors[0], &vectors[1]));
    }

    #[test]
    fn test_repeated_terms_are_damped() {
        let embedder = HashingEmbedder::new(768).unwrap();
        let query = embedder.embed_one("What is a dog?");
        let doc = embedder.embed_one("Cats are mammals. Dogs are mammals.");

        // raw counts would give 1/sqrt(6), about 0.41
        assert!(cosine(&query, &doc) > 0.42);
        assert!(cosine(&query, &doc) >= RetrievalConfig::default().min_similarity_for("hashing"));
    }

    #[tokio::test]
    async fn test_deterministic_and_normalized() {
        let embedder = HashingEmbedder::new(64).unwrap();
        let a = embedder.embed_one("rust ownership rules");
        let b = embedder.embed_one("rust ownership rules");
        assert_eq!(a, b);

        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_stop_words_only_gives_zero_vector() {
        let embedder = HashingEmbedder::new(16).unwrap();
        assert!(embedder.embed_one("what is the").iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_zero_dimension_rejected() {
        assert!(HashingEmbedder::new(0).is_err());
    }
}
