//! Similarity-gated retrieval with adaptive top-k.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use rag_core::{RetrievalConfig, RetrievalMatch, Result, VectorIndex};

/// Outcome of a retrieval.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Retrieval {
    /// Ranked matches, best first. Empty in guard mode.
    pub matches: Vec<RetrievalMatch>,

    /// No match was relevant enough; the turn must not call the model.
    pub guard_mode: bool,

    /// The index failed twice and the result is a fallback.
    pub degraded: bool,
}

impl Retrieval {
    fn guard(degraded: bool) -> Self {
        Self {
            matches: Vec::new(),
            guard_mode: true,
            degraded,
        }
    }

    /// Ids of the retrieved notes, as strings, in rank order.
    pub fn ids(&self) -> Vec<String> {
        self.matches.iter().map(|m| m.id.to_string()).collect()
    }
}

/// Queries the vector index and decides whether the results are usable.
pub struct VectorRetriever {
    index: Arc<dyn VectorIndex>,
    config: RetrievalConfig,
}

impl VectorRetriever {
    pub fn new(index: Arc<dyn VectorIndex>, config: RetrievalConfig) -> Self {
        Self { index, config }
    }

    /// Retrieve matches for a query vector. Never fails: index errors that
    /// survive one retry turn into guard mode.
    pub async fn retrieve(&self, query: &[f32]) -> Retrieval {
        let start = Instant::now();

        let mut top_k = self.config.top_k;
        let mut matches = match self.query_with_retry(query, top_k).await {
            Ok(m) => m,
            Err(e) => {
                warn!("Retrieval failed, entering guard mode: {}", e);
                return Retrieval::guard(true);
            }
        };

        let top1 = match matches.first() {
            Some(m) if m.score >= self.config.min_similarity => m.score,
            Some(m) => {
                debug!(
                    "Best match {:.3} below threshold {:.3}",
                    m.score, self.config.min_similarity
                );
                return Retrieval::guard(false);
            }
            None => {
                debug!("Index returned no matches");
                return Retrieval::guard(false);
            }
        };

        let initial_k = top_k;
        for &step in &self.config.expansion_steps {
            if step <= top_k || matches.len() < top_k || !self.is_flat(&matches) {
                break;
            }

            match self.query_with_retry(query, step).await {
                Ok(expanded) => {
                    debug!("Flat similarity curve, expanded top-k {} -> {}", top_k, step);
                    matches = expanded;
                    top_k = step;
                }
                Err(e) => {
                    warn!("Expansion query failed, keeping {} matches: {}", matches.len(), e);
                    break;
                }
            }
        }

        if top_k > initial_k {
            // expansion only admits weak matches that sit on the flat part of the curve
            let min_similarity = self.config.min_similarity;
            let flat_spread = self.config.flat_spread;
            matches.retain(|m| m.score >= min_similarity || top1 - m.score < flat_spread);
        }

        info!(
            "Retrieved {} matches (top {:.3}) in {:?}",
            matches.len(),
            top1,
            start.elapsed()
        );

        Retrieval {
            matches,
            guard_mode: false,
            degraded: false,
        }
    }

    /// Spread of the top three scores is below `flat_spread`.
    fn is_flat(&self, matches: &[RetrievalMatch]) -> bool {
        if matches.len() < 3 {
            return false;
        }
        let top3 = &matches[..3];
        let max = top3.iter().map(|m| m.score).fold(f32::MIN, f32::max);
        let min = top3.iter().map(|m| m.score).fold(f32::MAX, f32::min);
        max - min < self.config.flat_spread
    }

    async fn query_with_retry(&self, query: &[f32], top_k: usize) -> Result<Vec<RetrievalMatch>> {
        let mut matches = match self.index.query(query, top_k).await {
            Ok(m) => m,
            Err(e) => {
                warn!("Vector query failed, retrying once: {}", e);
                tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
                self.index.query(query, top_k).await?
            }
        };
        matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use rag_core::{RagError, VectorRecord};
    use ulid::Ulid;

    /// Index returning scripted scores and recording each requested k.
    struct ScriptedIndex {
        scores: Vec<f32>,
        ids: Vec<Ulid>,
        failures: Mutex<usize>,
        calls: Mutex<Vec<usize>>,
    }

    impl ScriptedIndex {
        fn new(scores: &[f32]) -> Self {
            Self {
                scores: scores.to_vec(),
                ids: scores.iter().map(|_| Ulid::new()).collect(),
                failures: Mutex::new(0),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn failing(scores: &[f32], failures: usize) -> Self {
            let index = Self::new(scores);
            *index.failures.lock() = failures;
            index
        }
    }

    #[async_trait]
    impl VectorIndex for ScriptedIndex {
        fn dimension(&self) -> usize {
            2
        }

        async fn query(&self, _vector: &[f32], top_k: usize) -> Result<Vec<RetrievalMatch>> {
            self.calls.lock().push(top_k);
            {
                let mut failures = self.failures.lock();
                if *failures > 0 {
                    *failures -= 1;
                    return Err(RagError::retrieval("index unavailable"));
                }
            }
            Ok(self
                .scores
                .iter()
                .zip(&self.ids)
                .take(top_k)
                .map(|(score, id)| RetrievalMatch {
                    id: *id,
                    score: *score,
                    metadata: None,
                })
                .collect())
        }

        async fn upsert(&self, _records: &[VectorRecord]) -> Result<()> {
            Ok(())
        }

        async fn delete_by_ids(&self, _ids: &[Ulid]) -> Result<()> {
            Ok(())
        }
    }

    fn retriever(index: Arc<ScriptedIndex>) -> VectorRetriever {
        VectorRetriever::new(
            index,
            RetrievalConfig {
                retry_delay_ms: 1,
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_empty_index_is_guard_mode() {
        let index = Arc::new(ScriptedIndex::new(&[]));
        let result = retriever(index).retrieve(&[1.0, 0.0]).await;
        assert!(result.guard_mode);
        assert!(result.matches.is_empty());
        assert!(!result.degraded);
    }

    #[tokio::test]
    async fn test_low_similarity_is_guard_mode() {
        let index = Arc::new(ScriptedIndex::new(&[0.64, 0.5, 0.4]));
        let result = retriever(index).retrieve(&[1.0, 0.0]).await;
        assert!(result.guard_mode);
        assert!(result.matches.is_empty());
    }

    #[tokio::test]
    async fn test_relevant_matches_returned_ranked() {
        let index = Arc::new(ScriptedIndex::new(&[0.9, 0.7, 0.2, 0.1]));
        let result = retriever(index.clone()).retrieve(&[1.0, 0.0]).await;

        assert!(!result.guard_mode);
        let scores: Vec<f32> = result.matches.iter().map(|m| m.score).collect();
        assert_eq!(scores, vec![0.9, 0.7, 0.2]);
        // steep curve: no expansion
        assert_eq!(*index.calls.lock(), vec![3]);
    }

    #[tokio::test]
    async fn test_flat_curve_expands_top_k() {
        let index = Arc::new(ScriptedIndex::new(&[0.80, 0.79, 0.78, 0.77, 0.76, 0.5]));
        let result = retriever(index.clone()).retrieve(&[1.0, 0.0]).await;

        assert_eq!(*index.calls.lock(), vec![3, 5]);
        assert_eq!(result.matches.len(), 5);
    }

    #[tokio::test]
    async fn test_expansion_keeps_near_top_matches_below_threshold() {
        let index = Arc::new(ScriptedIndex::new(&[0.66, 0.655, 0.65, 0.64, 0.50]));
        let result = retriever(index).retrieve(&[1.0, 0.0]).await;

        let scores: Vec<f32> = result.matches.iter().map(|m| m.score).collect();
        assert_eq!(scores, vec![0.66, 0.655, 0.65, 0.64]);
    }

    #[tokio::test]
    async fn test_single_failure_is_retried() {
        let index = Arc::new(ScriptedIndex::failing(&[0.9], 1));
        let result = retriever(index.clone()).retrieve(&[1.0, 0.0]).await;
        assert!(!result.guard_mode);
        assert_eq!(result.matches.len(), 1);
        assert_eq!(index.calls.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_persistent_failure_degrades_to_guard_mode() {
        let index = Arc::new(ScriptedIndex::failing(&[0.9], 2));
        let result = retriever(index).retrieve(&[1.0, 0.0]).await;
        assert!(result.guard_mode);
        assert!(result.degraded);
    }
}
