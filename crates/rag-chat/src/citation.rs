//! Citation checking against the sources retrieved for a turn.

use regex::{Captures, Regex};
use tracing::warn;

use rag_core::{RagError, Result, Source};

/// `[source: <id>]`, case-insensitive, with the whitespace before it so a
/// removed token leaves no double space behind.
const CITATION_PATTERN: &str = r"(?i)[ \t]*\[\s*source\s*:\s*([^\]\s]+)\s*\]";

/// Generated text after citation checking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckedAnswer {
    /// Text with invalid citations removed, a removal note and a sources footer.
    pub text: String,
    /// Cited ids that were retrieved, in order of first citation.
    pub valid_ids: Vec<String>,
    /// Number of citation tokens removed.
    pub removed: usize,
}

pub struct CitationValidator {
    pattern: Regex,
}

impl CitationValidator {
    pub fn new() -> Result<Self> {
        let pattern = Regex::new(CITATION_PATTERN)
            .map_err(|e| RagError::internal(format!("citation pattern: {}", e)))?;
        Ok(Self { pattern })
    }

    /// Keep only citations of retrieved ids and append the standard footer.
    pub fn validate(&self, text: &str, retrieved_ids: &[String]) -> CheckedAnswer {
        let mut valid_ids: Vec<String> = Vec::new();
        let mut removed = 0;

        let cleaned = self.pattern.replace_all(text, |caps: &Captures| {
            let cited = &caps[1];
            match retrieved_ids.iter().find(|id| id.eq_ignore_ascii_case(cited)) {
                Some(id) => {
                    if !valid_ids.contains(id) {
                        valid_ids.push(id.clone());
                    }
                    caps[0].to_string()
                }
                None => {
                    removed += 1;
                    String::new()
                }
            }
        });

        let mut text = cleaned.trim_end().to_string();
        if removed > 0 {
            warn!(
                "Removed {} citation(s) to sources that were not retrieved",
                removed
            );
            text.push_str(&format!(
                "\n\n_Note: {} invalid citation(s) were removed._",
                removed
            ));
        }
        if !valid_ids.is_empty() {
            text.push_str("\n\nSources:");
            for id in &valid_ids {
                text.push_str(&format!("\n- {}", id));
            }
        }

        CheckedAnswer {
            text,
            valid_ids,
            removed,
        }
    }

    /// Remove every citation token.
    pub fn strip_all(&self, text: &str) -> String {
        self.pattern.replace_all(text, "").trim().to_string()
    }
}

/// The retrieved sources whose ids were validly cited, in citation order.
pub fn select_sources(sources: &[Source], valid_ids: &[String]) -> Vec<Source> {
    valid_ids
        .iter()
        .filter_map(|id| sources.iter().find(|s| &s.id == id).cloned())
        .collect()
}
