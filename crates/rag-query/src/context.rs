//! Context block construction with source attribution.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};
use ulid::Ulid;

use rag_core::{Note, Result, RetrievalMatch, Source, Store};

/// Context block used when retrieval produced nothing.
pub const NO_CONTEXT_BLOCK: &str = "No relevant documents were found for this question.";

const UNATTRIBUTED_LABEL: &str = "Unattributed notes";

/// The prompt context and the sources it cites.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuiltContext {
    /// Numbered, id-tagged entries grouped by document.
    pub context_block: String,

    /// One entry per retrieved chunk, in rank order, with truncated previews.
    pub sources: Vec<Source>,
}

impl BuiltContext {
    /// Context for a turn with no usable matches.
    pub fn empty() -> Self {
        Self {
            context_block: NO_CONTEXT_BLOCK.to_string(),
            sources: Vec::new(),
        }
    }

    /// Ids a citation may legitimately reference.
    pub fn source_ids(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.id.clone()).collect()
    }
}

/// Looks up notes and documents for retrieval matches and formats them.
pub struct ContextBuilder {
    store: Arc<dyn Store>,
    preview_chars: usize,
}

impl ContextBuilder {
    pub fn new(store: Arc<dyn Store>, preview_chars: usize) -> Self {
        Self {
            store,
            preview_chars,
        }
    }

    /// Build the context for ranked matches.
    pub async fn build(&self, matches: &[RetrievalMatch]) -> Result<BuiltContext> {
        if matches.is_empty() {
            return Ok(BuiltContext::empty());
        }

        let ids: Vec<Ulid> = matches.iter().map(|m| m.id).collect();
        let notes: HashMap<Ulid, Note> = self
            .store
            .get_notes(&ids)
            .await?
            .into_iter()
            .map(|n| (n.id, n))
            .collect();

        let mut found = Vec::with_capacity(matches.len());
        for m in matches {
            match notes.get(&m.id) {
                Some(note) => found.push(note.clone()),
                None => warn!("Retrieved vector {} has no note, skipping", m.id),
            }
        }

        let mut titles: HashMap<Ulid, String> = HashMap::new();
        for doc_id in found.iter().filter_map(|n| n.document_id) {
            if titles.contains_key(&doc_id) {
                continue;
            }
            if let Some(doc) = self.store.get_document(doc_id).await? {
                titles.insert(doc_id, doc.title);
            }
        }

        let built = format_context(&found, &titles, self.preview_chars);
        debug!(
            "Built context from {} notes ({} chars)",
            built.sources.len(),
            built.context_block.len()
        );
        Ok(built)
    }
}

/// Format ranked notes into a context block.
///
/// Notes of one document share a `Source document:` label; identical texts
/// collapse into one entry listing every id. Every note stays in `sources`.
pub fn format_context(
    notes: &[Note],
    titles: &HashMap<Ulid, String>,
    preview_chars: usize,
) -> BuiltContext {
    if notes.is_empty() {
        return BuiltContext::empty();
    }

    // (group key, entries of (text, ids)) in order of best rank
    let mut groups: Vec<(Option<Ulid>, Vec<(&str, Vec<Ulid>)>)> = Vec::new();
    for note in notes {
        let idx = match groups.iter().position(|(key, _)| *key == note.document_id) {
            Some(i) => i,
            None => {
                groups.push((note.document_id, Vec::new()));
                groups.len() - 1
            }
        };
        let group = &mut groups[idx].1;

        let text = note.text.trim();
        match group.iter_mut().find(|(t, _)| *t == text) {
            Some((_, ids)) => ids.push(note.id),
            None => group.push((text, vec![note.id])),
        }
    }

    let mut sections = Vec::with_capacity(groups.len());
    let mut n = 0;
    for (doc_id, entries) in &groups {
        let label = doc_id
            .and_then(|id| titles.get(&id).map(String::as_str))
            .unwrap_or(UNATTRIBUTED_LABEL);

        let mut section = format!("Source document: {}", label);
        for (text, ids) in entries {
            n += 1;
            let tags: Vec<String> = ids.iter().map(|id| format!("id={}", id)).collect();
            section.push_str(&format!("\n[{}] ({}) {}", n, tags.join(", "), text));
        }
        sections.push(section);
    }

    let sources = notes
        .iter()
        .map(|note| Source {
            id: note.id.to_string(),
            text: preview(&note.text, preview_chars),
        })
        .collect();

    BuiltContext {
        context_block: sections.join("\n\n"),
        sources,
    }
}

/// Truncate to `max_chars` characters, marking the cut with an ellipsis.
pub fn preview(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}...", cut.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rag_core::{Metadata, NewDocument};
    use rag_store::MemoryStore;

    #[test]
    fn test_empty_matches() {
        let built = format_context(&[], &HashMap::new(), 160);
        assert_eq!(built.context_block, NO_CONTEXT_BLOCK);
        assert!(built.sources.is_empty());
    }

    #[test]
    fn test_entries_are_numbered_and_tagged() {
        let doc = Ulid::new();
        let a = Note::new(Some(doc), 0, "Dogs are mammals.");
        let b = Note::new(Some(doc), 1, "Cats are mammals.");
        let titles = HashMap::from([(doc, "Animals".to_string())]);

        let built = format_context(&[a.clone(), b.clone()], &titles, 160);
        assert_eq!(
            built.context_block,
            format!(
                "Source document: Animals\n[1] (id={}) Dogs are mammals.\n[2] (id={}) Cats are mammals.",
                a.id, b.id
            )
        );
        assert_eq!(built.source_ids(), vec![a.id.to_string(), b.id.to_string()]);
    }

    #[test]
    fn test_identical_texts_merge_but_keep_ids() {
        let doc = Ulid::new();
        let a = Note::new(Some(doc), 0, "Same text.");
        let b = Note::new(Some(doc), 3, "Same text.");
        let built = format_context(&[a.clone(), b.clone()], &HashMap::new(), 160);

        assert!(built
            .context_block
            .contains(&format!("[1] (id={}, id={}) Same text.", a.id, b.id)));
        assert!(!built.context_block.contains("[2]"));
        assert_eq!(built.sources.len(), 2);
    }

    #[test]
    fn test_groups_follow_rank_order() {
        let (d1, d2) = (Ulid::new(), Ulid::new());
        let notes = vec![
            Note::new(Some(d1), 0, "one"),
            Note::new(Some(d2), 0, "two"),
            Note::new(Some(d1), 1, "three"),
        ];
        let titles = HashMap::from([(d1, "First".to_string()), (d2, "Second".to_string())]);
        let block = format_context(&notes, &titles, 160).context_block;

        let first = block.find("Source document: First").unwrap();
        let second = block.find("Source document: Second").unwrap();
        assert!(first < second);
        assert!(block.contains("[2] ("));
        assert!(block.find("three").unwrap() < second);
    }

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        assert_eq!(preview("short", 160), "short");
        let long = "ż".repeat(200);
        let p = preview(&long, 160);
        assert!(p.ends_with("..."));
        assert_eq!(p.chars().count(), 163);
    }

    #[tokio::test]
    async fn test_build_skips_missing_notes() {
        let store = Arc::new(MemoryStore::new());
        let doc = store
            .insert_document(NewDocument::new("Animals", "text/plain", Metadata::new()))
            .await
            .unwrap();
        let note = Note::new(Some(doc.id), 0, "Dogs are mammals.");
        store.insert_notes(&[note.clone()]).await.unwrap();

        let builder = ContextBuilder::new(store, 160);
        let matches = vec![
            RetrievalMatch {
                id: note.id,
                score: 0.9,
                metadata: None,
            },
            RetrievalMatch {
                id: Ulid::new(),
                score: 0.8,
                metadata: None,
            },
        ];
        let built = builder.build(&matches).await.unwrap();

        assert_eq!(built.sources.len(), 1);
        assert!(built.context_block.starts_with("Source document: Animals"));
    }
}
