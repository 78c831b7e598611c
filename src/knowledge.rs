//! In-memory knowledge base assembled from summarized documents.
//!
//! Entries are appended by the ingestion collaborator and read by the
//! session manager, which snapshots the store once per session start.
//! Nothing here survives process exit.

/// One summarized document.
#[derive(Debug, Clone)]
pub struct KnowledgeEntry {
    /// Unique entry id.
    pub id: String,
    /// Original document name.
    pub name: String,
    /// Extracted/summarized text.
    pub content: String,
    /// Original document size in bytes.
    pub size: u64,
}

/// Append-only, insertion-ordered list of knowledge entries.
#[derive(Debug, Default)]
pub struct KnowledgeStore {
    entries: Vec<KnowledgeEntry>,
}

impl KnowledgeStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry. Entries are immutable once added; no dedup.
    pub fn push(&mut self, entry: KnowledgeEntry) {
        self.entries.push(entry);
    }

    /// Snapshot the current entries in insertion order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<KnowledgeEntry> {
        self.entries.clone()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Build the grounding context for a session: every entry's content,
    /// tagged with its name, concatenated in insertion order.
    ///
    /// `max_chars` caps the result length (character count, not bytes);
    /// `None` disables truncation. The cap is applied to the final string
    /// so the newest entries are the ones trimmed.
    #[must_use]
    pub fn grounding_context(&self, max_chars: Option<usize>) -> String {
        let mut context = String::new();
        for entry in &self.entries {
            if !context.is_empty() {
                context.push('\n');
            }
            context.push_str("[");
            context.push_str(&entry.name);
            context.push_str("]\n");
            context.push_str(&entry.content);
        }

        if let Some(cap) = max_chars
            && context.chars().count() > cap
        {
            context = context.chars().take(cap).collect();
        }
        context
    }
}
