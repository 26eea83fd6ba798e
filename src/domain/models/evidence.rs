//! Evidence value objects.
//!
//! Everything here is immutable once retrieved. Evidence identity is a pure
//! function of the source unit so re-ingesting the same report never forks ids.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Named collections exposed by the dense retrieval service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    /// Whole-document summaries.
    Docs,
    /// Prose passages.
    Chunks,
    /// Extracted tables.
    Tables,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Docs => "docs",
            Collection::Chunks => "chunks",
            Collection::Tables => "tables",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceKind {
    Chunk,
    Table,
}

impl EvidenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvidenceKind::Chunk => "chunk",
            EvidenceKind::Table => "table",
        }
    }

    /// Collection this kind of evidence is retrieved from.
    pub fn collection(&self) -> Collection {
        match self {
            EvidenceKind::Chunk => Collection::Chunks,
            EvidenceKind::Table => Collection::Tables,
        }
    }
}

impl fmt::Display for EvidenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Character offsets into the source document, end exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct CharSpan {
    pub start: usize,
    pub end: usize,
}

impl CharSpan {
    /// Build a span, normalizing reversed offsets.
    pub fn new(start: usize, end: usize) -> Self {
        if start <= end {
            Self { start, end }
        } else {
            Self {
                start: end,
                end: start,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Stable evidence identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EvidenceId(String);

impl EvidenceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derive an id from the stable content and position of a source unit.
    ///
    /// Fields are length-prefixed before hashing so adjacent fields cannot
    /// collide by shifting bytes between them.
    pub fn derive(
        source_document_id: &str,
        kind: EvidenceKind,
        span: CharSpan,
        text: &str,
    ) -> Self {
        let start = span.start.to_string();
        let end = span.end.to_string();
        let mut hasher = Sha256::new();
        for field in [
            source_document_id.as_bytes(),
            kind.as_str().as_bytes(),
            start.as_bytes(),
            end.as_bytes(),
            text.as_bytes(),
        ] {
            hasher.update((field.len() as u64).to_be_bytes());
            hasher.update(field);
        }
        let digest = hasher.finalize();
        Self(format!("{}-{}", kind.as_str(), hex::encode(&digest[..16])))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EvidenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EvidenceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A chunk- or table-level passage retrieved as candidate support.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub id: EvidenceId,
    pub kind: EvidenceKind,
    pub source_document_id: String,
    pub text: String,
    /// Similarity score from retrieval, higher is better.
    pub score: f32,
    pub char_span: CharSpan,
}

impl EvidenceItem {
    /// Build an item whose id is derived from its content and position.
    pub fn derived(
        kind: EvidenceKind,
        source_document_id: impl Into<String>,
        text: impl Into<String>,
        score: f32,
        char_span: CharSpan,
    ) -> Self {
        let source_document_id = source_document_id.into();
        let text = text.into();
        let id = EvidenceId::derive(&source_document_id, kind, char_span, &text);
        Self {
            id,
            kind,
            source_document_id,
            text,
            score,
            char_span,
        }
    }

    /// Compact JSON view used in prompts and trace snapshots.
    pub fn prompt_view(&self, max_chars: usize) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "kind": self.kind,
            "doc": self.source_document_id,
            "text": truncate_chars(&self.text, max_chars),
        })
    }
}

/// A whole-document candidate from the `docs` collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocCandidate {
    pub document_id: String,
    pub summary_score: f32,
    /// Short summary shown to the selection oracle.
    #[serde(default)]
    pub summary: String,
}

/// Truncate to at most `max_chars` characters, marking the cut with an ellipsis.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        None => text.to_string(),
        Some((cut, _)) => format!("{}…", &text[..cut]),
    }
}
