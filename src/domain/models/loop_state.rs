//! Per-question mutable state owned by one loop run.

use std::collections::HashSet;

use super::evidence::{EvidenceId, EvidenceItem};
use super::question::Question;

/// Ordered, id-deduplicated set of filter-approved evidence.
///
/// Insertion order is preserved across loop iterations. Merging appends
/// unseen ids and re-scores known ones in place, so re-merging the same
/// candidates leaves the set unchanged.
#[derive(Debug, Clone, Default)]
pub struct EvidenceAccumulator {
    items: Vec<EvidenceItem>,
    seen: HashSet<EvidenceId>,
}

impl EvidenceAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append every item whose id is not yet present. Returns the number appended.
    ///
    /// An id that is already present keeps its position and takes the score
    /// from the latest retrieval.
    pub fn merge<I>(&mut self, items: I) -> usize
    where
        I: IntoIterator<Item = EvidenceItem>,
    {
        let mut appended = 0;
        for item in items {
            if self.seen.insert(item.id.clone()) {
                self.items.push(item);
                appended += 1;
            } else if let Some(existing) = self.items.iter_mut().find(|e| e.id == item.id) {
                existing.score = item.score;
            }
        }
        appended
    }

    pub fn contains(&self, id: &EvidenceId) -> bool {
        self.seen.contains(id)
    }

    pub fn items(&self) -> &[EvidenceItem] {
        &self.items
    }

    pub fn ids(&self) -> Vec<EvidenceId> {
        self.items.iter().map(|item| item.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Source documents backing the accepted evidence, in first-seen order.
    pub fn provenance(&self) -> Vec<(String, Vec<EvidenceId>)> {
        let mut out: Vec<(String, Vec<EvidenceId>)> = Vec::new();
        for item in &self.items {
            match out.iter_mut().find(|(doc, _)| *doc == item.source_document_id) {
                Some((_, ids)) => ids.push(item.id.clone()),
                None => out.push((item.source_document_id.clone(), vec![item.id.clone()])),
            }
        }
        out
    }

    /// Accumulated ids mentioned anywhere in `texts`, in accumulation order.
    ///
    /// An id only counts when it stands as a whole token, so `chunk-1` is not
    /// mentioned by `chunk-12`. Never yields an id that is not part of the
    /// accumulated evidence.
    pub fn mentioned_in(&self, texts: &[&str]) -> Vec<EvidenceId> {
        self.items
            .iter()
            .filter(|item| texts.iter().any(|t| mentions(t, item.id.as_str())))
            .map(|item| item.id.clone())
            .collect()
    }

    pub fn into_items(self) -> Vec<EvidenceItem> {
        self.items
    }
}

fn is_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

/// True when `id` occurs in `text` delimited by non-id characters.
fn mentions(text: &str, id: &str) -> bool {
    if id.is_empty() {
        return false;
    }
    text.match_indices(id).any(|(start, _)| {
        let before = text[..start].chars().next_back();
        let after = text[start + id.len()..].chars().next();
        !before.is_some_and(is_id_char) && !after.is_some_and(is_id_char)
    })
}

/// Mutable loop state for one question.
///
/// Invariant: `0 <= loop_index < max_loops`.
#[derive(Debug, Clone)]
pub struct LoopState {
    pub current_query: String,
    loop_index: u32,
    max_loops: u32,
    pub evidence: EvidenceAccumulator,
}

impl LoopState {
    pub fn new(question: &Question, max_loops: u32) -> Self {
        Self {
            current_query: question.text().to_string(),
            loop_index: 0,
            max_loops: max_loops.max(1),
            evidence: EvidenceAccumulator::new(),
        }
    }

    pub fn loop_index(&self) -> u32 {
        self.loop_index
    }

    pub fn max_loops(&self) -> u32 {
        self.max_loops
    }

    /// True when the current iteration is the last one the budget allows.
    pub fn is_last_loop(&self) -> bool {
        self.loop_index + 1 >= self.max_loops
    }

    /// Move to the next iteration with a refined query.
    ///
    /// Returns `false` when the budget is already exhausted; the index never
    /// reaches `max_loops`.
    pub fn advance(&mut self, next_query: String) -> bool {
        if self.is_last_loop() {
            return false;
        }
        self.loop_index += 1;
        self.current_query = next_query;
        true
    }
}
