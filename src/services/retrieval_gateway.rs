//! Retrieval gateway
//!
//! Single entry point for dense retrieval. The backend is trusted only for
//! similarity; ordering, truncation to `k` and the doc-id allow-list are
//! enforced here so every stage sees deterministic results.

use serde_json::Value;
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::domain::errors::RetrievalError;
use crate::domain::models::{
    CharSpan, Collection, DocCandidate, EvidenceId, EvidenceItem, EvidenceKind, RetrievalConfig,
};
use crate::domain::ports::{DenseRetrieval, DocFilter, RetrievedItem, SearchRequest};

/// Descending score, ties broken by ascending id.
fn by_score_then_id(a_score: f32, a_id: &str, b_score: f32, b_id: &str) -> Ordering {
    b_score.total_cmp(&a_score).then_with(|| a_id.cmp(b_id))
}

fn payload_str<'a>(payload: &'a Value, key: &str) -> Option<&'a str> {
    payload.get(key).and_then(Value::as_str)
}

fn payload_usize(payload: &Value, key: &str) -> Option<usize> {
    payload
        .get(key)
        .and_then(Value::as_u64)
        .and_then(|v| usize::try_from(v).ok())
}

/// Document a hit belongs to. A `docs` hit is its own document.
fn document_id_of(collection: Collection, item: &RetrievedItem) -> Option<&str> {
    match payload_str(&item.payload, "source_document_id") {
        Some(id) => Some(id),
        None if collection == Collection::Docs => Some(item.id.as_str()),
        None => None,
    }
}

pub struct RetrievalGateway {
    backend: Arc<dyn DenseRetrieval>,
    call_timeout: Duration,
}

impl RetrievalGateway {
    pub fn new(backend: Arc<dyn DenseRetrieval>, config: &RetrievalConfig) -> Self {
        Self {
            backend,
            call_timeout: Duration::from_secs(config.call_timeout_secs),
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    /// Top-`k` hits from `collection`, highest score first.
    ///
    /// An explicit empty allow-list matches nothing and never reaches the
    /// backend.
    pub async fn search(
        &self,
        collection: Collection,
        query: &str,
        k: usize,
        filter: &DocFilter,
    ) -> Result<Vec<RetrievedItem>, RetrievalError> {
        if k == 0 || filter.is_empty_allow_list() {
            debug!(%collection, k, "Skipping search with empty result set");
            return Ok(Vec::new());
        }

        let request = SearchRequest {
            collection,
            query: query.to_string(),
            k,
            filter: filter.clone(),
        };

        let mut items = tokio::time::timeout(self.call_timeout, self.backend.search(&request))
            .await
            .map_err(|_| {
                RetrievalError::Timeout(u64::try_from(self.call_timeout.as_millis()).unwrap_or(u64::MAX))
            })??;

        if let Some(bad) = items.iter().find(|item| !item.score.is_finite()) {
            return Err(RetrievalError::InvalidResponse(format!(
                "non-finite score {} for '{}' in {collection}",
                bad.score, bad.id
            )));
        }

        let returned = items.len();
        if !matches!(filter, DocFilter::Unfiltered) {
            items.retain(|item| {
                document_id_of(collection, item).is_some_and(|doc| filter.permits(doc))
            });
        }
        items.sort_by(|a, b| by_score_then_id(a.score, &a.id, b.score, &b.id));
        items.truncate(k);

        debug!(
            %collection,
            k,
            returned,
            kept = items.len(),
            backend = self.backend.name(),
            "Search completed"
        );
        Ok(items)
    }

    /// Whole-document candidates from the `docs` collection.
    pub async fn search_docs(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<DocCandidate>, RetrievalError> {
        let hits = self
            .search(Collection::Docs, query, k, &DocFilter::Unfiltered)
            .await?;
        Ok(hits
            .into_iter()
            .map(|hit| {
                let summary = ["summary_short", "summary", "text"]
                    .iter()
                    .find_map(|key| payload_str(&hit.payload, key))
                    .unwrap_or_default()
                    .to_string();
                DocCandidate {
                    document_id: hit.id,
                    summary_score: hit.score,
                    summary,
                }
            })
            .collect())
    }

    /// Chunk and table evidence for the allowed documents, merged into one
    /// list by descending score.
    pub async fn search_evidence(
        &self,
        query: &str,
        k_chunks: usize,
        k_tables: usize,
        filter: &DocFilter,
    ) -> Result<Vec<EvidenceItem>, RetrievalError> {
        let (chunks, tables) = tokio::try_join!(
            self.search(EvidenceKind::Chunk.collection(), query, k_chunks, filter),
            self.search(EvidenceKind::Table.collection(), query, k_tables, filter),
        )?;

        let mut merged: Vec<EvidenceItem> = chunks
            .into_iter()
            .map(|hit| to_evidence(EvidenceKind::Chunk, hit))
            .chain(tables.into_iter().map(|hit| to_evidence(EvidenceKind::Table, hit)))
            .collect();
        merged.sort_by(|a, b| by_score_then_id(a.score, a.id.as_str(), b.score, b.id.as_str()));
        Ok(merged)
    }
}

/// Convert a raw hit into evidence, keeping a backend-provided id.
fn to_evidence(kind: EvidenceKind, hit: RetrievedItem) -> EvidenceItem {
    let source_document_id = payload_str(&hit.payload, "source_document_id")
        .unwrap_or_default()
        .to_string();
    let text = payload_str(&hit.payload, "text").unwrap_or_default().to_string();
    let start = payload_usize(&hit.payload, "char_start").unwrap_or(0);
    let end = payload_usize(&hit.payload, "char_end").unwrap_or(start + text.chars().count());
    let span = CharSpan::new(start, end);

    if hit.id.trim().is_empty() {
        EvidenceItem::derived(kind, source_document_id, text, hit.score, span)
    } else {
        EvidenceItem {
            id: EvidenceId::new(hit.id),
            kind,
            source_document_id,
            text,
            score: hit.score,
            char_span: span,
        }
    }
}
