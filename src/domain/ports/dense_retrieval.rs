//! Dense Retrieval Port
//!
//! Opaque nearest-neighbor search over the `docs`, `chunks` and `tables`
//! collections. The backend is not trusted to order or filter correctly;
//! `services::retrieval_gateway` enforces both.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::domain::errors::RetrievalError;
use crate::domain::models::Collection;

/// Document-id restriction for a search.
///
/// `Unfiltered` and an explicit empty allow-list are different things: the
/// latter matches nothing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DocFilter {
    #[default]
    Unfiltered,
    AllowList(BTreeSet<String>),
}

impl DocFilter {
    pub fn allow_list<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::AllowList(ids.into_iter().map(Into::into).collect())
    }

    pub fn is_empty_allow_list(&self) -> bool {
        matches!(self, Self::AllowList(ids) if ids.is_empty())
    }

    /// Whether an item from `document_id` passes the filter.
    pub fn permits(&self, document_id: &str) -> bool {
        match self {
            Self::Unfiltered => true,
            Self::AllowList(ids) => ids.contains(document_id),
        }
    }

    /// Allowed ids in sorted order, `None` when unfiltered.
    pub fn doc_ids(&self) -> Option<Vec<String>> {
        match self {
            Self::Unfiltered => None,
            Self::AllowList(ids) => Some(ids.iter().cloned().collect()),
        }
    }
}

/// One top-k query against a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub collection: Collection,
    pub query: String,
    pub k: usize,
    pub filter: DocFilter,
}

/// Raw hit returned by a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedItem {
    /// Blank when the backend does not assign ids; one is then derived.
    #[serde(default)]
    pub id: String,
    pub score: f32,
    /// Collection-specific fields (`source_document_id`, `text`, `summary`, offsets)
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[async_trait]
pub trait DenseRetrieval: Send + Sync {
    fn name(&self) -> &'static str;

    async fn search(&self, request: &SearchRequest) -> Result<Vec<RetrievedItem>, RetrievalError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_distinguishes_unfiltered_from_empty() {
        assert!(DocFilter::Unfiltered.permits("doc-1"));
        assert!(!DocFilter::Unfiltered.is_empty_allow_list());

        let empty = DocFilter::allow_list(Vec::<String>::new());
        assert!(empty.is_empty_allow_list());
        assert!(!empty.permits("doc-1"));
    }

    #[test]
    fn test_allow_list_ids_are_sorted() {
        let filter = DocFilter::allow_list(["doc-b", "doc-a", "doc-b"]);
        assert_eq!(
            filter.doc_ids(),
            Some(vec!["doc-a".to_string(), "doc-b".to_string()])
        );
        assert!(filter.permits("doc-a"));
        assert!(!filter.permits("doc-c"));
        assert_eq!(DocFilter::Unfiltered.doc_ids(), None);
    }
}
