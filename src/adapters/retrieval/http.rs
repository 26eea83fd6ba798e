//! HTTP dense retrieval client.
//!
//! Wire format:
//! `POST {base_url}/search` with `{collection, query, k, doc_ids}` where
//! `doc_ids` is omitted when unfiltered, answered by
//! `{"results": [{"id", "score", "payload"}]}`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::errors::RetrievalError;
use crate::domain::models::RetrievalConfig;
use crate::domain::ports::{DenseRetrieval, RetrievedItem, SearchRequest};

pub struct HttpRetrievalService {
    client: reqwest::Client,
    base_url: String,
    timeout_ms: u64,
}

impl HttpRetrievalService {
    pub fn from_config(config: &RetrievalConfig) -> Result<Self, RetrievalError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.call_timeout_secs))
            .build()
            .map_err(|e| RetrievalError::Unavailable(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout_ms: config.call_timeout_secs.saturating_mul(1000),
        })
    }
}

#[derive(Debug, Serialize)]
struct SearchBody<'a> {
    collection: &'static str,
    query: &'a str,
    k: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    doc_ids: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    results: Vec<RetrievedItem>,
}

#[async_trait]
impl DenseRetrieval for HttpRetrievalService {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn search(&self, request: &SearchRequest) -> Result<Vec<RetrievedItem>, RetrievalError> {
        let url = format!("{}/search", self.base_url);
        let body = SearchBody {
            collection: request.collection.as_str(),
            query: &request.query,
            k: request.k,
            doc_ids: request.filter.doc_ids(),
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RetrievalError::Timeout(self.timeout_ms)
                } else {
                    RetrievalError::Unavailable(format!("Search request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read response body".to_string());
            return Err(RetrievalError::Unavailable(format!(
                "Search service returned {status}: {body}"
            )));
        }

        let parsed: SearchResponse = response.json().await.map_err(|e| {
            RetrievalError::InvalidResponse(format!("Failed to parse search response: {e}"))
        })?;
        Ok(parsed.results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Collection;
    use crate::domain::ports::DocFilter;
    use mockito::Matcher;
    use serde_json::json;

    fn service(base_url: String) -> HttpRetrievalService {
        HttpRetrievalService::from_config(&RetrievalConfig {
            base_url,
            call_timeout_secs: 5,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_search_posts_filter_and_parses_results() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/search")
            .match_body(Matcher::Json(json!({
                "collection": "chunks",
                "query": "revenue 2022",
                "k": 12,
                "doc_ids": ["doc-a", "doc-b"]
            })))
            .with_status(200)
            .with_body(
                json!({
                    "results": [
                        {"id": "chunk-1", "score": 0.83, "payload": {"source_document_id": "doc-a", "text": "Revenue was 10."}}
                    ]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let items = service(server.url())
            .search(&SearchRequest {
                collection: Collection::Chunks,
                query: "revenue 2022".to_string(),
                k: 12,
                filter: DocFilter::allow_list(["doc-b", "doc-a"]),
            })
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "chunk-1");
        assert_eq!(items[0].payload["source_document_id"], "doc-a");
    }

    #[tokio::test]
    async fn test_unfiltered_search_omits_doc_ids() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/search")
            .match_body(Matcher::Json(json!({"collection": "docs", "query": "q", "k": 6})))
            .with_status(200)
            .with_body(r#"{"results": []}"#)
            .create_async()
            .await;

        let items = service(server.url())
            .search(&SearchRequest {
                collection: Collection::Docs,
                query: "q".to_string(),
                k: 6,
                filter: DocFilter::Unfiltered,
            })
            .await
            .unwrap();
        mock.assert_async().await;
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn test_server_error_is_unavailable() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/search")
            .with_status(503)
            .with_body("index warming up")
            .create_async()
            .await;

        let err = service(server.url())
            .search(&SearchRequest {
                collection: Collection::Docs,
                query: "q".to_string(),
                k: 6,
                filter: DocFilter::Unfiltered,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RetrievalError::Unavailable(msg) if msg.contains("503")));
    }

    #[tokio::test]
    async fn test_connection_refused_is_unavailable() {
        let err = service("http://127.0.0.1:1".to_string())
            .search(&SearchRequest {
                collection: Collection::Docs,
                query: "q".to_string(),
                k: 6,
                filter: DocFilter::Unfiltered,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RetrievalError::Unavailable(_)));
    }
}
