//! Scripted collaborators for testing.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::domain::errors::{OracleError, RetrievalError};
use crate::domain::models::Collection;
use crate::domain::ports::{
    DenseRetrieval, OracleRequest, ReasoningOracle, RetrievedItem, SearchRequest,
};

/// One scripted oracle reply.
#[derive(Debug, Clone)]
pub struct ScriptedReply {
    /// Raw text returned to the adapter
    pub output: String,
    /// Whether to simulate a transport failure
    pub fail: bool,
    /// Error message if failing
    pub error_message: Option<String>,
    /// Delay before replying
    pub delay: Option<Duration>,
}

impl Default for ScriptedReply {
    fn default() -> Self {
        Self {
            output: "{}".to_string(),
            fail: false,
            error_message: None,
            delay: None,
        }
    }
}

impl ScriptedReply {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            ..Default::default()
        }
    }

    /// Reply with `value` serialized as JSON.
    pub fn json(value: &serde_json::Value) -> Self {
        Self::success(value.to_string())
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            fail: true,
            error_message: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn delayed(delay: Duration, output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            delay: Some(delay),
            ..Default::default()
        }
    }
}

/// Oracle whose replies are scripted per template id.
///
/// Queued replies are consumed first; once a template's queue is empty its
/// default reply (if any) repeats. Unscripted templates fail as unavailable.
#[derive(Default)]
pub struct ScriptedOracle {
    queues: Arc<RwLock<HashMap<String, VecDeque<ScriptedReply>>>>,
    defaults: Arc<RwLock<HashMap<String, ScriptedReply>>>,
    requests: Arc<RwLock<Vec<OracleRequest>>>,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a one-shot reply for `template`.
    pub async fn push_reply(&self, template: &str, reply: ScriptedReply) {
        let mut queues = self.queues.write().await;
        queues.entry(template.to_string()).or_default().push_back(reply);
    }

    /// Set the reply repeated for `template` once its queue is empty.
    pub async fn set_default(&self, template: &str, reply: ScriptedReply) {
        let mut defaults = self.defaults.write().await;
        defaults.insert(template.to_string(), reply);
    }

    /// Every request received, in call order.
    pub async fn requests(&self) -> Vec<OracleRequest> {
        self.requests.read().await.clone()
    }

    pub async fn requests_for(&self, template: &str) -> Vec<OracleRequest> {
        self.requests
            .read()
            .await
            .iter()
            .filter(|r| r.template == template)
            .cloned()
            .collect()
    }

    async fn next_reply(&self, template: &str) -> Option<ScriptedReply> {
        let queued = {
            let mut queues = self.queues.write().await;
            queues.get_mut(template).and_then(VecDeque::pop_front)
        };
        match queued {
            Some(reply) => Some(reply),
            None => self.defaults.read().await.get(template).cloned(),
        }
    }
}

#[async_trait]
impl ReasoningOracle for ScriptedOracle {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn complete(&self, request: &OracleRequest) -> Result<String, OracleError> {
        self.requests.write().await.push(request.clone());

        let Some(reply) = self.next_reply(request.template).await else {
            return Err(OracleError::Unavailable(format!(
                "no scripted reply for template '{}'",
                request.template
            )));
        };

        if let Some(delay) = reply.delay {
            tokio::time::sleep(delay).await;
        }
        if reply.fail {
            return Err(OracleError::Unavailable(
                reply
                    .error_message
                    .unwrap_or_else(|| "scripted failure".to_string()),
            ));
        }
        Ok(reply.output)
    }
}

/// Build a `docs` hit.
pub fn doc_hit(document_id: &str, score: f32, summary: &str) -> RetrievedItem {
    RetrievedItem {
        id: document_id.to_string(),
        score,
        payload: serde_json::json!({ "summary_short": summary }),
    }
}

/// Build a `chunks` or `tables` hit with explicit offsets.
pub fn evidence_hit(
    id: &str,
    source_document_id: &str,
    text: &str,
    score: f32,
    span: (usize, usize),
) -> RetrievedItem {
    RetrievedItem {
        id: id.to_string(),
        score,
        payload: serde_json::json!({
            "source_document_id": source_document_id,
            "text": text,
            "char_start": span.0,
            "char_end": span.1,
        }),
    }
}

/// Retrieval backend serving fixed hits per collection.
///
/// Ignores `k` and the doc filter so callers' own enforcement is exercised.
#[derive(Default)]
pub struct StaticRetrieval {
    items: Arc<RwLock<HashMap<Collection, Vec<RetrievedItem>>>>,
    query_overrides: Arc<RwLock<HashMap<(Collection, String), Vec<RetrievedItem>>>>,
    failing: Arc<RwLock<HashSet<Collection>>>,
    delay: Arc<RwLock<Option<Duration>>>,
    requests: Arc<RwLock<Vec<SearchRequest>>>,
}

impl StaticRetrieval {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_items(&self, collection: Collection, items: Vec<RetrievedItem>) {
        self.items.write().await.insert(collection, items);
    }

    /// Serve `items` only when the query text matches exactly.
    pub async fn set_items_for_query(
        &self,
        collection: Collection,
        query: &str,
        items: Vec<RetrievedItem>,
    ) {
        self.query_overrides
            .write()
            .await
            .insert((collection, query.to_string()), items);
    }

    /// Make every search against `collection` fail as unavailable.
    pub async fn fail_collection(&self, collection: Collection) {
        self.failing.write().await.insert(collection);
    }

    pub async fn set_delay(&self, delay: Duration) {
        *self.delay.write().await = Some(delay);
    }

    pub async fn requests(&self) -> Vec<SearchRequest> {
        self.requests.read().await.clone()
    }
}

#[async_trait]
impl DenseRetrieval for StaticRetrieval {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn search(&self, request: &SearchRequest) -> Result<Vec<RetrievedItem>, RetrievalError> {
        self.requests.write().await.push(request.clone());

        let delay = *self.delay.read().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing.read().await.contains(&request.collection) {
            return Err(RetrievalError::Unavailable(format!(
                "collection '{}' is unavailable",
                request.collection
            )));
        }

        let key = (request.collection, request.query.clone());
        if let Some(items) = self.query_overrides.read().await.get(&key) {
            return Ok(items.clone());
        }
        Ok(self
            .items
            .read()
            .await
            .get(&request.collection)
            .cloned()
            .unwrap_or_default())
    }
}
