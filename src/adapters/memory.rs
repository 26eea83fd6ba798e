//! In-memory trace store for tests and ephemeral runs.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::errors::TraceError;
use crate::domain::models::{StageRecord, TraceId, TraceSummary};
use crate::domain::ports::TraceStore;

#[derive(Debug, Default)]
struct TraceEntry {
    records: Vec<StageRecord>,
    /// Global append counter at the most recent append.
    last_touched: u64,
}

#[derive(Default)]
pub struct InMemoryTraceStore {
    traces: Arc<RwLock<HashMap<TraceId, TraceEntry>>>,
    appends: AtomicU64,
    fail_writes: RwLock<Option<String>>,
}

impl InMemoryTraceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent append fail with `message`.
    pub async fn fail_writes(&self, message: impl Into<String>) {
        *self.fail_writes.write().await = Some(message.into());
    }
}

#[async_trait]
impl TraceStore for InMemoryTraceStore {
    async fn append(&self, trace_id: TraceId, record: &StageRecord) -> Result<(), TraceError> {
        if let Some(message) = self.fail_writes.read().await.clone() {
            return Err(TraceError::Storage(message));
        }

        let touched = self.appends.fetch_add(1, Ordering::SeqCst) + 1;
        let mut traces = self.traces.write().await;
        let entry = traces.entry(trace_id).or_default();
        entry.last_touched = touched;
        match entry
            .records
            .iter_mut()
            .find(|existing| existing.identity() == record.identity())
        {
            Some(existing) => *existing = record.clone(),
            None => entry.records.push(record.clone()),
        }
        Ok(())
    }

    async fn read(&self, trace_id: TraceId) -> Result<Vec<StageRecord>, TraceError> {
        self.traces
            .read()
            .await
            .get(&trace_id)
            .map(|entry| entry.records.clone())
            .ok_or(TraceError::NotFound(trace_id))
    }

    async fn list(&self, limit: usize) -> Result<Vec<TraceSummary>, TraceError> {
        let traces = self.traces.read().await;
        let mut entries: Vec<_> = traces.iter().collect();
        entries.sort_by(|a, b| b.1.last_touched.cmp(&a.1.last_touched));

        Ok(entries
            .into_iter()
            .take(limit)
            .filter_map(|(trace_id, entry)| {
                let first = entry.records.first()?;
                let last = entry.records.last()?;
                Some(TraceSummary {
                    trace_id: *trace_id,
                    question: first
                        .input_snapshot
                        .get("question")
                        .and_then(serde_json::Value::as_str)
                        .map(str::to_string),
                    started_at: first.timestamp,
                    last_stage: last.stage,
                    record_count: entry.records.len(),
                    failed: entry.records.iter().any(StageRecord::is_failure),
                })
            })
            .collect())
    }
}
