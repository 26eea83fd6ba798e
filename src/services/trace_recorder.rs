//! Best-effort trace recording.
//!
//! The trace is an audit artifact, not the answer path: append failures and
//! timeouts are logged and swallowed.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::domain::errors::TraceError;
use crate::domain::models::{StageRecord, TraceConfig, TraceId, TraceSummary};
use crate::domain::ports::TraceStore;

pub struct TraceRecorder {
    store: Arc<dyn TraceStore>,
    append_timeout: Duration,
}

impl TraceRecorder {
    pub fn new(store: Arc<dyn TraceStore>, config: &TraceConfig) -> Self {
        Self {
            store,
            append_timeout: Duration::from_millis(config.append_timeout_ms),
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, append_timeout: Duration) -> Self {
        self.append_timeout = append_timeout;
        self
    }

    /// Append `record`, never failing the caller.
    pub async fn record(&self, trace_id: TraceId, record: &StageRecord) {
        let result = tokio::time::timeout(self.append_timeout, self.store.append(trace_id, record))
            .await
            .unwrap_or_else(|_| {
                Err(TraceError::Timeout(
                    u64::try_from(self.append_timeout.as_millis()).unwrap_or(u64::MAX),
                ))
            });

        match result {
            Ok(()) => debug!(
                %trace_id,
                stage = %record.stage,
                loop_index = record.loop_index,
                failed = record.is_failure(),
                "Stage recorded"
            ),
            Err(e) => warn!(
                %trace_id,
                stage = %record.stage,
                loop_index = record.loop_index,
                error = %e,
                "Failed to write stage record"
            ),
        }
    }

    pub async fn read(&self, trace_id: TraceId) -> Result<Vec<StageRecord>, TraceError> {
        self.store.read(trace_id).await
    }

    pub async fn list(&self, limit: usize) -> Result<Vec<TraceSummary>, TraceError> {
        self.store.list(limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryTraceStore;
    use crate::domain::models::Stage;
    use async_trait::async_trait;
    use serde_json::json;

    struct StalledStore;

    #[async_trait]
    impl TraceStore for StalledStore {
        async fn append(&self, _: TraceId, _: &StageRecord) -> Result<(), TraceError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        }

        async fn read(&self, trace_id: TraceId) -> Result<Vec<StageRecord>, TraceError> {
            Err(TraceError::NotFound(trace_id))
        }

        async fn list(&self, _: usize) -> Result<Vec<TraceSummary>, TraceError> {
            Ok(Vec::new())
        }
    }

    fn record() -> StageRecord {
        StageRecord::completed(Stage::Reformulate, 0, json!({"question": "q"}), json!({}))
    }

    #[tokio::test]
    async fn test_write_failure_is_swallowed() {
        let store = Arc::new(InMemoryTraceStore::new());
        store.fail_writes("disk full").await;
        let recorder = TraceRecorder::new(store, &TraceConfig::default());

        let trace_id = TraceId::new();
        recorder.record(trace_id, &record()).await;
        assert!(matches!(
            recorder.read(trace_id).await,
            Err(TraceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_stalled_store_times_out() {
        let recorder = TraceRecorder::new(Arc::new(StalledStore), &TraceConfig::default())
            .with_timeout(Duration::from_millis(20));

        let started = std::time::Instant::now();
        recorder.record(TraceId::new(), &record()).await;
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
