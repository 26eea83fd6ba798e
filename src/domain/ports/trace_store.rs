use async_trait::async_trait;

use crate::domain::errors::TraceError;
use crate::domain::models::{StageRecord, TraceId, TraceSummary};

/// Durable, append-only storage of stage records keyed by trace id.
///
/// Records are identified by `(trace_id, loop_index, stage)`. Appending the
/// same identity twice replaces the earlier record in place.
#[async_trait]
pub trait TraceStore: Send + Sync {
    async fn append(&self, trace_id: TraceId, record: &StageRecord) -> Result<(), TraceError>;

    /// All records of a trace in first-append order.
    ///
    /// Returns `TraceError::NotFound` for an unknown trace.
    async fn read(&self, trace_id: TraceId) -> Result<Vec<StageRecord>, TraceError>;

    /// Most recently active traces first.
    async fn list(&self, limit: usize) -> Result<Vec<TraceSummary>, TraceError>;
}
