//! Error taxonomy for the evidence-curation loop.
//!
//! Each boundary owns its own enum. Only [`LoopError`] is surfaced to callers
//! of the loop; the rest are either recovered inside a stage (oracle output)
//! or logged and swallowed (trace writes).

use thiserror::Error;

use super::models::{Stage, TraceId};

/// Failures of the raw reasoning oracle transport.
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("Reasoning oracle unavailable: {0}")]
    Unavailable(String),

    #[error("Reasoning oracle returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Reasoning oracle returned an unusable response: {0}")]
    InvalidResponse(String),

    #[error("Reasoning oracle call timed out after {0}ms")]
    Timeout(u64),
}

/// Raised by the oracle adapter once its bounded attempts are exhausted.
///
/// Always recoverable: every stage has a deterministic safe default.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("Malformed output for template '{template}' after {attempts} attempt(s): {reason}")]
    MalformedOutput {
        template: &'static str,
        attempts: u32,
        reason: String,
    },
}

/// Failures of the dense retrieval backend. Fatal for the question.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("Retrieval backend unavailable: {0}")]
    Unavailable(String),

    #[error("Retrieval call timed out after {0}ms")]
    Timeout(u64),

    #[error("Retrieval backend returned an invalid response: {0}")]
    InvalidResponse(String),
}

/// Trace storage failures.
#[derive(Debug, Error)]
pub enum TraceError {
    #[error("Trace not found: {0}")]
    NotFound(TraceId),

    #[error("Trace storage error: {0}")]
    Storage(String),

    #[error("Trace serialization error: {0}")]
    Serialization(String),

    #[error("Trace write timed out after {0}ms")]
    Timeout(u64),
}

impl From<sqlx::Error> for TraceError {
    fn from(err: sqlx::Error) -> Self {
        TraceError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for TraceError {
    fn from(err: serde_json::Error) -> Self {
        TraceError::Serialization(err.to_string())
    }
}

/// User-visible failure of one question.
///
/// Variants raised after the loop started carry the trace id so the partial
/// trace can be inspected.
#[derive(Debug, Error)]
pub enum LoopError {
    #[error("Retrieval unavailable during {stage} (trace {trace_id}): {source}")]
    RetrievalUnavailable {
        trace_id: TraceId,
        stage: Stage,
        #[source]
        source: RetrievalError,
    },

    #[error("Question cancelled before {stage} (trace {trace_id})")]
    Cancelled { trace_id: TraceId, stage: Stage },

    #[error("Invalid question: {0}")]
    InvalidQuestion(String),

    #[error("Invalid loop configuration: {0}")]
    InvalidConfig(String),
}

impl LoopError {
    /// Trace id of the partial trace, when the loop got far enough to have one.
    pub fn trace_id(&self) -> Option<TraceId> {
        match self {
            LoopError::RetrievalUnavailable { trace_id, .. }
            | LoopError::Cancelled { trace_id, .. } => Some(*trace_id),
            LoopError::InvalidQuestion(_) | LoopError::InvalidConfig(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_id_exposed_for_in_flight_failures() {
        let trace_id = TraceId::new();
        let err = LoopError::RetrievalUnavailable {
            trace_id,
            stage: Stage::RetrieveDocs,
            source: RetrievalError::Unavailable("connection refused".to_string()),
        };
        assert_eq!(err.trace_id(), Some(trace_id));
        assert!(err.to_string().contains(&trace_id.to_string()));
        assert!(err.to_string().contains("retrieve_docs"));

        let err = LoopError::InvalidQuestion("blank".to_string());
        assert_eq!(err.trace_id(), None);
    }

    #[test]
    fn test_trace_error_from_serde() {
        let err: TraceError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, TraceError::Serialization(_)));
    }
}
