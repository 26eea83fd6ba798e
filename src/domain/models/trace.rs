//! Stage records: the durable audit trail of one question.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::question::TraceId;

/// Stages of the evidence-curation state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Reformulate,
    RetrieveDocs,
    SelectDocs,
    RetrieveEvidence,
    FilterAndGate,
    Finalize,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Reformulate,
        Stage::RetrieveDocs,
        Stage::SelectDocs,
        Stage::RetrieveEvidence,
        Stage::FilterAndGate,
        Stage::Finalize,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Reformulate => "reformulate",
            Stage::RetrieveDocs => "retrieve_docs",
            Stage::SelectDocs => "select_docs",
            Stage::RetrieveEvidence => "retrieve_evidence",
            Stage::FilterAndGate => "filter_and_gate",
            Stage::Finalize => "finalize",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| format!("unknown stage: {s}"))
    }
}

/// One stage transition. Never mutated after append.
///
/// A record with `error` set marks the transition into the failed state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: Stage,
    pub loop_index: u32,
    pub input_snapshot: serde_json::Value,
    pub output_snapshot: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StageRecord {
    pub fn completed(
        stage: Stage,
        loop_index: u32,
        input_snapshot: serde_json::Value,
        output_snapshot: serde_json::Value,
    ) -> Self {
        Self {
            stage,
            loop_index,
            input_snapshot,
            output_snapshot,
            timestamp: Utc::now(),
            error: None,
        }
    }

    pub fn failed(
        stage: Stage,
        loop_index: u32,
        input_snapshot: serde_json::Value,
        error: impl Into<String>,
    ) -> Self {
        Self {
            stage,
            loop_index,
            input_snapshot,
            output_snapshot: serde_json::Value::Null,
            timestamp: Utc::now(),
            error: Some(error.into()),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }

    /// Idempotency key within a trace.
    pub fn identity(&self) -> (u32, Stage) {
        (self.loop_index, self.stage)
    }
}

/// Listing entry for stored traces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceSummary {
    pub trace_id: TraceId,
    /// Question text from the first record's input snapshot, when present.
    pub question: Option<String>,
    pub started_at: DateTime<Utc>,
    pub last_stage: Stage,
    pub record_count: usize,
    pub failed: bool,
}
