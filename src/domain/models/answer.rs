use serde::{Deserialize, Serialize};

use super::evidence::{EvidenceId, EvidenceItem};
use super::question::TraceId;

/// The answer produced by the finalize stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalAnswer {
    pub answer: String,
    pub reasoning: String,
    /// Subset of accumulated evidence ids referenced by the answer.
    pub supporting_evidence_ids: Vec<EvidenceId>,
}

/// Result of one loop run, handed back to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopOutcome {
    pub trace_id: TraceId,
    pub final_answer: FinalAnswer,
    /// Number of reformulate cycles executed.
    pub loops_used: u32,
    /// True when finalization was forced by the loop budget rather than the gate.
    pub budget_exhausted: bool,
    pub evidence: Vec<EvidenceItem>,
}
