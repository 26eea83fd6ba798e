pub mod answer;
pub mod config;
pub mod evidence;
pub mod loop_state;
pub mod question;
pub mod trace;

pub use answer::{FinalAnswer, LoopOutcome};
pub use config::{
    Config, LoggingConfig, LoopConfig, OracleConfig, RetrievalConfig, TraceConfig,
};
pub use evidence::{
    truncate_chars, CharSpan, Collection, DocCandidate, EvidenceId, EvidenceItem, EvidenceKind,
};
pub use loop_state::{EvidenceAccumulator, LoopState};
pub use question::{Question, TraceId};
pub use trace::{Stage, StageRecord, TraceSummary};
