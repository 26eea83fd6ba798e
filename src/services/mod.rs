//! Application services for the evidence-curation loop.

pub mod loop_controller;
pub mod oracle_adapter;
pub mod output_repair;
pub mod progress;
pub mod prompts;
pub mod qa_service;
pub mod retrieval_gateway;
pub mod trace_recorder;

pub use loop_controller::LoopController;
pub use oracle_adapter::ReasoningOracleAdapter;
pub use progress::{ProgressEvent, ProgressSink};
pub use prompts::{ExpectedSchema, PromptTemplate, PromptVariables};
pub use qa_service::QaService;
pub use retrieval_gateway::RetrievalGateway;
pub use trace_recorder::TraceRecorder;
