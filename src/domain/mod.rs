//! Domain layer for the evidence-curation loop
//!
//! Core value types, per-question loop state, error taxonomy, and the port
//! traits that collaborators (reasoning oracle, dense retrieval, trace storage)
//! must implement.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{AdapterError, LoopError, OracleError, RetrievalError, TraceError};
