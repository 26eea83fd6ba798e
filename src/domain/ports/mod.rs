//! Port trait definitions (Hexagonal Architecture)
//!
//! The loop depends only on these async traits:
//! - ReasoningOracle: text completion for a prompt
//! - DenseRetrieval: nearest-neighbor search over named collections
//! - TraceStore: durable stage records per question

pub mod dense_retrieval;
pub mod reasoning_oracle;
pub mod trace_store;

pub use dense_retrieval::{DenseRetrieval, DocFilter, RetrievedItem, SearchRequest};
pub use reasoning_oracle::{OracleRequest, ReasoningOracle};
pub use trace_store::TraceStore;
