//! Finloop - iterative hierarchical evidence curation
//!
//! Finloop answers questions over a corpus of annual reports by repeatedly
//! reformulating the query, narrowing the document set, retrieving chunk and
//! table evidence restricted to the chosen documents, and asking a reasoning
//! oracle whether the accumulated evidence suffices. Every stage transition
//! is recorded in a per-question trace.
//!
//! # Architecture
//!
//! This crate follows Clean Architecture / Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): Models, errors and the ports to the oracle,
//!   retrieval backend and trace store
//! - **Adapter Layer** (`adapters`): HTTP oracle and retrieval clients, `SQLite`
//!   and in-memory trace stores, scripted test doubles
//! - **Service Layer** (`services`): The loop controller and the gateways it
//!   drives
//! - **Infrastructure Layer** (`infrastructure`): Configuration and logging
//! - **CLI Layer** (`cli`): Command-line interface
//!
//! # Example
//!
//! ```ignore
//! use finloop::{ConfigLoader, QaService};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ConfigLoader::load()?;
//!     let service = QaService::from_config(&config).await?;
//!     let outcome = service.run_loop("What was ACME's 2022 revenue?", None).await?;
//!     println!("{}", outcome.final_answer.answer);
//!     Ok(())
//! }
//! ```

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use domain::errors::{LoopError, TraceError};
pub use domain::models::{
    Config, EvidenceItem, FinalAnswer, LoopConfig, LoopOutcome, Question, Stage, StageRecord,
    TraceId, TraceSummary,
};
pub use domain::ports::{DenseRetrieval, ReasoningOracle, TraceStore};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::QaService;
