//! Reasoning Oracle Port
//!
//! The oracle is any capability that returns text for a prompt. Its output is
//! untrusted: callers go through `services::oracle_adapter`, which enforces
//! JSON-only output and retries.

use async_trait::async_trait;

use crate::domain::errors::OracleError;

/// A single completion request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleRequest {
    /// Stable id of the prompt template that produced this request.
    pub template: &'static str,

    /// System prompt (mandates JSON-only replies)
    pub system: String,

    /// Fully rendered user prompt
    pub prompt: String,

    /// Human-readable description of the expected JSON shape
    pub schema_hint: String,
}

#[async_trait]
pub trait ReasoningOracle: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Return the raw completion text for `request`.
    async fn complete(&self, request: &OracleRequest) -> Result<String, OracleError>;
}
