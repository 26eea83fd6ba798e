use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::errors::LoopError;

/// Identifier of one question's trace. Unique per invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TraceId(pub Uuid);

impl TraceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for TraceId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// An immutable user question bound to its trace id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    text: String,
    trace_id: TraceId,
}

impl Question {
    /// Create a question with a freshly generated trace id.
    pub fn new(text: impl Into<String>) -> Result<Self, LoopError> {
        Self::with_trace_id(text, TraceId::new())
    }

    /// Create a question bound to a caller-chosen trace id.
    pub fn with_trace_id(text: impl Into<String>, trace_id: TraceId) -> Result<Self, LoopError> {
        let text = text.into().trim().to_string();
        if text.is_empty() {
            return Err(LoopError::InvalidQuestion(
                "question text cannot be empty".to_string(),
            ));
        }
        Ok(Self { text, trace_id })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }
}
