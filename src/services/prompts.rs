//! Prompt templates for the four oracle-backed stages.

use serde_json::Value;

/// A named prompt with a stable id and a known output contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptTemplate {
    Reformulate,
    SelectDocs,
    FilterEvidence,
    FinalAnswer,
}

/// Keys the oracle output must carry, plus a shape hint shown to the oracle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedSchema {
    pub required: &'static [&'static str],
    pub hint: &'static str,
}

impl PromptTemplate {
    pub fn id(&self) -> &'static str {
        match self {
            Self::Reformulate => "reformulate",
            Self::SelectDocs => "select_docs",
            Self::FilterEvidence => "filter_evidence",
            Self::FinalAnswer => "final_answer",
        }
    }

    pub fn instructions(&self) -> &'static str {
        match self {
            Self::Reformulate => {
                "You reformulate finance user queries into a precise, self-contained search query.\n\
                 Return JSON: {\"reformulated\": \"string\"}\n\
                 If the query is already precise, repeat it."
            }
            Self::SelectDocs => {
                "You are given candidate document summaries with relevance scores (higher means more relevant).\n\
                 Select the minimal subset that likely contains the answer; prefer higher scores when in doubt.\n\
                 Return JSON: {\"chosen_doc_ids\": [\"doc-...\"], \"reason\": \"string\"}. \
                 If absolutely none relate, return an empty list and explain briefly."
            }
            Self::FilterEvidence => {
                "Given a user question, evidence already accepted, and new candidate evidence (text with ids), \
                 select the candidate ids that are relevant. Also decide if the question is answerable now \
                 from the accepted plus selected evidence.\n\
                 Return JSON: {\"relevant_chunk_ids\": [\"chunk-...\"], \"answerable\": true/false, \
                 \"missing_info_query\": \"string\", \"reason\": \"string\"}\n\
                 If not answerable, craft missing_info_query to retrieve the missing information."
            }
            Self::FinalAnswer => {
                "You are a finance QA assistant. Use only the provided evidence to answer. \
                 You may perform calculations. Cite the evidence ids you rely on in your reasoning.\n\
                 Return JSON: {\"answer\": \"string\", \"reasoning\": \"string\"}.\n\
                 If numeric, include the numeric form in the answer."
            }
        }
    }

    pub fn schema(&self) -> ExpectedSchema {
        match self {
            Self::Reformulate => ExpectedSchema {
                required: &["reformulated"],
                hint: r#"{"reformulated":"string"}"#,
            },
            Self::SelectDocs => ExpectedSchema {
                required: &["chosen_doc_ids"],
                hint: r#"{"chosen_doc_ids":[],"reason":"string"}"#,
            },
            Self::FilterEvidence => ExpectedSchema {
                required: &["relevant_chunk_ids", "answerable"],
                hint: r#"{"relevant_chunk_ids":[],"answerable":false,"missing_info_query":"string","reason":"string"}"#,
            },
            Self::FinalAnswer => ExpectedSchema {
                required: &["answer", "reasoning"],
                hint: r#"{"answer":"string","reasoning":"string"}"#,
            },
        }
    }

    /// Render instructions followed by the labelled variables.
    pub fn render(&self, variables: &PromptVariables) -> String {
        let mut prompt = self.instructions().to_string();
        for (label, value) in &variables.entries {
            prompt.push('\n');
            prompt.push_str(label);
            prompt.push_str(": ");
            prompt.push_str(value);
        }
        prompt
    }
}

/// Ordered, labelled prompt inputs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptVariables {
    entries: Vec<(&'static str, String)>,
}

impl PromptVariables {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn text(mut self, label: &'static str, value: impl Into<String>) -> Self {
        self.entries.push((label, value.into()));
        self
    }

    /// Append a value rendered as compact JSON.
    #[must_use]
    pub fn json(mut self, label: &'static str, value: &Value) -> Self {
        self.entries.push((label, value.to_string()));
        self
    }

    pub fn get(&self, label: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(l, _)| *l == label)
            .map(|(_, v)| v.as_str())
    }
}
