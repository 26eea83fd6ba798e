//! Reasoning oracle adapter
//!
//! Turns the untrusted text returned by a [`ReasoningOracle`] into a
//! validated JSON object or a [`AdapterError::MalformedOutput`] signal.
//! Every attempt is bounded by a per-call timeout; transport errors and
//! timeouts consume the same attempt budget as unparsable output.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::domain::errors::AdapterError;
use crate::domain::models::{truncate_chars, OracleConfig};
use crate::domain::ports::{OracleRequest, ReasoningOracle};
use crate::services::output_repair::{missing_keys, parse_json_object};
use crate::services::prompts::{ExpectedSchema, PromptTemplate, PromptVariables};

const LOG_PREVIEW_CHARS: usize = 240;

/// Outcome of one failed attempt, fed into the corrective instruction.
enum AttemptFailure {
    /// Output parsed but lacks these keys.
    MissingKeys(Vec<&'static str>),
    /// Anything else: transport error, timeout, unparsable or mistyped output.
    Other(String),
}

impl AttemptFailure {
    fn describe(&self) -> String {
        match self {
            Self::MissingKeys(keys) => format!("missing required keys: {}", keys.join(", ")),
            Self::Other(reason) => reason.clone(),
        }
    }
}

/// Shared, stateless adapter around a reasoning oracle.
pub struct ReasoningOracleAdapter {
    oracle: Arc<dyn ReasoningOracle>,
    system_prompt: String,
    call_timeout: Duration,
    max_attempts: u32,
}

impl ReasoningOracleAdapter {
    pub fn new(oracle: Arc<dyn ReasoningOracle>, config: &OracleConfig) -> Self {
        Self {
            oracle,
            system_prompt: config.system_prompt.clone(),
            call_timeout: Duration::from_secs(config.call_timeout_secs),
            max_attempts: config.max_attempts.max(1),
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Invoke `template` and return the validated JSON object.
    pub async fn invoke(
        &self,
        template: PromptTemplate,
        variables: &PromptVariables,
        schema: &ExpectedSchema,
    ) -> Result<Value, AdapterError> {
        self.invoke_validated(template, variables, schema, |object| Ok(Value::Object(object)))
            .await
    }

    /// Invoke `template` and deserialize the validated object into `T`.
    ///
    /// A type mismatch (e.g. `answerable: "yes"`) counts as a failed attempt.
    pub async fn invoke_as<T: DeserializeOwned>(
        &self,
        template: PromptTemplate,
        variables: &PromptVariables,
    ) -> Result<T, AdapterError> {
        let schema = template.schema();
        self.invoke_validated(template, variables, &schema, |object| {
            serde_json::from_value::<T>(Value::Object(object))
                .map_err(|e| format!("output does not match expected shape: {e}"))
        })
        .await
    }

    async fn invoke_validated<T, F>(
        &self,
        template: PromptTemplate,
        variables: &PromptVariables,
        schema: &ExpectedSchema,
        validate: F,
    ) -> Result<T, AdapterError>
    where
        F: Fn(Map<String, Value>) -> Result<T, String>,
    {
        let base_prompt = template.render(variables);
        let mut last_failure: Option<AttemptFailure> = None;

        for attempt in 1..=self.max_attempts {
            let prompt = match &last_failure {
                None => base_prompt.clone(),
                Some(failure) => corrective_prompt(&base_prompt, schema, failure),
            };
            let request = OracleRequest {
                template: template.id(),
                system: self.system_prompt.clone(),
                prompt,
                schema_hint: schema.hint.to_string(),
            };

            debug!(
                template = template.id(),
                attempt,
                oracle = self.oracle.name(),
                prompt_preview = %truncate_chars(&request.prompt, LOG_PREVIEW_CHARS),
                "Invoking reasoning oracle"
            );

            let failure = match self.attempt(&request, schema).await {
                Ok(object) => match validate(object) {
                    Ok(value) => return Ok(value),
                    Err(reason) => AttemptFailure::Other(reason),
                },
                Err(failure) => failure,
            };

            warn!(
                template = template.id(),
                attempt,
                max_attempts = self.max_attempts,
                reason = %failure.describe(),
                "Oracle attempt failed"
            );
            last_failure = Some(failure);
        }

        Err(AdapterError::MalformedOutput {
            template: template.id(),
            attempts: self.max_attempts,
            reason: last_failure
                .map(|f| f.describe())
                .unwrap_or_else(|| "no attempts made".to_string()),
        })
    }

    async fn attempt(
        &self,
        request: &OracleRequest,
        schema: &ExpectedSchema,
    ) -> Result<Map<String, Value>, AttemptFailure> {
        let raw = match tokio::time::timeout(self.call_timeout, self.oracle.complete(request)).await
        {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => return Err(AttemptFailure::Other(e.to_string())),
            Err(_) => {
                return Err(AttemptFailure::Other(format!(
                    "oracle call timed out after {}ms",
                    self.call_timeout.as_millis()
                )))
            }
        };

        debug!(
            template = request.template,
            output_preview = %truncate_chars(&raw, LOG_PREVIEW_CHARS),
            "Oracle output"
        );

        let object = parse_json_object(&raw).map_err(AttemptFailure::Other)?;
        let missing = missing_keys(&object, schema.required);
        if missing.is_empty() {
            Ok(object)
        } else {
            Err(AttemptFailure::MissingKeys(missing))
        }
    }
}

fn corrective_prompt(base: &str, schema: &ExpectedSchema, failure: &AttemptFailure) -> String {
    let keys = match failure {
        AttemptFailure::MissingKeys(keys) => keys.join(", "),
        AttemptFailure::Other(_) => schema.required.join(", "),
    };
    format!(
        "{base}\n\nYour previous reply was not usable ({}). \
         Respond again with ONLY a JSON object shaped like {} and containing the keys: {keys}.",
        failure.describe(),
        schema.hint,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock::{ScriptedOracle, ScriptedReply};
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Reformulated {
        reformulated: String,
    }

    fn adapter(oracle: Arc<ScriptedOracle>) -> ReasoningOracleAdapter {
        ReasoningOracleAdapter::new(oracle, &OracleConfig::default())
            .with_timeout(Duration::from_millis(200))
    }

    fn vars() -> PromptVariables {
        PromptVariables::new().text("Query", "revenue")
    }

    #[tokio::test]
    async fn test_valid_output_first_attempt() {
        let oracle = Arc::new(ScriptedOracle::new());
        oracle
            .push_reply("reformulate", ScriptedReply::success(r#"{"reformulated": "total revenue FY2022"}"#))
            .await;

        let out: Reformulated = adapter(oracle.clone())
            .invoke_as(PromptTemplate::Reformulate, &vars())
            .await
            .unwrap();
        assert_eq!(out.reformulated, "total revenue FY2022");
        assert_eq!(oracle.requests().await.len(), 1);
    }

    #[tokio::test]
    async fn test_fenced_output_is_repaired_without_retry() {
        let oracle = Arc::new(ScriptedOracle::new());
        oracle
            .push_reply(
                "final_answer",
                ScriptedReply::success("```json\n{\"answer\": \"10\", \"reasoning\": \"r\", \"extra\": 1}\n```"),
            )
            .await;

        let value = adapter(oracle.clone())
            .invoke(
                PromptTemplate::FinalAnswer,
                &vars(),
                &PromptTemplate::FinalAnswer.schema(),
            )
            .await
            .unwrap();
        assert_eq!(value["answer"], "10");
        assert_eq!(oracle.requests().await.len(), 1);
    }

    #[tokio::test]
    async fn test_corrective_retry_names_missing_keys() {
        let oracle = Arc::new(ScriptedOracle::new());
        oracle
            .push_reply("final_answer", ScriptedReply::success(r#"{"answer": "10"}"#))
            .await;
        oracle
            .push_reply(
                "final_answer",
                ScriptedReply::success(r#"{"answer": "10", "reasoning": "from chunk-1"}"#),
            )
            .await;

        let value = adapter(oracle.clone())
            .invoke(
                PromptTemplate::FinalAnswer,
                &vars(),
                &PromptTemplate::FinalAnswer.schema(),
            )
            .await
            .unwrap();
        assert_eq!(value["reasoning"], "from chunk-1");

        let requests = oracle.requests().await;
        assert_eq!(requests.len(), 2);
        assert!(!requests[0].prompt.contains("previous reply"));
        assert!(requests[1].prompt.contains("missing required keys: reasoning"));
    }

    #[tokio::test]
    async fn test_malformed_after_bounded_attempts() {
        let oracle = Arc::new(ScriptedOracle::new());
        oracle
            .set_default("reformulate", ScriptedReply::success("not json at all"))
            .await;

        let err = adapter(oracle.clone())
            .invoke_as::<Reformulated>(PromptTemplate::Reformulate, &vars())
            .await
            .unwrap_err();
        let AdapterError::MalformedOutput {
            template, attempts, ..
        } = err;
        assert_eq!(template, "reformulate");
        assert_eq!(attempts, 2);
        assert_eq!(oracle.requests().await.len(), 2);
    }

    #[tokio::test]
    async fn test_transport_error_and_timeout_consume_attempts() {
        let oracle = Arc::new(ScriptedOracle::new());
        oracle
            .push_reply("reformulate", ScriptedReply::failure("connection reset"))
            .await;
        oracle
            .push_reply(
                "reformulate",
                ScriptedReply::delayed(Duration::from_secs(5), r#"{"reformulated": "late"}"#),
            )
            .await;

        let result = adapter(oracle.clone())
            .invoke_as::<Reformulated>(PromptTemplate::Reformulate, &vars())
            .await;
        assert!(result.is_err());
        assert_eq!(oracle.requests().await.len(), 2);
    }

    #[tokio::test]
    async fn test_type_mismatch_triggers_retry() {
        let oracle = Arc::new(ScriptedOracle::new());
        oracle
            .push_reply("reformulate", ScriptedReply::success(r#"{"reformulated": 42}"#))
            .await;
        oracle
            .push_reply("reformulate", ScriptedReply::success(r#"{"reformulated": "fixed"}"#))
            .await;

        let out: Reformulated = adapter(oracle)
            .invoke_as(PromptTemplate::Reformulate, &vars())
            .await
            .unwrap();
        assert_eq!(out.reformulated, "fixed");
    }
}
