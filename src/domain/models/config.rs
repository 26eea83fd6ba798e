use serde::{Deserialize, Serialize};

/// Main configuration structure for finloop
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Loop bounds and retrieval sizes
    #[serde(default, rename = "loop")]
    pub loop_config: LoopConfig,

    /// Reasoning oracle configuration
    #[serde(default)]
    pub oracle: OracleConfig,

    /// Dense retrieval service configuration
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Trace storage configuration
    #[serde(default)]
    pub trace: TraceConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Immutable per-run loop configuration.
///
/// Passed explicitly into every run so concurrent questions may use
/// different bounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoopConfig {
    /// Maximum reformulate cycles (>= 1)
    #[serde(default = "default_max_loops")]
    pub max_loops: u32,

    #[serde(default = "default_top_k_docs")]
    pub top_k_docs: usize,

    #[serde(default = "default_top_k_chunks")]
    pub top_k_chunks: usize,

    #[serde(default = "default_top_k_tables")]
    pub top_k_tables: usize,

    /// Chunk candidates shown to the filter stage per iteration
    #[serde(default = "default_max_filter_chunks")]
    pub max_filter_chunks: usize,

    /// Table candidates shown to the filter stage per iteration
    #[serde(default = "default_max_filter_tables")]
    pub max_filter_tables: usize,

    /// Per-candidate text budget in the filter prompt
    #[serde(default = "default_filter_text_chars")]
    pub filter_text_chars: usize,

    /// Per-evidence text budget in the final answer prompt
    #[serde(default = "default_final_text_chars")]
    pub final_text_chars: usize,

    /// Summary budget per document in the selection prompt
    #[serde(default = "default_doc_summary_max_chars")]
    pub doc_summary_max_chars: usize,
}

const fn default_max_loops() -> u32 {
    4
}

const fn default_top_k_docs() -> usize {
    6
}

const fn default_top_k_chunks() -> usize {
    12
}

const fn default_top_k_tables() -> usize {
    6
}

const fn default_max_filter_chunks() -> usize {
    8
}

const fn default_max_filter_tables() -> usize {
    4
}

const fn default_filter_text_chars() -> usize {
    500
}

const fn default_final_text_chars() -> usize {
    1200
}

const fn default_doc_summary_max_chars() -> usize {
    600
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_loops: default_max_loops(),
            top_k_docs: default_top_k_docs(),
            top_k_chunks: default_top_k_chunks(),
            top_k_tables: default_top_k_tables(),
            max_filter_chunks: default_max_filter_chunks(),
            max_filter_tables: default_max_filter_tables(),
            filter_text_chars: default_filter_text_chars(),
            final_text_chars: default_final_text_chars(),
            doc_summary_max_chars: default_doc_summary_max_chars(),
        }
    }
}

impl LoopConfig {
    /// Check the bounds the loop relies on.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_loops == 0 {
            return Err("max_loops must be at least 1".to_string());
        }
        if self.top_k_docs == 0 {
            return Err("top_k_docs must be at least 1".to_string());
        }
        if self.top_k_chunks == 0 && self.top_k_tables == 0 {
            return Err("at least one of top_k_chunks or top_k_tables must be positive".to_string());
        }
        if self.max_filter_chunks == 0 && self.max_filter_tables == 0 {
            return Err(
                "at least one of max_filter_chunks or max_filter_tables must be positive"
                    .to_string(),
            );
        }
        Ok(())
    }
}

/// Reasoning oracle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct OracleConfig {
    /// Base URL of an OpenAI-compatible chat completions API
    #[serde(default = "default_oracle_base_url")]
    pub base_url: String,

    /// Chat model name
    #[serde(default = "default_oracle_model")]
    pub model: String,

    /// API key. Falls back to `OPENAI_API_KEY`.
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Per-call timeout in seconds
    #[serde(default = "default_oracle_timeout_secs")]
    pub call_timeout_secs: u64,

    /// Attempts per invocation, including the corrective retry
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// System prompt enforcing JSON-only replies
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

fn default_oracle_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_oracle_model() -> String {
    "gpt-4o-mini".to_string()
}

const fn default_temperature() -> f32 {
    0.2
}

const fn default_oracle_timeout_secs() -> u64 {
    60
}

const fn default_max_attempts() -> u32 {
    2
}

fn default_system_prompt() -> String {
    "You are a careful financial analysis assistant working over annual reports. \
     You MUST ALWAYS respond with a single valid JSON object matching the requested schema. \
     Do not include any prose outside the JSON object."
        .to_string()
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            base_url: default_oracle_base_url(),
            model: default_oracle_model(),
            api_key: None,
            temperature: default_temperature(),
            call_timeout_secs: default_oracle_timeout_secs(),
            max_attempts: default_max_attempts(),
            system_prompt: default_system_prompt(),
        }
    }
}

/// Dense retrieval service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetrievalConfig {
    /// Base URL of the search service
    #[serde(default = "default_retrieval_base_url")]
    pub base_url: String,

    /// Per-call timeout in seconds
    #[serde(default = "default_retrieval_timeout_secs")]
    pub call_timeout_secs: u64,
}

fn default_retrieval_base_url() -> String {
    "http://localhost:8000".to_string()
}

const fn default_retrieval_timeout_secs() -> u64 {
    30
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            base_url: default_retrieval_base_url(),
            call_timeout_secs: default_retrieval_timeout_secs(),
        }
    }
}

/// Trace storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TraceConfig {
    /// Path to `SQLite` database file
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Maximum number of database connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Timeout for a single append in milliseconds
    #[serde(default = "default_append_timeout_ms")]
    pub append_timeout_ms: u64,
}

fn default_database_path() -> String {
    ".finloop/traces.db".to_string()
}

const fn default_max_connections() -> u32 {
    5
}

const fn default_append_timeout_ms() -> u64 {
    5000
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            max_connections: default_max_connections(),
            append_timeout_ms: default_append_timeout_ms(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files; stderr only when unset
    #[serde(default)]
    pub log_dir: Option<String>,

    /// Rotation for file output: daily, hourly, never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_rotation(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loop_config_defaults() {
        let config = LoopConfig::default();
        assert_eq!(config.max_loops, 4);
        assert_eq!(config.top_k_docs, 6);
        assert_eq!(config.top_k_chunks, 12);
        assert_eq!(config.top_k_tables, 6);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_loop_config_rejects_zero_loops() {
        let config = LoopConfig {
            max_loops: 0,
            ..Default::default()
        };
        assert!(config.validate().unwrap_err().contains("max_loops"));
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: Config = serde_yaml::from_str("loop:\n  max_loops: 2\n").unwrap();
        assert_eq!(config.loop_config.max_loops, 2);
        assert_eq!(config.loop_config.top_k_chunks, 12);
        assert_eq!(config.oracle.max_attempts, 2);
        assert_eq!(config.trace.database_path, ".finloop/traces.db");
    }
}
