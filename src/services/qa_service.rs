//! Question answering service
//!
//! The host-facing entry point: wires the oracle adapter, retrieval gateway
//! and trace recorder into a [`LoopController`] and exposes `run_loop`,
//! `get_trace` and `list_traces`.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::adapters::oracle::OpenAiChatOracle;
use crate::adapters::retrieval::HttpRetrievalService;
use crate::adapters::sqlite::{initialize_database, SqliteTraceStore};
use crate::domain::errors::{LoopError, TraceError};
use crate::domain::models::{
    Config, LoopConfig, LoopOutcome, Question, StageRecord, TraceId, TraceSummary,
};
use crate::domain::ports::{DenseRetrieval, ReasoningOracle, TraceStore};
use crate::services::loop_controller::LoopController;
use crate::services::oracle_adapter::ReasoningOracleAdapter;
use crate::services::progress::ProgressSink;
use crate::services::retrieval_gateway::RetrievalGateway;
use crate::services::trace_recorder::TraceRecorder;

pub struct QaService {
    controller: LoopController,
    recorder: Arc<TraceRecorder>,
    loop_config: LoopConfig,
}

impl QaService {
    /// Build the service from already-constructed collaborators.
    pub fn new(
        oracle: Arc<dyn ReasoningOracle>,
        retrieval: Arc<dyn DenseRetrieval>,
        store: Arc<dyn TraceStore>,
        config: &Config,
    ) -> Self {
        let adapter = Arc::new(ReasoningOracleAdapter::new(oracle, &config.oracle));
        let gateway = Arc::new(RetrievalGateway::new(retrieval, &config.retrieval));
        let recorder = Arc::new(TraceRecorder::new(store, &config.trace));
        Self {
            controller: LoopController::new(adapter, gateway, Arc::clone(&recorder)),
            recorder,
            loop_config: config.loop_config.clone(),
        }
    }

    /// Build the service with the HTTP collaborators and `SQLite` trace store
    /// described by `config`.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let oracle = OpenAiChatOracle::from_config(&config.oracle)
            .context("Failed to configure reasoning oracle")?;
        let retrieval = HttpRetrievalService::from_config(&config.retrieval)
            .context("Failed to configure retrieval service")?;

        let database_url = format!("sqlite:{}", config.trace.database_path);
        let pool = initialize_database(&database_url, config.trace.max_connections)
            .await
            .with_context(|| format!("Failed to open trace database at {database_url}"))?;

        Ok(Self::new(
            Arc::new(oracle),
            Arc::new(retrieval),
            Arc::new(SqliteTraceStore::new(pool)),
            config,
        ))
    }

    /// Default loop bounds used when a run does not override them.
    pub fn loop_config(&self) -> &LoopConfig {
        &self.loop_config
    }

    /// Answer a question. `config` overrides the service defaults.
    pub async fn run_loop(
        &self,
        question_text: &str,
        config: Option<&LoopConfig>,
    ) -> Result<LoopOutcome, LoopError> {
        self.run_loop_with(
            question_text,
            config,
            &CancellationToken::new(),
            &ProgressSink::disabled(),
        )
        .await
    }

    pub async fn run_loop_with(
        &self,
        question_text: &str,
        config: Option<&LoopConfig>,
        cancel: &CancellationToken,
        progress: &ProgressSink,
    ) -> Result<LoopOutcome, LoopError> {
        let question = Question::new(question_text)?;
        let config = config.unwrap_or(&self.loop_config);
        self.controller
            .run_with(question, config, cancel, progress)
            .await
    }

    pub async fn get_trace(&self, trace_id: TraceId) -> Result<Vec<StageRecord>, TraceError> {
        self.recorder.read(trace_id).await
    }

    pub async fn list_traces(&self, limit: usize) -> Result<Vec<TraceSummary>, TraceError> {
        self.recorder.list(limit).await
    }
}
