//! Iterative hierarchical evidence-curation loop.
//!
//! One `run` drives one question through
//! `Reformulate -> RetrieveDocs -> SelectDocs -> RetrieveEvidence -> FilterAndGate`
//! and then either `Finalize` or back to `Reformulate` with a refined query.
//! Each transition writes exactly one [`StageRecord`] before the next begins.
//!
//! Malformed oracle output never escapes a stage: every oracle-backed stage
//! has a deterministic fallback. Retrieval failures are fatal for the
//! question and surface as [`LoopError::RetrievalUnavailable`].

use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::domain::errors::{LoopError, RetrievalError};
use crate::domain::models::{
    truncate_chars, DocCandidate, EvidenceItem, EvidenceKind, FinalAnswer, LoopConfig,
    LoopOutcome, LoopState, Question, Stage, StageRecord,
};
use crate::domain::ports::DocFilter;
use crate::services::oracle_adapter::ReasoningOracleAdapter;
use crate::services::progress::{ProgressEvent, ProgressSink};
use crate::services::prompts::{PromptTemplate, PromptVariables};
use crate::services::retrieval_gateway::RetrievalGateway;
use crate::services::trace_recorder::TraceRecorder;

pub const INSUFFICIENT_EVIDENCE_ANSWER: &str = "Insufficient evidence to answer the question.";

#[derive(Debug, Deserialize)]
struct ReformulateReply {
    reformulated: String,
}

#[derive(Debug, Deserialize)]
struct SelectDocsReply {
    chosen_doc_ids: Vec<String>,
    #[serde(default)]
    reason: String,
}

#[derive(Debug, Default, Deserialize)]
struct FilterReply {
    relevant_chunk_ids: Vec<String>,
    answerable: bool,
    #[serde(default)]
    missing_info_query: String,
    #[serde(default)]
    reason: String,
}

#[derive(Debug, Deserialize)]
struct FinalAnswerReply {
    answer: String,
    reasoning: String,
}

/// Where the state machine goes next.
enum Phase {
    Reformulate,
    RetrieveDocs {
        reformulated: String,
    },
    SelectDocs {
        reformulated: String,
        candidates: Vec<DocCandidate>,
    },
    RetrieveEvidence {
        reformulated: String,
        filter: DocFilter,
    },
    FilterAndGate {
        reformulated: String,
        pool: Vec<EvidenceItem>,
    },
    Finalize {
        budget_exhausted: bool,
    },
}

impl Phase {
    fn stage(&self) -> Stage {
        match self {
            Phase::Reformulate => Stage::Reformulate,
            Phase::RetrieveDocs { .. } => Stage::RetrieveDocs,
            Phase::SelectDocs { .. } => Stage::SelectDocs,
            Phase::RetrieveEvidence { .. } => Stage::RetrieveEvidence,
            Phase::FilterAndGate { .. } => Stage::FilterAndGate,
            Phase::Finalize { .. } => Stage::Finalize,
        }
    }
}

/// Per-run inputs threaded through every stage.
struct RunContext<'a> {
    question: &'a Question,
    config: &'a LoopConfig,
    cancel: &'a CancellationToken,
    progress: &'a ProgressSink,
}

pub struct LoopController {
    oracle: Arc<ReasoningOracleAdapter>,
    retrieval: Arc<RetrievalGateway>,
    recorder: Arc<TraceRecorder>,
}

impl LoopController {
    pub fn new(
        oracle: Arc<ReasoningOracleAdapter>,
        retrieval: Arc<RetrievalGateway>,
        recorder: Arc<TraceRecorder>,
    ) -> Self {
        Self {
            oracle,
            retrieval,
            recorder,
        }
    }

    /// Answer `question` within the bounds of `config`.
    pub async fn run(
        &self,
        question: Question,
        config: &LoopConfig,
    ) -> Result<LoopOutcome, LoopError> {
        self.run_with(
            question,
            config,
            &CancellationToken::new(),
            &ProgressSink::disabled(),
        )
        .await
    }

    /// Like [`run`](Self::run), with cooperative cancellation checked at
    /// the start of every stage and progress events for the host.
    pub async fn run_with(
        &self,
        question: Question,
        config: &LoopConfig,
        cancel: &CancellationToken,
        progress: &ProgressSink,
    ) -> Result<LoopOutcome, LoopError> {
        config.validate().map_err(LoopError::InvalidConfig)?;

        let trace_id = question.trace_id();
        let ctx = RunContext {
            question: &question,
            config,
            cancel,
            progress,
        };
        let span = info_span!("question", %trace_id, max_loops = config.max_loops);

        async {
            info!(question = %truncate_chars(question.text(), 120), "Starting evidence loop");
            let result = self.drive(&ctx).await;
            match &result {
                Ok(outcome) => {
                    info!(
                        loops_used = outcome.loops_used,
                        evidence = outcome.evidence.len(),
                        budget_exhausted = outcome.budget_exhausted,
                        "Evidence loop finished"
                    );
                    progress.emit(ProgressEvent::Finished {
                        trace_id,
                        loops_used: outcome.loops_used,
                        budget_exhausted: outcome.budget_exhausted,
                    });
                }
                Err(e) => warn!(error = %e, "Evidence loop failed"),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn drive(&self, ctx: &RunContext<'_>) -> Result<LoopOutcome, LoopError> {
        let mut state = LoopState::new(ctx.question, ctx.config.max_loops);
        let mut phase = Phase::Reformulate;

        loop {
            self.checkpoint(ctx, &state, phase.stage()).await?;

            phase = match phase {
                Phase::Reformulate => Phase::RetrieveDocs {
                    reformulated: self.reformulate(ctx, &state).await,
                },
                Phase::RetrieveDocs { reformulated } => {
                    let candidates = self.retrieve_docs(ctx, &state, &reformulated).await?;
                    Phase::SelectDocs {
                        reformulated,
                        candidates,
                    }
                }
                Phase::SelectDocs {
                    reformulated,
                    candidates,
                } => {
                    let filter = self
                        .select_docs(ctx, &state, &reformulated, &candidates)
                        .await;
                    Phase::RetrieveEvidence {
                        reformulated,
                        filter,
                    }
                }
                Phase::RetrieveEvidence {
                    reformulated,
                    filter,
                } => {
                    let pool = self
                        .retrieve_evidence(ctx, &state, &reformulated, &filter)
                        .await?;
                    Phase::FilterAndGate { reformulated, pool }
                }
                Phase::FilterAndGate { reformulated, pool } => {
                    self.filter_and_gate(ctx, &mut state, &reformulated, pool)
                        .await
                }
                Phase::Finalize { budget_exhausted } => {
                    let final_answer = self.finalize(ctx, &state, budget_exhausted).await;
                    return Ok(LoopOutcome {
                        trace_id: ctx.question.trace_id(),
                        final_answer,
                        loops_used: state.loop_index() + 1,
                        budget_exhausted,
                        evidence: state.evidence.into_items(),
                    });
                }
            };
        }
    }

    /// Stage-start hook: cancellation check and progress notification.
    async fn checkpoint(
        &self,
        ctx: &RunContext<'_>,
        state: &LoopState,
        stage: Stage,
    ) -> Result<(), LoopError> {
        let trace_id = ctx.question.trace_id();
        if ctx.cancel.is_cancelled() {
            info!(%stage, loop_index = state.loop_index(), "Question cancelled");
            let record = StageRecord::failed(
                stage,
                state.loop_index(),
                json!({ "question": ctx.question.text(), "current_query": state.current_query }),
                "cancelled",
            );
            self.recorder.record(trace_id, &record).await;
            ctx.progress.emit(ProgressEvent::Failed {
                trace_id,
                stage,
                error: "cancelled".to_string(),
            });
            return Err(LoopError::Cancelled { trace_id, stage });
        }

        debug!(%stage, loop_index = state.loop_index(), "Entering stage");
        ctx.progress.emit(ProgressEvent::StageStarted {
            trace_id,
            stage,
            loop_index: state.loop_index(),
            max_loops: state.max_loops(),
        });
        Ok(())
    }

    async fn record(&self, ctx: &RunContext<'_>, record: StageRecord) {
        self.recorder.record(ctx.question.trace_id(), &record).await;
    }

    /// Record a retrieval failure and convert it into the question's error.
    async fn fail_retrieval(
        &self,
        ctx: &RunContext<'_>,
        stage: Stage,
        loop_index: u32,
        input: Value,
        source: RetrievalError,
    ) -> LoopError {
        let trace_id = ctx.question.trace_id();
        warn!(%stage, loop_index, error = %source, "Retrieval unavailable");
        self.record(ctx, StageRecord::failed(stage, loop_index, input, source.to_string()))
            .await;
        ctx.progress.emit(ProgressEvent::Failed {
            trace_id,
            stage,
            error: source.to_string(),
        });
        LoopError::RetrievalUnavailable {
            trace_id,
            stage,
            source,
        }
    }

    async fn reformulate(&self, ctx: &RunContext<'_>, state: &LoopState) -> String {
        let input = json!({
            "question": ctx.question.text(),
            "current_query": state.current_query,
        });
        let vars = PromptVariables::new().text("Query", state.current_query.as_str());

        let (reformulated, fallback) = match self
            .oracle
            .invoke_as::<ReformulateReply>(PromptTemplate::Reformulate, &vars)
            .await
        {
            Ok(reply) if !reply.reformulated.trim().is_empty() => {
                (reply.reformulated.trim().to_string(), None)
            }
            Ok(_) => (
                state.current_query.clone(),
                Some("blank reformulation".to_string()),
            ),
            Err(e) => (state.current_query.clone(), Some(e.to_string())),
        };

        if let Some(reason) = &fallback {
            info!(loop_index = state.loop_index(), %reason, "Keeping current query");
        }
        debug!(loop_index = state.loop_index(), %reformulated, "Reformulated query");

        self.record(
            ctx,
            StageRecord::completed(
                Stage::Reformulate,
                state.loop_index(),
                input,
                json!({
                    "reformulated": reformulated,
                    "fallback": fallback.is_some(),
                    "fallback_reason": fallback,
                }),
            ),
        )
        .await;
        reformulated
    }

    async fn retrieve_docs(
        &self,
        ctx: &RunContext<'_>,
        state: &LoopState,
        reformulated: &str,
    ) -> Result<Vec<DocCandidate>, LoopError> {
        let input = json!({
            "question": ctx.question.text(),
            "query": reformulated,
            "k": ctx.config.top_k_docs,
        });

        let candidates = match self
            .retrieval
            .search_docs(reformulated, ctx.config.top_k_docs)
            .await
        {
            Ok(candidates) => candidates,
            Err(e) => {
                return Err(self
                    .fail_retrieval(ctx, Stage::RetrieveDocs, state.loop_index(), input, e)
                    .await)
            }
        };

        debug!(
            loop_index = state.loop_index(),
            candidates = candidates.len(),
            "Retrieved document candidates"
        );
        self.record(
            ctx,
            StageRecord::completed(
                Stage::RetrieveDocs,
                state.loop_index(),
                input,
                json!({
                    "candidates": candidates
                        .iter()
                        .map(|c| json!({ "document_id": c.document_id, "score": c.summary_score }))
                        .collect::<Vec<_>>(),
                }),
            ),
        )
        .await;
        Ok(candidates)
    }

    async fn select_docs(
        &self,
        ctx: &RunContext<'_>,
        state: &LoopState,
        reformulated: &str,
        candidates: &[DocCandidate],
    ) -> DocFilter {
        let candidate_ids: Vec<&str> = candidates.iter().map(|c| c.document_id.as_str()).collect();
        let input = json!({
            "question": ctx.question.text(),
            "query": reformulated,
            "candidate_ids": candidate_ids,
        });

        if candidates.is_empty() {
            info!(loop_index = state.loop_index(), "No document candidates; nothing to select");
            self.record(
                ctx,
                StageRecord::completed(
                    Stage::SelectDocs,
                    state.loop_index(),
                    input,
                    json!({ "chosen_doc_ids": [], "fail_open": false, "reason": "no candidates" }),
                ),
            )
            .await;
            return DocFilter::allow_list(Vec::<String>::new());
        }

        let docs: Vec<Value> = candidates
            .iter()
            .map(|c| {
                json!({
                    "id": c.document_id,
                    "score": (f64::from(c.summary_score) * 10_000.0).round() / 10_000.0,
                    "summary": truncate_chars(&c.summary, ctx.config.doc_summary_max_chars),
                })
            })
            .collect();
        let vars = PromptVariables::new()
            .text("Question", ctx.question.text())
            .text("Query", reformulated)
            .json("Docs", &Value::Array(docs));

        let known: HashSet<&str> = candidate_ids.iter().copied().collect();
        let (chosen, discarded, reason) = match self
            .oracle
            .invoke_as::<SelectDocsReply>(PromptTemplate::SelectDocs, &vars)
            .await
        {
            Ok(reply) => {
                let (chosen, discarded): (Vec<String>, Vec<String>) = reply
                    .chosen_doc_ids
                    .into_iter()
                    .partition(|id| known.contains(id.as_str()));
                (chosen, discarded, reply.reason)
            }
            Err(e) => (Vec::new(), Vec::new(), e.to_string()),
        };

        if !discarded.is_empty() {
            debug!(loop_index = state.loop_index(), ?discarded, "Dropped unknown doc ids");
        }

        let fail_open = chosen.is_empty();
        let filter = if fail_open {
            info!(loop_index = state.loop_index(), "Empty doc selection; using all candidates");
            DocFilter::allow_list(candidate_ids.iter().copied())
        } else {
            DocFilter::allow_list(chosen)
        };

        self.record(
            ctx,
            StageRecord::completed(
                Stage::SelectDocs,
                state.loop_index(),
                input,
                json!({
                    "chosen_doc_ids": filter.doc_ids(),
                    "discarded_ids": discarded,
                    "fail_open": fail_open,
                    "reason": reason,
                }),
            ),
        )
        .await;
        filter
    }

    async fn retrieve_evidence(
        &self,
        ctx: &RunContext<'_>,
        state: &LoopState,
        reformulated: &str,
        filter: &DocFilter,
    ) -> Result<Vec<EvidenceItem>, LoopError> {
        let input = json!({
            "question": ctx.question.text(),
            "query": reformulated,
            "doc_ids": filter.doc_ids(),
            "top_k_chunks": ctx.config.top_k_chunks,
            "top_k_tables": ctx.config.top_k_tables,
        });

        let pool = match self
            .retrieval
            .search_evidence(
                reformulated,
                ctx.config.top_k_chunks,
                ctx.config.top_k_tables,
                filter,
            )
            .await
        {
            Ok(pool) => pool,
            Err(e) => {
                return Err(self
                    .fail_retrieval(ctx, Stage::RetrieveEvidence, state.loop_index(), input, e)
                    .await)
            }
        };

        let already_accumulated = pool
            .iter()
            .filter(|item| state.evidence.contains(&item.id))
            .count();
        debug!(
            loop_index = state.loop_index(),
            candidates = pool.len(),
            already_accumulated,
            "Retrieved evidence candidates"
        );

        self.record(
            ctx,
            StageRecord::completed(
                Stage::RetrieveEvidence,
                state.loop_index(),
                input,
                json!({
                    "candidates": pool
                        .iter()
                        .map(|item| json!({
                            "id": item.id,
                            "kind": item.kind,
                            "doc": item.source_document_id,
                            "score": item.score,
                        }))
                        .collect::<Vec<_>>(),
                    "already_accumulated": already_accumulated,
                }),
            ),
        )
        .await;
        Ok(pool)
    }

    /// Cap the pool shown to the filter stage, keeping score order.
    fn filter_window(pool: Vec<EvidenceItem>, config: &LoopConfig) -> Vec<EvidenceItem> {
        let (mut chunks, mut tables) = (0usize, 0usize);
        pool.into_iter()
            .filter(|item| match item.kind {
                EvidenceKind::Chunk => {
                    chunks += 1;
                    chunks <= config.max_filter_chunks
                }
                EvidenceKind::Table => {
                    tables += 1;
                    tables <= config.max_filter_tables
                }
            })
            .collect()
    }

    async fn filter_and_gate(
        &self,
        ctx: &RunContext<'_>,
        state: &mut LoopState,
        reformulated: &str,
        pool: Vec<EvidenceItem>,
    ) -> Phase {
        let loop_index = state.loop_index();
        let shown = Self::filter_window(pool, ctx.config);
        let text_budget = ctx.config.filter_text_chars;

        let input = json!({
            "question": ctx.question.text(),
            "query": reformulated,
            "accumulated_ids": state.evidence.ids(),
            "candidate_ids": shown.iter().map(|item| &item.id).collect::<Vec<_>>(),
        });

        let accepted: Vec<Value> = state
            .evidence
            .items()
            .iter()
            .map(|item| item.prompt_view(text_budget))
            .collect();
        let candidates: Vec<Value> = shown.iter().map(|item| item.prompt_view(text_budget)).collect();
        let vars = PromptVariables::new()
            .text("Question", ctx.question.text())
            .text("Query", reformulated)
            .json("Accepted evidence", &Value::Array(accepted))
            .json("Candidates", &Value::Array(candidates));

        let (reply, fallback) = match self
            .oracle
            .invoke_as::<FilterReply>(PromptTemplate::FilterEvidence, &vars)
            .await
        {
            Ok(reply) => (reply, None),
            Err(e) => {
                info!(loop_index, error = %e, "Filter output unusable; treating as not answerable");
                (FilterReply::default(), Some(e.to_string()))
            }
        };

        let relevant: HashSet<&str> = reply.relevant_chunk_ids.iter().map(String::as_str).collect();
        let approved: Vec<EvidenceItem> = shown
            .iter()
            .filter(|item| relevant.contains(item.id.as_str()))
            .cloned()
            .collect();
        let ignored: Vec<&str> = reply
            .relevant_chunk_ids
            .iter()
            .map(String::as_str)
            .filter(|id| !shown.iter().any(|item| item.id.as_str() == *id))
            .collect();
        let approved_ids: Vec<_> = approved.iter().map(|item| item.id.clone()).collect();
        let appended = state.evidence.merge(approved);

        let missing_query = reply.missing_info_query.trim();
        let next_query = if missing_query.is_empty() {
            reformulated.to_string()
        } else {
            missing_query.to_string()
        };

        let (next, decision, budget_exhausted) = if reply.answerable {
            (Phase::Finalize { budget_exhausted: false }, "finalize", false)
        } else if state.is_last_loop() {
            info!(loop_index, "Loop budget exhausted; finalizing with accumulated evidence");
            (Phase::Finalize { budget_exhausted: true }, "finalize", true)
        } else {
            (Phase::Reformulate, "refine", false)
        };

        info!(
            loop_index,
            approved = approved_ids.len(),
            appended,
            accumulated = state.evidence.len(),
            answerable = reply.answerable,
            decision,
            "Filtered evidence"
        );

        self.record(
            ctx,
            StageRecord::completed(
                Stage::FilterAndGate,
                loop_index,
                input,
                json!({
                    "relevant_ids": approved_ids,
                    "ignored_ids": ignored,
                    "appended": appended,
                    "answerable": reply.answerable,
                    "missing_info_query": reply.missing_info_query,
                    "reason": reply.reason,
                    "decision": decision,
                    "budget_exhausted": budget_exhausted,
                    "next_query": (decision == "refine").then_some(next_query.as_str()),
                    "fallback_reason": fallback,
                }),
            ),
        )
        .await;

        if matches!(next, Phase::Reformulate) && !state.advance(next_query) {
            return Phase::Finalize {
                budget_exhausted: true,
            };
        }
        next
    }

    async fn finalize(
        &self,
        ctx: &RunContext<'_>,
        state: &LoopState,
        budget_exhausted: bool,
    ) -> FinalAnswer {
        let input = json!({
            "question": ctx.question.text(),
            "evidence_ids": state.evidence.ids(),
            "budget_exhausted": budget_exhausted,
        });
        let evidence: Vec<Value> = state
            .evidence
            .items()
            .iter()
            .map(|item| item.prompt_view(ctx.config.final_text_chars))
            .collect();
        let vars = PromptVariables::new()
            .text("Question", ctx.question.text())
            .json("Evidence", &Value::Array(evidence));

        let (final_answer, fallback) = match self
            .oracle
            .invoke_as::<FinalAnswerReply>(PromptTemplate::FinalAnswer, &vars)
            .await
        {
            Ok(reply) => {
                let supporting_evidence_ids = state
                    .evidence
                    .mentioned_in(&[reply.answer.as_str(), reply.reasoning.as_str()]);
                (
                    FinalAnswer {
                        answer: reply.answer,
                        reasoning: reply.reasoning,
                        supporting_evidence_ids,
                    },
                    None,
                )
            }
            Err(e) => {
                warn!(error = %e, "Final answer unusable; returning fallback answer");
                (
                    FinalAnswer {
                        answer: INSUFFICIENT_EVIDENCE_ANSWER.to_string(),
                        reasoning: format!(
                            "No usable answer could be produced from {} accumulated evidence item(s).",
                            state.evidence.len()
                        ),
                        supporting_evidence_ids: Vec::new(),
                    },
                    Some(e.to_string()),
                )
            }
        };

        self.record(
            ctx,
            StageRecord::completed(
                Stage::Finalize,
                state.loop_index(),
                input,
                json!({
                    "answer": final_answer.answer,
                    "reasoning": final_answer.reasoning,
                    "supporting_evidence_ids": final_answer.supporting_evidence_ids,
                    "provenance": state
                        .evidence
                        .provenance()
                        .into_iter()
                        .map(|(document_id, evidence_ids)| json!({
                            "document_id": document_id,
                            "evidence_ids": evidence_ids,
                        }))
                        .collect::<Vec<_>>(),
                    "fallback_reason": fallback,
                }),
            ),
        )
        .await;
        final_answer
    }
}
