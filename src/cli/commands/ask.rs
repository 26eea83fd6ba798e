//! `finloop ask`: run the evidence-curation loop for one question, or for
//! every question in a file.

use anyhow::{Context, Result};
use clap::Args;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::output::{create_spinner, list_table, output, truncate, CommandOutput};
use crate::domain::errors::LoopError;
use crate::domain::models::{Config, LoopConfig, LoopOutcome};
use crate::services::{ProgressEvent, ProgressSink, QaService};

#[derive(Args, Debug)]
pub struct AskArgs {
    /// Question to answer
    #[arg(required_unless_present = "file", conflicts_with = "file")]
    pub question: Option<String>,

    /// Ask every question in this file, one per line (`#` starts a comment)
    #[arg(long, value_name = "PATH")]
    pub file: Option<PathBuf>,

    /// Write batch results as JSON to this path
    #[arg(long, value_name = "PATH", requires = "file")]
    pub out: Option<PathBuf>,

    /// Maximum reformulate cycles
    #[arg(long)]
    pub max_loops: Option<u32>,

    /// Documents retrieved per iteration
    #[arg(long)]
    pub top_k_docs: Option<usize>,

    /// Chunks retrieved per iteration
    #[arg(long)]
    pub top_k_chunks: Option<usize>,

    /// Tables retrieved per iteration
    #[arg(long)]
    pub top_k_tables: Option<usize>,

    /// Include accumulated evidence in the output
    #[arg(long)]
    pub show_evidence: bool,
}

impl AskArgs {
    /// Loop bounds for this run: configured defaults with flag overrides.
    pub fn loop_config(&self, defaults: &LoopConfig) -> LoopConfig {
        let mut config = defaults.clone();
        if let Some(max_loops) = self.max_loops {
            config.max_loops = max_loops;
        }
        if let Some(k) = self.top_k_docs {
            config.top_k_docs = k;
        }
        if let Some(k) = self.top_k_chunks {
            config.top_k_chunks = k;
        }
        if let Some(k) = self.top_k_tables {
            config.top_k_tables = k;
        }
        config
    }
}

#[derive(Debug, serde::Serialize)]
pub struct EvidenceOutput {
    pub id: String,
    pub kind: String,
    pub source_document_id: String,
    pub score: f32,
    pub text: String,
}

#[derive(Debug, serde::Serialize)]
pub struct AskOutput {
    pub trace_id: String,
    pub answer: String,
    pub reasoning: String,
    pub supporting_evidence_ids: Vec<String>,
    pub loops_used: u32,
    pub budget_exhausted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence: Option<Vec<EvidenceOutput>>,
}

impl AskOutput {
    pub fn from_outcome(outcome: &LoopOutcome, show_evidence: bool) -> Self {
        let evidence = show_evidence.then(|| {
            outcome
                .evidence
                .iter()
                .map(|item| EvidenceOutput {
                    id: item.id.to_string(),
                    kind: item.kind.to_string(),
                    source_document_id: item.source_document_id.clone(),
                    score: item.score,
                    text: item.text.clone(),
                })
                .collect()
        });

        Self {
            trace_id: outcome.trace_id.to_string(),
            answer: outcome.final_answer.answer.clone(),
            reasoning: outcome.final_answer.reasoning.clone(),
            supporting_evidence_ids: outcome
                .final_answer
                .supporting_evidence_ids
                .iter()
                .map(ToString::to_string)
                .collect(),
            loops_used: outcome.loops_used,
            budget_exhausted: outcome.budget_exhausted,
            evidence,
        }
    }
}

impl CommandOutput for AskOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![
            format!("{} {}", console::style("Answer:").bold(), self.answer),
            String::new(),
            format!("Reasoning: {}", self.reasoning),
        ];

        if self.supporting_evidence_ids.is_empty() {
            lines.push("Supporting evidence: none".to_string());
        } else {
            lines.push(format!(
                "Supporting evidence: {}",
                self.supporting_evidence_ids.join(", ")
            ));
        }

        let budget_note = if self.budget_exhausted {
            " (loop budget exhausted)"
        } else {
            ""
        };
        lines.push(format!("Loops used: {}{budget_note}", self.loops_used));
        lines.push(format!("Trace: {}", self.trace_id));

        if let Some(evidence) = &self.evidence {
            let mut table = list_table(&["id", "kind", "document", "score", "text"]);
            for item in evidence {
                table.add_row(vec![
                    truncate(&item.id, 24),
                    item.kind.clone(),
                    truncate(&item.source_document_id, 24),
                    format!("{:.3}", item.score),
                    truncate(&item.text, 60),
                ]);
            }
            lines.push(format!("\n{} evidence item(s):", evidence.len()));
            lines.push(table.to_string());
        }

        lines.join("\n")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

/// Result of one question in a batch run.
#[derive(Debug, Clone, serde::Serialize)]
pub struct BatchEntry {
    pub question: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub supporting_evidence_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchEntry {
    pub fn from_result(question: &str, result: &Result<LoopOutcome, LoopError>) -> Self {
        match result {
            Ok(outcome) => Self {
                question: question.to_string(),
                trace_id: Some(outcome.trace_id.to_string()),
                answer: Some(outcome.final_answer.answer.clone()),
                reasoning: Some(outcome.final_answer.reasoning.clone()),
                supporting_evidence_ids: outcome
                    .final_answer
                    .supporting_evidence_ids
                    .iter()
                    .map(ToString::to_string)
                    .collect(),
                error: None,
            },
            Err(e) => Self {
                question: question.to_string(),
                trace_id: e.trace_id().map(|id| id.to_string()),
                answer: None,
                reasoning: None,
                supporting_evidence_ids: Vec::new(),
                error: Some(e.to_string()),
            },
        }
    }
}

#[derive(Debug, serde::Serialize)]
pub struct BatchOutput {
    pub answered: usize,
    pub failed: usize,
    pub results: Vec<BatchEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saved_to: Option<String>,
}

impl BatchOutput {
    pub fn new(results: Vec<BatchEntry>, saved_to: Option<&Path>) -> Self {
        let failed = results.iter().filter(|r| r.error.is_some()).count();
        Self {
            answered: results.len() - failed,
            failed,
            results,
            saved_to: saved_to.map(|p| p.display().to_string()),
        }
    }
}

impl CommandOutput for BatchOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["#", "question", "answer", "trace"]);
        for (i, entry) in self.results.iter().enumerate() {
            let answer = match (&entry.answer, &entry.error) {
                (Some(answer), _) => truncate(answer, 60),
                (None, Some(error)) => {
                    format!("{} {}", console::style("error:").red(), truncate(error, 50))
                }
                (None, None) => String::new(),
            };
            table.add_row(vec![
                (i + 1).to_string(),
                truncate(&entry.question, 50),
                answer,
                entry.trace_id.clone().unwrap_or_else(|| "-".to_string()),
            ]);
        }

        let mut lines = vec![
            table.to_string(),
            String::new(),
            format!("{} answered, {} failed", self.answered, self.failed),
        ];
        if let Some(path) = &self.saved_to {
            lines.push(format!("Results saved to {path}"));
        }
        lines.join("\n")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

/// Non-blank lines of a question file, with `#` comment lines skipped.
pub fn parse_questions(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(ToString::to_string)
        .collect()
}

fn describe(event: &ProgressEvent) -> String {
    match event {
        ProgressEvent::StageStarted {
            stage,
            loop_index,
            max_loops,
            ..
        } => format!("loop {}/{max_loops}: {stage}", loop_index + 1),
        ProgressEvent::Finished { loops_used, .. } => format!("finished after {loops_used} loop(s)"),
        ProgressEvent::Failed { stage, .. } => format!("failed during {stage}"),
    }
}

/// Run one question, feeding a spinner unless JSON output is requested.
async fn run_question(
    service: &QaService,
    question: &str,
    loop_config: &LoopConfig,
    cancel: &CancellationToken,
    label: &str,
    json_mode: bool,
) -> Result<LoopOutcome, LoopError> {
    let (sink, progress_task) = if json_mode {
        (ProgressSink::disabled(), None)
    } else {
        let (sink, mut rx) = ProgressSink::channel();
        let spinner = create_spinner(&format!("{label}starting"));
        let label = label.to_string();
        let task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                spinner.set_message(format!("{label}{}", describe(&event)));
            }
            spinner.finish_and_clear();
        });
        (sink, Some(task))
    };

    let result = service
        .run_loop_with(question, Some(loop_config), cancel, &sink)
        .await;

    drop(sink);
    if let Some(task) = progress_task {
        let _ = task.await;
    }
    result
}

async fn run_batch(
    service: &QaService,
    path: &Path,
    out: Option<&Path>,
    loop_config: &LoopConfig,
    cancel: &CancellationToken,
    json_mode: bool,
) -> Result<BatchOutput> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read questions from {}", path.display()))?;
    let questions = parse_questions(&contents);
    info!(count = questions.len(), path = %path.display(), "Starting batch run");

    let total = questions.len();
    let mut results = Vec::with_capacity(total);
    for (i, question) in questions.iter().enumerate() {
        let label = format!("[{}/{total}] ", i + 1);
        let result = run_question(service, question, loop_config, cancel, &label, json_mode).await;
        if let Err(e) = &result {
            warn!(question = %question, error = %e, "Batch question failed");
        }
        let cancelled = matches!(result, Err(LoopError::Cancelled { .. }));
        results.push(BatchEntry::from_result(question, &result));
        if cancelled {
            break;
        }
    }

    if let Some(out) = out {
        let json = serde_json::to_string_pretty(&results).context("Failed to serialize batch results")?;
        tokio::fs::write(out, json)
            .await
            .with_context(|| format!("Failed to write results to {}", out.display()))?;
    }
    Ok(BatchOutput::new(results, out))
}

pub async fn execute(args: AskArgs, config: &Config, json_mode: bool) -> Result<()> {
    let service = QaService::from_config(config)
        .await
        .context("Failed to initialize question answering service")?;
    let loop_config = args.loop_config(service.loop_config());

    let cancel = CancellationToken::new();
    let interrupt = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        }
    });

    let result = match (&args.file, &args.question) {
        (Some(path), _) => run_batch(
            &service,
            path,
            args.out.as_deref(),
            &loop_config,
            &cancel,
            json_mode,
        )
        .await
        .map(|batch| output(&batch, json_mode)),
        (None, Some(question)) => {
            run_question(&service, question, &loop_config, &cancel, "", json_mode)
                .await
                .map(|outcome| {
                    output(&AskOutput::from_outcome(&outcome, args.show_evidence), json_mode)
                })
                .map_err(anyhow::Error::from)
        }
        (None, None) => Err(anyhow::anyhow!("Either a question or --file is required")),
    };

    interrupt.abort();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{
        CharSpan, EvidenceId, EvidenceItem, EvidenceKind, FinalAnswer, Stage, TraceId,
    };

    fn outcome() -> LoopOutcome {
        let item = EvidenceItem {
            id: EvidenceId::new("chunk-1"),
            kind: EvidenceKind::Chunk,
            source_document_id: "acme-2022".to_string(),
            text: "Revenue was 10.4bn.".to_string(),
            score: 0.91,
            char_span: CharSpan::new(0, 19),
        };
        LoopOutcome {
            trace_id: TraceId::new(),
            final_answer: FinalAnswer {
                answer: "10.4bn".to_string(),
                reasoning: "chunk-1 states revenue".to_string(),
                supporting_evidence_ids: vec![item.id.clone()],
            },
            loops_used: 1,
            budget_exhausted: false,
            evidence: vec![item],
        }
    }

    #[test]
    fn test_overrides_apply_on_top_of_defaults() {
        let args = AskArgs {
            question: Some("q".to_string()),
            file: None,
            out: None,
            max_loops: Some(1),
            top_k_docs: None,
            top_k_chunks: Some(3),
            top_k_tables: None,
            show_evidence: false,
        };
        let config = args.loop_config(&LoopConfig::default());
        assert_eq!(config.max_loops, 1);
        assert_eq!(config.top_k_chunks, 3);
        assert_eq!(config.top_k_docs, LoopConfig::default().top_k_docs);
    }

    #[test]
    fn test_json_output_omits_evidence_unless_requested() {
        let outcome = outcome();
        let json = AskOutput::from_outcome(&outcome, false).to_json();
        assert_eq!(json["answer"], "10.4bn");
        assert_eq!(json["supporting_evidence_ids"][0], "chunk-1");
        assert!(json.get("evidence").is_none());

        let json = AskOutput::from_outcome(&outcome, true).to_json();
        assert_eq!(json["evidence"][0]["source_document_id"], "acme-2022");
    }

    #[test]
    fn test_human_output_names_trace() {
        let outcome = outcome();
        let human = AskOutput::from_outcome(&outcome, true).to_human();
        assert!(human.contains("10.4bn"));
        assert!(human.contains(&outcome.trace_id.to_string()));
        assert!(human.contains("1 evidence item(s)"));
    }

    #[test]
    fn test_describe_uses_one_based_loop_numbers() {
        let event = ProgressEvent::StageStarted {
            trace_id: TraceId::new(),
            stage: Stage::RetrieveDocs,
            loop_index: 0,
            max_loops: 4,
        };
        assert_eq!(describe(&event), "loop 1/4: retrieve_docs");
    }

    #[test]
    fn test_parse_questions_skips_blanks_and_comments() {
        let contents = "# annual report questions\n\nWhat was revenue in 2022?\n  \n  Who is the CFO?  \n";
        assert_eq!(
            parse_questions(contents),
            vec!["What was revenue in 2022?", "Who is the CFO?"]
        );
    }

    #[test]
    fn test_batch_entries_keep_answers_and_errors() {
        let answered = BatchEntry::from_result("q1", &Ok(outcome()));
        assert_eq!(answered.answer.as_deref(), Some("10.4bn"));
        assert_eq!(answered.supporting_evidence_ids, vec!["chunk-1"]);
        assert!(answered.error.is_none());

        let trace_id = TraceId::new();
        let failed = BatchEntry::from_result(
            "q2",
            &Err(LoopError::Cancelled {
                trace_id,
                stage: Stage::Reformulate,
            }),
        );
        assert!(failed.answer.is_none());
        assert_eq!(failed.trace_id, Some(trace_id.to_string()));
        assert!(failed.error.as_deref().is_some_and(|e| e.contains("cancelled")));

        let batch = BatchOutput::new(vec![answered, failed], None);
        assert_eq!((batch.answered, batch.failed), (1, 1));
        let json = batch.to_json();
        assert_eq!(json["results"][0]["answer"], "10.4bn");
        assert!(json["results"][0].get("error").is_none());
        assert!(json["results"][1].get("answer").is_none());
        assert!(json.get("saved_to").is_none());
        assert!(batch.to_human().contains("1 answered, 1 failed"));
    }
}
