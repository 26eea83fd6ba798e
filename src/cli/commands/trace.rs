//! `finloop trace`: inspect recorded traces.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use std::str::FromStr;
use std::sync::Arc;

use crate::adapters::sqlite::{initialize_database, SqliteTraceStore};
use crate::cli::output::{list_table, output, truncate, CommandOutput};
use crate::domain::models::{Config, StageRecord, TraceId, TraceSummary};
use crate::services::TraceRecorder;

#[derive(Args, Debug)]
pub struct TraceArgs {
    #[command(subcommand)]
    pub command: TraceCommands,
}

#[derive(Subcommand, Debug)]
pub enum TraceCommands {
    /// Show the stage records of one trace
    Show {
        /// Trace ID
        trace_id: String,

        /// Print full input and output snapshots
        #[arg(long)]
        full: bool,
    },

    /// List recent traces, newest first
    List {
        /// Maximum number of traces to display
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}

#[derive(Debug, serde::Serialize)]
pub struct TraceDetailOutput {
    pub trace_id: String,
    pub records: Vec<StageRecord>,
    #[serde(skip)]
    pub full: bool,
}

fn record_status(record: &StageRecord) -> String {
    match &record.error {
        Some(error) => format!("failed: {}", truncate(error, 40)),
        None => "ok".to_string(),
    }
}

impl CommandOutput for TraceDetailOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![format!(
            "Trace {} ({} record(s))",
            self.trace_id,
            self.records.len()
        )];

        if self.full {
            for record in &self.records {
                lines.push(format!(
                    "\n[loop {}] {} at {} - {}",
                    record.loop_index + 1,
                    record.stage,
                    record.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
                    record_status(record)
                ));
                lines.push(format!(
                    "Input:\n{}",
                    serde_json::to_string_pretty(&record.input_snapshot).unwrap_or_default()
                ));
                lines.push(format!(
                    "Output:\n{}",
                    serde_json::to_string_pretty(&record.output_snapshot).unwrap_or_default()
                ));
            }
            return lines.join("\n");
        }

        let mut table = list_table(&["loop", "stage", "status", "recorded", "output"]);
        for record in &self.records {
            table.add_row(vec![
                (record.loop_index + 1).to_string(),
                record.stage.to_string(),
                record_status(record),
                record.timestamp.format("%H:%M:%S").to_string(),
                truncate(&record.output_snapshot.to_string(), 60),
            ]);
        }
        lines.push(table.to_string());
        lines.join("\n")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

#[derive(Debug, serde::Serialize)]
pub struct TraceListOutput {
    pub traces: Vec<TraceSummary>,
    pub total: usize,
}

impl CommandOutput for TraceListOutput {
    fn to_human(&self) -> String {
        if self.traces.is_empty() {
            return "No traces found.".to_string();
        }

        let mut table = list_table(&["trace", "started", "last stage", "records", "question"]);
        for summary in &self.traces {
            let last_stage = if summary.failed {
                format!("{} (failed)", summary.last_stage)
            } else {
                summary.last_stage.to_string()
            };
            table.add_row(vec![
                summary.trace_id.to_string(),
                summary.started_at.format("%Y-%m-%d %H:%M").to_string(),
                last_stage,
                summary.record_count.to_string(),
                truncate(summary.question.as_deref().unwrap_or("-"), 48),
            ]);
        }

        format!(
            "{} trace(s):\n{table}",
            console::style(self.total).bold()
        )
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

/// Traces are read straight from the store; no oracle or retrieval client is
/// needed to inspect them.
async fn open_recorder(config: &Config) -> Result<TraceRecorder> {
    let database_url = format!("sqlite:{}", config.trace.database_path);
    let pool = initialize_database(&database_url, config.trace.max_connections)
        .await
        .with_context(|| format!("Failed to open trace database at {database_url}"))?;
    Ok(TraceRecorder::new(
        Arc::new(SqliteTraceStore::new(pool)),
        &config.trace,
    ))
}

pub async fn execute(args: TraceArgs, config: &Config, json_mode: bool) -> Result<()> {
    let recorder = open_recorder(config).await?;

    match args.command {
        TraceCommands::Show { trace_id, full } => {
            let id = TraceId::from_str(&trace_id)
                .with_context(|| format!("Invalid trace id: {trace_id}"))?;
            let records = recorder.read(id).await?;
            let out = TraceDetailOutput {
                trace_id: id.to_string(),
                records,
                full,
            };
            output(&out, json_mode);
        }

        TraceCommands::List { limit } => {
            let traces = recorder.list(limit).await?;
            let out = TraceListOutput {
                total: traces.len(),
                traces,
            };
            output(&out, json_mode);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Stage;
    use serde_json::json;

    #[test]
    fn test_detail_output_marks_failed_records() {
        let trace_id = TraceId::new();
        let out = TraceDetailOutput {
            trace_id: trace_id.to_string(),
            records: vec![
                StageRecord::completed(
                    Stage::Reformulate,
                    0,
                    json!({"question": "q"}),
                    json!({"reformulated": "q2"}),
                ),
                StageRecord::failed(
                    Stage::RetrieveDocs,
                    0,
                    json!({"query": "q2"}),
                    "connection refused",
                ),
            ],
            full: false,
        };

        let human = out.to_human();
        assert!(human.contains("reformulate"));
        assert!(human.contains("failed: connection refused"));

        let json = out.to_json();
        assert_eq!(json["records"].as_array().map(Vec::len), Some(2));
        assert!(json.get("full").is_none());
    }

    #[test]
    fn test_empty_list_output() {
        let out = TraceListOutput {
            traces: vec![],
            total: 0,
        };
        assert_eq!(out.to_human(), "No traces found.");
    }
}
