//! Common test utilities for integration tests
//!
//! Provides a scripted oracle, a static retrieval corpus and an in-memory
//! trace store wired into a [`QaService`].

#![allow(dead_code)]

use serde_json::json;
use std::sync::Arc;

use finloop::adapters::memory::InMemoryTraceStore;
use finloop::adapters::mock::{doc_hit, evidence_hit, ScriptedOracle, ScriptedReply, StaticRetrieval};
use finloop::domain::models::{Collection, Config, LoopConfig, Stage, StageRecord};
use finloop::domain::ports::TraceStore;
use finloop::services::QaService;

pub const QUESTION: &str = "What was ACME's revenue in 2022 and how did it compare to 2021?";

pub const DOC_2022: &str = "doc-acme-2022";
pub const DOC_2021: &str = "doc-acme-2021";
pub const CHUNK_REV_2022: &str = "chunk-rev-2022";
pub const CHUNK_REV_2021: &str = "chunk-rev-2021";
pub const TABLE_SEG_2022: &str = "table-seg-2022";

pub struct Harness {
    pub oracle: Arc<ScriptedOracle>,
    pub retrieval: Arc<StaticRetrieval>,
    pub store: Arc<InMemoryTraceStore>,
    pub service: QaService,
}

/// Service over fresh scripted collaborators and the default config.
pub fn harness() -> Harness {
    harness_with_store(Arc::new(InMemoryTraceStore::new()))
}

pub fn harness_with_store(store: Arc<InMemoryTraceStore>) -> Harness {
    let oracle = Arc::new(ScriptedOracle::new());
    let retrieval = Arc::new(StaticRetrieval::new());
    let service = QaService::new(
        oracle.clone(),
        retrieval.clone(),
        store.clone() as Arc<dyn TraceStore>,
        &Config::default(),
    );
    Harness {
        oracle,
        retrieval,
        store,
        service,
    }
}

pub fn loop_config(max_loops: u32) -> LoopConfig {
    LoopConfig {
        max_loops,
        ..LoopConfig::default()
    }
}

/// Two annual reports with revenue passages and a segment table.
pub async fn seed_corpus(retrieval: &StaticRetrieval) {
    retrieval
        .set_items(
            Collection::Docs,
            vec![
                doc_hit(DOC_2022, 0.92, "ACME annual report 2022"),
                doc_hit(DOC_2021, 0.81, "ACME annual report 2021"),
            ],
        )
        .await;
    retrieval
        .set_items(
            Collection::Chunks,
            vec![
                evidence_hit(
                    CHUNK_REV_2022,
                    DOC_2022,
                    "Group revenue for 2022 was EUR 10.4bn.",
                    0.88,
                    (1200, 1238),
                ),
                evidence_hit(
                    CHUNK_REV_2021,
                    DOC_2021,
                    "Group revenue for 2021 was EUR 9.7bn.",
                    0.74,
                    (980, 1017),
                ),
            ],
        )
        .await;
    retrieval
        .set_items(
            Collection::Tables,
            vec![evidence_hit(
                TABLE_SEG_2022,
                DOC_2022,
                "Segment | 2022 | 2021\nIndustrial | 6.1 | 5.8",
                0.69,
                (4000, 4090),
            )],
        )
        .await;
}

pub fn reformulate(query: &str) -> ScriptedReply {
    ScriptedReply::json(&json!({ "reformulated": query }))
}

pub fn select(doc_ids: &[&str]) -> ScriptedReply {
    ScriptedReply::json(&json!({ "chosen_doc_ids": doc_ids, "reason": "scripted" }))
}

pub fn filter(relevant: &[&str], answerable: bool, missing_info_query: &str) -> ScriptedReply {
    ScriptedReply::json(&json!({
        "relevant_chunk_ids": relevant,
        "answerable": answerable,
        "missing_info_query": missing_info_query,
        "reason": "scripted",
    }))
}

pub fn final_answer(answer: &str, reasoning: &str) -> ScriptedReply {
    ScriptedReply::json(&json!({ "answer": answer, "reasoning": reasoning }))
}

/// Oracle that reformulates, selects both reports and approves the 2022
/// revenue chunk, answering on the first gate.
pub async fn script_answerable(oracle: &ScriptedOracle) {
    oracle.set_default("reformulate", reformulate("ACME revenue 2022 2021")).await;
    oracle.set_default("select_docs", select(&[DOC_2022, DOC_2021])).await;
    oracle
        .set_default("filter_evidence", filter(&[CHUNK_REV_2022], true, ""))
        .await;
    oracle
        .set_default(
            "final_answer",
            final_answer(
                "ACME's 2022 revenue was EUR 10.4bn.",
                "chunk-rev-2022 states group revenue for 2022.",
            ),
        )
        .await;
}

/// Oracle whose gate never reports the question answerable.
pub async fn script_never_answerable(oracle: &ScriptedOracle) {
    script_answerable(oracle).await;
    oracle
        .set_default(
            "filter_evidence",
            filter(&[CHUNK_REV_2022], false, "ACME revenue 2021"),
        )
        .await;
}

pub fn stages(records: &[StageRecord]) -> Vec<(u32, Stage)> {
    records.iter().map(|r| (r.loop_index, r.stage)).collect()
}

pub fn records_for(records: &[StageRecord], stage: Stage) -> Vec<&StageRecord> {
    records.iter().filter(|r| r.stage == stage).collect()
}

/// Setup test logging
///
/// Initializes tracing subscriber for test output.
pub fn setup_test_logging() {
    use tracing_subscriber::fmt;

    let _ = fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}
