//! End-to-end runs of the evidence loop against scripted collaborators.

mod common;

use common::*;
use finloop::adapters::mock::ScriptedReply;
use finloop::domain::errors::{LoopError, RetrievalError, TraceError};
use finloop::domain::models::{Collection, Stage};
use finloop::services::{ProgressEvent, ProgressSink};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_single_loop_answerable_on_first_gate() {
    setup_test_logging();
    let h = harness();
    seed_corpus(&h.retrieval).await;
    script_answerable(&h.oracle).await;

    let outcome = h
        .service
        .run_loop(QUESTION, Some(&loop_config(1)))
        .await
        .unwrap();

    assert_eq!(outcome.loops_used, 1);
    assert!(!outcome.budget_exhausted);
    assert_eq!(outcome.final_answer.answer, "ACME's 2022 revenue was EUR 10.4bn.");
    assert_eq!(
        outcome
            .final_answer
            .supporting_evidence_ids
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>(),
        vec![CHUNK_REV_2022.to_string()]
    );

    let records = h.service.get_trace(outcome.trace_id).await.unwrap();
    assert_eq!(
        stages(&records),
        vec![
            (0, Stage::Reformulate),
            (0, Stage::RetrieveDocs),
            (0, Stage::SelectDocs),
            (0, Stage::RetrieveEvidence),
            (0, Stage::FilterAndGate),
            (0, Stage::Finalize),
        ]
    );
    assert!(records.iter().all(|r| !r.is_failure()));
    assert!(records.iter().all(|r| r.input_snapshot["question"] == QUESTION));
    assert_eq!(h.oracle.requests_for("reformulate").await.len(), 1);
}

#[tokio::test]
async fn test_evidence_accumulates_across_three_loops() {
    let h = harness();
    seed_corpus(&h.retrieval).await;
    script_answerable(&h.oracle).await;
    h.oracle
        .push_reply(
            "filter_evidence",
            filter(&[CHUNK_REV_2022], false, "ACME revenue 2021"),
        )
        .await;
    h.oracle
        .push_reply(
            "filter_evidence",
            filter(&[TABLE_SEG_2022], false, "ACME segment revenue"),
        )
        .await;
    h.oracle
        .push_reply("filter_evidence", filter(&[CHUNK_REV_2021], true, ""))
        .await;

    let outcome = h
        .service
        .run_loop(QUESTION, Some(&loop_config(3)))
        .await
        .unwrap();

    assert_eq!(outcome.loops_used, 3);
    assert!(!outcome.budget_exhausted);
    let mut ids: Vec<String> = outcome.evidence.iter().map(|e| e.id.to_string()).collect();
    ids.sort();
    assert_eq!(ids, vec![CHUNK_REV_2021, CHUNK_REV_2022, TABLE_SEG_2022]);

    let records = h.service.get_trace(outcome.trace_id).await.unwrap();
    let reformulates = records_for(&records, Stage::Reformulate);
    assert_eq!(
        reformulates.iter().map(|r| r.loop_index).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
    assert_eq!(
        reformulates[1].input_snapshot["current_query"],
        "ACME revenue 2021"
    );
    assert_eq!(
        reformulates[2].input_snapshot["current_query"],
        "ACME segment revenue"
    );

    let final_requests = h.oracle.requests_for("final_answer").await;
    assert_eq!(final_requests.len(), 1);
    for id in [CHUNK_REV_2022, TABLE_SEG_2022, CHUNK_REV_2021] {
        assert!(
            final_requests[0].prompt.contains(id),
            "final prompt should include {id}"
        );
    }

    let finalize = records_for(&records, Stage::Finalize)[0];
    assert_eq!(
        finalize.output_snapshot["provenance"],
        serde_json::json!([
            { "document_id": DOC_2022, "evidence_ids": [CHUNK_REV_2022, TABLE_SEG_2022] },
            { "document_id": DOC_2021, "evidence_ids": [CHUNK_REV_2021] },
        ])
    );
}

#[tokio::test]
async fn test_docs_retrieval_outage_fails_question_with_partial_trace() {
    let h = harness();
    seed_corpus(&h.retrieval).await;
    script_answerable(&h.oracle).await;
    h.retrieval.fail_collection(Collection::Docs).await;

    let err = h
        .service
        .run_loop(QUESTION, Some(&loop_config(3)))
        .await
        .unwrap_err();

    let trace_id = err.trace_id().expect("in-flight failures carry a trace id");
    match &err {
        LoopError::RetrievalUnavailable { stage, source, .. } => {
            assert_eq!(*stage, Stage::RetrieveDocs);
            assert!(matches!(source, RetrievalError::Unavailable(_)));
        }
        other => panic!("expected RetrievalUnavailable, got {other:?}"),
    }

    let records = h.service.get_trace(trace_id).await.unwrap();
    assert_eq!(
        stages(&records),
        vec![(0, Stage::Reformulate), (0, Stage::RetrieveDocs)]
    );
    assert!(!records[0].is_failure());
    assert!(records[1].is_failure());
    assert!(records[1]
        .error
        .as_deref()
        .is_some_and(|e| e.contains("unavailable")));
    assert!(h.oracle.requests_for("select_docs").await.is_empty());
}

#[tokio::test]
async fn test_evidence_retrieval_outage_stops_after_select() {
    let h = harness();
    seed_corpus(&h.retrieval).await;
    script_answerable(&h.oracle).await;
    h.retrieval.fail_collection(Collection::Tables).await;

    let err = h
        .service
        .run_loop(QUESTION, Some(&loop_config(2)))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        LoopError::RetrievalUnavailable {
            stage: Stage::RetrieveEvidence,
            ..
        }
    ));
    let records = h.service.get_trace(err.trace_id().unwrap()).await.unwrap();
    assert_eq!(records.len(), 4);
    assert_eq!(records[3].stage, Stage::RetrieveEvidence);
    assert!(records[3].is_failure());
}

#[tokio::test]
async fn test_malformed_reformulation_keeps_original_question() {
    let h = harness();
    seed_corpus(&h.retrieval).await;
    script_answerable(&h.oracle).await;
    h.oracle
        .set_default("reformulate", ScriptedReply::success("I think the answer is revenue"))
        .await;

    let outcome = h
        .service
        .run_loop(QUESTION, Some(&loop_config(1)))
        .await
        .unwrap();

    assert_eq!(h.oracle.requests_for("reformulate").await.len(), 2);

    let searches = h.retrieval.requests().await;
    assert_eq!(searches[0].collection, Collection::Docs);
    assert_eq!(searches[0].query, QUESTION);

    let records = h.service.get_trace(outcome.trace_id).await.unwrap();
    let reformulate = records_for(&records, Stage::Reformulate)[0];
    assert_eq!(reformulate.output_snapshot["reformulated"], QUESTION);
    assert_eq!(reformulate.output_snapshot["fallback"], true);
    assert_eq!(records[1].stage, Stage::RetrieveDocs);
}

#[tokio::test]
async fn test_unusable_final_answer_falls_back() {
    let h = harness();
    seed_corpus(&h.retrieval).await;
    script_answerable(&h.oracle).await;
    h.oracle
        .set_default("final_answer", ScriptedReply::success(r#"{"answer": "10.4bn"}"#))
        .await;

    let outcome = h
        .service
        .run_loop(QUESTION, Some(&loop_config(1)))
        .await
        .unwrap();

    assert_eq!(
        outcome.final_answer.answer,
        finloop::services::loop_controller::INSUFFICIENT_EVIDENCE_ANSWER
    );
    assert!(outcome.final_answer.supporting_evidence_ids.is_empty());
    assert_eq!(outcome.evidence.len(), 1);
}

#[tokio::test]
async fn test_oracle_outage_on_filter_exhausts_budget() {
    let h = harness();
    seed_corpus(&h.retrieval).await;
    script_answerable(&h.oracle).await;
    h.oracle
        .set_default("filter_evidence", ScriptedReply::failure("503 from oracle"))
        .await;

    let outcome = h
        .service
        .run_loop(QUESTION, Some(&loop_config(2)))
        .await
        .unwrap();

    assert_eq!(outcome.loops_used, 2);
    assert!(outcome.budget_exhausted);
    assert!(outcome.evidence.is_empty());
}

#[tokio::test]
async fn test_empty_question_rejected_before_trace() {
    let h = harness();
    let err = h.service.run_loop("   ", None).await.unwrap_err();
    assert!(matches!(err, LoopError::InvalidQuestion(_)));
    assert!(err.trace_id().is_none());
    assert!(h.service.list_traces(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_invalid_loop_config_rejected() {
    let h = harness();
    let err = h
        .service
        .run_loop(QUESTION, Some(&loop_config(0)))
        .await
        .unwrap_err();
    assert!(matches!(err, LoopError::InvalidConfig(msg) if msg.contains("max_loops")));
}

#[tokio::test]
async fn test_trace_write_failure_does_not_abort_answer() {
    let h = harness();
    seed_corpus(&h.retrieval).await;
    script_answerable(&h.oracle).await;
    h.store.fail_writes("disk full").await;

    let outcome = h
        .service
        .run_loop(QUESTION, Some(&loop_config(1)))
        .await
        .unwrap();

    assert_eq!(outcome.final_answer.answer, "ACME's 2022 revenue was EUR 10.4bn.");
    assert!(matches!(
        h.service.get_trace(outcome.trace_id).await,
        Err(TraceError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_cancel_before_start_records_cancelled_stage() {
    let h = harness();
    seed_corpus(&h.retrieval).await;
    script_answerable(&h.oracle).await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = h
        .service
        .run_loop_with(QUESTION, None, &cancel, &ProgressSink::disabled())
        .await
        .unwrap_err();

    let LoopError::Cancelled { trace_id, stage } = err else {
        panic!("expected Cancelled, got {err:?}");
    };
    assert_eq!(stage, Stage::Reformulate);

    let records = h.service.get_trace(trace_id).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].error.as_deref(), Some("cancelled"));
    assert!(h.oracle.requests().await.is_empty());
}

#[tokio::test]
async fn test_cancel_mid_run_stops_at_next_stage() {
    let h = harness();
    seed_corpus(&h.retrieval).await;
    script_answerable(&h.oracle).await;
    h.oracle
        .set_default(
            "select_docs",
            ScriptedReply::delayed(
                Duration::from_millis(300),
                r#"{"chosen_doc_ids": ["doc-acme-2022"]}"#,
            ),
        )
        .await;

    let cancel = CancellationToken::new();
    let (sink, mut rx) = ProgressSink::channel();
    let watcher = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            while let Some(event) = rx.recv().await {
                if matches!(
                    event,
                    ProgressEvent::StageStarted {
                        stage: Stage::SelectDocs,
                        ..
                    }
                ) {
                    cancel.cancel();
                }
            }
        }
    });

    let err = h
        .service
        .run_loop_with(QUESTION, None, &cancel, &sink)
        .await
        .unwrap_err();
    drop(sink);
    watcher.await.unwrap();

    assert!(matches!(
        err,
        LoopError::Cancelled {
            stage: Stage::RetrieveEvidence,
            ..
        }
    ));
    let records = h.service.get_trace(err.trace_id().unwrap()).await.unwrap();
    assert_eq!(
        stages(&records),
        vec![
            (0, Stage::Reformulate),
            (0, Stage::RetrieveDocs),
            (0, Stage::SelectDocs),
            (0, Stage::RetrieveEvidence),
        ]
    );
    assert_eq!(records[3].error.as_deref(), Some("cancelled"));
}

#[tokio::test]
async fn test_progress_reports_every_stage_and_finish() {
    let h = harness();
    seed_corpus(&h.retrieval).await;
    script_answerable(&h.oracle).await;

    let (sink, mut rx) = ProgressSink::channel();
    let outcome = h
        .service
        .run_loop_with(QUESTION, Some(&loop_config(1)), &CancellationToken::new(), &sink)
        .await
        .unwrap();
    drop(sink);

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }

    let started: Vec<Stage> = events
        .iter()
        .filter_map(|e| match e {
            ProgressEvent::StageStarted { stage, .. } => Some(*stage),
            _ => None,
        })
        .collect();
    assert_eq!(started, Stage::ALL.to_vec());
    assert_eq!(
        events.last(),
        Some(&ProgressEvent::Finished {
            trace_id: outcome.trace_id,
            loops_used: 1,
            budget_exhausted: false,
        })
    );
}

#[tokio::test]
async fn test_concurrent_questions_use_their_own_bounds() {
    let h = harness();
    seed_corpus(&h.retrieval).await;
    script_never_answerable(&h.oracle).await;

    let short = loop_config(1);
    let long = loop_config(3);
    let (a, b) = tokio::join!(
        h.service.run_loop(QUESTION, Some(&short)),
        h.service.run_loop("What drove ACME's 2022 margin?", Some(&long)),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_ne!(a.trace_id, b.trace_id);
    assert_eq!(a.loops_used, 1);
    assert_eq!(b.loops_used, 3);
    assert!(a.budget_exhausted && b.budget_exhausted);

    let traces = h.service.list_traces(10).await.unwrap();
    assert_eq!(traces.len(), 2);
}
