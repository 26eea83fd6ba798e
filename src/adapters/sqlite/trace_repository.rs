//! SQLite implementation of the TraceStore trait.

use async_trait::async_trait;
use sqlx::SqlitePool;

use super::parse_datetime;
use crate::domain::errors::TraceError;
use crate::domain::models::{Stage, StageRecord, TraceId, TraceSummary};
use crate::domain::ports::TraceStore;

/// SQLite-backed trace store.
#[derive(Clone)]
pub struct SqliteTraceStore {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct StageRecordRow {
    loop_index: i64,
    stage: String,
    input_snapshot: String,
    output_snapshot: String,
    error: Option<String>,
    recorded_at: String,
}

#[derive(sqlx::FromRow)]
struct TraceSummaryRow {
    trace_id: String,
    question: Option<String>,
    started_at: String,
    last_stage: String,
    record_count: i64,
    failed: i64,
}

fn parse_stage(s: &str) -> Result<Stage, TraceError> {
    s.parse().map_err(TraceError::Serialization)
}

impl TryFrom<StageRecordRow> for StageRecord {
    type Error = TraceError;

    fn try_from(row: StageRecordRow) -> Result<Self, Self::Error> {
        Ok(StageRecord {
            stage: parse_stage(&row.stage)?,
            loop_index: u32::try_from(row.loop_index)
                .map_err(|e| TraceError::Serialization(e.to_string()))?,
            input_snapshot: serde_json::from_str(&row.input_snapshot)?,
            output_snapshot: serde_json::from_str(&row.output_snapshot)?,
            timestamp: parse_datetime(&row.recorded_at)?,
            error: row.error,
        })
    }
}

impl TryFrom<TraceSummaryRow> for TraceSummary {
    type Error = TraceError;

    fn try_from(row: TraceSummaryRow) -> Result<Self, Self::Error> {
        Ok(TraceSummary {
            trace_id: row
                .trace_id
                .parse()
                .map_err(|e: uuid::Error| TraceError::Serialization(e.to_string()))?,
            question: row.question,
            started_at: parse_datetime(&row.started_at)?,
            last_stage: parse_stage(&row.last_stage)?,
            record_count: usize::try_from(row.record_count)
                .map_err(|e| TraceError::Serialization(e.to_string()))?,
            failed: row.failed != 0,
        })
    }
}

impl SqliteTraceStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TraceStore for SqliteTraceStore {
    async fn append(&self, trace_id: TraceId, record: &StageRecord) -> Result<(), TraceError> {
        let input_json = serde_json::to_string(&record.input_snapshot)?;
        let output_json = serde_json::to_string(&record.output_snapshot)?;

        sqlx::query(
            r#"
            INSERT INTO stage_records
                (trace_id, loop_index, stage, input_snapshot, output_snapshot, error, recorded_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (trace_id, loop_index, stage) DO UPDATE SET
                input_snapshot = excluded.input_snapshot,
                output_snapshot = excluded.output_snapshot,
                error = excluded.error,
                recorded_at = excluded.recorded_at
            "#,
        )
        .bind(trace_id.to_string())
        .bind(i64::from(record.loop_index))
        .bind(record.stage.as_str())
        .bind(input_json)
        .bind(output_json)
        .bind(record.error.as_deref())
        .bind(record.timestamp.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn read(&self, trace_id: TraceId) -> Result<Vec<StageRecord>, TraceError> {
        let rows: Vec<StageRecordRow> = sqlx::query_as(
            r#"
            SELECT loop_index, stage, input_snapshot, output_snapshot, error, recorded_at
            FROM stage_records
            WHERE trace_id = ?
            ORDER BY seq ASC
            "#,
        )
        .bind(trace_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Err(TraceError::NotFound(trace_id));
        }
        rows.into_iter().map(StageRecord::try_from).collect()
    }

    async fn list(&self, limit: usize) -> Result<Vec<TraceSummary>, TraceError> {
        let rows: Vec<TraceSummaryRow> = sqlx::query_as(
            r#"
            SELECT
                s.trace_id AS trace_id,
                (SELECT json_extract(f.input_snapshot, '$.question') FROM stage_records f
                    WHERE f.trace_id = s.trace_id ORDER BY f.seq ASC LIMIT 1) AS question,
                (SELECT f.recorded_at FROM stage_records f
                    WHERE f.trace_id = s.trace_id ORDER BY f.seq ASC LIMIT 1) AS started_at,
                (SELECT l.stage FROM stage_records l
                    WHERE l.trace_id = s.trace_id ORDER BY l.seq DESC LIMIT 1) AS last_stage,
                COUNT(*) AS record_count,
                MAX(CASE WHEN s.error IS NULL THEN 0 ELSE 1 END) AS failed
            FROM stage_records s
            GROUP BY s.trace_id
            ORDER BY MAX(s.seq) DESC
            LIMIT ?
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TraceSummary::try_from).collect()
    }
}
