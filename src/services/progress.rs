//! Coarse progress notifications for hosts that poll or render status.

use serde::Serialize;
use tokio::sync::mpsc;

use crate::domain::models::{Stage, TraceId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    StageStarted {
        trace_id: TraceId,
        stage: Stage,
        loop_index: u32,
        max_loops: u32,
    },
    Finished {
        trace_id: TraceId,
        loops_used: u32,
        budget_exhausted: bool,
    },
    Failed {
        trace_id: TraceId,
        stage: Stage,
        error: String,
    },
}

/// Non-blocking sender half. A disabled sink drops every event.
#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
    tx: Option<mpsc::UnboundedSender<ProgressEvent>>,
}

impl ProgressSink {
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Send `event`; a closed receiver is ignored.
    pub fn emit(&self, event: ProgressEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}
