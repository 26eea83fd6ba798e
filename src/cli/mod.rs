//! Command-line interface.

pub mod commands;
pub mod output;
pub mod types;

pub use types::{Cli, Commands};

use crate::domain::errors::LoopError;

/// Report a failed command and exit non-zero.
///
/// Failures that happened mid-run carry the trace id of the partial trace;
/// it is surfaced in both output modes so `finloop trace show` can follow up.
pub fn handle_error(err: anyhow::Error, json_mode: bool) -> ! {
    let trace_id = err
        .chain()
        .find_map(|cause| cause.downcast_ref::<LoopError>())
        .and_then(LoopError::trace_id);

    if json_mode {
        let body = serde_json::json!({
            "error": format!("{err:#}"),
            "trace_id": trace_id,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&body).unwrap_or_default()
        );
    } else {
        eprintln!("{} {err:#}", console::style("Error:").red().bold());
        if let Some(trace_id) = trace_id {
            eprintln!("Partial trace: finloop trace show {trace_id}");
        }
    }

    std::process::exit(1)
}
