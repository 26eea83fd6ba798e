//! CLI type definitions
//!
//! This module contains clap command structures that define the CLI interface.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::cli::commands::ask::AskArgs;
use crate::cli::commands::trace::TraceArgs;

#[derive(Parser, Debug)]
#[command(name = "finloop")]
#[command(
    about = "Finloop - iterative evidence curation for financial question answering",
    long_about = None
)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Directory holding config.yaml and local.yaml
    #[arg(long, global = true, default_value = ".finloop")]
    pub config_dir: PathBuf,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Answer a question over the indexed annual reports
    Ask(AskArgs),

    /// Inspect recorded question traces
    Trace(TraceArgs),
}
