//! Command-line interface.
//!
//! The parser and dispatch live here; command implementations are under
//! `commands/`.

mod commands;
mod helpers;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{PathDisplayMode, PriorityMode};

#[derive(Parser)]
#[command(name = "ocrbatch")]
#[command(about = "Batch PDF OCR runner with isolated worker processes")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

/// Whether this process was started as a worker. Workers speak NDJSON on
/// stdout, so the caller must not install a log subscriber for them.
pub fn is_worker_invocation() -> bool {
    std::env::args().nth(1).as_deref() == Some("worker")
}

#[derive(Subcommand)]
enum Commands {
    /// OCR the given PDF files and directories
    Run {
        /// Files or directories to process
        paths: Vec<PathBuf>,
        /// Recurse into subdirectories
        #[arg(short, long)]
        recursive: bool,
        /// Re-OCR every page, including pages that already carry text
        #[arg(long)]
        force_ocr: bool,
        /// Use the GPU OCR plugin
        #[arg(long)]
        gpu: bool,
        /// Optimize output PDFs for size
        #[arg(long)]
        optimize_size: bool,
        /// Worker count: "auto" or a number
        #[arg(short, long)]
        workers: Option<String>,
        /// Worker process priority
        #[arg(long, value_enum)]
        priority: Option<PriorityMode>,
        /// How task paths are rendered in output
        #[arg(long, value_enum)]
        path_display: Option<PathDisplayMode>,
        /// Ignore any queue state saved by a previous session
        #[arg(long)]
        no_resume: bool,
        /// Restore a saved queue without prompting
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// List the PDFs a run would process, without queueing anything
    Scan {
        /// Files or directories to scan
        paths: Vec<PathBuf>,
        /// Recurse into subdirectories
        #[arg(short, long)]
        recursive: bool,
    },

    /// Check that the required OCR tools are installed
    Check,

    /// Internal worker entry point (reads job config from stdin)
    #[command(hide = true)]
    Worker,
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            paths,
            recursive,
            force_ocr,
            gpu,
            optimize_size,
            workers,
            priority,
            path_display,
            no_resume,
            yes,
        } => {
            commands::run::cmd_run(
                &paths,
                recursive,
                force_ocr,
                gpu,
                optimize_size,
                workers.as_deref(),
                priority,
                path_display,
                no_resume,
                yes,
                cli.verbose,
            )
            .await
        }
        Commands::Scan { paths, recursive } => commands::scan::cmd_scan(&paths, recursive).await,
        Commands::Check => commands::check::cmd_check().await,
        Commands::Worker => commands::worker::cmd_worker().await,
    }
}
