//! Sync command implementation.

use crate::error::{CliError, EXIT_FAILURE, EXIT_INTERRUPTED, EXIT_OK};
use crate::OutputFormat;
use parsync_engine::{Dispatcher, RunSummary, SyncConfig, WorkerOutcome};
use parsync_store::SessionFactory;
use std::fmt::Write;

/// Runs the sync command.
pub fn run<F: SessionFactory>(
    config: SyncConfig,
    factory: F,
    format: OutputFormat,
) -> Result<u8, CliError> {
    let dispatcher = Dispatcher::new(config, factory)?;

    // First Ctrl-C asks every worker to stop; workers are still joined.
    let cancel = dispatcher.cancel_token();
    ctrlc::set_handler(move || cancel.cancel())?;

    execute(&dispatcher, format)
}

/// Runs a prepared dispatcher and prints its report.
pub fn execute<F: SessionFactory>(
    dispatcher: &Dispatcher<F>,
    format: OutputFormat,
) -> Result<u8, CliError> {
    let summary = dispatcher.run()?;

    match format {
        OutputFormat::Text => print!("{}", render_text(&summary)),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
    }

    Ok(exit_code(&summary))
}

/// Exit code for a finished run.
pub fn exit_code(summary: &RunSummary) -> u8 {
    if summary.was_cancelled() {
        EXIT_INTERRUPTED
    } else if summary.is_success() {
        EXIT_OK
    } else {
        EXIT_FAILURE
    }
}

/// Human-readable report.
pub fn render_text(summary: &RunSummary) -> String {
    let mut out = String::new();

    if summary.stale == 0 {
        let _ = writeln!(out, "Workspace is up to date");
        return out;
    }

    let _ = writeln!(
        out,
        "Synced {} of {} files with {} workers in {:.1}s",
        summary.synced(),
        summary.stale,
        summary.workers.len(),
        summary.elapsed.as_secs_f64()
    );

    for report in &summary.workers {
        match &report.outcome {
            WorkerOutcome::Completed if report.unsynced.is_empty() => {}
            WorkerOutcome::Completed => {
                let _ = writeln!(
                    out,
                    "  worker {}: gave up on {} files",
                    report.worker,
                    report.unsynced.len()
                );
            }
            WorkerOutcome::FatalAborted { error } => {
                let _ = writeln!(
                    out,
                    "  worker {}: {} ({} files not synced)",
                    report.worker,
                    error,
                    report.unsynced.len()
                );
            }
            WorkerOutcome::Cancelled => {
                let _ = writeln!(
                    out,
                    "  worker {}: cancelled ({} files not synced)",
                    report.worker,
                    report.unsynced.len()
                );
            }
        }
    }

    if summary.unsynced() > 0 {
        let _ = writeln!(out, "{} files were not synced:", summary.unsynced());
        for file in summary.unsynced_files() {
            let _ = writeln!(out, "  {}", file);
        }
    }
    out
}
