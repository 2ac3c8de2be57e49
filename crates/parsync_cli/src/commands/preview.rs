//! Preview command implementation.

use crate::error::{CliError, EXIT_OK};
use crate::OutputFormat;
use parsync_engine::{Dispatcher, SyncConfig};
use parsync_store::{FileSpec, SessionFactory};
use serde::Serialize;

/// Preview result.
#[derive(Debug, Serialize)]
pub struct PreviewResult {
    /// Workspace that was previewed.
    pub workspace: String,
    /// Number of stale files.
    pub count: usize,
    /// Stale files in sync order.
    pub files: Vec<FileSpec>,
}

/// Runs the preview command.
pub fn run<F: SessionFactory>(
    config: SyncConfig,
    factory: F,
    format: OutputFormat,
) -> Result<u8, CliError> {
    let workspace = config.connection.workspace.clone();
    let files = Dispatcher::new(config, factory)?.preview()?;
    let result = PreviewResult {
        workspace,
        count: files.len(),
        files,
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Text => {
            for file in &result.files {
                println!("{} -> {}", file, file.client_path());
            }
            println!("{} files need syncing in {}", result.count, result.workspace);
        }
    }

    Ok(EXIT_OK)
}
