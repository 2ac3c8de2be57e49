//! CLI error type and exit codes.

use parsync_engine::EngineError;
use thiserror::Error;

/// Exit code when every stale file was synced.
pub const EXIT_OK: u8 = 0;
/// Exit code when files were left unsynced or the run failed.
pub const EXIT_FAILURE: u8 = 1;
/// Exit code for invalid arguments (matches clap's usage errors).
pub const EXIT_USAGE: u8 = 2;
/// Exit code after an interrupt.
pub const EXIT_INTERRUPTED: u8 = 130;

/// Errors that end the CLI.
#[derive(Error, Debug)]
pub enum CliError {
    /// The engine failed.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The interrupt handler could not be installed.
    #[error("cannot install interrupt handler: {0}")]
    Signal(#[from] ctrlc::Error),

    /// The report could not be serialized.
    #[error("cannot write report: {0}")]
    Output(#[from] serde_json::Error),
}

impl CliError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            CliError::Engine(EngineError::InvalidConfig(_)) => EXIT_USAGE,
            CliError::Engine(EngineError::Cancelled) => EXIT_INTERRUPTED,
            _ => EXIT_FAILURE,
        }
    }
}
