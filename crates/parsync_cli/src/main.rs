//! parsync CLI
//!
//! Syncs a Perforce workspace over several sessions at once.
//!
//! # Commands
//!
//! - `sync` - Preview the stale files and fetch them in parallel (default)
//! - `preview` - List the files a sync would fetch, without fetching them
//! - `version` - Show version information

mod commands;
mod error;

use clap::{Args, Parser, Subcommand, ValueEnum};
use error::CliError;
use parsync_engine::{RetryPolicy, SyncConfig};
use parsync_store::{CommandStore, ConnectionConfig, DEFAULT_PROGRAM};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::error;
use tracing_subscriber::EnvFilter;

const DEFAULT_MAX_RETRY_DELAY_MS: u64 = 10_000;

/// Parallel Perforce workspace sync.
#[derive(Parser, Debug)]
#[command(name = "parsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,

    /// Number of parallel workers, each with its own server session
    #[arg(short = 't', long, default_value = "3")]
    threads: NonZeroUsize,

    /// Give up on a file after this many attempts (default: never give up)
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Pause before the first retry of a failing file, in milliseconds
    #[arg(long, default_value_t = 250)]
    retry_delay_ms: u64,

    /// Upper bound for the pause between retries, in milliseconds
    /// [default: 10000, or --retry-delay-ms if that is larger]
    #[arg(long)]
    max_retry_delay_ms: Option<u64>,

    /// Do not force-rewrite files the server believes are current
    #[arg(long)]
    no_force: bool,

    /// Output format for the final report
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args, Debug)]
struct ConnectionArgs {
    /// Perforce server address
    #[arg(short = 's', long, env = "P4PORT")]
    server: String,

    /// Perforce user
    #[arg(short = 'u', long, env = "P4USER")]
    user: String,

    /// Perforce password
    #[arg(short = 'p', long, env = "P4PASSWD", hide_env_values = true)]
    passwd: String,

    /// Perforce client spec (workspace) to sync
    #[arg(short = 'c', long, env = "P4CLIENT")]
    clientspec: String,

    /// Path to the p4 command-line client
    #[arg(long, default_value = DEFAULT_PROGRAM)]
    p4: PathBuf,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Commands {
    /// Preview the stale files and fetch them in parallel
    Sync,

    /// List the files a sync would fetch
    Preview,

    /// Show version information
    Version,
}

/// Output format for reports.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text
    Text,
    /// JSON on stdout
    Json,
}

impl Cli {
    fn sync_config(&self) -> SyncConfig {
        let retry = match self.max_attempts {
            Some(max) => RetryPolicy::bounded(max),
            None => RetryPolicy::unbounded(),
        }
        .with_initial_delay(Duration::from_millis(self.retry_delay_ms))
        .with_max_delay(Duration::from_millis(self.max_retry_delay_ms()));

        let connection = ConnectionConfig::new(
            self.connection.server.clone(),
            self.connection.user.clone(),
            self.connection.passwd.clone(),
            self.connection.clientspec.clone(),
        );

        SyncConfig::new(connection)
            .with_workers(self.threads.get())
            .with_retry(retry)
            .with_force(!self.no_force)
    }

    fn max_retry_delay_ms(&self) -> u64 {
        self.max_retry_delay_ms
            .unwrap_or(DEFAULT_MAX_RETRY_DELAY_MS.max(self.retry_delay_ms))
    }

    fn store(&self) -> CommandStore {
        CommandStore::new().with_program(&self.connection.p4)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging; reports go to stdout, logs to stderr.
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(&cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{}", e);
            ExitCode::from(e.exit_code())
        }
    }
}

fn run(cli: &Cli) -> Result<u8, CliError> {
    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => commands::sync::run(cli.sync_config(), cli.store(), cli.format),
        Commands::Preview => commands::preview::run(cli.sync_config(), cli.store(), cli.format),
        Commands::Version => {
            println!("parsync v{}", env!("CARGO_PKG_VERSION"));
            Ok(0)
        }
    }
}
