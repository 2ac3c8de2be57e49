//! # parsync engine
//!
//! Partition-and-dispatch engine for syncing one workspace over several
//! independent store sessions.
//!
//! This crate provides:
//! - Immutable run configuration with a tunable retry policy
//! - A partitioner that cuts the stale-file list into contiguous tasks
//! - Workers that each own a session and retry files until they land
//! - A dispatcher that previews, partitions, spawns and joins the workers
//! - Structured progress events through an injected observer
//! - A cancel token broadcast to every worker
//!
//! ## Architecture
//!
//! A run is strictly phased:
//! 1. Open one session, ask the store which files are stale, close it
//! 2. Split the stale list into at most `workers` contiguous tasks
//! 3. Spawn one worker thread per task, each opening its own session
//! 4. Join every worker and aggregate their reports
//!
//! ## Key Invariants
//!
//! - Tasks are disjoint and their concatenation is the preview list
//! - Each worker syncs its files strictly in order, one at a time
//! - A failing file is retried and never skipped (unless a bounded
//!   retry policy is configured)
//! - A worker that cannot open its session affects no other worker
//! - The only state shared between workers is read-only

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod cancel;
mod config;
mod dispatcher;
mod error;
mod observer;
mod partition;
mod worker;

pub use cancel::CancelToken;
pub use config::{RetryPolicy, SyncConfig, DEFAULT_WORKERS};
pub use dispatcher::{Dispatcher, RunSummary};
pub use error::{EngineError, EngineResult};
pub use observer::{RecordingObserver, SyncEvent, SyncObserver, TracingObserver};
pub use partition::{chunk_size, partition, split_contiguous, SyncTask};
pub use worker::{Worker, WorkerOutcome, WorkerReport, WorkerState};
