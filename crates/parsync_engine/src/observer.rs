//! Structured progress events.
//!
//! The dispatcher and workers never format output themselves. They report
//! `SyncEvent`s to an injected `SyncObserver`; `TracingObserver` turns them
//! into log records and `RecordingObserver` keeps them for inspection.

use parking_lot::Mutex;
use parsync_store::FileSpec;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Something that happened during a run.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// The preview session is being opened.
    PreviewStarted {
        /// Workspace being previewed.
        workspace: String,
    },
    /// The store reported its version on the preview session.
    ServerVersion {
        /// Version string.
        version: String,
    },
    /// The preview query returned.
    PreviewCompleted {
        /// Number of stale files.
        stale: usize,
    },
    /// The stale list was split into tasks.
    Partitioned {
        /// Size of each task, in worker order.
        chunk_sizes: Vec<usize>,
    },
    /// A worker opened its session and is about to sync.
    WorkerStarted {
        /// Worker id.
        worker: usize,
        /// Files assigned to the worker.
        files: usize,
    },
    /// A worker started on a file.
    FileStarted {
        /// Worker id.
        worker: usize,
        /// Files already done by this worker.
        index: usize,
        /// Files assigned to this worker.
        total: usize,
        /// The file.
        file: FileSpec,
    },
    /// A file was synced.
    FileSynced {
        /// Worker id.
        worker: usize,
        /// The file.
        file: FileSpec,
    },
    /// A file failed and will be attempted again after `delay`.
    Retry {
        /// Worker id.
        worker: usize,
        /// The file.
        file: FileSpec,
        /// Attempts made so far.
        attempt: u32,
        /// Why the attempt failed.
        error: String,
        /// Pause before the next attempt.
        delay: Duration,
    },
    /// A bounded retry policy gave up on a file.
    FileAbandoned {
        /// Worker id.
        worker: usize,
        /// The file.
        file: FileSpec,
        /// Attempts made.
        attempts: u32,
    },
    /// A worker finished its task.
    WorkerCompleted {
        /// Worker id.
        worker: usize,
        /// Files synced.
        synced: usize,
    },
    /// A worker could not open its session and gave up on its task.
    WorkerAborted {
        /// Worker id.
        worker: usize,
        /// Why the session failed.
        error: String,
        /// Files left unsynced.
        skipped: usize,
    },
    /// A worker stopped because the run was cancelled.
    WorkerCancelled {
        /// Worker id.
        worker: usize,
        /// Files left unsynced.
        skipped: usize,
    },
    /// Every worker has finished.
    RunCompleted {
        /// Files synced across all workers.
        synced: usize,
        /// Files never confirmed synced.
        unsynced: usize,
    },
}

/// Receives progress events.
///
/// Observers are called concurrently from every worker thread.
pub trait SyncObserver: Send + Sync {
    /// Handles one event.
    fn on_event(&self, event: &SyncEvent);
}

/// Writes events to the `tracing` subscriber.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl SyncObserver for TracingObserver {
    fn on_event(&self, event: &SyncEvent) {
        match event {
            SyncEvent::PreviewStarted { workspace } => {
                info!(%workspace, "previewing workspace")
            }
            SyncEvent::ServerVersion { version } => debug!(%version, "server version"),
            SyncEvent::PreviewCompleted { stale: 0 } => info!("workspace is up to date"),
            SyncEvent::PreviewCompleted { stale } => info!(stale, "files need syncing"),
            SyncEvent::Partitioned { chunk_sizes } => {
                info!(workers = chunk_sizes.len(), ?chunk_sizes, "spawning workers")
            }
            SyncEvent::WorkerStarted { worker, files } => {
                debug!(worker, files, "worker started")
            }
            SyncEvent::FileStarted {
                worker,
                index,
                total,
                file,
            } => info!(
                "[{}/{}] {} on worker {}",
                index,
                total,
                file.client_path(),
                worker
            ),
            SyncEvent::FileSynced { worker, file } => debug!(worker, %file, "synced"),
            SyncEvent::Retry {
                worker,
                file,
                attempt,
                error,
                delay,
            } => warn!(
                worker,
                attempt,
                ?delay,
                "retrying {}: {}",
                file.depot_path(),
                error
            ),
            SyncEvent::FileAbandoned {
                worker,
                file,
                attempts,
            } => warn!(worker, attempts, "giving up on {}", file.depot_path()),
            SyncEvent::WorkerCompleted { worker, synced } => {
                info!(worker, synced, "worker finished")
            }
            SyncEvent::WorkerAborted {
                worker,
                error,
                skipped,
            } => warn!(worker, skipped, "store error, worker exiting: {}", error),
            SyncEvent::WorkerCancelled { worker, skipped } => {
                warn!(worker, skipped, "worker cancelled")
            }
            SyncEvent::RunCompleted { synced, unsynced: 0 } => {
                info!(synced, "sync complete")
            }
            SyncEvent::RunCompleted { synced, unsynced } => {
                warn!(synced, unsynced, "sync finished with unsynced files")
            }
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<SyncEvent>>,
}

impl RecordingObserver {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every event recorded so far.
    pub fn events(&self) -> Vec<SyncEvent> {
        self.events.lock().clone()
    }

    /// Counts recorded events matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&SyncEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| predicate(e)).count()
    }

    /// Events reported by one worker, in the order that worker reported them.
    pub fn worker_events(&self, worker: usize) -> Vec<SyncEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.worker() == Some(worker))
            .cloned()
            .collect()
    }
}

impl SyncObserver for RecordingObserver {
    fn on_event(&self, event: &SyncEvent) {
        self.events.lock().push(event.clone());
    }
}

impl SyncEvent {
    /// The worker that reported the event, if it came from a worker.
    pub fn worker(&self) -> Option<usize> {
        match self {
            SyncEvent::WorkerStarted { worker, .. }
            | SyncEvent::FileStarted { worker, .. }
            | SyncEvent::FileSynced { worker, .. }
            | SyncEvent::Retry { worker, .. }
            | SyncEvent::FileAbandoned { worker, .. }
            | SyncEvent::WorkerCompleted { worker, .. }
            | SyncEvent::WorkerAborted { worker, .. }
            | SyncEvent::WorkerCancelled { worker, .. } => Some(*worker),
            _ => None,
        }
    }
}
