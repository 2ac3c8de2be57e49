//! Preview, partition, spawn, join.

use crate::cancel::CancelToken;
use crate::config::SyncConfig;
use crate::error::{EngineError, EngineResult};
use crate::observer::{SyncEvent, SyncObserver, TracingObserver};
use crate::partition::{partition, SyncTask};
use crate::worker::{Worker, WorkerOutcome, WorkerReport};
use parsync_store::{FileSpec, Session, SessionFactory};
use serde::Serialize;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Aggregate outcome of a run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    /// Files the preview reported stale.
    pub stale: usize,
    /// One report per spawned worker, in worker order.
    pub workers: Vec<WorkerReport>,
    /// Wall-clock time of the run.
    #[serde(with = "duration_millis")]
    pub elapsed: Duration,
}

impl RunSummary {
    /// Files confirmed synced across all workers.
    pub fn synced(&self) -> usize {
        self.workers.iter().map(|w| w.synced).sum()
    }

    /// Files never confirmed synced across all workers.
    pub fn unsynced(&self) -> usize {
        self.workers.iter().map(|w| w.unsynced.len()).sum()
    }

    /// Every file never confirmed synced.
    pub fn unsynced_files(&self) -> impl Iterator<Item = &FileSpec> {
        self.workers.iter().flat_map(|w| w.unsynced.iter())
    }

    /// Workers whose session failed.
    pub fn aborted_workers(&self) -> usize {
        self.workers
            .iter()
            .filter(|w| matches!(w.outcome, WorkerOutcome::FatalAborted { .. }))
            .count()
    }

    /// Returns true if any worker stopped because of cancellation.
    pub fn was_cancelled(&self) -> bool {
        self.workers
            .iter()
            .any(|w| w.outcome == WorkerOutcome::Cancelled)
    }

    /// Returns true if every stale file was synced.
    pub fn is_success(&self) -> bool {
        self.workers.iter().all(WorkerReport::is_complete)
    }
}

mod duration_millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis().min(u64::MAX as u128) as u64)
    }
}

/// Runs a whole sync: one preview, then one worker per task.
///
/// # Example
///
/// ```
/// use parsync_engine::{Dispatcher, SyncConfig};
/// use parsync_store::{ConnectionConfig, MemoryDepot};
///
/// let depot = MemoryDepot::new("memory:1666");
/// depot.add_user("alice", "secret").add_workspace("ws", "/ws");
/// depot.submit_many("//depot/src", 10);
///
/// let config = SyncConfig::new(ConnectionConfig::new("memory:1666", "alice", "secret", "ws"))
///     .with_workers(4);
/// let summary = Dispatcher::new(config, depot).unwrap().run().unwrap();
///
/// assert_eq!(summary.synced(), 10);
/// assert!(summary.is_success());
/// ```
pub struct Dispatcher<F: SessionFactory> {
    config: SyncConfig,
    factory: F,
    observer: Arc<dyn SyncObserver>,
    cancel: CancelToken,
}

impl<F: SessionFactory> Dispatcher<F> {
    /// Creates a dispatcher after validating `config`.
    pub fn new(config: SyncConfig, factory: F) -> EngineResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            factory,
            observer: Arc::new(TracingObserver),
            cancel: CancelToken::new(),
        })
    }

    /// Sets the observer that receives progress events.
    pub fn with_observer(mut self, observer: Arc<dyn SyncObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Uses an externally owned cancel token.
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Returns a clone of the cancel token broadcast to every worker.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Returns the run configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Lists the stale files on a short-lived session of its own.
    pub fn preview(&self) -> EngineResult<Vec<FileSpec>> {
        self.observer.on_event(&SyncEvent::PreviewStarted {
            workspace: self.config.connection.workspace.clone(),
        });

        let mut session = self
            .factory
            .open(&self.config.connection)
            .map_err(EngineError::Preview)?;

        match session.server_version() {
            Ok(Some(version)) => self.observer.on_event(&SyncEvent::ServerVersion { version }),
            Ok(None) => {}
            Err(e) => debug!("server version unavailable: {}", e),
        }

        let files = session.preview().map_err(EngineError::Preview);
        if let Err(e) = session.close() {
            warn!("failed to close preview session: {}", e);
        }
        let files = files?;

        self.observer.on_event(&SyncEvent::PreviewCompleted { stale: files.len() });
        Ok(files)
    }

    /// Previews, partitions, runs every worker and waits for all of them.
    ///
    /// Fails only if the preview fails or the run is cancelled before any
    /// worker starts; worker failures are reported in the summary.
    pub fn run(&self) -> EngineResult<RunSummary> {
        let start = Instant::now();
        self.cancel.check()?;

        let files = self.preview()?;
        let stale = files.len();
        if files.is_empty() {
            self.observer.on_event(&SyncEvent::RunCompleted {
                synced: 0,
                unsynced: 0,
            });
            return Ok(RunSummary {
                stale,
                workers: Vec::new(),
                elapsed: start.elapsed(),
            });
        }

        self.cancel.check()?;
        let tasks = partition(files, self.config.workers);
        self.observer.on_event(&SyncEvent::Partitioned {
            chunk_sizes: tasks.iter().map(SyncTask::len).collect(),
        });

        let workers = self.run_workers(tasks);
        let summary = RunSummary {
            stale,
            workers,
            elapsed: start.elapsed(),
        };
        self.observer.on_event(&SyncEvent::RunCompleted {
            synced: summary.synced(),
            unsynced: summary.unsynced(),
        });
        Ok(summary)
    }

    /// Spawns one thread per task and joins them all.
    fn run_workers(&self, tasks: Vec<SyncTask>) -> Vec<WorkerReport> {
        let observer: &dyn SyncObserver = self.observer.as_ref();

        thread::scope(|scope| {
            let mut running = Vec::with_capacity(tasks.len());
            let mut reports = Vec::with_capacity(tasks.len());

            for (id, task) in tasks.into_iter().enumerate() {
                // Kept so a worker that never reports can still be accounted for.
                let assigned = task.files().to_vec();
                let worker = Worker::new(
                    id,
                    task,
                    &self.factory,
                    &self.config,
                    observer,
                    self.cancel.clone(),
                );

                let spawned = thread::Builder::new()
                    .name(format!("parsync-worker-{}", id))
                    .spawn_scoped(scope, move || worker.run());
                match spawned {
                    Ok(handle) => running.push((id, assigned, handle)),
                    Err(e) => {
                        error!(worker = id, "failed to spawn worker: {}", e);
                        reports.push(WorkerReport::abandoned(
                            id,
                            assigned,
                            WorkerOutcome::FatalAborted {
                                error: format!("failed to spawn worker: {}", e),
                            },
                        ));
                    }
                }
            }

            for (id, assigned, handle) in running {
                match handle.join() {
                    Ok(report) => reports.push(report),
                    Err(_) => {
                        error!(worker = id, "worker panicked");
                        reports.push(WorkerReport::abandoned(
                            id,
                            assigned,
                            WorkerOutcome::FatalAborted {
                                error: "worker panicked".into(),
                            },
                        ));
                    }
                }
            }

            reports.sort_by_key(|r| r.worker);
            reports
        })
    }
}
