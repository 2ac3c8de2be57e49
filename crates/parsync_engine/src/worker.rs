//! Workers: one session, one task, files synced strictly in order.

use crate::cancel::CancelToken;
use crate::config::SyncConfig;
use crate::observer::{SyncEvent, SyncObserver};
use crate::partition::SyncTask;
use parsync_store::{FileSpec, Session, SessionFactory, StoreError};
use serde::Serialize;
use tracing::{debug, warn};

/// Lifecycle of a worker.
///
/// `Created → SessionOpening → Syncing → {Completed | FatalAborted}`;
/// `Syncing ⇄ Retrying` while one file keeps failing. A session error while
/// syncing (expired ticket, lost connection) also ends in `FatalAborted`.
/// Any non-terminal state may move to `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Spawned, nothing done yet.
    Created,
    /// Opening the worker's own session.
    SessionOpening,
    /// Syncing files.
    Syncing,
    /// Waiting before another attempt at the current file.
    Retrying,
    /// Every assigned file was handled.
    Completed,
    /// The session failed; the rest of the task was abandoned.
    FatalAborted,
    /// The run was cancelled.
    Cancelled,
}

impl WorkerState {
    /// Returns true if the worker can no longer change state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkerState::Completed | WorkerState::FatalAborted | WorkerState::Cancelled
        )
    }

    /// Returns true if moving from `self` to `next` is legal.
    pub fn can_transition_to(&self, next: WorkerState) -> bool {
        use WorkerState::*;
        matches!(
            (self, next),
            (Created, SessionOpening)
                | (Created, Cancelled)
                | (SessionOpening, Syncing)
                | (SessionOpening, FatalAborted)
                | (SessionOpening, Cancelled)
                | (Syncing, Retrying)
                | (Syncing, Completed)
                | (Syncing, FatalAborted)
                | (Syncing, Cancelled)
                | (Retrying, Syncing)
                | (Retrying, Cancelled)
        )
    }
}

/// How a worker's run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WorkerOutcome {
    /// Every file was attempted to the end of the retry policy.
    Completed,
    /// The worker's session failed; its remaining files were abandoned.
    FatalAborted {
        /// The session error.
        error: String,
    },
    /// The run was cancelled while the worker was busy.
    Cancelled,
}

/// What a worker did with its task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerReport {
    /// Worker id.
    pub worker: usize,
    /// Files assigned.
    pub assigned: usize,
    /// Files confirmed synced.
    pub synced: usize,
    /// Files never confirmed synced, in task order.
    pub unsynced: Vec<FileSpec>,
    /// How the run ended.
    pub outcome: WorkerOutcome,
}

impl WorkerReport {
    /// Report for a worker that never synced anything.
    pub fn abandoned(worker: usize, files: Vec<FileSpec>, outcome: WorkerOutcome) -> Self {
        Self {
            worker,
            assigned: files.len(),
            synced: 0,
            unsynced: files,
            outcome,
        }
    }

    /// Returns true if every assigned file was synced.
    pub fn is_complete(&self) -> bool {
        self.outcome == WorkerOutcome::Completed && self.unsynced.is_empty()
    }
}

enum FileOutcome {
    Synced,
    Abandoned,
    Cancelled,
    /// The session itself is unusable.
    Fatal(StoreError),
}

/// A worker and everything it owns: its id, its task and (once opened)
/// its dedicated session.
///
/// The factory, configuration and observer are borrowed read-only from
/// the dispatcher. `run` consumes the worker.
pub struct Worker<'a, F: SessionFactory> {
    id: usize,
    task: SyncTask,
    factory: &'a F,
    config: &'a SyncConfig,
    observer: &'a dyn SyncObserver,
    cancel: CancelToken,
    state: WorkerState,
}

impl<'a, F: SessionFactory> Worker<'a, F> {
    /// Creates a worker in the `Created` state.
    pub fn new(
        id: usize,
        task: SyncTask,
        factory: &'a F,
        config: &'a SyncConfig,
        observer: &'a dyn SyncObserver,
        cancel: CancelToken,
    ) -> Self {
        Self {
            id,
            task,
            factory,
            config,
            observer,
            cancel,
            state: WorkerState::Created,
        }
    }

    /// Worker id.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Current state.
    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// The assigned task.
    pub fn task(&self) -> &SyncTask {
        &self.task
    }

    fn transition(&mut self, next: WorkerState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal worker transition {:?} -> {:?}",
            self.state,
            next
        );
        self.state = next;
    }

    /// Opens the worker's session and syncs every assigned file in order.
    ///
    /// Never fails: a session that cannot be opened ends the worker with
    /// `FatalAborted` and every file unsynced, and a session that fails
    /// later leaves the current and remaining files unsynced. Other per-file
    /// failures are retried according to the retry policy.
    pub fn run(mut self) -> WorkerReport {
        let files = std::mem::take(&mut self.task).into_files();

        if self.cancel.is_cancelled() {
            self.transition(WorkerState::Cancelled);
            return self.cancelled(files, 0, 0);
        }

        self.transition(WorkerState::SessionOpening);
        let mut session = match self.factory.open(&self.config.connection) {
            Ok(session) => session,
            Err(e) => {
                self.transition(WorkerState::FatalAborted);
                self.observer.on_event(&SyncEvent::WorkerAborted {
                    worker: self.id,
                    error: e.to_string(),
                    skipped: files.len(),
                });
                return WorkerReport::abandoned(
                    self.id,
                    files,
                    WorkerOutcome::FatalAborted {
                        error: e.to_string(),
                    },
                );
            }
        };

        debug!(worker = self.id, workspace = session.workspace(), "session opened");
        self.transition(WorkerState::Syncing);
        self.observer.on_event(&SyncEvent::WorkerStarted {
            worker: self.id,
            files: files.len(),
        });

        let total = files.len();
        let mut synced = 0;
        let mut unsynced = Vec::new();
        let mut fatal = None;

        for (index, file) in files.iter().enumerate() {
            if self.cancel.is_cancelled() {
                self.transition(WorkerState::Cancelled);
                unsynced.extend_from_slice(&files[index..]);
                break;
            }

            self.observer.on_event(&SyncEvent::FileStarted {
                worker: self.id,
                index,
                total,
                file: file.clone(),
            });

            match self.sync_one(&mut session, file) {
                FileOutcome::Synced => {
                    synced += 1;
                    self.observer.on_event(&SyncEvent::FileSynced {
                        worker: self.id,
                        file: file.clone(),
                    });
                }
                FileOutcome::Abandoned => unsynced.push(file.clone()),
                FileOutcome::Cancelled => {
                    self.transition(WorkerState::Cancelled);
                    unsynced.extend_from_slice(&files[index..]);
                    break;
                }
                FileOutcome::Fatal(error) => {
                    self.transition(WorkerState::FatalAborted);
                    self.observer.on_event(&SyncEvent::WorkerAborted {
                        worker: self.id,
                        error: error.to_string(),
                        skipped: total - index,
                    });
                    unsynced.extend_from_slice(&files[index..]);
                    fatal = Some(error);
                    break;
                }
            }
        }

        if let Err(e) = session.close() {
            warn!(
                worker = self.id,
                workspace = session.workspace(),
                "failed to close session: {}",
                e
            );
        }

        if self.state == WorkerState::Cancelled {
            return self.cancelled(unsynced, total, synced);
        }
        if let Some(error) = fatal {
            return WorkerReport {
                worker: self.id,
                assigned: total,
                synced,
                unsynced,
                outcome: WorkerOutcome::FatalAborted {
                    error: error.to_string(),
                },
            };
        }

        self.transition(WorkerState::Completed);
        self.observer.on_event(&SyncEvent::WorkerCompleted {
            worker: self.id,
            synced,
        });
        WorkerReport {
            worker: self.id,
            assigned: total,
            synced,
            unsynced,
            outcome: WorkerOutcome::Completed,
        }
    }

    /// Syncs one file, retrying the same file until it lands or the session
    /// is lost.
    fn sync_one(&mut self, session: &mut F::Session, file: &FileSpec) -> FileOutcome {
        let config = self.config;
        let retry = &config.retry;
        let mut attempt = 0u32;

        loop {
            attempt = attempt.saturating_add(1);
            let error = match session.sync_file(file, config.force) {
                Ok(()) => return FileOutcome::Synced,
                Err(e) if e.is_fatal() => return FileOutcome::Fatal(e),
                Err(e) => e,
            };

            if !retry.allows_another(attempt) {
                self.observer.on_event(&SyncEvent::FileAbandoned {
                    worker: self.id,
                    file: file.clone(),
                    attempts: attempt,
                });
                return FileOutcome::Abandoned;
            }

            let delay = retry.delay_for_attempt(attempt);
            self.transition(WorkerState::Retrying);
            self.observer.on_event(&SyncEvent::Retry {
                worker: self.id,
                file: file.clone(),
                attempt,
                error: error.to_string(),
                delay,
            });

            if self.cancel.wait_timeout(delay) {
                return FileOutcome::Cancelled;
            }
            self.transition(WorkerState::Syncing);
        }
    }

    fn cancelled(&self, unsynced: Vec<FileSpec>, assigned: usize, synced: usize) -> WorkerReport {
        self.observer.on_event(&SyncEvent::WorkerCancelled {
            worker: self.id,
            skipped: unsynced.len(),
        });
        WorkerReport {
            worker: self.id,
            assigned: assigned.max(synced + unsynced.len()),
            synced,
            unsynced,
            outcome: WorkerOutcome::Cancelled,
        }
    }
}
