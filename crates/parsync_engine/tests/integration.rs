//! End-to-end tests for the dispatcher against an in-memory depot.

use parsync_engine::{
    CancelToken, Dispatcher, RecordingObserver, RetryPolicy, SyncConfig, SyncEvent, WorkerOutcome,
};
use parsync_store::{ConnectionConfig, MemoryDepot};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const SERVER: &str = "memory:1666";

fn depot_with(count: usize) -> MemoryDepot {
    let depot = MemoryDepot::new(SERVER);
    depot
        .add_user("builder", "s3cret")
        .add_workspace("build-ws", "/builds/ws");
    depot.submit_many("//depot/game", count);
    depot
}

fn config(workers: usize) -> SyncConfig {
    SyncConfig::new(ConnectionConfig::new(SERVER, "builder", "s3cret", "build-ws"))
        .with_workers(workers)
        .with_retry(RetryPolicy::unbounded().with_initial_delay(Duration::from_millis(1)))
}

#[test]
fn full_sync_covers_every_stale_file_once() {
    let depot = depot_with(97);
    let summary = Dispatcher::new(config(5), depot.clone())
        .unwrap()
        .run()
        .unwrap();

    assert!(summary.is_success());
    assert_eq!(summary.stale, 97);
    assert_eq!(summary.synced(), 97);
    assert_eq!(summary.unsynced(), 0);

    let log = depot.sync_log();
    assert_eq!(log.len(), 97);
    let distinct: HashSet<_> = log.iter().map(|r| r.file.depot_path().to_string()).collect();
    assert_eq!(distinct.len(), 97);
}

#[test]
fn second_run_is_a_no_op() {
    let depot = depot_with(20);
    let first = Dispatcher::new(config(3), depot.clone())
        .unwrap()
        .run()
        .unwrap();
    assert_eq!(first.synced(), 20);

    let opened = depot.opened_sessions();
    let second = Dispatcher::new(config(3), depot.clone())
        .unwrap()
        .run()
        .unwrap();

    assert_eq!(second.stale, 0);
    assert!(second.workers.is_empty());
    assert_eq!(depot.opened_sessions(), opened + 1);
}

#[test]
fn each_worker_syncs_its_task_in_order_on_its_own_thread() {
    let depot = depot_with(30);
    let observer = Arc::new(RecordingObserver::new());
    let summary = Dispatcher::new(config(3), depot.clone())
        .unwrap()
        .with_observer(observer.clone())
        .run()
        .unwrap();
    assert!(summary.is_success());

    // Group the depot's log by session; each session belongs to one worker.
    let mut by_session: HashMap<usize, Vec<String>> = HashMap::new();
    let mut threads: HashMap<usize, HashSet<thread::ThreadId>> = HashMap::new();
    for record in depot.sync_log() {
        by_session
            .entry(record.session)
            .or_default()
            .push(record.file.depot_path().to_string());
        threads.entry(record.session).or_default().insert(record.thread);
    }
    assert_eq!(by_session.len(), 3);
    assert!(threads.values().all(|t| t.len() == 1));

    let mut sequences: Vec<Vec<String>> = by_session.into_values().collect();
    sequences.sort();
    let expected: Vec<Vec<String>> = (0..3)
        .map(|w| {
            (w * 10..w * 10 + 10)
                .map(|i| format!("//depot/game/file{:04}", i))
                .collect()
        })
        .collect();
    assert_eq!(sequences, expected);

    // Per-worker progress is reported with a running index.
    for worker in 0..3 {
        let indices: Vec<usize> = observer
            .worker_events(worker)
            .iter()
            .filter_map(|e| match e {
                SyncEvent::FileStarted { index, total, .. } => {
                    assert_eq!(*total, 10);
                    Some(*index)
                }
                _ => None,
            })
            .collect();
        assert_eq!(indices, (0..10).collect::<Vec<_>>());
    }
}

#[test]
fn transient_failure_is_retried_before_moving_on() {
    let depot = depot_with(100);
    depot.fail_sync("//depot/game/file0042", 2);
    let observer = Arc::new(RecordingObserver::new());

    let summary = Dispatcher::new(config(1), depot.clone())
        .unwrap()
        .with_observer(observer.clone())
        .run()
        .unwrap();

    assert!(summary.is_success());
    assert_eq!(depot.sync_attempts("//depot/game/file0042"), 3);

    let retries: Vec<_> = observer
        .events()
        .into_iter()
        .filter_map(|e| match e {
            SyncEvent::Retry { file, attempt, .. } => Some((file.depot_path().to_string(), attempt)),
            _ => None,
        })
        .collect();
    assert_eq!(
        retries,
        vec![
            ("//depot/game/file0042".to_string(), 1),
            ("//depot/game/file0042".to_string(), 2),
        ]
    );

    let order: Vec<_> = depot
        .sync_log()
        .into_iter()
        .map(|r| r.file.depot_path().to_string())
        .collect();
    let pos42 = order.iter().position(|p| p == "//depot/game/file0042").unwrap();
    assert_eq!(order[pos42 + 1], "//depot/game/file0043");
}

#[test]
fn fatal_session_error_is_isolated_to_one_worker() {
    let depot = depot_with(40);
    // Open #0 is the preview; #2 is whichever worker connects second.
    depot.refuse_open(2);

    let summary = Dispatcher::new(config(4), depot.clone())
        .unwrap()
        .run()
        .unwrap();

    assert_eq!(summary.workers.len(), 4);
    assert_eq!(summary.aborted_workers(), 1);
    assert_eq!(summary.synced(), 30);
    assert_eq!(summary.unsynced(), 10);
    assert!(!summary.is_success());

    let aborted = summary
        .workers
        .iter()
        .find(|w| matches!(w.outcome, WorkerOutcome::FatalAborted { .. }))
        .unwrap();
    assert_eq!(aborted.synced, 0);
    assert_eq!(aborted.unsynced.len(), aborted.assigned);

    // Only the aborted worker's files remain stale.
    let rerun = Dispatcher::new(config(4), depot.clone())
        .unwrap()
        .preview()
        .unwrap();
    assert_eq!(rerun, aborted.unsynced);
}

#[test]
fn session_expiring_mid_task_aborts_only_that_worker() {
    let depot = depot_with(30);
    // Open #0 is the preview; #2 is whichever worker connects second.
    depot.expire_session_after(2, 4);
    let observer = Arc::new(RecordingObserver::new());

    let summary = Dispatcher::new(config(3), depot.clone())
        .unwrap()
        .with_observer(observer.clone())
        .run()
        .unwrap();

    assert_eq!(summary.aborted_workers(), 1);
    assert_eq!(summary.synced(), 24);
    assert_eq!(summary.unsynced(), 6);
    assert!(!summary.is_success());

    let aborted = summary
        .workers
        .iter()
        .find(|w| matches!(w.outcome, WorkerOutcome::FatalAborted { .. }))
        .unwrap();
    assert_eq!(aborted.synced, 4);
    assert_eq!(aborted.unsynced.len(), 6);
    assert!(summary
        .workers
        .iter()
        .filter(|w| w.worker != aborted.worker)
        .all(|w| w.is_complete()));

    assert_eq!(observer.count(|e| matches!(e, SyncEvent::Retry { .. })), 0);
    assert_eq!(
        observer.count(|e| matches!(e, SyncEvent::WorkerAborted { skipped: 6, .. })),
        1
    );
    assert_eq!(depot.live_sessions(), 0);

    let rerun = Dispatcher::new(config(3), depot.clone())
        .unwrap()
        .preview()
        .unwrap();
    assert_eq!(rerun, aborted.unsynced);
}

#[test]
fn workers_run_concurrently_with_separate_sessions() {
    let depot = depot_with(16);
    depot.set_sync_latency(Duration::from_millis(10));

    let summary = Dispatcher::new(config(4), depot.clone())
        .unwrap()
        .run()
        .unwrap();

    assert!(summary.is_success());
    assert!(depot.peak_sessions() >= 2);
    assert!(depot.peak_sessions() <= 4);
    assert_eq!(depot.live_sessions(), 0);
}

#[test]
fn more_workers_than_files_spawns_one_worker_per_file() {
    let depot = depot_with(4);
    let summary = Dispatcher::new(config(10), depot.clone())
        .unwrap()
        .run()
        .unwrap();

    assert_eq!(summary.workers.len(), 4);
    assert!(summary.workers.iter().all(|w| w.assigned == 1));
    assert_eq!(depot.opened_sessions(), 5);
}

#[test]
fn cancel_stops_workers_stuck_on_a_failing_file() {
    let depot = depot_with(8);
    depot.fail_sync("//depot/game/file0000", u32::MAX);
    let cancel = CancelToken::new();
    let observer = Arc::new(RecordingObserver::new());

    let dispatcher = Dispatcher::new(
        config(2).with_retry(
            RetryPolicy::unbounded()
                .with_initial_delay(Duration::from_secs(30))
                .with_max_delay(Duration::from_secs(30)),
        ),
        depot.clone(),
    )
    .unwrap()
    .with_observer(observer.clone())
    .with_cancel_token(cancel.clone());

    let summary = thread::scope(|scope| {
        let run = scope.spawn(|| dispatcher.run());
        while observer.count(|e| matches!(e, SyncEvent::Retry { .. })) == 0 {
            thread::sleep(Duration::from_millis(1));
        }
        cancel.cancel();
        run.join().unwrap()
    })
    .unwrap();

    assert!(summary.was_cancelled());
    assert!(summary.unsynced() >= 4);
    assert_eq!(summary.synced() + summary.unsynced(), 8);
    assert_eq!(depot.live_sessions(), 0);
}

#[test]
fn bad_credential_fails_the_preview() {
    let depot = depot_with(3);
    let mut config = config(2);
    config.connection.credential = "wrong".into();

    let err = Dispatcher::new(config, depot.clone())
        .unwrap()
        .run()
        .unwrap_err();
    assert!(err.is_connection_failure());
    assert!(depot.sync_log().is_empty());
}
