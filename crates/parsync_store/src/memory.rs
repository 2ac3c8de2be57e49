//! In-memory versioned file store.
//!
//! `MemoryDepot` keeps head revisions, per-workspace "have" lists and user
//! credentials in memory. It implements `SessionFactory`, so the sync engine
//! can be exercised end to end without a server. Faults can be injected:
//! transient per-file sync failures, refused session opens, sessions that
//! expire part way through, and an unreachable server.

use crate::config::ConnectionConfig;
use crate::error::{StoreError, StoreResult};
use crate::file_spec::FileSpec;
use crate::session::{Session, SessionFactory};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

/// One successful sync recorded by the depot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRecord {
    /// Ordinal of the session that performed the sync (order of `open`).
    pub session: usize,
    /// Thread the sync ran on.
    pub thread: ThreadId,
    /// The file that was synced.
    pub file: FileSpec,
}

#[derive(Debug, Default)]
struct DepotState {
    server: String,
    users: HashMap<String, String>,
    /// depot path -> head revision
    head: BTreeMap<String, u32>,
    /// workspace -> root directory
    roots: HashMap<String, String>,
    /// workspace -> (depot path -> revision held locally)
    have: HashMap<String, HashMap<String, u32>>,
    /// depot path -> remaining transient failures
    sync_failures: HashMap<String, u32>,
    /// depot path -> failed + successful sync attempts
    attempts: HashMap<String, u32>,
    refused_opens: BTreeSet<usize>,
    /// session ordinal -> successful syncs before its ticket expires
    expiring: HashMap<usize, usize>,
    unreachable: bool,
    sync_latency: Duration,
    opened: usize,
    live: usize,
    peak_live: usize,
    log: Vec<SyncRecord>,
}

/// An in-memory depot shared by every session opened from it.
///
/// Cloning a `MemoryDepot` yields another handle to the same depot.
#[derive(Debug, Clone, Default)]
pub struct MemoryDepot {
    state: Arc<Mutex<DepotState>>,
}

impl MemoryDepot {
    /// Creates an empty depot answering on `server`.
    pub fn new(server: impl Into<String>) -> Self {
        let depot = Self::default();
        depot.state.lock().server = server.into();
        depot
    }

    /// Registers a user and password.
    pub fn add_user(&self, user: impl Into<String>, password: impl Into<String>) -> &Self {
        self.state.lock().users.insert(user.into(), password.into());
        self
    }

    /// Registers a workspace rooted at `root`.
    pub fn add_workspace(&self, name: impl Into<String>, root: impl Into<String>) -> &Self {
        let name = name.into();
        let mut state = self.state.lock();
        state.roots.insert(name.clone(), root.into());
        state.have.entry(name).or_default();
        self
    }

    /// Submits a new revision of `depot_path`, returning the new head revision.
    pub fn submit(&self, depot_path: impl Into<String>) -> u32 {
        let mut state = self.state.lock();
        let rev = state.head.entry(depot_path.into()).or_insert(0);
        *rev += 1;
        *rev
    }

    /// Submits `count` files named `{prefix}/file{index:04}`.
    pub fn submit_many(&self, prefix: &str, count: usize) {
        for i in 0..count {
            self.submit(format!("{}/file{:04}", prefix, i));
        }
    }

    /// Makes the next `times` syncs of `depot_path` fail with a transient error.
    pub fn fail_sync(&self, depot_path: impl Into<String>, times: u32) {
        self.state
            .lock()
            .sync_failures
            .insert(depot_path.into(), times);
    }

    /// Makes the `ordinal`-th call to `open` (0-based) fail with a connect error.
    pub fn refuse_open(&self, ordinal: usize) {
        self.state.lock().refused_opens.insert(ordinal);
    }

    /// Expires the `ordinal`-th session (0-based, as in `refuse_open`) after
    /// it has synced `syncs` files; every later sync on it fails with an
    /// auth error.
    pub fn expire_session_after(&self, ordinal: usize, syncs: usize) {
        self.state.lock().expiring.insert(ordinal, syncs);
    }

    /// Makes every subsequent `open` fail with a connect error.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().unreachable = unreachable;
    }

    /// Makes every sync take at least `latency`.
    pub fn set_sync_latency(&self, latency: Duration) {
        self.state.lock().sync_latency = latency;
    }

    /// Revision of `depot_path` held by `workspace`, if any.
    pub fn have_revision(&self, workspace: &str, depot_path: &str) -> Option<u32> {
        self.state
            .lock()
            .have
            .get(workspace)
            .and_then(|have| have.get(depot_path).copied())
    }

    /// Number of sync attempts made for `depot_path`, failed ones included.
    pub fn sync_attempts(&self, depot_path: &str) -> u32 {
        self.state
            .lock()
            .attempts
            .get(depot_path)
            .copied()
            .unwrap_or(0)
    }

    /// Every successful sync, in the order it happened.
    pub fn sync_log(&self) -> Vec<SyncRecord> {
        self.state.lock().log.clone()
    }

    /// Number of `open` calls made so far, failed ones included.
    pub fn opened_sessions(&self) -> usize {
        self.state.lock().opened
    }

    /// Sessions opened and not yet closed or dropped.
    pub fn live_sessions(&self) -> usize {
        self.state.lock().live
    }

    /// Highest number of sessions that were live at the same time.
    pub fn peak_sessions(&self) -> usize {
        self.state.lock().peak_live
    }

    fn client_path(root: &str, depot_path: &str) -> String {
        // Drop the leading `//depot` component and re-root under the workspace.
        let relative = depot_path
            .trim_start_matches("//")
            .split_once('/')
            .map(|(_, rest)| rest)
            .unwrap_or(depot_path);
        format!("{}/{}", root.trim_end_matches('/'), relative)
    }
}

impl SessionFactory for MemoryDepot {
    type Session = MemorySession;

    fn open(&self, config: &ConnectionConfig) -> StoreResult<MemorySession> {
        let mut state = self.state.lock();
        let ordinal = state.opened;
        state.opened += 1;

        if state.unreachable || state.server != config.server {
            return Err(StoreError::connect(&config.server, "connection refused"));
        }
        if state.refused_opens.contains(&ordinal) {
            return Err(StoreError::connect(&config.server, "connection reset by peer"));
        }
        match state.users.get(&config.user) {
            Some(password) if password == config.credential.expose() => {}
            _ => return Err(StoreError::auth(&config.user, "password invalid")),
        }
        if !state.roots.contains_key(&config.workspace) {
            return Err(StoreError::connect(
                &config.server,
                format!("workspace '{}' unknown", config.workspace),
            ));
        }

        state.live += 1;
        state.peak_live = state.peak_live.max(state.live);

        Ok(MemorySession {
            depot: self.clone(),
            user: config.user.clone(),
            workspace: config.workspace.clone(),
            ordinal,
            synced: 0,
            open: true,
        })
    }
}

/// A session on a `MemoryDepot`.
#[derive(Debug)]
pub struct MemorySession {
    depot: MemoryDepot,
    user: String,
    workspace: String,
    ordinal: usize,
    synced: usize,
    open: bool,
}

impl MemorySession {
    fn ensure_open(&self) -> StoreResult<()> {
        if self.open {
            Ok(())
        } else {
            Err(StoreError::Closed)
        }
    }

    fn release(&mut self) {
        if self.open {
            self.open = false;
            self.depot.state.lock().live -= 1;
        }
    }
}

impl Session for MemorySession {
    fn workspace(&self) -> &str {
        &self.workspace
    }

    fn preview(&mut self) -> StoreResult<Vec<FileSpec>> {
        self.ensure_open()?;
        let state = self.depot.state.lock();
        let root = state
            .roots
            .get(&self.workspace)
            .ok_or_else(|| StoreError::Query(format!("workspace '{}' unknown", self.workspace)))?;
        let have = state.have.get(&self.workspace);

        Ok(state
            .head
            .iter()
            .filter(|(path, head)| have.and_then(|h| h.get(*path)) != Some(*head))
            .map(|(path, head)| FileSpec::new(path.clone(), MemoryDepot::client_path(root, path), *head))
            .collect())
    }

    fn sync_file(&mut self, file: &FileSpec, force: bool) -> StoreResult<()> {
        self.ensure_open()?;

        let latency = {
            let mut state = self.depot.state.lock();
            *state
                .attempts
                .entry(file.depot_path().to_string())
                .or_insert(0) += 1;

            if state
                .expiring
                .get(&self.ordinal)
                .is_some_and(|limit| self.synced >= *limit)
            {
                return Err(StoreError::auth(
                    &self.user,
                    "Your session has expired, please login again.",
                ));
            }
            if let Some(remaining) = state.sync_failures.get_mut(file.depot_path()) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(StoreError::sync(file.depot_path(), "transfer interrupted"));
                }
            }
            if !state.head.contains_key(file.depot_path()) {
                return Err(StoreError::sync(file.depot_path(), "no such file"));
            }
            state.sync_latency
        };

        if !latency.is_zero() {
            thread::sleep(latency);
        }

        self.synced += 1;
        let mut state = self.depot.state.lock();
        let have = state.have.entry(self.workspace.clone()).or_default();
        if !force && have.get(file.depot_path()) == Some(&file.revision()) {
            return Ok(());
        }
        have.insert(file.depot_path().to_string(), file.revision());
        state.log.push(SyncRecord {
            session: self.ordinal,
            thread: thread::current().id(),
            file: file.clone(),
        });
        Ok(())
    }

    fn server_version(&mut self) -> StoreResult<Option<String>> {
        self.ensure_open()?;
        Ok(Some(format!("MemoryDepot/{}", env!("CARGO_PKG_VERSION"))))
    }

    fn close(&mut self) -> StoreResult<()> {
        self.ensure_open()?;
        self.release();
        Ok(())
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.release();
    }
}
