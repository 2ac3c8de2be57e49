//! Session abstraction for the versioned file store.

use crate::config::ConnectionConfig;
use crate::error::StoreResult;
use crate::file_spec::FileSpec;

/// An authenticated connection to the store, bound to one workspace.
///
/// This trait abstracts the store client so that the sync engine can run
/// against the `p4` command-line client, an in-memory depot, or anything
/// else that can list and fetch files. A session is owned by exactly one
/// caller at a time; implementations need not be safe for concurrent use.
pub trait Session: Send {
    /// Name of the workspace the session is bound to.
    fn workspace(&self) -> &str;

    /// Lists the files a sync of the whole workspace would update.
    ///
    /// This is a dry run: neither local nor server state may change. An
    /// empty result means the workspace is up to date.
    fn preview(&mut self) -> StoreResult<Vec<FileSpec>>;

    /// Brings one file in the workspace to the revision named by `file`.
    ///
    /// When `force` is set the file is rewritten even if the store believes
    /// the workspace already has that revision.
    fn sync_file(&mut self, file: &FileSpec, force: bool) -> StoreResult<()>;

    /// Returns the server's version string, if the store reports one.
    fn server_version(&mut self) -> StoreResult<Option<String>> {
        Ok(None)
    }

    /// Closes the session. Further calls fail with `StoreError::Closed`.
    fn close(&mut self) -> StoreResult<()>;
}

/// Opens sessions.
///
/// The factory is shared read-only by every worker, so it must be `Sync`.
pub trait SessionFactory: Send + Sync {
    /// The session type this factory produces.
    type Session: Session;

    /// Resolves the server, connects, binds the workspace and authenticates.
    fn open(&self, config: &ConnectionConfig) -> StoreResult<Self::Session>;
}

impl<F: SessionFactory + ?Sized> SessionFactory for &F {
    type Session = F::Session;

    fn open(&self, config: &ConnectionConfig) -> StoreResult<Self::Session> {
        (**self).open(config)
    }
}
