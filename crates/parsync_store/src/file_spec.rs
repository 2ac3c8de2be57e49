//! Identity of one versioned file.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One stale file reported by a preview query.
///
/// A `FileSpec` is immutable once produced: it names the depot-side path,
/// the local path inside the workspace and the revision the workspace
/// should end up holding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileSpec {
    depot_path: String,
    client_path: String,
    revision: u32,
}

impl FileSpec {
    /// Creates a new file spec.
    pub fn new(depot_path: impl Into<String>, client_path: impl Into<String>, revision: u32) -> Self {
        Self {
            depot_path: depot_path.into(),
            client_path: client_path.into(),
            revision,
        }
    }

    /// Depot-side path, e.g. `//depot/main/src/lib.c`.
    pub fn depot_path(&self) -> &str {
        &self.depot_path
    }

    /// Local path inside the workspace.
    pub fn client_path(&self) -> &str {
        &self.client_path
    }

    /// Target revision.
    pub fn revision(&self) -> u32 {
        self.revision
    }

    /// Revision-qualified depot path, as passed to the client (`path#rev`).
    pub fn revision_spec(&self) -> String {
        format!("{}#{}", self.depot_path, self.revision)
    }
}

impl fmt::Display for FileSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.depot_path, self.revision)
    }
}
