//! Error types for store sessions.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while talking to the versioned file store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The server could not be reached or the workspace could not be bound.
    #[error("cannot connect to {server}: {message}")]
    Connect {
        /// Server address.
        server: String,
        /// Error message.
        message: String,
    },

    /// The server rejected the credential.
    #[error("authentication failed for user {user}: {message}")]
    Auth {
        /// User name.
        user: String,
        /// Error message.
        message: String,
    },

    /// A single file could not be synced.
    #[error("sync of {path} failed: {message}")]
    Sync {
        /// Depot path of the file.
        path: String,
        /// Error message.
        message: String,
    },

    /// A read-only query against the store failed.
    #[error("store query failed: {0}")]
    Query(String),

    /// The client executable could not be started.
    #[error("cannot run {program}: {source}")]
    Command {
        /// Program that failed to start.
        program: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The client produced output that could not be understood.
    #[error("unexpected client output: {0}")]
    Parse(String),

    /// The session was used after it was closed.
    #[error("session is closed")]
    Closed,
}

impl StoreError {
    /// Creates a connect error.
    pub fn connect(server: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connect {
            server: server.into(),
            message: message.into(),
        }
    }

    /// Creates an authentication error.
    pub fn auth(user: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Auth {
            user: user.into(),
            message: message.into(),
        }
    }

    /// Creates a per-file sync error.
    pub fn sync(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Sync {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Returns true if this error ends the session it was raised on.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StoreError::Connect { .. }
                | StoreError::Auth { .. }
                | StoreError::Command { .. }
                | StoreError::Closed
        )
    }

    /// Returns true if the failed operation can be attempted again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Sync { .. } | StoreError::Query(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(StoreError::connect("ssl:p4:1666", "refused").is_fatal());
        assert!(StoreError::auth("bob", "bad password").is_fatal());
        assert!(StoreError::Closed.is_fatal());
        assert!(!StoreError::sync("//depot/a", "timeout").is_fatal());
        assert!(StoreError::sync("//depot/a", "timeout").is_retryable());
        assert!(!StoreError::auth("bob", "bad password").is_retryable());
    }

    #[test]
    fn error_display() {
        let err = StoreError::sync("//depot/main/a.c", "file locked");
        let msg = err.to_string();
        assert!(msg.contains("//depot/main/a.c"));
        assert!(msg.contains("file locked"));

        let err = StoreError::connect("perforce:1666", "refused");
        assert_eq!(err.to_string(), "cannot connect to perforce:1666: refused");
    }
}
