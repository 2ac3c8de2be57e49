//! Connection parameters for opening a session.

use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A password or ticket used to authenticate a session.
///
/// The secret is wiped from memory on drop and never printed by `Debug`.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Credential(String);

impl Credential {
    /// Wraps a secret.
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Returns the secret.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Returns true if no secret was supplied.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

impl From<&str> for Credential {
    fn from(secret: &str) -> Self {
        Self::new(secret)
    }
}

/// Everything needed to open one authenticated, workspace-bound session.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Server address (e.g. `ssl:perforce.example.com:1666`).
    pub server: String,
    /// User name.
    pub user: String,
    /// Credential for the user.
    pub credential: Credential,
    /// Name of the workspace (client spec) every session binds to.
    pub workspace: String,
}

impl ConnectionConfig {
    /// Creates a new connection configuration.
    pub fn new(
        server: impl Into<String>,
        user: impl Into<String>,
        credential: impl Into<Credential>,
        workspace: impl Into<String>,
    ) -> Self {
        Self {
            server: server.into(),
            user: user.into(),
            credential: credential.into(),
            workspace: workspace.into(),
        }
    }
}

impl From<String> for Credential {
    fn from(secret: String) -> Self {
        Self(secret)
    }
}
