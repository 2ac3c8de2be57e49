//! # parsync store
//!
//! Session layer between parsync and a remote versioned file store.
//!
//! This crate provides:
//! - `FileSpec`, the identity of one stale file (depot path, client path, revision)
//! - `ConnectionConfig` and `Credential` for opening authenticated sessions
//! - The `Session` / `SessionFactory` traits the sync engine is written against
//! - `CommandStore`, a factory driving the `p4` command-line client
//! - `MemoryDepot`, an in-memory store with fault injection for tests
//!
//! ## Session ownership
//!
//! A session is an exclusive, workspace-bound connection. Sessions are opened
//! once per unit of work and are never shared between threads; every method
//! takes `&mut self` so the borrow checker enforces this.

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod command;
mod config;
mod error;
mod file_spec;
mod memory;
mod session;

pub use command::{parse_tagged, CommandSession, CommandStore, TaggedRecord, DEFAULT_PROGRAM};
pub use config::{ConnectionConfig, Credential};
pub use error::{StoreError, StoreResult};
pub use file_spec::FileSpec;
pub use memory::{MemoryDepot, MemorySession, SyncRecord};
pub use session::{Session, SessionFactory};
