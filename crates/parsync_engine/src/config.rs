//! Configuration for sync runs.

use crate::error::{EngineError, EngineResult};
use parsync_store::ConnectionConfig;
use std::time::Duration;

/// Worker count used when none is given.
pub const DEFAULT_WORKERS: usize = 3;

/// Smallest pause between two attempts at the same file.
const MIN_RETRY_DELAY: Duration = Duration::from_millis(1);

/// Configuration for one sync run.
///
/// Built once at startup and shared read-only by the dispatcher and every
/// worker.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Server, user, credential and workspace for every session.
    pub connection: ConnectionConfig,
    /// Requested number of workers.
    pub workers: usize,
    /// Per-file retry behavior.
    pub retry: RetryPolicy,
    /// Rewrite files even if the store thinks they are current.
    pub force: bool,
}

impl SyncConfig {
    /// Creates a configuration with default worker count and retry policy.
    pub fn new(connection: ConnectionConfig) -> Self {
        Self {
            connection,
            workers: DEFAULT_WORKERS,
            retry: RetryPolicy::default(),
            force: true,
        }
    }

    /// Sets the worker count.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Sets the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Enables or disables forced syncs.
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Checks the configuration before a run.
    pub fn validate(&self) -> EngineResult<()> {
        if self.workers == 0 {
            return Err(EngineError::invalid_config(
                "worker count must be at least 1",
            ));
        }
        let required = [
            ("server address", &self.connection.server),
            ("user", &self.connection.user),
            ("workspace", &self.connection.workspace),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(EngineError::invalid_config(format!("{} is required", name)));
            }
        }
        self.retry.validate()
    }
}

/// Retry behavior for a single file.
///
/// By default a failing file is retried forever: the tool runs unattended
/// and a transient failure should never leave a file behind. The pause
/// between attempts grows geometrically from `initial_delay` up to
/// `max_delay` and is never zero.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum attempts per file, first attempt included. `None` is unbounded.
    pub max_attempts: Option<u32>,
    /// Pause before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for the pause.
    pub max_delay: Duration,
    /// Growth factor applied after every failed retry.
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    /// Creates an unbounded policy.
    pub fn unbounded() -> Self {
        Self {
            max_attempts: None,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }

    /// Creates a policy that gives up on a file after `max_attempts` attempts.
    pub fn bounded(max_attempts: u32) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            ..Self::unbounded()
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Returns true if another attempt may follow `attempts_made` failed ones.
    pub fn allows_another(&self, attempts_made: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempts_made < max)
    }

    /// Calculates the pause before retry number `retry` (1-based).
    ///
    /// Retry 0 is the first attempt and has no pause.
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }

        let base = self.initial_delay.as_secs_f64()
            * self
                .backoff_multiplier
                .powi(retry.saturating_sub(1).min(i32::MAX as u32) as i32);
        let capped = if base.is_finite() {
            base.min(self.max_delay.as_secs_f64())
        } else {
            self.max_delay.as_secs_f64()
        };

        Duration::from_secs_f64(capped.max(0.0)).max(MIN_RETRY_DELAY)
    }

    fn validate(&self) -> EngineResult<()> {
        if self.max_attempts == Some(0) {
            return Err(EngineError::invalid_config(
                "max attempts must be at least 1",
            ));
        }
        if self.initial_delay.is_zero() {
            return Err(EngineError::invalid_config("retry delay must be positive"));
        }
        if self.max_delay < self.initial_delay {
            return Err(EngineError::invalid_config(
                "maximum retry delay is shorter than the initial delay",
            ));
        }
        if !(self.backoff_multiplier >= 1.0 && self.backoff_multiplier.is_finite()) {
            return Err(EngineError::invalid_config(
                "backoff multiplier must be a finite number >= 1",
            ));
        }
        Ok(())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::unbounded()
    }
}
