//! Per-call context for executor operations
//!
//! The coordinator never inspects the context; it is handed through to the
//! child executor unchanged.

use std::collections::BTreeMap;
use std::time::Duration;

/// Runtime context for a single executor call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecContext {
    /// Show detailed engine output
    pub verbose: bool,
    /// Upper bound the child should honor for the engine invocation
    pub timeout: Option<Duration>,
    /// Extra environment passed to the engine process
    pub env: BTreeMap<String, String>,
}

impl ExecContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_verbose(verbose: bool) -> Self {
        Self {
            verbose,
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}
