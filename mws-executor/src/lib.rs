//! Executor abstraction for declarative-infrastructure engines.
//!
//! An [`Executor`] wraps one isolated engine working directory and exposes the
//! apply / plan / refresh / import / destroy lifecycle. The multiworkspace
//! coordinator consumes executors through an [`ExecutorFactory`] and exposes
//! the same trait itself, so callers cannot tell one instance from many.

// Standard library
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

// External crates
use async_trait::async_trait;
use mws_core::error::Result;
use mws_core::secrets::{self, Redactor};

pub mod context;
pub mod provider;
pub mod results;

#[cfg(feature = "test-helpers")]
pub mod mock;

pub use context::ExecContext;
pub use provider::{ProviderHandle, ProviderInUse};
pub use results::{ApplyResult, ImportResult, PlanResult, RefreshResult, ResourceDescriptor};

/// Completion callback for asynchronous operations.
///
/// `Fn` rather than `FnOnce`: a fan-out destroy forwards the caller's
/// callback once per child.
pub type CompletionCallback = Arc<dyn Fn(Result<()>) + Send + Sync>;

/// Free-form options handed to every child executor the factory builds.
pub type ExtraOptions = BTreeMap<String, String>;

/// The contract shared by single-instance executors and the coordinator.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Start an apply in the background and return once it is launched.
    /// `callback` is invoked exactly once with the apply's outcome.
    async fn apply_async(&self, callback: CompletionCallback) -> Result<()>;

    /// Run an apply to completion.
    async fn apply(&self, ctx: &ExecContext) -> Result<ApplyResult>;

    /// Refresh engine state against the real infrastructure.
    async fn refresh(&self, ctx: &ExecContext) -> Result<RefreshResult>;

    /// Import an existing resource into engine state.
    async fn import(
        &self,
        ctx: &ExecContext,
        descriptor: &ResourceDescriptor,
    ) -> Result<ImportResult>;

    /// Compute whether the desired state differs from the recorded state.
    async fn plan(&self, ctx: &ExecContext) -> Result<PlanResult>;

    /// Start a destroy in the background; `callback` reports the outcome.
    async fn destroy_async(&self, callback: CompletionCallback) -> Result<()>;

    /// Destroy all managed infrastructure and wait for completion.
    async fn destroy(&self, ctx: &ExecContext) -> Result<()>;

    /// Attach subsequent engine runs to a shared provider process.
    async fn use_provider(&self, provider: ProviderHandle);
}

/// Options a factory receives for each child it builds.
#[derive(Clone)]
pub struct ChildOptions {
    /// Registry key of the instance
    pub instance_key: String,
    /// Span every log line of this child should be emitted under
    pub span: tracing::Span,
    /// Applied to engine output before it is logged
    pub redactor: Redactor,
    pub extra: ExtraOptions,
}

impl ChildOptions {
    pub fn new(instance_key: impl Into<String>) -> Self {
        Self {
            instance_key: instance_key.into(),
            span: tracing::Span::none(),
            redactor: secrets::passthrough(),
            extra: ExtraOptions::new(),
        }
    }

    pub fn redact(&self, text: &str) -> String {
        (self.redactor)(text)
    }
}

impl fmt::Debug for ChildOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChildOptions")
            .field("instance_key", &self.instance_key)
            .field("span", &self.span)
            .field("extra", &self.extra)
            .finish_non_exhaustive()
    }
}

/// Builds a child executor scoped to one instance directory.
pub trait ExecutorFactory: Send + Sync {
    fn create(&self, dir: &Path, options: ChildOptions) -> Result<Arc<dyn Executor>>;
}

impl<F> ExecutorFactory for F
where
    F: Fn(&Path, ChildOptions) -> Result<Arc<dyn Executor>> + Send + Sync,
{
    fn create(&self, dir: &Path, options: ChildOptions) -> Result<Arc<dyn Executor>> {
        self(dir, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_options_defaults() {
        let options = ChildOptions::new("2026-01-01T00-00-00-000000000Z");
        assert_eq!(options.redact("secret"), "secret");
        assert!(options.extra.is_empty());
        assert!(format!("{options:?}").contains("2026-01-01T00-00-00-000000000Z"));
    }

    #[test]
    fn test_child_options_redactor() {
        let mut options = ChildOptions::new("k");
        options.redactor = secrets::redact_values(["hunter2"]);
        assert_eq!(options.redact("password hunter2"), "password [REDACTED]");
    }
}
