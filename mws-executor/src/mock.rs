//! Scriptable in-process executor for tests.

use crate::{
    ApplyResult, ChildOptions, CompletionCallback, ExecContext, Executor, ExecutorFactory,
    ImportResult, PlanResult, ProviderHandle, ProviderInUse, RefreshResult, ResourceDescriptor,
};
use async_trait::async_trait;
use mws_core::error::{MwsError, Result};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, Instrument};

/// Operation a failure can be scripted for. `Apply` and `Destroy` cover
/// both the blocking and the callback variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Apply,
    Refresh,
    Import,
    Plan,
    Destroy,
}

/// A recorded executor call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ApplyAsync,
    Apply,
    Refresh,
    Import(String),
    Plan,
    DestroyAsync,
    Destroy,
    UseProvider(String),
}

#[derive(Default)]
struct Script {
    failures: Mutex<HashMap<(String, Operation), MwsError>>,
    delays: Mutex<HashMap<String, Duration>>,
    create_failure: Mutex<Option<MwsError>>,
}

impl Script {
    fn failure(&self, key: &str, operation: Operation) -> Option<MwsError> {
        self.failures
            .lock()
            .ok()
            .and_then(|f| f.get(&(key.to_string(), operation)).cloned())
    }

    fn delay(&self, key: &str) -> Option<Duration> {
        self.delays.lock().ok().and_then(|d| d.get(key).copied())
    }
}

/// One simulated engine invocation. Holds the shared provider while it runs.
struct EngineRun {
    operation: Operation,
    provider: Option<ProviderHandle>,
    delay: Option<Duration>,
    failure: Option<MwsError>,
    span: tracing::Span,
}

impl EngineRun {
    async fn execute(self) -> Result<()> {
        let Self {
            operation,
            provider,
            delay,
            failure,
            span,
        } = self;

        async move {
            let in_use = provider.as_ref().and_then(|p| p.in_use.clone());
            if let Some(in_use) = &in_use {
                in_use.increment();
            }
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(in_use) = &in_use {
                in_use.decrement();
            }
            debug!(?operation, failed = failure.is_some(), "mock engine run finished");
            match failure {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }
        .instrument(span)
        .await
    }
}

/// Executor that records its calls and answers from a shared script.
pub struct MockExecutor {
    dir: PathBuf,
    options: ChildOptions,
    script: Arc<Script>,
    calls: Mutex<Vec<Call>>,
    provider: Mutex<Option<ProviderHandle>>,
}

impl MockExecutor {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn options(&self) -> &ChildOptions {
        &self.options
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn provider(&self) -> Option<ProviderHandle> {
        self.provider.lock().ok().and_then(|p| p.clone())
    }

    fn key(&self) -> &str {
        &self.options.instance_key
    }

    fn record(&self, call: Call) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    /// Snapshot the script for one engine run of `operation`.
    fn prepare(&self, operation: Operation) -> EngineRun {
        let key = self.key();
        EngineRun {
            operation,
            provider: self.provider(),
            delay: self.script.delay(key),
            failure: self.script.failure(key, operation),
            span: self.options.span.clone(),
        }
    }

    fn state(&self) -> serde_json::Value {
        json!({ "instance": self.key() })
    }
}

#[async_trait]
impl Executor for MockExecutor {
    async fn apply_async(&self, callback: CompletionCallback) -> Result<()> {
        self.record(Call::ApplyAsync);
        let run = self.prepare(Operation::Apply);
        tokio::spawn(async move {
            callback(run.execute().await);
        });
        Ok(())
    }

    async fn apply(&self, _ctx: &ExecContext) -> Result<ApplyResult> {
        self.record(Call::Apply);
        self.prepare(Operation::Apply).execute().await?;
        Ok(ApplyResult {
            state: Some(self.state()),
        })
    }

    async fn refresh(&self, _ctx: &ExecContext) -> Result<RefreshResult> {
        self.record(Call::Refresh);
        self.prepare(Operation::Refresh).execute().await?;
        Ok(RefreshResult {
            exists: true,
            state: Some(self.state()),
            ..Default::default()
        })
    }

    async fn import(
        &self,
        _ctx: &ExecContext,
        descriptor: &ResourceDescriptor,
    ) -> Result<ImportResult> {
        self.record(Call::Import(descriptor.name.clone()));
        self.prepare(Operation::Import).execute().await?;
        Ok(ImportResult {
            exists: true,
            state: Some(json!({
                "instance": self.key(),
                "imported": descriptor.name,
                "external_id": descriptor.external_id,
            })),
        })
    }

    async fn plan(&self, _ctx: &ExecContext) -> Result<PlanResult> {
        self.record(Call::Plan);
        self.prepare(Operation::Plan).execute().await?;
        Ok(PlanResult {
            exists: true,
            up_to_date: true,
        })
    }

    async fn destroy_async(&self, callback: CompletionCallback) -> Result<()> {
        self.record(Call::DestroyAsync);
        let run = self.prepare(Operation::Destroy);
        tokio::spawn(async move {
            callback(run.execute().await);
        });
        Ok(())
    }

    async fn destroy(&self, _ctx: &ExecContext) -> Result<()> {
        self.record(Call::Destroy);
        self.prepare(Operation::Destroy).execute().await
    }

    async fn use_provider(&self, provider: ProviderHandle) {
        self.record(Call::UseProvider(provider.attach_config.clone()));
        if let Ok(mut slot) = self.provider.lock() {
            *slot = Some(provider);
        }
    }
}

/// Factory handing out [`MockExecutor`]s that share one script.
#[derive(Clone, Default)]
pub struct MockExecutorFactory {
    script: Arc<Script>,
    executors: Arc<Mutex<BTreeMap<String, Arc<MockExecutor>>>>,
    created: Arc<AtomicUsize>,
}

impl MockExecutorFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `operation` fail with `err` for the instance `key`.
    pub fn fail(&self, key: &str, operation: Operation, err: MwsError) {
        if let Ok(mut failures) = self.script.failures.lock() {
            failures.insert((key.to_string(), operation), err);
        }
    }

    pub fn clear_failure(&self, key: &str, operation: Operation) {
        if let Ok(mut failures) = self.script.failures.lock() {
            failures.remove(&(key.to_string(), operation));
        }
    }

    /// Delay every engine run of `key`.
    pub fn delay(&self, key: &str, delay: Duration) {
        if let Ok(mut delays) = self.script.delays.lock() {
            delays.insert(key.to_string(), delay);
        }
    }

    /// Make the next `create` calls fail until cleared with `None`.
    pub fn fail_create(&self, err: Option<MwsError>) {
        if let Ok(mut slot) = self.script.create_failure.lock() {
            *slot = err;
        }
    }

    /// Most recently built executor for `key`.
    pub fn executor(&self, key: &str) -> Option<Arc<MockExecutor>> {
        self.executors.lock().ok().and_then(|e| e.get(key).cloned())
    }

    /// Total number of executors built, including rebuilt ones.
    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl ExecutorFactory for MockExecutorFactory {
    fn create(&self, dir: &Path, options: ChildOptions) -> Result<Arc<dyn Executor>> {
        if let Some(err) = self.script.create_failure.lock().ok().and_then(|f| f.clone()) {
            return Err(err);
        }

        let key = options.instance_key.clone();
        let executor = Arc::new(MockExecutor {
            dir: dir.to_path_buf(),
            options,
            script: Arc::clone(&self.script),
            calls: Mutex::new(Vec::new()),
            provider: Mutex::new(None),
        });
        self.created.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut executors) = self.executors.lock() {
            executors.insert(key, Arc::clone(&executor));
        }
        Ok(executor)
    }
}

/// Provider reference counter that remembers how often it was used.
#[derive(Debug, Default)]
pub struct MockProviderInUse {
    active: AtomicUsize,
    total: AtomicUsize,
}

impl MockProviderInUse {
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

impl ProviderInUse for MockProviderInUse {
    fn increment(&self) {
        self.active.fetch_add(1, Ordering::SeqCst);
        self.total.fetch_add(1, Ordering::SeqCst);
    }

    fn decrement(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}
