//! The coordinator facade: one `Executor` in front of many instances.

use crate::cache::{ChildBuilder, ChildCache};
use crate::config::CoordinatorConfig;
use crate::gc::{self, GcReport};
use crate::registry::InstanceKey;
use crate::store::MetadataStore;
use crate::target;
use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use mws_core::error::{MwsError, Result};
use mws_executor::{
    ApplyResult, CompletionCallback, ExecContext, Executor, ExecutorFactory, ImportResult,
    PlanResult, ProviderHandle, RefreshResult, ResourceDescriptor,
};
use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::runtime::Handle;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, error, info, warn, Instrument, Span};

/// State guarded by the metadata lock.
struct CoordinatorState {
    children: ChildCache,
    provider: ProviderHandle,
}

struct Shared {
    store: MetadataStore,
    span: Span,
    state: Mutex<CoordinatorState>,
}

/// Fans one logical resource out into many disk-backed instances.
///
/// Mutating calls go to the instance named by `control.target`, falling back
/// to `registry.current` and then to the latest key. Destroy fans out to every
/// registered instance. Cloning is cheap and clones share all state.
#[derive(Clone)]
pub struct Coordinator {
    shared: Arc<Shared>,
}

/// Slot holding the first error reported by any child of a fan-out destroy.
type FirstError = Arc<StdMutex<Option<MwsError>>>;

fn record_first(slot: &FirstError, err: MwsError) {
    if let Ok(mut first) = slot.lock() {
        first.get_or_insert(err);
    }
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig, factory: Arc<dyn ExecutorFactory>) -> Result<Self> {
        config.validate()?;

        let span = config.resolve_span();
        let store = MetadataStore::new(config.root, config.file_system);
        let children = ChildCache::new(ChildBuilder {
            factory,
            span: span.clone(),
            redactor: config.redactor,
            extra: config.executor_options,
        });

        Ok(Self {
            shared: Arc::new(Shared {
                store,
                span,
                state: Mutex::new(CoordinatorState {
                    children,
                    provider: ProviderHandle::default(),
                }),
            }),
        })
    }

    pub fn store(&self) -> &MetadataStore {
        &self.shared.store
    }

    pub fn root(&self) -> &Path {
        self.shared.store.root()
    }

    /// Run one garbage-collection pass now.
    pub async fn garbage_collect(&self) -> Result<GcReport> {
        let mut state = self.shared.state.lock().await;
        let CoordinatorState { children, provider } = &mut *state;
        gc::collect(&self.shared.store, children, provider)
            .instrument(self.shared.span.clone())
            .await
    }

    /// GC run on behalf of another call; failures are only logged.
    async fn collect_garbage_logged(&self, trigger: &'static str) {
        match self.garbage_collect().await {
            Ok(report) if report.is_empty() => {}
            Ok(report) => debug!(trigger, ?report, "gc completed"),
            Err(err) => warn!(trigger, error = %err, "gc failed, will retry on next call"),
        }
    }

    /// Launch a detached GC pass. A supervising task logs its failure or panic.
    fn spawn_background_gc(&self, runtime: &Handle) {
        let coordinator = self.clone();
        let span = self.shared.span.clone();
        let task = runtime.spawn(
            async move { coordinator.collect_garbage_logged("apply_async").await }
                .instrument(span.clone()),
        );
        runtime.spawn(
            async move {
                if let Err(err) = task.await {
                    if err.is_panic() {
                        error!("background gc panicked");
                    } else {
                        warn!(error = %err, "background gc did not finish");
                    }
                }
            }
            .instrument(span),
        );
    }

    async fn propagate_provider(provider: &ProviderHandle, child: &Arc<dyn Executor>) {
        if provider.is_complete() {
            child.use_provider(provider.clone()).await;
        }
    }

    /// Resolve (or create) the instance a mutating call is routed to.
    async fn child_for_apply(&self) -> Result<Arc<dyn Executor>> {
        let (key, child, provider) = {
            let mut state = self.shared.state.lock().await;
            let (key, child) = target::ensure_target_child_for_apply(
                &self.shared.store,
                &mut state.children,
                Utc::now(),
            )?;
            (key, child, state.provider.clone())
        };
        debug!(key = %key, "routing mutating call");
        Self::propagate_provider(&provider, &child).await;
        Ok(child)
    }

    /// Resolve the existing instance a read-only call is routed to.
    async fn child_for_read(&self) -> Result<Option<Arc<dyn Executor>>> {
        let (resolved, provider) = {
            let mut state = self.shared.state.lock().await;
            let resolved = target::ensure_current_child(&self.shared.store, &mut state.children)?;
            (resolved, state.provider.clone())
        };
        let Some((key, child)) = resolved else {
            debug!("no instance to route read-only call to");
            return Ok(None);
        };
        debug!(key = %key, "routing read-only call");
        Self::propagate_provider(&provider, &child).await;
        Ok(Some(child))
    }

    /// Every registered instance whose directory still exists.
    async fn all_children(&self) -> Result<Vec<(InstanceKey, Arc<dyn Executor>)>> {
        let (children, provider) = {
            let mut state = self.shared.state.lock().await;
            let registry = self.shared.store.load_registry()?;
            let mut children = Vec::with_capacity(registry.keys.len());
            for key in registry.keys {
                if !self.shared.store.instance_exists(&key) {
                    state.children.evict(&key);
                    warn!(key = %key, "skipping instance whose directory is missing");
                    continue;
                }
                match state.children.get_or_create(&key, &self.shared.store) {
                    Ok(child) => children.push((key, child)),
                    Err(err) if err.is_instance_missing() => {
                        warn!(key = %key, "skipping instance whose directory is missing");
                    }
                    Err(err) => return Err(err),
                }
            }
            debug!(cached = state.children.len(), "resolved all instances");
            (children, state.provider.clone())
        };
        for (_, child) in &children {
            Self::propagate_provider(&provider, child).await;
        }
        Ok(children)
    }
}

#[async_trait]
impl Executor for Coordinator {
    async fn apply_async(&self, callback: CompletionCallback) -> Result<()> {
        async {
            let child = self.child_for_apply().await?;
            let runtime = Handle::try_current()
                .map_err(|e| MwsError::Internal(format!("no tokio runtime: {e}")))?;

            let coordinator = self.clone();
            let wrapped: CompletionCallback = Arc::new(move |result: Result<()>| {
                if result.is_ok() {
                    coordinator.spawn_background_gc(&runtime);
                }
                callback(result);
            });
            child.apply_async(wrapped).await
        }
        .instrument(self.shared.span.clone())
        .await
    }

    async fn apply(&self, ctx: &ExecContext) -> Result<ApplyResult> {
        async {
            let child = self.child_for_apply().await?;
            let result = child.apply(ctx).await?;
            self.collect_garbage_logged("apply").await;
            Ok(result)
        }
        .instrument(self.shared.span.clone())
        .await
    }

    async fn refresh(&self, ctx: &ExecContext) -> Result<RefreshResult> {
        async {
            self.collect_garbage_logged("refresh").await;
            match self.child_for_read().await? {
                Some(child) => child.refresh(ctx).await,
                None => Ok(RefreshResult::does_not_exist()),
            }
        }
        .instrument(self.shared.span.clone())
        .await
    }

    async fn import(
        &self,
        ctx: &ExecContext,
        descriptor: &ResourceDescriptor,
    ) -> Result<ImportResult> {
        async {
            match self.child_for_read().await? {
                Some(child) => child.import(ctx, descriptor).await,
                None => Ok(ImportResult::does_not_exist()),
            }
        }
        .instrument(self.shared.span.clone())
        .await
    }

    async fn plan(&self, ctx: &ExecContext) -> Result<PlanResult> {
        async {
            match self.child_for_read().await? {
                Some(child) => child.plan(ctx).await,
                None => Ok(PlanResult::does_not_exist()),
            }
        }
        .instrument(self.shared.span.clone())
        .await
    }

    async fn destroy_async(&self, callback: CompletionCallback) -> Result<()> {
        let span = self.shared.span.clone();
        async {
            let children = self.all_children().await?;
            info!(instances = children.len(), "destroying all instances");
            let first_error: FirstError = Arc::new(StdMutex::new(None));

            let tasks = children.into_iter().map(|(key, child)| {
                let first_error = Arc::clone(&first_error);
                let callback = Arc::clone(&callback);
                tokio::spawn(
                    async move {
                        let (done_tx, done_rx) = oneshot::channel::<()>();
                        let done_tx = StdMutex::new(Some(done_tx));
                        let recorder = Arc::clone(&first_error);
                        let wrapped: CompletionCallback = Arc::new(move |result: Result<()>| {
                            if let Err(err) = &result {
                                record_first(&recorder, err.clone());
                            }
                            callback(result);
                            if let Some(tx) = done_tx.lock().ok().and_then(|mut tx| tx.take()) {
                                let _ = tx.send(());
                            }
                        });

                        if let Err(err) = child.destroy_async(wrapped).await {
                            warn!(key = %key, error = %err, "failed to start destroy");
                            record_first(&first_error, err);
                            return;
                        }
                        if done_rx.await.is_err() {
                            record_first(
                                &first_error,
                                MwsError::Internal(format!(
                                    "destroy of {key} finished without reporting a result"
                                )),
                            );
                        }
                    }
                    .instrument(Span::current()),
                )
            });

            for joined in join_all(tasks).await {
                if let Err(err) = joined {
                    record_first(
                        &first_error,
                        MwsError::Internal(format!("destroy task failed: {err}")),
                    );
                }
            }

            let first = first_error.lock().ok().and_then(|mut first| first.take());
            match first {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }
        .instrument(span)
        .await
    }

    async fn destroy(&self, ctx: &ExecContext) -> Result<()> {
        async {
            let children = self.all_children().await?;
            info!(instances = children.len(), "destroying all instances");
            for (key, child) in children {
                child.destroy(ctx).await.inspect_err(|err| {
                    warn!(key = %key, error = %err, "destroy failed");
                })?;
            }
            Ok(())
        }
        .instrument(self.shared.span.clone())
        .await
    }

    async fn use_provider(&self, provider: ProviderHandle) {
        let mut state = self.shared.state.lock().await;
        debug!(complete = provider.is_complete(), "storing shared provider");
        state.provider = provider;
    }
}
