//! Garbage collection of instances named by the control directive.
//!
//! A pass tears down every registered instance that is listed in
//! `gc.deleteKeys` or whose directory was last modified before
//! `gc.pruneBefore`. Keys whose teardown fails stay registered and are
//! written back into the directive so the next pass retries them.

use crate::cache::ChildCache;
use crate::control::GcDirective;
use crate::registry::{InstanceKey, InstanceRegistry};
use crate::store::MetadataStore;
use mws_core::error::Result;
use mws_executor::{ExecContext, ProviderHandle};
use std::collections::BTreeSet;
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// Outcome of one garbage-collection pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcReport {
    /// Keys dropped from the registry
    pub removed: Vec<InstanceKey>,
    /// Doomed keys that could not be torn down and stay registered
    pub retained: Vec<InstanceKey>,
}

impl GcReport {
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.retained.is_empty()
    }
}

/// Registry keys the directive dooms. `modified` reports a directory's mtime;
/// keys without one are only doomed when listed explicitly.
pub fn select_doomed<F>(
    directive: &GcDirective,
    registry: &InstanceRegistry,
    modified: F,
) -> BTreeSet<InstanceKey>
where
    F: Fn(&InstanceKey) -> Option<SystemTime>,
{
    let cutoff = directive.prune_cutoff();
    if cutoff.is_none() {
        if let Some(raw) = &directive.prune_before {
            debug!(prune_before = %raw, "ignoring unparsable prune cutoff");
        }
    }
    let cutoff = cutoff.map(SystemTime::from);

    registry
        .keys
        .iter()
        .filter(|key| {
            directive.delete_keys.contains(*key)
                || cutoff.is_some_and(|cutoff| modified(key).is_some_and(|mtime| mtime < cutoff))
        })
        .cloned()
        .collect()
}

/// Run one pass. The caller holds the metadata lock for its whole duration.
pub(crate) async fn collect(
    store: &MetadataStore,
    cache: &mut ChildCache,
    provider: &ProviderHandle,
) -> Result<GcReport> {
    let control = store.load_control()?;
    let Some(directive) = control.pending_gc().cloned() else {
        return Ok(GcReport::default());
    };

    let mut registry = store.load_registry()?;
    let doomed = select_doomed(&directive, &registry, |key| {
        store.instance_modified(key).ok()
    });
    for key in directive.delete_keys.iter().filter(|k| !registry.contains(k)) {
        debug!(key = %key, "gc: ignoring unregistered key");
    }

    let mut report = GcReport::default();
    for key in doomed {
        if teardown(store, cache, provider, &key).await {
            registry.remove(&key);
            report.removed.push(key);
        } else {
            report.retained.push(key);
        }
    }

    registry.default_current_to_latest();
    store.save_registry(&registry)?;

    // Re-read so a directive written while the pass ran is not lost
    let mut control = store.load_control()?;
    let mut next = (!report.retained.is_empty())
        .then(|| GcDirective::delete(report.retained.iter().cloned()));
    if let Some(mut newer) = control.gc.take().filter(|gc| *gc != directive) {
        newer.delete_keys.retain(|key| !report.removed.contains(key));
        match &mut next {
            Some(pending) => pending.merge(newer),
            None => next = Some(newer),
        }
    }
    control.gc = next.filter(|gc| !gc.is_empty());
    if control
        .target
        .as_ref()
        .is_some_and(|target| report.removed.contains(target))
    {
        control.target = None;
    }
    store.save_control(&control)?;

    info!(
        removed = report.removed.len(),
        retained = report.retained.len(),
        remaining = registry.keys.len(),
        "gc pass finished"
    );
    Ok(report)
}

/// Tear down one instance. Returns whether its key may leave the registry.
async fn teardown(
    store: &MetadataStore,
    cache: &mut ChildCache,
    provider: &ProviderHandle,
    key: &InstanceKey,
) -> bool {
    // A cached child may outlive its directory
    if !store.instance_exists(key) {
        if let Err(err) = store.remove_instance_dir(key) {
            debug!(key = %key, error = %err, "gc: failed to remove remnants");
        }
        cache.evict(key);
        info!(key = %key, "gc: directory already gone, dropping key");
        return true;
    }

    let child = match cache.get_or_create(key, store) {
        Ok(child) => child,
        Err(err) => {
            warn!(key = %key, error = %err, "gc: failed to construct executor");
            return false;
        }
    };

    if provider.is_complete() {
        child.use_provider(provider.clone()).await;
    }

    if let Err(err) = child.destroy(&ExecContext::default()).await {
        warn!(key = %key, error = %err, "gc: destroy failed, will retry");
        return false;
    }

    if let Err(err) = store.remove_instance_dir(key) {
        warn!(key = %key, error = %err, "gc: failed to remove instance directory, will retry");
        return false;
    }

    cache.evict(key);
    info!(key = %key, "gc: instance destroyed");
    true
}
