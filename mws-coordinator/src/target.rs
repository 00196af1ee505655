//! Per-call resolution of the authoritative instance.

use crate::cache::ChildCache;
use crate::control::ControlState;
use crate::keys;
use crate::registry::{InstanceKey, InstanceRegistry};
use crate::store::MetadataStore;
use chrono::{DateTime, Utc};
use mws_core::error::{MwsError, Result};
use mws_executor::Executor;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of the `target ?? current ?? latest` fallback chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub key: InstanceKey,
    /// `registry.current` was unset and should now point at `key`
    pub current_defaulted: bool,
}

/// Whether the next mutating call must allocate a fresh instance.
pub fn needs_new_instance(control: &ControlState, registry: &InstanceRegistry) -> bool {
    control.create_new || registry.is_empty()
}

/// Resolve `target ?? current ?? latest`. A target that is not registered is
/// stale and skipped.
pub fn resolve_existing(
    control: &ControlState,
    registry: &InstanceRegistry,
) -> Option<ResolvedTarget> {
    let target = control
        .target
        .as_ref()
        .filter(|target| registry.contains(target));
    if control.target.is_some() && target.is_none() {
        debug!(target = ?control.target, "ignoring unregistered target");
    }

    let key = target
        .or(registry.current.as_ref())
        .or(registry.latest())?
        .clone();

    Some(ResolvedTarget {
        current_defaulted: registry.current.is_none(),
        key,
    })
}

/// Mutating resolution used by apply paths: create a new instance when asked
/// to (or when none exist), otherwise reuse the resolved one.
pub(crate) fn ensure_target_child_for_apply(
    store: &MetadataStore,
    cache: &mut ChildCache,
    now: DateTime<Utc>,
) -> Result<(InstanceKey, Arc<dyn Executor>)> {
    let mut control = store.load_control()?;
    let mut registry = store.load_registry()?;

    if needs_new_instance(&control, &registry) {
        let key = keys::allocate_key(store, &registry, now);
        store.create_instance_dir(&key)?;

        let child = match cache.get_or_create(&key, store) {
            Ok(child) => child,
            Err(err) => {
                if let Err(cleanup) = store.remove_instance_dir(&key) {
                    warn!(key = %key, error = %cleanup, "failed to clean up unused instance directory");
                }
                return Err(err);
            }
        };

        registry.insert(key.clone());
        registry.current = Some(key.clone());
        control.target = Some(key.clone());
        control.create_new = false;
        store.save_registry(&registry)?;
        store.save_control(&control)?;

        info!(key = %key, instances = registry.keys.len(), "created new instance");
        return Ok((key, child));
    }

    let resolved = resolve_existing(&control, &registry).ok_or_else(|| {
        MwsError::Resolution("no target instance and no registered instances".into())
    })?;
    let child = cache.get_or_create(&resolved.key, store)?;

    if resolved.current_defaulted {
        registry.current = Some(resolved.key.clone());
        store.save_registry(&registry)?;
        debug!(key = %resolved.key, "defaulted current instance");
    }

    Ok((resolved.key, child))
}

/// Read-only resolution used by refresh, plan and import. Never creates an
/// instance and never writes metadata; `None` means "does not exist".
pub(crate) fn ensure_current_child(
    store: &MetadataStore,
    cache: &mut ChildCache,
) -> Result<Option<(InstanceKey, Arc<dyn Executor>)>> {
    let control = store.load_control()?;
    let registry = store.load_registry()?;

    let Some(resolved) = resolve_existing(&control, &registry) else {
        return Ok(None);
    };
    let child = cache.get_or_create(&resolved.key, store)?;
    Ok(Some((resolved.key, child)))
}
