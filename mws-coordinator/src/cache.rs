//! Lazily populated map of instance key to child executor.

use crate::registry::InstanceKey;
use crate::store::MetadataStore;
use mws_core::error::{MwsError, Result};
use mws_core::secrets::Redactor;
use mws_executor::{ChildOptions, Executor, ExecutorFactory, ExtraOptions};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info_span, Span};

/// Everything needed to build a child for a given instance.
pub(crate) struct ChildBuilder {
    pub factory: Arc<dyn ExecutorFactory>,
    pub span: Span,
    pub redactor: Redactor,
    pub extra: ExtraOptions,
}

impl ChildBuilder {
    fn options(&self, key: &InstanceKey) -> ChildOptions {
        ChildOptions {
            instance_key: key.to_string(),
            span: info_span!(parent: &self.span, "instance", key = %key),
            redactor: Arc::clone(&self.redactor),
            extra: self.extra.clone(),
        }
    }
}

/// Children live for the coordinator's lifetime unless their directory is
/// destroyed.
pub(crate) struct ChildCache {
    builder: ChildBuilder,
    children: HashMap<InstanceKey, Arc<dyn Executor>>,
}

impl ChildCache {
    pub fn new(builder: ChildBuilder) -> Self {
        Self {
            builder,
            children: HashMap::new(),
        }
    }

    /// Return the cached child for `key`, building it if the instance
    /// directory exists. Never creates the directory.
    pub fn get_or_create(
        &mut self,
        key: &InstanceKey,
        store: &MetadataStore,
    ) -> Result<Arc<dyn Executor>> {
        if let Some(child) = self.children.get(key) {
            return Ok(Arc::clone(child));
        }

        if !store.instance_exists(key) {
            return Err(MwsError::InstanceMissing(key.to_string()));
        }

        let dir = store.instance_dir(key);
        let child = self.builder.factory.create(&dir, self.builder.options(key))?;
        debug!(key = %key, dir = %dir.display(), "constructed child executor");
        self.children.insert(key.clone(), Arc::clone(&child));
        Ok(child)
    }

    pub fn evict(&mut self, key: &InstanceKey) -> bool {
        self.children.remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }
}
