//! Shared provider process handle
//!
//! A long-lived provider process is attached to by every child executor
//! instead of each child spawning its own. The handle lives as long as the
//! coordinator and is owned by no single child.

use std::fmt::Debug;
use std::sync::Arc;

/// Reference counting hook for a provider process that is shared between
/// executors. Children increment while an engine run is attached to it.
pub trait ProviderInUse: Send + Sync + Debug {
    fn increment(&self);
    fn decrement(&self);
}

/// Shared provider reference plus the descriptor children use to attach to it.
#[derive(Debug, Clone, Default)]
pub struct ProviderHandle {
    pub in_use: Option<Arc<dyn ProviderInUse>>,
    pub attach_config: String,
}

impl ProviderHandle {
    pub fn new(in_use: Arc<dyn ProviderInUse>, attach_config: impl Into<String>) -> Self {
        Self {
            in_use: Some(in_use),
            attach_config: attach_config.into(),
        }
    }

    /// A handle is only worth propagating once both halves are present.
    pub fn is_complete(&self) -> bool {
        self.in_use.is_some() && !self.attach_config.is_empty()
    }
}
