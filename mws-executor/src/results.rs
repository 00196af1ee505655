//! Results returned by executor operations.
//!
//! Engine state is carried as opaque JSON; only the `exists` flags mean
//! anything to the coordinator.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApplyResult {
    pub state: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RefreshResult {
    pub exists: bool,
    pub is_applying: bool,
    pub is_destroying: bool,
    pub state: Option<Value>,
    pub last_operation_error: Option<String>,
}

impl RefreshResult {
    /// Result reported when no instance backs the resource.
    pub fn does_not_exist() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanResult {
    pub exists: bool,
    pub up_to_date: bool,
}

impl PlanResult {
    pub fn does_not_exist() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportResult {
    pub exists: bool,
    pub state: Option<Value>,
}

impl ImportResult {
    pub fn does_not_exist() -> Self {
        Self::default()
    }
}

/// Infrastructure resource handed to `import`. Passed through uninterpreted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub kind: String,
    pub name: String,
    pub external_id: Option<String>,
    #[serde(default)]
    pub parameters: Value,
}

impl ResourceDescriptor {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_external_id(mut self, id: impl Into<String>) -> Self {
        self.external_id = Some(id.into());
        self
    }
}
