//! Metadata persistence and on-disk layout.
//!
//! Layout under the configured root:
//!
//! ```text
//! <root>/instances/<key>/                 owned by the child executor
//! <root>/.multiworkspace/control.json     ControlState
//! <root>/.multiworkspace/instances.json   InstanceRegistry
//! ```

use crate::control::ControlState;
use crate::registry::{InstanceKey, InstanceRegistry};
use mws_core::error::{MwsError, Result};
use mws_core::file_system::{FileSystem, OsFileSystem};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

pub const INSTANCES_DIR: &str = "instances";
pub const METADATA_DIR: &str = ".multiworkspace";
pub const CONTROL_FILE: &str = "control.json";
pub const REGISTRY_FILE: &str = "instances.json";

/// Reads and writes the control and registry documents of one root.
///
/// The store does no locking of its own; callers serialize
/// read-modify-write sequences.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    root: PathBuf,
    fs: Arc<dyn FileSystem>,
}

impl MetadataStore {
    pub fn new(root: impl Into<PathBuf>, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            root: root.into(),
            fs,
        }
    }

    /// Store backed by the host filesystem.
    pub fn on_disk(root: impl Into<PathBuf>) -> Self {
        Self::new(root, Arc::new(OsFileSystem))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn file_system(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    pub fn instances_dir(&self) -> PathBuf {
        self.root.join(INSTANCES_DIR)
    }

    pub fn instance_dir(&self, key: &InstanceKey) -> PathBuf {
        self.instances_dir().join(key.as_str())
    }

    pub fn metadata_dir(&self) -> PathBuf {
        self.root.join(METADATA_DIR)
    }

    pub fn control_path(&self) -> PathBuf {
        self.metadata_dir().join(CONTROL_FILE)
    }

    pub fn registry_path(&self) -> PathBuf {
        self.metadata_dir().join(REGISTRY_FILE)
    }

    /// Load control state; a missing document is the zero value.
    pub fn load_control(&self) -> Result<ControlState> {
        self.load_json(&self.control_path())
    }

    pub fn save_control(&self, control: &ControlState) -> Result<()> {
        self.save_json(&self.control_path(), control)
    }

    /// Load the registry; a missing document is the zero value.
    pub fn load_registry(&self) -> Result<InstanceRegistry> {
        let registry: InstanceRegistry = self.load_json(&self.registry_path())?;
        Ok(registry.normalized())
    }

    /// Persist the registry with keys sorted and deduplicated.
    pub fn save_registry(&self, registry: &InstanceRegistry) -> Result<()> {
        let normalized = registry.clone().normalized();
        self.save_json(&self.registry_path(), &normalized)
    }

    pub fn instance_exists(&self, key: &InstanceKey) -> bool {
        self.fs.exists(&self.instance_dir(key))
    }

    pub fn create_instance_dir(&self, key: &InstanceKey) -> Result<PathBuf> {
        let dir = self.instance_dir(key);
        self.fs
            .create_dir_all(&dir)
            .map_err(|e| MwsError::filesystem(e, &dir, "create_dir_all"))?;
        Ok(dir)
    }

    /// Remove an instance directory. Returns `false` if it was already gone.
    pub fn remove_instance_dir(&self, key: &InstanceKey) -> Result<bool> {
        let dir = self.instance_dir(key);
        match self.fs.remove_dir_all(&dir) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(MwsError::filesystem(e, &dir, "remove_dir_all")),
        }
    }

    /// Last modification time of an instance directory.
    pub fn instance_modified(&self, key: &InstanceKey) -> Result<SystemTime> {
        let dir = self.instance_dir(key);
        self.fs
            .modified(&dir)
            .map_err(|e| MwsError::filesystem(e, &dir, "stat"))
    }

    fn load_json<T: DeserializeOwned + Default>(&self, path: &Path) -> Result<T> {
        let content = match self.fs.read(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(T::default()),
            Err(e) => return Err(MwsError::filesystem(e, path, "read")),
        };

        serde_json::from_slice(&content).map_err(|e| {
            MwsError::Serialization(format!("Failed to parse {}: {}", path.display(), e))
        })
    }

    fn save_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        let dir = self.metadata_dir();
        self.fs
            .create_dir_all(&dir)
            .map_err(|e| MwsError::filesystem(e, &dir, "create_dir_all"))?;

        let content = serde_json::to_vec_pretty(value)?;
        self.fs
            .write_atomic(path, &content)
            .map_err(|e| MwsError::filesystem(e, path, "write"))
    }
}
