//! Instance keys and the persisted instance registry.

use serde::{Deserialize, Deserializer, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Opaque, lexicographically sortable instance identifier.
///
/// Doubles as the name of the instance's subdirectory.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceKey(String);

impl InstanceKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the key names exactly one directory under `instances/`.
    pub fn is_path_safe(&self) -> bool {
        !matches!(self.0.as_str(), "" | "." | "..")
            && !self.0.contains(['/', '\\', '\0'])
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InstanceKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for InstanceKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl AsRef<str> for InstanceKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for InstanceKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Empty strings and `null` both mean "no key".
pub(crate) fn deserialize_optional_key<'de, D>(
    deserializer: D,
) -> Result<Option<InstanceKey>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.filter(|key| !key.is_empty()).map(InstanceKey::from))
}

/// `null` deserializes to the type's default instead of failing.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Persisted list of known instances plus the currently-selected one.
///
/// `keys` is kept sorted and deduplicated, so the latest instance is always
/// the last element.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceRegistry {
    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        deserialize_with = "null_as_default"
    )]
    pub keys: Vec<InstanceKey>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_optional_key"
    )]
    pub current: Option<InstanceKey>,
}

impl InstanceRegistry {
    /// Sort and deduplicate keys, and drop keys that are not a single path
    /// component along with a dangling `current`.
    pub fn normalize(&mut self) {
        self.keys.retain(InstanceKey::is_path_safe);
        self.keys.sort();
        self.keys.dedup();
        if let Some(current) = &self.current {
            if self.keys.binary_search(current).is_err() {
                self.current = None;
            }
        }
    }

    pub fn normalized(mut self) -> Self {
        self.normalize();
        self
    }

    /// Largest key in sort order.
    pub fn latest(&self) -> Option<&InstanceKey> {
        self.keys.iter().max()
    }

    pub fn contains(&self, key: &InstanceKey) -> bool {
        self.keys.contains(key)
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn insert(&mut self, key: InstanceKey) {
        self.keys.push(key);
        self.normalize();
    }

    /// Remove `key`, clearing `current` if it pointed at it.
    pub fn remove(&mut self, key: &InstanceKey) -> bool {
        let before = self.keys.len();
        self.keys.retain(|candidate| candidate != key);
        if self.current.as_ref() == Some(key) {
            self.current = None;
        }
        self.keys.len() != before
    }

    /// Point `current` at the latest key when it is unset.
    pub fn default_current_to_latest(&mut self) {
        if self.current.is_none() {
            self.current = self.latest().cloned();
        }
    }
}
