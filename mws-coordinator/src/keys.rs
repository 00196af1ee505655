//! Instance key allocation.

use crate::registry::{InstanceKey, InstanceRegistry};
use crate::store::MetadataStore;
use chrono::{DateTime, Utc};

/// RFC3339 with `:` and `.` replaced so the key is a valid directory name on
/// every platform. Fixed-width nanoseconds keep lexicographic order equal to
/// chronological order.
pub const KEY_FORMAT: &str = "%Y-%m-%dT%H-%M-%S-%9fZ";

pub fn timestamp_key(now: DateTime<Utc>) -> InstanceKey {
    InstanceKey::from(now.format(KEY_FORMAT).to_string())
}

/// Produce a key that names neither an existing directory nor a registered
/// instance. Collisions get a `-{n}` suffix.
///
/// Suffixed keys sort after their base and suffixes 1 through 9 sort in
/// allocation order. From `-10` on the text order breaks (`-10` sorts before
/// `-2`), so "latest" is only chronological for up to nine collisions on one
/// timestamp.
pub fn allocate_key(
    store: &MetadataStore,
    registry: &InstanceRegistry,
    now: DateTime<Utc>,
) -> InstanceKey {
    let base = timestamp_key(now);
    let is_free = |key: &InstanceKey| !registry.contains(key) && !store.instance_exists(key);

    if is_free(&base) {
        return base;
    }

    let mut n: u64 = 1;
    loop {
        let candidate = InstanceKey::from(format!("{base}-{n}"));
        if is_free(&candidate) {
            return candidate;
        }
        n += 1;
    }
}
