//! Control state: the persisted directive that steers the next mutating call.

use crate::registry::{deserialize_optional_key, null_as_default, InstanceKey};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;

fn is_false(value: &bool) -> bool {
    !*value
}

fn deserialize_optional_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.filter(|value| !value.is_empty()))
}

/// Directive telling the coordinator whether to create a new instance and/or
/// garbage-collect existing ones.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlState {
    /// Allocate a fresh instance on the next mutating call
    #[serde(default, skip_serializing_if = "is_false")]
    pub create_new: bool,

    /// Instance mutating calls are routed to
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_optional_key"
    )]
    pub target: Option<InstanceKey>,

    /// Pending garbage-collection directive
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gc: Option<GcDirective>,
}

impl ControlState {
    pub fn request_new_instance(&mut self) {
        self.create_new = true;
    }

    pub fn pin(&mut self, key: InstanceKey) {
        self.target = Some(key);
    }

    pub fn unpin(&mut self) -> Option<InstanceKey> {
        self.target.take()
    }

    /// Merge `directive` into the pending one.
    pub fn schedule_gc(&mut self, directive: GcDirective) {
        match &mut self.gc {
            Some(pending) => pending.merge(directive),
            None => self.gc = Some(directive),
        }
        if self.gc.as_ref().is_some_and(GcDirective::is_empty) {
            self.gc = None;
        }
    }

    pub fn clear_gc(&mut self) -> Option<GcDirective> {
        self.gc.take()
    }

    /// The pending directive, if it asks for anything.
    pub fn pending_gc(&self) -> Option<&GcDirective> {
        self.gc.as_ref().filter(|directive| !directive.is_empty())
    }
}

/// One-shot garbage-collection request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GcDirective {
    /// Instances to tear down explicitly
    #[serde(
        default,
        skip_serializing_if = "BTreeSet::is_empty",
        deserialize_with = "null_as_default"
    )]
    pub delete_keys: BTreeSet<InstanceKey>,

    /// RFC3339 cutoff; instances whose directory was last modified before it
    /// are torn down. Kept as the raw string so an unparsable value survives
    /// a round trip and is simply ignored.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_optional_string"
    )]
    pub prune_before: Option<String>,
}

impl GcDirective {
    pub fn delete<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<InstanceKey>,
    {
        Self {
            delete_keys: keys.into_iter().map(Into::into).collect(),
            prune_before: None,
        }
    }

    pub fn prune_before(cutoff: DateTime<Utc>) -> Self {
        Self {
            delete_keys: BTreeSet::new(),
            prune_before: Some(cutoff.to_rfc3339_opts(SecondsFormat::Secs, true)),
        }
    }

    pub fn with_prune_before(mut self, cutoff: DateTime<Utc>) -> Self {
        self.prune_before = Some(cutoff.to_rfc3339_opts(SecondsFormat::Secs, true));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.delete_keys.is_empty() && self.prune_before.is_none()
    }

    /// Parsed prune cutoff. `None` when unset or not valid RFC3339.
    pub fn prune_cutoff(&self) -> Option<DateTime<Utc>> {
        self.prune_before
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|cutoff| cutoff.with_timezone(&Utc))
    }

    /// Union the delete sets; the later cutoff wins.
    pub fn merge(&mut self, other: GcDirective) {
        self.delete_keys.extend(other.delete_keys);
        self.prune_before = match (self.prune_before.take(), other.prune_before) {
            (Some(mine), Some(theirs)) => {
                let mine_parsed = DateTime::parse_from_rfc3339(&mine).ok();
                let theirs_parsed = DateTime::parse_from_rfc3339(&theirs).ok();
                match (mine_parsed, theirs_parsed) {
                    (Some(a), Some(b)) if a >= b => Some(mine),
                    (None, Some(_)) | (Some(_), Some(_)) => Some(theirs),
                    _ => Some(mine),
                }
            }
            (mine, theirs) => mine.or(theirs),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_zero_value_serializes_empty() {
        assert_eq!(
            serde_json::to_string(&ControlState::default()).unwrap(),
            "{}"
        );
    }

    #[test]
    fn test_document_shape() {
        let control = ControlState {
            create_new: true,
            target: Some("k1".into()),
            gc: Some(GcDirective {
                delete_keys: ["b".into(), "a".into()].into_iter().collect(),
                prune_before: Some("2026-01-01T00:00:00Z".into()),
            }),
        };
        assert_eq!(
            serde_json::to_string(&control).unwrap(),
            r#"{"createNew":true,"target":"k1","gc":{"deleteKeys":["a","b"],"pruneBefore":"2026-01-01T00:00:00Z"}}"#
        );
    }

    #[test]
    fn test_omitted_and_empty_fields() {
        let control: ControlState =
            serde_json::from_str(r#"{"target":"","gc":{"deleteKeys":null,"pruneBefore":""}}"#)
                .unwrap();
        assert_eq!(control.target, None);
        assert!(control.gc.as_ref().unwrap().is_empty());
        assert!(control.pending_gc().is_none());
    }

    #[test]
    fn test_prune_cutoff_parsing() {
        let cutoff = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(GcDirective::prune_before(cutoff).prune_cutoff(), Some(cutoff));

        let offset = GcDirective {
            prune_before: Some("2026-03-01T14:00:00+02:00".into()),
            ..Default::default()
        };
        assert_eq!(offset.prune_cutoff(), Some(cutoff));

        let garbage = GcDirective {
            prune_before: Some("last tuesday".into()),
            ..Default::default()
        };
        assert_eq!(garbage.prune_cutoff(), None);
        assert!(!garbage.is_empty());
    }

    #[test]
    fn test_schedule_gc_merges() {
        let early = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();

        let mut control = ControlState::default();
        control.schedule_gc(GcDirective::delete(["a"]).with_prune_before(early));
        control.schedule_gc(GcDirective::delete(["b"]).with_prune_before(late));

        let pending = control.pending_gc().unwrap();
        assert_eq!(pending.delete_keys.len(), 2);
        assert_eq!(pending.prune_cutoff(), Some(late));

        control.schedule_gc(GcDirective::prune_before(early));
        assert_eq!(control.pending_gc().unwrap().prune_cutoff(), Some(late));

        assert!(control.clear_gc().is_some());
        control.schedule_gc(GcDirective::default());
        assert!(control.gc.is_none());
    }

    #[test]
    fn test_pin_and_new_instance() {
        let mut control = ControlState::default();
        control.pin("k2".into());
        control.request_new_instance();
        assert!(control.create_new);
        assert_eq!(control.unpin(), Some("k2".into()));
        assert_eq!(control.target, None);
    }
}
