//! Measurement records and tag resolution.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A set of string tags, serialized as a JSON object.
pub type TagSet = BTreeMap<String, String>;

/// Keys owned by the typed fields of [`Measurement`]; they are never taken
/// from the free-form extension map.
const RESERVED_FIELDS: [&str; 5] = ["name", "value", "tags", "time", "inherit_tags"];

/// One measurement as sent to `POST /measurements`.
///
/// Fields the API accepts beyond the typed ones (`period`, `description`,
/// `attributes`, ...) go in `extra` and are flattened into the same object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Metric name, already sanitized.
    pub name: String,
    /// The observed value.
    pub value: f64,
    /// Tags for this measurement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<TagSet>,
    /// Epoch seconds. The server uses receipt time when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<i64>,
    /// Any other fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Per-call options for submitting a measurement.
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    /// Tags supplied by the caller.
    pub tags: Option<TagSet>,
    /// Merge the connection's tags underneath `tags`.
    pub inherit_tags: bool,
    /// Explicit measurement time, epoch seconds.
    pub time: Option<i64>,
    /// Extra fields copied into the measurement.
    pub extra: Map<String, Value>,
}

impl SubmitOptions {
    /// Empty options: connection tags, server time.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the caller's tag set.
    #[must_use]
    pub fn with_tags(mut self, tags: TagSet) -> Self {
        self.tags = Some(tags);
        self
    }

    /// Adds a single caller tag.
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags
            .get_or_insert_with(TagSet::new)
            .insert(key.into(), value.into());
        self
    }

    /// Merges the connection tags underneath the caller's.
    #[must_use]
    pub fn inherit_tags(mut self) -> Self {
        self.inherit_tags = true;
        self
    }

    /// Sets the measurement time.
    #[must_use]
    pub fn at(mut self, time: i64) -> Self {
        self.time = Some(time);
        self
    }

    /// Adds a free-form field.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// Picks the tag set for a measurement.
///
/// Caller tags win. With `inherit`, the defaults are merged underneath them
/// (caller wins on collision). Without caller tags the defaults are used
/// as-is, or omitted when empty.
pub fn resolve_tags(defaults: &TagSet, requested: Option<&TagSet>, inherit: bool) -> Option<TagSet> {
    match requested {
        Some(tags) if inherit => {
            let mut merged = defaults.clone();
            merged.extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
            Some(merged)
        }
        Some(tags) => Some(tags.clone()),
        None if defaults.is_empty() => None,
        None => Some(defaults.clone()),
    }
}

impl Measurement {
    /// Builds a measurement from per-call options and the connection's tags.
    pub fn build(name: String, value: f64, options: &SubmitOptions, defaults: &TagSet) -> Self {
        let extra = options
            .extra
            .iter()
            .filter(|(key, _)| !RESERVED_FIELDS.contains(&key.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Self {
            name,
            value,
            tags: resolve_tags(defaults, options.tags.as_ref(), options.inherit_tags),
            time: options.time,
            extra,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tags(pairs: &[(&str, &str)]) -> TagSet {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_inherit_merges_with_caller_precedence() {
        let defaults = tags(&[("a", "1"), ("b", "2")]);
        let caller = tags(&[("b", "3")]);
        assert_eq!(
            resolve_tags(&defaults, Some(&caller), true),
            Some(tags(&[("a", "1"), ("b", "3")]))
        );
    }

    #[test]
    fn test_without_inherit_caller_tags_are_exact() {
        let defaults = tags(&[("a", "1"), ("b", "2")]);
        let caller = tags(&[("b", "3")]);
        assert_eq!(
            resolve_tags(&defaults, Some(&caller), false),
            Some(tags(&[("b", "3")]))
        );
    }

    #[test]
    fn test_defaults_used_when_caller_has_none() {
        let defaults = tags(&[("region", "us-east-1")]);
        assert_eq!(resolve_tags(&defaults, None, false), Some(defaults.clone()));
        assert_eq!(resolve_tags(&TagSet::new(), None, true), None);
    }

    #[test]
    fn test_serializes_flat_with_extras() {
        let options = SubmitOptions::new()
            .with_tag("host", "web-1")
            .at(1_700_000_000)
            .with_field("description", "desc 1")
            .with_field("name", "ignored");
        let m = Measurement::build("cpu".to_string(), 20.5, &options, &TagSet::new());

        assert_eq!(
            serde_json::to_value(&m).unwrap(),
            json!({
                "name": "cpu",
                "value": 20.5,
                "tags": {"host": "web-1"},
                "time": 1_700_000_000,
                "description": "desc 1"
            })
        );
    }

    #[test]
    fn test_omits_absent_optional_fields() {
        let m = Measurement::build("cpu".to_string(), 1.0, &SubmitOptions::new(), &TagSet::new());
        assert_eq!(
            serde_json::to_value(&m).unwrap(),
            json!({"name": "cpu", "value": 1.0})
        );
    }
}
