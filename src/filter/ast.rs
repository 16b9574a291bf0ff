//! Raw, uncompiled tag-filter specifications as they come off disk.

use serde::Deserialize;
use std::collections::HashMap;

/// The value side of one key/value entry in a raw filter document.
///
/// Maps directly onto the five value-spec shapes: `true`/`false` for
/// presence/absence, a bare string for an exact match (or a wildcard match
/// if it contains `*`), and a list for an any-of match.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawValueSpec {
    Bool(bool),
    One(String),
    Many(Vec<String>),
}

/// A single (possibly wildcarded) key mapped to its raw value spec, in the
/// order the keys appeared in the source document. Plain `HashMap`s don't
/// preserve that order, and "first matching tag value" (used for the
/// exploded-mode group cell) depends on it, so this wraps a `Vec` instead of
/// using `HashMap` directly while still deserializing from a YAML mapping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagFilterSpec(pub Vec<(String, RawValueSpec)>);

impl TagFilterSpec {
    pub fn iter(&self) -> impl Iterator<Item = &(String, RawValueSpec)> {
        self.0.iter()
    }
}

impl<'de> Deserialize<'de> for TagFilterSpec {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        // serde_yaml's `Mapping` preserves source order (it's backed by an
        // ordered map internally), unlike a plain `HashMap`.
        let mapping = serde_yaml::Mapping::deserialize(deserializer)?;
        let mut entries = Vec::with_capacity(mapping.len());
        for (k, v) in mapping {
            let key: String = serde_yaml::from_value(k).map_err(serde::de::Error::custom)?;
            let val: RawValueSpec = serde_yaml::from_value(v).map_err(serde::de::Error::custom)?;
            entries.push((key, val));
        }
        Ok(TagFilterSpec(entries))
    }
}

/// A grouped filter document: group label -> that group's filter spec, in
/// document order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupedFilterSpec(pub Vec<(String, TagFilterSpec)>);

impl<'de> Deserialize<'de> for GroupedFilterSpec {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let mapping = serde_yaml::Mapping::deserialize(deserializer)?;
        let mut entries = Vec::with_capacity(mapping.len());
        for (k, v) in mapping {
            let label: String = serde_yaml::from_value(k).map_err(serde::de::Error::custom)?;
            let spec: TagFilterSpec = serde_yaml::from_value(v).map_err(serde::de::Error::custom)?;
            entries.push((label, spec));
        }
        Ok(GroupedFilterSpec(entries))
    }
}

/// A compiled value spec, after wildcard expansion has resolved the concrete
/// key it applies to.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueSpec {
    /// `true` — the key must be present, any value.
    Present,
    /// `false` — the key must be absent.
    Absent,
    /// Bare string with no `*` — exact match.
    Equals(String),
    /// List — any-of match.
    AnyOf(Vec<String>),
    /// Bare string containing `*` — glob match.
    Wildcard(String),
}

impl From<RawValueSpec> for ValueSpec {
    fn from(raw: RawValueSpec) -> Self {
        match raw {
            RawValueSpec::Bool(true) => ValueSpec::Present,
            RawValueSpec::Bool(false) => ValueSpec::Absent,
            RawValueSpec::One(s) if s.contains('*') => ValueSpec::Wildcard(s),
            RawValueSpec::One(s) => ValueSpec::Equals(s),
            RawValueSpec::Many(list) => ValueSpec::AnyOf(list),
        }
    }
}

impl ValueSpec {
    pub fn matches(&self, actual: &str) -> bool {
        match self {
            ValueSpec::Present => true,
            ValueSpec::Absent => false,
            ValueSpec::Equals(s) => s == actual,
            ValueSpec::AnyOf(list) => list.iter().any(|s| s == actual),
            ValueSpec::Wildcard(pattern) => crate::utils::glob_match(pattern, actual),
        }
    }

    pub fn is_negative(&self) -> bool {
        matches!(self, ValueSpec::Absent)
    }
}

pub type TagMap = HashMap<String, String>;
