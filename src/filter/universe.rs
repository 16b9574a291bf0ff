//! The observed key/value universe scanned from the input before any filter
//! is compiled, so wildcard key/value patterns (`addr:*`, `*_link`) can be
//! expanded against what the input actually contains rather than guessed at.

use std::collections::{HashMap, HashSet};

#[derive(Debug, Default)]
pub struct TagUniverseBuilder {
    keys: HashSet<String>,
    values_by_key: HashMap<String, HashSet<String>>,
}

impl TagUniverseBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe<'a, I>(&mut self, tags: I)
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        for (k, v) in tags {
            if !self.keys.contains(k) {
                self.keys.insert(k.to_string());
            }
            self.values_by_key
                .entry(k.to_string())
                .or_default()
                .insert(v.to_string());
        }
    }

    pub fn finish(self) -> TagUniverse {
        TagUniverse {
            keys: self.keys,
            values_by_key: self.values_by_key,
        }
    }
}

/// A frozen snapshot of every key and, per key, every value observed in the
/// input. Built once in a dedicated pre-pass and shared read-only across the
/// worker threads that compile filters against it.
#[derive(Debug, Default, Clone)]
pub struct TagUniverse {
    keys: HashSet<String>,
    values_by_key: HashMap<String, HashSet<String>>,
}

impl TagUniverse {
    /// Concrete keys matching `pattern` (which may contain `*`). If the
    /// pattern has no wildcard, returns it unchanged whether or not it was
    /// actually observed — an unobserved literal key is not an error, it
    /// simply never matches any feature.
    pub fn expand_key(&self, pattern: &str) -> Vec<String> {
        if !pattern.contains('*') {
            return vec![pattern.to_string()];
        }
        let mut matches: Vec<String> = self
            .keys
            .iter()
            .filter(|k| crate::utils::glob_match(pattern, k))
            .cloned()
            .collect();
        matches.sort();
        matches
    }

    pub fn values_for(&self, key: &str) -> Option<&HashSet<String>> {
        self.values_by_key.get(key)
    }

    #[cfg(test)]
    pub fn from_tags(tags: &[(&str, &str)]) -> Self {
        let mut builder = TagUniverseBuilder::new();
        builder.observe(tags.iter().copied());
        builder.finish()
    }
}
