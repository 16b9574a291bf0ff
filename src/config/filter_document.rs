//! The on-disk filter document: which element kinds to scan, whether output
//! tags are compact or exploded into columns, and the tag predicate itself
//! (flat or grouped), loaded the way the teacher loads `FiltersConfig` —
//! `::config::Config::builder()` over a YAML file.

use std::path::Path;

use serde::Deserialize;

use crate::error::Result;
use crate::filter::{
    compile_filter, compile_grouped_filter, CompiledGroupedPredicate, CompiledPredicate,
    GroupedFilterSpec, TagFilterSpec, TagUniverse,
};

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct FilterDocument {
    #[serde(default = "default_true")]
    pub node: bool,
    #[serde(default = "default_true")]
    pub way: bool,
    #[serde(default = "default_true")]
    pub relation: bool,
    /// Exploded mode: one output column per (group label | concrete tag
    /// key) instead of a single packed tag map.
    #[serde(default)]
    pub exploded: bool,
    #[serde(default)]
    pub tags: Option<TagFilterSpec>,
    #[serde(default)]
    pub groups: Option<GroupedFilterSpec>,
}

impl FilterDocument {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&content)
            .map_err(|e| crate::error::CoreError::InvalidInput(format!("bad filter document: {e}")))
    }

    pub fn compile(&self, universe: &TagUniverse) -> Result<CompiledFilterDocument> {
        let predicate = match (&self.tags, &self.groups) {
            (Some(tags), None) => CompiledFilter::Flat(compile_filter(tags, universe)?),
            (None, Some(groups)) => {
                CompiledFilter::Grouped(compile_grouped_filter(groups, universe)?)
            }
            (None, None) => CompiledFilter::Flat(CompiledPredicate::default()),
            (Some(_), Some(_)) => {
                return Err(crate::error::CoreError::InvalidInput(
                    "filter document may specify `tags` or `groups`, not both".to_string(),
                ));
            }
        };

        Ok(CompiledFilterDocument {
            node: self.node,
            way: self.way,
            relation: self.relation,
            exploded: self.exploded,
            predicate,
        })
    }
}

impl Default for FilterDocument {
    fn default() -> Self {
        Self {
            node: true,
            way: true,
            relation: true,
            exploded: false,
            tags: None,
            groups: None,
        }
    }
}

pub enum CompiledFilter {
    Flat(CompiledPredicate),
    Grouped(CompiledGroupedPredicate),
}

pub struct CompiledFilterDocument {
    pub node: bool,
    pub way: bool,
    pub relation: bool,
    pub exploded: bool,
    pub predicate: CompiledFilter,
}

impl CompiledFilterDocument {
    pub fn matches(&self, tags: &crate::filter::TagMap) -> bool {
        match &self.predicate {
            CompiledFilter::Flat(p) => p.evaluate(tags),
            CompiledFilter::Grouped(g) => !g.matching_groups(tags).is_empty(),
        }
    }

    /// The exploded-output column set: concrete tag keys for a flat
    /// predicate, or group labels for a grouped one.
    pub fn projection_keys(&self) -> Vec<String> {
        match &self.predicate {
            CompiledFilter::Flat(p) => p.projection().iter().cloned().collect(),
            CompiledFilter::Grouped(g) => g.group_labels().map(str::to_string).collect(),
        }
    }

    /// For exploded mode, the per-row cell values keyed by column name —
    /// either the concrete matched value per projected key (flat) or the
    /// first matching value per group (grouped).
    pub fn exploded_row(&self, tags: &crate::filter::TagMap) -> crate::filter::TagMap {
        match &self.predicate {
            CompiledFilter::Flat(p) => p
                .projection()
                .iter()
                .filter_map(|key| tags.get(key).map(|v| (key.clone(), v.clone())))
                .collect(),
            CompiledFilter::Grouped(g) => g
                .exploded_row(tags)
                .into_iter()
                .filter_map(|(label, value)| value.map(|v| (label.to_string(), v.to_string())))
                .collect(),
        }
    }
}
