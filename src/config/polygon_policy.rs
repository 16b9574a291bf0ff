//! Closed-way polygon-vs-linestring classification (§4.4): an ordered,
//! per-key include/exclude whitelist with a universal `area=yes`/`area=no`
//! override that always wins.

use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;

use crate::error::Result;
use crate::filter::TagMap;

const DEFAULT_POLICY_YAML: &str = include_str!("default_policy.yaml");

#[derive(Debug, Clone, Deserialize)]
pub struct AreaKeyRule {
    pub key: String,
    #[serde(default)]
    pub exclude_values: Vec<String>,
    #[serde(default)]
    pub include_values: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PolygonPolicyConfig {
    pub keys: Vec<AreaKeyRule>,
}

impl PolygonPolicyConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&content)
            .map_err(|e| crate::error::CoreError::InvalidInput(format!("bad polygon policy: {e}")))
    }

    pub fn default_policy() -> Self {
        serde_yaml::from_str(DEFAULT_POLICY_YAML).expect("built-in default_policy.yaml is valid")
    }

    pub fn compile(&self) -> CompiledPolygonPolicy {
        let rules = self
            .keys
            .iter()
            .map(|rule| CompiledAreaRule {
                key: rule.key.clone(),
                exclude: rule.exclude_values.iter().cloned().collect(),
                include: rule.include_values.iter().cloned().collect(),
            })
            .collect();
        CompiledPolygonPolicy { rules }
    }
}

impl Default for PolygonPolicyConfig {
    fn default() -> Self {
        Self::default_policy()
    }
}

struct CompiledAreaRule {
    key: String,
    exclude: HashSet<String>,
    include: HashSet<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClosedWayShape {
    Polygon,
    Linestring,
}

pub struct CompiledPolygonPolicy {
    rules: Vec<CompiledAreaRule>,
}

impl CompiledPolygonPolicy {
    /// Classifies a *closed* way's tags. Open ways are never passed in —
    /// that branch (closed vs. not) is decided by the caller before this is
    /// consulted.
    pub fn classify(&self, tags: &TagMap) -> ClosedWayShape {
        match tags.get("area").map(String::as_str) {
            Some("yes") => return ClosedWayShape::Polygon,
            Some("no") => return ClosedWayShape::Linestring,
            _ => {}
        }

        for rule in &self.rules {
            let Some(value) = tags.get(&rule.key) else {
                continue;
            };
            if !rule.include.is_empty() {
                if rule.include.contains(value) {
                    return ClosedWayShape::Polygon;
                }
                continue;
            }
            if rule.exclude.contains(value) {
                continue;
            }
            return ClosedWayShape::Polygon;
        }

        ClosedWayShape::Linestring
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[(&str, &str)]) -> TagMap {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn building_closed_way_is_polygon() {
        let policy = PolygonPolicyConfig::default_policy().compile();
        assert_eq!(
            policy.classify(&tags(&[("building", "yes")])),
            ClosedWayShape::Polygon
        );
    }

    #[test]
    fn highway_closed_way_stays_linestring() {
        let policy = PolygonPolicyConfig::default_policy().compile();
        assert_eq!(
            policy.classify(&tags(&[("highway", "residential")])),
            ClosedWayShape::Linestring
        );
    }

    #[test]
    fn area_yes_overrides_everything() {
        let policy = PolygonPolicyConfig::default_policy().compile();
        assert_eq!(
            policy.classify(&tags(&[("highway", "pedestrian"), ("area", "yes")])),
            ClosedWayShape::Polygon
        );
    }

    #[test]
    fn area_no_overrides_building() {
        let policy = PolygonPolicyConfig::default_policy().compile();
        assert_eq!(
            policy.classify(&tags(&[("building", "yes"), ("area", "no")])),
            ClosedWayShape::Linestring
        );
    }

    #[test]
    fn coastline_is_excluded_from_natural() {
        let policy = PolygonPolicyConfig::default_policy().compile();
        assert_eq!(
            policy.classify(&tags(&[("natural", "coastline")])),
            ClosedWayShape::Linestring
        );
        assert_eq!(
            policy.classify(&tags(&[("natural", "wood")])),
            ClosedWayShape::Polygon
        );
    }

    #[test]
    fn waterway_only_polygon_for_whitelisted_values() {
        let policy = PolygonPolicyConfig::default_policy().compile();
        assert_eq!(
            policy.classify(&tags(&[("waterway", "riverbank")])),
            ClosedWayShape::Polygon
        );
        assert_eq!(
            policy.classify(&tags(&[("waterway", "stream")])),
            ClosedWayShape::Linestring
        );
    }
}
