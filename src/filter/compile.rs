//! Wildcard expansion, conflict detection, and compilation of raw filter
//! specs into a form cheap to evaluate per-feature.

use std::collections::{BTreeSet, HashMap};

use crate::error::{CoreError, Result};

use super::ast::{GroupedFilterSpec, TagFilterSpec, TagMap, ValueSpec};
use super::universe::TagUniverse;

/// One key's resolved polarity, tracked while expanding wildcards so a key
/// matched both positively (by this filter, or — for grouped filters — by a
/// sibling group) and negatively can be caught as a `FilterConflict` instead
/// of silently picking one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Polarity {
    Positive,
    Negative,
}

/// A tag predicate compiled against a fixed [`TagUniverse`]: wildcards
/// already expanded to concrete keys, ready to evaluate per-feature without
/// re-touching the universe.
#[derive(Debug, Clone, Default)]
pub struct CompiledPredicate {
    /// (key, value spec), in the order the surface spec listed them —
    /// "first matching tag value" (exploded-mode group cell) depends on
    /// this order.
    positive: Vec<(String, ValueSpec)>,
    negative: BTreeSet<String>,
    projection: BTreeSet<String>,
}

impl CompiledPredicate {
    /// Positive-disjunction (any positive key/value matches, or there are no
    /// positive entries) and negative-conjunction (every negative key is
    /// absent).
    pub fn evaluate(&self, tags: &TagMap) -> bool {
        let positive_ok = self.positive.is_empty()
            || self
                .positive
                .iter()
                .any(|(k, v)| tags.get(k).is_some_and(|actual| v.matches(actual)));
        let negative_ok = self.negative.iter().all(|k| !tags.contains_key(k));
        positive_ok && negative_ok
    }

    /// The first tag value (in spec order) that satisfied a positive entry;
    /// used as the exploded-mode cell for a group that matched.
    pub fn first_matching_value<'a>(&self, tags: &'a TagMap) -> Option<&'a str> {
        self.positive.iter().find_map(|(k, v)| {
            tags.get(k)
                .filter(|actual| v.matches(actual))
                .map(String::as_str)
        })
    }

    /// The concrete (post-wildcard-expansion) key set this predicate
    /// projects onto, for the ungrouped exploded-output column set.
    pub fn projection(&self) -> &BTreeSet<String> {
        &self.projection
    }
}

fn expand(
    spec: &TagFilterSpec,
    universe: &TagUniverse,
    polarity_tracker: &mut HashMap<String, Polarity>,
) -> Result<(Vec<(String, ValueSpec)>, BTreeSet<String>)> {
    let mut positive = Vec::new();
    let mut projection = BTreeSet::new();

    for (key_pattern, raw) in spec.iter() {
        let value_spec: ValueSpec = raw.clone().into();
        let polarity = if value_spec.is_negative() {
            Polarity::Negative
        } else {
            Polarity::Positive
        };

        for key in universe.expand_key(key_pattern) {
            projection.insert(key.clone());
            match polarity_tracker.get(&key) {
                Some(existing) if *existing != polarity => {
                    return Err(CoreError::FilterConflict { key });
                }
                _ => {
                    polarity_tracker.insert(key.clone(), polarity);
                }
            }
            if polarity == Polarity::Positive {
                positive.push((key, value_spec.clone()));
            }
        }
    }

    Ok((positive, projection))
}

/// Compile a flat (ungrouped) filter spec.
pub fn compile_filter(spec: &TagFilterSpec, universe: &TagUniverse) -> Result<CompiledPredicate> {
    let mut polarity_tracker = HashMap::new();
    let (positive, projection) = expand(spec, universe, &mut polarity_tracker)?;
    let negative = polarity_tracker
        .into_iter()
        .filter_map(|(k, p)| matches!(p, Polarity::Negative).then_some(k))
        .collect();
    Ok(CompiledPredicate {
        positive,
        negative,
        projection,
    })
}

/// A compiled grouped filter: an ordered list of (group label, predicate).
/// Conflict detection runs across *all* groups jointly — a key matched
/// positively by one group and negatively by another is still contradictory.
#[derive(Debug, Clone, Default)]
pub struct CompiledGroupedPredicate {
    groups: Vec<(String, CompiledPredicate)>,
}

impl CompiledGroupedPredicate {
    /// Labels of every group whose predicate matches `tags`, in spec order.
    pub fn matching_groups(&self, tags: &TagMap) -> Vec<&str> {
        self.groups
            .iter()
            .filter(|(_, pred)| pred.evaluate(tags))
            .map(|(label, _)| label.as_str())
            .collect()
    }

    /// The exploded-mode projection: one column per group label, cell is
    /// that group's first matching tag value (or absent if the group didn't
    /// match).
    pub fn exploded_row<'a>(&self, tags: &'a TagMap) -> Vec<(&str, Option<&'a str>)> {
        self.groups
            .iter()
            .map(|(label, pred)| (label.as_str(), pred.first_matching_value(tags)))
            .collect()
    }

    pub fn group_labels(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().map(|(label, _)| label.as_str())
    }
}

pub fn compile_grouped_filter(
    spec: &GroupedFilterSpec,
    universe: &TagUniverse,
) -> Result<CompiledGroupedPredicate> {
    let mut polarity_tracker = HashMap::new();
    let mut groups = Vec::with_capacity(spec.0.len());
    for (label, inner) in spec.0.iter() {
        let (positive, projection) = expand(inner, universe, &mut polarity_tracker)?;
        groups.push((
            label.clone(),
            CompiledPredicate {
                positive,
                negative: BTreeSet::new(),
                projection,
            },
        ));
    }
    // Negative keys are global to the grouped document: a key excluded by
    // one group's `false` entry is excluded everywhere, since polarity
    // conflicts were already rejected above.
    let negative: BTreeSet<String> = polarity_tracker
        .iter()
        .filter_map(|(k, p)| matches!(p, Polarity::Negative).then(|| k.clone()))
        .collect();
    for (_, pred) in groups.iter_mut() {
        pred.negative = negative.clone();
    }
    Ok(CompiledGroupedPredicate { groups })
}
