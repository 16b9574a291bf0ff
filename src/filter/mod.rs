//! Tag predicate compilation and evaluation (grounded in the distillation's
//! Tag Predicate module): wildcard key/value specs, positive-disjunction /
//! negative-conjunction matching, grouped filters with per-group labels, and
//! the projection-key set an exploded-mode output needs.

mod ast;
mod compile;
mod universe;

pub use ast::{GroupedFilterSpec, RawValueSpec, TagFilterSpec, TagMap, ValueSpec};
pub use compile::{compile_filter, compile_grouped_filter, CompiledGroupedPredicate, CompiledPredicate};
pub use universe::{TagUniverse, TagUniverseBuilder};
