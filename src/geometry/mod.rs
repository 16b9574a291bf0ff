//! Geometry Predicate (clip-polygon intersection testing) and Geometry
//! Repair (the cleanup pass applied to reconstructed way/relation rings).

mod predicate;
mod repair;

pub use predicate::GeometryPredicate;
pub use repair::{repair_polygon, RepairOutcome, RepairedPolygon};
