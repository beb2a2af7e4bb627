//! beat-planner core engine
//!
//! Partitions field-sales customers into territories and builds daily
//! visiting routes ("beats") per territory, subject to size, workload,
//! geographic-tightness/separation, and minimum-revenue constraints.
//!
//! Entry points: [`territory::partition_territories`],
//! [`builders::build_beats`], and [`validate::validate`]. Ingestion, export,
//! persistence, and rendering belong to the surrounding system.

pub mod builders;
pub mod constraints;
pub mod dbscan;
pub mod error;
pub mod geo;
pub mod ledger;
pub mod metrics;
pub mod model;
pub mod territory;
pub mod validate;
