//! Umbrella crate for the eager-aggregation planner.
//!
//! Re-exports the workspace crates so integration tests under `tests/` can
//! depend on a single package.

pub use eagg_core;
pub use eagg_planner;
