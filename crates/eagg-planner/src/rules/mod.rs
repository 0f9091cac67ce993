//! Rewrite rules.

pub mod eager_agg;

use crate::rule::Rule;

pub use eager_agg::EagerAggregation;

/// Rules run by the optimizer unless told otherwise, in order.
pub fn default_rules() -> Vec<Box<dyn Rule>> {
    vec![Box::new(EagerAggregation::new())]
}
