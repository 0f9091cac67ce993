//! eagg-planner: rule framework, cardinality estimation and the eager
//! aggregation rewrite.
//!
//! - [`pattern`] / [`rule`]: node patterns and the `Rule` trait.
//! - [`optimizer`]: fixed-point heuristic driver.
//! - [`cardinality`]: row and distinct-count estimates per plan node.
//! - [`rules::eager_agg`]: pushes partial aggregates below joins.
//! - [`dsl`]: YAML plan files.
//! - [`explain`]: text rendering of plans and decisions.

pub mod cardinality;
pub mod dsl;
pub mod explain;
pub mod optimizer;
pub mod pattern;
pub mod rule;
pub mod rules;

pub use cardinality::{CardinalityEstimator, StatsEstimator};
pub use dsl::yaml::{parse_plan_file, parse_yaml_plan, PlanFile};
pub use explain::{explain, explain_decisions};
pub use optimizer::{optimize, AppliedRule, HeuristicOptimizer, OptimizeOutcome};
pub use rule::{CollectingSink, DecisionSink, NoopSink, Rule, RuleContext};
pub use rules::eager_agg::cost::{DecisionReason, PushDownDecision};
pub use rules::eager_agg::EagerAggregation;
