//! Eager aggregation: push a partial aggregate below a join.
//!
//! For `Aggregate(keys, aggs) -> [Projection] -> Join`, the rule finds a join
//! child that produces every aggregated argument, inserts a partial
//! aggregate above it grouped by the symbols still needed above, and turns
//! the original aggregate into the final phase over the partial results.
//!
//! Pipeline: [`decompose`] attributes aggregates and keys to join sides,
//! [`locate`] searches for the insertion point, [`cost`] accepts or rejects
//! it, and [`rewrite`] rebuilds the plan.

pub mod classify;
pub mod cost;
pub mod decompose;
pub mod locate;
pub mod rewrite;

use std::collections::BTreeSet;

use eagg_core::error::{Error, Result};
use eagg_core::plan::{AggregateDescription, LogicalPlan, Symbol};
use tracing::debug;

use crate::pattern::Pattern;
use crate::rule::{Rule, RuleContext};
use classify::is_duplicate_insensitive;
use cost::can_push_down;
use decompose::{decompose_agg_join, decompose_projection, ProjectionSplit};
use locate::{BottomJoinLocator, SearchScope};
use rewrite::insert_local_aggregate;

pub const RULE_NAME: &str = "EagerAggregation";

#[derive(Debug, Clone, Copy, Default)]
pub struct EagerAggregation;

impl EagerAggregation {
    pub fn new() -> Self {
        Self
    }
}

fn is_final_grouped(plan: &LogicalPlan) -> bool {
    matches!(plan, LogicalPlan::Aggregate { agg, .. } if agg.is_final && !agg.keys.is_empty())
}

impl Rule for EagerAggregation {
    fn name(&self) -> &'static str {
        RULE_NAME
    }

    fn pattern(&self) -> Pattern {
        Pattern::aggregate().matching(is_final_grouped)
    }

    /// A rewritten aggregate still matches the pattern.
    fn blocked_rules(&self) -> Vec<&'static str> {
        vec![RULE_NAME]
    }

    fn apply(&self, plan: &LogicalPlan, ctx: &RuleContext<'_>) -> Result<Option<LogicalPlan>> {
        let LogicalPlan::Aggregate { id, input, agg } = plan else {
            return Ok(None);
        };
        if !agg.is_final || agg.keys.is_empty() {
            return Ok(None);
        }

        let (projection, join) = match input.as_ref() {
            LogicalPlan::Projection {
                input: below,
                assignments,
                ..
            } if matches!(below.as_ref(), LogicalPlan::Join { .. }) => {
                (Some(assignments.as_slice()), below.as_ref())
            }
            join @ LogicalPlan::Join { .. } => (None, join),
            _ => return Ok(None),
        };
        let (Some(left), Some(right)) = (join.child(0), join.child(1)) else {
            return Ok(None);
        };
        let left_names = left.name_set()?;
        let right_names = right.name_set()?;

        let Some(split) = decompose_agg_join(&agg.aggregates, &agg.keys, &left_names, &right_names)
        else {
            debug!(aggregate = %id, "aggregates cannot be attributed to join sides");
            return Ok(None);
        };

        let mut required: BTreeSet<Symbol> = agg.keys.iter().cloned().collect();
        for desc in &agg.aggregates {
            required.extend(desc.arguments.iter().cloned());
        }

        let projection_split = match projection {
            Some(assignments) => {
                let shadows = assignments.iter().any(|a| {
                    !a.is_identity()
                        && (left_names.contains(&a.symbol) || right_names.contains(&a.symbol))
                });
                if shadows {
                    debug!(aggregate = %id, "projection redefines a join column");
                    return Ok(None);
                }
                let Some(ps) = decompose_projection(
                    assignments,
                    &split,
                    &agg.aggregates,
                    &agg.keys,
                    &left_names,
                    &right_names,
                    ctx.symbols,
                ) else {
                    debug!(aggregate = %id, "projection cannot be decomposed");
                    return Ok(None);
                };
                if !ps.push_projection() {
                    for a in assignments {
                        required.extend(a.expr.symbols());
                    }
                }
                ps
            }
            None => ProjectionSplit::default(),
        };

        let key_set: BTreeSet<&Symbol> = agg.keys.iter().collect();
        let reads_key =
            |d: &AggregateDescription| d.arguments.iter().any(|a| key_set.contains(a));
        if let Some(d) = agg
            .aggregates
            .iter()
            .find(|d| reads_key(*d) && !is_duplicate_insensitive(d.name()))
        {
            debug!(aggregate = %id, function = %d, "aggregate over a grouping key is not duplicate-insensitive");
            return Ok(None);
        }

        let ps = &projection_split;
        let (aggregates, keys, renames, claimed) = if !ps.left_renames.is_empty() {
            let mut aggs = split.left.clone();
            aggs.extend(ps.left.iter().cloned());
            (aggs, split.left_keys.clone(), &ps.left_renames, Some(&ps.left_claimed))
        } else if !ps.right_renames.is_empty() {
            let mut aggs = split.right.clone();
            aggs.extend(ps.right.iter().cloned());
            (aggs, split.right_keys.clone(), &ps.right_renames, Some(&ps.right_claimed))
        } else {
            let aggs: Vec<AggregateDescription> = agg
                .aggregates
                .iter()
                .filter(|d| !reads_key(*d))
                .cloned()
                .collect();
            (aggs, agg.keys.clone(), &ps.left_renames, None)
        };

        if let Some(claimed) = claimed {
            let uncovered = agg.aggregates.iter().find(|d| {
                !reads_key(*d)
                    && !claimed.contains(&d.output)
                    && !aggregates.iter().any(|p| p.output == d.output)
            });
            if let Some(d) = uncovered {
                debug!(aggregate = %id, function = %d, "aggregate is not covered by the decomposed side");
                return Ok(None);
            }
        }

        // Symbols read above the insertion point that must not be aggregated away.
        let mut protected = BTreeSet::new();
        if let Some(assignments) = projection {
            if !ps.push_projection() {
                for a in assignments.iter().filter(|a| !a.is_identity()) {
                    protected.extend(a.expr.symbols());
                }
            }
        }
        for column in renames.keys() {
            protected.remove(column);
        }
        for d in agg.aggregates.iter().filter(|d| reads_key(*d)) {
            protected.extend(d.arguments.iter().cloned());
        }
        let renamed_columns: BTreeSet<Symbol> = renames.keys().cloned().collect();

        let scope = SearchScope {
            projection_required: &ps.required,
            projection_generated: &ps.generated,
            required: &required,
            renamed_columns: &renamed_columns,
            protected: &protected,
            every_join: ctx.config.agg_push_down_every_join,
        };
        let parent_of_first_join = if projection.is_some() {
            input.as_ref()
        } else {
            plan
        };
        let targets = BottomJoinLocator::new(scope).locate(parent_of_first_join, aggregates, keys)?;
        if targets.is_empty() {
            debug!(aggregate = %id, "no insertion point found");
            return Ok(None);
        }

        let mut current = plan.clone();
        let mut applied = 0usize;
        for target in targets.values() {
            let child = current
                .find(target.join_id)
                .and_then(|j| j.child(target.child_index))
                .ok_or_else(|| {
                    Error::Invariant(format!(
                        "join {} child {} vanished during rewrite",
                        target.join_id, target.child_index
                    ))
                })?;
            let decision = can_push_down(target, child, ctx.config, ctx.estimator)?;
            debug!(aggregate = %id, %decision, "eager aggregation decision");
            let accepted = decision.accepted;
            ctx.sink.record(decision);
            if !accepted {
                continue;
            }
            let push_projection = ps.push_projection() && applied == 0;
            current = insert_local_aggregate(&current, target, push_projection, renames, ctx)?;
            applied += 1;
        }

        if applied == 0 {
            return Ok(None);
        }
        current
            .validate()
            .map_err(|e| Error::Invariant(format!("eager aggregation produced an invalid plan: {}", e)))?;
        Ok(Some(current))
    }
}
