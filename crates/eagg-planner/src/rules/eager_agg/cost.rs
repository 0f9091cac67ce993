//! Accept or reject an insertion point.
//!
//! Manual overrides decide first: a blocklisted join is never pushed below,
//! and a non-empty whitelist replaces the cost model. Otherwise the partial
//! aggregate must compress its input by more than
//! `agg_push_down_threshold` (`input rows / estimated groups`).

use std::fmt;

use eagg_core::config::EagerAggConfig;
use eagg_core::error::Result;
use eagg_core::id::PlanNodeId;
use eagg_core::plan::{LogicalPlan, Symbol};
use eagg_core::stats::SchemaStats;
use serde::Serialize;

use super::locate::LocalGroupByTarget;
use crate::cardinality::CardinalityEstimator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    Blocklisted,
    Whitelisted,
    NotWhitelisted,
    /// No statistics for the child; decided by whether the threshold is zero.
    NoStatistics,
    /// None of the grouping keys has a known distinct count.
    UnknownKeys,
    NoAggregateFunctions,
    /// Decided by the compression ratio.
    Ratio,
}

/// Outcome of the cost model for one target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PushDownDecision {
    pub join_id: PlanNodeId,
    pub child_index: usize,
    pub accepted: bool,
    pub reason: DecisionReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_rows: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_groups: Option<f64>,
    pub threshold: f64,
}

impl PushDownDecision {
    pub fn ratio(&self) -> Option<f64> {
        Some(self.input_rows? as f64 / self.estimated_groups?)
    }
}

impl fmt::Display for PushDownDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = if self.accepted { "accepted" } else { "rejected" };
        write!(
            f,
            "join {} child {}: {} ({:?}",
            self.join_id, self.child_index, verdict, self.reason
        )?;
        if let (Some(rows), Some(groups), Some(ratio)) =
            (self.input_rows, self.estimated_groups, self.ratio())
        {
            write!(
                f,
                ", rows={} groups={:.1} ratio={:.2} threshold={}",
                rows, groups, ratio, self.threshold
            )?;
        }
        write!(f, ")")
    }
}

/// Decide whether `target` is worth a partial aggregate. `child` is the
/// subtree the partial aggregate would sit on.
pub fn can_push_down(
    target: &LocalGroupByTarget,
    child: &LogicalPlan,
    config: &EagerAggConfig,
    estimator: &dyn CardinalityEstimator,
) -> Result<PushDownDecision> {
    let decision = |accepted: bool, reason: DecisionReason| PushDownDecision {
        join_id: target.join_id,
        child_index: target.child_index,
        accepted,
        reason,
        input_rows: None,
        estimated_groups: None,
        threshold: config.agg_push_down_threshold,
    };

    if config.blocked_join_ids()?.contains(&target.join_id) {
        return Ok(decision(false, DecisionReason::Blocklisted));
    }

    let whitelist = config.whitelisted_targets()?;
    if !whitelist.is_empty() {
        return Ok(if whitelist.contains(&(target.join_id, target.child_index)) {
            decision(true, DecisionReason::Whitelisted)
        } else {
            decision(false, DecisionReason::NotWhitelisted)
        });
    }

    let Some(stats) = estimator.estimate(child) else {
        return Ok(decision(
            config.agg_push_down_threshold == 0.0,
            DecisionReason::NoStatistics,
        ));
    };

    let Some(groups) = estimate_group_count(&target.keys, &stats, config) else {
        return Ok(PushDownDecision {
            input_rows: Some(stats.row_count),
            ..decision(false, DecisionReason::UnknownKeys)
        });
    };

    if config.only_push_agg_with_functions && target.aggregates.is_empty() {
        return Ok(decision(false, DecisionReason::NoAggregateFunctions));
    }

    let rows = stats.row_count as f64;
    // 0/0 is NaN and never exceeds the threshold.
    let accepted = rows / groups > config.agg_push_down_threshold;
    Ok(PushDownDecision {
        input_rows: Some(stats.row_count),
        estimated_groups: Some(groups),
        ..decision(accepted, DecisionReason::Ratio)
    })
}

/// Estimated number of groups of a partial aggregate over `keys`, or `None`
/// when no key has a known distinct count.
///
/// Distinct counts are combined largest first; every later key contributes
/// `max(1, coefficient * ndv)`. On large inputs a long-tail key whose
/// contribution would overshoot the row count is skipped.
pub fn estimate_group_count(
    keys: &[Symbol],
    stats: &SchemaStats,
    config: &EagerAggConfig,
) -> Option<f64> {
    let rows = stats.row_count as f64;
    let mut all_unknown = true;
    let mut ndvs = Vec::with_capacity(keys.len());
    for key in keys {
        let Some(col) = stats.get(key).filter(|c| !c.is_unknown()) else {
            continue;
        };
        all_unknown = false;
        let ndv = col.distinct_count.unwrap_or(0);
        // One extra group for NULL.
        let null_group = u64::from(stats.row_count > 0 && col.null_count > 0);
        if ndv > 0 {
            ndvs.push((ndv + null_group) as f64);
        }
    }
    if all_unknown {
        return None;
    }

    ndvs.sort_by(|a, b| b.total_cmp(a));
    let mut estimate = 1.0f64;
    for (i, &ndv) in ndvs.iter().enumerate() {
        if i == 0 {
            estimate *= ndv;
            continue;
        }
        if stats.row_count > config.large_input_row_threshold
            && estimate * ndv > rows
            && ndv < ndvs[0] * config.tail_key_ndv_ratio
        {
            continue;
        }
        estimate *= (config.multi_agg_keys_correlated_coefficient * ndv).max(1.0);
    }
    Some(estimate.min(rows))
}
