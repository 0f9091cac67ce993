//! Rule trait and the context rules run in.

use std::sync::Mutex;

use eagg_core::config::EagerAggConfig;
use eagg_core::error::Result;
use eagg_core::function::FunctionRegistry;
use eagg_core::id::PlanNodeIdAllocator;
use eagg_core::plan::LogicalPlan;
use eagg_core::symbol::SymbolAllocator;

use crate::cardinality::CardinalityEstimator;
use crate::pattern::Pattern;
use crate::rules::eager_agg::cost::PushDownDecision;

/// A plan rewrite applied by the heuristic optimizer.
pub trait Rule: Send + Sync {
    fn name(&self) -> &'static str;

    /// Shape of the nodes this rule can rewrite.
    fn pattern(&self) -> Pattern;

    /// Rewrite `plan`, or return `Ok(None)` when the rule does not apply.
    fn apply(&self, plan: &LogicalPlan, ctx: &RuleContext<'_>) -> Result<Option<LogicalPlan>>;

    /// Rules that must not fire again on nodes this rule produced.
    fn blocked_rules(&self) -> Vec<&'static str> {
        Vec::new()
    }
}

/// Receives push-down decisions as they are made.
pub trait DecisionSink: Send + Sync {
    fn record(&self, decision: PushDownDecision);
}

/// Discards every decision.
#[derive(Debug, Default)]
pub struct NoopSink;

impl DecisionSink for NoopSink {
    fn record(&self, _decision: PushDownDecision) {}
}

/// Keeps every decision in arrival order.
#[derive(Debug, Default)]
pub struct CollectingSink {
    decisions: Mutex<Vec<PushDownDecision>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decisions(&self) -> Vec<PushDownDecision> {
        self.decisions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl DecisionSink for CollectingSink {
    fn record(&self, decision: PushDownDecision) {
        self.decisions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(decision);
    }
}

/// Everything a rule may consult while rewriting one plan.
pub struct RuleContext<'a> {
    pub config: &'a EagerAggConfig,
    pub symbols: &'a SymbolAllocator,
    pub ids: &'a PlanNodeIdAllocator,
    pub functions: &'a dyn FunctionRegistry,
    pub estimator: &'a dyn CardinalityEstimator,
    pub sink: &'a dyn DecisionSink,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::eager_agg::cost::DecisionReason;
    use eagg_core::id::PlanNodeId;

    fn decision(join: u32, accepted: bool) -> PushDownDecision {
        PushDownDecision {
            join_id: PlanNodeId::new(join),
            child_index: 0,
            accepted,
            reason: DecisionReason::NoStatistics,
            input_rows: None,
            estimated_groups: None,
            threshold: 0.0,
        }
    }

    #[test]
    fn collecting_sink_keeps_arrival_order() {
        let sink = CollectingSink::new();
        let dyn_sink: &dyn DecisionSink = &sink;
        dyn_sink.record(decision(5, false));
        dyn_sink.record(decision(3, true));
        let joins: Vec<u32> = sink.decisions().iter().map(|d| d.join_id.get()).collect();
        assert_eq!(joins, vec![5, 3]);
        NoopSink.record(decision(1, true));
    }
}
