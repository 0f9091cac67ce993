//! Fixed-point heuristic driver.
//!
//! Each pass walks the plan top-down and offers every node to every rule
//! whose pattern matches. After a rewrite, the rewriting rule's block list
//! is recorded against the nodes it produced so those rules never fire on
//! them again. Passes repeat until one changes nothing or the configured
//! pass limit is reached.

use std::collections::{BTreeSet, HashSet};

use eagg_core::config::EagerAggConfig;
use eagg_core::error::Result;
use eagg_core::function::{BuiltinFunctions, FunctionRegistry};
use eagg_core::id::{PlanNodeId, PlanNodeIdAllocator};
use eagg_core::plan::LogicalPlan;
use eagg_core::symbol::SymbolAllocator;
use serde::Serialize;
use tracing::{debug, warn};

use crate::cardinality::{CardinalityEstimator, StatsEstimator};
use crate::pattern::matches;
use crate::rule::{DecisionSink, NoopSink, Rule, RuleContext};
use crate::rules::default_rules;

/// One successful rule application.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppliedRule {
    pub rule: &'static str,
    pub node: PlanNodeId,
    pub pass: usize,
}

#[derive(Debug, Clone)]
pub struct OptimizeOutcome {
    pub plan: LogicalPlan,
    pub passes: usize,
    pub applied: Vec<AppliedRule>,
}

pub struct HeuristicOptimizer {
    rules: Vec<Box<dyn Rule>>,
    config: EagerAggConfig,
}

type Blocked = HashSet<(&'static str, PlanNodeId)>;

impl HeuristicOptimizer {
    pub fn new(config: EagerAggConfig) -> Self {
        Self::with_rules(config, default_rules())
    }

    pub fn with_rules(config: EagerAggConfig, rules: Vec<Box<dyn Rule>>) -> Self {
        Self { rules, config }
    }

    pub fn config(&self) -> &EagerAggConfig {
        &self.config
    }

    pub fn optimize(
        &self,
        plan: LogicalPlan,
        functions: &dyn FunctionRegistry,
        estimator: &dyn CardinalityEstimator,
        sink: &dyn DecisionSink,
    ) -> Result<OptimizeOutcome> {
        self.config.validate()?;
        plan.validate()
            .map_err(|e| e.with_context("validating the input plan"))?;

        let symbols = SymbolAllocator::from_plan(&plan);
        let ids = PlanNodeIdAllocator::starting_after(&plan);
        let ctx = RuleContext {
            config: &self.config,
            symbols: &symbols,
            ids: &ids,
            functions,
            estimator,
            sink,
        };

        let mut blocked = Blocked::new();
        let mut applied = Vec::new();
        let mut plan = plan;
        let mut passes = 0;
        for pass in 1..=self.config.max_optimizer_passes {
            passes = pass;
            let before = applied.len();
            plan = self.rewrite_node(plan, &ctx, &mut blocked, &mut applied, pass)?;
            if applied.len() == before {
                break;
            }
            if pass == self.config.max_optimizer_passes {
                warn!(passes = pass, "optimizer stopped before reaching a fixed point");
            }
        }
        debug!(passes, rewrites = applied.len(), "optimization finished");
        Ok(OptimizeOutcome {
            plan,
            passes,
            applied,
        })
    }

    fn rewrite_node(
        &self,
        node: LogicalPlan,
        ctx: &RuleContext<'_>,
        blocked: &mut Blocked,
        applied: &mut Vec<AppliedRule>,
        pass: usize,
    ) -> Result<LogicalPlan> {
        let mut node = node;
        for rule in &self.rules {
            if blocked.contains(&(rule.name(), node.id())) || !matches(&node, &rule.pattern()) {
                continue;
            }
            let Some(rewritten) = rule.apply(&node, ctx)? else {
                continue;
            };
            let before = node_ids(&node);
            let produced = node_ids(&rewritten)
                .into_iter()
                .filter(|id| !before.contains(id))
                .chain(std::iter::once(rewritten.id()));
            let block_list = rule.blocked_rules();
            for id in produced {
                for b in &block_list {
                    blocked.insert((*b, id));
                }
            }
            debug!(rule = rule.name(), node = %node.id(), pass, "rule applied");
            applied.push(AppliedRule {
                rule: rule.name(),
                node: node.id(),
                pass,
            });
            node = rewritten;
        }
        node.map_children(|child| self.rewrite_node(child, ctx, blocked, applied, pass))
    }
}

fn node_ids(plan: &LogicalPlan) -> BTreeSet<PlanNodeId> {
    let mut out = BTreeSet::new();
    let mut stack = vec![plan];
    while let Some(node) = stack.pop() {
        out.insert(node.id());
        stack.extend(node.children());
    }
    out
}

/// Optimize with the default rules, built-in functions and scan statistics.
pub fn optimize(plan: LogicalPlan, config: &EagerAggConfig) -> Result<LogicalPlan> {
    let optimizer = HeuristicOptimizer::new(config.clone());
    let outcome = optimizer.optimize(plan, &BuiltinFunctions, &StatsEstimator, &NoopSink)?;
    Ok(outcome.plan)
}
