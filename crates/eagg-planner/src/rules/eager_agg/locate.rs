//! Search for the join children that receive a partial aggregate.
//!
//! The walk starts at the node directly above the first join and descends
//! through joins (and at most one projection sitting between two joins).
//! Each branch carries its own bookkeeping by value; only the discovered
//! targets and the first-join flag are shared across branches.

use std::collections::{BTreeMap, BTreeSet};

use eagg_core::error::Result;
use eagg_core::id::PlanNodeId;
use eagg_core::plan::{
    AggregateDescription, Assignment, JoinStrictness, LogicalPlan, Symbol,
};
use serde::Serialize;
use tracing::trace;

use super::classify::{classify, AggFuncClass};

/// One place to insert a partial aggregate: above child `child_index` of
/// join `join_id`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocalGroupByTarget {
    pub join_id: PlanNodeId,
    pub child_index: usize,
    pub aggregates: Vec<AggregateDescription>,
    pub keys: Vec<Symbol>,
    /// Number of joins between the global aggregate and the insertion point.
    pub depth: usize,
    /// The path crosses a projection between two joins.
    pub push_through_projection: bool,
}

/// Inputs that stay fixed for the whole search.
#[derive(Debug, Clone, Copy)]
pub struct SearchScope<'a> {
    /// Symbols read by a projection that moves below the join.
    pub projection_required: &'a BTreeSet<Symbol>,
    /// Non-identity outputs of that projection.
    pub projection_generated: &'a BTreeSet<Symbol>,
    /// Grouping keys and aggregate arguments of the global aggregate, plus
    /// symbols read by a projection that stays above the join.
    pub required: &'a BTreeSet<Symbol>,
    /// Columns consumed by deep decomposition.
    pub renamed_columns: &'a BTreeSet<Symbol>,
    /// Symbols read above the insertion point that no partial aggregate may consume.
    pub protected: &'a BTreeSet<Symbol>,
    pub every_join: bool,
}

#[derive(Debug, Clone, Default)]
struct Branch {
    required: BTreeSet<Symbol>,
    join_required: BTreeSet<Symbol>,
    aggregates: Vec<AggregateDescription>,
    keys: Vec<Symbol>,
    depth: usize,
    /// Output of a projection between joins to the single column it reads.
    origins: BTreeMap<Symbol, Symbol>,
}

pub struct BottomJoinLocator<'a> {
    scope: SearchScope<'a>,
    targets: BTreeMap<PlanNodeId, LocalGroupByTarget>,
    first_join_visited: bool,
}

impl<'a> BottomJoinLocator<'a> {
    pub fn new(scope: SearchScope<'a>) -> Self {
        Self {
            scope,
            targets: BTreeMap::new(),
            first_join_visited: false,
        }
    }

    /// Run the search from `parent`, whose first child is the topmost join.
    pub fn locate(
        mut self,
        parent: &LogicalPlan,
        aggregates: Vec<AggregateDescription>,
        keys: Vec<Symbol>,
    ) -> Result<BTreeMap<PlanNodeId, LocalGroupByTarget>> {
        let branch = Branch {
            aggregates,
            keys,
            ..Branch::default()
        };
        self.descend(parent, 0, branch)?;
        Ok(self.targets)
    }

    fn descend(&mut self, parent: &LogicalPlan, index: usize, branch: Branch) -> Result<()> {
        let Some(child) = parent.child(index) else {
            return Ok(());
        };

        if !self.first_join_visited
            && branch.origins.is_empty()
            && self.scope.projection_required.is_empty()
        {
            if let LogicalPlan::Projection {
                input, assignments, ..
            } = child
            {
                if matches!(input.as_ref(), LogicalPlan::Join { .. }) {
                    let origins = origin_columns(assignments, &input.name_set()?);
                    if !origins.is_empty() {
                        trace!(projection = %child.id(), "descending through projection");
                        return self.visit_join(input, Branch { origins, ..branch });
                    }
                }
            }
        }

        match child {
            LogicalPlan::Join { .. } if !self.first_join_visited => self.visit_join(child, branch),
            _ => self.finalize(parent, index, branch),
        }
    }

    fn visit_join(&mut self, node: &LogicalPlan, mut branch: Branch) -> Result<()> {
        let LogicalPlan::Join { id, join, .. } = node else {
            return Ok(());
        };
        if !self.scope.every_join {
            self.first_join_visited = true;
        }
        if join.strictness != JoinStrictness::All {
            trace!(join = %id, strictness = ?join.strictness, "join strictness blocks push-down");
            return Ok(());
        }

        let read = join.required_symbols();
        branch.required.extend(read.iter().cloned());
        branch.join_required.extend(read);

        let empty = BTreeSet::new();
        let before = self.targets.len();
        for (index, side) in node.children().into_iter().enumerate() {
            if index == 1 && self.targets.len() != before {
                break;
            }
            if matches!(side, LogicalPlan::Aggregate { .. }) {
                continue;
            }
            let names = side.name_set()?;
            let generated = if self.scope.projection_required.is_empty() {
                &empty
            } else if self.scope.projection_required.is_subset(&names) {
                self.scope.projection_generated
            } else {
                continue;
            };
            let Some((aggregates, keys)) =
                narrow_to_side(&branch.aggregates, &branch.keys, &names, generated)
            else {
                trace!(join = %id, index, "aggregates do not fit this side");
                continue;
            };
            let next = Branch {
                aggregates,
                keys,
                depth: branch.depth + 1,
                ..branch.clone()
            };
            self.descend(node, index, next)?;
        }
        Ok(())
    }

    fn finalize(&mut self, parent: &LogicalPlan, index: usize, branch: Branch) -> Result<()> {
        let (LogicalPlan::Join { id, .. }, Some(child)) = (parent, parent.child(index)) else {
            return Ok(());
        };

        let mut candidates = child.output_names()?;
        candidates.extend(self.scope.projection_generated.iter().cloned());

        let mut required: BTreeSet<Symbol> = branch
            .required
            .union(self.scope.required)
            .cloned()
            .collect();
        let mut origin_columns = BTreeSet::new();
        for (output, origin) in &branch.origins {
            if required.remove(output) {
                required.insert(origin.clone());
                origin_columns.insert(origin.clone());
            }
        }

        candidates.retain(|c| required.contains(c));
        if !branch.aggregates.is_empty() {
            candidates.retain(|c| !self.scope.renamed_columns.contains(c));
        }
        let produced: BTreeSet<&Symbol> = branch
            .aggregates
            .iter()
            .flat_map(|d| d.arguments.iter().chain(std::iter::once(&d.output)))
            .collect();
        candidates.retain(|c| !produced.contains(c));

        let consumed = branch.aggregates.iter().flat_map(|d| d.arguments.iter());
        for arg in consumed {
            if branch.join_required.contains(arg)
                || self.scope.protected.contains(arg)
                || origin_columns.contains(arg)
            {
                trace!(join = %id, argument = %arg, "argument is still read above the insertion point");
                return Ok(());
            }
        }

        let mut keys = branch.keys;
        keys.extend(candidates);
        keys.sort();
        keys.dedup();
        if keys.is_empty() {
            trace!(join = %id, index, "partial aggregate would have no grouping keys");
            return Ok(());
        }

        let target = LocalGroupByTarget {
            join_id: *id,
            child_index: index,
            aggregates: branch.aggregates,
            keys,
            depth: branch.depth,
            push_through_projection: !branch.origins.is_empty(),
        };
        trace!(join = %id, index, keys = ?target.keys, "found insertion point");
        self.targets.entry(*id).or_insert(target);
        Ok(())
    }
}

/// Keep `aggregates` only if every one of them reads a single symbol visible
/// on this side; keep the keys visible on this side.
pub fn narrow_to_side(
    aggregates: &[AggregateDescription],
    keys: &[Symbol],
    names: &BTreeSet<Symbol>,
    generated: &BTreeSet<Symbol>,
) -> Option<(Vec<AggregateDescription>, Vec<Symbol>)> {
    let visible = |s: &Symbol| names.contains(s) || generated.contains(s);
    for desc in aggregates {
        if classify(desc.name()) == AggFuncClass::Unknown {
            return None;
        }
        match desc.single_argument() {
            Some(arg) if visible(arg) => {}
            _ => return None,
        }
    }
    let keys = keys.iter().filter(|k| visible(k)).cloned().collect();
    Some((aggregates.to_vec(), keys))
}

/// Map each non-identity output to the one column it reads. Empty when any
/// output reads several columns or shadows a column of the input.
fn origin_columns(
    assignments: &[Assignment],
    input_names: &BTreeSet<Symbol>,
) -> BTreeMap<Symbol, Symbol> {
    let mut out = BTreeMap::new();
    for a in assignments.iter().filter(|a| !a.is_identity()) {
        let used = a.expr.symbols();
        if used.len() != 1 || input_names.contains(&a.symbol) {
            return BTreeMap::new();
        }
        if let Some(origin) = used.into_iter().next() {
            out.insert(a.symbol.clone(), origin);
        }
    }
    out
}
