//! Insert a partial aggregate below a join and re-express the global
//! aggregate on top of it.
//!
//! The path from the global aggregate down to the target join is rebuilt
//! top-down; subtrees off the path are reused as they are. Every partial
//! output gets a fresh `inter#` symbol, and nodes on the path pass those
//! symbols up to the global aggregate.

use std::collections::{BTreeMap, HashMap};

use eagg_core::error::{Error, Result};
use eagg_core::function::{merge_name, state_name};
use eagg_core::plan::{
    AggregateDescription, AggregateStep, Assignment, LogicalPlan, Symbol,
};
use eagg_core::schema::DataType;
use tracing::trace;

use super::classify::{classify, AggFuncClass};
use super::decompose::intermediate_hint;
use super::locate::LocalGroupByTarget;
use crate::rule::RuleContext;

/// Rewrite `plan` (rooted at the global aggregate) for one accepted target.
///
/// `push_projection` moves the projection under the aggregate below the
/// join. `deep_renames` maps columns consumed by deep decomposition to the
/// intermediate symbols already allocated for them.
pub fn insert_local_aggregate(
    plan: &LogicalPlan,
    target: &LocalGroupByTarget,
    push_projection: bool,
    deep_renames: &BTreeMap<Symbol, Symbol>,
    ctx: &RuleContext<'_>,
) -> Result<LogicalPlan> {
    let mut rewriter = Rewriter::new(target, push_projection, deep_renames, ctx)?;
    let out = rewriter.rewrite(plan)?;
    if !rewriter.inserted {
        return Err(Error::Invariant(format!(
            "join {} not reached from aggregate {}",
            target.join_id,
            plan.id()
        )));
    }
    Ok(out)
}

struct Rewriter<'r, 'a> {
    ctx: &'r RuleContext<'a>,
    target: &'r LocalGroupByTarget,
    push_projection: bool,
    /// Partial output (as named in the target) to its fresh symbol.
    by_output: HashMap<Symbol, Symbol>,
    /// Consumed argument to the fresh symbols of every partial that reads it.
    by_argument: BTreeMap<Symbol, Vec<Symbol>>,
    /// Renames applied inside expressions and join attributes.
    renames: HashMap<Symbol, Symbol>,
    captured_projection: Option<Vec<Assignment>>,
    global_visited: bool,
    join_visited: bool,
    inserted: bool,
}

fn missing(symbol: &str, node: &LogicalPlan) -> Error {
    Error::Invariant(format!(
        "symbol '{}' is not produced below {} {}",
        symbol,
        node.kind(),
        node.id()
    ))
}

fn types_of(
    symbols: &[Symbol],
    types: &HashMap<Symbol, DataType>,
    node: &LogicalPlan,
) -> Result<Vec<DataType>> {
    symbols
        .iter()
        .map(|s| types.get(s).cloned().ok_or_else(|| missing(s, node)))
        .collect()
}

impl<'r, 'a> Rewriter<'r, 'a> {
    fn new(
        target: &'r LocalGroupByTarget,
        push_projection: bool,
        deep_renames: &BTreeMap<Symbol, Symbol>,
        ctx: &'r RuleContext<'a>,
    ) -> Result<Self> {
        let mut by_output = HashMap::new();
        let mut by_argument: BTreeMap<Symbol, Vec<Symbol>> = BTreeMap::new();
        for desc in &target.aggregates {
            let arg = desc.single_argument().ok_or_else(|| {
                Error::Invariant(format!(
                    "partial aggregate {} must read exactly one symbol",
                    desc
                ))
            })?;
            let fresh = if deep_renames.get(arg) == Some(&desc.output) {
                desc.output.clone()
            } else {
                ctx.symbols.new_symbol(&intermediate_hint(arg))
            };
            by_output.insert(desc.output.clone(), fresh.clone());
            by_argument.entry(arg.clone()).or_default().push(fresh);
        }

        let mut renames = HashMap::new();
        for (arg, fresh) in &by_argument {
            if let Some(inter) = deep_renames.get(arg) {
                renames.insert(arg.clone(), inter.clone());
            } else if let [only] = fresh.as_slice() {
                renames.insert(arg.clone(), only.clone());
            }
        }

        Ok(Self {
            ctx,
            target,
            push_projection,
            by_output,
            by_argument,
            renames,
            captured_projection: None,
            global_visited: false,
            join_visited: false,
            inserted: false,
        })
    }

    fn rewrite(&mut self, node: &LogicalPlan) -> Result<LogicalPlan> {
        if !node.contains_node(self.target.join_id) {
            return Ok(node.clone());
        }
        match node {
            LogicalPlan::Aggregate { id, input, agg } if !self.global_visited => {
                self.global_visited = true;
                let child = self.rewrite(input)?;
                let types = child.name_to_type()?;
                let aggregates = agg
                    .aggregates
                    .iter()
                    .map(|d| self.rebind_global(d, &types, &child))
                    .collect::<Result<Vec<_>>>()?;
                Ok(LogicalPlan::Aggregate {
                    id: *id,
                    input: Box::new(child),
                    agg: AggregateStep {
                        aggregates,
                        ..agg.clone()
                    },
                })
            }
            LogicalPlan::Projection {
                id,
                input,
                assignments,
            } => {
                if !matches!(input.as_ref(), LogicalPlan::Join { .. }) {
                    return Err(Error::Invariant(format!(
                        "projection {} is not directly above a join",
                        id
                    )));
                }
                if !self.join_visited {
                    if self.push_projection {
                        trace!(projection = %id, "moving projection below the join");
                        self.captured_projection = Some(assignments.clone());
                        return self.rewrite(input);
                    }
                    let child = self.rewrite(input)?;
                    let assignments = self.rename_assignments(assignments, &child)?;
                    return Ok(LogicalPlan::Projection {
                        id: *id,
                        input: Box::new(child),
                        assignments,
                    });
                }
                if !self.target.push_through_projection {
                    return Err(Error::Invariant(format!(
                        "projection {} between joins on the path to join {}",
                        id, self.target.join_id
                    )));
                }
                let child = self.rewrite(input)?;
                let assignments = self.pass_through_assignments(assignments, &child)?;
                Ok(LogicalPlan::Projection {
                    id: *id,
                    input: Box::new(child),
                    assignments,
                })
            }
            LogicalPlan::Join {
                id,
                left,
                right,
                join,
            } => {
                self.join_visited = true;
                let (left, right) = if *id == self.target.join_id {
                    match self.target.child_index {
                        0 => (self.insert_below(left)?, right.as_ref().clone()),
                        1 => (left.as_ref().clone(), self.insert_below(right)?),
                        other => {
                            return Err(Error::Invariant(format!(
                                "join {} has no child {}",
                                id, other
                            )))
                        }
                    }
                } else if left.contains_node(self.target.join_id) {
                    (self.rewrite(left)?, right.as_ref().clone())
                } else {
                    (left.as_ref().clone(), self.rewrite(right)?)
                };
                Ok(LogicalPlan::Join {
                    id: *id,
                    left: Box::new(left),
                    right: Box::new(right),
                    join: join.renamed(&self.renames),
                })
            }
            other => Err(Error::Invariant(format!(
                "{} {} on the path to join {}",
                other.kind(),
                other.id(),
                self.target.join_id
            ))),
        }
    }

    /// The global aggregate reads the partial outputs; state-producing
    /// partials are finished with the merge variant.
    fn rebind_global(
        &self,
        desc: &AggregateDescription,
        types: &HashMap<Symbol, DataType>,
        child: &LogicalPlan,
    ) -> Result<AggregateDescription> {
        let pushed = self.by_output.get(&desc.output);
        let arguments = match pushed {
            Some(fresh) => vec![fresh.clone()],
            None => desc.arguments.clone(),
        };
        let argument_types = types_of(&arguments, types, child)?;
        if pushed.is_none() && argument_types == desc.function.argument_types {
            return Ok(desc.clone());
        }

        let reads_state = argument_types.iter().any(DataType::is_aggregate_state);
        let name = if classify(desc.name()) == AggFuncClass::NeedMerge && reads_state {
            merge_name(desc.name())
        } else {
            desc.name().to_string()
        };
        let function = self
            .ctx
            .functions
            .resolve(&name, &argument_types, &desc.parameters)
            .map_err(|e| e.with_context(format!("rebinding global aggregate {}", desc)))?;
        Ok(AggregateDescription {
            function,
            arguments,
            output: desc.output.clone(),
            parameters: desc.parameters.clone(),
        })
    }

    /// Projection that stays above the join: consumed identities become
    /// identities of the partial outputs, expressions read through renames.
    fn rename_assignments(
        &self,
        assignments: &[Assignment],
        child: &LogicalPlan,
    ) -> Result<Vec<Assignment>> {
        let types = child.name_to_type()?;
        let mut out = Vec::with_capacity(assignments.len());
        for a in assignments {
            if a.is_identity() {
                if types.contains_key(&a.symbol) {
                    out.push(a.clone());
                }
                match self.by_argument.get(&a.symbol) {
                    Some(fresh) => {
                        for f in fresh {
                            let dt = types.get(f).cloned().ok_or_else(|| missing(f, child))?;
                            out.push(Assignment::identity(f.clone(), dt));
                        }
                    }
                    None if !types.contains_key(&a.symbol) => return Err(missing(&a.symbol, child)),
                    None => {}
                }
                continue;
            }
            let expr = a.expr.rename(&self.renames);
            if let Some(s) = expr.symbols().iter().find(|s| !types.contains_key(*s)) {
                return Err(missing(s, child));
            }
            let data_type = if expr == a.expr {
                a.data_type.clone()
            } else {
                expr.data_type(&types)?
            };
            out.push(Assignment {
                symbol: a.symbol.clone(),
                expr,
                data_type,
            });
        }
        Ok(out)
    }

    /// Projection between two joins: pass the partial outputs through and
    /// drop outputs whose inputs were aggregated away.
    fn pass_through_assignments(
        &self,
        assignments: &[Assignment],
        child: &LogicalPlan,
    ) -> Result<Vec<Assignment>> {
        let types = child.name_to_type()?;
        let mut out = Vec::with_capacity(assignments.len());
        for a in assignments {
            if a.is_identity() {
                if let Some(fresh) = self.by_argument.get(&a.symbol) {
                    for f in fresh {
                        let dt = types.get(f).cloned().ok_or_else(|| missing(f, child))?;
                        out.push(Assignment::identity(f.clone(), dt));
                    }
                    continue;
                }
            }
            if a.expr.symbols().iter().all(|s| types.contains_key(s)) {
                out.push(a.clone());
            }
        }
        Ok(out)
    }

    /// Build `[projection] -> partial aggregate` above `child`.
    fn insert_below(&mut self, child: &LogicalPlan) -> Result<LogicalPlan> {
        let mut below = child.clone();

        if let Some(assignments) = self.captured_projection.take() {
            let types = below.name_to_type()?;
            let mut kept: Vec<Assignment> = assignments
                .into_iter()
                .filter(|a| !a.is_identity() || types.contains_key(&a.symbol))
                .collect();
            for name in below.output_names()? {
                if !kept.iter().any(|a| a.symbol == name) {
                    let dt = types.get(&name).cloned().ok_or_else(|| missing(&name, &below))?;
                    kept.push(Assignment::identity(name, dt));
                }
            }
            below = LogicalPlan::Projection {
                id: self.ctx.ids.next_id(),
                input: Box::new(below),
                assignments: kept,
            };
        }

        let types = below.name_to_type()?;
        if let Some(k) = self.target.keys.iter().find(|k| !types.contains_key(*k)) {
            return Err(missing(k, &below));
        }

        let mut aggregates = Vec::with_capacity(self.target.aggregates.len());
        for desc in &self.target.aggregates {
            let argument_types = types_of(&desc.arguments, &types, &below)?;
            let output = self
                .by_output
                .get(&desc.output)
                .cloned()
                .ok_or_else(|| Error::Invariant(format!("no partial symbol for {}", desc)))?;
            let resolved = if classify(desc.name()) == AggFuncClass::NeedMerge {
                self.ctx
                    .functions
                    .resolve(&state_name(desc.name()), &argument_types, &desc.parameters)
            } else if argument_types == desc.function.argument_types {
                Ok(desc.function.clone())
            } else {
                self.ctx
                    .functions
                    .resolve(desc.name(), &argument_types, &desc.parameters)
            };
            let function = resolved
                .map_err(|e| e.with_context(format!("binding partial aggregate {}", desc)))?;
            aggregates.push(AggregateDescription {
                function,
                arguments: desc.arguments.clone(),
                output,
                parameters: desc.parameters.clone(),
            });
        }

        let local = LogicalPlan::Aggregate {
            id: self.ctx.ids.next_id(),
            input: Box::new(below),
            agg: AggregateStep::partial(self.target.keys.clone(), aggregates),
        };
        trace!(
            join = %self.target.join_id,
            index = self.target.child_index,
            partial = %local.id(),
            "inserted partial aggregate"
        );
        self.inserted = true;
        Ok(local)
    }
}
