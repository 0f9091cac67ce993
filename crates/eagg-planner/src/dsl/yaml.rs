//! YAML → LogicalPlan parser for join trees.
//!
//! Example:
//! ```yaml
//! settings:
//!   agg_push_down_threshold: 2.0
//! plan:
//!   op: aggregate
//!   id: 10
//!   keys: [c.region]
//!   aggregates:
//!     - { function: sum, args: [o.amount], output: total }
//!   input:
//!     op: join
//!     id: 3
//!     on: [[o.cust, c.id]]
//!     left:
//!       op: scan
//!       table: orders
//!       columns:
//!         - { name: o.cust, type: Int64 }
//!         - { name: o.amount, type: Int32 }
//!       stats: { row_count: 1000, column_stats: { o.cust: { distinct_count: 50 } } }
//!     right:
//!       op: scan
//!       table: customers
//!       columns: [ { name: c.id, type: Int64 }, { name: c.region, type: Utf8 } ]
//! ```
//!
//! Nodes without an `id` get the smallest free id, assigned children first.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use eagg_core::config::EagerAggConfig;
use eagg_core::error::{Error, Result};
use eagg_core::expr::Expr;
use eagg_core::function::FunctionRegistry;
use eagg_core::id::PlanNodeId;
use eagg_core::plan::{
    AggregateDescription, AggregateStep, Assignment, JoinAlgorithm, JoinKind, JoinStep,
    JoinStrictness, LogicalPlan,
};
use eagg_core::schema::{DataType, Field, Schema};
use eagg_core::stats::SchemaStats;
use eagg_core::types::Scalar;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanFile {
    #[serde(default)]
    pub settings: EagerAggConfig,
    pub plan: NodeDef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "op")]
pub enum NodeDef {
    #[serde(rename = "scan")]
    Scan {
        #[serde(default)]
        id: Option<u32>,
        table: String,
        columns: Vec<FieldDef>,
        #[serde(default)]
        stats: Option<SchemaStats>,
    },

    #[serde(rename = "filter")]
    Filter {
        #[serde(default)]
        id: Option<u32>,
        predicate: String,
        input: Box<NodeDef>,
    },

    #[serde(rename = "projection")]
    Projection {
        #[serde(default)]
        id: Option<u32>,
        assignments: Vec<AssignmentDef>,
        input: Box<NodeDef>,
    },

    #[serde(rename = "join")]
    Join {
        #[serde(default)]
        id: Option<u32>,
        #[serde(default = "inner")]
        kind: JoinKind,
        #[serde(default)]
        strictness: JoinStrictness,
        #[serde(default)]
        on: Vec<(String, String)>,
        #[serde(default)]
        filter: Option<String>,
        #[serde(default)]
        algorithm: JoinAlgorithm,
        left: Box<NodeDef>,
        right: Box<NodeDef>,
    },

    #[serde(rename = "aggregate")]
    Aggregate {
        #[serde(default)]
        id: Option<u32>,
        #[serde(default)]
        keys: Vec<String>,
        #[serde(default)]
        aggregates: Vec<AggregateDef>,
        #[serde(default)]
        partial: bool,
        input: Box<NodeDef>,
    },
}

fn inner() -> JoinKind {
    JoinKind::Inner
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    #[serde(default)]
    pub nullable: bool,
}

/// `symbol := expr`; the type is inferred from the input when omitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentDef {
    pub symbol: String,
    #[serde(default)]
    pub expr: Option<String>,
    #[serde(default, rename = "type")]
    pub data_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateDef {
    pub function: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub output: String,
    #[serde(default)]
    pub params: Vec<Scalar>,
}

impl NodeDef {
    fn explicit_id(&self) -> Option<u32> {
        match self {
            NodeDef::Scan { id, .. }
            | NodeDef::Filter { id, .. }
            | NodeDef::Projection { id, .. }
            | NodeDef::Join { id, .. }
            | NodeDef::Aggregate { id, .. } => *id,
        }
    }

    fn inputs(&self) -> Vec<&NodeDef> {
        match self {
            NodeDef::Scan { .. } => vec![],
            NodeDef::Filter { input, .. }
            | NodeDef::Projection { input, .. }
            | NodeDef::Aggregate { input, .. } => vec![input.as_ref()],
            NodeDef::Join { left, right, .. } => vec![left.as_ref(), right.as_ref()],
        }
    }
}

fn parse_dtype(s: &str) -> Result<DataType> {
    DataType::parse(s).ok_or_else(|| Error::Parse(format!("unknown data type '{}'", s)))
}

struct Builder<'a> {
    functions: &'a dyn FunctionRegistry,
    used: BTreeSet<u32>,
    next: u32,
}

impl<'a> Builder<'a> {
    fn new(root: &NodeDef, functions: &'a dyn FunctionRegistry) -> Result<Self> {
        let mut used = BTreeSet::new();
        let mut stack = vec![root];
        while let Some(def) = stack.pop() {
            if let Some(id) = def.explicit_id() {
                if !used.insert(id) {
                    return Err(Error::Parse(format!("node id {} is used twice", id)));
                }
            }
            stack.extend(def.inputs());
        }
        Ok(Self {
            functions,
            used,
            next: 0,
        })
    }

    fn node_id(&mut self, explicit: Option<u32>) -> PlanNodeId {
        if let Some(id) = explicit {
            return PlanNodeId::new(id);
        }
        loop {
            self.next += 1;
            if self.used.insert(self.next) {
                return PlanNodeId::new(self.next);
            }
        }
    }

    fn build(&mut self, def: &NodeDef) -> Result<LogicalPlan> {
        match def {
            NodeDef::Scan {
                id,
                table,
                columns,
                stats,
            } => {
                let fields = columns
                    .iter()
                    .map(|f| Ok(Field::new(f.name.clone(), parse_dtype(&f.data_type)?, f.nullable)))
                    .collect::<Result<Vec<_>>>()?;
                Ok(LogicalPlan::Scan {
                    id: self.node_id(*id),
                    table: table.clone(),
                    schema: Schema::new_with_stats(fields, stats.clone()),
                })
            }
            NodeDef::Filter {
                id,
                predicate,
                input,
            } => {
                let input = self.build(input)?;
                let predicate = Expr::parse(predicate)?;
                Ok(LogicalPlan::Filter {
                    id: self.node_id(*id),
                    input: Box::new(input),
                    predicate,
                })
            }
            NodeDef::Projection {
                id,
                assignments,
                input,
            } => {
                let input = self.build(input)?;
                let types = input.name_to_type()?;
                let assignments = assignments
                    .iter()
                    .map(|a| {
                        let expr = match &a.expr {
                            Some(src) => Expr::parse(src)?,
                            None => Expr::col(a.symbol.clone()),
                        };
                        let data_type = match &a.data_type {
                            Some(t) => parse_dtype(t)?,
                            None => expr
                                .data_type(&types)
                                .map_err(|e| e.with_context(format!("typing '{}'", a.symbol)))?,
                        };
                        Ok(Assignment::new(a.symbol.clone(), expr, data_type))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(LogicalPlan::Projection {
                    id: self.node_id(*id),
                    input: Box::new(input),
                    assignments,
                })
            }
            NodeDef::Join {
                id,
                kind,
                strictness,
                on,
                filter,
                algorithm,
                left,
                right,
            } => {
                let left = self.build(left)?;
                let right = self.build(right)?;
                let (left_keys, right_keys) = on.iter().cloned().unzip();
                let join = JoinStep {
                    kind: *kind,
                    strictness: *strictness,
                    left_keys,
                    right_keys,
                    filter: filter.as_deref().map(Expr::parse).transpose()?,
                    algorithm: *algorithm,
                    hints: Vec::new(),
                };
                Ok(LogicalPlan::Join {
                    id: self.node_id(*id),
                    left: Box::new(left),
                    right: Box::new(right),
                    join,
                })
            }
            NodeDef::Aggregate {
                id,
                keys,
                aggregates,
                partial,
                input,
            } => {
                let input = self.build(input)?;
                let types = input.name_to_type()?;
                let aggregates = aggregates
                    .iter()
                    .map(|a| {
                        let argument_types = a
                            .args
                            .iter()
                            .map(|arg| {
                                types.get(arg).cloned().ok_or_else(|| {
                                    Error::Schema(format!(
                                        "aggregate {} reads unknown column '{}'",
                                        a.output, arg
                                    ))
                                })
                            })
                            .collect::<Result<Vec<_>>>()?;
                        let function =
                            self.functions
                                .resolve(&a.function, &argument_types, &a.params)?;
                        Ok(AggregateDescription {
                            function,
                            arguments: a.args.clone(),
                            output: a.output.clone(),
                            parameters: a.params.clone(),
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                let step = if *partial {
                    AggregateStep::partial(keys.clone(), aggregates)
                } else {
                    AggregateStep::new(keys.clone(), aggregates)
                };
                Ok(LogicalPlan::Aggregate {
                    id: self.node_id(*id),
                    input: Box::new(input),
                    agg: step,
                })
            }
        }
    }
}

/// Deserialize a plan file without building the plan.
pub fn parse_plan_file(yaml_src: &str) -> Result<PlanFile> {
    serde_yaml::from_str(yaml_src).map_err(|e| Error::Parse(e.to_string()))
}

impl PlanFile {
    /// Build and validate the plan, resolving aggregate functions through `functions`.
    pub fn build(&self, functions: &dyn FunctionRegistry) -> Result<LogicalPlan> {
        let plan = Builder::new(&self.plan, functions)?.build(&self.plan)?;
        plan.validate()?;
        Ok(plan)
    }
}

/// Parse YAML into its settings and a validated `LogicalPlan`.
pub fn parse_yaml_plan(
    yaml_src: &str,
    functions: &dyn FunctionRegistry,
) -> Result<(EagerAggConfig, LogicalPlan)> {
    let file = parse_plan_file(yaml_src)?;
    let plan = file.build(functions)?;
    Ok((file.settings, plan))
}

#[cfg(test)]
mod tests {
    use super::*;
    use eagg_core::function::BuiltinFunctions;

    const ORDERS: &str = r#"
settings:
  agg_push_down_threshold: 2.5
plan:
  op: aggregate
  keys: [c.region]
  aggregates:
    - { function: sum, args: [o.amount], output: total }
  input:
    op: join
    id: 3
    on: [[o.cust, c.id]]
    left:
      op: scan
      table: orders
      columns:
        - { name: o.cust, type: Int64 }
        - { name: o.amount, type: Int32 }
      stats:
        row_count: 1000
        column_stats:
          o.cust: { distinct_count: 50, total_count: 1000 }
    right:
      op: scan
      table: customers
      columns:
        - { name: c.id, type: Int64 }
        - { name: c.region, type: Utf8, nullable: true }
"#;

    #[test]
    fn parses_join_tree_with_settings() {
        let (config, plan) = parse_yaml_plan(ORDERS, &BuiltinFunctions).unwrap();
        assert_eq!(config.agg_push_down_threshold, 2.5);
        assert_eq!(config.multi_agg_keys_correlated_coefficient, 0.5);

        let LogicalPlan::Aggregate { id, input, agg } = &plan else {
            panic!("expected aggregate root, got {:?}", plan.kind());
        };
        // Scans take 1 and 2, the join is pinned to 3.
        assert_eq!(id.get(), 4);
        assert_eq!(input.id().get(), 3);
        assert_eq!(agg.aggregates[0].function.return_type, DataType::Int64);
        assert!(agg.is_final);

        let LogicalPlan::Scan { schema, .. } = input.child(0).unwrap() else {
            panic!("expected scan");
        };
        let stats = schema.stats.as_ref().unwrap();
        assert_eq!(stats.row_count, 1000);
        assert_eq!(stats.get("o.cust").unwrap().distinct_count, Some(50));
    }

    #[test]
    fn projection_types_are_inferred() {
        let src = r#"
plan:
  op: projection
  assignments:
    - { symbol: a }
    - { symbol: big, expr: "a > 10" }
  input:
    op: scan
    table: t
    columns: [ { name: a, type: Int64 } ]
"#;
        let (_, plan) = parse_yaml_plan(src, &BuiltinFunctions).unwrap();
        let LogicalPlan::Projection { assignments, .. } = &plan else {
            panic!("expected projection");
        };
        assert!(assignments[0].is_identity());
        assert_eq!(assignments[1].data_type, DataType::Boolean);
    }

    #[test]
    fn unknown_aggregate_argument_is_schema_error() {
        let src = r#"
plan:
  op: aggregate
  keys: [a]
  aggregates: [ { function: sum, args: [nope], output: s } ]
  input: { op: scan, table: t, columns: [ { name: a, type: Int64 } ] }
"#;
        let err = parse_yaml_plan(src, &BuiltinFunctions).unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let src = r#"
plan:
  op: filter
  id: 1
  predicate: "a > 1"
  input: { op: scan, id: 1, table: t, columns: [ { name: a, type: Int64 } ] }
"#;
        assert!(matches!(
            parse_yaml_plan(src, &BuiltinFunctions).unwrap_err(),
            Error::Parse(_)
        ));
    }

    #[test]
    fn malformed_yaml_is_parse_error() {
        let err = parse_yaml_plan("plan: { op: teleport }", &BuiltinFunctions).unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }
}
