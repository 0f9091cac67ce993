//! Logical plan IR.
//!
//! A plan is an owned tree of [`LogicalPlan`] nodes. Nodes are never mutated
//! in place: rewrites build new nodes (reusing ids where a node keeps its
//! identity) and drop the old tree.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::expr::Expr;
use crate::function::AggregateFunction;
use crate::id::PlanNodeId;
use crate::schema::{DataType, Field, Schema};
use crate::types::Scalar;

/// A column name, unique within one node's output.
pub type Symbol = String;

/// One aggregate computed by an [`AggregateStep`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateDescription {
    pub function: AggregateFunction,
    pub arguments: Vec<Symbol>,
    pub output: Symbol,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<Scalar>,
}

impl AggregateDescription {
    pub fn name(&self) -> &str {
        &self.function.name
    }

    /// The argument when there is exactly one.
    pub fn single_argument(&self) -> Option<&Symbol> {
        match self.arguments.as_slice() {
            [arg] => Some(arg),
            _ => None,
        }
    }
}

impl fmt::Display for AggregateDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} := {}", self.output, self.function.name)?;
        if !self.parameters.is_empty() {
            let params: Vec<String> = self.parameters.iter().map(|p| p.to_string()).collect();
            write!(f, "({})", params.join(", "))?;
        }
        write!(f, "({})", self.arguments.join(", "))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Full,
    Cross,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinStrictness {
    #[default]
    All,
    Any,
    Semi,
    Anti,
    Asof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinAlgorithm {
    #[default]
    Auto,
    Hash,
    SortMerge,
    NestedLoop,
}

/// Join attributes. Output is the left child's columns followed by the right child's.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinStep {
    pub kind: JoinKind,
    #[serde(default)]
    pub strictness: JoinStrictness,
    #[serde(default)]
    pub left_keys: Vec<Symbol>,
    #[serde(default)]
    pub right_keys: Vec<Symbol>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Expr>,
    #[serde(default)]
    pub algorithm: JoinAlgorithm,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hints: Vec<String>,
}

impl JoinStep {
    pub fn inner(left_keys: Vec<Symbol>, right_keys: Vec<Symbol>) -> Self {
        Self {
            kind: JoinKind::Inner,
            strictness: JoinStrictness::All,
            left_keys,
            right_keys,
            filter: None,
            algorithm: JoinAlgorithm::Auto,
            hints: Vec::new(),
        }
    }

    pub fn with_filter(mut self, filter: Expr) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Symbols this join reads: equality keys of both sides plus filter columns.
    pub fn required_symbols(&self) -> BTreeSet<Symbol> {
        let mut out: BTreeSet<Symbol> = self
            .left_keys
            .iter()
            .chain(self.right_keys.iter())
            .cloned()
            .collect();
        if let Some(filter) = &self.filter {
            out.extend(filter.symbols());
        }
        out
    }

    /// Same join with every symbol-visible attribute renamed through `map`.
    pub fn renamed(&self, map: &HashMap<Symbol, Symbol>) -> JoinStep {
        let rename = |keys: &[Symbol]| -> Vec<Symbol> {
            keys.iter()
                .map(|k| map.get(k).unwrap_or(k).clone())
                .collect()
        };
        JoinStep {
            kind: self.kind,
            strictness: self.strictness,
            left_keys: rename(&self.left_keys),
            right_keys: rename(&self.right_keys),
            filter: self.filter.as_ref().map(|f| f.rename(map)),
            algorithm: self.algorithm,
            hints: self.hints.clone(),
        }
    }
}

/// Aggregation attributes. Output is the grouping keys followed by the aggregate outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateStep {
    pub keys: Vec<Symbol>,
    pub aggregates: Vec<AggregateDescription>,
    /// False for a partial (local) aggregate inserted below a join.
    #[serde(default = "default_true")]
    pub is_final: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub group_by_sort: Vec<Symbol>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hints: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl AggregateStep {
    pub fn new(keys: Vec<Symbol>, aggregates: Vec<AggregateDescription>) -> Self {
        Self {
            keys,
            aggregates,
            is_final: true,
            group_by_sort: Vec::new(),
            hints: Vec::new(),
        }
    }

    pub fn partial(keys: Vec<Symbol>, aggregates: Vec<AggregateDescription>) -> Self {
        Self {
            is_final: false,
            ..Self::new(keys, aggregates)
        }
    }
}

/// `symbol := expr` inside a projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub symbol: Symbol,
    pub expr: Expr,
    pub data_type: DataType,
}

impl Assignment {
    pub fn new(symbol: impl Into<Symbol>, expr: Expr, data_type: DataType) -> Self {
        Self {
            symbol: symbol.into(),
            expr,
            data_type,
        }
    }

    /// `name := name`.
    pub fn identity(name: impl Into<Symbol>, data_type: DataType) -> Self {
        let name = name.into();
        Self {
            expr: Expr::Column(name.clone()),
            symbol: name,
            data_type,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.expr.is_identity_of(&self.symbol)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlanKind {
    Scan,
    Filter,
    Projection,
    Join,
    Aggregate,
}

impl fmt::Display for PlanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogicalPlan {
    Scan {
        id: PlanNodeId,
        table: String,
        schema: Schema,
    },
    Filter {
        id: PlanNodeId,
        input: Box<LogicalPlan>,
        predicate: Expr,
    },
    Projection {
        id: PlanNodeId,
        input: Box<LogicalPlan>,
        assignments: Vec<Assignment>,
    },
    Join {
        id: PlanNodeId,
        left: Box<LogicalPlan>,
        right: Box<LogicalPlan>,
        join: JoinStep,
    },
    Aggregate {
        id: PlanNodeId,
        input: Box<LogicalPlan>,
        agg: AggregateStep,
    },
}

impl LogicalPlan {
    pub fn id(&self) -> PlanNodeId {
        match self {
            LogicalPlan::Scan { id, .. }
            | LogicalPlan::Filter { id, .. }
            | LogicalPlan::Projection { id, .. }
            | LogicalPlan::Join { id, .. }
            | LogicalPlan::Aggregate { id, .. } => *id,
        }
    }

    pub fn kind(&self) -> PlanKind {
        match self {
            LogicalPlan::Scan { .. } => PlanKind::Scan,
            LogicalPlan::Filter { .. } => PlanKind::Filter,
            LogicalPlan::Projection { .. } => PlanKind::Projection,
            LogicalPlan::Join { .. } => PlanKind::Join,
            LogicalPlan::Aggregate { .. } => PlanKind::Aggregate,
        }
    }

    pub fn children(&self) -> Vec<&LogicalPlan> {
        match self {
            LogicalPlan::Scan { .. } => vec![],
            LogicalPlan::Filter { input, .. }
            | LogicalPlan::Projection { input, .. }
            | LogicalPlan::Aggregate { input, .. } => vec![input.as_ref()],
            LogicalPlan::Join { left, right, .. } => vec![left.as_ref(), right.as_ref()],
        }
    }

    pub fn child(&self, index: usize) -> Option<&LogicalPlan> {
        self.children().get(index).copied()
    }

    /// Rebuild this node with every child passed through `f`. Ids are kept.
    pub fn map_children<F>(self, mut f: F) -> Result<LogicalPlan>
    where
        F: FnMut(LogicalPlan) -> Result<LogicalPlan>,
    {
        Ok(match self {
            scan @ LogicalPlan::Scan { .. } => scan,
            LogicalPlan::Filter {
                id,
                input,
                predicate,
            } => LogicalPlan::Filter {
                id,
                input: Box::new(f(*input)?),
                predicate,
            },
            LogicalPlan::Projection {
                id,
                input,
                assignments,
            } => LogicalPlan::Projection {
                id,
                input: Box::new(f(*input)?),
                assignments,
            },
            LogicalPlan::Join {
                id,
                left,
                right,
                join,
            } => {
                let left = f(*left)?;
                let right = f(*right)?;
                LogicalPlan::Join {
                    id,
                    left: Box::new(left),
                    right: Box::new(right),
                    join,
                }
            }
            LogicalPlan::Aggregate { id, input, agg } => LogicalPlan::Aggregate {
                id,
                input: Box::new(f(*input)?),
                agg,
            },
        })
    }

    /// Derive the output schema of this node.
    pub fn schema(&self) -> Result<Schema> {
        match self {
            LogicalPlan::Scan { schema, .. } => Ok(schema.clone()),
            LogicalPlan::Filter { input, .. } => Ok(Schema::new(input.schema()?.fields)),
            LogicalPlan::Projection {
                input, assignments, ..
            } => {
                let input_schema = input.schema()?;
                let fields = assignments
                    .iter()
                    .map(|a| {
                        let nullable = match a.expr.as_column() {
                            Some(col) => input_schema
                                .index_of(col)
                                .and_then(|i| input_schema.field(i))
                                .map(|f| f.nullable)
                                .unwrap_or(true),
                            None => true,
                        };
                        Field::new(a.symbol.clone(), a.data_type.clone(), nullable)
                    })
                    .collect();
                Ok(Schema::new(fields))
            }
            LogicalPlan::Join { left, right, .. } => {
                let mut fields = left.schema()?.fields;
                fields.extend(right.schema()?.fields);
                Ok(Schema::new(fields))
            }
            LogicalPlan::Aggregate { id, input, agg } => {
                let input_schema = input.schema()?;
                let mut fields = Vec::with_capacity(agg.keys.len() + agg.aggregates.len());
                for key in &agg.keys {
                    let field = input_schema
                        .index_of(key)
                        .and_then(|i| input_schema.field(i))
                        .ok_or_else(|| {
                            Error::Schema(format!(
                                "aggregate {}: unknown grouping key '{}'",
                                id, key
                            ))
                        })?;
                    fields.push(field.clone());
                }
                for desc in &agg.aggregates {
                    fields.push(Field::new(
                        desc.output.clone(),
                        desc.function.return_type.clone(),
                        true,
                    ));
                }
                Ok(Schema::new(fields))
            }
        }
    }

    pub fn output_names(&self) -> Result<Vec<Symbol>> {
        Ok(self.schema()?.names())
    }

    pub fn name_set(&self) -> Result<BTreeSet<Symbol>> {
        Ok(self.schema()?.name_set())
    }

    pub fn name_to_type(&self) -> Result<HashMap<Symbol, DataType>> {
        Ok(self.schema()?.name_to_type())
    }

    /// True when the subtree rooted here contains a node with `id`.
    pub fn contains_node(&self, id: PlanNodeId) -> bool {
        self.find(id).is_some()
    }

    pub fn find(&self, id: PlanNodeId) -> Option<&LogicalPlan> {
        if self.id() == id {
            return Some(self);
        }
        self.children().into_iter().find_map(|c| c.find(id))
    }

    pub fn max_id(&self) -> PlanNodeId {
        self.children()
            .into_iter()
            .map(|c| c.max_id())
            .fold(self.id(), |a, b| a.max(b))
    }

    pub fn node_count(&self) -> usize {
        1 + self
            .children()
            .into_iter()
            .map(|c| c.node_count())
            .sum::<usize>()
    }

    /// Every symbol named anywhere in the subtree.
    pub fn symbols(&self) -> BTreeSet<Symbol> {
        let mut out = BTreeSet::new();
        self.collect_symbols(&mut out);
        out
    }

    fn collect_symbols(&self, out: &mut BTreeSet<Symbol>) {
        match self {
            LogicalPlan::Scan { schema, .. } => out.extend(schema.names()),
            LogicalPlan::Filter { predicate, .. } => out.extend(predicate.symbols()),
            LogicalPlan::Projection { assignments, .. } => {
                for a in assignments {
                    out.insert(a.symbol.clone());
                    out.extend(a.expr.symbols());
                }
            }
            LogicalPlan::Join { join, .. } => out.extend(join.required_symbols()),
            LogicalPlan::Aggregate { agg, .. } => {
                out.extend(agg.keys.iter().cloned());
                for desc in &agg.aggregates {
                    out.insert(desc.output.clone());
                    out.extend(desc.arguments.iter().cloned());
                }
            }
        }
        for child in self.children() {
            child.collect_symbols(out);
        }
    }

    /// Check structural well-formedness of the whole tree: unique node ids,
    /// every referenced symbol produced by the relevant input, unique output
    /// names, and aggregate signatures matching their argument types.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        self.validate_node(&mut seen)
    }

    fn validate_node(&self, seen: &mut HashSet<PlanNodeId>) -> Result<()> {
        let id = self.id();
        if !seen.insert(id) {
            return Err(Error::Plan(format!("duplicate plan node id {}", id)));
        }
        for child in self.children() {
            child.validate_node(seen)?;
        }

        let ctx = || format!("{} {}", self.kind(), id);
        let require = |available: &HashMap<Symbol, DataType>, symbols: &BTreeSet<Symbol>| {
            for s in symbols {
                if !available.contains_key(s) {
                    return Err(Error::Schema(format!("{}: unknown symbol '{}'", ctx(), s)));
                }
            }
            Ok(())
        };

        match self {
            LogicalPlan::Scan { .. } => {}
            LogicalPlan::Filter {
                input, predicate, ..
            } => {
                let types = input.name_to_type()?;
                require(&types, &predicate.symbols())?;
            }
            LogicalPlan::Projection {
                input, assignments, ..
            } => {
                let types = input.name_to_type()?;
                for a in assignments {
                    require(&types, &a.expr.symbols())?;
                    if let Some(col) = a.expr.as_column() {
                        if types.get(col) != Some(&a.data_type) {
                            return Err(Error::Schema(format!(
                                "{}: '{}' declared as {} but '{}' is {:?}",
                                ctx(),
                                a.symbol,
                                a.data_type,
                                col,
                                types.get(col)
                            )));
                        }
                    }
                }
            }
            LogicalPlan::Join {
                left, right, join, ..
            } => {
                let left_types = left.name_to_type()?;
                let right_types = right.name_to_type()?;
                if join.left_keys.len() != join.right_keys.len() {
                    return Err(Error::Plan(format!(
                        "{}: {} left keys but {} right keys",
                        ctx(),
                        join.left_keys.len(),
                        join.right_keys.len()
                    )));
                }
                require(&left_types, &join.left_keys.iter().cloned().collect())?;
                require(&right_types, &join.right_keys.iter().cloned().collect())?;
                if let Some(filter) = &join.filter {
                    let mut both = left_types.clone();
                    both.extend(right_types.clone());
                    require(&both, &filter.symbols())?;
                }
            }
            LogicalPlan::Aggregate { input, agg, .. } => {
                let types = input.name_to_type()?;
                require(&types, &agg.keys.iter().cloned().collect())?;
                for desc in &agg.aggregates {
                    require(&types, &desc.arguments.iter().cloned().collect())?;
                    let actual: Vec<DataType> = desc
                        .arguments
                        .iter()
                        .filter_map(|a| types.get(a).cloned())
                        .collect();
                    if actual != desc.function.argument_types {
                        return Err(Error::Function(format!(
                            "{}: {} bound for {:?} but arguments are {:?}",
                            ctx(),
                            desc.function.name,
                            desc.function.argument_types,
                            actual
                        )));
                    }
                }
            }
        }

        let mut names = HashSet::new();
        for name in self.output_names()? {
            if !names.insert(name.clone()) {
                return Err(Error::Schema(format!(
                    "{}: duplicate output symbol '{}'",
                    ctx(),
                    name
                )));
            }
        }
        Ok(())
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
