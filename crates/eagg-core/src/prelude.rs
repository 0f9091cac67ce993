//! Convenience re-exports for downstream crates.

pub use crate::config::EagerAggConfig;
pub use crate::error::{Error, Result};
pub use crate::expr::{BinOp, Expr, UnaryOp};
pub use crate::function::{AggregateFunction, BuiltinFunctions, FunctionRegistry};
pub use crate::id::{PlanNodeId, PlanNodeIdAllocator};
pub use crate::plan::{
    AggregateDescription, AggregateStep, Assignment, JoinAlgorithm, JoinKind, JoinStep,
    JoinStrictness, LogicalPlan, PlanKind, Symbol,
};
pub use crate::schema::{DataType, Field, Schema};
pub use crate::stats::{ColumnStats, SchemaStats};
pub use crate::symbol::SymbolAllocator;
pub use crate::types::Scalar;
