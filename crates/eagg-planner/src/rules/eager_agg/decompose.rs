//! Attribute aggregates and grouping keys to the sides of a join.
//!
//! [`decompose_agg_join`] splits the global aggregate by which join child
//! produces each argument and key. Aggregates that cannot be attributed
//! directly land in the composed bucket, where
//! [`decompose_projection`] may still claim them when a projection sits
//! between the aggregate and the join.

use std::collections::{BTreeMap, BTreeSet};

use eagg_core::expr::{is_function_named, Expr};
use eagg_core::plan::{AggregateDescription, Assignment, Symbol};
use eagg_core::symbol::SymbolAllocator;
use eagg_core::types::Scalar;
use tracing::trace;

use super::classify::{classify, is_duplicate_insensitive, AggFuncClass};

/// Prefix of symbols introduced for partial aggregate outputs.
pub const INTERMEDIATE_PREFIX: &str = "inter#";

pub fn intermediate_hint(symbol: &str) -> String {
    format!("{}{}", INTERMEDIATE_PREFIX, symbol)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct JoinSideSplit {
    pub left: Vec<AggregateDescription>,
    pub right: Vec<AggregateDescription>,
    pub composed: Vec<AggregateDescription>,
    pub left_keys: Vec<Symbol>,
    pub right_keys: Vec<Symbol>,
}

/// Split `aggregates` and `keys` by join side.
///
/// Returns `None` when an aggregate cannot be split at all or a grouping key
/// is produced by neither side.
pub fn decompose_agg_join(
    aggregates: &[AggregateDescription],
    keys: &[Symbol],
    left_names: &BTreeSet<Symbol>,
    right_names: &BTreeSet<Symbol>,
) -> Option<JoinSideSplit> {
    let key_set: BTreeSet<&Symbol> = keys.iter().collect();
    let mut split = JoinSideSplit::default();

    for desc in aggregates {
        if classify(desc.name()) == AggFuncClass::Unknown {
            trace!(function = desc.name(), "aggregate cannot be split");
            return None;
        }
        let direct = desc
            .single_argument()
            .filter(|arg| !key_set.contains(arg));
        match direct {
            Some(arg) if left_names.contains(arg) => split.left.push(desc.clone()),
            Some(arg) if right_names.contains(arg) => split.right.push(desc.clone()),
            _ => split.composed.push(desc.clone()),
        }
    }

    for key in keys {
        if left_names.contains(key) {
            split.left_keys.push(key.clone());
        } else if right_names.contains(key) {
            split.right_keys.push(key.clone());
        } else {
            trace!(key = %key, "grouping key produced by neither join side");
            return None;
        }
    }
    Some(split)
}

/// What a projection between the aggregate and the join contributes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectionSplit {
    /// Aggregates claimed for the left side.
    pub left: Vec<AggregateDescription>,
    pub right: Vec<AggregateDescription>,
    /// Deep decomposition: consumed column to its intermediate symbol.
    pub left_renames: BTreeMap<Symbol, Symbol>,
    pub right_renames: BTreeMap<Symbol, Symbol>,
    /// Outputs of the global aggregates claimed for each side.
    pub left_claimed: BTreeSet<Symbol>,
    pub right_claimed: BTreeSet<Symbol>,
    /// Symbols read by the projection when it moves below the join.
    pub required: BTreeSet<Symbol>,
    /// Non-identity outputs of a projection that moves below the join.
    pub generated: BTreeSet<Symbol>,
}

impl ProjectionSplit {
    /// The whole projection is re-positioned below the join.
    pub fn push_projection(&self) -> bool {
        !self.required.is_empty()
    }

    pub fn is_deep(&self) -> bool {
        !self.left_renames.is_empty() || !self.right_renames.is_empty()
    }
}

/// `multiIf(cond, col, ...)`: the column read by the first branch, provided
/// every other value branch is a literal that `function` absorbs however
/// often it repeats.
fn conditional_branch_column<'e>(expr: &'e Expr, function: &str) -> Option<&'e str> {
    let Expr::Function { name, args } = expr else {
        return None;
    };
    if !is_function_named(name, "multiIf") || args.len() <= 2 {
        return None;
    }
    let last = args.len() - 1;
    let neutral = (2..args.len())
        .filter(|&i| i % 2 == 1 || i == last)
        .all(|i| matches!(&args[i], Expr::Literal(v) if absorbs(function, v)));
    if !neutral {
        return None;
    }
    args[1].as_column()
}

fn absorbs(function: &str, value: &Scalar) -> bool {
    if value.is_null() {
        return true;
    }
    classify(function) == AggFuncClass::Basic
        && (is_duplicate_insensitive(function) || is_zero(value))
}

fn is_zero(value: &Scalar) -> bool {
    match value {
        Scalar::I32(v) => *v == 0,
        Scalar::I64(v) => *v == 0,
        Scalar::F32(v) => *v == 0.0,
        Scalar::F64(v) => *v == 0.0,
        _ => false,
    }
}

/// Resolve composed aggregates through the projection below the aggregate.
///
/// Deep decomposition is tried first; full push-down only when it claimed
/// nothing. Returns `None` when neither applies.
pub fn decompose_projection(
    assignments: &[Assignment],
    split: &JoinSideSplit,
    aggregates: &[AggregateDescription],
    keys: &[Symbol],
    left_names: &BTreeSet<Symbol>,
    right_names: &BTreeSet<Symbol>,
    symbols: &SymbolAllocator,
) -> Option<ProjectionSplit> {
    let mut out = ProjectionSplit::default();
    deep_decompose(
        assignments,
        split,
        aggregates,
        keys,
        left_names,
        right_names,
        symbols,
        &mut out,
    );
    if out.is_deep() {
        return Some(out);
    }

    let mut left_total = 0usize;
    let mut right_total = 0usize;
    let mut total = 0usize;
    let mut required = BTreeSet::new();
    let mut generated = BTreeSet::new();
    for a in assignments.iter().filter(|a| !a.is_identity()) {
        let used = a.expr.symbols();
        total += 1;
        if used.is_subset(left_names) {
            left_total += 1;
        }
        if used.is_subset(right_names) {
            right_total += 1;
        }
        required.extend(used);
        generated.insert(a.symbol.clone());
    }

    let to_left = if left_total == total {
        true
    } else if right_total == total {
        false
    } else {
        trace!("projection reads both join sides");
        return None;
    };

    if required.is_empty() {
        // Nothing to move; the projection stays where it is.
        return Some(out);
    }

    let key_set: BTreeSet<&Symbol> = keys.iter().collect();
    for desc in &split.composed {
        let Some(arg) = desc.single_argument() else {
            continue;
        };
        if !generated.contains(arg) || key_set.contains(arg) {
            continue;
        }
        let (bucket, claimed) = if to_left {
            (&mut out.left, &mut out.left_claimed)
        } else {
            (&mut out.right, &mut out.right_claimed)
        };
        if claimed.insert(desc.output.clone()) {
            bucket.push(desc.clone());
        }
    }
    out.required = required;
    out.generated = generated;
    Some(out)
}

#[allow(clippy::too_many_arguments)]
fn deep_decompose(
    assignments: &[Assignment],
    split: &JoinSideSplit,
    aggregates: &[AggregateDescription],
    keys: &[Symbol],
    left_names: &BTreeSet<Symbol>,
    right_names: &BTreeSet<Symbol>,
    symbols: &SymbolAllocator,
    out: &mut ProjectionSplit,
) {
    let key_set: BTreeSet<&Symbol> = keys.iter().collect();
    let by_symbol: BTreeMap<&str, &Assignment> =
        assignments.iter().map(|a| (a.symbol.as_str(), a)).collect();

    for desc in &split.composed {
        let Some(arg) = desc.single_argument() else {
            continue;
        };
        if key_set.contains(arg) {
            continue;
        }
        let Some(assignment) = by_symbol.get(arg.as_str()) else {
            continue;
        };
        let Some(column) = conditional_branch_column(&assignment.expr, desc.name()) else {
            continue;
        };
        let column = column.to_string();
        if key_set.contains(&column)
            || out.left_renames.contains_key(&column)
            || out.right_renames.contains_key(&column)
        {
            continue;
        }
        if !read_only_by(&column, &assignment.symbol, assignments, aggregates) {
            trace!(column = %column, "column has other readers, not decomposed");
            continue;
        }
        let is_left = if left_names.contains(&column) {
            true
        } else if right_names.contains(&column) {
            false
        } else {
            continue;
        };

        let inter = symbols.new_symbol(&intermediate_hint(&column));
        let local = AggregateDescription {
            function: desc.function.clone(),
            arguments: vec![column.clone()],
            output: inter.clone(),
            parameters: desc.parameters.clone(),
        };
        if is_left {
            out.left.push(local);
            out.left_renames.insert(column, inter);
            out.left_claimed.insert(desc.output.clone());
        } else {
            out.right.push(local);
            out.right_renames.insert(column, inter);
            out.right_claimed.insert(desc.output.clone());
        }
    }
}

/// `column` is read only by the first branch of `owner`'s conditional, and
/// `owner` only by a single aggregate.
fn read_only_by(
    column: &str,
    owner: &str,
    assignments: &[Assignment],
    aggregates: &[AggregateDescription],
) -> bool {
    for a in assignments {
        if a.symbol == owner {
            if let Expr::Function { args, .. } = &a.expr {
                let elsewhere = args
                    .iter()
                    .enumerate()
                    .any(|(i, e)| i != 1 && e.symbols().contains(column));
                if elsewhere {
                    return false;
                }
            }
        } else if !a.is_identity() && a.expr.symbols().contains(column) {
            return false;
        }
    }
    let readers_of_owner = aggregates
        .iter()
        .filter(|d| d.arguments.iter().any(|x| x == owner))
        .count();
    let readers_of_column = aggregates
        .iter()
        .filter(|d| d.arguments.iter().any(|x| x == column))
        .count();
    readers_of_owner == 1 && readers_of_column == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use eagg_core::prelude::*;

    fn names(cols: &[&str]) -> BTreeSet<Symbol> {
        cols.iter().map(|c| c.to_string()).collect()
    }

    fn agg(function: &str, args: &[&str], out: &str) -> AggregateDescription {
        let types = vec![DataType::Int64; args.len()];
        AggregateDescription {
            function: BuiltinFunctions.resolve(function, &types, &[]).unwrap(),
            arguments: args.iter().map(|a| a.to_string()).collect(),
            output: out.into(),
            parameters: vec![],
        }
    }

    fn assign(symbol: &str, expr: &str) -> Assignment {
        Assignment::new(symbol, Expr::parse(expr).unwrap(), DataType::Int64)
    }

    #[test]
    fn splits_by_side() {
        let left = names(&["l.id", "l.x", "l.k"]);
        let right = names(&["r.id", "r.y"]);
        let aggs = vec![
            agg("sum", &["l.x"], "sx"),
            agg("max", &["r.y"], "my"),
            agg("max", &["l.k"], "mk"),
            agg("uniqExact", &["l.x", "r.y"], "u"),
        ];
        let split =
            decompose_agg_join(&aggs, &["l.k".into()], &left, &right).unwrap();
        assert_eq!(split.left.len(), 1);
        assert_eq!(split.right.len(), 1);
        // key argument and two-sided argument list
        assert_eq!(split.composed.len(), 2);
        assert_eq!(split.left_keys, vec!["l.k"]);
        assert!(split.right_keys.is_empty());
    }

    #[test]
    fn unknown_function_or_foreign_key_fails() {
        let left = names(&["l.x"]);
        let right = names(&["r.y"]);
        let avg = AggregateDescription {
            function: BuiltinFunctions
                .resolve("avg", &[DataType::Int64], &[])
                .unwrap(),
            arguments: vec!["l.x".into()],
            output: "a".into(),
            parameters: vec![],
        };
        assert!(decompose_agg_join(&[avg], &["l.x".into()], &left, &right).is_none());
        let sum = agg("sum", &["l.x"], "s");
        assert!(decompose_agg_join(&[sum], &["k".into()], &left, &right).is_none());
    }

    #[test]
    fn deep_decomposition_claims_conditional_column() {
        let left = names(&["l.id", "l.k"]);
        let right = names(&["r.id", "r.flag", "r.v"]);
        let aggs = vec![agg("count", &["p"], "cnt")];
        let split = JoinSideSplit {
            composed: aggs.clone(),
            left_keys: vec!["l.k".into()],
            ..Default::default()
        };
        let assignments = vec![
            Assignment::identity("l.k", DataType::Int64),
            assign("p", "multiIf(r.flag > 0, r.v, NULL)"),
        ];
        let alloc = SymbolAllocator::new();
        let out = decompose_projection(
            &assignments,
            &split,
            &aggs,
            &["l.k".into()],
            &left,
            &right,
            &alloc,
        )
        .unwrap();
        assert!(out.is_deep());
        assert!(!out.push_projection());
        assert_eq!(out.right_renames.get("r.v").map(String::as_str), Some("inter#r.v"));
        assert_eq!(out.right[0].arguments, vec!["r.v"]);
        assert_eq!(out.right[0].output, "inter#r.v");
        assert!(out.right_claimed.contains("cnt"));
    }

    #[test]
    fn deep_decomposition_skips_shared_column() {
        let left = names(&["l.k"]);
        let right = names(&["r.flag", "r.v"]);
        let aggs = vec![agg("sum", &["p"], "s"), agg("max", &["q"], "m")];
        let split = JoinSideSplit {
            composed: aggs.clone(),
            left_keys: vec!["l.k".into()],
            ..Default::default()
        };
        let assignments = vec![
            assign("p", "multiIf(r.flag > 0, r.v, 0)"),
            assign("q", "r.v * 2"),
        ];
        let out = decompose_projection(
            &assignments,
            &split,
            &aggs,
            &["l.k".into()],
            &left,
            &right,
            &SymbolAllocator::new(),
        )
        .unwrap();
        // r.v is also read by q, so the projection moves below the join instead
        assert!(!out.is_deep());
        assert!(out.push_projection());
        assert_eq!(out.required, names(&["r.flag", "r.v"]));
        assert_eq!(out.generated, names(&["p", "q"]));
        assert_eq!(out.right.len(), 2);
    }

    #[test]
    fn else_branch_must_be_neutral() {
        let left = names(&["l.k"]);
        let right = names(&["r.flag", "r.v"]);
        let cases = [
            ("sum", "multiIf(r.flag > 0, r.v, 0)", true),
            ("sum", "multiIf(r.flag > 0, r.v, 5)", false),
            ("max", "multiIf(r.flag > 0, r.v, 5)", true),
            ("count", "multiIf(r.flag > 0, r.v, NULL)", true),
            ("count", "multiIf(r.flag > 0, r.v, 0)", false),
            ("sum", "multiIf(r.flag > 0, r.v, r.flag > 1, r.flag, 0)", false),
        ];
        for (function, expr, deep) in cases {
            let aggs = vec![agg(function, &["p"], "out")];
            let split = JoinSideSplit {
                composed: aggs.clone(),
                left_keys: vec!["l.k".into()],
                ..Default::default()
            };
            let out = decompose_projection(
                &[assign("p", expr)],
                &split,
                &aggs,
                &["l.k".into()],
                &left,
                &right,
                &SymbolAllocator::new(),
            )
            .unwrap();
            assert_eq!(out.is_deep(), deep, "{} over {}", function, expr);
        }
    }

    #[test]
    fn projection_reading_both_sides_fails() {
        let left = names(&["l.a"]);
        let right = names(&["r.b"]);
        let aggs = vec![agg("sum", &["p"], "s")];
        let split = JoinSideSplit {
            composed: aggs.clone(),
            ..Default::default()
        };
        let assignments = vec![assign("p", "l.a + r.b")];
        assert!(decompose_projection(
            &assignments,
            &split,
            &aggs,
            &[],
            &left,
            &right,
            &SymbolAllocator::new()
        )
        .is_none());
    }

    #[test]
    fn identity_projection_stays_in_place() {
        let left = names(&["l.x"]);
        let right = names(&["r.k"]);
        let split = JoinSideSplit::default();
        let assignments = vec![
            Assignment::identity("l.x", DataType::Int64),
            Assignment::identity("r.k", DataType::Int64),
        ];
        let out = decompose_projection(
            &assignments,
            &split,
            &[],
            &["r.k".into()],
            &left,
            &right,
            &SymbolAllocator::new(),
        )
        .unwrap();
        assert!(!out.push_projection());
        assert!(!out.is_deep());
    }
}
