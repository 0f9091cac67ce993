//! Cardinality estimation over logical plans.
//!
//! [`StatsEstimator`] derives statistics bottom-up from the statistics
//! recorded on scans. Any scan without statistics makes every estimate above
//! it unavailable.

use eagg_core::expr::{BinOp, Expr, UnaryOp};
use eagg_core::plan::{JoinKind, LogicalPlan};
use eagg_core::stats::{ColumnStats, SchemaStats};

/// Source of row-count and per-column statistics for a plan subtree.
pub trait CardinalityEstimator: Send + Sync {
    fn estimate(&self, plan: &LogicalPlan) -> Option<SchemaStats>;
}

/// Estimator working from scan statistics only.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatsEstimator;

impl CardinalityEstimator for StatsEstimator {
    fn estimate(&self, plan: &LogicalPlan) -> Option<SchemaStats> {
        match plan {
            LogicalPlan::Scan { schema, .. } => schema.stats.clone(),
            LogicalPlan::Filter {
                input, predicate, ..
            } => {
                let stats = self.estimate(input)?;
                let selectivity = estimate_filter_selectivity(predicate, &stats);
                let rows = ((stats.row_count as f64) * selectivity) as u64;
                let rows = if stats.row_count > 0 { rows.max(1) } else { 0 };
                Some(scale(stats, rows))
            }
            LogicalPlan::Projection {
                input, assignments, ..
            } => {
                let stats = self.estimate(input)?;
                let mut out = SchemaStats::new(stats.row_count);
                for a in assignments {
                    let used = a.expr.symbols();
                    let mut iter = used.iter();
                    let (Some(source), None) = (iter.next(), iter.next()) else {
                        continue;
                    };
                    let Some(col) = stats.get(source) else {
                        continue;
                    };
                    let carried = if a.is_identity() {
                        col.clone()
                    } else {
                        // A function of one column has at most that column's NDV.
                        ColumnStats {
                            min: None,
                            max: None,
                            ..col.clone()
                        }
                    };
                    out.column_stats.insert(a.symbol.clone(), carried);
                }
                Some(out)
            }
            LogicalPlan::Join {
                left, right, join, ..
            } => {
                let l = self.estimate(left)?;
                let r = self.estimate(right)?;
                let rows = estimate_join_cardinality(&l, &r, join.kind, &join.left_keys, &join.right_keys);
                let mut columns = l.column_stats;
                columns.extend(r.column_stats);
                Some(scale(
                    SchemaStats {
                        row_count: rows,
                        column_stats: columns,
                    },
                    rows,
                ))
            }
            LogicalPlan::Aggregate { input, agg, .. } => {
                let stats = self.estimate(input)?;
                let groups = estimate_aggregate_groups(&stats, &agg.keys);
                let mut out = SchemaStats::new(groups);
                for key in &agg.keys {
                    if let Some(col) = stats.get(key) {
                        out.column_stats.insert(key.clone(), col.clone());
                    }
                }
                Some(scale(out, groups))
            }
        }
    }
}

/// Set the row count and cap distinct counts and totals to it.
fn scale(mut stats: SchemaStats, rows: u64) -> SchemaStats {
    let before = stats.row_count;
    stats.row_count = rows;
    for col in stats.column_stats.values_mut() {
        if let Some(ndv) = col.distinct_count.as_mut() {
            *ndv = (*ndv).min(rows);
        }
        if before > 0 && rows != before {
            let fraction = rows as f64 / before as f64;
            col.null_count = ((col.null_count as f64) * fraction) as u64;
        }
        col.null_count = col.null_count.min(rows);
        col.total_count = rows;
    }
    stats
}

/// Estimate filter selectivity (fraction of rows that pass the filter).
///
/// Uses column statistics for `col OP literal` comparisons, combines
/// conjunctions and disjunctions as independent events, and falls back to
/// 50% otherwise.
fn estimate_filter_selectivity(predicate: &Expr, stats: &SchemaStats) -> f64 {
    match predicate {
        Expr::BinaryOp { op, left, right } => match op {
            BinOp::And => {
                estimate_filter_selectivity(left, stats) * estimate_filter_selectivity(right, stats)
            }
            BinOp::Or => {
                let a = estimate_filter_selectivity(left, stats);
                let b = estimate_filter_selectivity(right, stats);
                a + b - a * b
            }
            op if op.is_comparison() => comparison_selectivity(*op, left, right, stats),
            _ => 0.5,
        },
        Expr::UnaryOp {
            op: UnaryOp::Not,
            arg,
        } => 1.0 - estimate_filter_selectivity(arg, stats),
        Expr::UnaryOp {
            op: UnaryOp::IsNull,
            arg,
        } => null_fraction(arg, stats).unwrap_or(0.5),
        Expr::UnaryOp {
            op: UnaryOp::IsNotNull,
            arg,
        } => null_fraction(arg, stats).map(|f| 1.0 - f).unwrap_or(0.5),
        _ => 0.5,
    }
}

fn null_fraction(arg: &Expr, stats: &SchemaStats) -> Option<f64> {
    let col = stats.get(arg.as_column()?)?;
    if col.total_count == 0 {
        return None;
    }
    Some(col.null_count as f64 / col.total_count as f64)
}

fn comparison_selectivity(op: BinOp, left: &Expr, right: &Expr, stats: &SchemaStats) -> f64 {
    // Normalize to `column OP literal`.
    let (column, literal, op) = match (left, right) {
        (Expr::Column(c), Expr::Literal(v)) => (c, v, op),
        (Expr::Literal(v), Expr::Column(c)) => (c, v, flip(op)),
        _ => return 0.5,
    };
    let Some(col) = stats.get(column) else {
        return 0.5;
    };
    match op {
        BinOp::Eq => col.estimate_equality_selectivity(),
        BinOp::Ne => 1.0 - col.estimate_equality_selectivity(),
        BinOp::Lt | BinOp::Le => col.estimate_range_selectivity(None, Some(literal)),
        BinOp::Gt | BinOp::Ge => col.estimate_range_selectivity(Some(literal), None),
        _ => 0.5,
    }
}

fn flip(op: BinOp) -> BinOp {
    match op {
        BinOp::Lt => BinOp::Gt,
        BinOp::Le => BinOp::Ge,
        BinOp::Gt => BinOp::Lt,
        BinOp::Ge => BinOp::Le,
        other => other,
    }
}

/// Estimate join cardinality (number of output rows).
///
/// `rows * rows / max(distinct_left, distinct_right)` on the first equality
/// key; `min(rows)` when that key has no statistics.
fn estimate_join_cardinality(
    left: &SchemaStats,
    right: &SchemaStats,
    kind: JoinKind,
    left_keys: &[String],
    right_keys: &[String],
) -> u64 {
    let l = left.row_count;
    let r = right.row_count;
    let product = (l as u128) * (r as u128);

    let inner = match (left_keys.first(), right_keys.first()) {
        (Some(lk), Some(rk)) => match (left.get(lk), right.get(rk)) {
            (Some(ls), Some(rs)) => {
                let max_distinct = ls.distinct_count.unwrap_or(l).max(rs.distinct_count.unwrap_or(r));
                if max_distinct > 0 {
                    product / max_distinct as u128
                } else {
                    0
                }
            }
            _ => l.min(r) as u128,
        },
        _ => product,
    };
    let inner = inner.min(u64::MAX as u128) as u64;

    match kind {
        JoinKind::Inner | JoinKind::Cross => inner,
        JoinKind::Left => inner.max(l),
        JoinKind::Right => inner.max(r),
        JoinKind::Full => inner.max(l).max(r),
    }
}

/// Capped product of grouping-key distinct counts; a single group when
/// there are no keys.
fn estimate_aggregate_groups(input: &SchemaStats, keys: &[String]) -> u64 {
    let rows = input.row_count;
    if keys.is_empty() {
        return rows.min(1);
    }
    let mut groups = 1u64;
    let mut known = false;
    for key in keys {
        if let Some(distinct) = input.get(key).and_then(|c| c.distinct_count) {
            known = true;
            groups = groups.saturating_mul(distinct.max(1)).min(rows);
        }
    }
    if known {
        groups.min(rows)
    } else {
        // Assume 10% reduction.
        (rows / 10).max(rows.min(1))
    }
}

/// Derive statistics for every column named in `columns` of a scan with
/// `rows` rows, all with the given NDV. Handy for tests and demos.
pub fn uniform_stats(rows: u64, columns: &[(&str, u64)]) -> SchemaStats {
    let mut stats = SchemaStats::new(rows);
    for (name, ndv) in columns {
        stats
            .column_stats
            .insert(name.to_string(), ColumnStats::with_distinct(*ndv, 0, rows));
    }
    stats
}
