//! Cardinality estimation and group-count estimation with statistics

use eagg_core::prelude::*;
use eagg_planner::cardinality::{uniform_stats, CardinalityEstimator, StatsEstimator};
use eagg_planner::rules::eager_agg::cost::estimate_group_count;

fn scan(id: u32, cols: &[&str], stats: Option<SchemaStats>) -> LogicalPlan {
    LogicalPlan::Scan {
        id: PlanNodeId::new(id),
        table: format!("t{}", id),
        schema: Schema::new_with_stats(
            cols.iter()
                .map(|c| Field::new(*c, DataType::Int64, true))
                .collect(),
            stats,
        ),
    }
}

fn join_on(left: LogicalPlan, right: LogicalPlan, lk: &str, rk: &str) -> LogicalPlan {
    LogicalPlan::Join {
        id: PlanNodeId::new(left.max_id().get().max(right.max_id().get()) + 1),
        left: Box::new(left),
        right: Box::new(right),
        join: JoinStep::inner(vec![lk.into()], vec![rk.into()]),
    }
}

#[test]
fn test_filter_then_join_estimate() {
    let facts = scan(1, &["f.dim", "f.kind"], Some(uniform_stats(10_000, &[("f.dim", 100), ("f.kind", 4)])));
    let filtered = LogicalPlan::Filter {
        id: PlanNodeId::new(2),
        input: Box::new(facts),
        predicate: Expr::parse("f.kind = 1").unwrap(),
    };
    let dims = scan(3, &["d.id"], Some(uniform_stats(100, &[("d.id", 100)])));
    let plan = join_on(filtered, dims, "f.dim", "d.id");

    let stats = StatsEstimator.estimate(&plan).unwrap();
    // 10_000 / 4 = 2_500 facts, joined 1:1 against 100 distinct dimension keys.
    assert_eq!(stats.row_count, 2_500);
    assert_eq!(stats.get("d.id").unwrap().distinct_count, Some(100));
}

#[test]
fn test_missing_statistics_propagate() {
    let plan = join_on(
        scan(1, &["a"], Some(uniform_stats(10, &[("a", 10)]))),
        scan(2, &["b"], None),
        "a",
        "b",
    );
    assert!(StatsEstimator.estimate(&plan).is_none());
}

#[test]
fn test_group_count_damps_secondary_keys() {
    let stats = uniform_stats(100_000, &[("a", 1000), ("b", 40), ("c", 1)]);
    let config = EagerAggConfig::default();
    let keys: Vec<Symbol> = vec!["b".into(), "a".into(), "c".into()];
    // 1000 * (0.5 * 40) * max(1, 0.5 * 1)
    assert_eq!(estimate_group_count(&keys, &stats, &config), Some(20_000.0));

    let uncorrelated = EagerAggConfig {
        multi_agg_keys_correlated_coefficient: 1.0,
        ..Default::default()
    };
    assert_eq!(estimate_group_count(&keys, &stats, &uncorrelated), Some(40_000.0));
}

#[test]
fn test_group_count_never_exceeds_rows() {
    let stats = uniform_stats(500, &[("a", 500), ("b", 500)]);
    let keys: Vec<Symbol> = vec!["a".into(), "b".into()];
    assert_eq!(estimate_group_count(&keys, &stats, &EagerAggConfig::default()), Some(500.0));
}

#[test]
fn test_unknown_keys_are_ignored_unless_all_unknown() {
    let stats = SchemaStats::new(1000)
        .with_column("a", ColumnStats::with_distinct(10, 0, 1000))
        .with_column("b", ColumnStats::new());
    let config = EagerAggConfig::default();
    let keys: Vec<Symbol> = vec!["a".into(), "b".into()];
    assert_eq!(estimate_group_count(&keys, &stats, &config), Some(10.0));

    let only_unknown: Vec<Symbol> = vec!["b".into(), "missing".into()];
    assert_eq!(estimate_group_count(&only_unknown, &stats, &config), None);
}
