//! End-to-end eager aggregation scenarios: each rewritten plan must return
//! the same rows as the plan it came from.

mod plan_interp;

use eagg_core::prelude::*;
use eagg_planner::{
    explain, CollectingSink, DecisionReason, HeuristicOptimizer, OptimizeOutcome, StatsEstimator,
};
use plan_interp::{canonical_rows, int, row, text, Tables};

fn scan(id: u32, table: &str, cols: &[(&str, DataType)]) -> LogicalPlan {
    LogicalPlan::Scan {
        id: PlanNodeId::new(id),
        table: table.into(),
        schema: Schema::new(
            cols.iter()
                .map(|(c, t)| Field::new(*c, t.clone(), true))
                .collect(),
        ),
    }
}

fn orders() -> LogicalPlan {
    scan(
        1,
        "orders",
        &[
            ("o.id", DataType::Int64),
            ("o.cust", DataType::Int64),
            ("o.amount", DataType::Int64),
        ],
    )
}

fn customers() -> LogicalPlan {
    scan(
        2,
        "customers",
        &[
            ("c.id", DataType::Int64),
            ("c.region", DataType::Utf8),
            ("c.vip", DataType::Int64),
        ],
    )
}

fn regions() -> LogicalPlan {
    scan(4, "regions", &[("r.name", DataType::Utf8), ("r.zone", DataType::Utf8)])
}

fn join(id: u32, kind: JoinKind, left: LogicalPlan, right: LogicalPlan, on: (&str, &str)) -> LogicalPlan {
    let mut step = JoinStep::inner(vec![on.0.into()], vec![on.1.into()]);
    step.kind = kind;
    LogicalPlan::Join {
        id: PlanNodeId::new(id),
        left: Box::new(left),
        right: Box::new(right),
        join: step,
    }
}

fn orders_customers(kind: JoinKind) -> LogicalPlan {
    join(3, kind, orders(), customers(), ("o.cust", "c.id"))
}

fn desc(function: &str, arg: &str, ty: DataType, out: &str) -> AggregateDescription {
    AggregateDescription {
        function: BuiltinFunctions.resolve(function, &[ty], &[]).unwrap(),
        arguments: vec![arg.into()],
        output: out.into(),
        parameters: vec![],
    }
}

fn aggregate(input: LogicalPlan, keys: &[&str], aggs: Vec<AggregateDescription>) -> LogicalPlan {
    LogicalPlan::Aggregate {
        id: PlanNodeId::new(10),
        input: Box::new(input),
        agg: AggregateStep::new(keys.iter().map(|k| k.to_string()).collect(), aggs),
    }
}

fn tables() -> Tables {
    let order = |id: i64, cust: i64, amount: Option<i64>| {
        row(&[
            ("o.id", int(id)),
            ("o.cust", int(cust)),
            ("o.amount", amount.map(int).unwrap_or(Scalar::Null)),
        ])
    };
    let customer = |id: i64, region: Option<&str>, vip: i64| {
        row(&[
            ("c.id", int(id)),
            ("c.region", region.map(text).unwrap_or(Scalar::Null)),
            ("c.vip", int(vip)),
        ])
    };
    let region = |name: &str, zone: &str| row(&[("r.name", text(name)), ("r.zone", text(zone))]);

    let mut tables = Tables::new();
    tables.insert(
        "orders".into(),
        vec![
            order(1, 1, Some(50)),
            order(2, 1, Some(150)),
            order(3, 2, Some(200)),
            order(4, 2, None),
            order(5, 3, Some(120)),
            order(6, 3, Some(30)),
            order(7, 4, Some(500)),
            order(8, 1, Some(300)),
            order(9, 7, Some(80)),
        ],
    );
    tables.insert(
        "customers".into(),
        vec![
            customer(1, Some("north"), 1),
            customer(2, Some("south"), 0),
            customer(2, Some("west"), 1),
            customer(3, Some("north"), 0),
            customer(5, Some("east"), 1),
            customer(7, None, 1),
        ],
    );
    tables.insert(
        "regions".into(),
        vec![
            region("north", "N"),
            region("south", "S"),
            region("west", "S"),
            region("east", "E"),
        ],
    );
    tables
}

fn optimize(plan: &LogicalPlan, config: EagerAggConfig) -> (OptimizeOutcome, CollectingSink) {
    let sink = CollectingSink::new();
    let outcome = HeuristicOptimizer::new(config)
        .optimize(plan.clone(), &BuiltinFunctions, &StatsEstimator, &sink)
        .unwrap();
    (outcome, sink)
}

fn partials(plan: &LogicalPlan) -> Vec<&AggregateStep> {
    let mut out = Vec::new();
    if let LogicalPlan::Aggregate { agg, .. } = plan {
        if !agg.is_final {
            out.push(agg);
        }
    }
    for child in plan.children() {
        out.extend(partials(child));
    }
    out
}

fn assert_same_rows(before: &LogicalPlan, after: &LogicalPlan) {
    let data = tables();
    assert_eq!(
        canonical_rows(before, &data),
        canonical_rows(after, &data),
        "rewritten plan disagrees:\n{}",
        explain(after)
    );
}

#[test]
fn test_sum_pushed_below_inner_join() {
    let plan = aggregate(
        orders_customers(JoinKind::Inner),
        &["c.region"],
        vec![desc("sum", "o.amount", DataType::Int64, "total")],
    );
    let (outcome, _) = optimize(&plan, EagerAggConfig::default());

    assert_eq!(outcome.applied.len(), 1);
    let local = partials(&outcome.plan);
    assert_eq!(local.len(), 1);
    assert_eq!(local[0].keys, vec!["o.cust"]);
    assert_eq!(local[0].aggregates[0].name(), "sum");
    assert_same_rows(&plan, &outcome.plan);
}

#[test]
fn test_count_of_conditional_column_uses_state_and_merge() {
    let proj = LogicalPlan::Projection {
        id: PlanNodeId::new(6),
        input: Box::new(orders_customers(JoinKind::Inner)),
        assignments: vec![
            Assignment::identity("o.cust", DataType::Int64),
            Assignment::new(
                "big_region",
                Expr::parse("multiIf(o.amount > 100, c.region, NULL)").unwrap(),
                DataType::Utf8,
            ),
        ],
    };
    let plan = aggregate(proj, &["o.cust"], vec![desc("count", "big_region", DataType::Utf8, "n")]);
    let (outcome, _) = optimize(&plan, EagerAggConfig::default());

    let local = partials(&outcome.plan);
    assert_eq!(local.len(), 1);
    assert_eq!(local[0].aggregates[0].name(), "countState");
    assert_eq!(local[0].keys, vec!["c.id"]);
    let LogicalPlan::Aggregate { agg, .. } = &outcome.plan else {
        panic!("root must stay an aggregate");
    };
    assert_eq!(agg.aggregates[0].name(), "countMerge");
    assert_same_rows(&plan, &outcome.plan);
}

#[test]
fn test_uniq_exact_merges_partial_sets() {
    let plan = aggregate(
        orders_customers(JoinKind::Inner),
        &["c.region"],
        vec![desc("uniqExact", "o.amount", DataType::Int64, "distinct_amounts")],
    );
    let (outcome, _) = optimize(&plan, EagerAggConfig::default());

    let local = partials(&outcome.plan);
    assert_eq!(local[0].aggregates[0].name(), "uniqExactState");
    assert_same_rows(&plan, &outcome.plan);
}

#[test]
fn test_count_on_null_supplying_side_of_left_join() {
    let plan = aggregate(
        orders_customers(JoinKind::Left),
        &["o.cust"],
        vec![desc("count", "c.region", DataType::Utf8, "n")],
    );
    let (outcome, _) = optimize(&plan, EagerAggConfig::default());

    let LogicalPlan::Aggregate { input, .. } = &outcome.plan else {
        panic!("root must stay an aggregate");
    };
    let LogicalPlan::Join { right, .. } = input.as_ref() else {
        panic!("join expected under the final aggregate");
    };
    assert!(matches!(right.as_ref(), LogicalPlan::Aggregate { agg, .. } if !agg.is_final));
    assert_same_rows(&plan, &outcome.plan);
}

#[test]
fn test_key_spanning_both_sides_leaves_plan_unchanged() {
    let proj = LogicalPlan::Projection {
        id: PlanNodeId::new(6),
        input: Box::new(orders_customers(JoinKind::Inner)),
        assignments: vec![
            Assignment::new("k", Expr::parse("o.id + c.vip").unwrap(), DataType::Int64),
            Assignment::identity("o.amount", DataType::Int64),
        ],
    };
    let plan = aggregate(proj, &["k"], vec![desc("sum", "o.amount", DataType::Int64, "s")]);
    let (outcome, sink) = optimize(&plan, EagerAggConfig::default());

    assert!(outcome.applied.is_empty());
    assert_eq!(outcome.plan, plan);
    assert!(sink.decisions().is_empty());
}

fn three_way_chain() -> LogicalPlan {
    let top = join(
        5,
        JoinKind::Inner,
        orders_customers(JoinKind::Inner),
        regions(),
        ("c.region", "r.name"),
    );
    aggregate(top, &["r.zone"], vec![desc("sum", "o.amount", DataType::Int64, "total")])
}

#[test]
fn test_chain_stops_at_first_join_by_default() {
    let plan = three_way_chain();
    let (outcome, sink) = optimize(&plan, EagerAggConfig::default());

    let LogicalPlan::Aggregate { input, .. } = &outcome.plan else {
        panic!("root must stay an aggregate");
    };
    let LogicalPlan::Join { left, .. } = input.as_ref() else {
        panic!("top join expected");
    };
    let LogicalPlan::Aggregate { agg, input: below, .. } = left.as_ref() else {
        panic!("partial aggregate expected on the left of the top join");
    };
    assert!(!agg.is_final);
    assert_eq!(agg.keys, vec!["c.region"]);
    assert_eq!(below.id(), PlanNodeId::new(3));

    let decisions = sink.decisions();
    assert_eq!(decisions.len(), 1);
    assert_eq!(decisions[0].join_id, PlanNodeId::new(5));
    assert_same_rows(&plan, &outcome.plan);
}

#[test]
fn test_chain_reaches_bottom_join_when_searching_every_join() {
    let plan = three_way_chain();
    let config = EagerAggConfig {
        agg_push_down_every_join: true,
        ..Default::default()
    };
    let (outcome, sink) = optimize(&plan, config);

    let local = partials(&outcome.plan);
    assert_eq!(local.len(), 1);
    assert_eq!(local[0].keys, vec!["o.cust"]);
    assert_eq!(sink.decisions()[0].join_id, PlanNodeId::new(3));
    assert_same_rows(&plan, &outcome.plan);
}

#[test]
fn test_decision_without_statistics_follows_zero_threshold() {
    let plan = aggregate(
        orders_customers(JoinKind::Inner),
        &["c.region"],
        vec![desc("max", "o.amount", DataType::Int64, "top")],
    );
    let (_, sink) = optimize(&plan, EagerAggConfig::default());
    let decisions = sink.decisions();
    assert_eq!(decisions.len(), 1);
    assert!(decisions[0].accepted);
    assert_eq!(decisions[0].reason, DecisionReason::NoStatistics);

    let strict = EagerAggConfig {
        agg_push_down_threshold: 0.5,
        ..Default::default()
    };
    let (outcome, sink) = optimize(&plan, strict);
    assert!(outcome.applied.is_empty());
    assert!(!sink.decisions()[0].accepted);
}
