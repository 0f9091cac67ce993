//! Text rendering of plans and cost decisions.

use eagg_core::plan::{Assignment, JoinStrictness, LogicalPlan};

use crate::rules::eager_agg::cost::PushDownDecision;

/// One line per node, children indented under their parent.
///
/// ```text
/// Aggregate[10] keys=[c.region] aggs=[total := sum(inter#o.amount)]
///   Join[3] inner on o.cust = c.id
///     Aggregate[11] partial keys=[o.cust] aggs=[inter#o.amount := sum(o.amount)]
///       Scan[1] orders (o.id, o.cust, o.amount) rows=1000
///     Scan[2] customers (c.id, c.region)
/// ```
pub fn explain(plan: &LogicalPlan) -> String {
    let mut out = String::new();
    write_node(plan, 0, &mut out);
    out
}

fn write_node(plan: &LogicalPlan, depth: usize, out: &mut String) {
    out.push_str(&format!("{}{}\n", "  ".repeat(depth), describe(plan)));
    for child in plan.children() {
        write_node(child, depth + 1, out);
    }
}

/// Header line of a single node, without its children.
pub fn describe(plan: &LogicalPlan) -> String {
    match plan {
        LogicalPlan::Scan { id, table, schema } => {
            let mut line = format!("Scan[{}] {} ({})", id, table, schema.names().join(", "));
            if let Some(stats) = &schema.stats {
                line.push_str(&format!(" rows={}", stats.row_count));
            }
            line
        }
        LogicalPlan::Filter { id, predicate, .. } => format!("Filter[{}] {}", id, predicate),
        LogicalPlan::Projection {
            id, assignments, ..
        } => {
            let items: Vec<String> = assignments.iter().map(assignment).collect();
            format!("Projection[{}] {}", id, items.join(", "))
        }
        LogicalPlan::Join { id, join, .. } => {
            let mut line = format!("Join[{}] {}", id, format!("{:?}", join.kind).to_lowercase());
            if join.strictness != JoinStrictness::All {
                line.push(' ');
                line.push_str(&format!("{:?}", join.strictness).to_lowercase());
            }
            if !join.left_keys.is_empty() {
                let on: Vec<String> = join
                    .left_keys
                    .iter()
                    .zip(&join.right_keys)
                    .map(|(l, r)| format!("{} = {}", l, r))
                    .collect();
                line.push_str(" on ");
                line.push_str(&on.join(" AND "));
            }
            if let Some(filter) = &join.filter {
                line.push_str(&format!(" filter {}", filter));
            }
            line
        }
        LogicalPlan::Aggregate { id, agg, .. } => {
            let aggs: Vec<String> = agg.aggregates.iter().map(|a| a.to_string()).collect();
            format!(
                "Aggregate[{}]{} keys=[{}] aggs=[{}]",
                id,
                if agg.is_final { "" } else { " partial" },
                agg.keys.join(", "),
                aggs.join(", ")
            )
        }
    }
}

fn assignment(a: &Assignment) -> String {
    if a.is_identity() {
        a.symbol.clone()
    } else {
        format!("{} := {}", a.symbol, a.expr)
    }
}

/// One line per cost decision, in the order they were recorded.
pub fn explain_decisions(decisions: &[PushDownDecision]) -> String {
    if decisions.is_empty() {
        return "no push-down candidates\n".to_string();
    }
    decisions.iter().map(|d| format!("{}\n", d)).collect()
}
