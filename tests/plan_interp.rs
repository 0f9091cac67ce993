//! Row-at-a-time reference interpreter for logical plans, used to check
//! that rewritten plans return the same rows as the originals.
#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap};

use eagg_core::prelude::*;
use eagg_core::types::scalar_cmp;

pub type Row = HashMap<String, Scalar>;
pub type Tables = HashMap<String, Vec<Row>>;

pub fn row(values: &[(&str, Scalar)]) -> Row {
    values
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

pub fn int(v: i64) -> Scalar {
    Scalar::I64(v)
}

pub fn text(v: &str) -> Scalar {
    Scalar::Str(v.to_string())
}

pub fn execute(plan: &LogicalPlan, tables: &Tables) -> Result<Vec<Row>> {
    match plan {
        LogicalPlan::Scan { table, schema, .. } => {
            let rows = tables
                .get(table)
                .ok_or_else(|| Error::Plan(format!("no rows for table '{}'", table)))?;
            Ok(rows
                .iter()
                .map(|r| {
                    schema
                        .fields
                        .iter()
                        .map(|f| (f.name.clone(), r.get(&f.name).cloned().unwrap_or(Scalar::Null)))
                        .collect()
                })
                .collect())
        }
        LogicalPlan::Filter {
            input, predicate, ..
        } => {
            let mut out = Vec::new();
            for r in execute(input, tables)? {
                if predicate.evaluate_bool(&r)? {
                    out.push(r);
                }
            }
            Ok(out)
        }
        LogicalPlan::Projection {
            input, assignments, ..
        } => execute(input, tables)?
            .iter()
            .map(|r| {
                assignments
                    .iter()
                    .map(|a| Ok((a.symbol.clone(), a.expr.evaluate(r)?)))
                    .collect::<Result<Row>>()
            })
            .collect(),
        LogicalPlan::Join {
            left, right, join, ..
        } => join_rows(left, right, join, tables),
        LogicalPlan::Aggregate { input, agg, .. } => aggregate_rows(input, agg, tables),
    }
}

fn keys_match(l: &Row, r: &Row, join: &JoinStep) -> bool {
    join.left_keys.iter().zip(&join.right_keys).all(|(lk, rk)| {
        match (l.get(lk), r.get(rk)) {
            (Some(a), Some(b)) if !a.is_null() && !b.is_null() => scalar_cmp(a, b).is_eq(),
            _ => false,
        }
    })
}

fn merge(l: &Row, r: &Row) -> Row {
    let mut out = l.clone();
    out.extend(r.iter().map(|(k, v)| (k.clone(), v.clone())));
    out
}

fn nulls(names: &[Symbol]) -> Row {
    names.iter().map(|n| (n.clone(), Scalar::Null)).collect()
}

fn join_rows(left: &LogicalPlan, right: &LogicalPlan, join: &JoinStep, tables: &Tables) -> Result<Vec<Row>> {
    let l_rows = execute(left, tables)?;
    let r_rows = execute(right, tables)?;
    let keep_left = matches!(join.kind, JoinKind::Left | JoinKind::Full);
    let keep_right = matches!(join.kind, JoinKind::Right | JoinKind::Full);

    let mut out = Vec::new();
    let mut right_matched = vec![false; r_rows.len()];
    for l in &l_rows {
        let mut matched = false;
        for (j, r) in r_rows.iter().enumerate() {
            if !keys_match(l, r, join) {
                continue;
            }
            let merged = merge(l, r);
            if let Some(filter) = &join.filter {
                if !filter.evaluate_bool(&merged)? {
                    continue;
                }
            }
            matched = true;
            right_matched[j] = true;
            out.push(merged);
        }
        if !matched && keep_left {
            out.push(merge(l, &nulls(&right.output_names()?)));
        }
    }
    if keep_right {
        let left_nulls = nulls(&left.output_names()?);
        for (r, matched) in r_rows.iter().zip(right_matched) {
            if !matched {
                out.push(merge(&left_nulls, r));
            }
        }
    }
    Ok(out)
}

fn aggregate_rows(input: &LogicalPlan, agg: &AggregateStep, tables: &Tables) -> Result<Vec<Row>> {
    let rows = execute(input, tables)?;
    let mut groups: BTreeMap<String, Vec<&Row>> = BTreeMap::new();
    if agg.keys.is_empty() {
        groups.entry(String::new()).or_default();
    }
    for r in &rows {
        let key: Vec<String> = agg
            .keys
            .iter()
            .map(|k| format!("{:?}", r.get(k).cloned().unwrap_or(Scalar::Null)))
            .collect();
        groups.entry(key.join("|")).or_default().push(r);
    }

    let mut out = Vec::new();
    for members in groups.values() {
        let mut result = Row::new();
        if let Some(first) = members.first() {
            for k in &agg.keys {
                result.insert(k.clone(), first.get(k).cloned().unwrap_or(Scalar::Null));
            }
        }
        for desc in &agg.aggregates {
            let values: Vec<Scalar> = match desc.arguments.first() {
                Some(arg) => members
                    .iter()
                    .map(|r| r.get(arg).cloned().unwrap_or(Scalar::Null))
                    .collect(),
                None => vec![Scalar::I64(1); members.len()],
            };
            result.insert(desc.output.clone(), apply(desc.name(), &values)?);
        }
        out.push(result);
    }
    Ok(out)
}

fn as_i64(v: &Scalar) -> Option<i64> {
    match v {
        Scalar::I32(x) => Some(*x as i64),
        Scalar::I64(x) => Some(*x),
        _ => None,
    }
}

const SET_SEPARATOR: char = '\u{1}';

fn decode_set(v: &Scalar) -> BTreeSet<String> {
    match v {
        Scalar::Str(s) => s
            .split(SET_SEPARATOR)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect(),
        _ => BTreeSet::new(),
    }
}

fn encode_set(set: &BTreeSet<String>) -> Scalar {
    let parts: Vec<&str> = set.iter().map(String::as_str).collect();
    Scalar::Str(parts.join(&SET_SEPARATOR.to_string()))
}

fn apply(function: &str, values: &[Scalar]) -> Result<Scalar> {
    let present: Vec<&Scalar> = values.iter().filter(|v| !v.is_null()).collect();
    let bits = |f: fn(i64, i64) -> i64| {
        present
            .iter()
            .filter_map(|v| as_i64(v))
            .reduce(f)
            .map(Scalar::I64)
            .unwrap_or(Scalar::Null)
    };
    Ok(match function.to_ascii_lowercase().as_str() {
        "count" | "countstate" => Scalar::I64(present.len() as i64),
        "countmerge" => Scalar::I64(present.iter().filter_map(|v| as_i64(v)).sum()),
        "sum" | "sumwithoverflow" => {
            if present.iter().any(|v| matches!(v, Scalar::F32(_) | Scalar::F64(_))) {
                let total = present
                    .iter()
                    .map(|v| match v {
                        Scalar::F32(x) => *x as f64,
                        Scalar::F64(x) => *x,
                        other => as_i64(other).unwrap_or(0) as f64,
                    })
                    .sum();
                Scalar::F64(total)
            } else {
                Scalar::I64(present.iter().filter_map(|v| as_i64(v)).sum())
            }
        }
        "min" => present
            .iter()
            .min_by(|a, b| scalar_cmp(a, b))
            .map(|v| (*v).clone())
            .unwrap_or(Scalar::Null),
        "max" => present
            .iter()
            .max_by(|a, b| scalar_cmp(a, b))
            .map(|v| (*v).clone())
            .unwrap_or(Scalar::Null),
        "any" => present.first().map(|v| (*v).clone()).unwrap_or(Scalar::Null),
        "anylast" => present.last().map(|v| (*v).clone()).unwrap_or(Scalar::Null),
        "groupbitand" => bits(|a, b| a & b),
        "groupbitor" => bits(|a, b| a | b),
        "groupbitxor" => bits(|a, b| a ^ b),
        "uniqexact" => {
            let distinct: BTreeSet<String> = present.iter().map(|v| format!("{:?}", v)).collect();
            Scalar::I64(distinct.len() as i64)
        }
        "uniqexactstate" => encode_set(&present.iter().map(|v| format!("{:?}", v)).collect()),
        "uniqexactmerge" => {
            let union: BTreeSet<String> = present.iter().flat_map(|v| decode_set(v)).collect();
            Scalar::I64(union.len() as i64)
        }
        other => return Err(Error::Function(format!("interpreter has no '{}'", other))),
    })
}

/// Rows of `plan` rendered in output-column order and sorted, so two plans
/// can be compared as multisets.
pub fn canonical_rows(plan: &LogicalPlan, tables: &Tables) -> Vec<String> {
    let names = plan.output_names().unwrap();
    let mut rows: Vec<String> = execute(plan, tables)
        .unwrap()
        .iter()
        .map(|r| {
            names
                .iter()
                .map(|n| r.get(n).cloned().unwrap_or(Scalar::Null).to_string())
                .collect::<Vec<_>>()
                .join(" | ")
        })
        .collect();
    rows.sort();
    rows
}
