//! `waterfall`: a bridge between two milestones.
//!
//! Values are summed per key (group-by columns, label, parent) at each
//! milestone and reconciled into one `(start, end)` pair per key. The output
//! stacks start totals, children, parents and end totals; totals stay at the
//! edges whatever the requested sort.

use std::collections::{BTreeMap, BTreeSet};

use polars::prelude::*;

use crate::error::{StepError, StepResult};
use crate::step::{AggFunction, SortOrder, WaterfallSortBy, WaterfallStep, WATERFALL_TYPE_COLUMN};
use crate::tabular::frame::{cols, sort_by, typed_lit};
use crate::tabular::{FrameExt, Value};

use super::aggregate::{agg_expr, check_function};

type Sums = BTreeMap<Vec<Value>, Value>;

const RENDER_ORDER: &str = "__stepforge_render_order";
const SUM: &str = "__stepforge_sum";

pub fn waterfall(step: &WaterfallStep, frame: DataFrame) -> StepResult<DataFrame> {
    let value = frame.resolve(&step.value_column)?;
    check_function(&frame, &value, AggFunction::Sum)?;
    let milestones = frame.resolve(&step.milestones_column)?;
    let keys = frame.resolve_all(&step.key_columns())?;
    let groups = keys.len() - if step.parents_column.is_some() { 2 } else { 1 };
    let has_parent = step.parents_column.is_some();

    let mut columns = keys.clone();
    columns.push(value.clone());
    columns.push(WATERFALL_TYPE_COLUMN.to_string());
    for (i, name) in columns.iter().enumerate() {
        if super::contains(&columns[..i], name) {
            return Err(StepError::invalid(format!(
                "waterfall column '{}' is used twice",
                name
            )));
        }
    }

    let start = milestone_sums(&frame, &milestones, &step.start, &keys, &value)?;
    let end = milestone_sums(&frame, &milestones, &step.end, &keys, &value)?;
    let reconciled = reconcile(step.backfill, start, end);

    // Rows carry their render order last: start totals, children, parents,
    // end totals.
    let mut stacked: Vec<Vec<Value>> = Vec::new();
    let mut totals: BTreeMap<&[Value], (Value, Value)> = BTreeMap::new();
    let mut parents: BTreeMap<(&[Value], &Value), Value> = BTreeMap::new();
    for (key, (from, to)) in &reconciled {
        let group = &key[..groups];
        let delta = difference(to, from)?;

        let entry = totals.entry(group).or_insert((Value::Null, Value::Null));
        entry.0 = add(&entry.0, from)?;
        entry.1 = add(&entry.1, to)?;

        let mut row = group.to_vec();
        row.push(text(&key[groups]));
        if has_parent {
            let parent = &key[groups + 1];
            row.push(parent.clone());
            let sum = parents.entry((group, parent)).or_insert(Value::Null);
            *sum = add(sum, &delta)?;
        }
        row.push(delta);
        row.push(Value::from(if has_parent { "child" } else { "parent" }));
        row.push(Value::Int(1));
        stacked.push(row);
    }
    for ((group, parent), sum) in parents {
        let mut row = group.to_vec();
        row.push(text(parent));
        row.push(parent.clone());
        row.push(sum);
        row.push(Value::from("parent"));
        row.push(Value::Int(2));
        stacked.push(row);
    }
    for (group, (from, to)) in totals {
        for (order, milestone, total) in [(0, &step.start, from), (3, &step.end, to)] {
            let mut row = group.to_vec();
            row.push(Value::from(WaterfallStep::milestone_label(milestone)));
            if has_parent {
                row.push(Value::Null);
            }
            row.push(total);
            row.push(Value::Null);
            row.push(Value::Int(order));
            stacked.push(row);
        }
    }

    let label = &keys[groups];
    let mut sort_keys = vec![(RENDER_ORDER.to_string(), SortOrder::Asc)];
    sort_keys.push(match step.sort_by {
        WaterfallSortBy::Label => (label.clone(), step.order),
        WaterfallSortBy::Value => (value.clone(), step.order),
    });
    sort_keys.extend(keys[..groups].iter().map(|g| (g.clone(), SortOrder::Asc)));
    if step.sort_by == WaterfallSortBy::Value {
        sort_keys.push((label.clone(), SortOrder::Asc));
    }

    let mut with_order = columns.clone();
    with_order.push(RENDER_ORDER.to_string());
    let bridge = DataFrame::from_cells(&with_order, stacked)?;
    Ok(sort_by(bridge.lazy(), &sort_keys)
        .select(cols(&columns))
        .collect()?)
}

/// Sum of the value column per key, over the rows at `milestone`.
fn milestone_sums(
    frame: &DataFrame,
    milestones: &str,
    milestone: &serde_json::Value,
    keys: &[String],
    value: &str,
) -> StepResult<Sums> {
    let at = typed_lit(milestone, frame.column(milestones)?.dtype());
    let summed = frame
        .clone()
        .lazy()
        .filter(col(milestones).eq(at))
        .group_by(cols(keys))
        .agg([agg_expr(AggFunction::Sum, col(value)).alias(SUM)])
        .collect()?;
    Ok(summed
        .cells()
        .into_iter()
        .map(|mut row| {
            let sum = row.pop().unwrap_or(Value::Null);
            (row, sum)
        })
        .collect())
}

/// `(start, end)` per key. With backfill a key missing at one milestone
/// counts as 0 there; without it the key is dropped.
fn reconcile(backfill: bool, mut start: Sums, mut end: Sums) -> BTreeMap<Vec<Value>, (Value, Value)> {
    if !backfill {
        return start
            .into_iter()
            .filter_map(|(key, from)| end.remove(&key).map(|to| (key, (from, to))))
            .collect();
    }
    let zero = |v: Option<Value>| match v {
        Some(v) if !v.is_null() => v,
        _ => Value::Int(0),
    };
    let keys: BTreeSet<Vec<Value>> = start.keys().chain(end.keys()).cloned().collect();
    keys.into_iter()
        .map(|key| {
            let from = zero(start.remove(&key));
            let to = zero(end.remove(&key));
            (key, (from, to))
        })
        .collect()
}

fn difference(to: &Value, from: &Value) -> StepResult<Value> {
    Ok(match (to, from) {
        (Value::Null, _) | (_, Value::Null) => Value::Null,
        (Value::Int(a), Value::Int(b)) => match a.checked_sub(*b) {
            Some(d) => Value::Int(d),
            None => Value::Float(*a as f64 - *b as f64),
        },
        (a, b) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => Value::Float(a - b),
            _ => {
                return Err(StepError::Type(format!(
                    "cannot subtract {} from {}",
                    b.type_name(),
                    a.type_name()
                )))
            }
        },
    })
}

fn add(left: &Value, right: &Value) -> StepResult<Value> {
    Ok(match (left, right) {
        (Value::Null, other) | (other, Value::Null) => other.clone(),
        (Value::Int(a), Value::Int(b)) => match a.checked_add(*b) {
            Some(sum) => Value::Int(sum),
            None => Value::Float(*a as f64 + *b as f64),
        },
        (a, b) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => Value::Float(a + b),
            _ => {
                return Err(StepError::Type(format!(
                    "cannot add {} and {}",
                    a.type_name(),
                    b.type_name()
                )))
            }
        },
    })
}

fn text(value: &Value) -> Value {
    value.to_text().map(Value::Text).unwrap_or(Value::Null)
}
