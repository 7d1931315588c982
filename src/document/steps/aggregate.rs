//! Grouping steps: `aggregate`, `uniquegroups`, `totals` and `rollup`.
//!
//! `totals` and `rollup` compute one grouping per combination inside a
//! `$facet`, then flatten the facets back into one stream of documents.

use serde_json::{json, Value as JsonValue};

use crate::document::expr::{
    accumulator, field, finalize, group_id, group_key, literal, object, object_of, ungroup,
};
use crate::document::Stage;
use crate::error::{StepError, StepResult};
use crate::step::{validate_aggregations, AggregateStep, Aggregation, RollupStep, TotalsStep, UniqueGroupsStep};

const ROWS: &str = "__rows";

/// `$group` stage over `keys` with every aggregation, plus `extra`
/// accumulators.
fn group(keys: &[String], aggregations: &[Aggregation], extra: Vec<(String, JsonValue)>) -> Stage {
    let mut spec = vec![("_id".to_string(), group_id(keys))];
    for agg in aggregations {
        for (column, new) in agg.pairs() {
            spec.push((new.to_string(), accumulator(agg.aggfunction, column)));
        }
    }
    spec.extend(extra);
    object("$group", object_of(spec))
}

/// Final values of every aggregation.
fn finalized(aggregations: &[Aggregation]) -> Vec<(String, JsonValue)> {
    aggregations
        .iter()
        .flat_map(|agg| {
            agg.newcolumns
                .iter()
                .map(move |new| (new.clone(), finalize(agg.aggfunction, new)))
        })
        .collect()
}

/// Flatten named facets into one stream of documents.
fn flatten_facets(names: &[String]) -> Vec<Stage> {
    let arrays: Vec<JsonValue> = names.iter().map(|n| field(n)).collect();
    vec![
        json!({ "$project": { ROWS: { "$concatArrays": arrays } } }),
        json!({ "$unwind": field(ROWS) }),
        json!({ "$replaceRoot": { "newRoot": field(ROWS) } }),
    ]
}

pub fn aggregate(step: &AggregateStep) -> StepResult<Vec<Stage>> {
    if step.aggregations.is_empty() {
        return Err(StepError::invalid("aggregate needs at least one aggregation"));
    }
    validate_aggregations(&step.aggregations, &step.on)?;

    if step.keep_original_granularity {
        let rows = vec![(ROWS.to_string(), json!({ "$push": "$$ROOT" }))];
        let merged = json!([field(ROWS), object_of(finalized(&step.aggregations))]);
        return Ok(vec![
            group(&step.on, &step.aggregations, rows),
            json!({ "$unwind": field(ROWS) }),
            json!({ "$replaceRoot": { "newRoot": { "$mergeObjects": merged } } }),
        ]);
    }

    let mut projection = vec![("_id".to_string(), json!(0))];
    projection.extend(ungroup(&step.on));
    projection.extend(finalized(&step.aggregations));
    Ok(vec![
        group(&step.on, &step.aggregations, Vec::new()),
        object("$project", object_of(projection)),
    ])
}

pub fn unique_groups(step: &UniqueGroupsStep) -> StepResult<Vec<Stage>> {
    if step.on.is_empty() {
        return Err(StepError::invalid("uniquegroups needs at least one column"));
    }
    let mut projection = vec![("_id".to_string(), json!(0))];
    projection.extend(ungroup(&step.on));
    Ok(vec![
        object("$group", object("_id", group_id(&step.on))),
        object("$project", object_of(projection)),
    ])
}

pub fn totals(step: &TotalsStep) -> StepResult<Vec<Stage>> {
    if step.total_dimensions.is_empty() {
        return Err(StepError::invalid("totals needs at least one dimension"));
    }
    let mut keys = step.groups.clone();
    keys.extend(step.total_dimensions.iter().map(|d| d.total_column.clone()));
    validate_aggregations(&step.aggregations, &keys)?;

    let mut facets = Vec::new();
    let mut names = Vec::new();
    for mask in step.combinations() {
        let totaled = |i: usize| mask & (1 << i) != 0;
        let mut group_keys = step.groups.clone();
        let mut projection = vec![("_id".to_string(), json!(0))];
        projection.extend(ungroup(&step.groups));
        for (i, dimension) in step.total_dimensions.iter().enumerate() {
            if totaled(i) {
                let label = JsonValue::String(dimension.total_rows_label.clone());
                projection.push((dimension.total_column.clone(), literal(&label)));
            } else {
                group_keys.push(dimension.total_column.clone());
                projection.push((
                    dimension.total_column.clone(),
                    group_key(&dimension.total_column),
                ));
            }
        }
        projection.extend(finalized(&step.aggregations));

        let name = format!("__totals_{}", mask);
        facets.push((
            name.clone(),
            json!([
                group(&group_keys, &step.aggregations, Vec::new()),
                object("$project", object_of(projection)),
            ]),
        ));
        names.push(name);
    }

    let mut stages = vec![object("$facet", object_of(facets))];
    stages.extend(flatten_facets(&names));
    Ok(stages)
}

pub fn rollup(step: &RollupStep) -> StepResult<Vec<Stage>> {
    if step.hierarchy.is_empty() {
        return Err(StepError::invalid("rollup needs a hierarchy"));
    }
    let (label, level, parent) = (step.label_column(), step.level_column(), step.parent_column());
    let mut keys = step.groupby.clone();
    keys.extend(step.hierarchy.iter().cloned());
    keys.extend([label.to_string(), level.to_string(), parent.to_string()]);
    validate_aggregations(&step.aggregations, &keys)?;

    let mut facets = Vec::new();
    let mut names = Vec::new();
    for (depth, current) in step.hierarchy.iter().enumerate() {
        let mut group_keys = step.groupby.clone();
        group_keys.extend(step.hierarchy[..=depth].iter().cloned());

        let mut projection = vec![("_id".to_string(), json!(0))];
        projection.extend(ungroup(&step.groupby));
        for (i, column) in step.hierarchy.iter().enumerate() {
            let value = if i <= depth {
                group_key(column)
            } else {
                literal(&JsonValue::Null)
            };
            projection.push((column.clone(), value));
        }
        projection.push((label.to_string(), group_key(current)));
        projection.push((level.to_string(), literal(&JsonValue::String(current.clone()))));
        let parent_value = match depth.checked_sub(1) {
            Some(up) => group_key(&step.hierarchy[up]),
            None => literal(&JsonValue::Null),
        };
        projection.push((parent.to_string(), parent_value));
        projection.extend(finalized(&step.aggregations));

        let name = format!("__rollup_{}", depth);
        facets.push((
            name.clone(),
            json!([
                group(&group_keys, &step.aggregations, Vec::new()),
                object("$project", object_of(projection)),
            ]),
        ));
        names.push(name);
    }

    let mut stages = vec![object("$facet", object_of(facets))];
    stages.extend(flatten_facets(&names));
    Ok(stages)
}
