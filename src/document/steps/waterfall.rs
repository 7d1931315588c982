//! `waterfall` as aggregation stages.
//!
//! Documents at either milestone are grouped per key (group-by columns,
//! label, parent) with their start and end sums. A `$facet` then builds the
//! four row kinds from the reconciled keys, and the flattened result is
//! sorted on a hidden render-order field before that field is dropped.

use serde_json::{json, Value as JsonValue};

use crate::document::expr::{direction, field, group_key, literal, object, object_of};
use crate::document::Stage;
use crate::error::{StepError, StepResult};
use crate::step::{WaterfallSortBy, WaterfallStep, WATERFALL_TYPE_COLUMN};

const START: &str = "__start";
const END: &str = "__end";
const HAS_START: &str = "__has_start";
const HAS_END: &str = "__has_end";
const PARENT_KEY: &str = "__parent";
const ORDER: &str = "__waterfall_order";
const ROWS: &str = "__rows";

pub fn waterfall(step: &WaterfallStep) -> StepResult<Vec<Stage>> {
    let keys: Vec<String> = step.key_columns().into_iter().map(String::from).collect();
    let mut outputs: Vec<&str> = keys.iter().map(String::as_str).collect();
    outputs.push(&step.value_column);
    outputs.push(WATERFALL_TYPE_COLUMN);
    for (i, name) in outputs.iter().enumerate() {
        if outputs[..i].iter().any(|o| o.eq_ignore_ascii_case(name)) {
            return Err(StepError::invalid(format!(
                "waterfall column '{}' is used twice",
                name
            )));
        }
    }

    let milestone = field(&step.milestones_column);
    let value = field(&step.value_column);
    let is_start = json!({ "$eq": [milestone, literal(&step.start)] });
    let is_end = json!({ "$eq": [milestone, literal(&step.end)] });
    let side_sum = |test: &JsonValue| json!({ "$sum": { "$cond": [test, value, 0] } });

    let mut stages = vec![
        object(
            "$match",
            object(
                &step.milestones_column,
                json!({ "$in": [step.start, step.end] }),
            ),
        ),
        object(
            "$group",
            object_of([
                ("_id", object_of(keys.iter().map(|k| (k.as_str(), field(k))))),
                (START, side_sum(&is_start)),
                (END, side_sum(&is_end)),
                (HAS_START, json!({ "$max": is_start })),
                (HAS_END, json!({ "$max": is_end })),
            ]),
        ),
    ];
    if !step.backfill {
        stages.push(json!({ "$match": { HAS_START: true, HAS_END: true } }));
    }

    let label = &step.labels_column;
    let groups = &step.groupby;
    let delta = json!({ "$subtract": [field(END), field(START)] });

    // Documents here hold their key under `_id`.
    let keyed_groups = || -> JsonValue {
        if groups.is_empty() {
            JsonValue::Null
        } else {
            object_of(groups.iter().map(|g| (g.as_str(), group_key(g))))
        }
    };
    let row = |label_value: JsonValue,
               parent_value: Option<JsonValue>,
               amount: JsonValue,
               kind: JsonValue,
               order: i64| {
        let mut fields = vec![("_id".to_string(), json!(0))];
        fields.extend(groups.iter().map(|g| (g.clone(), group_key(g))));
        fields.push((label.clone(), label_value));
        if let (Some(parent), Some(parent_value)) = (&step.parents_column, parent_value) {
            fields.push((parent.clone(), parent_value));
        }
        fields.push((step.value_column.clone(), amount));
        fields.push((WATERFALL_TYPE_COLUMN.to_string(), kind));
        fields.push((ORDER.to_string(), literal(&json!(order))));
        object("$project", object_of(fields))
    };
    let total = |milestone: &JsonValue, side: &str, order: i64| {
        let name = WaterfallStep::milestone_label(milestone);
        json!([
            object(
                "$group",
                object_of([
                    ("_id", keyed_groups()),
                    (step.value_column.as_str(), json!({ "$sum": field(side) })),
                ]),
            ),
            row(
                literal(&JsonValue::String(name)),
                Some(literal(&JsonValue::Null)),
                field(&step.value_column),
                literal(&JsonValue::Null),
                order,
            ),
        ])
    };

    let child_kind = if step.parents_column.is_some() {
        "child"
    } else {
        "parent"
    };
    let children = json!([row(
        json!({ "$toString": group_key(label) }),
        step.parents_column.as_deref().map(group_key),
        delta.clone(),
        literal(&json!(child_kind)),
        1,
    )]);

    let mut facets = vec![("__start_total", total(&step.start, START, 0)), ("__children", children)];
    if let Some(parent) = &step.parents_column {
        let mut id: Vec<(String, JsonValue)> =
            groups.iter().map(|g| (g.clone(), group_key(g))).collect();
        id.push((PARENT_KEY.to_string(), group_key(parent)));
        let parent_key = group_key(PARENT_KEY);
        facets.push((
            "__parents",
            json!([
                object(
                    "$group",
                    object_of([
                        ("_id", object_of(id)),
                        (step.value_column.as_str(), json!({ "$sum": delta })),
                    ]),
                ),
                row(
                    json!({ "$toString": parent_key }),
                    Some(parent_key.clone()),
                    field(&step.value_column),
                    literal(&json!("parent")),
                    2,
                ),
            ]),
        ));
    }
    facets.push(("__end_total", total(&step.end, END, 3)));

    let names: Vec<JsonValue> = facets.iter().map(|(name, _)| field(name)).collect();
    stages.push(object("$facet", object_of(facets)));
    stages.push(json!({ "$project": { ROWS: { "$concatArrays": names } } }));
    stages.push(json!({ "$unwind": field(ROWS) }));
    stages.push(json!({ "$replaceRoot": { "newRoot": field(ROWS) } }));
    stages.push(object("$sort", sort_keys(step)));
    stages.push(json!({ "$unset": [ORDER] }));
    Ok(stages)
}

/// Render order first, then the requested key, then the groups.
fn sort_keys(step: &WaterfallStep) -> JsonValue {
    let mut keys: Vec<(String, i32)> = vec![(ORDER.to_string(), 1)];
    let primary = match step.sort_by {
        WaterfallSortBy::Label => &step.labels_column,
        WaterfallSortBy::Value => &step.value_column,
    };
    keys.push((primary.clone(), direction(step.order)));
    for group in &step.groupby {
        keys.push((group.clone(), 1));
    }
    if step.sort_by == WaterfallSortBy::Value {
        keys.push((step.labels_column.clone(), 1));
    }
    object_of(keys.into_iter().map(|(k, d)| (k, json!(d))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::steps::test_support::stages;
    use crate::step::{SortOrder, Step};

    fn bridge(parents: Option<&str>, groupby: &[&str], backfill: bool) -> Step {
        Step::Waterfall(WaterfallStep {
            value_column: "revenue".into(),
            milestones_column: "year".into(),
            start: json!(2019),
            end: json!(2020),
            labels_column: "city".into(),
            parents_column: parents.map(String::from),
            groupby: groupby.iter().map(|g| g.to_string()).collect(),
            sort_by: WaterfallSortBy::Value,
            order: SortOrder::Desc,
            backfill,
        })
    }

    #[test]
    fn test_flat_waterfall_stages() {
        let out = stages(bridge(None, &[], true)).unwrap();
        assert_eq!(out[0], json!({"$match": {"year": {"$in": [2019, 2020]}}}));
        assert_eq!(
            out[1]["$group"]["__start"],
            json!({"$sum": {"$cond": [{"$eq": ["$year", {"$literal": 2019}]}, "$revenue", 0]}})
        );
        let facets = out[2]["$facet"].as_object().unwrap();
        let names: Vec<&str> = facets.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["__start_total", "__children", "__end_total"]);
        assert_eq!(
            facets["__start_total"][1]["$project"]["city"],
            json!({"$literal": "2019"})
        );
        assert_eq!(
            facets["__children"][0]["$project"]["revenue"],
            json!({"$subtract": ["$__end", "$__start"]})
        );
        assert_eq!(
            facets["__children"][0]["$project"]["TYPE_waterfall"],
            json!({"$literal": "parent"})
        );
        assert_eq!(
            out[6].to_string(),
            r#"{"$sort":{"__waterfall_order":1,"revenue":-1,"city":1}}"#
        );
        assert_eq!(out[7], json!({"$unset": ["__waterfall_order"]}));
    }

    #[test]
    fn test_parents_and_groups() {
        let out = stages(bridge(Some("country"), &["product"], true)).unwrap();
        let parents = &out[2]["$facet"]["__parents"];
        assert_eq!(
            parents[0]["$group"]["_id"],
            json!({"product": "$_id.product", "__parent": "$_id.country"})
        );
        assert_eq!(parents[1]["$project"]["city"], json!({"$toString": "$_id.__parent"}));
        assert_eq!(parents[1]["$project"]["country"], json!("$_id.__parent"));
        assert_eq!(
            out[2]["$facet"]["__children"][0]["$project"]["TYPE_waterfall"],
            json!({"$literal": "child"})
        );
        assert_eq!(
            out[2]["$facet"]["__end_total"][0]["$group"]["_id"],
            json!({"product": "$_id.product"})
        );
    }

    #[test]
    fn test_without_backfill_incomplete_keys_are_dropped() {
        let out = stages(bridge(None, &[], false)).unwrap();
        assert_eq!(out[2], json!({"$match": {"__has_start": true, "__has_end": true}}));
    }

    #[test]
    fn test_clashing_columns_are_rejected() {
        assert!(stages(bridge(Some("city"), &[], true)).is_err());
    }
}
