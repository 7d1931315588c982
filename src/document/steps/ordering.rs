//! Ordering and window steps, built on `$sort` and `$setWindowFields`.

use serde_json::{json, Value as JsonValue};

use crate::document::expr::{field, group_id, object, object_of, sort_spec};
use crate::document::Stage;
use crate::error::{StepError, StepResult};
use crate::step::{
    ArgExtremumStep, CumsumStep, PercentageStep, RankMethod, RankStep, SortOrder, SortStep,
    TopStep,
};

const ROW_NUMBER: &str = "__row_number";
const EXTREMUM: &str = "__extremum";
const TOTAL: &str = "__total";

/// `$setWindowFields` over `partition`, optionally sorted.
fn window(partition: &[String], sort_by: Option<JsonValue>, output: JsonValue) -> Stage {
    let mut spec = Vec::new();
    if !partition.is_empty() {
        spec.push(("partitionBy", group_id(partition)));
    }
    if let Some(sort_by) = sort_by {
        spec.push(("sortBy", sort_by));
    }
    spec.push(("output", output));
    object("$setWindowFields", object_of(spec))
}

pub fn sort(step: &SortStep) -> StepResult<Vec<Stage>> {
    if step.columns.is_empty() {
        return Err(StepError::invalid("sort needs at least one column"));
    }
    let spec = sort_spec(step.columns.iter().map(|c| (c.column.as_str(), c.order)));
    Ok(vec![object("$sort", spec)])
}

pub fn top(step: &TopStep) -> StepResult<Vec<Stage>> {
    if step.limit == 0 {
        return Err(StepError::invalid("top needs a positive limit"));
    }
    let order = sort_spec([(step.rank_on.as_str(), step.sort)]);
    if step.groups.is_empty() {
        return Ok(vec![object("$sort", order), json!({ "$limit": step.limit })]);
    }
    Ok(vec![
        window(
            &step.groups,
            Some(order),
            object(ROW_NUMBER, json!({ "$documentNumber": {} })),
        ),
        json!({ "$match": { ROW_NUMBER: { "$lte": step.limit } } }),
        json!({ "$unset": [ROW_NUMBER] }),
    ])
}

pub fn rank(step: &RankStep) -> StepResult<Vec<Stage>> {
    let operator = match step.method {
        RankMethod::Standard => "$rank",
        RankMethod::Dense => "$denseRank",
    };
    Ok(vec![window(
        &step.groupby,
        Some(sort_spec([(step.value_col.as_str(), step.order)])),
        object(&step.output_column(), object(operator, json!({}))),
    )])
}

pub fn cumsum(step: &CumsumStep) -> StepResult<Vec<Stage>> {
    if step.to_cum_sum.is_empty() {
        return Err(StepError::invalid("cumsum needs at least one column"));
    }
    let output = object_of(step.to_cum_sum.iter().map(|(source, new)| {
        let name = if new.is_empty() {
            format!("{}_CUMSUM", source)
        } else {
            new.clone()
        };
        (
            name,
            json!({
                "$sum": field(source),
                "window": { "documents": ["unbounded", "current"] }
            }),
        )
    }));
    Ok(vec![window(
        &step.groupby,
        Some(sort_spec([(step.reference_column.as_str(), SortOrder::Asc)])),
        output,
    )])
}

pub fn percentage(step: &PercentageStep) -> StepResult<Vec<Stage>> {
    let column = field(&step.column);
    let ratio = json!({
        "$cond": [
            { "$eq": [field(TOTAL), 0] },
            null,
            { "$divide": [column, field(TOTAL)] }
        ]
    });
    Ok(vec![
        window(&step.group, None, object(TOTAL, json!({ "$sum": column }))),
        object("$addFields", object(&step.output_column(), ratio)),
        json!({ "$unset": [TOTAL] }),
    ])
}

/// Documents holding the group's maximum (`$max`) or minimum (`$min`).
/// Ties keep every matching document.
pub fn arg_extremum(step: &ArgExtremumStep, operator: &str) -> StepResult<Vec<Stage>> {
    let column = field(&step.column);
    Ok(vec![
        window(&step.groups, None, object(EXTREMUM, object(operator, column.clone()))),
        json!({ "$match": { "$expr": { "$eq": [column, field(EXTREMUM)] } } }),
        json!({ "$unset": [EXTREMUM] }),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::steps::test_support::stages;
    use crate::step::{SortColumn, Step};

    #[test]
    fn test_sort_keeps_key_order() {
        let out = stages(Step::Sort(SortStep {
            columns: vec![
                SortColumn {
                    column: "z".into(),
                    order: SortOrder::Desc,
                },
                SortColumn {
                    column: "a".into(),
                    order: SortOrder::Asc,
                },
            ],
        }))
        .unwrap();
        assert_eq!(out[0].to_string(), r#"{"$sort":{"z":-1,"a":1}}"#);
    }

    #[test]
    fn test_top_ungrouped_and_grouped() {
        let flat = stages(Step::Top(TopStep {
            rank_on: "v".into(),
            sort: SortOrder::Desc,
            limit: 3,
            groups: vec![],
        }))
        .unwrap();
        assert_eq!(flat, vec![json!({"$sort": {"v": -1}}), json!({"$limit": 3})]);

        let grouped = stages(Step::Top(TopStep {
            rank_on: "v".into(),
            sort: SortOrder::Asc,
            limit: 1,
            groups: vec!["g".into()],
        }))
        .unwrap();
        assert_eq!(
            grouped[0],
            json!({"$setWindowFields": {
                "partitionBy": {"g": "$g"},
                "sortBy": {"v": 1},
                "output": {"__row_number": {"$documentNumber": {}}}
            }})
        );
        assert_eq!(grouped[1], json!({"$match": {"__row_number": {"$lte": 1}}}));
    }

    #[test]
    fn test_dense_rank_default_name() {
        let out = stages(Step::Rank(RankStep {
            value_col: "score".into(),
            order: SortOrder::Desc,
            method: RankMethod::Dense,
            groupby: vec![],
            new_column_name: None,
        }))
        .unwrap();
        assert_eq!(
            out,
            vec![json!({"$setWindowFields": {
                "sortBy": {"score": -1},
                "output": {"score_RANK": {"$denseRank": {}}}
            }})]
        );
    }

    #[test]
    fn test_cumsum_running_window() {
        let out = stages(Step::Cumsum(CumsumStep {
            to_cum_sum: vec![("v".into(), "".into())],
            reference_column: "day".into(),
            groupby: vec!["g".into()],
        }))
        .unwrap();
        assert_eq!(
            out[0]["$setWindowFields"]["output"]["v_CUMSUM"],
            json!({"$sum": "$v", "window": {"documents": ["unbounded", "current"]}})
        );
    }

    #[test]
    fn test_percentage_guards_zero_total() {
        let out = stages(Step::Percentage(PercentageStep {
            column: "v".into(),
            group: vec![],
            new_column_name: None,
        }))
        .unwrap();
        assert_eq!(out[0], json!({"$setWindowFields": {"output": {"__total": {"$sum": "$v"}}}}));
        assert_eq!(
            out[1],
            json!({"$addFields": {"v_PCT": {"$cond": [
                {"$eq": ["$__total", 0]}, null, {"$divide": ["$v", "$__total"]}
            ]}}})
        );
    }

    #[test]
    fn test_argmin_keeps_ties() {
        let out = stages(Step::Argmin(ArgExtremumStep {
            column: "v".into(),
            groups: vec![],
        }))
        .unwrap();
        assert_eq!(
            out[1],
            json!({"$match": {"$expr": {"$eq": ["$v", "$__extremum"]}}})
        );
    }
}
