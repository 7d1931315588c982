//! `pivot` and `unpivot`.

use serde_json::{json, Value as JsonValue};

use crate::document::expr::{accumulator, field, finalize, group_key, object, object_of};
use crate::document::Stage;
use crate::error::{StepError, StepResult};
use crate::step::{PivotStep, UnpivotStep};

use super::contains;

const PIVOTED: &str = "__pivoted";
const VALUE: &str = "__value";
const PAIRS: &str = "__pairs";
const UNPIVOTED: &str = "__unpivoted";

/// Pivoted values become field names, so the set of output fields is only
/// known once the data is read; no value enumeration is needed up front.
pub fn pivot(step: &PivotStep) -> StepResult<Vec<Stage>> {
    if contains(&step.index, &step.column_to_pivot) || contains(&step.index, &step.value_column) {
        return Err(StepError::invalid(
            "pivot index must not contain the pivoted or value column",
        ));
    }
    let mut first_id = Vec::new();
    for column in &step.index {
        first_id.push((column.clone(), field(column)));
    }
    first_id.push((PIVOTED.to_string(), field(&step.column_to_pivot)));

    let index_id = if step.index.is_empty() {
        JsonValue::Null
    } else {
        object_of(step.index.iter().map(|c| (c.clone(), group_key(c))))
    };
    let pair = json!({
        "k": { "$toString": format!("$_id.{}", PIVOTED) },
        "v": finalize(step.agg_function, VALUE)
    });

    Ok(vec![
        json!({ "$match": object(&step.column_to_pivot, json!({ "$ne": null })) }),
        object(
            "$group",
            object_of([
                ("_id", object_of(first_id)),
                (VALUE, accumulator(step.agg_function, &step.value_column)),
            ]),
        ),
        object(
            "$group",
            object_of([
                ("_id", index_id),
                (PAIRS, json!({ "$push": pair })),
            ]),
        ),
        json!({
            "$replaceRoot": {
                "newRoot": {
                    "$mergeObjects": [
                        { "$ifNull": ["$_id", {}] },
                        { "$arrayToObject": field(PAIRS) }
                    ]
                }
            }
        }),
    ])
}

pub fn unpivot(step: &UnpivotStep) -> StepResult<Vec<Stage>> {
    if step.unpivot.is_empty() {
        return Err(StepError::invalid("unpivot needs at least one column"));
    }
    let (name_col, value_col) = (&step.unpivot_column_name, &step.value_column_name);
    if name_col.eq_ignore_ascii_case(value_col)
        || contains(&step.keep, name_col)
        || contains(&step.keep, value_col)
    {
        return Err(StepError::invalid(
            "unpivot output columns must be distinct from each other and from kept columns",
        ));
    }
    if step.unpivot.iter().any(|u| contains(&step.keep, u)) {
        return Err(StepError::invalid("a column cannot be both kept and unpivoted"));
    }

    // Missing fields become explicit nulls so `dropna: false` keeps them.
    let entries = object_of(
        step.unpivot
            .iter()
            .map(|c| (c.clone(), json!({ "$ifNull": [field(c), null] }))),
    );
    let mut first = vec![("_id".to_string(), json!(0))];
    first.extend(step.keep.iter().map(|k| (k.clone(), json!(1))));
    first.push((UNPIVOTED.to_string(), json!({ "$objectToArray": entries })));

    let mut second = vec![("_id".to_string(), json!(0))];
    second.extend(step.keep.iter().map(|k| (k.clone(), json!(1))));
    second.push((name_col.clone(), JsonValue::String(format!("${}.k", UNPIVOTED))));
    second.push((value_col.clone(), JsonValue::String(format!("${}.v", UNPIVOTED))));

    let mut stages = vec![
        object("$project", object_of(first)),
        json!({ "$unwind": field(UNPIVOTED) }),
        object("$project", object_of(second)),
    ];
    if step.dropna {
        stages.push(object("$match", object(value_col, json!({ "$ne": null }))));
    }
    Ok(stages)
}
