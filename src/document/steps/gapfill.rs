//! `addmissingdates` as aggregation stages.
//!
//! Documents are grouped with their bucket bounds, the full calendar between
//! the bounds is generated with `$range` + `$map`, and every calendar bucket
//! no document falls into becomes a synthetic document holding only the
//! group values and the bucket date.

use serde_json::{json, Value as JsonValue};

use crate::document::expr::{field, group_id, group_key, object, object_of, sort_spec};
use crate::document::{DocumentDates, Stage};
use crate::error::{StepError, StepResult};
use crate::step::{AddMissingDatesStep, SortOrder};

use super::contains;

const BUCKET: &str = "__bucket";
const ROWS: &str = "__rows";
const MIN: &str = "__min_bucket";
const MAX: &str = "__max_bucket";
const CALENDAR: &str = "__calendar";
const MISSING: &str = "__missing";
const ALL: &str = "__all";

pub fn add_missing_dates(step: &AddMissingDatesStep) -> StepResult<Vec<Stage>> {
    let date = &step.dates_column;
    if contains(&step.groups, date) {
        return Err(StepError::invalid(
            "the date column cannot also be a group column",
        ));
    }
    let granularity = step.dates_granularity;
    let dates = DocumentDates;

    let bounds = object(
        "$group",
        object_of([
            ("_id", group_id(&step.groups)),
            (ROWS, json!({ "$push": "$$ROOT" })),
            (MIN, json!({ "$min": field(BUCKET) })),
            (MAX, json!({ "$max": field(BUCKET) })),
        ]),
    );

    // Groups whose dates are all null have no bounds and no calendar.
    let span = json!({ "$add": [dates.buckets_between(&field(MIN), &field(MAX), granularity), 1] });
    let calendar = json!({
        "$cond": [
            { "$eq": [{ "$ifNull": [field(MIN), null] }, null] },
            [],
            {
                "$map": {
                    "input": { "$range": [0, span] },
                    "as": "offset",
                    "in": dates.shift(&field(MIN), json!("$$offset"), granularity)
                }
            }
        ]
    });
    let missing = json!({
        "$filter": {
            "input": field(CALENDAR),
            "as": "bucket",
            "cond": { "$not": [{ "$in": ["$$bucket", format!("${}.{}", ROWS, BUCKET)] }] }
        }
    });

    let mut synthetic: Vec<(String, JsonValue)> = step
        .groups
        .iter()
        .map(|g| (g.clone(), group_key(g)))
        .collect();
    synthetic.push((date.clone(), json!("$$bucket")));
    let synthetic_rows = json!({
        "$map": { "input": field(MISSING), "as": "bucket", "in": object_of(synthetic) }
    });

    let mut order: Vec<(&str, SortOrder)> =
        step.groups.iter().map(|g| (g.as_str(), SortOrder::Asc)).collect();
    order.push((date.as_str(), SortOrder::Asc));

    Ok(vec![
        object("$addFields", object(BUCKET, dates.bucket(&field(date), granularity))),
        bounds,
        object("$addFields", object(CALENDAR, calendar)),
        object("$addFields", object(MISSING, missing)),
        json!({ "$project": { ALL: { "$concatArrays": [field(ROWS), synthetic_rows] } } }),
        json!({ "$unwind": field(ALL) }),
        json!({ "$replaceRoot": { "newRoot": field(ALL) } }),
        json!({ "$unset": [BUCKET] }),
        object("$sort", sort_spec(order)),
    ])
}
