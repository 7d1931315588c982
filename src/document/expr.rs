//! Small builders for aggregation expressions.

use serde_json::{json, Map, Value as JsonValue};

use crate::step::{AggFunction, SortOrder};

/// Field path of `name`: `"$name"`.
pub fn field(name: &str) -> JsonValue {
    JsonValue::String(format!("${}", name))
}

/// Path of a key inside the `_id` of a `$group` output.
pub fn group_key(name: &str) -> JsonValue {
    JsonValue::String(format!("$_id.{}", name))
}

/// A constant that is never read as a field path or projection flag.
pub fn literal(value: &JsonValue) -> JsonValue {
    json!({ "$literal": value })
}

/// Single-entry object.
pub fn object(key: &str, value: JsonValue) -> JsonValue {
    let mut map = Map::new();
    map.insert(key.to_string(), value);
    JsonValue::Object(map)
}

/// Object from ordered entries.
pub fn object_of<I, K>(entries: I) -> JsonValue
where
    I: IntoIterator<Item = (K, JsonValue)>,
    K: Into<String>,
{
    JsonValue::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
}

/// `_id` of a `$group` over `columns`; null groups everything together.
pub fn group_id(columns: &[String]) -> JsonValue {
    if columns.is_empty() {
        JsonValue::Null
    } else {
        object_of(columns.iter().map(|c| (c.as_str(), field(c))))
    }
}

/// Projection entries copying group keys back to top-level fields.
pub fn ungroup(columns: &[String]) -> Vec<(String, JsonValue)> {
    columns.iter().map(|c| (c.clone(), group_key(c))).collect()
}

/// `$group` accumulator computing `function` over `column`.
pub fn accumulator(function: AggFunction, column: &str) -> JsonValue {
    match function {
        AggFunction::Sum => json!({ "$sum": field(column) }),
        AggFunction::Avg => json!({ "$avg": field(column) }),
        // Nulls are not counted.
        AggFunction::Count => json!({
            "$sum": { "$cond": [{ "$eq": [{ "$ifNull": [field(column), null] }, null] }, 0, 1] }
        }),
        AggFunction::CountDistinct => json!({ "$addToSet": field(column) }),
        AggFunction::Min => json!({ "$min": field(column) }),
        AggFunction::Max => json!({ "$max": field(column) }),
        AggFunction::First => json!({ "$first": field(column) }),
        AggFunction::Last => json!({ "$last": field(column) }),
    }
}

/// Final value of an accumulator stored under `name`.
pub fn finalize(function: AggFunction, name: &str) -> JsonValue {
    match function {
        AggFunction::CountDistinct => json!({
            "$size": { "$filter": { "input": field(name), "cond": { "$ne": ["$$this", null] } } }
        }),
        _ => field(name),
    }
}

pub fn direction(order: SortOrder) -> i32 {
    match order {
        SortOrder::Asc => 1,
        SortOrder::Desc => -1,
    }
}

/// `$sort` specification.
pub fn sort_spec<'a, I>(keys: I) -> JsonValue
where
    I: IntoIterator<Item = (&'a str, SortOrder)>,
{
    object_of(keys.into_iter().map(|(k, o)| (k, json!(direction(o)))))
}
