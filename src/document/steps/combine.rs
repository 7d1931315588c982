//! `append` (`$unionWith`) and `join` (`$lookup`).
//!
//! Nested pipelines are compiled with the same translator and run against
//! the collection named in the settings; each starts with its own `domain`
//! stage. Documents are merged without renaming: on a field clash the left
//! document wins.

use serde_json::{json, Value as JsonValue};

use crate::document::expr::{field, object, object_of};
use crate::document::{Stage, StageContext};
use crate::error::{StepError, StepResult};
use crate::step::{AppendStep, JoinKind, JoinStep};

const JOINED: &str = "__joined";

pub fn append(step: &AppendStep, ctx: &StageContext) -> StepResult<Vec<Stage>> {
    if step.pipelines.is_empty() {
        return Err(StepError::invalid("append needs at least one pipeline"));
    }
    step.pipelines
        .iter()
        .map(|pipeline| -> StepResult<Stage> {
            let stages = ctx.translate_nested(&pipeline.steps())?;
            Ok(json!({
                "$unionWith": { "coll": ctx.settings.collection, "pipeline": stages }
            }))
        })
        .collect()
}

pub fn join(step: &JoinStep, ctx: &StageContext) -> StepResult<Vec<Stage>> {
    if step.on.is_empty() {
        return Err(StepError::invalid("join needs at least one key pair"));
    }
    // `$lookup` variables must start with a lowercase letter.
    let variables = object_of(
        step.on
            .iter()
            .enumerate()
            .map(|(i, (left, _))| (format!("key{}", i), field(left))),
    );
    let matches: Vec<JsonValue> = step
        .on
        .iter()
        .enumerate()
        .map(|(i, (_, right))| json!({ "$eq": [field(right), format!("$$key{}", i)] }))
        .collect();

    let mut right = ctx.translate_nested(&step.right_pipeline.steps())?;
    right.push(json!({ "$match": { "$expr": { "$and": matches } } }));
    if step.join_type == JoinKind::LeftOuter {
        // Only existence matters for the anti-join.
        right.push(json!({ "$limit": 1 }));
    }

    let lookup = object(
        "$lookup",
        object_of([
            ("from", JsonValue::String(ctx.settings.collection.clone())),
            ("let", variables),
            ("pipeline", JsonValue::Array(right)),
            ("as", JsonValue::String(JOINED.to_string())),
        ]),
    );

    let merged = json!({
        "$replaceRoot": { "newRoot": { "$mergeObjects": [field(JOINED), "$$ROOT"] } }
    });
    let cleanup = json!({ "$unset": [JOINED] });
    Ok(match step.join_type {
        JoinKind::Left => vec![
            lookup,
            json!({ "$unwind": { "path": field(JOINED), "preserveNullAndEmptyArrays": true } }),
            merged,
            cleanup,
        ],
        JoinKind::Inner => vec![lookup, json!({ "$unwind": field(JOINED) }), merged, cleanup],
        JoinKind::LeftOuter => vec![
            lookup,
            json!({ "$match": { JOINED: { "$eq": [] } } }),
            cleanup,
        ],
    })
}
