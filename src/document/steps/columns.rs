//! Column-level steps: projection, renaming and per-value transforms.

use serde_json::{json, Value as JsonValue};

use crate::document::expr::{field, literal, object, object_of};
use crate::document::Stage;
use crate::error::{StepError, StepResult};
use crate::step::{
    ColumnStep, ColumnsStep, ConcatenateStep, ConvertStep, ConvertType, DuplicateStep,
    FillnaStep, RenameStep, ReplaceStep, SplitStep, TextStep,
};

const SPLIT_PARTS: &str = "__split";

fn add_fields<I, K>(entries: I) -> Stage
where
    I: IntoIterator<Item = (K, JsonValue)>,
    K: Into<String>,
{
    object("$addFields", object_of(entries))
}

fn unset(columns: Vec<String>) -> Stage {
    json!({ "$unset": columns })
}

fn non_empty(columns: &[String], step: &str) -> StepResult<()> {
    if columns.is_empty() {
        return Err(StepError::invalid(format!(
            "{} needs at least one column",
            step
        )));
    }
    Ok(())
}

pub fn select(step: &ColumnsStep) -> StepResult<Vec<Stage>> {
    non_empty(&step.columns, "select")?;
    let mut projection = vec![("_id".to_string(), json!(0))];
    projection.extend(step.columns.iter().map(|c| (c.clone(), json!(1))));
    Ok(vec![object("$project", object_of(projection))])
}

pub fn delete(step: &ColumnsStep) -> StepResult<Vec<Stage>> {
    non_empty(&step.columns, "delete")?;
    Ok(vec![unset(step.columns.clone())])
}

pub fn rename(step: &RenameStep) -> StepResult<Vec<Stage>> {
    if step.to_rename.is_empty() {
        return Err(StepError::invalid("rename needs at least one pair"));
    }
    for (i, (_, new)) in step.to_rename.iter().enumerate() {
        if step.to_rename[..i]
            .iter()
            .any(|(_, other)| other.eq_ignore_ascii_case(new))
        {
            return Err(StepError::invalid(format!(
                "rename produces '{}' twice",
                new
            )));
        }
    }
    let copies = add_fields(step.to_rename.iter().map(|(old, new)| (new.clone(), field(old))));
    let removed: Vec<String> = step
        .to_rename
        .iter()
        .filter(|(old, _)| !step.to_rename.iter().any(|(_, new)| new == old))
        .map(|(old, _)| old.clone())
        .collect();
    let mut stages = vec![copies];
    if !removed.is_empty() {
        stages.push(unset(removed));
    }
    Ok(stages)
}

pub fn duplicate(step: &DuplicateStep) -> StepResult<Vec<Stage>> {
    Ok(vec![add_fields([(
        step.new_column_name.clone(),
        field(&step.column),
    )])])
}

pub fn text(step: &TextStep) -> StepResult<Vec<Stage>> {
    Ok(vec![add_fields([(
        step.new_column.clone(),
        literal(&JsonValue::String(step.text.clone())),
    )])])
}

pub fn fillna(step: &FillnaStep) -> StepResult<Vec<Stage>> {
    non_empty(&step.columns, "fillna")?;
    Ok(vec![add_fields(step.columns.iter().map(|c| {
        (
            c.clone(),
            json!({ "$ifNull": [field(c), literal(&step.value)] }),
        )
    }))])
}

pub fn replace(step: &ReplaceStep) -> StepResult<Vec<Stage>> {
    if step.to_replace.is_empty() {
        return Err(StepError::invalid("replace needs at least one pair"));
    }
    let column = &step.search_column;
    let branches: Vec<JsonValue> = step
        .to_replace
        .iter()
        .map(|(old, new)| {
            json!({
                "case": { "$eq": [field(column), literal(old)] },
                "then": literal(new)
            })
        })
        .collect();
    Ok(vec![add_fields([(
        column.clone(),
        json!({ "$switch": { "branches": branches, "default": field(column) } }),
    )])])
}

pub fn change_case(step: &ColumnStep, operator: &str) -> StepResult<Vec<Stage>> {
    Ok(vec![add_fields([(
        step.column.clone(),
        object(operator, field(&step.column)),
    )])])
}

pub fn convert(step: &ConvertStep) -> StepResult<Vec<Stage>> {
    non_empty(&step.columns, "convert")?;
    let target = match step.data_type {
        ConvertType::Integer => "int",
        ConvertType::Float => "double",
        ConvertType::Text => "string",
        ConvertType::Date => "date",
        ConvertType::Boolean => "bool",
    };
    Ok(vec![add_fields(step.columns.iter().map(|c| {
        (
            c.clone(),
            json!({
                "$convert": { "input": field(c), "to": target, "onError": null, "onNull": null }
            }),
        )
    }))])
}

pub fn concatenate(step: &ConcatenateStep) -> StepResult<Vec<Stage>> {
    non_empty(&step.columns, "concatenate")?;
    let mut parts = Vec::with_capacity(step.columns.len() * 2);
    for (i, column) in step.columns.iter().enumerate() {
        if i > 0 && !step.separator.is_empty() {
            parts.push(literal(&JsonValue::String(step.separator.clone())));
        }
        parts.push(json!({ "$toString": field(column) }));
    }
    Ok(vec![add_fields([(
        step.new_column_name.clone(),
        json!({ "$concat": parts }),
    )])])
}

pub fn split(step: &SplitStep) -> StepResult<Vec<Stage>> {
    if step.number_cols_to_keep == 0 {
        return Err(StepError::invalid("split must keep at least one column"));
    }
    if step.delimiter.is_empty() {
        return Err(StepError::invalid("split needs a non-empty delimiter"));
    }
    let parts = add_fields([(
        SPLIT_PARTS,
        json!({ "$split": [field(&step.column), step.delimiter] }),
    )]);
    let columns = add_fields(step.output_columns().into_iter().enumerate().map(|(i, name)| {
        (
            name,
            json!({ "$arrayElemAt": [field(SPLIT_PARTS), i] }),
        )
    }));
    Ok(vec![parts, columns, unset(vec![SPLIT_PARTS.to_string()])])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::steps::test_support::stages;
    use crate::step::Step;

    #[test]
    fn test_rename_copies_then_unsets() {
        let out = stages(Step::Rename(RenameStep {
            to_rename: vec![("a".into(), "b".into()), ("c".into(), "d".into())],
        }))
        .unwrap();
        assert_eq!(
            out,
            vec![
                json!({"$addFields": {"b": "$a", "d": "$c"}}),
                json!({"$unset": ["a", "c"]}),
            ]
        );
    }

    #[test]
    fn test_rename_swap_keeps_both_fields() {
        let out = stages(Step::Rename(RenameStep {
            to_rename: vec![("a".into(), "b".into()), ("b".into(), "a".into())],
        }))
        .unwrap();
        assert_eq!(out, vec![json!({"$addFields": {"b": "$a", "a": "$b"}})]);
    }

    #[test]
    fn test_replace_builds_switch() {
        let out = stages(Step::Replace(ReplaceStep {
            search_column: "country".into(),
            to_replace: vec![(json!("FR"), json!("France"))],
        }))
        .unwrap();
        assert_eq!(
            out,
            vec![json!({"$addFields": {"country": {"$switch": {
                "branches": [{"case": {"$eq": ["$country", {"$literal": "FR"}]}, "then": {"$literal": "France"}}],
                "default": "$country"
            }}}})]
        );
    }

    #[test]
    fn test_text_is_literal() {
        let out = stages(Step::Text(TextStep {
            new_column: "note".into(),
            text: "$not_a_field".into(),
        }))
        .unwrap();
        assert_eq!(
            out,
            vec![json!({"$addFields": {"note": {"$literal": "$not_a_field"}}})]
        );
    }

    #[test]
    fn test_concatenate_with_separator() {
        let out = stages(Step::Concatenate(ConcatenateStep {
            columns: vec!["a".into(), "b".into()],
            separator: "-".into(),
            new_column_name: "ab".into(),
        }))
        .unwrap();
        assert_eq!(
            out,
            vec![json!({"$addFields": {"ab": {"$concat": [
                {"$toString": "$a"}, {"$literal": "-"}, {"$toString": "$b"}
            ]}}})]
        );
    }

    #[test]
    fn test_split_uses_temporary_field() {
        let out = stages(Step::Split(SplitStep {
            column: "code".into(),
            delimiter: "-".into(),
            number_cols_to_keep: 2,
        }))
        .unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(
            out[1],
            json!({"$addFields": {
                "code_1": {"$arrayElemAt": ["$__split", 0]},
                "code_2": {"$arrayElemAt": ["$__split", 1]}
            }})
        );
        assert_eq!(out[2], json!({"$unset": ["__split"]}));
    }

    #[test]
    fn test_convert_never_fails_on_bad_values() {
        let out = stages(Step::Convert(ConvertStep {
            columns: vec!["n".into()],
            data_type: ConvertType::Integer,
        }))
        .unwrap();
        assert_eq!(
            out,
            vec![json!({"$addFields": {"n": {"$convert": {
                "input": "$n", "to": "int", "onError": null, "onNull": null
            }}}})]
        );
    }

    #[test]
    fn test_split_rejects_zero_columns() {
        let err = stages(Step::Split(SplitStep {
            column: "code".into(),
            delimiter: "-".into(),
            number_cols_to_keep: 0,
        }))
        .unwrap_err();
        assert!(matches!(err.source, StepError::InvalidStep(_)));
    }
}
