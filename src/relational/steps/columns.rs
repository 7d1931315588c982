//! Column-level steps: projection, renaming and per-value rewrites.

use serde_json::Value as JsonValue;

use crate::error::{SchemaError, StepError, StepResult};
use crate::relational::context::{StepContext, StepOutput};
use crate::relational::metadata::{SchemaDelta, CURRENT_TABLE};
use crate::sql::dialect::capabilities::SplitStrategy;
use crate::sql::expr::raw_sql;
use crate::sql::{col, func, lit_int, lit_json, lit_str, Cte, DataType, Expr, ExprExt, Query, SelectExpr};
use crate::step::{
    ColumnStep, ColumnsStep, ConcatenateStep, ConvertStep, ConvertType, DuplicateStep, FillnaStep,
    RenameStep, ReplaceStep, SplitStep, TextStep,
};

use super::{contains, tracked};

pub fn select(step: &ColumnsStep, ctx: &StepContext) -> StepResult<StepOutput> {
    if step.columns.is_empty() {
        return Err(StepError::invalid("select needs at least one column"));
    }
    let mut columns = tracked(ctx, &step.columns)?;
    for hidden in ctx.hidden_columns() {
        if !columns.iter().any(|c| c.is(&hidden.name)) {
            columns.push(hidden.clone());
        }
    }
    let select: Vec<SelectExpr> = columns.iter().map(|c| col(&c.name).into()).collect();
    let query = Query::new().select(select).from(ctx.previous_ref()?);
    let names = columns.into_iter().map(|c| c.name).collect();
    Ok(StepOutput::new(
        Cte::new(&ctx.name, query),
        SchemaDelta::new().keep(names),
    ))
}

pub fn delete(step: &ColumnsStep, ctx: &StepContext) -> StepResult<StepOutput> {
    ctx.require_columns(step.columns.iter().map(String::as_str))?;
    let remaining: Vec<SelectExpr> = ctx
        .columns()
        .into_iter()
        .filter(|c| !contains(&step.columns, &c.name))
        .map(|c| col(&c.name).into())
        .collect();
    if ctx
        .output_columns()
        .iter()
        .all(|c| contains(&step.columns, &c.name))
    {
        return Err(StepError::invalid("delete would remove every column"));
    }
    let query = Query::new().select(remaining).from(ctx.previous_ref()?);
    let delta = step
        .columns
        .iter()
        .fold(SchemaDelta::new(), |delta, c| delta.drop(c));
    Ok(StepOutput::new(Cte::new(&ctx.name, query), delta))
}

pub fn rename(step: &RenameStep, ctx: &StepContext) -> StepResult<StepOutput> {
    // (name in the previous CTE, name after the renames so far)
    let mut names: Vec<(String, String)> = ctx
        .columns()
        .into_iter()
        .map(|c| (c.name.clone(), c.name.clone()))
        .collect();
    let mut delta = SchemaDelta::new();
    for (from, to) in &step.to_rename {
        let pos = names
            .iter()
            .position(|(_, current)| current.eq_ignore_ascii_case(from))
            .ok_or_else(|| SchemaError::UnknownColumn {
                table: CURRENT_TABLE.to_string(),
                column: from.clone(),
            })?;
        let clash = names
            .iter()
            .any(|(_, current)| current.eq_ignore_ascii_case(to));
        if clash && !from.eq_ignore_ascii_case(to) {
            return Err(SchemaError::DuplicateColumn {
                table: CURRENT_TABLE.to_string(),
                column: to.clone(),
            }
            .into());
        }
        names[pos].1 = to.clone();
        // Replayed in order by the tracker, so `from` is the name at this
        // point of the sequence.
        delta = delta.rename(from, to);
    }

    let select: Vec<SelectExpr> = names
        .iter()
        .map(|(source, name)| {
            if source == name {
                col(source).into()
            } else {
                col(source).alias(name)
            }
        })
        .collect();
    let query = Query::new().select(select).from(ctx.previous_ref()?);
    Ok(StepOutput::new(Cte::new(&ctx.name, query), delta))
}

pub fn duplicate(step: &DuplicateStep, ctx: &StepContext) -> StepResult<StepOutput> {
    let source = ctx.column(&step.column)?;
    ctx.require_absent(&step.new_column_name)?;
    let query = ctx.project(|_| None, vec![col(&source.name).alias(&step.new_column_name)])?;
    Ok(StepOutput::new(
        Cte::new(&ctx.name, query),
        SchemaDelta::new().add(&step.new_column_name, source.sql_type.clone()),
    ))
}

pub fn text(step: &TextStep, ctx: &StepContext) -> StepResult<StepOutput> {
    let value = lit_str(&step.text);
    if ctx.has_column(&step.new_column) {
        let query = ctx.project(
            |c| c.is(&step.new_column).then(|| value.clone()),
            vec![],
        )?;
        return Ok(StepOutput::new(
            Cte::new(&ctx.name, query),
            SchemaDelta::new().retype(&step.new_column, DataType::String),
        ));
    }
    let query = ctx.project(|_| None, vec![value.alias(&step.new_column)])?;
    Ok(StepOutput::new(
        Cte::new(&ctx.name, query),
        SchemaDelta::new().add(&step.new_column, DataType::String),
    ))
}

pub fn fillna(step: &FillnaStep, ctx: &StepContext) -> StepResult<StepOutput> {
    for name in &step.columns {
        let column = ctx.column(name)?;
        check_value_type(&column.name, &column.sql_type, &step.value)?;
    }
    let replacement = lit_json(&step.value);
    let query = ctx.project(
        |c| {
            contains(&step.columns, &c.name)
                .then(|| func("COALESCE", vec![col(&c.name), replacement.clone()]))
        },
        vec![],
    )?;
    Ok(StepOutput::new(Cte::new(&ctx.name, query), SchemaDelta::new()))
}

pub fn replace(step: &ReplaceStep, ctx: &StepContext) -> StepResult<StepOutput> {
    let column = ctx.column(&step.search_column)?;
    if step.to_replace.is_empty() {
        return Err(StepError::invalid("replace needs at least one value pair"));
    }
    for (old, new) in &step.to_replace {
        check_value_type(&column.name, &column.sql_type, old)?;
        check_value_type(&column.name, &column.sql_type, new)?;
    }
    let case = Expr::Case {
        operand: Some(Box::new(col(&column.name))),
        when_clauses: step
            .to_replace
            .iter()
            .map(|(old, new)| (lit_json(old), lit_json(new)))
            .collect(),
        else_clause: Some(Box::new(col(&column.name))),
    };
    let query = ctx.project(|c| c.is(&column.name).then(|| case.clone()), vec![])?;
    Ok(StepOutput::new(Cte::new(&ctx.name, query), SchemaDelta::new()))
}

pub fn change_case(step: &ColumnStep, function: &str, ctx: &StepContext) -> StepResult<StepOutput> {
    let column = ctx.column(&step.column)?;
    if !column.sql_type.is_string() && !matches!(column.sql_type, DataType::Other(_)) {
        return Err(StepError::Type(format!(
            "{} needs a text column, '{}' is {}",
            function.to_lowercase(),
            column.name,
            column.sql_type
        )));
    }
    let query = ctx.project(
        |c| c.is(&column.name).then(|| func(function, vec![col(&c.name)])),
        vec![],
    )?;
    Ok(StepOutput::new(Cte::new(&ctx.name, query), SchemaDelta::new()))
}

pub fn convert(step: &ConvertStep, ctx: &StepContext) -> StepResult<StepOutput> {
    ctx.require_columns(step.columns.iter().map(String::as_str))?;
    let casts = ctx.caps().casts;
    let type_name = match step.data_type {
        ConvertType::Integer => casts.integer,
        ConvertType::Float => casts.float,
        ConvertType::Text => casts.text,
        ConvertType::Date => casts.date,
        ConvertType::Boolean => casts.boolean,
    };
    let query = ctx.project(
        |c| contains(&step.columns, &c.name).then(|| col(&c.name).cast(type_name)),
        vec![],
    )?;
    let target = DataType::for_conversion(step.data_type);
    let delta = step
        .columns
        .iter()
        .fold(SchemaDelta::new(), |delta, c| delta.retype(c, target.clone()));
    Ok(StepOutput::new(Cte::new(&ctx.name, query), delta))
}

pub fn concatenate(step: &ConcatenateStep, ctx: &StepContext) -> StepResult<StepOutput> {
    if step.columns.is_empty() {
        return Err(StepError::invalid("concatenate needs at least one column"));
    }
    ctx.require_absent(&step.new_column_name)?;
    let text = ctx.caps().casts.text;
    let mut parts = Vec::with_capacity(step.columns.len() * 2);
    for (i, name) in step.columns.iter().enumerate() {
        let column = ctx.column(name)?;
        if i > 0 && !step.separator.is_empty() {
            parts.push(lit_str(&step.separator));
        }
        parts.push(if column.sql_type.is_string() {
            col(&column.name)
        } else {
            col(&column.name).cast(text)
        });
    }
    let concatenated = parts
        .into_iter()
        .reduce(|acc, part| acc.concat(part))
        .ok_or_else(|| StepError::invalid("concatenate needs at least one column"))?;

    let query = ctx.project(|_| None, vec![concatenated.alias(&step.new_column_name)])?;
    Ok(StepOutput::new(
        Cte::new(&ctx.name, query),
        SchemaDelta::new().add(&step.new_column_name, DataType::String),
    ))
}

pub fn split(step: &SplitStep, ctx: &StepContext) -> StepResult<StepOutput> {
    let strategy = ctx.caps().split.ok_or(StepError::MissingCapability {
        feature: "split",
        dialect: ctx.dialect.name(),
    })?;
    if step.number_cols_to_keep == 0 {
        return Err(StepError::invalid("split must keep at least one part"));
    }
    if step.delimiter.is_empty() {
        return Err(StepError::invalid("split delimiter is empty"));
    }
    let column = ctx.column(&step.column)?;
    let outputs = step.output_columns();
    for name in &outputs {
        ctx.require_absent(name)?;
    }

    let source = col(&column.name);
    let parts = outputs
        .iter()
        .enumerate()
        .map(|(i, name)| split_part(strategy, &source, &step.delimiter, i as i64 + 1, ctx).alias(name))
        .collect();
    let query = ctx.project(|_| None, parts)?;
    let delta = outputs
        .iter()
        .fold(SchemaDelta::new(), |delta, n| delta.add(n, DataType::String));
    Ok(StepOutput::new(Cte::new(&ctx.name, query), delta))
}

/// 1-based `n`-th part of `source` split on `delimiter`.
fn split_part(strategy: SplitStrategy, source: &Expr, delimiter: &str, n: i64, ctx: &StepContext) -> Expr {
    let dialect = ctx.dialect;
    match strategy {
        SplitStrategy::SplitPart => func(
            "SPLIT_PART",
            vec![source.clone(), lit_str(delimiter), lit_int(n)],
        ),
        SplitStrategy::SafeOffset => raw_sql(&format!(
            "SPLIT({}, {})[SAFE_OFFSET({})]",
            source.to_sql(dialect),
            lit_str(delimiter).to_sql(dialect),
            n - 1
        )),
        SplitStrategy::ElementAt => func(
            "ELEMENT_AT",
            vec![
                func(
                    "SPLIT",
                    // Spark unescapes backslashes in literals.
                    vec![
                        source.clone(),
                        lit_str(&regex::escape(delimiter).replace('\\', "\\\\")),
                    ],
                ),
                lit_int(n),
            ],
        ),
    }
}

/// Reject literal values a column of `sql_type` cannot hold.
fn check_value_type(column: &str, sql_type: &DataType, value: &JsonValue) -> StepResult<()> {
    let compatible = match value {
        JsonValue::Null => true,
        JsonValue::String(_) => !sql_type.is_numeric() && *sql_type != DataType::Bool,
        JsonValue::Number(_) => !sql_type.is_string(),
        JsonValue::Bool(_) => !sql_type.is_numeric() && !sql_type.is_string(),
        JsonValue::Array(_) | JsonValue::Object(_) => false,
    };
    if compatible {
        Ok(())
    } else {
        Err(StepError::Type(format!(
            "value {} does not fit column '{}' of type {}",
            value, column, sql_type
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relational::steps::test_support::{names, run};
    use crate::sql::Dialect;
    use crate::step::Step;
    use serde_json::json;

    const SCHEMA: &[(&str, &str)] = &[("a", "int"), ("b", "text")];

    #[test]
    fn test_rename_then_select_yields_final_schema() {
        let t = run(
            vec![
                Step::Rename(RenameStep {
                    to_rename: vec![("a".into(), "x".into())],
                }),
                Step::Select(ColumnsStep {
                    columns: vec!["b".into(), "x".into()],
                }),
            ],
            SCHEMA,
            Dialect::Postgres,
        )
        .unwrap();
        assert!(t.sql.contains("\"a\" AS \"x\""));
        assert_eq!(names(&t), vec!["b", "x"]);
        assert_eq!(t.columns[1].sql_type, DataType::Int32);
    }

    #[test]
    fn test_sequential_renames_within_one_step() {
        let t = run(
            vec![Step::Rename(RenameStep {
                to_rename: vec![("a".into(), "c".into()), ("c".into(), "d".into())],
            })],
            SCHEMA,
            Dialect::Postgres,
        )
        .unwrap();
        assert!(t.sql.contains("\"a\" AS \"d\""));
        assert_eq!(names(&t), vec!["d", "b"]);
    }

    #[test]
    fn test_rename_onto_existing_column_fails() {
        let err = run(
            vec![Step::Rename(RenameStep {
                to_rename: vec![("a".into(), "B".into())],
            })],
            SCHEMA,
            Dialect::Postgres,
        )
        .unwrap_err();
        assert_eq!(err.index, 1);
        assert!(matches!(
            err.source,
            StepError::Schema(SchemaError::DuplicateColumn { .. })
        ));
    }

    #[test]
    fn test_delete_unknown_column_fails() {
        let err = run(
            vec![Step::Delete(ColumnsStep {
                columns: vec!["zz".into()],
            })],
            SCHEMA,
            Dialect::Postgres,
        )
        .unwrap_err();
        assert_eq!(err.step, "delete");
    }

    #[test]
    fn test_fillna_type_mismatch() {
        let err = run(
            vec![Step::Fillna(FillnaStep {
                columns: vec!["a".into()],
                value: json!("zero"),
            })],
            SCHEMA,
            Dialect::Postgres,
        )
        .unwrap_err();
        assert!(matches!(err.source, StepError::Type(_)));
    }

    #[test]
    fn test_concatenate_per_dialect() {
        let step = Step::Concatenate(ConcatenateStep {
            columns: vec!["b".into(), "a".into()],
            separator: "-".into(),
            new_column_name: "ab".into(),
        });
        let pg = run(vec![step.clone()], SCHEMA, Dialect::Postgres).unwrap();
        assert!(pg.sql.contains("\"b\" || '-' || CAST(\"a\" AS TEXT) AS \"ab\""));
        let my = run(vec![step], SCHEMA, Dialect::MySql).unwrap();
        assert!(my.sql.contains("CONCAT(CONCAT(`b`, '-'), CAST(`a` AS CHAR)) AS `ab`"));
    }

    #[test]
    fn test_split_strategies() {
        let step = Step::Split(SplitStep {
            column: "b".into(),
            delimiter: ".".into(),
            number_cols_to_keep: 2,
        });
        let pg = run(vec![step.clone()], SCHEMA, Dialect::Postgres).unwrap();
        assert!(pg.sql.contains("SPLIT_PART(\"b\", '.', 2) AS \"b_2\""));
        let bq = run(vec![step.clone()], SCHEMA, Dialect::BigQuery).unwrap();
        assert!(bq.sql.contains("SPLIT(`b`, '.')[SAFE_OFFSET(1)] AS `b_2`"));
        let spark = run(vec![step.clone()], SCHEMA, Dialect::Databricks).unwrap();
        assert!(spark.sql.contains("ELEMENT_AT(SPLIT(`b`, '\\\\.'), 1)"));
        assert_eq!(names(&pg), vec!["a", "b", "b_1", "b_2"]);

        let err = run(vec![step], SCHEMA, Dialect::MySql).unwrap_err();
        assert!(matches!(err.source, StepError::MissingCapability { feature: "split", .. }));
    }
}
