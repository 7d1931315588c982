//! `append` and `join`: steps reading nested pipelines.
//!
//! Nested pipelines are translated with the same orchestrator under a
//! `NESTED_<n>_` prefix; their CTEs are emitted before the step's own CTE
//! and their final schema is registered in the tracker under the name of
//! their last CTE.

use tracing::warn;

use crate::error::{SchemaError, StepError, StepResult};
use crate::relational::context::{NestedPipeline, RowOrder, StepContext, StepOutput};
use crate::relational::metadata::{ColumnMetadata, SchemaDelta};
use crate::sql::{col, lit_null, table_col, Cte, ExprExt, Query, SelectExpr, TableRef};
use crate::step::{AppendStep, JoinKind, JoinStep};

pub fn append(step: &AppendStep, ctx: &StepContext) -> StepResult<StepOutput> {
    if step.pipelines.is_empty() {
        return Err(StepError::invalid("append needs at least one pipeline"));
    }
    let nested = step
        .pipelines
        .iter()
        .map(|p| ctx.translate_nested(&p.steps()))
        .collect::<StepResult<Vec<NestedPipeline>>>()?;

    // Union of the column lists, first appearance wins.
    let mut columns: Vec<ColumnMetadata> = ctx.output_columns().into_iter().cloned().collect();
    for pipeline in &nested {
        for column in pipeline.schema.columns() {
            match columns.iter().find(|c| c.is(&column.name)) {
                Some(existing) if existing.sql_type != column.sql_type => {
                    warn!(
                        column = %column.name,
                        left = %existing.sql_type,
                        right = %column.sql_type,
                        "appended column types differ"
                    );
                }
                Some(_) => {}
                None => columns.push(ColumnMetadata {
                    alias: None,
                    ..column.clone()
                }),
            }
        }
    }

    let branch = |source: TableRef, has: &dyn Fn(&str) -> bool| -> Query {
        let select: Vec<SelectExpr> = columns
            .iter()
            .map(|c| {
                if has(&c.name) {
                    col(&c.name).into()
                } else {
                    lit_null().alias(&c.name)
                }
            })
            .collect();
        Query::new().select(select).from(source)
    };

    let mut branches = vec![branch(ctx.previous_ref()?, &|name| ctx.has_column(name))];
    let mut ctes = Vec::new();
    let mut delta = SchemaDelta::new();
    for pipeline in nested {
        branches.push(branch(TableRef::new(&pipeline.name), &|name| {
            pipeline.schema.column(name).is_some()
        }));
        delta = delta.register(&pipeline.name, pipeline.schema.clone());
        ctes.extend(pipeline.ctes);
    }
    ctes.push(Cte::new(&ctx.name, Query::union_all(branches)));

    Ok(StepOutput::with_ctes(ctes, delta.replace_all(columns)).ordered(RowOrder::Clear))
}

const LEFT: &str = "l";
const RIGHT: &str = "r";

pub fn join(step: &JoinStep, ctx: &StepContext) -> StepResult<StepOutput> {
    if step.on.is_empty() {
        return Err(StepError::invalid("join needs at least one key pair"));
    }
    let right = ctx.translate_nested(&step.right_pipeline.steps())?;

    let mut keys = Vec::with_capacity(step.on.len());
    for (left_key, right_key) in &step.on {
        let left_column = ctx.column(left_key)?.name.clone();
        let right_column = right
            .schema
            .column(right_key)
            .ok_or_else(|| SchemaError::UnknownColumn {
                table: right.name.clone(),
                column: right_key.clone(),
            })?
            .name
            .clone();
        keys.push((left_column, right_column));
    }
    let condition = keys
        .iter()
        .map(|(l, r)| table_col(LEFT, l).eq(table_col(RIGHT, r)))
        .reduce(|a, b| a.and(b))
        .ok_or_else(|| StepError::invalid("join needs at least one key pair"))?;

    let previous = TableRef::new(ctx.previous()?).with_alias(LEFT);
    let right_ref = TableRef::new(&right.name).with_alias(RIGHT);
    let left_columns = ctx.output_columns();

    let (query, columns) = match step.join_type {
        JoinKind::LeftOuter => {
            // Anti-join: left rows without a match.
            let select: Vec<SelectExpr> = left_columns
                .iter()
                .map(|c| table_col(LEFT, &c.name).into())
                .collect();
            let unmatched = table_col(RIGHT, &keys[0].1).is_null();
            let query = Query::new()
                .select(select)
                .from(previous)
                .left_join(right_ref, condition)
                .filter(unmatched);
            let columns = left_columns.into_iter().cloned().collect();
            (query, columns)
        }
        JoinKind::Left | JoinKind::Inner => {
            let (select, columns) = joined_columns(&left_columns, &right, &keys);
            let query = Query::new().select(select).from(previous);
            let query = if step.join_type == JoinKind::Left {
                query.left_join(right_ref, condition)
            } else {
                query.inner_join(right_ref, condition)
            };
            (query, columns)
        }
    };

    let delta = SchemaDelta::new()
        .register(&right.name, right.schema.clone())
        .replace_all(columns);
    let mut ctes = right.ctes;
    ctes.push(Cte::new(&ctx.name, query));
    Ok(StepOutput::with_ctes(ctes, delta).ordered(RowOrder::Clear))
}

/// Output of a left or inner join.
///
/// A right key named like its left key is dropped. Other columns present on
/// both sides are suffixed `_LEFT` / `_RIGHT`, with a number appended while
/// the suffixed name is still taken.
fn joined_columns(
    left: &[&ColumnMetadata],
    right: &NestedPipeline,
    keys: &[(String, String)],
) -> (Vec<SelectExpr>, Vec<ColumnMetadata>) {
    let right_columns: Vec<&ColumnMetadata> = right
        .schema
        .columns()
        .filter(|c| {
            !keys
                .iter()
                .any(|(l, r)| c.is(r) && l.eq_ignore_ascii_case(r))
        })
        .collect();
    let clashes = |name: &str| {
        left.iter().any(|c| c.is(name)) && right_columns.iter().any(|c| c.is(name))
    };

    let mut taken: Vec<String> = left
        .iter()
        .chain(right_columns.iter())
        .map(|c| c.name.to_uppercase())
        .collect();
    let mut unique = |base: String| -> String {
        let mut candidate = base.clone();
        let mut n = 0;
        while taken.contains(&candidate.to_uppercase()) {
            n += 1;
            candidate = format!("{}_{}", base, n);
        }
        taken.push(candidate.to_uppercase());
        candidate
    };

    let mut select = Vec::new();
    let mut columns = Vec::new();
    for column in left {
        let name = if clashes(&column.name) {
            unique(format!("{}_LEFT", column.name))
        } else {
            column.name.clone()
        };
        select.push(table_col(LEFT, &column.name).alias(&name));
        columns.push(ColumnMetadata {
            name,
            alias: None,
            ..(*column).clone()
        });
    }
    for column in right_columns.iter().copied() {
        let name = if clashes(&column.name) {
            unique(format!("{}_RIGHT", column.name))
        } else {
            column.name.clone()
        };
        select.push(table_col(RIGHT, &column.name).alias(&name));
        let mut joined = ColumnMetadata {
            name: name.clone(),
            ..column.clone()
        };
        if !name.eq(&column.name) {
            joined = joined.with_alias(&column.name);
        }
        columns.push(joined);
    }
    (select, columns)
}
