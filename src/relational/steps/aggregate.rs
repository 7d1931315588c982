//! Grouping steps: aggregate, uniquegroups, totals and rollup.
//!
//! Totals and rollup are written as one `GROUP BY` per grouping level joined
//! with `UNION ALL`, which every dialect accepts.

use crate::error::{StepError, StepResult};
use crate::relational::context::{RowOrder, StepContext, StepOutput};
use crate::relational::metadata::{ColumnMetadata, SchemaDelta};
use crate::sql::expr::null_safe_eq;
use crate::sql::{
    col, lit_null, lit_str, table_col, Cte, DataType, Expr, ExprExt, Query, SelectExpr, TableRef,
};
use crate::step::{
    validate_aggregations, AggregateStep, Aggregation, RollupStep, TotalsStep, UniqueGroupsStep,
};

use super::{aggregate_expr, aggregate_type, cols, contains, tracked};

/// Output expressions and columns of an aggregation list.
fn aggregations(
    aggregations: &[Aggregation],
    ctx: &StepContext,
) -> StepResult<(Vec<SelectExpr>, Vec<ColumnMetadata>)> {
    let mut select = Vec::new();
    let mut columns = Vec::new();
    for aggregation in aggregations {
        for (source, output) in aggregation.pairs() {
            let column = ctx.column(source)?;
            let expr = aggregate_expr(aggregation.aggfunction, col(&column.name), ctx)?;
            select.push(expr.alias(output));
            columns.push(ColumnMetadata::new(
                output,
                aggregate_type(aggregation.aggfunction, &column.sql_type),
            ));
        }
    }
    Ok((select, columns))
}

pub fn aggregate(step: &AggregateStep, ctx: &StepContext) -> StepResult<StepOutput> {
    validate_aggregations(&step.aggregations, &step.on)?;
    let keys = tracked(ctx, &step.on)?;
    let (agg_select, agg_columns) = aggregations(&step.aggregations, ctx)?;
    let key_names: Vec<String> = keys.iter().map(|c| c.name.clone()).collect();

    let mut select: Vec<SelectExpr> = cols(&key_names).into_iter().map(Into::into).collect();
    select.extend(agg_select);
    let grouped = Query::new()
        .select(select)
        .from(ctx.previous_ref()?)
        .group_by(cols(&key_names));

    if !step.keep_original_granularity {
        let mut columns = keys;
        columns.extend(agg_columns);
        return Ok(
            StepOutput::new(Cte::new(&ctx.name, grouped), SchemaDelta::new().replace_all(columns))
                .ordered(RowOrder::Clear),
        );
    }

    // Join the aggregates back onto the original rows. Aggregated columns
    // replace same-named original columns.
    let agg_name = ctx.aux("AGG");
    let mut select: Vec<SelectExpr> = ctx
        .columns()
        .iter()
        .filter(|c| !agg_columns.iter().any(|a| a.is(&c.name)))
        .map(|c| table_col("src", &c.name).into())
        .collect();
    select.extend(agg_columns.iter().map(|c| table_col("agg", &c.name).into()));

    let on = key_names
        .iter()
        .map(|k| null_safe_eq(table_col("src", k), table_col("agg", k)))
        .reduce(|a, b| a.and(b));
    let from = TableRef::new(ctx.previous()?).with_alias("src");
    let agg_ref = TableRef::new(&agg_name).with_alias("agg");
    let query = match on {
        Some(on) => Query::new().select(select).from(from).inner_join(agg_ref, on),
        None => Query::new().select(select).from(from).cross_join(agg_ref),
    };

    let mut delta = SchemaDelta::new();
    for column in &agg_columns {
        if ctx.has_column(&column.name) {
            delta = delta.drop(&column.name);
        }
    }
    for column in agg_columns {
        delta = delta.add(&column.name, column.sql_type);
    }

    Ok(StepOutput::with_ctes(
        vec![Cte::new(&agg_name, grouped), Cte::new(&ctx.name, query)],
        delta,
    )
    .ordered(RowOrder::Clear))
}

pub fn unique_groups(step: &UniqueGroupsStep, ctx: &StepContext) -> StepResult<StepOutput> {
    if step.on.is_empty() {
        return Err(StepError::invalid("uniquegroups needs at least one column"));
    }
    let keys = tracked(ctx, &step.on)?;
    let key_names: Vec<String> = keys.iter().map(|c| c.name.clone()).collect();
    let query = Query::new()
        .select(cols(&key_names))
        .from(ctx.previous_ref()?)
        .group_by(cols(&key_names));
    Ok(
        StepOutput::new(Cte::new(&ctx.name, query), SchemaDelta::new().replace_all(keys))
            .ordered(RowOrder::Clear),
    )
}

/// Label literal in a text-typed column: total labels are strings, so
/// non-text dimensions are cast.
fn as_text(expr: Expr, column: &ColumnMetadata, ctx: &StepContext) -> Expr {
    if column.sql_type.is_string() {
        expr
    } else {
        expr.cast(ctx.caps().casts.text)
    }
}

pub fn totals(step: &TotalsStep, ctx: &StepContext) -> StepResult<StepOutput> {
    if step.total_dimensions.is_empty() {
        return Err(StepError::invalid("totals needs at least one dimension"));
    }
    let dimension_names: Vec<String> = step
        .total_dimensions
        .iter()
        .map(|d| d.total_column.clone())
        .collect();
    let mut keys = dimension_names.clone();
    keys.extend(step.groups.iter().cloned());
    validate_aggregations(&step.aggregations, &keys)?;

    let dimensions = tracked(ctx, &dimension_names)?;
    let groups = tracked(ctx, &step.groups)?;
    let (agg_select, agg_columns) = aggregations(&step.aggregations, ctx)?;

    let mut branches = Vec::new();
    for mask in step.combinations() {
        let mut select: Vec<SelectExpr> = Vec::new();
        let mut group_by: Vec<Expr> = Vec::new();
        for (i, (dimension, column)) in step.total_dimensions.iter().zip(&dimensions).enumerate() {
            if mask & (1 << i) != 0 {
                select.push(lit_str(&dimension.total_rows_label).alias(&column.name));
            } else {
                select.push(as_text(col(&column.name), column, ctx).alias(&column.name));
                group_by.push(col(&column.name));
            }
        }
        for group in &groups {
            select.push(col(&group.name).into());
            group_by.push(col(&group.name));
        }
        select.extend(agg_select.iter().cloned());
        branches.push(
            Query::new()
                .select(select)
                .from(ctx.previous_ref()?)
                .group_by(group_by),
        );
    }

    let mut columns: Vec<ColumnMetadata> = dimensions
        .into_iter()
        .map(|c| ColumnMetadata::new(&c.name, DataType::String))
        .collect();
    columns.extend(groups);
    columns.extend(agg_columns);

    Ok(StepOutput::new(
        Cte::new(&ctx.name, Query::union_all(branches)),
        SchemaDelta::new().replace_all(columns),
    )
    .ordered(RowOrder::Clear))
}

pub fn rollup(step: &RollupStep, ctx: &StepContext) -> StepResult<StepOutput> {
    if step.hierarchy.is_empty() {
        return Err(StepError::invalid("rollup needs a hierarchy"));
    }
    let (label, level, parent) = (step.label_column(), step.level_column(), step.parent_column());
    let mut keys = step.groupby.clone();
    keys.extend(step.hierarchy.iter().cloned());
    keys.extend([label.to_string(), level.to_string(), parent.to_string()]);
    validate_aggregations(&step.aggregations, &keys)?;
    for generated in [label, level, parent] {
        if contains(&step.groupby, generated) || contains(&step.hierarchy, generated) {
            return Err(StepError::invalid(format!(
                "rollup output column '{}' clashes with an input column",
                generated
            )));
        }
    }

    let groups = tracked(ctx, &step.groupby)?;
    let hierarchy = tracked(ctx, &step.hierarchy)?;
    let (agg_select, agg_columns) = aggregations(&step.aggregations, ctx)?;

    let mut branches = Vec::with_capacity(hierarchy.len());
    for (depth, current) in hierarchy.iter().enumerate() {
        let mut select: Vec<SelectExpr> = groups.iter().map(|g| col(&g.name).into()).collect();
        let mut group_by: Vec<Expr> = groups.iter().map(|g| col(&g.name)).collect();
        for (i, column) in hierarchy.iter().enumerate() {
            if i <= depth {
                select.push(col(&column.name).into());
                group_by.push(col(&column.name));
            } else {
                select.push(lit_null().alias(&column.name));
            }
        }
        select.push(as_text(col(&current.name), current, ctx).alias(label));
        select.push(lit_str(&current.name).alias(level));
        let parent_expr = match depth.checked_sub(1).and_then(|i| hierarchy.get(i)) {
            Some(up) => as_text(col(&up.name), up, ctx),
            None => lit_null().cast(ctx.caps().casts.text),
        };
        select.push(parent_expr.alias(parent));
        select.extend(agg_select.iter().cloned());
        branches.push(
            Query::new()
                .select(select)
                .from(ctx.previous_ref()?)
                .group_by(group_by),
        );
    }

    let mut columns = groups;
    columns.extend(hierarchy);
    columns.push(ColumnMetadata::new(label, DataType::String));
    columns.push(ColumnMetadata::new(level, DataType::String));
    columns.push(ColumnMetadata::new(parent, DataType::String));
    columns.extend(agg_columns);

    Ok(StepOutput::new(
        Cte::new(&ctx.name, Query::union_all(branches)),
        SchemaDelta::new().replace_all(columns),
    )
    .ordered(RowOrder::Clear))
}
