//! `pivot` and `unpivot`.

use std::collections::HashSet;

use serde_json::Value as JsonValue;
use tracing::{trace, warn};

use crate::error::{StepError, StepResult};
use crate::relational::context::{RowOrder, StepContext, StepOutput};
use crate::relational::metadata::{ColumnMetadata, SchemaDelta};
use crate::sql::dialect::capabilities::UnpivotSyntax;
use crate::sql::expr::case_when;
use crate::sql::{
    col, lit_json, lit_str, Cte, DataType, ExprExt, OrderByExpr, Query, SelectExpr, TableRef,
};
use crate::step::{PivotStep, UnpivotStep};

use super::{aggregate_expr, aggregate_type, cols, contains, tracked};

/// Column name for a pivoted value.
pub(crate) fn pivot_column_name(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn pivot(step: &PivotStep, ctx: &StepContext) -> StepResult<StepOutput> {
    let index = tracked(ctx, &step.index)?;
    let pivoted = ctx.column(&step.column_to_pivot)?.name.clone();
    let value = ctx.column(&step.value_column)?.clone();
    if contains(&step.index, &pivoted) || contains(&step.index, &value.name) {
        return Err(StepError::invalid(
            "pivot index must not contain the pivoted or value column",
        ));
    }

    let distinct = Query::new()
        .select(vec![col(&pivoted)])
        .distinct()
        .from(ctx.previous_ref()?)
        .filter(col(&pivoted).is_not_null())
        .order_by(vec![OrderByExpr::asc(col(&pivoted))]);
    let distinct_sql = ctx.current_sql(distinct);
    trace!(sql = %distinct_sql, "fetching pivot values");
    let rows = ctx.collaborators.execute(&distinct_sql)?;
    let values: Vec<JsonValue> = rows
        .into_iter()
        .filter_map(|row| row.into_iter().next())
        .filter(|v| !v.is_null())
        .collect();
    if values.is_empty() {
        if index.is_empty() {
            return Err(StepError::invalid(
                "pivot without an index needs at least one pivoted value",
            ));
        }
        warn!(column = %pivoted, "pivot column has no values; only the index is kept");
    }

    let mut seen: HashSet<String> = index.iter().map(|c| c.name.to_uppercase()).collect();
    let mut select: Vec<SelectExpr> = index.iter().map(|c| col(&c.name).into()).collect();
    let mut columns = index.clone();
    let output_type = aggregate_type(step.agg_function, &value.sql_type);
    for v in &values {
        let name = pivot_column_name(v);
        if !seen.insert(name.to_uppercase()) {
            return Err(StepError::invalid(format!(
                "pivoted value '{}' produces a duplicate column",
                name
            )));
        }
        let picked = case_when(col(&pivoted).eq(lit_json(v)), col(&value.name), None);
        select.push(aggregate_expr(step.agg_function, picked, ctx)?.alias(&name));
        columns.push(ColumnMetadata::new(&name, output_type.clone()));
    }

    let query = Query::new()
        .select(select)
        .from(ctx.previous_ref()?)
        .group_by(cols(&index.iter().map(|c| c.name.clone()).collect::<Vec<_>>()));
    Ok(
        StepOutput::new(Cte::new(&ctx.name, query), SchemaDelta::new().replace_all(columns))
            .ordered(RowOrder::Clear),
    )
}

pub fn unpivot(step: &UnpivotStep, ctx: &StepContext) -> StepResult<StepOutput> {
    if step.unpivot.is_empty() {
        return Err(StepError::invalid("unpivot needs at least one column"));
    }
    let keep = tracked(ctx, &step.keep)?;
    let unpivoted = tracked(ctx, &step.unpivot)?;
    let (name_col, value_col) = (&step.unpivot_column_name, &step.value_column_name);
    if name_col.eq_ignore_ascii_case(value_col)
        || contains(&step.keep, name_col)
        || contains(&step.keep, value_col)
    {
        return Err(StepError::invalid(
            "unpivot output columns must be distinct from each other and from kept columns",
        ));
    }
    if unpivoted.iter().any(|u| contains(&step.keep, &u.name)) {
        return Err(StepError::invalid("a column cannot be both kept and unpivoted"));
    }

    let value_type = common_type(&unpivoted);
    let text = ctx.caps().casts.text;
    let cast_name = match &value_type {
        DataType::Float64 => ctx.caps().casts.float,
        _ => text,
    };
    let needs_cast = |c: &ColumnMetadata| c.sql_type != value_type;
    let typed = |c: &ColumnMetadata| {
        if needs_cast(c) {
            col(&c.name).cast(cast_name)
        } else {
            col(&c.name)
        }
    };

    let mut columns = keep.clone();
    columns.push(ColumnMetadata::new(name_col, DataType::String));
    columns.push(ColumnMetadata::new(value_col, value_type.clone()));
    let delta = SchemaDelta::new().replace_all(columns);
    let keep_select = || -> Vec<SelectExpr> { keep.iter().map(|c| col(&c.name).into()).collect() };

    let syntax = match ctx.caps().unpivot {
        // Without INCLUDE NULLS the keyword form cannot keep null values.
        UnpivotSyntax::Keyword {
            include_nulls: false,
        } if !step.dropna => UnpivotSyntax::UnionAll,
        other => other,
    };

    if syntax == UnpivotSyntax::UnionAll {
        let branches = unpivoted
            .iter()
            .map(|u| -> StepResult<Query> {
                let mut select = keep_select();
                select.push(lit_str(&u.name).alias(name_col));
                select.push(typed(u).alias(value_col));
                let branch = Query::new().select(select).from(ctx.previous_ref()?);
                Ok(if step.dropna {
                    branch.filter(col(&u.name).is_not_null())
                } else {
                    branch
                })
            })
            .collect::<StepResult<Vec<_>>>()?;
        return Ok(
            StepOutput::new(Cte::new(&ctx.name, Query::union_all(branches)), delta)
                .ordered(RowOrder::Clear),
        );
    }

    // The keyword forms need one type across the unpivoted columns.
    let mut ctes = Vec::new();
    let mut source = ctx.previous()?.to_string();
    if unpivoted.iter().any(needs_cast) {
        let cast_cte = ctx.aux("CAST");
        let mut select = keep_select();
        select.extend(unpivoted.iter().map(|u| typed(u).alias(&u.name)));
        ctes.push(Cte::new(
            &cast_cte,
            Query::new().select(select).from(ctx.previous_ref()?),
        ));
        source = cast_cte;
    }

    let dialect = ctx.dialect;
    let quote = |s: &str| dialect.quote_identifier(s);
    let in_list = unpivoted
        .iter()
        .map(|u| quote(&u.name))
        .collect::<Vec<_>>()
        .join(", ");
    let from = match syntax {
        UnpivotSyntax::DuckDb => format!(
            "(UNPIVOT {}{} ON {} INTO NAME {} VALUE {})",
            if step.dropna { "" } else { "INCLUDE NULLS " },
            quote(&source),
            in_list,
            quote(name_col),
            quote(value_col)
        ),
        _ => format!(
            "{} UNPIVOT {}({} FOR {} IN ({}))",
            quote(&source),
            if step.dropna { "" } else { "INCLUDE NULLS " },
            quote(value_col),
            quote(name_col),
            in_list
        ),
    };

    let mut select = keep_select();
    select.push(col(name_col).into());
    select.push(col(value_col).into());
    let query = Query::new()
        .select(select)
        .from(TableRef::raw(&from).with_alias("UNPIVOTED"));
    ctes.push(Cte::new(&ctx.name, query));

    Ok(StepOutput::with_ctes(ctes, delta).ordered(RowOrder::Clear))
}

/// Type of the value column: the shared type, a float when all inputs are
/// numeric, text otherwise.
fn common_type(columns: &[ColumnMetadata]) -> DataType {
    match columns.split_first() {
        Some((first, rest)) if rest.iter().all(|c| c.sql_type == first.sql_type) => {
            first.sql_type.clone()
        }
        _ if columns.iter().all(|c| c.sql_type.is_numeric()) => DataType::Float64,
        _ => DataType::String,
    }
}
