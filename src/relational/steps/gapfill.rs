//! `addmissingdates`: one row per calendar bucket between each group's first
//! and last bucket.
//!
//! Three CTEs:
//!
//! 1. `<step>_BOUNDS`: first and last bucket per group.
//! 2. `<step>_CALENDAR`: a recursive walk from the first bucket to the last.
//! 3. `<step>`: the original rows, plus one synthetic row for every calendar
//!    bucket no original row falls into. Synthetic rows carry the group
//!    values and the bucket date; every other column is NULL.

use crate::error::{StepError, StepResult};
use crate::relational::context::{RowOrder, StepContext, StepOutput};
use crate::relational::metadata::SchemaDelta;
use crate::sql::expr::{not_exists, null_safe_eq};
use crate::sql::{
    col, lit_int, lit_null, max, min, table_col, Cte, DataType, ExprExt, Query, SelectExpr,
    SortDir, TableRef,
};
use crate::step::AddMissingDatesStep;

use super::{cols, contains, tracked};

const MIN_BUCKET: &str = "__min_bucket";
const MAX_BUCKET: &str = "__max_bucket";
const BUCKET: &str = "__bucket";

pub fn add_missing_dates(step: &AddMissingDatesStep, ctx: &StepContext) -> StepResult<StepOutput> {
    ctx.dialect
        .require(ctx.caps().recursive_cte, "date gap filling")?;
    let date = ctx.column(&step.dates_column)?.clone();
    match &date.sql_type {
        t if t.is_temporal() => {}
        DataType::Other(_) => {}
        other => {
            return Err(StepError::Type(format!(
                "column '{}' has type {}, expected a date",
                date.name, other
            )))
        }
    }
    let groups: Vec<String> = tracked(ctx, &step.groups)?
        .into_iter()
        .map(|c| c.name)
        .collect();
    if contains(&groups, &date.name) {
        return Err(StepError::invalid(
            "the date column cannot also be a group column",
        ));
    }

    let granularity = step.dates_granularity;
    // Buckets take the column's own type when it carries a time zone, the
    // dialect's timestamp type otherwise.
    let (date_cast, filled_type) = match date.sql_type {
        DataType::TimestampTz => (date.original_type.as_str(), DataType::TimestampTz),
        _ => (ctx.caps().casts.date, DataType::Timestamp),
    };
    let previous = ctx.previous()?;
    let bounds_name = ctx.aux("BOUNDS");
    let calendar_name = ctx.aux("CALENDAR");

    // Bounds per group.
    let bucket = ctx.dates.bucket(&col(&date.name), granularity)?;
    let mut select: Vec<SelectExpr> = cols(&groups).into_iter().map(SelectExpr::from).collect();
    select.push(min(bucket.clone()).alias(MIN_BUCKET));
    select.push(max(bucket).alias(MAX_BUCKET));
    let bounds = Query::new()
        .select(select)
        .from(TableRef::new(previous))
        .filter(col(&date.name).is_not_null())
        .group_by(cols(&groups));

    // Calendar walk. Both members cast to the same type so recursive
    // column types line up.
    let mut seed: Vec<SelectExpr> = cols(&groups).into_iter().map(SelectExpr::from).collect();
    seed.push(col(MIN_BUCKET).cast(date_cast).alias(BUCKET));
    seed.push(col(MAX_BUCKET).cast(date_cast).alias(MAX_BUCKET));
    let seed = Query::new()
        .select(seed)
        .from(TableRef::new(&bounds_name))
        .filter(col(MIN_BUCKET).is_not_null());

    let next = ctx
        .dates
        .next_bucket(&col(BUCKET), granularity)
        .cast(date_cast);
    let mut step_select: Vec<SelectExpr> =
        cols(&groups).into_iter().map(SelectExpr::from).collect();
    step_select.push(next.clone().alias(BUCKET));
    step_select.push(col(MAX_BUCKET).into());
    let walk = Query::new()
        .select(step_select)
        .from(TableRef::new(&calendar_name))
        .filter(next.lte(col(MAX_BUCKET)));
    let calendar = Query::union_all(vec![seed, walk]);

    // Original rows keep their values; non-timestamp dates are widened so
    // both union members share a type.
    let columns = ctx.columns();
    let widen = !matches!(date.sql_type, DataType::Timestamp | DataType::TimestampTz);
    let originals = ctx.project(
        |c| {
            if widen && c.is(&date.name) {
                Some(col(&c.name).cast(date_cast))
            } else {
                None
            }
        },
        vec![],
    )?;

    let original_bucket = ctx
        .dates
        .bucket(&table_col("o", &date.name), granularity)?
        .cast(date_cast);
    let matched = groups
        .iter()
        .map(|g| null_safe_eq(table_col("o", g), table_col("c", g)))
        .fold(original_bucket.eq(table_col("c", BUCKET)), |acc, c| acc.and(c));
    let existing = Query::new()
        .select(vec![lit_int(1)])
        .from(TableRef::new(previous).with_alias("o"))
        .filter(matched);

    let synthetic_select: Vec<SelectExpr> = columns
        .iter()
        .map(|c| {
            if c.is(&date.name) {
                table_col("c", BUCKET).alias(&c.name)
            } else if contains(&groups, &c.name) {
                table_col("c", &c.name).alias(&c.name)
            } else {
                lit_null().alias(&c.name)
            }
        })
        .collect();
    let synthetic = Query::new()
        .select(synthetic_select)
        .from(TableRef::new(&calendar_name).with_alias("c"))
        .filter(not_exists(existing));

    let ctes = vec![
        Cte::new(&bounds_name, bounds),
        Cte::recursive(&calendar_name, calendar),
        Cte::new(&ctx.name, Query::union_all(vec![originals, synthetic])),
    ];
    let mut order: Vec<(String, SortDir)> =
        groups.iter().map(|g| (g.clone(), SortDir::Asc)).collect();
    order.push((date.name.clone(), SortDir::Asc));
    let delta = SchemaDelta::new().retype(&date.name, filled_type);

    Ok(StepOutput::with_ctes(ctes, delta).ordered(RowOrder::Set(order)))
}
