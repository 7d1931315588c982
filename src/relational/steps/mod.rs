//! One translator per step kind.
//!
//! A translator reads the [`StepContext`], emits CTEs and describes its
//! effect on the schema. It never mutates the tracker itself.

mod aggregate;
mod columns;
mod combine;
mod dates;
mod filter;
mod gapfill;
mod ordering;
mod reshape;
mod source;
mod waterfall;

use crate::error::{StepError, StepResult};
use crate::sql::{avg, col, count, count_distinct, max, min, sum, DataType, Expr};
use crate::step::{AggFunction, Step};

use super::context::{StepContext, StepOutput};
use super::metadata::ColumnMetadata;

pub fn translate_step(step: &Step, ctx: &StepContext) -> StepResult<StepOutput> {
    match step {
        Step::Domain(s) => source::domain(s, ctx),
        Step::CustomSql(s) => source::custom_sql(s, ctx),
        Step::Filter(s) => filter::filter(s, ctx),
        Step::Select(s) => columns::select(s, ctx),
        Step::Delete(s) => columns::delete(s, ctx),
        Step::Rename(s) => columns::rename(s, ctx),
        Step::Duplicate(s) => columns::duplicate(s, ctx),
        Step::Text(s) => columns::text(s, ctx),
        Step::Fillna(s) => columns::fillna(s, ctx),
        Step::Replace(s) => columns::replace(s, ctx),
        Step::Lowercase(s) => columns::change_case(s, "LOWER", ctx),
        Step::Uppercase(s) => columns::change_case(s, "UPPER", ctx),
        Step::Convert(s) => columns::convert(s, ctx),
        Step::Concatenate(s) => columns::concatenate(s, ctx),
        Step::Split(s) => columns::split(s, ctx),
        Step::Sort(s) => ordering::sort(s, ctx),
        Step::Top(s) => ordering::top(s, ctx),
        Step::Rank(s) => ordering::rank(s, ctx),
        Step::Cumsum(s) => ordering::cumsum(s, ctx),
        Step::Percentage(s) => ordering::percentage(s, ctx),
        Step::Argmax(s) => ordering::arg_extremum(s, true, ctx),
        Step::Argmin(s) => ordering::arg_extremum(s, false, ctx),
        Step::Aggregate(s) => aggregate::aggregate(s, ctx),
        Step::UniqueGroups(s) => aggregate::unique_groups(s, ctx),
        Step::Totals(s) => aggregate::totals(s, ctx),
        Step::Rollup(s) => aggregate::rollup(s, ctx),
        Step::Pivot(s) => reshape::pivot(s, ctx),
        Step::Unpivot(s) => reshape::unpivot(s, ctx),
        Step::Append(s) => combine::append(s, ctx),
        Step::Join(s) => combine::join(s, ctx),
        Step::DateExtract(s) => dates::date_extract(s, ctx),
        Step::AddMissingDates(s) => gapfill::add_missing_dates(s, ctx),
        Step::Waterfall(s) => waterfall::waterfall(s, ctx),
    }
}

// =============================================================================
// Shared helpers
// =============================================================================

/// SQL aggregate call for `function` applied to `expr`.
pub(crate) fn aggregate_expr(function: AggFunction, expr: Expr, ctx: &StepContext) -> StepResult<Expr> {
    Ok(match function {
        AggFunction::Sum => sum(expr),
        AggFunction::Avg => avg(expr),
        AggFunction::Count => count(expr),
        AggFunction::CountDistinct => count_distinct(expr),
        AggFunction::Min => min(expr),
        AggFunction::Max => max(expr),
        AggFunction::First | AggFunction::Last => {
            return Err(StepError::MissingCapability {
                feature: "first/last aggregation",
                dialect: ctx.dialect.name(),
            })
        }
    })
}

/// Type of `function` applied to a column of type `input`.
pub(crate) fn aggregate_type(function: AggFunction, input: &DataType) -> DataType {
    match function {
        AggFunction::Count | AggFunction::CountDistinct => DataType::Int64,
        AggFunction::Avg => DataType::Float64,
        AggFunction::Sum if input.is_integer() => DataType::Int64,
        AggFunction::Sum if input.is_numeric() => input.clone(),
        AggFunction::Sum => DataType::Float64,
        AggFunction::Min | AggFunction::Max | AggFunction::First | AggFunction::Last => {
            input.clone()
        }
    }
}

/// Tracked copies of the named live columns, in the given order.
pub(crate) fn tracked(ctx: &StepContext, names: &[String]) -> StepResult<Vec<ColumnMetadata>> {
    names
        .iter()
        .map(|name| Ok(ctx.column(name)?.clone()))
        .collect()
}

pub(crate) fn cols(names: &[String]) -> Vec<Expr> {
    names.iter().map(|n| col(n)).collect()
}

/// Uppercased-name membership test.
pub(crate) fn contains(names: &[String], name: &str) -> bool {
    names.iter().any(|n| n.eq_ignore_ascii_case(name))
}
