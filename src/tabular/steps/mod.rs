//! One executor per step kind.

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
use crate::step::Step;

use super::frame::same_name;
use super::{DataFrame, ExecutionContext};

pub fn execute_step(
    step: &Step,
    frame: Option<DataFrame>,
    ctx: &ExecutionContext,
) -> StepResult<DataFrame> {
    if let Step::Domain(s) = step {
        return source::domain(s, ctx);
    }
    let frame =
        frame.ok_or_else(|| StepError::invalid("a pipeline must start with a domain step"))?;
    match step {
        Step::Domain(s) => source::domain(s, ctx),
        Step::CustomSql(_) => Err(StepError::UnsupportedStep {
            step: "customsql",
            backend: "tabular",
        }),
        Step::Filter(s) => filter::filter(s, frame),
        Step::Select(s) => columns::select(s, frame),
        Step::Delete(s) => columns::delete(s, frame),
        Step::Rename(s) => columns::rename(s, frame),
        Step::Duplicate(s) => columns::duplicate(s, frame),
        Step::Text(s) => columns::text(s, frame),
        Step::Fillna(s) => columns::fillna(s, frame),
        Step::Replace(s) => columns::replace(s, frame),
        Step::Lowercase(s) => columns::change_case(s, frame, columns::Case::Lower),
        Step::Uppercase(s) => columns::change_case(s, frame, columns::Case::Upper),
        Step::Convert(s) => columns::convert(s, frame),
        Step::Concatenate(s) => columns::concatenate(s, frame),
        Step::Split(s) => columns::split(s, frame),
        Step::Sort(s) => ordering::sort(s, frame),
        Step::Top(s) => ordering::top(s, frame),
        Step::Rank(s) => ordering::rank(s, frame),
        Step::Cumsum(s) => ordering::cumsum(s, frame),
        Step::Percentage(s) => ordering::percentage(s, frame),
        Step::Argmax(s) => ordering::arg_extremum(s, frame, ordering::Extremum::Max),
        Step::Argmin(s) => ordering::arg_extremum(s, frame, ordering::Extremum::Min),
        Step::Aggregate(s) => aggregate::aggregate(s, frame),
        Step::UniqueGroups(s) => aggregate::unique_groups(s, frame),
        Step::Totals(s) => aggregate::totals(s, frame),
        Step::Rollup(s) => aggregate::rollup(s, frame),
        Step::Pivot(s) => reshape::pivot(s, frame),
        Step::Unpivot(s) => reshape::unpivot(s, frame),
        Step::Append(s) => combine::append(s, frame, ctx),
        Step::Join(s) => combine::join(s, frame, ctx),
        Step::DateExtract(s) => dates::date_extract(s, frame),
        Step::AddMissingDates(s) => gapfill::add_missing_dates(s, frame),
        Step::Waterfall(s) => waterfall::waterfall(s, frame),
    }
}

pub(crate) fn contains(columns: &[String], name: &str) -> bool {
    columns.iter().any(|c| same_name(c, name))
}
