//! One stage builder per step kind.

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

use super::{Stage, StageContext};

pub fn translate_step(step: &Step, ctx: &StageContext) -> StepResult<Vec<Stage>> {
    match step {
        Step::Domain(s) => source::domain(s, ctx),
        Step::CustomSql(_) => Err(StepError::UnsupportedStep {
            step: "customsql",
            backend: "document",
        }),
        Step::Filter(s) => filter::filter(s),
        Step::Select(s) => columns::select(s),
        Step::Delete(s) => columns::delete(s),
        Step::Rename(s) => columns::rename(s),
        Step::Duplicate(s) => columns::duplicate(s),
        Step::Text(s) => columns::text(s),
        Step::Fillna(s) => columns::fillna(s),
        Step::Replace(s) => columns::replace(s),
        Step::Lowercase(s) => columns::change_case(s, "$toLower"),
        Step::Uppercase(s) => columns::change_case(s, "$toUpper"),
        Step::Convert(s) => columns::convert(s),
        Step::Concatenate(s) => columns::concatenate(s),
        Step::Split(s) => columns::split(s),
        Step::Sort(s) => ordering::sort(s),
        Step::Top(s) => ordering::top(s),
        Step::Rank(s) => ordering::rank(s),
        Step::Cumsum(s) => ordering::cumsum(s),
        Step::Percentage(s) => ordering::percentage(s),
        Step::Argmax(s) => ordering::arg_extremum(s, "$max"),
        Step::Argmin(s) => ordering::arg_extremum(s, "$min"),
        Step::Aggregate(s) => aggregate::aggregate(s),
        Step::UniqueGroups(s) => aggregate::unique_groups(s),
        Step::Totals(s) => aggregate::totals(s),
        Step::Rollup(s) => aggregate::rollup(s),
        Step::Pivot(s) => reshape::pivot(s),
        Step::Unpivot(s) => reshape::unpivot(s),
        Step::Append(s) => combine::append(s, ctx),
        Step::Join(s) => combine::join(s, ctx),
        Step::DateExtract(s) => dates::date_extract(s),
        Step::AddMissingDates(s) => gapfill::add_missing_dates(s),
        Step::Waterfall(s) => waterfall::waterfall(s),
    }
}

/// Case-insensitive membership, matching how the other backends compare
/// column names.
pub(crate) fn contains(columns: &[String], name: &str) -> bool {
    columns.iter().any(|c| c.eq_ignore_ascii_case(name))
}
