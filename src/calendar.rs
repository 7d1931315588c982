//! Calendar recipes shared by every backend.
//!
//! Each `dateInfo` unit maps onto a [`DateRecipe`] built from a handful of
//! primitives: extract a [`DatePart`], truncate to a [`Period`], and shift by
//! whole days. Backends implement those primitives through [`DateBackend`];
//! [`compile_recipe`] composes the rest, so "previous X" and "first day of
//! previous X" are always derived from "X" and "first day of X" in the same
//! way everywhere.
//!
//! Conventions:
//! - `Week` periods start on Sunday, `IsoWeek` periods on Monday.
//! - `DayOfWeek` is 1 (Sunday) to 7 (Saturday); `IsoDayOfWeek` is 1 (Monday)
//!   to 7 (Sunday).
//! - `Week` numbers run 0 to 53, week 1 starting on the first Sunday.

use serde::{Deserialize, Serialize};

use crate::error::{StepError, StepResult};

/// A numeric calendar field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatePart {
    Year,
    Month,
    Day,
    Week,
    Quarter,
    DayOfWeek,
    DayOfYear,
    IsoYear,
    IsoWeek,
    IsoDayOfWeek,
    Hour,
    Minutes,
    Seconds,
    Milliseconds,
}

impl DatePart {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatePart::Year => "year",
            DatePart::Month => "month",
            DatePart::Day => "day",
            DatePart::Week => "week",
            DatePart::Quarter => "quarter",
            DatePart::DayOfWeek => "dayOfWeek",
            DatePart::DayOfYear => "dayOfYear",
            DatePart::IsoYear => "isoYear",
            DatePart::IsoWeek => "isoWeek",
            DatePart::IsoDayOfWeek => "isoDayOfWeek",
            DatePart::Hour => "hour",
            DatePart::Minutes => "minutes",
            DatePart::Seconds => "seconds",
            DatePart::Milliseconds => "milliseconds",
        }
    }
}

/// A truncation target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Period {
    Day,
    /// Sunday-start week.
    Week,
    /// Monday-start week.
    IsoWeek,
    Month,
    Quarter,
    Year,
}

/// Bucket size of `addmissingdates`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Day,
    Week,
    Month,
    Year,
}

impl Granularity {
    /// Period a date is truncated to when computing its bucket. Weekly
    /// buckets start on the ISO week's Monday.
    pub fn period(&self) -> Period {
        match self {
            Granularity::Day => Period::Day,
            Granularity::Week => Period::IsoWeek,
            Granularity::Month => Period::Month,
            Granularity::Year => Period::Year,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Day => "day",
            Granularity::Week => "week",
            Granularity::Month => "month",
            Granularity::Year => "year",
        }
    }
}

/// Wire names accepted in `dateextract.dateInfo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DateUnit {
    Year,
    Month,
    Day,
    Week,
    Quarter,
    DayOfWeek,
    DayOfYear,
    IsoYear,
    IsoWeek,
    IsoDayOfWeek,
    Hour,
    Minutes,
    Seconds,
    Milliseconds,
    FirstDayOfYear,
    FirstDayOfMonth,
    FirstDayOfWeek,
    FirstDayOfQuarter,
    FirstDayOfIsoWeek,
    PreviousDay,
    FirstDayOfPreviousYear,
    FirstDayOfPreviousMonth,
    FirstDayOfPreviousWeek,
    FirstDayOfPreviousQuarter,
    FirstDayOfPreviousIsoWeek,
    PreviousYear,
    PreviousMonth,
    PreviousWeek,
    PreviousQuarter,
    PreviousIsoWeek,
}

impl DateUnit {
    pub const ALL: [DateUnit; 30] = [
        DateUnit::Year,
        DateUnit::Month,
        DateUnit::Day,
        DateUnit::Week,
        DateUnit::Quarter,
        DateUnit::DayOfWeek,
        DateUnit::DayOfYear,
        DateUnit::IsoYear,
        DateUnit::IsoWeek,
        DateUnit::IsoDayOfWeek,
        DateUnit::Hour,
        DateUnit::Minutes,
        DateUnit::Seconds,
        DateUnit::Milliseconds,
        DateUnit::FirstDayOfYear,
        DateUnit::FirstDayOfMonth,
        DateUnit::FirstDayOfWeek,
        DateUnit::FirstDayOfQuarter,
        DateUnit::FirstDayOfIsoWeek,
        DateUnit::PreviousDay,
        DateUnit::FirstDayOfPreviousYear,
        DateUnit::FirstDayOfPreviousMonth,
        DateUnit::FirstDayOfPreviousWeek,
        DateUnit::FirstDayOfPreviousQuarter,
        DateUnit::FirstDayOfPreviousIsoWeek,
        DateUnit::PreviousYear,
        DateUnit::PreviousMonth,
        DateUnit::PreviousWeek,
        DateUnit::PreviousQuarter,
        DateUnit::PreviousIsoWeek,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DateUnit::FirstDayOfYear => "firstDayOfYear",
            DateUnit::FirstDayOfMonth => "firstDayOfMonth",
            DateUnit::FirstDayOfWeek => "firstDayOfWeek",
            DateUnit::FirstDayOfQuarter => "firstDayOfQuarter",
            DateUnit::FirstDayOfIsoWeek => "firstDayOfIsoWeek",
            DateUnit::PreviousDay => "previousDay",
            DateUnit::FirstDayOfPreviousYear => "firstDayOfPreviousYear",
            DateUnit::FirstDayOfPreviousMonth => "firstDayOfPreviousMonth",
            DateUnit::FirstDayOfPreviousWeek => "firstDayOfPreviousWeek",
            DateUnit::FirstDayOfPreviousQuarter => "firstDayOfPreviousQuarter",
            DateUnit::FirstDayOfPreviousIsoWeek => "firstDayOfPreviousIsoWeek",
            DateUnit::PreviousYear => "previousYear",
            DateUnit::PreviousMonth => "previousMonth",
            DateUnit::PreviousWeek => "previousWeek",
            DateUnit::PreviousQuarter => "previousQuarter",
            DateUnit::PreviousIsoWeek => "previousIsoWeek",
            DateUnit::Year => "year",
            DateUnit::Month => "month",
            DateUnit::Day => "day",
            DateUnit::Week => "week",
            DateUnit::Quarter => "quarter",
            DateUnit::DayOfWeek => "dayOfWeek",
            DateUnit::DayOfYear => "dayOfYear",
            DateUnit::IsoYear => "isoYear",
            DateUnit::IsoWeek => "isoWeek",
            DateUnit::IsoDayOfWeek => "isoDayOfWeek",
            DateUnit::Hour => "hour",
            DateUnit::Minutes => "minutes",
            DateUnit::Seconds => "seconds",
            DateUnit::Milliseconds => "milliseconds",
        }
    }

    /// The recipe computing this unit.
    pub fn recipe(&self) -> DateRecipe {
        use DateRecipe::*;
        match self {
            DateUnit::Year => Part(DatePart::Year),
            DateUnit::Month => Part(DatePart::Month),
            DateUnit::Day => Part(DatePart::Day),
            DateUnit::Week => Part(DatePart::Week),
            DateUnit::Quarter => Part(DatePart::Quarter),
            DateUnit::DayOfWeek => Part(DatePart::DayOfWeek),
            DateUnit::DayOfYear => Part(DatePart::DayOfYear),
            DateUnit::IsoYear => Part(DatePart::IsoYear),
            DateUnit::IsoWeek => Part(DatePart::IsoWeek),
            DateUnit::IsoDayOfWeek => Part(DatePart::IsoDayOfWeek),
            DateUnit::Hour => Part(DatePart::Hour),
            DateUnit::Minutes => Part(DatePart::Minutes),
            DateUnit::Seconds => Part(DatePart::Seconds),
            DateUnit::Milliseconds => Part(DatePart::Milliseconds),
            DateUnit::FirstDayOfYear => Truncate(Period::Year),
            DateUnit::FirstDayOfMonth => Truncate(Period::Month),
            DateUnit::FirstDayOfWeek => Truncate(Period::Week),
            DateUnit::FirstDayOfQuarter => Truncate(Period::Quarter),
            DateUnit::FirstDayOfIsoWeek => Truncate(Period::IsoWeek),
            DateUnit::PreviousDay => TruncateOfPrevious(Period::Day),
            DateUnit::FirstDayOfPreviousYear => TruncateOfPrevious(Period::Year),
            DateUnit::FirstDayOfPreviousMonth => TruncateOfPrevious(Period::Month),
            DateUnit::FirstDayOfPreviousWeek => TruncateOfPrevious(Period::Week),
            DateUnit::FirstDayOfPreviousQuarter => TruncateOfPrevious(Period::Quarter),
            DateUnit::FirstDayOfPreviousIsoWeek => TruncateOfPrevious(Period::IsoWeek),
            DateUnit::PreviousYear => PartOfPrevious(DatePart::Year, Period::Year),
            DateUnit::PreviousMonth => PartOfPrevious(DatePart::Month, Period::Month),
            DateUnit::PreviousWeek => PartOfPrevious(DatePart::Week, Period::Week),
            DateUnit::PreviousQuarter => PartOfPrevious(DatePart::Quarter, Period::Quarter),
            DateUnit::PreviousIsoWeek => PartOfPrevious(DatePart::IsoWeek, Period::IsoWeek),
        }
    }

    /// Whether the unit yields a date (as opposed to an integer).
    pub fn yields_date(&self) -> bool {
        matches!(
            self.recipe(),
            DateRecipe::Truncate(_) | DateRecipe::TruncateOfPrevious(_)
        )
    }
}

/// How a [`DateUnit`] is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateRecipe {
    /// Extract a field from the date.
    Part(DatePart),
    /// First instant of the period containing the date.
    Truncate(Period),
    /// Field of the day before the period start.
    PartOfPrevious(DatePart, Period),
    /// Start of the period before the one containing the date.
    TruncateOfPrevious(Period),
}

/// Native calendar primitives of one backend.
///
/// `part` and `truncate` return `None` when the backend has no direct
/// spelling; [`compile_recipe`] then derives the value from other
/// primitives. `Day`, `Month`, `Year`, `DayOfYear`, `IsoDayOfWeek` parts and
/// `Day`, `IsoWeek`, `Month`, `Quarter`, `Year` truncations must be native.
pub trait DateBackend {
    type Expr: Clone;

    fn part(&self, part: DatePart, date: &Self::Expr) -> Option<Self::Expr>;

    fn truncate(&self, period: Period, date: &Self::Expr) -> Option<Self::Expr>;

    fn add_days(&self, date: &Self::Expr, days: i64) -> Self::Expr;

    fn int(&self, value: i64) -> Self::Expr;

    fn add(&self, left: Self::Expr, right: Self::Expr) -> Self::Expr;

    fn sub(&self, left: Self::Expr, right: Self::Expr) -> Self::Expr;

    /// Non-negative remainder of `value / divisor`.
    fn modulo(&self, value: Self::Expr, divisor: i64) -> Self::Expr;

    /// Integer division rounding towards negative infinity.
    fn div_floor(&self, value: Self::Expr, divisor: i64) -> Self::Expr;
}

/// Build the expression computing `unit` from `date`.
pub fn compile_recipe<B: DateBackend>(
    backend: &B,
    unit: DateUnit,
    date: &B::Expr,
) -> StepResult<B::Expr> {
    match unit.recipe() {
        DateRecipe::Part(part) => compile_part(backend, part, date),
        DateRecipe::Truncate(period) => compile_truncate(backend, period, date),
        DateRecipe::PartOfPrevious(part, period) => {
            let previous = day_before_period(backend, period, date)?;
            compile_part(backend, part, &previous)
        }
        DateRecipe::TruncateOfPrevious(period) => {
            let previous = day_before_period(backend, period, date)?;
            compile_truncate(backend, period, &previous)
        }
    }
}

fn day_before_period<B: DateBackend>(
    backend: &B,
    period: Period,
    date: &B::Expr,
) -> StepResult<B::Expr> {
    let start = compile_truncate(backend, period, date)?;
    Ok(backend.add_days(&start, -1))
}

/// Extract `part` from `date`, deriving it when the backend lacks it.
pub fn compile_part<B: DateBackend>(
    backend: &B,
    part: DatePart,
    date: &B::Expr,
) -> StepResult<B::Expr> {
    if let Some(native) = backend.part(part, date) {
        return Ok(native);
    }
    match part {
        DatePart::DayOfWeek => {
            // Sunday is ISO day 7.
            let iso = compile_part(backend, DatePart::IsoDayOfWeek, date)?;
            Ok(backend.add(backend.modulo(iso, 7), backend.int(1)))
        }
        DatePart::Week => {
            let day_of_year = compile_part(backend, DatePart::DayOfYear, date)?;
            let day_of_week = compile_part(backend, DatePart::DayOfWeek, date)?;
            let shifted = backend.sub(backend.add(day_of_year, backend.int(7)), day_of_week);
            Ok(backend.div_floor(shifted, 7))
        }
        DatePart::Quarter => {
            let month = compile_part(backend, DatePart::Month, date)?;
            Ok(backend.div_floor(backend.add(month, backend.int(2)), 3))
        }
        other => Err(StepError::invalid(format!(
            "date part '{}' has no implementation in this backend",
            other.as_str()
        ))),
    }
}

/// Truncate `date` to `period`, deriving Sunday weeks from ISO weeks when
/// the backend lacks them.
pub fn compile_truncate<B: DateBackend>(
    backend: &B,
    period: Period,
    date: &B::Expr,
) -> StepResult<B::Expr> {
    if let Some(native) = backend.truncate(period, date) {
        return Ok(native);
    }
    match period {
        Period::Week => {
            let shifted = backend.add_days(date, 1);
            let monday = compile_truncate(backend, Period::IsoWeek, &shifted)?;
            Ok(backend.add_days(&monday, -1))
        }
        other => Err(StepError::invalid(format!(
            "truncation to {:?} has no implementation in this backend",
            other
        ))),
    }
}
