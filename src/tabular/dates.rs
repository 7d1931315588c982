//! Calendar primitives evaluated with `chrono`.
//!
//! The expression type is a cell [`Value`]: a date, an integer, or null.
//! Null propagates through every primitive. Parts and truncations read the
//! wall-clock time of each date in its own offset, and truncated dates keep
//! that offset.

use chrono::{DateTime, Datelike, Duration, FixedOffset, Months, NaiveDate, TimeZone, Timelike};

use crate::calendar::{compile_recipe, DateBackend, DatePart, Period};
use crate::error::StepResult;
use crate::step::{DateUnit, Granularity};

use super::Value;

#[derive(Debug, Clone, Copy, Default)]
pub struct TabularDates;

impl TabularDates {
    /// Value of `unit` for one cell.
    pub fn unit(&self, unit: DateUnit, date: &Value) -> StepResult<Value> {
        let date = match date {
            Value::Null => return Ok(Value::Null),
            other => other.as_date().map(Value::Date).unwrap_or(Value::Null),
        };
        compile_recipe(self, unit, &date)
    }

    /// Start of the gap-fill bucket containing `date`.
    pub fn bucket(
        &self,
        date: DateTime<FixedOffset>,
        granularity: Granularity,
    ) -> Option<DateTime<FixedOffset>> {
        truncate(date, granularity.period())
    }

    /// `date` moved forward by one bucket.
    pub fn next_bucket(
        &self,
        date: DateTime<FixedOffset>,
        granularity: Granularity,
    ) -> Option<DateTime<FixedOffset>> {
        match granularity {
            Granularity::Day => date.checked_add_signed(Duration::days(1)),
            Granularity::Week => date.checked_add_signed(Duration::days(7)),
            Granularity::Month => date.checked_add_months(Months::new(1)),
            Granularity::Year => date.checked_add_months(Months::new(12)),
        }
    }
}

fn midnight(date: NaiveDate, offset: FixedOffset) -> Option<DateTime<FixedOffset>> {
    let naive = date.and_hms_opt(0, 0, 0)?;
    offset.from_local_datetime(&naive).single()
}

fn truncate(date: DateTime<FixedOffset>, period: Period) -> Option<DateTime<FixedOffset>> {
    let day = date.date_naive();
    let start = match period {
        Period::Day => day,
        Period::Week => day - Duration::days(i64::from(day.weekday().num_days_from_sunday())),
        Period::IsoWeek => day - Duration::days(i64::from(day.weekday().num_days_from_monday())),
        Period::Month => day.with_day(1)?,
        Period::Quarter => NaiveDate::from_ymd_opt(day.year(), (day.month0() / 3) * 3 + 1, 1)?,
        Period::Year => NaiveDate::from_ymd_opt(day.year(), 1, 1)?,
    };
    midnight(start, *date.offset())
}

fn integer(value: &Value) -> Option<i64> {
    match value {
        Value::Int(i) => Some(*i),
        Value::Float(f) => Some(*f as i64),
        _ => None,
    }
}

fn arithmetic(left: &Value, right: &Value, op: impl Fn(i64, i64) -> i64) -> Value {
    match (integer(left), integer(right)) {
        (Some(a), Some(b)) => Value::Int(op(a, b)),
        _ => Value::Null,
    }
}

impl DateBackend for TabularDates {
    type Expr = Value;

    fn part(&self, part: DatePart, date: &Value) -> Option<Value> {
        let Value::Date(d) = date else {
            return Some(Value::Null);
        };
        let value = match part {
            DatePart::Year => d.year().into(),
            DatePart::Month => d.month().into(),
            DatePart::Day => d.day().into(),
            DatePart::DayOfYear => d.ordinal().into(),
            DatePart::IsoYear => d.iso_week().year().into(),
            DatePart::IsoWeek => d.iso_week().week().into(),
            DatePart::IsoDayOfWeek => d.weekday().number_from_monday().into(),
            DatePart::Hour => d.hour().into(),
            DatePart::Minutes => d.minute().into(),
            DatePart::Seconds => d.second().into(),
            DatePart::Milliseconds => (d.timestamp_subsec_millis() % 1000).into(),
            DatePart::Week | DatePart::DayOfWeek | DatePart::Quarter => return None,
        };
        Some(Value::Int(value))
    }

    fn truncate(&self, period: Period, date: &Value) -> Option<Value> {
        let Value::Date(d) = date else {
            return Some(Value::Null);
        };
        Some(truncate(*d, period).map(Value::Date).unwrap_or(Value::Null))
    }

    fn add_days(&self, date: &Value, days: i64) -> Value {
        match date {
            Value::Date(d) => d
                .checked_add_signed(Duration::days(days))
                .map(Value::Date)
                .unwrap_or(Value::Null),
            _ => Value::Null,
        }
    }

    fn int(&self, value: i64) -> Value {
        Value::Int(value)
    }

    fn add(&self, left: Value, right: Value) -> Value {
        arithmetic(&left, &right, |a, b| a + b)
    }

    fn sub(&self, left: Value, right: Value) -> Value {
        arithmetic(&left, &right, |a, b| a - b)
    }

    fn modulo(&self, value: Value, divisor: i64) -> Value {
        arithmetic(&value, &Value::Int(divisor), i64::rem_euclid)
    }

    fn div_floor(&self, value: Value, divisor: i64) -> Value {
        arithmetic(&value, &Value::Int(divisor), i64::div_euclid)
    }
}
