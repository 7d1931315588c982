//! Date functions per [`DateFlavor`].
//!
//! [`SqlDates`] implements the calendar primitives for one dialect; the
//! derived units (Sunday weeks, `dayOfWeek`, week numbers, "previous"
//! units) come from [`crate::calendar::compile_recipe`].

use super::{DateFlavor, Dialect};
use crate::calendar::{compile_recipe, compile_truncate, DateBackend, DatePart, DateUnit, Granularity, Period};
use crate::error::StepResult;
use crate::sql::expr::{func, keyword, lit_int, lit_str, raw_sql, Expr, ExprExt};

/// Unit of a calendar shift.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftUnit {
    Day,
    Month,
    Year,
}

impl ShiftUnit {
    fn keyword(&self) -> &'static str {
        match self {
            ShiftUnit::Day => "DAY",
            ShiftUnit::Month => "MONTH",
            ShiftUnit::Year => "YEAR",
        }
    }
}

/// Calendar primitives of one SQL dialect.
#[derive(Debug, Clone, Copy)]
pub struct SqlDates {
    dialect: Dialect,
}

impl SqlDates {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    fn flavor(&self) -> DateFlavor {
        self.dialect.capabilities().date
    }

    /// Expression computing `unit` from `date`.
    pub fn unit(&self, unit: DateUnit, date: &Expr) -> StepResult<Expr> {
        compile_recipe(self, unit, date)
    }

    /// First day of the gap-fill bucket containing `date`.
    pub fn bucket(&self, date: &Expr, granularity: Granularity) -> StepResult<Expr> {
        compile_truncate(self, granularity.period(), date)
    }

    /// First day of the bucket following the one starting at `bucket`.
    pub fn next_bucket(&self, bucket: &Expr, granularity: Granularity) -> Expr {
        match granularity {
            Granularity::Day => self.shift(bucket, 1, ShiftUnit::Day),
            Granularity::Week => self.shift(bucket, 7, ShiftUnit::Day),
            Granularity::Month => self.shift(bucket, 1, ShiftUnit::Month),
            Granularity::Year => self.shift(bucket, 1, ShiftUnit::Year),
        }
    }

    /// `date` moved by `amount` units.
    pub fn shift(&self, date: &Expr, amount: i64, unit: ShiftUnit) -> Expr {
        let date = date.clone();
        match self.flavor() {
            DateFlavor::Ansi => {
                let interval = Expr::Interval {
                    amount: Box::new(lit_int(amount.abs())),
                    unit: unit.keyword(),
                };
                if amount < 0 {
                    date.sub(interval)
                } else {
                    date.add(interval)
                }
            }
            DateFlavor::Snowflake | DateFlavor::TSql => {
                func("DATEADD", vec![keyword(unit.keyword()), lit_int(amount), date])
            }
            DateFlavor::BigQuery => func(
                "DATETIME_ADD",
                vec![as_datetime(date), interval(amount, unit.keyword())],
            ),
            DateFlavor::MySql => func("DATE_ADD", vec![date, interval(amount, unit.keyword())]),
            DateFlavor::Spark => match unit {
                ShiftUnit::Day => func("DATE_ADD", vec![date, lit_int(amount)]),
                ShiftUnit::Month => func("ADD_MONTHS", vec![date, lit_int(amount)]),
                ShiftUnit::Year => func("ADD_MONTHS", vec![date, lit_int(amount * 12)]),
            },
        }
    }

    fn ansi_part(&self, part: DatePart, date: Expr) -> Option<Expr> {
        let field = match part {
            DatePart::Year => "YEAR",
            DatePart::Month => "MONTH",
            DatePart::Day => "DAY",
            DatePart::Quarter => "QUARTER",
            DatePart::DayOfYear => "DOY",
            DatePart::IsoYear => "ISOYEAR",
            DatePart::IsoWeek => "WEEK",
            DatePart::IsoDayOfWeek => "ISODOW",
            DatePart::Hour => "HOUR",
            DatePart::Minutes => "MINUTE",
            DatePart::Seconds => return Some(func("FLOOR", vec![extract("SECOND", date)])),
            DatePart::Milliseconds => {
                let millis = extract("MILLISECONDS", date).modulo(lit_int(1000));
                return Some(func("FLOOR", vec![millis]));
            }
            DatePart::Week | DatePart::DayOfWeek => return None,
        };
        Some(extract(field, date))
    }

    fn snowflake_part(&self, part: DatePart, date: Expr) -> Option<Expr> {
        let name = match part {
            DatePart::Year => "YEAR",
            DatePart::Month => "MONTH",
            DatePart::Day => "DAY",
            DatePart::Quarter => "QUARTER",
            DatePart::DayOfYear => "DAYOFYEAR",
            DatePart::IsoYear => "YEAROFWEEKISO",
            DatePart::IsoWeek => "WEEKISO",
            DatePart::IsoDayOfWeek => "DAYOFWEEKISO",
            DatePart::Hour => "HOUR",
            DatePart::Minutes => "MINUTE",
            DatePart::Seconds => "SECOND",
            DatePart::Milliseconds => {
                let nanos = func("DATE_PART", vec![keyword("NANOSECOND"), date]);
                return Some(func("FLOOR", vec![nanos.div(lit_int(1_000_000))]));
            }
            // WEEK and DAYOFWEEK depend on session parameters.
            DatePart::Week | DatePart::DayOfWeek => return None,
        };
        Some(func(name, vec![date]))
    }

    fn bigquery_part(&self, part: DatePart, date: Expr) -> Option<Expr> {
        let field = match part {
            DatePart::Year => "YEAR",
            DatePart::Month => "MONTH",
            DatePart::Day => "DAY",
            DatePart::Week => "WEEK",
            DatePart::Quarter => "QUARTER",
            DatePart::DayOfWeek => "DAYOFWEEK",
            DatePart::DayOfYear => "DAYOFYEAR",
            DatePart::IsoYear => "ISOYEAR",
            DatePart::IsoWeek => "ISOWEEK",
            DatePart::IsoDayOfWeek => {
                let sunday_first = extract("DAYOFWEEK", date);
                return Some(sunday_first.add(lit_int(5)).modulo(lit_int(7)).add(lit_int(1)));
            }
            DatePart::Hour => "HOUR",
            DatePart::Minutes => "MINUTE",
            DatePart::Seconds => "SECOND",
            DatePart::Milliseconds => "MILLISECOND",
        };
        Some(extract(field, date))
    }

    fn mysql_part(&self, part: DatePart, date: Expr) -> Option<Expr> {
        let expr = match part {
            DatePart::Year => func("YEAR", vec![date]),
            DatePart::Month => func("MONTH", vec![date]),
            DatePart::Day => func("DAYOFMONTH", vec![date]),
            // Mode 0: Sunday start, 0-53, week 1 starts on the first Sunday.
            DatePart::Week => func("WEEK", vec![date, lit_int(0)]),
            DatePart::Quarter => func("QUARTER", vec![date]),
            DatePart::DayOfWeek => func("DAYOFWEEK", vec![date]),
            DatePart::DayOfYear => func("DAYOFYEAR", vec![date]),
            DatePart::IsoYear => func(
                "FLOOR",
                vec![func("YEARWEEK", vec![date, lit_int(3)]).div(lit_int(100))],
            ),
            DatePart::IsoWeek => func("WEEK", vec![date, lit_int(3)]),
            DatePart::IsoDayOfWeek => func("WEEKDAY", vec![date]).add(lit_int(1)),
            DatePart::Hour => func("HOUR", vec![date]),
            DatePart::Minutes => func("MINUTE", vec![date]),
            DatePart::Seconds => func("SECOND", vec![date]),
            DatePart::Milliseconds => func(
                "FLOOR",
                vec![func("MICROSECOND", vec![date]).div(lit_int(1000))],
            ),
        };
        Some(expr)
    }

    fn tsql_part(&self, part: DatePart, date: Expr) -> Option<Expr> {
        let datepart = |unit: &'static str, date: Expr| func("DATEPART", vec![keyword(unit), date]);
        let expr = match part {
            DatePart::Year => datepart("YEAR", date),
            DatePart::Month => datepart("MONTH", date),
            DatePart::Day => datepart("DAY", date),
            DatePart::Quarter => datepart("QUARTER", date),
            DatePart::DayOfYear => datepart("DAYOFYEAR", date),
            DatePart::IsoWeek => datepart("ISO_WEEK", date),
            DatePart::IsoYear => {
                // The Thursday of the ISO week decides its year.
                let offset = lit_int(26).sub(datepart("ISO_WEEK", date.clone()));
                func(
                    "YEAR",
                    vec![func("DATEADD", vec![keyword("DAY"), offset, date])],
                )
            }
            DatePart::IsoDayOfWeek => {
                let weekday = datepart("WEEKDAY", date)
                    .add(raw_sql("@@DATEFIRST"))
                    .sub(lit_int(2));
                Expr::Paren(Box::new(weekday))
                    .modulo(lit_int(7))
                    .add(lit_int(1))
            }
            DatePart::Hour => datepart("HOUR", date),
            DatePart::Minutes => datepart("MINUTE", date),
            DatePart::Seconds => datepart("SECOND", date),
            DatePart::Milliseconds => datepart("MILLISECOND", date),
            // WEEK and WEEKDAY depend on @@DATEFIRST.
            DatePart::Week | DatePart::DayOfWeek => return None,
        };
        Some(expr)
    }

    fn spark_part(&self, part: DatePart, date: Expr) -> Option<Expr> {
        let expr = match part {
            DatePart::Year => func("YEAR", vec![date]),
            DatePart::Month => func("MONTH", vec![date]),
            DatePart::Day => func("DAY", vec![date]),
            DatePart::Quarter => func("QUARTER", vec![date]),
            DatePart::DayOfWeek => func("DAYOFWEEK", vec![date]),
            DatePart::DayOfYear => func("DAYOFYEAR", vec![date]),
            DatePart::IsoYear => extract("YEAROFWEEK", date),
            DatePart::IsoWeek => func("WEEKOFYEAR", vec![date]),
            DatePart::IsoDayOfWeek => extract("DAYOFWEEK_ISO", date),
            DatePart::Hour => func("HOUR", vec![date]),
            DatePart::Minutes => func("MINUTE", vec![date]),
            DatePart::Seconds => func("SECOND", vec![date]),
            DatePart::Milliseconds => func("DATE_FORMAT", vec![date, lit_str("SSS")]).cast("INT"),
            DatePart::Week => return None,
        };
        Some(expr)
    }

    fn mysql_truncate(&self, period: Period, date: Expr) -> Expr {
        let day = func("DATE", vec![date.clone()]);
        match period {
            Period::Day => day,
            Period::IsoWeek => func(
                "DATE_SUB",
                vec![day, interval_expr(func("WEEKDAY", vec![date]), "DAY")],
            ),
            Period::Week => func(
                "DATE_SUB",
                vec![
                    day,
                    interval_expr(func("DAYOFWEEK", vec![date]).sub(lit_int(1)), "DAY"),
                ],
            ),
            Period::Month => func("DATE_FORMAT", vec![date, lit_str("%Y-%m-01")]).cast("DATE"),
            Period::Year => func("DATE_FORMAT", vec![date, lit_str("%Y-01-01")]).cast("DATE"),
            Period::Quarter => {
                let year_start = func("MAKEDATE", vec![func("YEAR", vec![date.clone()]), lit_int(1)]);
                year_start.add(interval_expr(
                    func("QUARTER", vec![date]).sub(lit_int(1)),
                    "QUARTER",
                ))
            }
        }
    }
}

impl DateBackend for SqlDates {
    type Expr = Expr;

    fn part(&self, part: DatePart, date: &Expr) -> Option<Expr> {
        let date = date.clone();
        match self.flavor() {
            DateFlavor::Ansi => self.ansi_part(part, date),
            DateFlavor::Snowflake => self.snowflake_part(part, date),
            DateFlavor::BigQuery => self.bigquery_part(part, date),
            DateFlavor::MySql => self.mysql_part(part, date),
            DateFlavor::TSql => self.tsql_part(part, date),
            DateFlavor::Spark => self.spark_part(part, date),
        }
    }

    fn truncate(&self, period: Period, date: &Expr) -> Option<Expr> {
        let date = date.clone();
        let unit = match (self.flavor(), period) {
            (DateFlavor::MySql, _) => return Some(self.mysql_truncate(period, date)),
            (DateFlavor::BigQuery, Period::Week) => "WEEK",
            (DateFlavor::TSql, Period::IsoWeek) => "ISO_WEEK",
            (DateFlavor::BigQuery, Period::IsoWeek) => "ISOWEEK",
            (_, Period::Week) => return None,
            (_, Period::IsoWeek) => "WEEK",
            (_, Period::Day) => "DAY",
            (_, Period::Month) => "MONTH",
            (_, Period::Quarter) => "QUARTER",
            (_, Period::Year) => "YEAR",
        };
        let expr = match self.flavor() {
            DateFlavor::Ansi => func("DATE_TRUNC", vec![lit_str(&unit.to_lowercase()), date]),
            DateFlavor::Snowflake | DateFlavor::Spark => {
                func("DATE_TRUNC", vec![lit_str(unit), date])
            }
            DateFlavor::BigQuery => func("DATETIME_TRUNC", vec![as_datetime(date), keyword(unit)]),
            DateFlavor::TSql => func("DATETRUNC", vec![keyword(unit), date]),
            DateFlavor::MySql => return None,
        };
        Some(expr)
    }

    fn add_days(&self, date: &Expr, days: i64) -> Expr {
        self.shift(date, days, ShiftUnit::Day)
    }

    fn int(&self, value: i64) -> Expr {
        lit_int(value)
    }

    fn add(&self, left: Expr, right: Expr) -> Expr {
        left.add(right)
    }

    fn sub(&self, left: Expr, right: Expr) -> Expr {
        left.sub(right)
    }

    fn modulo(&self, value: Expr, divisor: i64) -> Expr {
        value.modulo(lit_int(divisor))
    }

    fn div_floor(&self, value: Expr, divisor: i64) -> Expr {
        func("FLOOR", vec![value.div(lit_int(divisor))])
    }
}

fn extract(field: &'static str, date: Expr) -> Expr {
    Expr::Extract {
        field,
        expr: Box::new(date),
    }
}

fn interval(amount: i64, unit: &'static str) -> Expr {
    interval_expr(lit_int(amount), unit)
}

fn interval_expr(amount: Expr, unit: &'static str) -> Expr {
    Expr::Interval {
        amount: Box::new(amount),
        unit,
    }
}

fn as_datetime(date: Expr) -> Expr {
    date.cast("DATETIME")
}
