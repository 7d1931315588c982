//! Calendar primitives as aggregation expressions.

use serde_json::{json, Value as JsonValue};

use crate::calendar::{compile_recipe, DateBackend, DatePart, Period};
use crate::error::StepResult;
use crate::step::{DateUnit, Granularity};

use super::expr::object;

/// Date operators of the aggregation language. All of them work in UTC.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentDates;

impl DocumentDates {
    /// Expression computing `unit` from `date`.
    pub fn unit(&self, unit: DateUnit, date: &JsonValue) -> StepResult<JsonValue> {
        compile_recipe(self, unit, date)
    }

    /// Start of the gap-fill bucket containing `date`.
    pub fn bucket(&self, date: &JsonValue, granularity: Granularity) -> JsonValue {
        match granularity {
            Granularity::Week => json!({
                "$dateTrunc": { "date": date, "unit": "week", "startOfWeek": "monday" }
            }),
            other => json!({ "$dateTrunc": { "date": date, "unit": other.as_str() } }),
        }
    }

    /// Whole buckets between two bucket starts.
    pub fn buckets_between(
        &self,
        start: &JsonValue,
        end: &JsonValue,
        granularity: Granularity,
    ) -> JsonValue {
        match granularity {
            Granularity::Week => json!({
                "$dateDiff": {
                    "startDate": start,
                    "endDate": end,
                    "unit": "week",
                    "startOfWeek": "monday"
                }
            }),
            other => json!({
                "$dateDiff": { "startDate": start, "endDate": end, "unit": other.as_str() }
            }),
        }
    }

    /// `date` moved forward by `amount` buckets.
    pub fn shift(&self, date: &JsonValue, amount: JsonValue, granularity: Granularity) -> JsonValue {
        json!({ "$dateAdd": { "startDate": date, "unit": granularity.as_str(), "amount": amount } })
    }
}

impl DateBackend for DocumentDates {
    type Expr = JsonValue;

    fn part(&self, part: DatePart, date: &JsonValue) -> Option<JsonValue> {
        let operator = match part {
            DatePart::Year => "$year",
            DatePart::Month => "$month",
            DatePart::Day => "$dayOfMonth",
            // Sunday-start weeks numbered from 0, as the calendar convention.
            DatePart::Week => "$week",
            DatePart::DayOfWeek => "$dayOfWeek",
            DatePart::DayOfYear => "$dayOfYear",
            DatePart::IsoYear => "$isoWeekYear",
            DatePart::IsoWeek => "$isoWeek",
            DatePart::IsoDayOfWeek => "$isoDayOfWeek",
            DatePart::Hour => "$hour",
            DatePart::Minutes => "$minute",
            DatePart::Seconds => "$second",
            DatePart::Milliseconds => "$millisecond",
            DatePart::Quarter => return None,
        };
        Some(object(operator, date.clone()))
    }

    fn truncate(&self, period: Period, date: &JsonValue) -> Option<JsonValue> {
        let spec = match period {
            Period::Day => json!({ "date": date, "unit": "day" }),
            Period::Week => json!({ "date": date, "unit": "week", "startOfWeek": "sunday" }),
            Period::IsoWeek => json!({ "date": date, "unit": "week", "startOfWeek": "monday" }),
            Period::Month => json!({ "date": date, "unit": "month" }),
            Period::Quarter => json!({ "date": date, "unit": "quarter" }),
            Period::Year => json!({ "date": date, "unit": "year" }),
        };
        Some(json!({ "$dateTrunc": spec }))
    }

    fn add_days(&self, date: &JsonValue, days: i64) -> JsonValue {
        json!({ "$dateAdd": { "startDate": date, "unit": "day", "amount": days } })
    }

    fn int(&self, value: i64) -> JsonValue {
        json!(value)
    }

    fn add(&self, left: JsonValue, right: JsonValue) -> JsonValue {
        json!({ "$add": [left, right] })
    }

    fn sub(&self, left: JsonValue, right: JsonValue) -> JsonValue {
        json!({ "$subtract": [left, right] })
    }

    fn modulo(&self, value: JsonValue, divisor: i64) -> JsonValue {
        // Calendar fields are positive, so `$mod` is already non-negative.
        json!({ "$mod": [value, divisor] })
    }

    fn div_floor(&self, value: JsonValue, divisor: i64) -> JsonValue {
        json!({ "$floor": { "$divide": [value, divisor] } })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_parts() {
        let d = json!("$d");
        assert_eq!(DocumentDates.unit(DateUnit::Day, &d).unwrap(), json!({"$dayOfMonth": "$d"}));
        assert_eq!(DocumentDates.unit(DateUnit::Week, &d).unwrap(), json!({"$week": "$d"}));
    }

    #[test]
    fn test_quarter_is_derived() {
        assert_eq!(
            DocumentDates.unit(DateUnit::Quarter, &json!("$d")).unwrap(),
            json!({"$floor": {"$divide": [{"$add": [{"$month": "$d"}, 2]}, 3]}})
        );
    }

    #[test]
    fn test_previous_iso_week_composes_truncation() {
        assert_eq!(
            DocumentDates.unit(DateUnit::PreviousIsoWeek, &json!("$d")).unwrap(),
            json!({"$isoWeek": {"$dateAdd": {
                "startDate": {"$dateTrunc": {"date": "$d", "unit": "week", "startOfWeek": "monday"}},
                "unit": "day",
                "amount": -1
            }}})
        );
    }

    #[test]
    fn test_weekly_buckets_start_on_monday() {
        assert_eq!(
            DocumentDates.bucket(&json!("$d"), Granularity::Week),
            json!({"$dateTrunc": {"date": "$d", "unit": "week", "startOfWeek": "monday"}})
        );
    }
}
