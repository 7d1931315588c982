//! `addmissingdates`: one row per calendar bucket between each group's first
//! and last bucket.
//!
//! Original rows are kept untouched. Every bucket of a group's range that no
//! original row falls into gets a synthetic row holding the group values and
//! the bucket date; every other column is null. Buckets follow the local
//! time of each date. In a text column, synthetic dates are written in the
//! shape of the group's first date.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, FixedOffset, SecondsFormat};
use polars::prelude::{DataFrame, DataType};
use tracing::debug;

use crate::error::{StepError, StepResult};
use crate::step::AddMissingDatesStep;
use crate::tabular::value::is_bare_date;
use crate::tabular::{FrameExt, TabularDates, Value};

use super::contains;

/// Per group: buckets holding an original row, and whether its dates are
/// bare `YYYY-MM-DD` text.
#[derive(Default)]
struct Range {
    present: BTreeSet<DateTime<FixedOffset>>,
    bare: Option<bool>,
}

pub fn add_missing_dates(step: &AddMissingDatesStep, frame: DataFrame) -> StepResult<DataFrame> {
    let name = frame.resolve(&step.dates_column)?;
    let groups = frame.resolve_all(&step.groups)?;
    if contains(&step.groups, &name) {
        return Err(StepError::invalid(
            "the date column cannot also be a group column",
        ));
    }
    let textual = match frame.column(&name)?.dtype() {
        DataType::String => true,
        DataType::Datetime(_, _) | DataType::Date | DataType::Null => false,
        other => {
            return Err(StepError::Type(format!(
                "column '{}' has type {}, expected a date",
                name, other
            )))
        }
    };

    let columns = frame.column_names();
    let position = |c: &String| columns.iter().position(|n| n == c);
    let date = position(&name).ok_or_else(|| StepError::invalid("date column vanished"))?;
    let group_cols: Vec<usize> = groups.iter().filter_map(position).collect();

    let granularity = step.dates_granularity;
    let mut rows: Vec<(Vec<Value>, Option<DateTime<FixedOffset>>, Vec<Value>)> = Vec::new();
    let mut ranges: BTreeMap<Vec<Value>, Range> = BTreeMap::new();
    for row in frame.cells() {
        let key: Vec<Value> = group_cols.iter().map(|&g| row[g].clone()).collect();
        let instant = as_date(&name, &row[date])?;
        if let Some(bucket) = instant.and_then(|d| TabularDates.bucket(d, granularity)) {
            let range = ranges.entry(key.clone()).or_default();
            range.present.insert(bucket);
            if range.bare.is_none() {
                range.bare = row[date].as_str().map(is_bare_date);
            }
        }
        rows.push((key, instant, row));
    }

    let mut added = 0usize;
    for (key, range) in &ranges {
        let (Some(&first), Some(&last)) = (range.present.first(), range.present.last()) else {
            continue;
        };
        let mut current = Some(first);
        while let Some(bucket) = current.filter(|b| *b <= last) {
            if !range.present.contains(&bucket) {
                let mut row = vec![Value::Null; columns.len()];
                for (&g, value) in group_cols.iter().zip(key) {
                    row[g] = value.clone();
                }
                row[date] = if !textual {
                    Value::Date(bucket)
                } else if range.bare == Some(true) {
                    Value::Text(bucket.format("%Y-%m-%d").to_string())
                } else {
                    Value::Text(bucket.to_rfc3339_opts(SecondsFormat::Millis, true))
                };
                rows.push((key.clone(), Some(bucket), row));
                added += 1;
            }
            current = TabularDates.next_bucket(bucket, granularity);
        }
    }
    debug!(
        groups = ranges.len(),
        added,
        granularity = granularity.as_str(),
        "filled missing dates"
    );

    rows.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
    DataFrame::from_cells(&columns, rows.into_iter().map(|(_, _, row)| row).collect())
}

fn as_date(column: &str, cell: &Value) -> StepResult<Option<DateTime<FixedOffset>>> {
    match cell {
        Value::Null => Ok(None),
        Value::Date(d) => Ok(Some(*d)),
        Value::Text(_) => cell.as_date().map(Some).ok_or_else(|| {
            StepError::Type(format!("column '{}' holds '{}', expected a date", column, cell))
        }),
        other => Err(StepError::Type(format!(
            "column '{}' has type {}, expected a date",
            column,
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::{ConvertStep, ConvertType, Granularity, Step};
    use crate::tabular::steps::test_support::{records, run};
    use serde_json::{json, Value as JsonValue};

    fn fill(granularity: Granularity, groups: &[&str]) -> Step {
        Step::AddMissingDates(AddMissingDatesStep {
            dates_column: "day".into(),
            dates_granularity: granularity,
            groups: groups.iter().map(|g| g.to_string()).collect(),
        })
    }

    fn days(out: &[JsonValue]) -> Vec<&str> {
        out.iter().filter_map(|r| r["day"].as_str()).collect()
    }

    #[test]
    fn test_daily_fill() {
        let out = records(
            &[
                json!({"day": "2024-01-03", "value": 3}),
                json!({"day": "2024-01-01", "value": 1}),
            ],
            fill(Granularity::Day, &[]),
        )
        .unwrap();
        assert_eq!(
            out,
            vec![
                json!({"day": "2024-01-01", "value": 1}),
                json!({"day": "2024-01-02", "value": null}),
                json!({"day": "2024-01-03", "value": 3}),
            ]
        );
    }

    #[test]
    fn test_groups_have_their_own_range() {
        let out = records(
            &[
                json!({"day": "2024-01-15", "country": "FR", "value": 1}),
                json!({"day": "2024-03-02", "country": "FR", "value": 2}),
                json!({"day": "2024-02-10", "country": "DE", "value": 3}),
                json!({"day": "2024-02-20", "country": "DE", "value": 4}),
            ],
            fill(Granularity::Month, &["country"]),
        )
        .unwrap();
        assert_eq!(out.len(), 5);
        assert_eq!(out[2], json!({"day": "2024-01-15", "country": "FR", "value": 1}));
        assert_eq!(out[3], json!({"day": "2024-02-01", "country": "FR", "value": null}));
        assert_eq!(days(&out)[..2], ["2024-02-10", "2024-02-20"]);
    }

    #[test]
    fn test_weeks_start_on_monday() {
        let out = records(
            &[json!({"day": "2024-03-14", "v": 1}), json!({"day": "2024-03-27", "v": 2})],
            fill(Granularity::Week, &[]),
        )
        .unwrap();
        assert_eq!(
            days(&out),
            vec!["2024-03-14", "2024-03-18", "2024-03-27"]
        );
    }

    #[test]
    fn test_rejects_grouping_on_date_and_non_dates() {
        let err = records(&[json!({"day": "2024-01-01"})], fill(Granularity::Day, &["day"])).unwrap_err();
        assert!(matches!(err.source, StepError::InvalidStep(_)));
        let err = records(&[json!({"day": 12})], fill(Granularity::Day, &[])).unwrap_err();
        assert!(matches!(err.source, StepError::Type(_)));
    }

    #[test]
    fn test_fill_follows_local_days() {
        let input = vec![
            json!({"day": "2024-01-01T22:00:00-05:00", "v": 1}),
            json!({"day": "2024-01-03T22:00:00-05:00", "v": 3}),
        ];
        let out = records(&input, fill(Granularity::Day, &[])).unwrap();
        assert_eq!(
            out,
            vec![
                json!({"day": "2024-01-01T22:00:00-05:00", "v": 1}),
                json!({"day": "2024-01-02T00:00:00.000-05:00", "v": null}),
                json!({"day": "2024-01-03T22:00:00-05:00", "v": 3}),
            ]
        );
    }

    #[test]
    fn test_fill_on_a_date_column() {
        let out = run(
            &[json!({"day": "2024-01-01"}), json!({"day": "2024-01-03"})],
            vec![
                Step::Convert(ConvertStep {
                    columns: vec!["day".into()],
                    data_type: ConvertType::Date,
                }),
                fill(Granularity::Day, &[]),
            ],
        )
        .unwrap();
        assert_eq!(
            days(&out.to_records()),
            vec![
                "2024-01-01T00:00:00.000Z",
                "2024-01-02T00:00:00.000Z",
                "2024-01-03T00:00:00.000Z"
            ]
        );
    }
}
