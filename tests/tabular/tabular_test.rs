use serde_json::{json, Value as JsonValue};
use stepforge::error::CollaboratorError;
use chrono::{Datelike, Duration, NaiveDate};
use stepforge::tabular::{execute, DataFrame, FrameExt, InMemoryDomains};
use stepforge::{parse_pipeline, Step, StepError, TabularExecutor};

fn domains(records: &[JsonValue]) -> InMemoryDomains {
    InMemoryDomains::new().with("sales", DataFrame::from_records(records).unwrap())
}

fn run(records: &[JsonValue], pipeline: &str) -> Vec<JsonValue> {
    let steps = parse_pipeline(pipeline).unwrap();
    execute(&steps, &domains(records)).unwrap().to_records()
}

#[test]
fn test_daily_gap_fill() {
    let out = run(
        &[
            json!({"day": "2024-01-01", "value": 1}),
            json!({"day": "2024-01-03", "value": 3}),
        ],
        r#"[
            {"name": "domain", "domain": "sales"},
            {"name": "addmissingdates", "datesColumn": "day", "datesGranularity": "day"}
        ]"#,
    );
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
fn test_waterfall_bridge() {
    let records = [
        json!({"city": "A", "year": 2019, "revenue": 10}),
        json!({"city": "A", "year": 2020, "revenue": 15}),
        json!({"city": "B", "year": 2019, "revenue": 5}),
        json!({"city": "B", "year": 2020, "revenue": 5}),
    ];
    let out = run(
        &records,
        r#"[
            {"name": "domain", "domain": "sales"},
            {"name": "waterfall", "valueColumn": "revenue", "milestonesColumn": "year",
             "start": 2019, "end": 2020, "labelsColumn": "city",
             "sortBy": "value", "order": "desc"}
        ]"#,
    );
    let bridge: Vec<(JsonValue, JsonValue)> = out
        .iter()
        .map(|r| (r["city"].clone(), r["revenue"].clone()))
        .collect();
    assert_eq!(
        bridge,
        vec![
            (json!("2019"), json!(15)),
            (json!("A"), json!(5)),
            (json!("B"), json!(0)),
            (json!("2020"), json!(20)),
        ]
    );
}

#[test]
fn test_rename_then_select_is_deterministic() {
    let records = [
        json!({"city": "Paris", "revenue": 3, "extra": true}),
        json!({"city": "Lyon", "revenue": 4, "extra": false}),
    ];
    let pipeline = r#"[
        {"name": "domain", "domain": "sales"},
        {"name": "rename", "toRename": [["city", "town"]]},
        {"name": "select", "columns": ["town", "revenue"]}
    ]"#;
    let first = run(&records, pipeline);
    assert_eq!(first, run(&records, pipeline));
    assert_eq!(
        first,
        vec![json!({"town": "Paris", "revenue": 3}), json!({"town": "Lyon", "revenue": 4})]
    );
}

#[test]
fn test_closure_retriever_and_errors() {
    let retriever = |domain: &str| -> Result<DataFrame, CollaboratorError> {
        match domain {
            "sales" => Ok(DataFrame::from_records(&[json!({"a": 1})])?),
            other => Err(format!("no such domain: {}", other).into()),
        }
    };
    let executor = TabularExecutor::new(&retriever);

    let frame = executor.execute(&[Step::domain("sales")]).unwrap();
    assert_eq!(frame.to_records(), vec![json!({"a": 1})]);

    let err = executor.execute(&[Step::domain("missing")]).unwrap_err();
    assert_eq!((err.index, err.step), (0, "domain"));
    assert!(matches!(err.source, StepError::Collaborator(_)));
}

#[test]
fn test_waterfall_pins_totals_to_the_edges() {
    let records = [
        json!({"label": "A", "milestone": "start", "value": 10}),
        json!({"label": "A", "milestone": "end", "value": 15}),
        json!({"label": "B", "milestone": "start", "value": 5}),
        json!({"label": "B", "milestone": "end", "value": 5}),
        json!({"label": "C", "milestone": "start", "value": 4}),
    ];
    let pipeline = |backfill: bool| {
        format!(
            r#"[
                {{"name": "domain", "domain": "sales"}},
                {{"name": "waterfall", "valueColumn": "value", "milestonesColumn": "milestone",
                  "start": "start", "end": "end", "labelsColumn": "label",
                  "sortBy": "label", "order": "asc", "backfill": {}}}
            ]"#,
            backfill
        )
    };
    let labels = |out: &[JsonValue]| -> Vec<(JsonValue, JsonValue)> {
        out.iter()
            .map(|r| (r["label"].clone(), r["value"].clone()))
            .collect()
    };

    assert_eq!(
        labels(&run(&records, &pipeline(true))),
        vec![
            (json!("start"), json!(19)),
            (json!("A"), json!(5)),
            (json!("B"), json!(0)),
            (json!("C"), json!(-4)),
            (json!("end"), json!(20)),
        ]
    );
    assert_eq!(
        labels(&run(&records, &pipeline(false))),
        vec![
            (json!("start"), json!(15)),
            (json!("A"), json!(5)),
            (json!("B"), json!(0)),
            (json!("end"), json!(20)),
        ]
    );
}

fn gap_fill(granularity: &str, groups: &[&str]) -> String {
    format!(
        r#"[
            {{"name": "domain", "domain": "sales"}},
            {{"name": "addmissingdates", "datesColumn": "day", "datesGranularity": "{}",
              "groups": {}}}
        ]"#,
        granularity,
        json!(groups)
    )
}

/// `count` consecutive bucket starts from `start`.
fn buckets(granularity: &str, start: NaiveDate, count: usize) -> Vec<NaiveDate> {
    let mut dates = vec![start];
    while dates.len() < count {
        let last = dates[dates.len() - 1];
        let next = match granularity {
            "day" => last + Duration::days(1),
            "week" => last + Duration::days(7),
            "month" => last.checked_add_months(chrono::Months::new(1)).unwrap(),
            _ => last.checked_add_months(chrono::Months::new(12)).unwrap(),
        };
        dates.push(next);
    }
    dates
}

fn key(record: &JsonValue) -> (String, String) {
    (
        record["country"].as_str().unwrap_or_default().to_string(),
        record["day"].as_str().unwrap_or_default().to_string(),
    )
}

#[test]
fn test_gap_fill_leaves_dense_input_alone() {
    let starts = [
        ("day", NaiveDate::from_ymd_opt(2024, 2, 27).unwrap()),
        ("week", NaiveDate::from_ymd_opt(2024, 12, 23).unwrap()),
        ("month", NaiveDate::from_ymd_opt(2023, 11, 1).unwrap()),
        ("year", NaiveDate::from_ymd_opt(2019, 1, 1).unwrap()),
    ];
    for (granularity, start) in starts {
        for count in [1, 2, 5] {
            let mut records = Vec::new();
            for (i, country) in ["FR", "DE"].iter().enumerate() {
                for (n, date) in buckets(granularity, start, count + i).iter().enumerate() {
                    records.push(json!({
                        "country": country,
                        "day": date.format("%Y-%m-%d").to_string(),
                        "value": n,
                    }));
                }
            }
            // Reverse so the output order is the fill's own doing.
            records.reverse();
            let out = run(&records, &gap_fill(granularity, &["country"]));
            let mut expected = records.clone();
            expected.sort_by_key(key);
            assert_eq!(out, expected, "{} x {}", granularity, count);
        }
    }
}

#[test]
fn test_gap_fill_never_rewrites_original_rows() {
    let inputs = vec![
        vec![
            json!({"country": "FR", "day": "2024-01-01T22:00:00-05:00", "value": 1}),
            json!({"country": "FR", "day": "2024-01-05T08:30:00+02:00", "value": 2}),
            json!({"country": "DE", "day": "2024-01-03", "value": 3}),
        ],
        vec![
            json!({"country": "FR", "day": "2024-03-31T23:59:59Z", "value": 1}),
            json!({"country": "FR", "day": "2024-06-15", "value": 2}),
            json!({"country": "DE", "day": "2023-12-31T23:00:00-01:00", "value": null}),
        ],
    ];
    for granularity in ["day", "week", "month", "year"] {
        for records in &inputs {
            let out = run(records, &gap_fill(granularity, &["country"]));
            assert!(out.len() >= records.len());
            for record in records {
                assert!(out.contains(record), "{} lost {}", granularity, record);
            }
            let added = out.iter().filter(|r| !records.contains(r));
            for row in added {
                assert_eq!(row["value"], json!(null), "{}", granularity);
            }
        }
    }
}

#[test]
fn test_gap_fill_covers_every_month_and_year_per_group() {
    let records = [
        json!({"country": "FR", "day": "2022-11-20", "value": 1}),
        json!({"country": "FR", "day": "2024-02-03", "value": 2}),
        json!({"country": "DE", "day": "2023-05-09", "value": 3}),
        json!({"country": "DE", "day": "2023-08-30", "value": 4}),
        json!({"country": "IT", "day": "2021-07-01", "value": 5}),
    ];
    let expected = [("month", [16usize, 4, 1]), ("year", [3, 1, 1])];
    for (granularity, counts) in expected {
        let out = run(&records, &gap_fill(granularity, &["country"]));
        for (country, count) in ["FR", "DE", "IT"].iter().zip(counts) {
            let periods: Vec<(i32, u32)> = out
                .iter()
                .filter(|r| r["country"] == json!(country))
                .map(|r| {
                    let day = NaiveDate::parse_from_str(r["day"].as_str().unwrap(), "%Y-%m-%d")
                        .unwrap();
                    (day.year(), if granularity == "month" { day.month() } else { 0 })
                })
                .collect();
            let mut distinct = periods.clone();
            distinct.dedup();
            assert_eq!(distinct, periods, "{} {} has a bucket twice", granularity, country);
            assert_eq!(periods.len(), count, "{} {}", granularity, country);
        }
    }
}
