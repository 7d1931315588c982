use insta::assert_snapshot;
use serde_json::json;
use stepforge::config::Settings;
use stepforge::step::{
    AddMissingDatesStep, AppendStep, Condition, FilterStep, Granularity, Operator, PipelineRef,
    SimpleCondition,
};
use stepforge::{DocumentTranslator, Step, StepError};

#[test]
fn test_filter_pipeline() {
    let pipeline = DocumentTranslator::new()
        .translate(&[
            Step::domain("sales"),
            Step::Filter(FilterStep {
                condition: Condition::Simple(SimpleCondition::new("amount", Operator::Gt, json!(10))),
            }),
        ])
        .unwrap();
    let text = serde_json::to_string(&pipeline.to_json()).unwrap();
    assert_snapshot!(text, @r#"[{"$match":{"domain":"sales"}},{"$match":{"amount":{"$gt":10}}}]"#);
}

#[test]
fn test_settings_drive_domain_field_and_collection() {
    let settings = Settings::from_toml_str(
        "[document]\ndomain_field = \"source\"\ncollection = \"datasets\"\n",
    )
    .unwrap();
    let pipeline = DocumentTranslator::from_settings(&settings.document)
        .translate(&[
            Step::domain("sales"),
            Step::Append(AppendStep {
                pipelines: vec![PipelineRef::Domain("returns".into())],
            }),
        ])
        .unwrap();
    assert_eq!(
        pipeline.stages,
        vec![
            json!({"$match": {"source": "sales"}}),
            json!({"$unionWith": {"coll": "datasets", "pipeline": [{"$match": {"source": "returns"}}]}}),
        ]
    );
}

#[test]
fn test_gap_fill_generates_a_calendar() {
    let pipeline = DocumentTranslator::new()
        .translate(&[
            Step::domain("sales"),
            Step::AddMissingDates(AddMissingDatesStep {
                dates_column: "day".into(),
                dates_granularity: Granularity::Month,
                groups: vec!["city".into()],
            }),
        ])
        .unwrap();
    let text = pipeline.to_json().to_string();
    assert!(text.contains("\"$range\""));
    assert!(text.contains("\"$group\""));
    assert_eq!(pipeline.stages[0], json!({"$match": {"domain": "sales"}}));
}

#[test]
fn test_gap_fill_calendar_covers_every_group_and_granularity() {
    let group_sets: [&[&str]; 3] = [&[], &["city"], &["city", "region"]];
    for (granularity, unit) in [(Granularity::Month, "month"), (Granularity::Year, "year")] {
        for groups in group_sets {
            let pipeline = DocumentTranslator::new()
                .translate(&[
                    Step::domain("sales"),
                    Step::AddMissingDates(AddMissingDatesStep {
                        dates_column: "day".into(),
                        dates_granularity: granularity,
                        groups: groups.iter().map(|g| g.to_string()).collect(),
                    }),
                ])
                .unwrap();
            let stages = &pipeline.stages[1..];

            assert_eq!(
                stages[0],
                json!({"$addFields": {"__bucket": {"$dateTrunc": {"date": "$day", "unit": unit}}}})
            );
            let id = &stages[1]["$group"]["_id"];
            if groups.is_empty() {
                assert!(id.is_null());
            } else {
                let keys: Vec<&str> = id.as_object().unwrap().keys().map(|k| k.as_str()).collect();
                assert_eq!(keys, groups.to_vec());
            }

            // Every bucket from the first to the last, both included.
            let walk = &stages[2]["$addFields"]["__calendar"]["$cond"][2]["$map"];
            assert_eq!(
                walk["input"]["$range"],
                json!([0, {"$add": [{"$dateDiff": {
                    "startDate": "$__min_bucket",
                    "endDate": "$__max_bucket",
                    "unit": unit
                }}, 1]}])
            );
            assert_eq!(
                walk["in"],
                json!({"$dateAdd": {"startDate": "$__min_bucket", "unit": unit, "amount": "$$offset"}})
            );

            let synthetic = &stages[4]["$project"]["__all"]["$concatArrays"];
            assert_eq!(synthetic[0], json!("$__rows"));
            let row = synthetic[1]["$map"]["in"].as_object().unwrap();
            for g in groups {
                assert_eq!(row[*g], json!(format!("$_id.{}", g)));
            }
            assert_eq!(row["day"], json!("$$bucket"));
            assert_eq!(row.len(), groups.len() + 1);
        }
    }
}

#[test]
fn test_custom_sql_is_rejected() {
    let err = DocumentTranslator::new()
        .translate(&[
            Step::domain("sales"),
            Step::CustomSql(stepforge::step::CustomSqlStep {
                query: "SELECT 1".into(),
            }),
        ])
        .unwrap_err();
    assert_eq!((err.index, err.step), (1, "customsql"));
    assert!(matches!(
        err.source,
        StepError::UnsupportedStep {
            backend: "document",
            ..
        }
    ));
}
