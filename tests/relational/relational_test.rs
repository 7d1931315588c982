use insta::assert_snapshot;
use serde_json::{json, Value as JsonValue};
use sqlparser::ast::{SetExpr, Statement};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use stepforge::error::CollaboratorError;
use stepforge::relational::{SqlTranslator, Translation};
use stepforge::sql::DataType;
use stepforge::step::{
    AddMissingDatesStep, ColumnsStep, Granularity, RenameStep, SortOrder, WaterfallSortBy,
    WaterfallStep,
};
use stepforge::{parse_pipeline, Dialect, PipelineError, Step, StepError};

/// Domain `sales(day, city, region, year, revenue)`.
fn translate(steps: &[Step], dialect: Dialect) -> Result<Translation, PipelineError> {
    let retriever = |d: &str| -> Result<String, CollaboratorError> { Ok(d.to_string()) };
    let describer = |_: &str| -> Result<Vec<(String, String)>, CollaboratorError> {
        Ok(vec![
            ("day".into(), "timestamp".into()),
            ("city".into(), "text".into()),
            ("region".into(), "text".into()),
            ("year".into(), "int".into()),
            ("revenue".into(), "int".into()),
        ])
    };
    let executor = |_: &str| -> Result<Vec<Vec<JsonValue>>, CollaboratorError> { Ok(vec![]) };
    SqlTranslator::new(&retriever, &describer, &executor, dialect).translate(steps)
}

fn names(t: &Translation) -> Vec<&str> {
    t.columns.iter().map(|c| c.name.as_str()).collect()
}

fn parses(sql: &str) {
    if let Err(e) = Parser::parse_sql(&PostgreSqlDialect {}, sql) {
        panic!("invalid SQL: {}\n{}", e, sql);
    }
}

fn waterfall(backfill: bool) -> Step {
    Step::Waterfall(WaterfallStep {
        value_column: "revenue".into(),
        milestones_column: "year".into(),
        start: json!(2019),
        end: json!(2020),
        labels_column: "city".into(),
        parents_column: None,
        groupby: vec![],
        sort_by: WaterfallSortBy::Value,
        order: SortOrder::Desc,
        backfill,
    })
}

#[test]
fn test_domain_only() {
    let t = translate(&[Step::domain("sales")], Dialect::Postgres).unwrap();
    assert_snapshot!(t.sql, @r#"
    WITH "DOMAIN_STEP_0" AS (
    SELECT
      "day",
      "city",
      "region",
      "year",
      "revenue"
    FROM sales
    )
    SELECT
      "day",
      "city",
      "region",
      "year",
      "revenue"
    FROM "DOMAIN_STEP_0"
    "#);
}

#[test]
fn test_translation_is_deterministic() {
    let steps = vec![
        Step::domain("sales"),
        Step::Rename(RenameStep {
            to_rename: vec![("city".into(), "town".into())],
        }),
        Step::Select(ColumnsStep {
            columns: vec!["town".into(), "revenue".into()],
        }),
    ];
    let first = translate(&steps, Dialect::Postgres).unwrap();
    let second = translate(&steps, Dialect::Postgres).unwrap();
    assert_eq!(first.sql, second.sql);
    assert_eq!(names(&first), vec!["town", "revenue"]);
    parses(&first.sql);
}

#[test]
fn test_rename_then_select_round_trip() {
    let retriever = |d: &str| -> Result<String, CollaboratorError> { Ok(d.to_string()) };
    let describer = |_: &str| -> Result<Vec<(String, String)>, CollaboratorError> {
        Ok(vec![("a".into(), "int".into()), ("c".into(), "text".into())])
    };
    let executor = |_: &str| -> Result<Vec<Vec<JsonValue>>, CollaboratorError> { Ok(vec![]) };
    let translator = SqlTranslator::new(&retriever, &describer, &executor, Dialect::DuckDb);
    let steps = vec![
        Step::domain("t"),
        Step::Rename(RenameStep {
            to_rename: vec![("a".into(), "b".into())],
        }),
        Step::Select(ColumnsStep {
            columns: vec!["b".into()],
        }),
    ];
    let first = translator.translate(&steps).unwrap();
    let second = translator.translate(&steps).unwrap();
    assert_eq!(first.sql, second.sql);
    assert_eq!(names(&first), vec!["b"]);
    assert_eq!(first.columns[0].sql_type, DataType::Int32);
}

#[test]
fn test_pipeline_from_json() {
    let steps = parse_pipeline(
        r#"[
            {"name": "domain", "domain": "sales"},
            {"name": "filter", "condition": {"column": "revenue", "operator": "gt", "value": 10}},
            {"name": "sort", "columns": [{"column": "revenue", "order": "desc"}]}
        ]"#,
    )
    .unwrap();
    let t = translate(&steps, Dialect::Postgres).unwrap();
    assert!(t.sql.ends_with("ORDER BY \"revenue\" DESC"));
    assert_eq!(t.report.steps.len(), 3);
    parses(&t.sql);
}

#[test]
fn test_gap_fill_needs_recursive_ctes() {
    let fill = Step::AddMissingDates(AddMissingDatesStep {
        dates_column: "day".into(),
        dates_granularity: Granularity::Day,
        groups: vec!["city".into()],
    });
    let steps = vec![Step::domain("sales"), fill];

    let t = translate(&steps, Dialect::Postgres).unwrap();
    assert!(t.sql.starts_with("WITH RECURSIVE "));
    assert_eq!(names(&t), vec!["day", "city", "region", "year", "revenue"]);
    parses(&t.sql);

    let err = translate(&steps, Dialect::MySql).unwrap_err();
    assert_eq!(err.index, 1);
    assert_eq!(err.step, "addmissingdates");
    assert!(matches!(
        err.source,
        StepError::MissingCapability {
            dialect: "mysql",
            ..
        }
    ));
}

/// CTE names in definition order, each with the SQL of its body.
fn cte_bodies(sql: &str) -> Vec<(String, String)> {
    let statements = Parser::parse_sql(&PostgreSqlDialect {}, sql).unwrap();
    let Statement::Query(query) = &statements[0] else {
        panic!("not a query: {}", sql);
    };
    let with = query.with.as_ref().expect("a WITH clause");
    with.cte_tables
        .iter()
        .map(|cte| (cte.alias.name.value.to_uppercase(), cte.query.to_string()))
        .collect()
}

/// Each CTE body only names CTEs defined before it, or itself when the
/// chain is recursive.
fn assert_no_forward_references(sql: &str) {
    let ctes = cte_bodies(sql);
    for (i, (name, body)) in ctes.iter().enumerate() {
        let body = body.to_uppercase();
        for (later, _) in &ctes[i + 1..] {
            assert!(
                !body.contains(&format!("\"{}\"", later)),
                "{} reads {} before it is defined",
                name,
                later
            );
        }
    }
}

#[test]
fn test_gap_fill_calendar_covers_every_group_and_granularity() {
    let group_sets: [&[&str]; 3] = [&[], &["city"], &["city", "region"]];
    for (granularity, unit) in [(Granularity::Month, "month"), (Granularity::Year, "year")] {
        for groups in group_sets {
            let fill = Step::AddMissingDates(AddMissingDatesStep {
                dates_column: "day".into(),
                dates_granularity: granularity,
                groups: groups.iter().map(|g| g.to_string()).collect(),
            });
            let steps = vec![Step::domain("sales"), fill];
            let t = translate(&steps, Dialect::Postgres).unwrap();
            parses(&t.sql);
            assert_no_forward_references(&t.sql);
            assert_eq!(names(&t), vec!["day", "city", "region", "year", "revenue"]);

            let ctes = cte_bodies(&t.sql);
            let bounds = &ctes.iter().find(|(n, _)| n.ends_with("_BOUNDS")).unwrap().1;
            let calendar = &ctes.iter().find(|(n, _)| n.ends_with("_CALENDAR")).unwrap().1;
            assert!(bounds.contains(&format!("DATE_TRUNC('{}', \"day\")", unit)));
            if !groups.is_empty() {
                let keys: Vec<String> = groups.iter().map(|g| format!("\"{}\"", g)).collect();
                assert!(bounds.contains(&format!("GROUP BY {}", keys.join(", "))));
            }
            // The walk steps one bucket at a time up to each group's last bucket.
            assert!(calendar.contains(&format!("INTERVAL '1 {}'", unit)));
            assert!(calendar.contains("<= \"__max_bucket\""));
            for g in groups {
                assert!(calendar.contains(&format!("\"{}\"", g)));
            }
        }
    }
}

#[test]
fn test_no_cte_reads_a_later_one() {
    let fill = Step::AddMissingDates(AddMissingDatesStep {
        dates_column: "day".into(),
        dates_granularity: Granularity::Week,
        groups: vec!["city".into()],
    });
    let steps = vec![
        Step::domain("sales"),
        fill,
        waterfall(true),
        Step::Rename(RenameStep {
            to_rename: vec![("city".into(), "town".into())],
        }),
    ];
    let t = translate(&steps, Dialect::Postgres).unwrap();
    parses(&t.sql);
    assert_no_forward_references(&t.sql);
    let statements = Parser::parse_sql(&PostgreSqlDialect {}, &t.sql).unwrap();
    let Statement::Query(query) = &statements[0] else {
        panic!("not a query");
    };
    assert!(matches!(*query.body, SetExpr::Select(_)));
}

#[test]
fn test_waterfall_backfill_policy() {
    let filled = translate(&[Step::domain("sales"), waterfall(true)], Dialect::Postgres).unwrap();
    assert_eq!(names(&filled), vec!["city", "revenue", "TYPE_waterfall"]);
    assert!(filled.sql.contains("COALESCE("));
    parses(&filled.sql);

    let strict = translate(&[Step::domain("sales"), waterfall(false)], Dialect::Postgres).unwrap();
    assert!(strict.sql.contains("INNER JOIN"));
    assert!(!strict.sql.contains("COALESCE("));
    parses(&strict.sql);
}
