//! `waterfall`: a bridge between two milestones.
//!
//! CTE layout:
//!
//! 1. `<step>_START` / `<step>_END`: value sums per key (group-by columns,
//!    label, parent) at each milestone.
//! 2. `<step>_RECONCILED`: one row per key with its start and end sums. With
//!    backfill the key sets are united and missing sides count as 0;
//!    without it only keys present at both milestones survive.
//! 3. `<step>`: start totals, children, parents and end totals stacked with
//!    a hidden `__waterfall_order` column (0 to 3). The final ordering sorts
//!    on it first, so totals stay at the edges whatever the requested sort.
//!    Row-preserving steps after the waterfall carry the hidden column, so
//!    the order survives them.

use crate::error::{StepError, StepResult};
use crate::relational::context::{RowOrder, StepContext, StepOutput};
use crate::relational::metadata::{ColumnMetadata, SchemaDelta};
use crate::sql::expr::null_safe_eq;
use crate::sql::{
    coalesce, col, count_star, lit_int, lit_json, lit_null, lit_str, sum, table_col, Cte,
    DataType, Expr, ExprExt, Query, SelectExpr, SortDir, TableRef,
};
use crate::step::{AggFunction, SortOrder, WaterfallSortBy, WaterfallStep, WATERFALL_TYPE_COLUMN};

use super::{aggregate_type, cols, tracked};

const VALUE: &str = "__value";
const START: &str = "__start";
const END: &str = "__end";
const ORDER: &str = "__waterfall_order";

pub fn waterfall(step: &WaterfallStep, ctx: &StepContext) -> StepResult<StepOutput> {
    let value = ctx.column(&step.value_column)?.clone();
    if !(value.sql_type.is_numeric() || matches!(value.sql_type, DataType::Other(_))) {
        return Err(StepError::Type(format!(
            "waterfall value column '{}' has type {}, expected a number",
            value.name, value.sql_type
        )));
    }
    let milestones = ctx.column(&step.milestones_column)?.name.clone();
    let label = ctx.column(&step.labels_column)?.clone();
    let parent = match &step.parents_column {
        Some(p) => Some(ctx.column(p)?.clone()),
        None => None,
    };
    let groups = tracked(ctx, &step.groupby)?;

    let mut key_names: Vec<String> = groups.iter().map(|c| c.name.clone()).collect();
    key_names.push(label.name.clone());
    if let Some(p) = &parent {
        key_names.push(p.name.clone());
    }
    let mut outputs: Vec<&str> = key_names.iter().map(String::as_str).collect();
    outputs.push(&value.name);
    outputs.push(WATERFALL_TYPE_COLUMN);
    for (i, name) in outputs.iter().enumerate() {
        if outputs[..i].iter().any(|o| o.eq_ignore_ascii_case(name)) {
            return Err(StepError::invalid(format!(
                "waterfall column '{}' is used twice",
                name
            )));
        }
    }

    let previous = ctx.previous()?;
    let start_name = ctx.aux("START");
    let end_name = ctx.aux("END");
    let reconciled_name = ctx.aux("RECONCILED");
    let text = ctx.caps().casts.text;
    let as_text = |c: &ColumnMetadata, expr: Expr| {
        if c.sql_type.is_string() {
            expr
        } else {
            expr.cast(text)
        }
    };

    let milestone_sums = |milestone: &serde_json::Value| {
        let mut select: Vec<SelectExpr> =
            cols(&key_names).into_iter().map(SelectExpr::from).collect();
        select.push(sum(col(&value.name)).alias(VALUE));
        Query::new()
            .select(select)
            .from(TableRef::new(previous))
            .filter(col(&milestones).eq(lit_json(milestone)))
            .group_by(cols(&key_names))
    };

    let reconciled = reconcile(step.backfill, &key_names, &start_name, &end_name);

    // Stacked output, one branch per row kind.
    let from_reconciled = || TableRef::new(&reconciled_name);
    let group_select = || -> Vec<SelectExpr> { groups.iter().map(|c| col(&c.name).into()).collect() };
    let group_exprs = || groups.iter().map(|c| col(&c.name)).collect::<Vec<_>>();
    let total = |milestone: &serde_json::Value, side: &str, order: i64| {
        let mut select = group_select();
        select.push(lit_str(&WaterfallStep::milestone_label(milestone)).alias(&label.name));
        if let Some(p) = &parent {
            select.push(lit_null().alias(&p.name));
        }
        select.push(sum(col(side)).alias(&value.name));
        select.push(lit_null().alias(WATERFALL_TYPE_COLUMN));
        select.push(lit_int(order).alias(ORDER));
        Query::new()
            .select(select)
            .from(from_reconciled())
            .group_by(group_exprs())
            .having(count_star().gt(lit_int(0)))
    };
    let delta = || col(END).sub(col(START));

    let mut children = group_select();
    children.push(as_text(&label, col(&label.name)).alias(&label.name));
    if let Some(p) = &parent {
        children.push(col(&p.name).into());
    }
    children.push(delta().alias(&value.name));
    let child_type = if parent.is_some() { "child" } else { "parent" };
    children.push(lit_str(child_type).alias(WATERFALL_TYPE_COLUMN));
    children.push(lit_int(1).alias(ORDER));

    let mut branches = vec![
        total(&step.start, START, 0),
        Query::new().select(children).from(from_reconciled()),
    ];
    if let Some(p) = &parent {
        let mut select = group_select();
        select.push(as_text(p, col(&p.name)).alias(&label.name));
        select.push(col(&p.name).into());
        select.push(sum(delta()).alias(&value.name));
        select.push(lit_str("parent").alias(WATERFALL_TYPE_COLUMN));
        select.push(lit_int(2).alias(ORDER));
        let mut group_by = group_exprs();
        group_by.push(col(&p.name));
        branches.push(
            Query::new()
                .select(select)
                .from(from_reconciled())
                .group_by(group_by),
        );
    }
    branches.push(total(&step.end, END, 3));

    let ctes = vec![
        Cte::new(&start_name, milestone_sums(&step.start)),
        Cte::new(&end_name, milestone_sums(&step.end)),
        Cte::new(&reconciled_name, reconciled),
        Cte::new(&ctx.name, Query::union_all(branches)),
    ];

    let mut columns = groups.clone();
    columns.push(ColumnMetadata {
        sql_type: DataType::String,
        alias: None,
        ..label.clone()
    });
    if let Some(p) = &parent {
        columns.push(p.clone());
    }
    columns.push(ColumnMetadata::new(
        &value.name,
        aggregate_type(AggFunction::Sum, &value.sql_type),
    ));
    columns.push(ColumnMetadata::new(WATERFALL_TYPE_COLUMN, DataType::String));
    columns.push(ColumnMetadata::new(ORDER, DataType::Int64).hidden());

    Ok(
        StepOutput::with_ctes(ctes, SchemaDelta::new().replace_all(columns))
            .ordered(RowOrder::Set(ordering(step, &label.name, &value.name, &groups))),
    )
}

/// `<keys>, __start, __end` per key.
fn reconcile(backfill: bool, keys: &[String], start: &str, end: &str) -> Query {
    let joined = |alias: &str, other: &str| {
        keys.iter()
            .map(|k| null_safe_eq(table_col(alias, k), table_col(other, k)))
            .reduce(|a, b| a.and(b))
            .unwrap_or_else(|| lit_int(1).eq(lit_int(1)))
    };

    if backfill {
        let key_set = |table: &str| {
            Query::new()
                .select(cols(keys))
                .from(TableRef::new(table))
        };
        let all_keys = Query::union(vec![key_set(start), key_set(end)]);
        let mut select: Vec<SelectExpr> = keys
            .iter()
            .map(|k| table_col("k", k).alias(k))
            .collect();
        select.push(coalesce(vec![table_col("s", VALUE), lit_int(0)]).alias(START));
        select.push(coalesce(vec![table_col("e", VALUE), lit_int(0)]).alias(END));
        Query::new()
            .select(select)
            .from(TableRef::subquery(all_keys).with_alias("k"))
            .left_join(TableRef::new(start).with_alias("s"), joined("k", "s"))
            .left_join(TableRef::new(end).with_alias("e"), joined("k", "e"))
    } else {
        let mut select: Vec<SelectExpr> = keys
            .iter()
            .map(|k| table_col("s", k).alias(k))
            .collect();
        select.push(table_col("s", VALUE).alias(START));
        select.push(table_col("e", VALUE).alias(END));
        Query::new()
            .select(select)
            .from(TableRef::new(start).with_alias("s"))
            .inner_join(TableRef::new(end).with_alias("e"), joined("s", "e"))
    }
}

/// Render order first, then the requested sort, then the keys as
/// tie-breakers.
fn ordering(
    step: &WaterfallStep,
    label: &str,
    value: &str,
    groups: &[ColumnMetadata],
) -> Vec<(String, SortDir)> {
    let dir = match step.order {
        SortOrder::Asc => SortDir::Asc,
        SortOrder::Desc => SortDir::Desc,
    };
    let mut keys = vec![(ORDER.to_string(), SortDir::Asc)];
    match step.sort_by {
        WaterfallSortBy::Label => keys.push((label.to_string(), dir)),
        WaterfallSortBy::Value => keys.push((value.to_string(), dir)),
    }
    keys.extend(groups.iter().map(|g| (g.name.clone(), SortDir::Asc)));
    if step.sort_by == WaterfallSortBy::Value {
        keys.push((label.to_string(), SortDir::Asc));
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relational::steps::test_support::{names, run};
    use crate::sql::Dialect;
    use crate::step::Step;
    use serde_json::json;

    const SCHEMA: &[(&str, &str)] = &[
        ("city", "text"),
        ("region", "text"),
        ("year", "int"),
        ("revenue", "int"),
        ("country", "text"),
    ];

    fn bridge(parent: Option<&str>, groupby: &[&str], backfill: bool) -> Step {
        Step::Waterfall(WaterfallStep {
            value_column: "revenue".into(),
            milestones_column: "year".into(),
            start: json!(2019),
            end: json!(2020),
            labels_column: "city".into(),
            parents_column: parent.map(String::from),
            groupby: groupby.iter().map(|g| g.to_string()).collect(),
            sort_by: WaterfallSortBy::Value,
            order: SortOrder::Desc,
            backfill,
        })
    }

    #[test]
    fn test_flat_waterfall() {
        let t = run(vec![bridge(None, &[], true)], SCHEMA, Dialect::Postgres).unwrap();
        assert_eq!(names(&t), vec!["city", "revenue", "TYPE_waterfall"]);
        let sql = &t.sql;
        assert!(sql.contains("WHERE \"year\" = 2019"));
        assert!(sql.contains("COALESCE(\"s\".\"__value\", 0) AS \"__start\""));
        assert!(sql.contains("\nUNION\n"));
        assert!(sql.contains("'2019' AS \"city\""));
        assert!(sql.contains("\"__end\" - \"__start\" AS \"revenue\""));
        assert!(sql.contains("'parent' AS \"TYPE_waterfall\""));
        assert!(sql.contains("HAVING COUNT(*) > 0"));
        assert!(sql.ends_with(
            "ORDER BY \"__waterfall_order\" ASC, \"revenue\" DESC, \"city\" ASC"
        ));
        // The render order column is hidden.
        assert!(sql.contains(
            "SELECT\n  \"city\",\n  \"revenue\",\n  \"TYPE_waterfall\"\nFROM \"WATERFALL_STEP_1\"\nORDER BY"
        ));
    }

    #[test]
    fn test_parents_and_groups() {
        let t = run(
            vec![bridge(Some("region"), &["country"], true)],
            SCHEMA,
            Dialect::Postgres,
        )
        .unwrap();
        assert_eq!(
            names(&t),
            vec!["country", "city", "region", "revenue", "TYPE_waterfall"]
        );
        assert!(t.sql.contains("'child' AS \"TYPE_waterfall\""));
        assert!(t.sql.contains("\"region\" AS \"city\""));
        assert!(t.sql.contains("GROUP BY \"country\", \"region\""));
        assert!(t.sql.contains("2 AS \"__waterfall_order\""));
    }

    #[test]
    fn test_without_backfill_uses_inner_join() {
        let t = run(vec![bridge(None, &[], false)], SCHEMA, Dialect::Postgres).unwrap();
        assert!(t.sql.contains("INNER JOIN \"WATERFALL_STEP_1_END\" AS \"e\""));
        assert!(!t.sql.contains("COALESCE"));
    }

    #[test]
    fn test_non_text_labels_are_cast() {
        let step = Step::Waterfall(WaterfallStep {
            labels_column: "year".into(),
            milestones_column: "city".into(),
            start: json!("Paris"),
            end: json!("Lyon"),
            ..match bridge(None, &[], true) {
                Step::Waterfall(w) => w,
                _ => unreachable!(),
            }
        });
        let t = run(vec![step], SCHEMA, Dialect::BigQuery).unwrap();
        assert!(t.sql.contains("CAST(`year` AS STRING) AS `year`"));
        assert_eq!(t.columns[0].sql_type, DataType::String);
    }

    #[test]
    fn test_rejects_text_values() {
        let step = Step::Waterfall(WaterfallStep {
            value_column: "country".into(),
            ..match bridge(None, &[], true) {
                Step::Waterfall(w) => w,
                _ => unreachable!(),
            }
        });
        let err = run(vec![step], SCHEMA, Dialect::Postgres).unwrap_err();
        assert!(matches!(err.source, StepError::Type(_)));
    }

    #[test]
    fn test_render_order_survives_later_steps() {
        let t = run(
            vec![
                bridge(None, &[], true),
                Step::Filter(crate::step::FilterStep {
                    condition: serde_json::from_value(
                        json!({"column": "revenue", "operator": "ne", "value": 0}),
                    )
                    .unwrap(),
                }),
                Step::Select(crate::step::ColumnsStep {
                    columns: vec!["city".into(), "revenue".into()],
                }),
            ],
            SCHEMA,
            Dialect::Postgres,
        )
        .unwrap();
        assert_eq!(names(&t), vec!["city", "revenue"]);
        assert!(t.sql.ends_with(
            "ORDER BY \"__waterfall_order\" ASC, \"revenue\" DESC, \"city\" ASC"
        ));
        assert!(t.sql.contains(
            "SELECT\n  \"city\",\n  \"revenue\"\nFROM \"SELECT_STEP_3\"\nORDER BY"
        ));
    }

    #[test]
    fn test_render_order_is_dropped_by_aggregation() {
        let t = run(
            vec![
                bridge(None, &[], true),
                Step::Aggregate(crate::step::AggregateStep {
                    on: vec!["city".into()],
                    aggregations: vec![],
                    keep_original_granularity: false,
                }),
            ],
            SCHEMA,
            Dialect::Postgres,
        )
        .unwrap();
        assert!(!t.sql.contains("ORDER BY"));
        assert_eq!(names(&t), vec!["city"]);
    }
}
