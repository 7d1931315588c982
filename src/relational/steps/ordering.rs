//! Steps driven by row order: sort, top, rank, cumsum, percentage, argmax
//! and argmin.

use crate::error::{StepError, StepResult};
use crate::relational::context::{RowOrder, StepContext, StepOutput};
use crate::relational::metadata::SchemaDelta;
use crate::sql::{
    col, func, lit_int, max, min, sum, table_col, Cte, DataType, Expr, ExprExt, OrderByExpr,
    Query, SelectExpr, SortDir, TableRef, WindowExt, WindowFrame, WindowOrderBy,
};
use crate::sql::expr::{dense_rank, null_safe_eq, rank as rank_fn, row_number};
use crate::step::{
    ArgExtremumStep, CumsumStep, PercentageStep, RankMethod, RankStep, SortOrder, SortStep, TopStep,
};

use super::{aggregate_type, cols};

const TOP_RANK_COLUMN: &str = "__top_rank";
const EXTREMUM_COLUMN: &str = "__extremum";

fn dir(order: SortOrder) -> SortDir {
    match order {
        SortOrder::Asc => SortDir::Asc,
        SortOrder::Desc => SortDir::Desc,
    }
}

fn window_order(expr: Expr, order: SortOrder) -> WindowOrderBy {
    match order {
        SortOrder::Asc => WindowOrderBy::asc(expr),
        SortOrder::Desc => WindowOrderBy::desc(expr),
    }
}

/// Sorting happens in the final SELECT; the CTE only carries the rows.
pub fn sort(step: &SortStep, ctx: &StepContext) -> StepResult<StepOutput> {
    if step.columns.is_empty() {
        return Err(StepError::invalid("sort needs at least one column"));
    }
    let mut keys = Vec::with_capacity(step.columns.len());
    for sort_column in &step.columns {
        let column = ctx.column(&sort_column.column)?;
        keys.push((column.name.clone(), dir(sort_column.order)));
    }
    Ok(StepOutput::new(Cte::new(&ctx.name, ctx.select_all()?), SchemaDelta::new())
        .ordered(RowOrder::Set(keys)))
}

pub fn top(step: &TopStep, ctx: &StepContext) -> StepResult<StepOutput> {
    if step.limit == 0 {
        return Err(StepError::invalid("top limit must be positive"));
    }
    let rank_on = ctx.column(&step.rank_on)?.name.clone();
    let limit = i64::try_from(step.limit)
        .map_err(|_| StepError::invalid("top limit is too large"))?;

    if step.groups.is_empty() {
        let order = match step.sort {
            SortOrder::Asc => OrderByExpr::asc(col(&rank_on)),
            SortOrder::Desc => OrderByExpr::desc(col(&rank_on)),
        };
        let query = ctx.select_all()?.order_by(vec![order]).limit(step.limit);
        return Ok(StepOutput::new(Cte::new(&ctx.name, query), SchemaDelta::new())
            .ordered(RowOrder::Set(vec![(rank_on, dir(step.sort))])));
    }

    ctx.dialect.require_window_functions("top per group")?;
    ctx.require_columns(step.groups.iter().map(String::as_str))?;
    let ranked_name = ctx.aux("RANKED");
    let ranking = row_number()
        .over()
        .partition_by(cols(&step.groups))
        .order_by(vec![window_order(col(&rank_on), step.sort)])
        .build();
    let ranked = ctx.project(|_| None, vec![ranking.alias(TOP_RANK_COLUMN)])?;

    let select: Vec<SelectExpr> = ctx.columns().iter().map(|c| col(&c.name).into()).collect();
    let query = Query::new()
        .select(select)
        .from(TableRef::new(&ranked_name))
        .filter(col(TOP_RANK_COLUMN).lte(lit_int(limit)));

    let mut keys: Vec<(String, SortDir)> = step
        .groups
        .iter()
        .map(|g| (g.clone(), SortDir::Asc))
        .collect();
    keys.push((rank_on, dir(step.sort)));

    Ok(StepOutput::with_ctes(
        vec![Cte::new(&ranked_name, ranked), Cte::new(&ctx.name, query)],
        SchemaDelta::new(),
    )
    .ordered(RowOrder::Set(keys)))
}

pub fn rank(step: &RankStep, ctx: &StepContext) -> StepResult<StepOutput> {
    ctx.dialect.require_window_functions("rank")?;
    let value = ctx.column(&step.value_col)?;
    ctx.require_columns(step.groupby.iter().map(String::as_str))?;
    let output = step.output_column();
    ctx.require_absent(&output)?;

    let function = match step.method {
        RankMethod::Standard => rank_fn(),
        RankMethod::Dense => dense_rank(),
    };
    let ranking = function
        .over()
        .partition_by(cols(&step.groupby))
        .order_by(vec![window_order(col(&value.name), step.order)])
        .build();
    let query = ctx.project(|_| None, vec![ranking.alias(&output)])?;
    Ok(StepOutput::new(
        Cte::new(&ctx.name, query),
        SchemaDelta::new().add(&output, DataType::Int64),
    ))
}

pub fn cumsum(step: &CumsumStep, ctx: &StepContext) -> StepResult<StepOutput> {
    ctx.dialect.require_window_functions("cumsum")?;
    if step.to_cum_sum.is_empty() {
        return Err(StepError::invalid("cumsum needs at least one column"));
    }
    let reference = ctx.column(&step.reference_column)?.name.clone();
    ctx.require_columns(step.groupby.iter().map(String::as_str))?;

    let running = |name: &str| {
        sum(col(name))
            .over()
            .partition_by(cols(&step.groupby))
            .order_by(vec![WindowOrderBy::asc(col(&reference))])
            .frame(WindowFrame::RowsToCurrent)
            .build()
    };

    let mut in_place: Vec<(String, Expr)> = Vec::new();
    let mut extra = Vec::new();
    let mut delta = SchemaDelta::new();
    for (source, new) in &step.to_cum_sum {
        let column = ctx.column(source)?;
        let output = if new.is_empty() {
            format!("{}_CUMSUM", column.name)
        } else {
            new.clone()
        };
        let sql_type = aggregate_type(crate::step::AggFunction::Sum, &column.sql_type);
        if column.is(&output) {
            in_place.push((column.name.clone(), running(&column.name)));
            delta = delta.retype(&column.name, sql_type);
        } else {
            ctx.require_absent(&output)?;
            extra.push(running(&column.name).alias(&output));
            delta = delta.add(&output, sql_type);
        }
    }

    let query = ctx.project(
        |c| {
            in_place
                .iter()
                .find(|(name, _)| c.is(name))
                .map(|(_, expr)| expr.clone())
        },
        extra,
    )?;

    let mut keys: Vec<(String, SortDir)> = step
        .groupby
        .iter()
        .map(|g| (g.clone(), SortDir::Asc))
        .collect();
    keys.push((reference, SortDir::Asc));
    Ok(StepOutput::new(Cte::new(&ctx.name, query), delta).ordered(RowOrder::Set(keys)))
}

pub fn percentage(step: &PercentageStep, ctx: &StepContext) -> StepResult<StepOutput> {
    ctx.dialect.require_window_functions("percentage")?;
    let column = ctx.column(&step.column)?;
    if !column.sql_type.is_numeric() && !matches!(column.sql_type, DataType::Other(_)) {
        return Err(StepError::Type(format!(
            "percentage needs a numeric column, '{}' is {}",
            column.name, column.sql_type
        )));
    }
    ctx.require_columns(step.group.iter().map(String::as_str))?;
    let output = step.output_column();
    ctx.require_absent(&output)?;

    let total = sum(col(&column.name))
        .over()
        .partition_by(cols(&step.group))
        .build();
    let ratio = col(&column.name)
        .cast(ctx.caps().casts.float)
        .div(func("NULLIF", vec![total, lit_int(0)]));
    let query = ctx.project(|_| None, vec![ratio.alias(&output)])?;
    Ok(StepOutput::new(
        Cte::new(&ctx.name, query),
        SchemaDelta::new().add(&output, DataType::Float64),
    ))
}

/// Rows holding the maximum (or minimum) of a column, per group. Ties keep
/// every matching row.
pub fn arg_extremum(step: &ArgExtremumStep, is_max: bool, ctx: &StepContext) -> StepResult<StepOutput> {
    let column = ctx.column(&step.column)?.name.clone();
    ctx.require_columns(step.groups.iter().map(String::as_str))?;
    let previous = ctx.previous()?;

    let extremum = if is_max {
        max(col(&column))
    } else {
        min(col(&column))
    };
    let mut select: Vec<SelectExpr> = cols(&step.groups).into_iter().map(Into::into).collect();
    select.push(extremum.alias(EXTREMUM_COLUMN));
    let extremes = Query::new()
        .select(select)
        .from(TableRef::new(previous))
        .group_by(cols(&step.groups));

    let mut on = table_col("src", &column).eq(table_col("ext", EXTREMUM_COLUMN));
    for group in &step.groups {
        on = on.and(null_safe_eq(table_col("src", group), table_col("ext", group)));
    }

    let select: Vec<SelectExpr> = ctx
        .columns()
        .iter()
        .map(|c| table_col("src", &c.name).into())
        .collect();
    let query = Query::new()
        .select(select)
        .from(TableRef::new(previous).with_alias("src"))
        .inner_join(TableRef::subquery(extremes).with_alias("ext"), on);

    Ok(StepOutput::new(Cte::new(&ctx.name, query), SchemaDelta::new()).ordered(RowOrder::Clear))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relational::steps::test_support::{names, run};
    use crate::sql::Dialect;
    use crate::step::{SortColumn, Step};

    const SCHEMA: &[(&str, &str)] = &[("g", "text"), ("d", "date"), ("v", "int")];

    #[test]
    fn test_sort_orders_final_select() {
        let t = run(
            vec![Step::Sort(SortStep {
                columns: vec![
                    SortColumn {
                        column: "g".into(),
                        order: SortOrder::Asc,
                    },
                    SortColumn {
                        column: "v".into(),
                        order: SortOrder::Desc,
                    },
                ],
            })],
            SCHEMA,
            Dialect::Postgres,
        )
        .unwrap();
        assert!(t.sql.ends_with("FROM \"SORT_STEP_1\"\nORDER BY \"g\" ASC, \"v\" DESC"));
    }

    #[test]
    fn test_ordering_survives_rename_and_drops_with_column() {
        use crate::step::{ColumnsStep, RenameStep};
        let sort = Step::Sort(SortStep {
            columns: vec![SortColumn {
                column: "v".into(),
                order: SortOrder::Desc,
            }],
        });
        let renamed = run(
            vec![
                sort.clone(),
                Step::Rename(RenameStep {
                    to_rename: vec![("v".into(), "value".into())],
                }),
            ],
            SCHEMA,
            Dialect::Postgres,
        )
        .unwrap();
        assert!(renamed.sql.ends_with("ORDER BY \"value\" DESC"));

        let deleted = run(
            vec![
                sort,
                Step::Delete(ColumnsStep {
                    columns: vec!["v".into()],
                }),
            ],
            SCHEMA,
            Dialect::Postgres,
        )
        .unwrap();
        assert!(!deleted.sql.contains("ORDER BY"));
    }

    #[test]
    fn test_top_per_group_needs_windows() {
        let step = Step::Top(TopStep {
            rank_on: "v".into(),
            sort: SortOrder::Desc,
            limit: 2,
            groups: vec!["g".into()],
        });
        let pg = run(vec![step.clone()], SCHEMA, Dialect::Postgres).unwrap();
        assert!(pg.sql.contains(
            "ROW_NUMBER() OVER (PARTITION BY \"g\" ORDER BY \"v\" DESC) AS \"__top_rank\""
        ));
        assert!(pg.sql.contains("WHERE \"__top_rank\" <= 2"));
        assert_eq!(names(&pg), vec!["g", "d", "v"]);

        let err = run(vec![step], SCHEMA, Dialect::MySql).unwrap_err();
        assert!(matches!(err.source, StepError::MissingCapability { .. }));
    }

    #[test]
    fn test_top_without_groups_uses_limit() {
        let step = Step::Top(TopStep {
            rank_on: "v".into(),
            sort: SortOrder::Asc,
            limit: 3,
            groups: vec![],
        });
        let my = run(vec![step.clone()], SCHEMA, Dialect::MySql).unwrap();
        assert!(my.sql.contains("ORDER BY `v` ASC\nLIMIT 3"));
        let ms = run(vec![step], SCHEMA, Dialect::TSql).unwrap();
        assert!(ms.sql.contains("ORDER BY [v] ASC\nOFFSET 0 ROWS FETCH NEXT 3 ROWS ONLY"));
    }

    #[test]
    fn test_cumsum_in_place_and_new_column() {
        let t = run(
            vec![Step::Cumsum(CumsumStep {
                to_cum_sum: vec![("v".into(), "v".into()), ("v".into(), "running".into())],
                reference_column: "d".into(),
                groupby: vec!["g".into()],
            })],
            SCHEMA,
            Dialect::Postgres,
        )
        .unwrap();
        assert!(t.sql.contains(
            "SUM(\"v\") OVER (PARTITION BY \"g\" ORDER BY \"d\" ASC ROWS BETWEEN UNBOUNDED PRECEDING AND CURRENT ROW) AS \"v\""
        ));
        assert_eq!(names(&t), vec!["g", "d", "v", "running"]);
        assert_eq!(t.columns[2].sql_type, DataType::Int64);
    }

    #[test]
    fn test_percentage_of_group_total() {
        let t = run(
            vec![Step::Percentage(PercentageStep {
                column: "v".into(),
                group: vec![],
                new_column_name: None,
            })],
            SCHEMA,
            Dialect::Postgres,
        )
        .unwrap();
        assert!(t.sql.contains(
            "CAST(\"v\" AS DOUBLE PRECISION) / NULLIF(SUM(\"v\") OVER (), 0) AS \"v_PCT\""
        ));
    }

    #[test]
    fn test_argmax_joins_on_group_extremum() {
        let t = run(
            vec![Step::Argmax(ArgExtremumStep {
                column: "v".into(),
                groups: vec!["g".into()],
            })],
            SCHEMA,
            Dialect::MySql,
        )
        .unwrap();
        assert!(t.sql.contains("MAX(`v`) AS `__extremum`"));
        assert!(t.sql.contains("GROUP BY `g`"));
        assert!(t.sql.contains(
            "ON `src`.`v` = `ext`.`__extremum` AND (`src`.`g` = `ext`.`g` OR `src`.`g` IS NULL AND `ext`.`g` IS NULL)"
        ));
        assert_eq!(names(&t), vec!["g", "d", "v"]);
    }
}
