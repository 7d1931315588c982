//! Grouping steps: aggregate, uniquegroups, totals and rollup.
//!
//! Grouped output comes out sorted by key, nulls first. Nulls form their own
//! group.

use polars::prelude::*;

use crate::error::{StepError, StepResult};
use crate::step::{
    validate_aggregations, AggFunction, AggregateStep, Aggregation, RollupStep, TotalsStep,
    UniqueGroupsStep,
};
use crate::tabular::frame::{ascending, cols, sort_by};
use crate::tabular::FrameExt;

use super::contains;

/// Aggregation of `column`. Nulls are ignored except by `first` and `last`;
/// a sum over no values is null.
pub(super) fn agg_expr(function: AggFunction, column: Expr) -> Expr {
    match function {
        AggFunction::Sum => when(column.clone().count().eq(lit(0)))
            .then(lit(NULL))
            .otherwise(column.sum()),
        AggFunction::Avg => column.mean(),
        AggFunction::Count => column.count().cast(DataType::Int64),
        AggFunction::CountDistinct => column.drop_nulls().n_unique().cast(DataType::Int64),
        AggFunction::Min => column.min(),
        AggFunction::Max => column.max(),
        AggFunction::First => column.first(),
        AggFunction::Last => column.last(),
    }
}

/// Aggregate per key, sorted by key. Without keys the whole frame is one
/// group.
pub(super) fn grouped(frame: LazyFrame, keys: &[String], aggregations: Vec<Expr>) -> LazyFrame {
    if keys.is_empty() {
        return frame.select(aggregations);
    }
    sort_by(
        frame.group_by(cols(keys)).agg(aggregations),
        &ascending(keys),
    )
}

pub(super) fn check_function(
    frame: &DataFrame,
    column: &str,
    function: AggFunction,
) -> StepResult<()> {
    let dtype = frame.column(column)?.dtype();
    let numeric = dtype.is_numeric() || *dtype == DataType::Null;
    if matches!(function, AggFunction::Sum | AggFunction::Avg) && !numeric {
        return Err(StepError::Type(format!(
            "{} needs a numeric column, '{}' is {}",
            function.as_str(),
            column,
            dtype
        )));
    }
    Ok(())
}

/// `(output name, aggregation)` per aggregated column.
fn bind(aggregations: &[Aggregation], frame: &DataFrame) -> StepResult<Vec<(String, Expr)>> {
    let mut bound = Vec::new();
    for aggregation in aggregations {
        for (source, output) in aggregation.pairs() {
            let source = frame.resolve(source)?;
            check_function(frame, &source, aggregation.aggfunction)?;
            bound.push((output.to_string(), agg_expr(aggregation.aggfunction, col(&source))));
        }
    }
    Ok(bound)
}

fn aliased(bound: &[(String, Expr)]) -> Vec<Expr> {
    bound
        .iter()
        .map(|(name, expr)| expr.clone().alias(name))
        .collect()
}

fn outputs(bound: &[(String, Expr)]) -> Vec<String> {
    bound.iter().map(|(name, _)| name.clone()).collect()
}

pub fn aggregate(step: &AggregateStep, frame: DataFrame) -> StepResult<DataFrame> {
    validate_aggregations(&step.aggregations, &step.on)?;
    let keys = frame.resolve_all(&step.on)?;
    let bound = bind(&step.aggregations, &frame)?;

    if !step.keep_original_granularity {
        return Ok(grouped(frame.lazy(), &keys, aliased(&bound)).collect()?);
    }

    // Aggregated columns replace same-named original columns and move to
    // the end.
    let names = outputs(&bound);
    let kept: Vec<String> = frame
        .column_names()
        .into_iter()
        .filter(|c| !contains(&names, c))
        .collect();
    let mut selected = cols(&kept);
    for (name, expr) in bound {
        let expr = if keys.is_empty() {
            expr
        } else {
            expr.over(cols(&keys))
        };
        selected.push(expr.alias(&name));
    }
    Ok(frame.lazy().select(selected).collect()?)
}

pub fn unique_groups(step: &UniqueGroupsStep, frame: DataFrame) -> StepResult<DataFrame> {
    if step.on.is_empty() {
        return Err(StepError::invalid("uniquegroups needs at least one column"));
    }
    let keys = frame.resolve_all(&step.on)?;
    let unique = frame
        .lazy()
        .select(cols(&keys))
        .unique(None, UniqueKeepStrategy::First);
    Ok(sort_by(unique, &ascending(&keys)).collect()?)
}

/// Total labels are text, so detail values of a dimension are rendered as
/// text too.
pub fn totals(step: &TotalsStep, frame: DataFrame) -> StepResult<DataFrame> {
    if step.total_dimensions.is_empty() {
        return Err(StepError::invalid("totals needs at least one dimension"));
    }
    let dimension_names: Vec<String> = step
        .total_dimensions
        .iter()
        .map(|d| d.total_column.clone())
        .collect();
    let mut all_keys = dimension_names.clone();
    all_keys.extend(step.groups.iter().cloned());
    validate_aggregations(&step.aggregations, &all_keys)?;

    let dimensions = frame.resolve_all(&dimension_names)?;
    let groups = frame.resolve_all(&step.groups)?;
    let bound = bind(&step.aggregations, &frame)?;
    let names = outputs(&bound);

    let mut parts = Vec::new();
    for mask in step.combinations() {
        let masked = |i: usize| mask & (1 << i) != 0;
        let mut keys: Vec<String> = dimensions
            .iter()
            .enumerate()
            .filter(|&(i, _)| !masked(i))
            .map(|(_, d)| d.clone())
            .collect();
        keys.extend(groups.iter().cloned());

        let mut selected: Vec<Expr> = step
            .total_dimensions
            .iter()
            .zip(&dimensions)
            .enumerate()
            .map(|(i, (dimension, name))| {
                if masked(i) {
                    lit(dimension.total_rows_label.clone()).alias(name)
                } else {
                    col(name).cast(DataType::String)
                }
            })
            .collect();
        selected.extend(cols(&groups));
        selected.extend(cols(&names));
        parts.push(grouped(frame.clone().lazy(), &keys, aliased(&bound)).select(selected));
    }
    Ok(concat(parts, UnionArgs::default())?.collect()?)
}

pub fn rollup(step: &RollupStep, frame: DataFrame) -> StepResult<DataFrame> {
    if step.hierarchy.is_empty() {
        return Err(StepError::invalid("rollup needs a hierarchy"));
    }
    let (label, level, parent) = (step.label_column(), step.level_column(), step.parent_column());
    let mut all_keys = step.groupby.clone();
    all_keys.extend(step.hierarchy.iter().cloned());
    all_keys.extend([label.to_string(), level.to_string(), parent.to_string()]);
    validate_aggregations(&step.aggregations, &all_keys)?;
    for generated in [label, level, parent] {
        if contains(&step.groupby, generated) || contains(&step.hierarchy, generated) {
            return Err(StepError::invalid(format!(
                "rollup output column '{}' clashes with an input column",
                generated
            )));
        }
    }

    let groups = frame.resolve_all(&step.groupby)?;
    let hierarchy = frame.resolve_all(&step.hierarchy)?;
    let bound = bind(&step.aggregations, &frame)?;
    let names = outputs(&bound);

    let mut parts = Vec::new();
    for depth in 0..hierarchy.len() {
        let mut keys = groups.clone();
        keys.extend(hierarchy[..=depth].iter().cloned());

        let mut selected = cols(&groups);
        for (i, name) in hierarchy.iter().enumerate() {
            if i <= depth {
                selected.push(col(name));
            } else {
                let dtype = frame.column(name)?.dtype().clone();
                selected.push(lit(NULL).cast(dtype).alias(name));
            }
        }
        selected.push(col(&hierarchy[depth]).cast(DataType::String).alias(label));
        selected.push(lit(hierarchy[depth].clone()).alias(level));
        let parent_label = match depth.checked_sub(1) {
            Some(up) => col(&hierarchy[up]).cast(DataType::String),
            None => lit(NULL).cast(DataType::String),
        };
        selected.push(parent_label.alias(parent));
        selected.extend(cols(&names));
        parts.push(grouped(frame.clone().lazy(), &keys, aliased(&bound)).select(selected));
    }
    Ok(concat(parts, UnionArgs::default())?.collect()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::{Step, TotalDimension};
    use crate::tabular::steps::test_support::records;
    use serde_json::{json, Value as JsonValue};

    fn agg(col: &str, new: &str, f: AggFunction) -> Aggregation {
        Aggregation {
            columns: vec![col.into()],
            newcolumns: vec![new.into()],
            aggfunction: f,
        }
    }

    fn sales() -> Vec<JsonValue> {
        vec![
            json!({"country": "FR", "city": "Paris", "year": 2020, "v": 10}),
            json!({"country": "FR", "city": "Lyon", "year": 2020, "v": 5}),
            json!({"country": "DE", "city": "Berlin", "year": 2021, "v": null}),
            json!({"country": "FR", "city": "Paris", "year": 2021, "v": 2.5}),
        ]
    }

    #[test]
    fn test_aggregation_functions() {
        let input = vec![
            json!({"k": "a", "v": 3.0}),
            json!({"k": "a", "v": null}),
            json!({"k": "a", "v": 3.0}),
            json!({"k": "a", "v": 1.5}),
            json!({"k": "b", "v": null}),
        ];
        let functions = [
            (AggFunction::Sum, "sum"),
            (AggFunction::Avg, "avg"),
            (AggFunction::Count, "count"),
            (AggFunction::CountDistinct, "distinct"),
            (AggFunction::Min, "min"),
            (AggFunction::Last, "last"),
        ];
        let out = records(
            &input,
            Step::Aggregate(AggregateStep {
                on: vec!["k".into()],
                aggregations: functions.iter().map(|(f, n)| agg("v", n, *f)).collect(),
                keep_original_granularity: false,
            }),
        )
        .unwrap();
        assert_eq!(
            out[0],
            json!({"k": "a", "sum": 7.5, "avg": 2.5, "count": 3, "distinct": 2, "min": 1.5, "last": 1.5})
        );
        assert_eq!(
            out[1],
            json!({"k": "b", "sum": null, "avg": null, "count": 0, "distinct": 0, "min": null, "last": null})
        );
    }

    #[test]
    fn test_sum_of_text_is_a_type_error() {
        let err = records(
            &sales(),
            Step::Aggregate(AggregateStep {
                on: vec![],
                aggregations: vec![agg("city", "n", AggFunction::Sum)],
                keep_original_granularity: false,
            }),
        )
        .unwrap_err();
        assert!(matches!(err.source, StepError::Type(_)));
    }

    #[test]
    fn test_aggregate_by_key() {
        let out = records(
            &sales(),
            Step::Aggregate(AggregateStep {
                on: vec!["country".into()],
                aggregations: vec![
                    agg("v", "total", AggFunction::Sum),
                    agg("v", "n", AggFunction::Count),
                ],
                keep_original_granularity: false,
            }),
        )
        .unwrap();
        assert_eq!(
            out,
            vec![
                json!({"country": "DE", "total": null, "n": 0}),
                json!({"country": "FR", "total": 17.5, "n": 3}),
            ]
        );
    }

    #[test]
    fn test_aggregate_without_keys() {
        let out = records(
            &sales(),
            Step::Aggregate(AggregateStep {
                on: vec![],
                aggregations: vec![agg("v", "total", AggFunction::Sum)],
                keep_original_granularity: false,
            }),
        )
        .unwrap();
        assert_eq!(out, vec![json!({"total": 17.5})]);
    }

    #[test]
    fn test_keep_original_granularity() {
        let out = records(
            &sales(),
            Step::Aggregate(AggregateStep {
                on: vec!["country".into()],
                aggregations: vec![agg("year", "year", AggFunction::Max)],
                keep_original_granularity: true,
            }),
        )
        .unwrap();
        assert_eq!(out.len(), 4);
        assert_eq!(
            out[1],
            json!({"country": "FR", "city": "Lyon", "v": 5.0, "year": 2021})
        );
    }

    #[test]
    fn test_unique_groups_sorted() {
        let out = records(
            &sales(),
            Step::UniqueGroups(UniqueGroupsStep {
                on: vec!["country".into(), "year".into()],
            }),
        )
        .unwrap();
        assert_eq!(
            out,
            vec![
                json!({"country": "DE", "year": 2021}),
                json!({"country": "FR", "year": 2020}),
                json!({"country": "FR", "year": 2021}),
            ]
        );
    }

    #[test]
    fn test_totals_masks_dimensions() {
        let out = records(
            &sales(),
            Step::Totals(TotalsStep {
                total_dimensions: vec![TotalDimension {
                    total_column: "year".into(),
                    total_rows_label: "All years".into(),
                }],
                aggregations: vec![agg("v", "v_sum", AggFunction::Sum)],
                groups: vec!["country".into()],
            }),
        )
        .unwrap();
        assert_eq!(out.len(), 5);
        assert_eq!(out[0], json!({"year": "2020", "country": "FR", "v_sum": 15.0}));
        assert_eq!(out[3], json!({"year": "All years", "country": "DE", "v_sum": null}));
        assert_eq!(out[4], json!({"year": "All years", "country": "FR", "v_sum": 17.5}));
    }

    #[test]
    fn test_rollup_levels() {
        let out = records(
            &sales(),
            Step::Rollup(RollupStep {
                hierarchy: vec!["country".into(), "city".into()],
                aggregations: vec![agg("v", "v", AggFunction::Sum)],
                groupby: vec![],
                label_col: None,
                level_col: None,
                parent_label_col: None,
            }),
        )
        .unwrap();
        assert_eq!(out.len(), 5);
        assert_eq!(
            out[1],
            json!({"country": "FR", "city": null, "label": "FR", "level": "country", "parent": null, "v": 17.5})
        );
        assert_eq!(
            out[4],
            json!({"country": "FR", "city": "Paris", "label": "Paris", "level": "city", "parent": "FR", "v": 12.5})
        );
    }

    #[test]
    fn test_rollup_rejects_clashing_outputs() {
        let err = records(
            &sales(),
            Step::Rollup(RollupStep {
                hierarchy: vec!["country".into(), "label".into()],
                aggregations: vec![],
                groupby: vec![],
                label_col: None,
                level_col: None,
                parent_label_col: None,
            }),
        )
        .unwrap_err();
        assert!(matches!(err.source, StepError::InvalidStep(_)));
    }
}
