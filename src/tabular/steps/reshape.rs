//! `pivot` and `unpivot`.

use std::collections::{BTreeSet, HashSet};

use polars::prelude::*;
use tracing::warn;

use crate::error::{StepError, StepResult};
use crate::step::{PivotStep, UnpivotStep};
use crate::tabular::frame::{cols, common_dtype, same_name, value_lit};
use crate::tabular::{FrameExt, Value};

use super::aggregate::{agg_expr, check_function, grouped};
use super::contains;

/// One output column per distinct non-null value of the pivoted column, in
/// value order.
pub fn pivot(step: &PivotStep, frame: DataFrame) -> StepResult<DataFrame> {
    let index = frame.resolve_all(&step.index)?;
    let pivoted = frame.resolve(&step.column_to_pivot)?;
    let value = frame.resolve(&step.value_column)?;
    if contains(&step.index, &pivoted) || contains(&step.index, &value) {
        return Err(StepError::invalid(
            "pivot index must not contain the pivoted or value column",
        ));
    }
    check_function(&frame, &value, step.agg_function)?;

    let values: BTreeSet<Value> = frame
        .column_values(&pivoted)?
        .into_iter()
        .filter(|v| !v.is_null())
        .collect();
    if values.is_empty() {
        if index.is_empty() {
            return Err(StepError::invalid(
                "pivot without an index needs at least one pivoted value",
            ));
        }
        warn!(column = %step.column_to_pivot, "pivot column has no values; only the index is kept");
    }

    let mut seen: HashSet<String> = index.iter().map(|c| c.to_uppercase()).collect();
    let mut aggregations = Vec::with_capacity(values.len());
    for v in &values {
        let name = v.to_string();
        if !seen.insert(name.to_uppercase()) {
            return Err(StepError::invalid(format!(
                "pivoted value '{}' produces a duplicate column",
                name
            )));
        }
        let picked = col(&value).filter(col(&pivoted).eq(value_lit(v)));
        aggregations.push(agg_expr(step.agg_function, picked).alias(&name));
    }
    Ok(grouped(frame.lazy(), &index, aggregations).collect()?)
}

/// One output row per (row, unpivoted column), grouped by unpivoted column.
pub fn unpivot(step: &UnpivotStep, frame: DataFrame) -> StepResult<DataFrame> {
    if step.unpivot.is_empty() {
        return Err(StepError::invalid("unpivot needs at least one column"));
    }
    let keep = frame.resolve_all(&step.keep)?;
    let unpivoted = frame.resolve_all(&step.unpivot)?;
    let (name_col, value_col) = (&step.unpivot_column_name, &step.value_column_name);
    if same_name(name_col, value_col)
        || contains(&step.keep, name_col)
        || contains(&step.keep, value_col)
    {
        return Err(StepError::invalid(
            "unpivot output columns must be distinct from each other and from kept columns",
        ));
    }
    if unpivoted.iter().any(|u| keep.contains(u)) {
        return Err(StepError::invalid("a column cannot be both kept and unpivoted"));
    }

    let mut dtypes = Vec::with_capacity(unpivoted.len());
    for name in &unpivoted {
        dtypes.push(frame.column(name)?.dtype().clone());
    }
    let dtype = common_dtype(value_col, &dtypes)?;

    let mut parts = Vec::with_capacity(unpivoted.len());
    for name in &unpivoted {
        let mut selected = cols(&keep);
        selected.push(lit(name.clone()).alias(name_col));
        selected.push(col(name).cast(dtype.clone()).alias(value_col));
        let mut part = frame.clone().lazy().select(selected);
        if step.dropna {
            part = part.filter(col(value_col).is_not_null());
        }
        parts.push(part);
    }
    Ok(concat(parts, UnionArgs::default())?.collect()?)
}
