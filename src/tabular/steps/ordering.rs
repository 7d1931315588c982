//! Ordering and window steps: sort, top, rank, cumsum, percentage, argmax
//! and argmin.
//!
//! Grouped variants run as window expressions partitioned by the group
//! columns.

use polars::prelude::*;

use crate::error::{StepError, StepResult};
use crate::step::{
    ArgExtremumStep, CumsumStep, PercentageStep, RankMethod, RankStep, SortOrder, SortStep,
    TopStep,
};
use crate::tabular::frame::{ascending, cols, same_name, sort_by};
use crate::tabular::FrameExt;

const ROW_INDEX: &str = "__stepforge_row";

/// `expr` evaluated per group, or over the whole frame without groups.
fn windowed(expr: Expr, groups: &[String]) -> Expr {
    if groups.is_empty() {
        expr
    } else {
        expr.over(cols(groups))
    }
}

fn require_numeric(frame: &DataFrame, name: &str, step: &str) -> StepResult<()> {
    let dtype = frame.column(name)?.dtype();
    if dtype.is_numeric() || *dtype == DataType::Null {
        return Ok(());
    }
    Err(StepError::Type(format!(
        "{} needs a numeric column, '{}' is {}",
        step, name, dtype
    )))
}

pub fn sort(step: &SortStep, frame: DataFrame) -> StepResult<DataFrame> {
    if step.columns.is_empty() {
        return Err(StepError::invalid("sort needs at least one column"));
    }
    let keys = step
        .columns
        .iter()
        .map(|c| Ok((frame.resolve(&c.column)?, c.order)))
        .collect::<StepResult<Vec<_>>>()?;
    Ok(sort_by(frame.lazy(), &keys).collect()?)
}

/// Groups ascending, then `rank_on` in the requested direction.
pub fn top(step: &TopStep, frame: DataFrame) -> StepResult<DataFrame> {
    if step.limit == 0 {
        return Err(StepError::invalid("top limit must be positive"));
    }
    let rank_on = frame.resolve(&step.rank_on)?;
    let groups = frame.resolve_all(&step.groups)?;
    let mut keys = ascending(&groups);
    keys.push((rank_on, step.sort));
    let sorted = sort_by(frame.lazy(), &keys);

    if groups.is_empty() {
        let limit = IdxSize::try_from(step.limit).unwrap_or(IdxSize::MAX);
        return Ok(sorted.limit(limit).collect()?);
    }
    // Rows of a group are contiguous once sorted.
    let position = col(ROW_INDEX) - col(ROW_INDEX).min().over(cols(&groups));
    let limit = i64::try_from(step.limit).unwrap_or(i64::MAX);
    Ok(sorted
        .with_row_index(ROW_INDEX, None)
        .filter(position.lt(lit(limit)))
        .drop([ROW_INDEX])
        .collect()?)
}

/// Ranks within each group. Null values get a null rank.
pub fn rank(step: &RankStep, frame: DataFrame) -> StepResult<DataFrame> {
    let value = frame.resolve(&step.value_col)?;
    let groups = frame.resolve_all(&step.groupby)?;
    let output = step.output_column();
    frame.require_absent(&output)?;

    let options = RankOptions {
        method: match step.method {
            RankMethod::Standard => polars::prelude::RankMethod::Min,
            RankMethod::Dense => polars::prelude::RankMethod::Dense,
        },
        descending: step.order == SortOrder::Desc,
    };
    let ranked = col(&value).rank(options, None).cast(DataType::Int64);
    Ok(frame
        .lazy()
        .with_columns([windowed(ranked, &groups).alias(&output)])
        .collect()?)
}

/// Running sums in reference order, per group. Rows come out sorted by the
/// groups, then the reference column. A null value adds nothing; the sum
/// stays null until a group's first value.
pub fn cumsum(step: &CumsumStep, frame: DataFrame) -> StepResult<DataFrame> {
    if step.to_cum_sum.is_empty() {
        return Err(StepError::invalid("cumsum needs at least one column"));
    }
    let reference = frame.resolve(&step.reference_column)?;
    let groups = frame.resolve_all(&step.groupby)?;

    let mut sums = Vec::with_capacity(step.to_cum_sum.len());
    let mut outputs: Vec<String> = Vec::new();
    for (source, new) in &step.to_cum_sum {
        let source = frame.resolve(source)?;
        require_numeric(&frame, &source, "cumsum")?;
        let output = if new.is_empty() {
            format!("{}_CUMSUM", source)
        } else {
            new.clone()
        };
        if !same_name(&output, &source) {
            frame.require_absent(&output)?;
        }
        // Replace in place when the output names an existing column.
        let output = frame.resolve(&output).unwrap_or(output);
        if outputs.iter().any(|o| same_name(o, &output)) {
            return Err(StepError::invalid(format!(
                "cumsum produces '{}' twice",
                output
            )));
        }
        let seen = col(&source).is_not_null().cast(DataType::Int64).cum_sum(false);
        let running = col(&source).fill_null(lit(0)).cum_sum(false);
        sums.push(
            when(windowed(seen, &groups).eq(lit(0)))
                .then(lit(NULL))
                .otherwise(windowed(running, &groups))
                .alias(&output),
        );
        outputs.push(output);
    }

    let mut keys = ascending(&groups);
    keys.push((reference, SortOrder::Asc));
    Ok(sort_by(frame.lazy(), &keys).with_columns(sums).collect()?)
}

/// Share of each value in its group's total; null when the total is zero.
pub fn percentage(step: &PercentageStep, frame: DataFrame) -> StepResult<DataFrame> {
    let column = frame.resolve(&step.column)?;
    let groups = frame.resolve_all(&step.group)?;
    let output = step.output_column();
    frame.require_absent(&output)?;
    require_numeric(&frame, &column, "percentage")?;

    let total = windowed(col(&column).sum(), &groups).cast(DataType::Float64);
    let share = when(total.clone().eq(lit(0.0)))
        .then(lit(NULL))
        .otherwise(col(&column).cast(DataType::Float64) / total);
    Ok(frame
        .lazy()
        .with_columns([share.alias(&output)])
        .collect()?)
}

#[derive(Debug, Clone, Copy)]
pub enum Extremum {
    Max,
    Min,
}

/// Rows holding the maximum or minimum of a column per group. Ties keep
/// every matching row; groups without values are dropped.
pub fn arg_extremum(
    step: &ArgExtremumStep,
    frame: DataFrame,
    wanted: Extremum,
) -> StepResult<DataFrame> {
    let column = frame.resolve(&step.column)?;
    let groups = frame.resolve_all(&step.groups)?;
    let extremum = match wanted {
        Extremum::Max => col(&column).max(),
        Extremum::Min => col(&column).min(),
    };
    Ok(frame
        .lazy()
        .filter(col(&column).eq(windowed(extremum, &groups)))
        .collect()?)
}
