//! `dateextract`.

use std::collections::HashSet;

use polars::prelude::{DataFrame, DataType};

use crate::error::{StepError, StepResult};
use crate::step::DateExtractStep;
use crate::tabular::frame::to_series;
use crate::tabular::{FrameExt, TabularDates, Value};

/// Adds one column per requested unit. Text cells are parsed as dates;
/// cells that do not parse give null.
pub fn date_extract(step: &DateExtractStep, mut frame: DataFrame) -> StepResult<DataFrame> {
    if step.date_info.is_empty() {
        return Err(StepError::invalid("dateextract needs at least one unit"));
    }
    let source = frame.resolve(&step.column)?;
    match frame.column(&source)?.dtype() {
        DataType::String | DataType::Datetime(_, _) | DataType::Date | DataType::Null => {}
        other => {
            return Err(StepError::Type(format!(
                "dateextract on '{}' needs dates, found {}",
                step.column, other
            )))
        }
    }

    let outputs = step.outputs();
    let mut seen = HashSet::new();
    for (_, name) in &outputs {
        frame.require_absent(name)?;
        if !seen.insert(name.to_uppercase()) {
            return Err(StepError::invalid(format!(
                "dateextract produces '{}' twice",
                name
            )));
        }
    }
    let dates = frame.column_values(&source)?;
    for (unit, name) in outputs {
        let values = dates
            .iter()
            .map(|date| TabularDates.unit(unit, date))
            .collect::<StepResult<Vec<Value>>>()?;
        frame.with_column(to_series(&name, &values)?)?;
    }
    Ok(frame)
}
