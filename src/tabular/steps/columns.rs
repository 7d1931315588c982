//! Column-level steps: projection, renaming and per-value rewrites.

use polars::prelude::*;
use serde_json::Value as JsonValue;

use crate::error::{SchemaError, StepError, StepResult};
use crate::relational::CURRENT_TABLE;
use crate::step::{
    ColumnStep, ColumnsStep, ConcatenateStep, ConvertStep, ConvertType, DuplicateStep, FillnaStep,
    RenameStep, ReplaceStep, SplitStep, TextStep,
};
use crate::tabular::frame::{cols, to_series, typed_lit};
use crate::tabular::{parse_date, FrameExt, Value};

use super::contains;

pub fn select(step: &ColumnsStep, frame: DataFrame) -> StepResult<DataFrame> {
    if step.columns.is_empty() {
        return Err(StepError::invalid("select needs at least one column"));
    }
    let names = frame.resolve_all(&step.columns)?;
    Ok(frame.lazy().select(cols(&names)).collect()?)
}

pub fn delete(step: &ColumnsStep, frame: DataFrame) -> StepResult<DataFrame> {
    frame.resolve_all(&step.columns)?;
    let remaining: Vec<String> = frame
        .column_names()
        .into_iter()
        .filter(|c| !contains(&step.columns, c))
        .collect();
    if remaining.is_empty() {
        return Err(StepError::invalid("delete would remove every column"));
    }
    Ok(frame.lazy().select(cols(&remaining)).collect()?)
}

/// Renames apply in order, so a pair may refer to the result of an earlier
/// one.
pub fn rename(step: &RenameStep, mut frame: DataFrame) -> StepResult<DataFrame> {
    for (from, to) in &step.to_rename {
        let current = frame.resolve(from)?;
        if let Ok(existing) = frame.resolve(to) {
            if existing != current {
                return Err(SchemaError::DuplicateColumn {
                    table: CURRENT_TABLE.to_string(),
                    column: to.clone(),
                }
                .into());
            }
        }
        frame.rename(&current, to)?;
    }
    Ok(frame)
}

pub fn duplicate(step: &DuplicateStep, frame: DataFrame) -> StepResult<DataFrame> {
    let source = frame.resolve(&step.column)?;
    frame.require_absent(&step.new_column_name)?;
    Ok(frame
        .lazy()
        .with_columns([col(&source).alias(&step.new_column_name)])
        .collect()?)
}

pub fn text(step: &TextStep, frame: DataFrame) -> StepResult<DataFrame> {
    let name = frame
        .resolve(&step.new_column)
        .unwrap_or_else(|_| step.new_column.clone());
    Ok(frame
        .lazy()
        .with_columns([lit(step.text.clone()).alias(&name)])
        .collect()?)
}

pub fn fillna(step: &FillnaStep, frame: DataFrame) -> StepResult<DataFrame> {
    let mut filled = Vec::with_capacity(step.columns.len());
    for name in &step.columns {
        let name = frame.resolve(name)?;
        let dtype = frame.column(&name)?.dtype().clone();
        check_value_type(&name, &dtype, &step.value)?;
        filled.push(col(&name).fill_null(typed_lit(&step.value, &dtype)).alias(&name));
    }
    Ok(frame.lazy().with_columns(filled).collect()?)
}

pub fn replace(step: &ReplaceStep, frame: DataFrame) -> StepResult<DataFrame> {
    let name = frame.resolve(&step.search_column)?;
    if step.to_replace.is_empty() {
        return Err(StepError::invalid("replace needs at least one value pair"));
    }
    let dtype = frame.column(&name)?.dtype().clone();
    for (old, new) in &step.to_replace {
        check_value_type(&name, &dtype, old)?;
        check_value_type(&name, &dtype, new)?;
    }
    // The first matching pair wins, so it ends up outermost.
    let replaced = step
        .to_replace
        .iter()
        .rev()
        .filter(|(old, _)| !old.is_null())
        .fold(col(&name), |rest, (old, new)| {
            when(col(&name).eq(typed_lit(old, &dtype)))
                .then(typed_lit(new, &dtype))
                .otherwise(rest)
        });
    Ok(frame
        .lazy()
        .with_columns([replaced.alias(&name)])
        .collect()?)
}

#[derive(Debug, Clone, Copy)]
pub enum Case {
    Lower,
    Upper,
}

pub fn change_case(step: &ColumnStep, frame: DataFrame, case: Case) -> StepResult<DataFrame> {
    let name = frame.resolve(&step.column)?;
    match frame.column(&name)?.dtype().clone() {
        DataType::String => {}
        DataType::Null => return Ok(frame),
        other => {
            return Err(StepError::Type(format!(
                "changing case needs a text column, '{}' holds {}",
                name, other
            )))
        }
    }
    let changed = match case {
        Case::Lower => col(&name).str().to_lowercase(),
        Case::Upper => col(&name).str().to_uppercase(),
    };
    Ok(frame.lazy().with_columns([changed.alias(&name)]).collect()?)
}

pub fn convert(step: &ConvertStep, mut frame: DataFrame) -> StepResult<DataFrame> {
    for name in frame.resolve_all(&step.columns)? {
        let converted = frame
            .column_values(&name)?
            .iter()
            .map(|cell| convert_value(cell, step.data_type))
            .collect::<StepResult<Vec<Value>>>()?;
        frame.with_column(to_series(&name, &converted)?)?;
    }
    Ok(frame)
}

fn convert_value(cell: &Value, target: ConvertType) -> StepResult<Value> {
    let fail = || {
        StepError::Type(format!(
            "cannot convert {} value '{}' to {:?}",
            cell.type_name(),
            cell,
            target
        ))
    };
    Ok(match (target, cell) {
        (_, Value::Null) => Value::Null,
        (ConvertType::Text, other) => Value::from(other.to_text()),
        (ConvertType::Integer, Value::Int(i)) => Value::Int(*i),
        (ConvertType::Integer, Value::Float(f)) => Value::Int(f.trunc() as i64),
        (ConvertType::Integer, Value::Bool(b)) => Value::Int(i64::from(*b)),
        (ConvertType::Integer, Value::Text(s)) => {
            let s = s.trim();
            match s.parse::<i64>() {
                Ok(i) => Value::Int(i),
                Err(_) => Value::Int(s.parse::<f64>().map_err(|_| fail())?.trunc() as i64),
            }
        }
        (ConvertType::Float, Value::Int(i)) => Value::Float(*i as f64),
        (ConvertType::Float, Value::Float(f)) => Value::Float(*f),
        (ConvertType::Float, Value::Bool(b)) => Value::Float(if *b { 1.0 } else { 0.0 }),
        (ConvertType::Float, Value::Text(s)) => {
            Value::Float(s.trim().parse::<f64>().map_err(|_| fail())?)
        }
        (ConvertType::Date, Value::Date(d)) => Value::Date(*d),
        (ConvertType::Date, Value::Text(s)) => Value::Date(parse_date(s).ok_or_else(fail)?),
        (ConvertType::Boolean, Value::Bool(b)) => Value::Bool(*b),
        (ConvertType::Boolean, Value::Int(i)) => Value::Bool(*i != 0),
        (ConvertType::Boolean, Value::Float(f)) => Value::Bool(*f != 0.0),
        (ConvertType::Boolean, Value::Text(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Value::Bool(true),
            "false" | "0" => Value::Bool(false),
            _ => return Err(fail()),
        },
        _ => return Err(fail()),
    })
}

/// Null when any part is null, as SQL string concatenation.
pub fn concatenate(step: &ConcatenateStep, frame: DataFrame) -> StepResult<DataFrame> {
    if step.columns.is_empty() {
        return Err(StepError::invalid("concatenate needs at least one column"));
    }
    let parts: Vec<Expr> = frame
        .resolve_all(&step.columns)?
        .iter()
        .map(|c| col(c).cast(DataType::String))
        .collect();
    frame.require_absent(&step.new_column_name)?;
    Ok(frame
        .lazy()
        .with_columns([concat_str(parts, &step.separator, false).alias(&step.new_column_name)])
        .collect()?)
}

pub fn split(step: &SplitStep, mut frame: DataFrame) -> StepResult<DataFrame> {
    if step.number_cols_to_keep == 0 {
        return Err(StepError::invalid("split must keep at least one part"));
    }
    if step.delimiter.is_empty() {
        return Err(StepError::invalid("split delimiter is empty"));
    }
    let source = frame.column_values(&step.column)?;
    let outputs = step.output_columns();
    for name in &outputs {
        frame.require_absent(name)?;
    }
    for (n, name) in outputs.iter().enumerate() {
        let parts: Vec<Value> = source
            .iter()
            .map(|cell| {
                let part = cell
                    .to_text()
                    .and_then(|text| text.split(step.delimiter.as_str()).nth(n).map(String::from));
                Value::from(part)
            })
            .collect();
        frame.with_column(to_series(name, &parts)?)?;
    }
    Ok(frame)
}

/// Reject literal values that do not fit the type of a column.
fn check_value_type(column: &str, dtype: &DataType, value: &JsonValue) -> StepResult<()> {
    let numeric = dtype.is_numeric();
    let compatible = match value {
        JsonValue::Null => true,
        JsonValue::String(_) => !numeric && *dtype != DataType::Boolean,
        JsonValue::Number(_) => *dtype != DataType::String,
        JsonValue::Bool(_) => matches!(dtype, DataType::Boolean | DataType::Null),
        JsonValue::Array(_) | JsonValue::Object(_) => false,
    };
    if compatible {
        Ok(())
    } else {
        Err(StepError::Type(format!(
            "value {} does not fit column '{}' of type {}",
            value, column, dtype
        )))
    }
}
