//! Moving data in and out of polars frames.
//!
//! Steps run on [`DataFrame`]s; this module converts JSON records and cell
//! [`Value`]s to typed columns and back, and resolves column names the way
//! the relational metadata tracker does: exact first, then
//! case-insensitive.

use chrono::{DateTime, NaiveDate};
use polars::prelude::*;
use serde_json::{Map, Value as JsonValue};

use crate::error::{SchemaError, StepError, StepResult};
use crate::relational::CURRENT_TABLE;
use crate::step::SortOrder;

use super::{parse_date, Value};

/// Extension methods of [`DataFrame`] used by the step executors.
pub trait FrameExt: Sized {
    /// Build a frame from JSON objects. Columns appear in order of first
    /// appearance; keys missing from a record read as null.
    fn from_records(records: &[JsonValue]) -> StepResult<Self>;

    /// Build a frame from rows of cells.
    fn from_cells(columns: &[String], rows: Vec<Vec<Value>>) -> StepResult<Self>;

    fn to_records(&self) -> Vec<JsonValue>;

    /// Every row as cells, top to bottom.
    fn cells(&self) -> Vec<Vec<Value>>;

    /// Cells of one column.
    fn column_values(&self, name: &str) -> StepResult<Vec<Value>>;

    fn column_names(&self) -> Vec<String>;

    /// Actual name of the column matching `name`.
    fn resolve(&self, name: &str) -> Result<String, SchemaError>;

    fn resolve_all<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<String>, SchemaError>;

    fn has_column(&self, name: &str) -> bool;

    fn require_absent(&self, name: &str) -> Result<(), SchemaError>;
}

impl FrameExt for DataFrame {
    fn from_records(records: &[JsonValue]) -> StepResult<Self> {
        let mut columns: Vec<String> = Vec::new();
        let mut objects = Vec::with_capacity(records.len());
        for record in records {
            let object = record.as_object().ok_or_else(|| {
                StepError::Type(format!("record {} is not an object", record))
            })?;
            for key in object.keys() {
                if !columns.contains(key) {
                    columns.push(key.clone());
                }
            }
            objects.push(object);
        }
        let rows = objects
            .iter()
            .map(|object| {
                columns
                    .iter()
                    .map(|c| object.get(c).map(Value::from_json).unwrap_or(Value::Null))
                    .collect()
            })
            .collect();
        Self::from_cells(&columns, rows)
    }

    fn from_cells(columns: &[String], rows: Vec<Vec<Value>>) -> StepResult<Self> {
        for (i, name) in columns.iter().enumerate() {
            if columns[..i].iter().any(|c| same_name(c, name)) {
                return Err(duplicate(name).into());
            }
        }
        if let Some(row) = rows.iter().find(|r| r.len() != columns.len()) {
            return Err(StepError::Type(format!(
                "row has {} values for {} columns",
                row.len(),
                columns.len()
            )));
        }
        let mut series = Vec::with_capacity(columns.len());
        for (idx, name) in columns.iter().enumerate() {
            let values: Vec<Value> = rows.iter().map(|row| row[idx].clone()).collect();
            series.push(to_series(name, &values)?);
        }
        Ok(DataFrame::new(series)?)
    }

    fn to_records(&self) -> Vec<JsonValue> {
        let names = self.column_names();
        self.cells()
            .into_iter()
            .map(|row| {
                let object: Map<String, JsonValue> = names
                    .iter()
                    .cloned()
                    .zip(row.iter().map(Value::to_json))
                    .collect();
                JsonValue::Object(object)
            })
            .collect()
    }

    fn cells(&self) -> Vec<Vec<Value>> {
        let columns: Vec<Vec<Value>> = self.get_columns().iter().map(from_series).collect();
        (0..self.height())
            .map(|i| columns.iter().map(|c| c[i].clone()).collect())
            .collect()
    }

    fn column_values(&self, name: &str) -> StepResult<Vec<Value>> {
        let name = self.resolve(name)?;
        Ok(from_series(self.column(&name)?))
    }

    fn column_names(&self) -> Vec<String> {
        self.get_column_names()
            .into_iter()
            .map(String::from)
            .collect()
    }

    fn resolve(&self, name: &str) -> Result<String, SchemaError> {
        let names = self.get_column_names();
        names
            .iter()
            .find(|c| **c == name)
            .or_else(|| names.iter().find(|c| same_name(c, name)))
            .map(|c| c.to_string())
            .ok_or_else(|| SchemaError::UnknownColumn {
                table: CURRENT_TABLE.to_string(),
                column: name.to_string(),
            })
    }

    fn resolve_all<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<String>, SchemaError> {
        names.iter().map(|n| self.resolve(n.as_ref())).collect()
    }

    fn has_column(&self, name: &str) -> bool {
        self.resolve(name).is_ok()
    }

    fn require_absent(&self, name: &str) -> Result<(), SchemaError> {
        if self.has_column(name) {
            return Err(duplicate(name));
        }
        Ok(())
    }
}

pub(crate) fn duplicate(name: &str) -> SchemaError {
    SchemaError::DuplicateColumn {
        table: CURRENT_TABLE.to_string(),
        column: name.to_string(),
    }
}

/// Column expressions for a list of resolved names.
pub(crate) fn cols(names: &[String]) -> Vec<Expr> {
    names.iter().map(|n| col(n)).collect()
}

/// Stable sort on `(column, direction)` keys. Nulls sort first.
pub(crate) fn sort_by(frame: LazyFrame, keys: &[(String, SortOrder)]) -> LazyFrame {
    if keys.is_empty() {
        return frame;
    }
    let exprs: Vec<Expr> = keys.iter().map(|(c, _)| col(c)).collect();
    let descending: Vec<bool> = keys.iter().map(|(_, o)| *o == SortOrder::Desc).collect();
    frame.sort_by_exprs(
        exprs,
        SortMultipleOptions::default()
            .with_order_descendings(descending)
            .with_maintain_order(true),
    )
}

/// Keys sorted ascending, as grouped output comes out.
pub(crate) fn ascending(names: &[String]) -> Vec<(String, SortOrder)> {
    names.iter().map(|n| (n.clone(), SortOrder::Asc)).collect()
}

/// A JSON scalar as a literal expression.
pub(crate) fn json_lit(value: &JsonValue) -> Expr {
    value_lit(&Value::from_json(value))
}

/// Literal for `value` compared with or stored in a column of type `dtype`;
/// text bound for a date column is read as a date.
pub(crate) fn typed_lit(value: &JsonValue, dtype: &DataType) -> Expr {
    match (value, dtype) {
        (JsonValue::String(text), DataType::Datetime(_, _) | DataType::Date) => {
            match parse_date(text) {
                Some(d) => value_lit(&Value::Date(d)),
                None => json_lit(value),
            }
        }
        _ => json_lit(value),
    }
}

pub(crate) fn value_lit(value: &Value) -> Expr {
    match value {
        Value::Null => lit(NULL),
        Value::Bool(b) => lit(*b),
        Value::Int(i) => lit(*i),
        Value::Float(f) => lit(*f),
        Value::Text(s) => lit(s.clone()),
        Value::Date(d) => lit(d.timestamp_millis())
            .cast(DataType::Datetime(TimeUnit::Milliseconds, None)),
    }
}

/// Broad type of the cells of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Null,
    Bool,
    Int,
    Float,
    Text,
    Date,
}

fn kind_of(value: &Value) -> Kind {
    match value {
        Value::Null => Kind::Null,
        Value::Bool(_) => Kind::Bool,
        Value::Int(_) => Kind::Int,
        Value::Float(_) => Kind::Float,
        Value::Text(_) => Kind::Text,
        Value::Date(_) => Kind::Date,
    }
}

/// Build a typed column. Integers mixed with floats widen to floats; any
/// other mix is rejected.
pub(crate) fn to_series(name: &str, values: &[Value]) -> StepResult<Series> {
    let mut kind = Kind::Null;
    for value in values {
        kind = match (kind, kind_of(value)) {
            (current, Kind::Null) => current,
            (Kind::Null, next) => next,
            (Kind::Int, Kind::Float) | (Kind::Float, Kind::Int) => Kind::Float,
            (current, next) if current == next => current,
            (_, _) => {
                return Err(StepError::Type(format!(
                    "column '{}' mixes {} and other values",
                    name,
                    value.type_name()
                )))
            }
        };
    }
    let series = match kind {
        Kind::Null => Series::full_null(name, values.len(), &DataType::Null),
        Kind::Bool => Series::new(
            name,
            values
                .iter()
                .map(|v| match v {
                    Value::Bool(b) => Some(*b),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        ),
        Kind::Int => Series::new(
            name,
            values
                .iter()
                .map(|v| match v {
                    Value::Int(i) => Some(*i),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        ),
        Kind::Float => Series::new(name, values.iter().map(Value::as_f64).collect::<Vec<_>>()),
        Kind::Text => Series::new(name, values.iter().map(Value::as_str).collect::<Vec<_>>()),
        Kind::Date => Series::new(
            name,
            values
                .iter()
                .map(|v| match v {
                    Value::Date(d) => Some(d.timestamp_millis()),
                    _ => None,
                })
                .collect::<Vec<_>>(),
        )
        .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?,
    };
    Ok(series)
}

/// Whether two column names match once case is folded. Folds the same way
/// as the relational metadata tracker.
pub(crate) fn same_name(a: &str, b: &str) -> bool {
    a == b || a.to_uppercase() == b.to_uppercase()
}

/// Type shared by columns stacked on top of each other. Null columns take
/// any type; integers widen to floats.
pub(crate) fn common_dtype<'a>(
    name: &str,
    dtypes: impl IntoIterator<Item = &'a DataType>,
) -> StepResult<DataType> {
    let mut common = DataType::Null;
    for dtype in dtypes {
        common = match (common, dtype) {
            (current, DataType::Null) => current,
            (DataType::Null, next) => next.clone(),
            (current, next) if current == *next => current,
            (current, next) if current.is_numeric() && next.is_numeric() => DataType::Float64,
            (current, next) => {
                return Err(StepError::Type(format!(
                    "column '{}' mixes {} and {}",
                    name, current, next
                )))
            }
        };
    }
    Ok(common)
}

/// Cells of a column.
pub(crate) fn from_series(series: &Series) -> Vec<Value> {
    (0..series.len())
        .map(|i| series.get(i).map(from_any).unwrap_or(Value::Null))
        .collect()
}

fn from_any(value: AnyValue) -> Value {
    match value {
        AnyValue::Null => Value::Null,
        AnyValue::Boolean(b) => Value::Bool(b),
        AnyValue::Float32(f) => Value::Float(f64::from(f)),
        AnyValue::Float64(f) => Value::Float(f),
        AnyValue::Datetime(v, unit, _) => {
            let millis = match unit {
                TimeUnit::Nanoseconds => v.div_euclid(1_000_000),
                TimeUnit::Microseconds => v.div_euclid(1_000),
                TimeUnit::Milliseconds => v,
            };
            Value::from(DateTime::from_timestamp_millis(millis))
        }
        AnyValue::Date(days) => NaiveDate::from_num_days_from_ce_opt(days + 719_163)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|naive| Value::from(naive.and_utc()))
            .unwrap_or(Value::Null),
        other => {
            if let Some(text) = other.get_str() {
                return Value::Text(text.to_string());
            }
            match other.try_extract::<i64>() {
                Ok(i) => Value::Int(i),
                Err(_) => Value::Text(other.to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> DataFrame {
        DataFrame::from_records(&[
            json!({"city": "Paris", "sales": 3}),
            json!({"city": "Lyon", "sales": null}),
            json!({"city": "Nice", "sales": 1, "extra": true}),
        ])
        .unwrap()
    }

    #[test]
    fn test_from_records_unions_keys() {
        let frame = sample();
        assert_eq!(frame.column_names(), ["city", "sales", "extra"]);
        assert_eq!(frame.cells()[0][2], Value::Null);
        assert_eq!(frame.to_records()[2], json!({"city": "Nice", "sales": 1, "extra": true}));
        assert_eq!(frame.column("sales").unwrap().dtype(), &DataType::Int64);
    }

    #[test]
    fn test_numbers_widen_and_other_mixes_fail() {
        let frame = DataFrame::from_records(&[json!({"v": 1}), json!({"v": 2.5})]).unwrap();
        assert_eq!(frame.column("v").unwrap().dtype(), &DataType::Float64);
        assert_eq!(frame.to_records()[0], json!({"v": 1.0}));
        let err = DataFrame::from_records(&[json!({"v": 1}), json!({"v": "x"})]).unwrap_err();
        assert!(matches!(err, StepError::Type(_)));
    }

    #[test]
    fn test_dates_render_in_utc() {
        let d = crate::tabular::parse_date("2024-03-01T14:30:00+02:00").unwrap();
        let frame =
            DataFrame::from_cells(&["d".to_string()], vec![vec![Value::Date(d)]]).unwrap();
        assert!(matches!(frame.column("d").unwrap().dtype(), DataType::Datetime(_, _)));
        assert_eq!(frame.to_records(), vec![json!({"d": "2024-03-01T12:30:00.000Z"})]);
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let frame = sample();
        assert_eq!(frame.resolve("SALES").unwrap(), "sales");
        let err = frame.resolve("missing").unwrap_err();
        assert_eq!(
            err,
            SchemaError::UnknownColumn {
                table: "__CURRENT__".into(),
                column: "missing".into()
            }
        );
    }

    #[test]
    fn test_lookup_folds_unicode_case() {
        let frame = DataFrame::from_records(&[json!({"straße": 1, "größe": 2})]).unwrap();
        assert_eq!(frame.resolve("STRASSE").unwrap(), "straße");
        assert_eq!(frame.resolve("GRÖSSE").unwrap(), "größe");
        let err = DataFrame::from_cells(&["été".into(), "ÉTÉ".into()], Vec::new()).unwrap_err();
        assert!(matches!(err, StepError::Schema(SchemaError::DuplicateColumn { .. })));
    }

    #[test]
    fn test_duplicate_columns_rejected() {
        let err = DataFrame::from_cells(&["a".into(), "A".into()], Vec::new()).unwrap_err();
        assert!(matches!(err, StepError::Schema(SchemaError::DuplicateColumn { .. })));
        assert!(sample().require_absent("City").is_err());
    }

    #[test]
    fn test_sort_puts_nulls_first() {
        let sorted = sort_by(sample().lazy(), &[("sales".into(), SortOrder::Asc)])
            .collect()
            .unwrap();
        let cities: Vec<Value> = sorted.column_values("city").unwrap();
        assert_eq!(cities, vec![Value::from("Lyon"), Value::from("Nice"), Value::from("Paris")]);
    }

    #[test]
    fn test_common_dtype() {
        let int = DataType::Int64;
        let float = DataType::Float64;
        let text = DataType::String;
        assert_eq!(common_dtype("v", [&DataType::Null, &int]).unwrap(), int);
        assert_eq!(common_dtype("v", [&int, &float]).unwrap(), float);
        assert!(common_dtype("v", [&int, &text]).is_err());
    }
}
