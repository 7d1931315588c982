//! `filter`: keep the rows matching a condition tree.
//!
//! Comparisons follow SQL: a null cell never satisfies a positive operator,
//! while negative operators (`ne`, `nin`, `notmatches`) keep null cells.
//! Regular expressions are evaluated per cell into temporary boolean
//! columns, dropped once the rows are filtered.

use polars::prelude::*;
use regex::Regex;

use crate::error::{StepError, StepResult};
use crate::step::{Condition, FilterStep, Operator, SimpleCondition};
use crate::tabular::frame::{to_series, typed_lit};
use crate::tabular::{FrameExt, Value};

const MATCH_PREFIX: &str = "__stepforge_match_";

pub fn filter(step: &FilterStep, frame: DataFrame) -> StepResult<DataFrame> {
    let mut compiler = Compiler {
        frame,
        matches: Vec::new(),
    };
    let predicate = compiler.compile(&step.condition)?;
    let Compiler { frame, matches } = compiler;
    Ok(frame
        .lazy()
        .filter(predicate)
        .drop(matches)
        .collect()?)
}

/// Binds a condition tree to the columns of one frame.
struct Compiler {
    frame: DataFrame,
    /// Temporary regex match columns added so far.
    matches: Vec<String>,
}

impl Compiler {
    fn compile(&mut self, condition: &Condition) -> StepResult<Expr> {
        match condition {
            Condition::And { and } => Ok(self.children(and)?.into_iter().reduce(Expr::and)),
            Condition::Or { or } => Ok(self.children(or)?.into_iter().reduce(Expr::or)),
            Condition::Simple(simple) => self.simple(simple).map(Some),
        }
        .and_then(|expr| expr.ok_or_else(|| StepError::invalid("empty condition group")))
    }

    fn children(&mut self, conditions: &[Condition]) -> StepResult<Vec<Expr>> {
        if conditions.is_empty() {
            return Err(StepError::invalid("empty condition group"));
        }
        conditions.iter().map(|c| self.compile(c)).collect()
    }

    fn simple(&mut self, simple: &SimpleCondition) -> StepResult<Expr> {
        let name = self.frame.resolve(&simple.column)?;
        let dtype = self.frame.column(&name)?.dtype().clone();
        let column = || col(&name);
        let target = || typed_lit(&simple.value, &dtype);
        let any_of = || {
            simple
                .values()
                .iter()
                .map(|v| column().eq(typed_lit(v, &dtype)))
                .reduce(Expr::or)
                .unwrap_or_else(|| lit(false))
        };
        Ok(match simple.operator {
            Operator::Eq if simple.value.is_null() => column().is_null(),
            Operator::Ne if simple.value.is_null() => column().is_not_null(),
            Operator::Eq => column().eq(target()),
            Operator::Ne => column().neq(target()).or(column().is_null()),
            Operator::Gt => column().gt(target()),
            Operator::Ge => column().gt_eq(target()),
            Operator::Lt => column().lt(target()),
            Operator::Le => column().lt_eq(target()),
            Operator::In => any_of(),
            Operator::Nin => any_of().not().or(column().is_null()),
            Operator::IsNull => column().is_null(),
            Operator::NotNull => column().is_not_null(),
            Operator::Matches => self.regex_column(simple, &name)?,
            Operator::NotMatches => self
                .regex_column(simple, &name)?
                .not()
                .or(column().is_null()),
        })
    }

    /// Add a boolean column telling whether each cell matches the pattern of
    /// `simple`; null cells stay null.
    fn regex_column(&mut self, simple: &SimpleCondition, name: &str) -> StepResult<Expr> {
        let source = simple.pattern().ok_or_else(|| {
            StepError::invalid(format!(
                "regular expression filter on '{}' needs a string pattern",
                simple.column
            ))
        })?;
        let regex = Regex::new(source).map_err(|e| {
            StepError::invalid(format!("invalid regular expression '{}': {}", source, e))
        })?;
        let matched: Vec<Value> = self
            .frame
            .column_values(name)?
            .iter()
            .map(|cell| Value::from(cell.to_text().map(|text| regex.is_match(&text))))
            .collect();
        let column = format!("{}{}", MATCH_PREFIX, self.matches.len());
        self.frame.with_column(to_series(&column, &matched)?)?;
        let expr = col(&column).cast(DataType::Boolean);
        self.matches.push(column);
        Ok(expr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tabular::steps::test_support::records;
    use serde_json::{json, Value as JsonValue};

    fn dated() -> Vec<JsonValue> {
        vec![
            json!({"d": "2024-01-01", "v": 1}),
            json!({"d": "2024-02-01", "v": 2}),
        ]
    }

    fn rows() -> Vec<JsonValue> {
        vec![
            json!({"country": "FR", "price": 12}),
            json!({"country": "DE", "price": 5}),
            json!({"country": null, "price": 20}),
            json!({"country": "US", "price": null}),
        ]
    }

    fn run(condition: JsonValue) -> StepResult<Vec<JsonValue>> {
        let condition: Condition = serde_json::from_value(condition).unwrap();
        records(&rows(), crate::step::Step::Filter(FilterStep { condition })).map_err(|e| e.source)
    }

    fn countries(out: &[JsonValue]) -> Vec<JsonValue> {
        out.iter().map(|r| r["country"].clone()).collect()
    }

    #[test]
    fn test_nested_condition() {
        let out = run(json!({"and": [
            {"column": "country", "operator": "in", "value": ["FR", "DE"]},
            {"or": [
                {"column": "price", "operator": "gt", "value": 10},
                {"column": "price", "operator": "isnull"}
            ]}
        ]}))
        .unwrap();
        assert_eq!(countries(&out), vec![json!("FR")]);
    }

    #[test]
    fn test_negative_operators_keep_nulls() {
        let out = run(json!({"column": "country", "operator": "ne", "value": "FR"})).unwrap();
        assert_eq!(countries(&out), vec![json!("DE"), json!(null), json!("US")]);
        let out = run(json!({"column": "country", "operator": "nin", "value": ["FR", "DE"]})).unwrap();
        assert_eq!(countries(&out), vec![json!(null), json!("US")]);
        let out = run(json!({"column": "price", "operator": "lt", "value": 15})).unwrap();
        assert_eq!(countries(&out), vec![json!("FR"), json!("DE")]);
    }

    #[test]
    fn test_eq_null_means_is_null() {
        let out = run(json!({"column": "country", "operator": "eq", "value": null})).unwrap();
        assert_eq!(out.len(), 1);
        let out = run(json!({"column": "country", "operator": "ne", "value": null})).unwrap();
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn test_regex_operators() {
        let out = run(json!({"column": "country", "operator": "matches", "value": "^[DF]"})).unwrap();
        assert_eq!(countries(&out), vec![json!("FR"), json!("DE")]);
        let out = run(json!({"column": "country", "operator": "notmatches", "value": "^[DF]"})).unwrap();
        assert_eq!(countries(&out), vec![json!(null), json!("US")]);
        let err = run(json!({"column": "country", "operator": "matches", "value": "("})).unwrap_err();
        assert!(matches!(err, StepError::InvalidStep(_)));
    }

    #[test]
    fn test_unknown_column_and_empty_group() {
        let err = run(json!({"column": "nope", "operator": "eq", "value": 1})).unwrap_err();
        assert!(matches!(err, StepError::Schema(_)));
        assert!(run(json!({"or": []})).is_err());
    }

    #[test]
    fn test_matches_columns_are_dropped() {
        let out = run(json!({"or": [
            {"column": "country", "operator": "matches", "value": "^F"},
            {"column": "country", "operator": "matches", "value": "^D"}
        ]}))
        .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], json!({"country": "FR", "price": 12}));
    }

    #[test]
    fn test_text_bound_compares_with_date_column() {
        let steps = vec![
            crate::step::Step::Convert(crate::step::ConvertStep {
                columns: vec!["d".into()],
                data_type: crate::step::ConvertType::Date,
            }),
            crate::step::Step::Filter(FilterStep {
                condition: serde_json::from_value(
                    json!({"column": "d", "operator": "gt", "value": "2024-01-15"}),
                )
                .unwrap(),
            }),
        ];
        let out = crate::tabular::steps::test_support::run(&dated(), steps)
            .unwrap()
            .to_records();
        assert_eq!(out, vec![json!({"d": "2024-02-01T00:00:00.000Z", "v": 2})]);
    }
}
