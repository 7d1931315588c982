//! `filter`: a `$match` query.
//!
//! Negative operators (`ne`, `nin`, `notmatches`) keep documents whose field
//! is null or missing, like the other backends.

use serde_json::{json, Value as JsonValue};

use crate::document::expr::object;
use crate::document::Stage;
use crate::error::{StepError, StepResult};
use crate::step::{Condition, FilterStep, Operator, SimpleCondition};

pub fn filter(step: &FilterStep) -> StepResult<Vec<Stage>> {
    Ok(vec![object("$match", query(&step.condition)?)])
}

fn query(condition: &Condition) -> StepResult<JsonValue> {
    match condition {
        Condition::And { and } => compound("$and", and),
        Condition::Or { or } => compound("$or", or),
        Condition::Simple(simple) => comparison(simple),
    }
}

fn compound(operator: &str, children: &[Condition]) -> StepResult<JsonValue> {
    if children.is_empty() {
        return Err(StepError::invalid(format!(
            "'{}' condition has no children",
            operator.trim_start_matches('$')
        )));
    }
    let children = children.iter().map(query).collect::<StepResult<Vec<_>>>()?;
    Ok(object(operator, JsonValue::Array(children)))
}

fn comparison(condition: &SimpleCondition) -> StepResult<JsonValue> {
    let value = &condition.value;
    let test = match condition.operator {
        Operator::Eq => json!({ "$eq": value }),
        Operator::Ne => json!({ "$ne": value }),
        Operator::Gt => json!({ "$gt": value }),
        Operator::Ge => json!({ "$gte": value }),
        Operator::Lt => json!({ "$lt": value }),
        Operator::Le => json!({ "$lte": value }),
        Operator::In => json!({ "$in": condition.values() }),
        Operator::Nin => json!({ "$nin": condition.values() }),
        Operator::IsNull => json!({ "$eq": null }),
        Operator::NotNull => json!({ "$ne": null }),
        Operator::Matches => json!({ "$regex": pattern(condition)? }),
        Operator::NotMatches => json!({ "$not": { "$regex": pattern(condition)? } }),
    };
    Ok(object(&condition.column, test))
}

fn pattern(condition: &SimpleCondition) -> StepResult<&str> {
    condition.pattern().ok_or_else(|| {
        StepError::invalid(format!(
            "pattern for column '{}' must be a string",
            condition.column
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::steps::test_support::stages;
    use crate::step::Step;

    fn filter_step(condition: Condition) -> Step {
        Step::Filter(FilterStep { condition })
    }

    fn simple(column: &str, operator: Operator, value: JsonValue) -> Condition {
        Condition::Simple(SimpleCondition::new(column, operator, value))
    }

    #[test]
    fn test_nested_conditions() {
        let out = stages(filter_step(Condition::And {
            and: vec![
                simple("country", Operator::In, json!(["FR", "DE"])),
                Condition::Or {
                    or: vec![
                        simple("price", Operator::Ge, json!(10)),
                        simple("label", Operator::IsNull, JsonValue::Null),
                    ],
                },
            ],
        }))
        .unwrap();
        assert_eq!(
            out,
            vec![json!({"$match": {"$and": [
                {"country": {"$in": ["FR", "DE"]}},
                {"$or": [{"price": {"$gte": 10}}, {"label": {"$eq": null}}]}
            ]}})]
        );
    }

    #[test]
    fn test_regex_operators() {
        let out = stages(filter_step(simple("name", Operator::NotMatches, json!("^a"))))
            .unwrap();
        assert_eq!(out, vec![json!({"$match": {"name": {"$not": {"$regex": "^a"}}}})]);

        let err = stages(filter_step(simple("name", Operator::Matches, json!(3)))).unwrap_err();
        assert!(matches!(err.source, StepError::InvalidStep(_)));
    }

    #[test]
    fn test_empty_compound_is_rejected() {
        assert!(stages(filter_step(Condition::Or { or: vec![] })).is_err());
    }
}
