//! Filter conditions.
//!
//! Conditions arrive as a small tree: `{"and": [...]}`, `{"or": [...]}` or a
//! simple comparison `{"column": "x", "operator": "gt", "value": 3}`.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A (possibly compound) filter condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Condition {
    And { and: Vec<Condition> },
    Or { or: Vec<Condition> },
    Simple(SimpleCondition),
}

impl Condition {
    /// Columns referenced anywhere in the tree, in order of appearance.
    pub fn columns(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Condition::And { and: children } | Condition::Or { or: children } => {
                for child in children {
                    child.collect_columns(out);
                }
            }
            Condition::Simple(simple) => out.push(&simple.column),
        }
    }
}

/// A single comparison against a column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimpleCondition {
    pub column: String,
    pub operator: Operator,
    #[serde(default)]
    pub value: JsonValue,
}

impl SimpleCondition {
    pub fn new(column: &str, operator: Operator, value: JsonValue) -> Self {
        Self {
            column: column.into(),
            operator,
            value,
        }
    }

    /// The value as a list, for `in` / `nin`.
    pub fn values(&self) -> Vec<JsonValue> {
        match &self.value {
            JsonValue::Array(items) => items.clone(),
            JsonValue::Null => Vec::new(),
            other => vec![other.clone()],
        }
    }

    /// The value as a pattern, for `matches` / `notmatches`.
    pub fn pattern(&self) -> Option<&str> {
        self.value.as_str()
    }
}

/// Comparison operator of a [`SimpleCondition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    In,
    Nin,
    IsNull,
    NotNull,
    Matches,
    NotMatches,
}
