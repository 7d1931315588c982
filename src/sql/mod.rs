//! Typed SQL builder.
//!
//! - [`token`] - atomic output units, serialized per dialect
//! - [`expr`] - expression AST and builder DSL
//! - [`query`] - SELECT / CTE / UNION builder
//! - [`types`] - column types tracked per step
//! - [`dialect`] - capability table and date functions

pub mod dialect;
pub mod expr;
pub mod query;
pub mod token;
pub mod types;

#[cfg(test)]
pub mod test_utils;

pub use dialect::{Dialect, DialectCapabilities, SqlDates};
pub use expr::{
    avg, coalesce, col, count, count_distinct, count_star, func, lit_bool, lit_float, lit_int,
    lit_json, lit_null, lit_str, max, min, star, sum, table_col, table_star, BinaryOperator, Expr,
    ExprExt, Literal, SortDir, UnaryOperator, WindowExt, WindowFrame, WindowOrderBy,
};
pub use query::{Cte, CteBody, Join, JoinType, LimitOffset, OrderByExpr, Query, SelectExpr, TableRef};
pub use token::{Token, TokenStream};
pub use types::DataType;
