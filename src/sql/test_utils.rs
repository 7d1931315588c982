//! Syntax validation of generated SQL.
//!
//! Tests parse emitted SQL with sqlparser-rs to catch malformed output
//! (unbalanced parentheses, misplaced commas, bad quoting) that string
//! assertions would miss.

use sqlparser::dialect::{
    BigQueryDialect, DuckDbDialect, GenericDialect, MsSqlDialect, MySqlDialect, PostgreSqlDialect,
    RedshiftSqlDialect, SnowflakeDialect,
};
use sqlparser::parser::Parser;

use super::dialect::Dialect;

/// Parse `sql` with the closest sqlparser dialect.
pub fn validate_sql(sql: &str, dialect: Dialect) -> Result<(), String> {
    let parser_dialect: Box<dyn sqlparser::dialect::Dialect> = match dialect {
        Dialect::Postgres => Box::new(PostgreSqlDialect {}),
        Dialect::Redshift => Box::new(RedshiftSqlDialect {}),
        Dialect::DuckDb => Box::new(DuckDbDialect {}),
        Dialect::Snowflake => Box::new(SnowflakeDialect {}),
        Dialect::BigQuery => Box::new(BigQueryDialect {}),
        Dialect::Databricks => Box::new(GenericDialect {}),
        Dialect::MySql => Box::new(MySqlDialect {}),
        Dialect::TSql => Box::new(MsSqlDialect {}),
    };

    Parser::parse_sql(&*parser_dialect, sql)
        .map(|_| ())
        .map_err(|e| format!("Invalid SQL for {}: {}\nSQL: {}", dialect, e, sql))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_valid_sql() {
        validate_sql("WITH a AS (SELECT 1 AS x) SELECT x FROM a", Dialect::Postgres).unwrap();
        validate_sql("SELECT * FROM `users`", Dialect::MySql).unwrap();
        validate_sql("SELECT * FROM [users]", Dialect::TSql).unwrap();
    }

    #[test]
    fn test_validate_invalid_sql() {
        assert!(validate_sql("SELEC * FORM users", Dialect::Postgres).is_err());
    }
}
