//! SQL dialects.
//!
//! A [`Dialect`] is a plain enum; everything that differs between databases
//! lives in its [`DialectCapabilities`] row. Rendering helpers on `Dialect`
//! only read that row.
//!
//! | Capability | Postgres | Redshift | DuckDB | Snowflake | BigQuery | Databricks | MySQL 5.7 | T-SQL |
//! |---|---|---|---|---|---|---|---|---|
//! | Window functions | ✓ | ✓ | ✓ | ✓ | ✓ | ✓ | ❌ | ✓ |
//! | Split part | ✓ | ✓ | ✓ | ✓ | ✓ | ✓ | ❌ | ❌ |
//! | UNPIVOT | union | union | native | keyword | keyword | keyword | union | keyword |
//! | Regex match | `~` | `~` | fn | fn | fn | RLIKE | REGEXP | ❌ |
//! | Recursive CTE | ✓ | ✓ | ✓ | ✓ | ✓ | ❌ | ❌ | ✓ |
//! | ORDER BY in CTE | ✓ | ✓ | ✓ | ✓ | ✓ | ✓ | ✓ | ❌ |

pub mod capabilities;
pub mod dates;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use capabilities::{
    BoolStyle, CastNames, ConcatStyle, DateFlavor, DialectCapabilities, Pagination, QuoteStyle,
    RegexFlavor, SplitStrategy, UnpivotSyntax,
};
pub use dates::SqlDates;

use crate::error::{StepError, StepResult};
use crate::sql::token::TokenStream;

/// Supported SQL dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    Postgres,
    Redshift,
    DuckDb,
    Snowflake,
    BigQuery,
    Databricks,
    MySql,
    TSql,
}

impl Dialect {
    pub const ALL: [Dialect; 8] = [
        Dialect::Postgres,
        Dialect::Redshift,
        Dialect::DuckDb,
        Dialect::Snowflake,
        Dialect::BigQuery,
        Dialect::Databricks,
        Dialect::MySql,
        Dialect::TSql,
    ];

    /// The capability row of this dialect.
    pub fn capabilities(&self) -> &'static DialectCapabilities {
        match self {
            Dialect::Postgres => &capabilities::POSTGRES,
            Dialect::Redshift => &capabilities::REDSHIFT,
            Dialect::DuckDb => &capabilities::DUCKDB,
            Dialect::Snowflake => &capabilities::SNOWFLAKE,
            Dialect::BigQuery => &capabilities::BIGQUERY,
            Dialect::Databricks => &capabilities::DATABRICKS,
            Dialect::MySql => &capabilities::MYSQL,
            Dialect::TSql => &capabilities::TSQL,
        }
    }

    pub fn name(&self) -> &'static str {
        self.capabilities().name
    }

    pub fn quote_identifier(&self, ident: &str) -> String {
        self.capabilities().quote.quote(ident)
    }

    pub fn quote_string(&self, s: &str) -> String {
        let escaped = format!("'{}'", s.replace('\'', "''"));
        if self.capabilities().unicode_strings && !s.is_ascii() {
            format!("N{}", escaped)
        } else {
            escaped
        }
    }

    pub fn format_bool(&self, b: bool) -> &'static str {
        self.capabilities().bool_style.format(b)
    }

    pub fn emit_limit_offset(&self, limit: Option<u64>, offset: Option<u64>) -> TokenStream {
        self.capabilities().pagination.emit(limit, offset)
    }

    /// Fail with a missing-capability error unless `available` holds.
    pub fn require(&self, available: bool, feature: &'static str) -> StepResult<()> {
        if available {
            Ok(())
        } else {
            Err(StepError::MissingCapability {
                feature,
                dialect: self.name(),
            })
        }
    }

    pub fn require_window_functions(&self, feature: &'static str) -> StepResult<()> {
        self.require(self.capabilities().window_functions, feature)
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        match lowered.as_str() {
            "postgres" | "postgresql" => Ok(Dialect::Postgres),
            "redshift" => Ok(Dialect::Redshift),
            "duckdb" => Ok(Dialect::DuckDb),
            "snowflake" => Ok(Dialect::Snowflake),
            "bigquery" | "googlebigquery" => Ok(Dialect::BigQuery),
            "databricks" | "spark" => Ok(Dialect::Databricks),
            "mysql" => Ok(Dialect::MySql),
            "tsql" | "mssql" | "sqlserver" => Ok(Dialect::TSql),
            _ => Err(format!("unknown SQL dialect '{}'", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialect_display_and_parse() {
        for dialect in Dialect::ALL {
            assert_eq!(dialect.to_string().parse::<Dialect>(), Ok(dialect));
        }
        assert_eq!("PostgreSQL".parse::<Dialect>(), Ok(Dialect::Postgres));
        assert!("oracle".parse::<Dialect>().is_err());
    }

    #[test]
    fn test_serde_names_match_display() {
        for dialect in Dialect::ALL {
            let json = serde_json::to_value(dialect).unwrap();
            assert_eq!(json, serde_json::Value::String(dialect.to_string()));
        }
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(Dialect::Postgres.quote_identifier("users"), "\"users\"");
        assert_eq!(Dialect::TSql.quote_identifier("users"), "[users]");
        assert_eq!(Dialect::MySql.quote_identifier("users"), "`users`");
        assert_eq!(Dialect::BigQuery.quote_identifier("users"), "`users`");
    }

    #[test]
    fn test_quote_string_unicode_prefix() {
        assert_eq!(Dialect::TSql.quote_string("café"), "N'café'");
        assert_eq!(Dialect::TSql.quote_string("it's"), "'it''s'");
        assert_eq!(Dialect::Postgres.quote_string("café"), "'café'");
    }

    #[test]
    fn test_format_bool() {
        assert_eq!(Dialect::DuckDb.format_bool(true), "true");
        assert_eq!(Dialect::TSql.format_bool(true), "1");
        assert_eq!(Dialect::MySql.format_bool(false), "0");
    }

    #[test]
    fn test_require_reports_dialect() {
        let err = Dialect::MySql.require_window_functions("rank").unwrap_err();
        assert_eq!(err.to_string(), "rank is not implemented for dialect mysql");
        assert!(Dialect::Postgres.require_window_functions("rank").is_ok());
    }
}
