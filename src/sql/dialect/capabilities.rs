//! Per-dialect capability table.
//!
//! Every dialect is a constant [`DialectCapabilities`]; step translators read
//! the fields they need and pick a strategy, or fail with a missing
//! capability error when the field says the feature is absent.

use crate::sql::token::{Token, TokenStream};

/// How identifiers are quoted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteStyle {
    /// `"name"` (ANSI, Postgres, DuckDB, Snowflake, Redshift)
    Double,
    /// `` `name` `` (MySQL, BigQuery, Databricks)
    Backtick,
    /// `[name]` (T-SQL)
    Bracket,
}

impl QuoteStyle {
    pub fn quote(&self, ident: &str) -> String {
        match self {
            QuoteStyle::Double => format!("\"{}\"", ident.replace('"', "\"\"")),
            QuoteStyle::Backtick => format!("`{}`", ident.replace('`', "``")),
            QuoteStyle::Bracket => format!("[{}]", ident.replace(']', "]]")),
        }
    }
}

/// How boolean literals are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolStyle {
    /// `true` / `false`
    Literal,
    /// `1` / `0`
    Numeric,
}

impl BoolStyle {
    pub fn format(&self, b: bool) -> &'static str {
        match (self, b) {
            (BoolStyle::Literal, true) => "true",
            (BoolStyle::Literal, false) => "false",
            (BoolStyle::Numeric, true) => "1",
            (BoolStyle::Numeric, false) => "0",
        }
    }
}

/// Pagination clause of the final projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pagination {
    /// `LIMIT n OFFSET m`
    LimitOffset,
    /// `OFFSET m ROWS FETCH NEXT n ROWS ONLY`, which needs an ORDER BY.
    OffsetFetch,
}

impl Pagination {
    pub fn emit(&self, limit: Option<u64>, offset: Option<u64>) -> TokenStream {
        let mut ts = TokenStream::new();
        match self {
            Pagination::LimitOffset => {
                if let Some(limit) = limit {
                    ts.push(Token::Limit).space().push(Token::LitInt(limit as i64));
                }
                if let Some(offset) = offset {
                    if limit.is_some() {
                        ts.space();
                    }
                    ts.push(Token::Offset).space().push(Token::LitInt(offset as i64));
                }
            }
            Pagination::OffsetFetch => {
                ts.push(Token::Offset)
                    .space()
                    .push(Token::LitInt(offset.unwrap_or(0) as i64))
                    .space()
                    .push(Token::Rows);
                if let Some(limit) = limit {
                    ts.space()
                        .push(Token::Fetch)
                        .space()
                        .push(Token::Next)
                        .space()
                        .push(Token::LitInt(limit as i64))
                        .space()
                        .push(Token::Rows)
                        .space()
                        .push(Token::Only);
                }
            }
        }
        ts
    }

    pub fn requires_order_by(&self) -> bool {
        matches!(self, Pagination::OffsetFetch)
    }
}

/// How strings are concatenated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcatStyle {
    /// `a || b`
    Pipes,
    /// `a + b`
    Plus,
    /// `CONCAT(a, b)`
    Function,
}

/// How `split` extracts the n-th part of a delimited string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitStrategy {
    /// `SPLIT_PART(col, 'delim', n)`, 1-based.
    SplitPart,
    /// `SPLIT(col, 'delim')[SAFE_OFFSET(n)]`, 0-based.
    SafeOffset,
    /// `element_at(split(col, 'delim'), n)`, 1-based; the delimiter is a
    /// regular expression and must be escaped.
    ElementAt,
}

/// How `unpivot` is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnpivotSyntax {
    /// `FROM t UNPIVOT [INCLUDE NULLS] (value FOR name IN (a, b))`
    Keyword { include_nulls: bool },
    /// DuckDB's `UNPIVOT t ON a, b INTO NAME name VALUE value`
    DuckDb,
    /// One `SELECT` per unpivoted column joined with `UNION ALL`.
    UnionAll,
}

/// How a regular-expression match is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegexFlavor {
    /// `col ~ 'pattern'`
    Tilde,
    /// `col REGEXP 'pattern'`
    RegexpKeyword,
    /// `col RLIKE 'pattern'`
    Rlike,
    /// `REGEXP_CONTAINS(col, r'pattern')`
    RegexpContains,
    /// `regexp_matches(col, 'pattern')`
    RegexpMatches,
    /// `REGEXP_INSTR(col, 'pattern') > 0`
    RegexpInstr,
}

/// Family of date functions a dialect speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateFlavor {
    /// `EXTRACT(field FROM x)`, `DATE_TRUNC('unit', x)`, `x + INTERVAL '1 day'`
    Ansi,
    /// `YEAR(x)`, `WEEKISO(x)`, `DATE_TRUNC('UNIT', x)`, `DATEADD(DAY, n, x)`
    Snowflake,
    /// `EXTRACT(field FROM x)`, `DATE_TRUNC(x, UNIT)`, `DATE_ADD(x, INTERVAL n DAY)`
    BigQuery,
    /// `YEAR(x)`, `WEEK(x, 3)`, `DATE_FORMAT` truncation, `DATE_ADD`
    MySql,
    /// `DATEPART(unit, x)`, `DATETRUNC(unit, x)`, `DATEADD(DAY, n, x)`
    TSql,
    /// `YEAR(x)`, `WEEKOFYEAR(x)`, `DATE_TRUNC('UNIT', x)`, `DATE_ADD(x, n)`
    Spark,
}

/// Type names used by `CAST`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CastNames {
    pub integer: &'static str,
    pub float: &'static str,
    pub text: &'static str,
    pub date: &'static str,
    pub boolean: &'static str,
}

const ANSI_CASTS: CastNames = CastNames {
    integer: "INTEGER",
    float: "DOUBLE PRECISION",
    text: "TEXT",
    date: "TIMESTAMP",
    boolean: "BOOLEAN",
};

/// Everything the relational translators need to know about one dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DialectCapabilities {
    pub name: &'static str,
    pub quote: QuoteStyle,
    pub bool_style: BoolStyle,
    /// Prefix non-ASCII string literals with `N`.
    pub unicode_strings: bool,
    pub pagination: Pagination,
    pub concat: ConcatStyle,
    /// ROW_NUMBER, RANK, DENSE_RANK and aggregate `OVER (...)`.
    pub window_functions: bool,
    pub split: Option<SplitStrategy>,
    pub unpivot: UnpivotSyntax,
    pub regex: Option<RegexFlavor>,
    pub date: DateFlavor,
    pub recursive_cte: bool,
    pub recursive_keyword: bool,
    /// ORDER BY is accepted inside a CTE body.
    pub order_by_in_cte: bool,
    pub full_outer_join: bool,
    /// `MOD(a, b)` instead of `a % b`.
    pub modulo_function: bool,
    pub casts: CastNames,
}

pub const POSTGRES: DialectCapabilities = DialectCapabilities {
    name: "postgres",
    quote: QuoteStyle::Double,
    bool_style: BoolStyle::Literal,
    unicode_strings: false,
    pagination: Pagination::LimitOffset,
    concat: ConcatStyle::Pipes,
    window_functions: true,
    split: Some(SplitStrategy::SplitPart),
    unpivot: UnpivotSyntax::UnionAll,
    regex: Some(RegexFlavor::Tilde),
    date: DateFlavor::Ansi,
    recursive_cte: true,
    recursive_keyword: true,
    order_by_in_cte: true,
    full_outer_join: true,
    modulo_function: true,
    casts: ANSI_CASTS,
};

pub const REDSHIFT: DialectCapabilities = DialectCapabilities {
    name: "redshift",
    casts: CastNames {
        text: "VARCHAR",
        ..ANSI_CASTS
    },
    ..POSTGRES
};

pub const DUCKDB: DialectCapabilities = DialectCapabilities {
    name: "duckdb",
    unpivot: UnpivotSyntax::DuckDb,
    regex: Some(RegexFlavor::RegexpMatches),
    casts: CastNames {
        float: "DOUBLE",
        text: "VARCHAR",
        ..ANSI_CASTS
    },
    ..POSTGRES
};

pub const SNOWFLAKE: DialectCapabilities = DialectCapabilities {
    name: "snowflake",
    unpivot: UnpivotSyntax::Keyword {
        include_nulls: true,
    },
    regex: Some(RegexFlavor::RegexpInstr),
    date: DateFlavor::Snowflake,
    casts: CastNames {
        float: "FLOAT",
        text: "VARCHAR",
        ..ANSI_CASTS
    },
    ..POSTGRES
};

pub const BIGQUERY: DialectCapabilities = DialectCapabilities {
    name: "bigquery",
    quote: QuoteStyle::Backtick,
    concat: ConcatStyle::Function,
    split: Some(SplitStrategy::SafeOffset),
    unpivot: UnpivotSyntax::Keyword {
        include_nulls: true,
    },
    regex: Some(RegexFlavor::RegexpContains),
    date: DateFlavor::BigQuery,
    casts: CastNames {
        integer: "INT64",
        float: "FLOAT64",
        text: "STRING",
        date: "TIMESTAMP",
        boolean: "BOOL",
    },
    ..POSTGRES
};

pub const DATABRICKS: DialectCapabilities = DialectCapabilities {
    name: "databricks",
    quote: QuoteStyle::Backtick,
    split: Some(SplitStrategy::ElementAt),
    unpivot: UnpivotSyntax::Keyword {
        include_nulls: true,
    },
    regex: Some(RegexFlavor::Rlike),
    date: DateFlavor::Spark,
    recursive_cte: false,
    casts: CastNames {
        integer: "INT",
        float: "DOUBLE",
        text: "STRING",
        date: "TIMESTAMP",
        boolean: "BOOLEAN",
    },
    ..POSTGRES
};

/// MySQL at the 5.7 feature level: no window functions, no recursive CTEs.
pub const MYSQL: DialectCapabilities = DialectCapabilities {
    name: "mysql",
    quote: QuoteStyle::Backtick,
    bool_style: BoolStyle::Numeric,
    concat: ConcatStyle::Function,
    window_functions: false,
    split: None,
    unpivot: UnpivotSyntax::UnionAll,
    regex: Some(RegexFlavor::RegexpKeyword),
    date: DateFlavor::MySql,
    recursive_cte: false,
    full_outer_join: false,
    casts: CastNames {
        integer: "SIGNED",
        float: "DECIMAL(65, 10)",
        text: "CHAR",
        date: "DATETIME",
        boolean: "UNSIGNED",
    },
    ..POSTGRES
};

pub const TSQL: DialectCapabilities = DialectCapabilities {
    name: "tsql",
    quote: QuoteStyle::Bracket,
    bool_style: BoolStyle::Numeric,
    unicode_strings: true,
    pagination: Pagination::OffsetFetch,
    concat: ConcatStyle::Plus,
    split: None,
    unpivot: UnpivotSyntax::Keyword {
        include_nulls: false,
    },
    regex: None,
    date: DateFlavor::TSql,
    recursive_keyword: false,
    order_by_in_cte: false,
    modulo_function: false,
    casts: CastNames {
        integer: "INT",
        float: "FLOAT",
        text: "NVARCHAR(MAX)",
        date: "DATETIME2",
        boolean: "BIT",
    },
    ..POSTGRES
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_styles_escape() {
        assert_eq!(QuoteStyle::Double.quote("weird\"name"), "\"weird\"\"name\"");
        assert_eq!(QuoteStyle::Bracket.quote("weird]name"), "[weird]]name]");
        assert_eq!(QuoteStyle::Backtick.quote("weird`name"), "`weird``name`");
    }

    #[test]
    fn test_pagination() {
        let ts = Pagination::LimitOffset.emit(Some(10), Some(5));
        assert_eq!(ts.serialize(crate::sql::Dialect::Postgres), "LIMIT 10 OFFSET 5");
        let ts = Pagination::OffsetFetch.emit(Some(10), None);
        assert_eq!(
            ts.serialize(crate::sql::Dialect::TSql),
            "OFFSET 0 ROWS FETCH NEXT 10 ROWS ONLY"
        );
    }

    #[test]
    fn test_derived_tables_override_only_differences() {
        assert_eq!(REDSHIFT.split, POSTGRES.split);
        assert_eq!(DUCKDB.unpivot, UnpivotSyntax::DuckDb);
        assert!(!MYSQL.window_functions);
        assert!(TSQL.recursive_cte && !TSQL.recursive_keyword);
    }
}
