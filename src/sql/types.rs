//! Column types recorded by the metadata tracker.
//!
//! Describers report types as free-form database names (`int4`,
//! `VARCHAR(255)`, `NUMBER(38,0)`, ...). [`DataType::from_sql_name`] maps the
//! common ones to a closed set so translators can reason about them (is this
//! numeric? a date?) and keeps anything else verbatim as
//! [`DataType::Other`].

use std::fmt;

use crate::step::ConvertType;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DataType {
    Bool,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    /// Fixed-precision decimal (precision, scale).
    Decimal(u8, u8),
    /// Unbounded text.
    String,
    Varchar(u16),
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Json,
    /// A type name this crate does not interpret, upper-cased.
    Other(String),
}

impl DataType {
    /// Parse a known SQL type name; `None` for anything unrecognised.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().to_lowercase();

        if let Some(inner) = extract_parens(&s, "decimal")
            .or_else(|| extract_parens(&s, "numeric"))
            .or_else(|| extract_parens(&s, "number"))
        {
            return parse_decimal_params(&inner);
        }

        if let Some(inner) = extract_parens(&s, "varchar")
            .or_else(|| extract_parens(&s, "character varying"))
            .or_else(|| extract_parens(&s, "nvarchar"))
            .or_else(|| extract_parens(&s, "char"))
        {
            return parse_length_param(&inner).map(DataType::Varchar);
        }

        match s.as_str() {
            "bool" | "boolean" | "bit" => Some(DataType::Bool),
            "smallint" | "int2" | "tinyint" => Some(DataType::Int16),
            "int" | "integer" | "int4" | "signed" => Some(DataType::Int32),
            "bigint" | "int8" | "int64" | "long" => Some(DataType::Int64),
            "real" | "float4" => Some(DataType::Float32),
            "double" | "float8" | "float64" | "double precision" | "float" => {
                Some(DataType::Float64)
            }
            "decimal" | "numeric" | "number" => Some(DataType::Decimal(38, 0)),
            "text" | "string" | "varchar" | "nvarchar" | "ntext" | "char" => {
                Some(DataType::String)
            }
            "date" => Some(DataType::Date),
            "time" => Some(DataType::Time),
            "timestamp" | "datetime" | "datetime2" | "timestamp_ntz" => {
                Some(DataType::Timestamp)
            }
            "timestamptz" | "timestamp with time zone" | "datetimeoffset" | "timestamp_tz" => {
                Some(DataType::TimestampTz)
            }
            "json" | "jsonb" | "variant" => Some(DataType::Json),
            _ => None,
        }
    }

    /// Interpret a describer-reported type name, keeping unknown names.
    pub fn from_sql_name(s: &str) -> Self {
        DataType::parse(s).unwrap_or_else(|| DataType::Other(s.trim().to_uppercase()))
    }

    /// Type of a column after `convert`.
    pub fn for_conversion(target: ConvertType) -> Self {
        match target {
            ConvertType::Integer => DataType::Int64,
            ConvertType::Float => DataType::Float64,
            ConvertType::Text => DataType::String,
            ConvertType::Date => DataType::Timestamp,
            ConvertType::Boolean => DataType::Bool,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            DataType::Int16
                | DataType::Int32
                | DataType::Int64
                | DataType::Float32
                | DataType::Float64
                | DataType::Decimal(_, _)
        )
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, DataType::Int16 | DataType::Int32 | DataType::Int64)
    }

    pub fn is_string(&self) -> bool {
        matches!(self, DataType::String | DataType::Varchar(_))
    }

    pub fn is_temporal(&self) -> bool {
        matches!(
            self,
            DataType::Date | DataType::Time | DataType::Timestamp | DataType::TimestampTz
        )
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Bool => write!(f, "BOOLEAN"),
            DataType::Int16 => write!(f, "SMALLINT"),
            DataType::Int32 => write!(f, "INTEGER"),
            DataType::Int64 => write!(f, "BIGINT"),
            DataType::Float32 => write!(f, "REAL"),
            DataType::Float64 => write!(f, "DOUBLE PRECISION"),
            DataType::Decimal(p, s) => write!(f, "DECIMAL({}, {})", p, s),
            DataType::String => write!(f, "TEXT"),
            DataType::Varchar(n) => write!(f, "VARCHAR({})", n),
            DataType::Date => write!(f, "DATE"),
            DataType::Time => write!(f, "TIME"),
            DataType::Timestamp => write!(f, "TIMESTAMP"),
            DataType::TimestampTz => write!(f, "TIMESTAMP WITH TIME ZONE"),
            DataType::Json => write!(f, "JSON"),
            DataType::Other(name) => write!(f, "{}", name),
        }
    }
}

/// Content inside parentheses for a given type prefix:
/// `extract_parens("decimal(10,2)", "decimal")` is `Some("10,2")`.
fn extract_parens(s: &str, prefix: &str) -> Option<String> {
    let rest = s.strip_prefix(prefix)?.trim();
    let inner = rest.strip_prefix('(')?.strip_suffix(')')?;
    Some(inner.to_string())
}

fn parse_decimal_params(inner: &str) -> Option<DataType> {
    let parts: Vec<&str> = inner.split(',').map(|s| s.trim()).collect();
    match parts.as_slice() {
        [precision] => Some(DataType::Decimal(precision.parse().ok()?, 0)),
        [precision, scale] => Some(DataType::Decimal(
            precision.parse().ok()?,
            scale.parse().ok()?,
        )),
        _ => None,
    }
}

fn parse_length_param(inner: &str) -> Option<u16> {
    let inner = inner.trim();
    // T-SQL's "max"
    if inner.eq_ignore_ascii_case("max") {
        return Some(u16::MAX);
    }
    inner.parse().ok()
}
