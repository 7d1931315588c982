//! `dateextract`.

use std::collections::HashSet;

use crate::error::{StepError, StepResult};
use crate::relational::context::{StepContext, StepOutput};
use crate::relational::metadata::SchemaDelta;
use crate::sql::{col, Cte, DataType, ExprExt};
use crate::step::DateExtractStep;

pub fn date_extract(step: &DateExtractStep, ctx: &StepContext) -> StepResult<StepOutput> {
    if step.date_info.is_empty() {
        return Err(StepError::invalid("dateextract needs at least one unit"));
    }
    let source = ctx.column(&step.column)?.name.clone();
    let date = col(&source);

    let mut seen = HashSet::new();
    let mut extra = Vec::new();
    let mut delta = SchemaDelta::new();
    for (unit, name) in step.outputs() {
        ctx.require_absent(&name)?;
        if !seen.insert(name.to_uppercase()) {
            return Err(StepError::invalid(format!(
                "dateextract produces '{}' twice",
                name
            )));
        }
        extra.push(ctx.dates.unit(unit, &date)?.alias(&name));
        let sql_type = if unit.yields_date() {
            DataType::Timestamp
        } else {
            DataType::Int64
        };
        delta = delta.add(&name, sql_type);
    }

    let query = ctx.project(|_| None, extra)?;
    Ok(StepOutput::new(Cte::new(&ctx.name, query), delta))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relational::steps::test_support::{names, run};
    use crate::sql::Dialect;
    use crate::step::{DateUnit, Step};

    const SCHEMA: &[(&str, &str)] = &[("d", "timestamp"), ("v", "int")];

    fn extract(units: Vec<DateUnit>, new_columns: Vec<String>) -> Step {
        Step::DateExtract(DateExtractStep {
            column: "d".into(),
            date_info: units,
            new_columns,
        })
    }

    #[test]
    fn test_default_names_and_types() {
        let t = run(
            vec![extract(vec![DateUnit::Year, DateUnit::FirstDayOfMonth], vec![])],
            SCHEMA,
            Dialect::Postgres,
        )
        .unwrap();
        assert_eq!(names(&t), vec!["d", "v", "d_year", "d_firstDayOfMonth"]);
        assert_eq!(t.columns[2].sql_type, DataType::Int64);
        assert_eq!(t.columns[3].sql_type, DataType::Timestamp);
        assert!(t.sql.contains("EXTRACT(YEAR FROM \"d\") AS \"d_year\""));
        assert!(t
            .sql
            .contains("DATE_TRUNC('month', \"d\") AS \"d_firstDayOfMonth\""));
    }

    #[test]
    fn test_explicit_names() {
        let t = run(
            vec![extract(vec![DateUnit::Week], vec!["wk".into()])],
            SCHEMA,
            Dialect::MySql,
        )
        .unwrap();
        assert!(t.sql.contains("WEEK(`d`, 0) AS `wk`"));
    }

    #[test]
    fn test_existing_column_is_rejected() {
        let err = run(
            vec![extract(vec![DateUnit::Day], vec!["v".into()])],
            SCHEMA,
            Dialect::Postgres,
        )
        .unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn test_duplicate_outputs_are_rejected() {
        let err = run(
            vec![extract(
                vec![DateUnit::Day, DateUnit::Month],
                vec!["x".into(), "X".into()],
            )],
            SCHEMA,
            Dialect::Postgres,
        )
        .unwrap_err();
        assert!(matches!(err.source, StepError::InvalidStep(_)));
    }
}
