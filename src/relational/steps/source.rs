//! `domain` and `customsql`: steps that introduce a new row set.

use std::collections::HashSet;

use tracing::trace;

use crate::error::{SchemaError, StepError, StepResult};
use crate::relational::context::{RowOrder, StepContext, StepOutput};
use crate::relational::metadata::{ColumnMetadata, SchemaDelta, CURRENT_TABLE};
use crate::sql::{col, Cte, Query, SelectExpr, TableRef};
use crate::step::{CustomSqlStep, DomainStep};

/// Placeholder replaced by the previous CTE name in custom queries.
pub const PREVIOUS_STEP_PLACEHOLDER: &str = "##PREVIOUS_STEP##";

pub fn domain(step: &DomainStep, ctx: &StepContext) -> StepResult<StepOutput> {
    let source = ctx.collaborators.retrieve(&step.domain)?;
    trace!(domain = %step.domain, source = %source, "resolved domain");
    let columns = described_columns(ctx.collaborators.describe(&source)?)?;
    if columns.is_empty() {
        return Err(StepError::invalid(format!(
            "domain '{}' has no columns",
            step.domain
        )));
    }

    let cte = if is_query(&source) {
        Cte::raw(&ctx.name, &source)
    } else {
        let mut from = TableRef::raw(source.trim());
        if source.trim_start().starts_with('(') {
            from = from.with_alias("SOURCE");
        }
        let select: Vec<SelectExpr> = columns.iter().map(|c| col(&c.name).into()).collect();
        Cte::new(&ctx.name, Query::new().select(select).from(from))
    };

    Ok(StepOutput::new(cte, SchemaDelta::new().replace_all(columns)).ordered(RowOrder::Clear))
}

pub fn custom_sql(step: &CustomSqlStep, ctx: &StepContext) -> StepResult<StepOutput> {
    let sql = match ctx.compiled.current() {
        Some(previous) => step
            .query
            .replace(PREVIOUS_STEP_PLACEHOLDER, &ctx.dialect.quote_identifier(previous)),
        None if step.query.contains(PREVIOUS_STEP_PLACEHOLDER) => {
            return Err(StepError::invalid(format!(
                "{} used in the first step of a pipeline",
                PREVIOUS_STEP_PLACEHOLDER
            )))
        }
        None => step.query.clone(),
    };
    let cte = Cte::raw(&ctx.name, &sql);

    let described = ctx.current_sql(Query::select_all_from(&ctx.name).with_cte(cte.clone()));
    trace!(sql = %described, "describing custom query");
    let columns = described_columns(ctx.collaborators.describe(&described)?)?;
    if columns.is_empty() {
        return Err(StepError::invalid("custom query returns no columns"));
    }

    Ok(StepOutput::new(cte, SchemaDelta::new().replace_all(columns)).ordered(RowOrder::Clear))
}

fn described_columns(described: Vec<(String, String)>) -> StepResult<Vec<ColumnMetadata>> {
    let mut seen = HashSet::new();
    described
        .into_iter()
        .map(|(name, type_name)| {
            if !seen.insert(name.to_uppercase()) {
                return Err(SchemaError::DuplicateColumn {
                    table: CURRENT_TABLE.to_string(),
                    column: name,
                }
                .into());
            }
            Ok(ColumnMetadata::described(&name, &type_name))
        })
        .collect()
}

fn is_query(source: &str) -> bool {
    let head: String = source
        .trim_start()
        .chars()
        .take(6)
        .collect::<String>()
        .to_uppercase();
    head.starts_with("SELECT") || head.starts_with("WITH")
}
