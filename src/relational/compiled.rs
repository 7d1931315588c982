//! The growing CTE chain of one translation.

use std::collections::HashSet;

use crate::error::{StepError, StepResult};
use crate::sql::{col, Cte, CteBody, Dialect, OrderByExpr, Query, SelectExpr, SortDir, TableRef};

use super::metadata::ColumnMetadata;

/// Ordered CTEs emitted so far. Names are unique (case-insensitively) and
/// each CTE only reads CTEs pushed before it.
#[derive(Debug, Clone, Default)]
pub struct CompiledQuery {
    ctes: Vec<Cte>,
    names: HashSet<String>,
    /// Upper-cased names each CTE reads, in push order.
    reads: Vec<HashSet<String>>,
}

impl CompiledQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a CTE. Fails on a reused name, or when the CTE would be read
    /// by one pushed before it.
    pub fn push(&mut self, cte: Cte) -> StepResult<()> {
        let key = cte.name.to_uppercase();
        if self.names.contains(&key) {
            return Err(StepError::invalid(format!(
                "CTE name '{}' is already used",
                cte.name
            )));
        }
        if let Some(reader) = self
            .ctes
            .iter()
            .zip(&self.reads)
            .find(|(_, reads)| reads.contains(&key))
        {
            return Err(StepError::invalid(format!(
                "CTE '{}' reads '{}' before it is defined",
                reader.0.name, cte.name
            )));
        }
        let mut reads = match &cte.body {
            CteBody::Query(query) => query.tables_read(),
            CteBody::Raw(_) => HashSet::new(),
        };
        if !cte.recursive && reads.contains(&key) {
            return Err(StepError::invalid(format!(
                "CTE '{}' reads itself without being recursive",
                cte.name
            )));
        }
        reads.remove(&key);
        self.names.insert(key);
        self.reads.push(reads);
        self.ctes.push(cte);
        Ok(())
    }

    pub fn ctes(&self) -> &[Cte] {
        &self.ctes
    }

    pub fn into_ctes(self) -> Vec<Cte> {
        self.ctes
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.ctes.iter().map(|c| c.name.as_str())
    }

    /// Name of the last CTE, the one holding the current rows.
    pub fn current(&self) -> Option<&str> {
        self.ctes.last().map(|c| c.name.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.ctes.is_empty()
    }

    /// `WITH <ctes> <main>`
    pub fn with_main(&self, main: Query) -> Query {
        let mut query = main;
        let mut with = self.ctes.clone();
        with.append(&mut query.with);
        query.with = with;
        query
    }

    /// `WITH <ctes> SELECT <columns> FROM <current> [ORDER BY ...]`, or
    /// `None` before any CTE exists.
    pub fn select_current(
        &self,
        columns: &[&ColumnMetadata],
        ordering: &[(String, SortDir)],
    ) -> Option<Query> {
        let current = self.current()?;
        let select: Vec<SelectExpr> = columns.iter().map(|c| col(&c.name).into()).collect();
        let order_by = ordering
            .iter()
            .map(|(name, dir)| match dir {
                SortDir::Asc => OrderByExpr::asc(col(name)),
                SortDir::Desc => OrderByExpr::desc(col(name)),
            })
            .collect();
        let main = Query::new()
            .select(select)
            .from(TableRef::new(current))
            .order_by(order_by);
        Some(self.with_main(main))
    }

    pub fn to_sql(&self, columns: &[&ColumnMetadata], dialect: Dialect) -> Option<String> {
        self.select_current(columns, &[])
            .map(|q| q.to_sql(dialect))
    }
}
